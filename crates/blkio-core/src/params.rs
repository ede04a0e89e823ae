//! Device geometry consumed by the host stub.

use crate::constants::KPAGE_SIZE;
use crate::error::{BlkioError, Result};

/// The slice of the device parameters the stub cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    /// Main-area size of one flash page, in bytes.
    pub page_main_size: usize,
    /// Map at kernel-page granularity and let the engine pack several
    /// logical pages into one flash page (read-modify-write below the
    /// flash page size).
    pub use_new_rmw: bool,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            page_main_size: 8192,
            use_new_rmw: false,
        }
    }
}

impl DeviceParams {
    /// Size of one logical page (mapping unit), in bytes.
    pub fn mapping_unit(&self) -> usize {
        if self.use_new_rmw {
            KPAGE_SIZE
        } else {
            self.page_main_size
        }
    }

    /// Size of one device io unit, in bytes.
    pub fn io_unit(&self) -> usize {
        self.page_main_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_main_size == 0 || self.page_main_size % KPAGE_SIZE != 0 {
            return Err(BlkioError::Config(format!(
                "page_main_size {} is not a multiple of the {} byte kernel page",
                self.page_main_size, KPAGE_SIZE
            )));
        }
        Ok(())
    }
}
