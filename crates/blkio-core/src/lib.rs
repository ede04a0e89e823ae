//! # blkio-core — Types and trait seams for the block-I/O host stub
//!
//! The host stub sits between a kernel-resident block-I/O proxy and a
//! flash translation engine. This crate holds everything both sides of
//! that bridge agree on, without touching the OS:
//!
//! - `entry` - the block-I/O descriptor the proxy writes (`BlkioReq`),
//!   slot identifiers and the slot state tags
//! - `hlm` - the host-level-mapping request handed to the engine
//! - `engine` - the translation engine contract (`HlmEngine`)
//! - `host` - the contract the engine calls back into (`HostInterface`)
//! - `params` - device geometry (mapping / io unit sizes)
//! - `env` - environment variable helpers used by configuration
//! - `error` - error taxonomy
//!
//! Concrete implementations (ring mapping, proxy handles, request pool,
//! polling loop) live in `blkio-stub`.

pub mod entry;
pub mod hlm;
pub mod engine;
pub mod host;
pub mod params;
pub mod env;
pub mod error;

pub use entry::{BioVec, BlkioOp, BlkioReq, SlotId, SlotState};
pub use hlm::{HlmOp, HlmPage, HlmReq};
pub use engine::{HlmEngine, Rejected};
pub use host::{HostInterface, HostRef};
pub use params::DeviceParams;
pub use env::{env_get, env_get_bool};
pub use error::{BlkioError, BuildError, Result};

/// Sizes shared by the proxy and the stub.
pub mod constants {
    /// Block layer sector size. Descriptor offsets and sizes count sectors.
    pub const SECTOR_SIZE: usize = 512;

    /// Kernel page size. Every buffer fragment covers exactly one.
    pub const KPAGE_SIZE: usize = 4096;

    /// Sectors per kernel page.
    pub const KPAGE_SECTORS: u64 = (KPAGE_SIZE / SECTOR_SIZE) as u64;

    /// Maximum buffer fragments in one block-I/O descriptor.
    pub const BLKIO_MAX_VECS: usize = 64;
}
