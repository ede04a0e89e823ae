//! Host stub configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use blkio_stub::config::StubConfig;
//!
//! // Defaults with env overrides
//! let config = StubConfig::from_env();
//!
//! // Or customize programmatically
//! let config = StubConfig::from_env()
//!     .max_reqs(64)
//!     .poll_timeout(Duration::from_millis(500));
//! ```

pub mod defaults;

use std::time::Duration;

use blkio_core::env::{env_get, env_get_bool};
use blkio_core::error::{BlkioError, Result};
use blkio_core::params::DeviceParams;

/// Host stub configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Proxy control device path
    pub devname: String,
    /// Ring capacity; the request pool is sized to match
    pub max_reqs: usize,
    /// Bound on one readiness wait
    pub poll_timeout: Duration,
    /// Device geometry the request pool is laid out for
    pub device: DeviceParams,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl StubConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `BLKIO_PROXY_DEVNAME` - Proxy control device path
    /// - `BLKIO_PROXY_MAX_REQS` - Ring slots
    /// - `BLKIO_POLL_TIMEOUT_MS` - Readiness wait bound in milliseconds
    /// - `BLKIO_PAGE_MAIN_SIZE` - Flash page main-area size in bytes
    /// - `BLKIO_USE_NEW_RMW` - Map at kernel-page granularity (0/1)
    pub fn from_env() -> Self {
        Self {
            devname: env_get("BLKIO_PROXY_DEVNAME", defaults::PROXY_DEVNAME.to_string()),
            max_reqs: env_get("BLKIO_PROXY_MAX_REQS", defaults::PROXY_MAX_REQS),
            poll_timeout: Duration::from_millis(env_get(
                "BLKIO_POLL_TIMEOUT_MS",
                defaults::POLL_TIMEOUT_MS,
            )),
            device: DeviceParams {
                page_main_size: env_get("BLKIO_PAGE_MAIN_SIZE", defaults::PAGE_MAIN_SIZE),
                use_new_rmw: env_get_bool("BLKIO_USE_NEW_RMW", defaults::USE_NEW_RMW),
            },
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            devname: defaults::PROXY_DEVNAME.to_string(),
            max_reqs: defaults::PROXY_MAX_REQS,
            poll_timeout: Duration::from_millis(defaults::POLL_TIMEOUT_MS),
            device: DeviceParams {
                page_main_size: defaults::PAGE_MAIN_SIZE,
                use_new_rmw: defaults::USE_NEW_RMW,
            },
        }
    }

    // Builder methods

    pub fn devname(mut self, path: impl Into<String>) -> Self {
        self.devname = path.into();
        self
    }

    pub fn max_reqs(mut self, n: usize) -> Self {
        self.max_reqs = n;
        self
    }

    pub fn poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn device(mut self, params: DeviceParams) -> Self {
        self.device = params;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.devname.is_empty() {
            return Err(BlkioError::Config("devname must not be empty".into()));
        }
        if self.max_reqs == 0 {
            return Err(BlkioError::Config("max_reqs must be > 0".into()));
        }
        if self.max_reqs > u32::MAX as usize {
            return Err(BlkioError::Config("max_reqs must fit a slot id".into()));
        }
        if self.poll_timeout.is_zero() {
            return Err(BlkioError::Config("poll_timeout must be > 0".into()));
        }
        if self.poll_timeout > Duration::from_millis(u16::MAX as u64) {
            return Err(BlkioError::Config(format!(
                "poll_timeout must be <= {} ms",
                u16::MAX
            )));
        }
        self.device.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let config = StubConfig::new();
        assert_eq!(config.devname, "/dev/bdbm_blockio_proxy");
        assert_eq!(config.max_reqs, 128);
        assert_eq!(config.poll_timeout, Duration::from_secs(3));
        assert_eq!(config.device, DeviceParams::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = StubConfig::new()
            .devname("/dev/other")
            .max_reqs(4)
            .poll_timeout(Duration::from_millis(20))
            .device(DeviceParams {
                page_main_size: 16384,
                use_new_rmw: true,
            });
        assert_eq!(config.devname, "/dev/other");
        assert_eq!(config.max_reqs, 4);
        assert_eq!(config.poll_timeout, Duration::from_millis(20));
        assert_eq!(config.device.mapping_unit(), 4096);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(StubConfig::new().max_reqs(0).validate().is_err());
        assert!(StubConfig::new().devname("").validate().is_err());
        assert!(StubConfig::new().poll_timeout(Duration::ZERO).validate().is_err());
        assert!(StubConfig::new()
            .poll_timeout(Duration::from_secs(120))
            .validate()
            .is_err());
        let odd = DeviceParams {
            page_main_size: 1000,
            use_new_rmw: false,
        };
        assert!(StubConfig::new().device(odd).validate().is_err());
    }
}
