//! Library defaults for `StubConfig`.

/// Control device exported by the kernel proxy.
pub const PROXY_DEVNAME: &str = crate::proxy_sys::BLKIO_PROXY_DEVNAME;

/// Ring slots, and therefore pool items.
pub const PROXY_MAX_REQS: usize = crate::proxy_sys::BLKIO_PROXY_MAX_REQS;

/// Upper bound on one readiness wait; also the teardown log interval.
pub const POLL_TIMEOUT_MS: u64 = 3000;

/// Main-area size of one flash page.
pub const PAGE_MAIN_SIZE: usize = 8192;

pub const USE_NEW_RMW: bool = false;
