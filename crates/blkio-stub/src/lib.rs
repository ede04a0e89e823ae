//! # blkio-stub
//!
//! Host-side bridge between the kernel block-I/O proxy and the flash
//! translation engine.
//!
//! The proxy places block-I/O descriptors in a ring of slots shared with
//! this process. A poller thread claims submitted slots, turns each one
//! into a pooled `HlmReq` and hands it to the engine; when the engine
//! returns the request the slot is tagged done and the proxy signalled.
//!
//! - `proxy_sys` - wire layout and ioctl shared with the proxy
//! - `proxy_ring` - the mapped slot array and its tag protocol
//! - `proxy_device` - proxy handles (`CharDevProxy`)
//! - `loopback` - in-process proxy over a memfd (`LoopbackProxy`)
//! - `hlm_reqs_pool` - bounded pool of host-level requests
//! - `poller` - the polling loop
//! - `stub` - the orchestrator (`BlkioStub`)
//! - `config` - `StubConfig` with env overrides
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use blkio_stub::{BlkioStub, StubConfig};
//!
//! let mut stub = BlkioStub::open(&StubConfig::from_env(), Arc::new(my_engine))?;
//! // ... the engine receives requests and calls host.end_req(..)
//! stub.close();
//! ```

pub mod config;
pub mod hlm_reqs_pool;
pub mod inflight;
pub mod stats;
pub mod stub;

mod poller;

// The ring is a shared mapping of a Linux character device (or memfd).
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod proxy_sys;
        pub mod proxy_ring;
        pub mod proxy_device;
        pub mod loopback;
    } else {
        compile_error!("blkio-stub requires Linux");
    }
}

pub use config::StubConfig;
pub use hlm_reqs_pool::HlmReqsPool;
pub use loopback::{LoopbackProxy, LoopbackRequest};
pub use proxy_device::{CharDevProxy, ProxyDevice};
pub use proxy_ring::ProxyRing;
pub use stats::{StatsSnapshot, StubStats};
pub use stub::BlkioStub;
