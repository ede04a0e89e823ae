//! Translation engine contract.
//!
//! The engine maps, programs and garbage-collects flash pages. The host
//! stub only needs one entry point from it.
//!
//! # Ownership
//!
//! `make_req` takes the request by value. On `Ok(())` the engine owns it
//! until it returns it through `HostInterface::end_req`, which may happen
//! on any thread, and may even happen before `make_req` returns. On
//! `Err(Rejected)` ownership comes straight back to the stub, which
//! retires the originating slot itself. Either way a request is
//! released exactly once.

use crate::hlm::HlmReq;
use crate::host::HostRef;

/// A request the engine refused synchronously.
#[derive(Debug)]
pub struct Rejected {
    pub req: Box<HlmReq>,
    /// Status reported to the proxy (negative errno convention).
    pub status: i32,
}

/// The flash translation engine, as seen from the host stub.
pub trait HlmEngine: Send + Sync {
    /// Accept a host-level request for asynchronous service.
    ///
    /// `host` is where the finished request must be returned.
    fn make_req(&self, host: &HostRef, req: Box<HlmReq>) -> Result<(), Rejected>;
}
