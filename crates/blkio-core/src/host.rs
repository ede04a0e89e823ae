//! Host interface — what the engine and the polling loop call.

use std::sync::Arc;

use crate::entry::{BlkioReq, SlotId};
use crate::hlm::HlmReq;

/// The submission and completion half of the host lifecycle.
///
/// `open` and `close` are owned by the concrete host (they need its
/// configuration); these two calls are what flows across the engine
/// boundary once the host is running.
pub trait HostInterface: Send + Sync {
    /// Build a host-level request from `br` and forward it to the engine.
    ///
    /// `origin` identifies the ring slot holding `br`; it is carried on
    /// the request so completion can find the slot again.
    fn make_req(&self, br: &BlkioReq, origin: SlotId);

    /// Retire a request previously accepted by the engine.
    fn end_req(&self, req: Box<HlmReq>);
}

/// Shared handle to a running host, cloned by engines that complete
/// requests asynchronously.
pub type HostRef = Arc<dyn HostInterface>;
