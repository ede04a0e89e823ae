//! The polling loop.
//!
//! One dedicated thread waits for readiness on the proxy handle with a
//! bounded timeout, so the stop flag is rechecked at least once per
//! timeout even if a notification is lost. Every wake-up triggers one
//! full scan of the ring; each submitted slot is claimed, its staged
//! fragment addresses are installed, and it is handed to `make_req`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use blkio_core::entry::{SlotId, SlotState};

use crate::stats::StubStats;
use crate::stub::{StubResources, StubShared};

/// Pause after a failed readiness wait.
const WAIT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

pub(crate) const POLLER_THREAD_NAME: &str = "blkio-stub-poll";

/// Poller thread main loop.
pub(crate) fn poll_loop(shared: &StubShared) {
    let Some(res) = shared.resources() else {
        return;
    };
    debug!(capacity = res.ring.capacity(), "poller started");

    while !shared.stop.load(Ordering::Acquire) {
        match res.device.wait_ready(shared.poll_timeout) {
            Ok(true) => {}
            Ok(false) => {
                trace!("readiness wait timed out");
                continue;
            }
            Err(e) => {
                trace!(error = %e, "readiness wait failed");
                thread::sleep(WAIT_ERROR_BACKOFF);
                continue;
            }
        }

        StubStats::bump(&shared.stats.wakeups);
        let sent = scan(shared, &res);
        if sent == 0 {
            warn!("readiness signalled but no submitted slot found");
            StubStats::bump(&shared.stats.anomalous_wakes);
        }
    }

    debug!("poller stopped");
}

/// One pass over the whole ring. Returns the number of slots dispatched.
fn scan(shared: &StubShared, res: &Arc<StubResources>) -> usize {
    let ring = &res.ring;
    let mut sent = 0;

    for index in 0..ring.capacity() {
        let id = SlotId(index as u32);
        let found = ring.id_at(index);
        if found != id.0 {
            error!(slot = index, found, "slot carries a foreign id, skipped");
            continue;
        }

        match ring.state(id) {
            Some(SlotState::Submitted) => {
                // Only the poller claims slots; a lost CAS means the
                // proxy changed the tag under us.
                if !ring.begin(id) {
                    continue;
                }
                // Safety: `begin` succeeded, the slot is ours until finish.
                let br = unsafe {
                    ring.stage_fragments(id);
                    ring.descriptor(id)
                };
                shared.submit(res, br, id);
                StubStats::bump(&shared.stats.dispatched);
                sent += 1;
            }
            Some(_) => {}
            None => {
                warn!(slot = %id, tag = ring.raw_state(id), "unrecognized slot tag");
                StubStats::bump(&shared.stats.unknown_tags);
            }
        }
    }
    sent
}
