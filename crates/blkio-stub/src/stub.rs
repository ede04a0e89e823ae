//! `BlkioStub` — the host stub orchestrator.
//!
//! Owns the proxy handle, the ring mapping, the request pool and the
//! poller thread, and implements `HostInterface` for the engine.
//!
//! ```text
//!            ┌──────────── poller ─────────────┐
//!   proxy ──►│ wait_ready → scan → make_req    │──► engine
//!     ▲      └─────────────────────────────────┘      │
//!     │                                               │ end_req
//!     └──── send_done ◄── finish ◄── StubShared ◄─────┘
//! ```
//!
//! # Accounting
//!
//! Pool allocation and the in-flight increment happen together under
//! `host_lock`, as do pool release and the decrement. A request leaves
//! the stub's books only after its slot has been tagged done and the
//! proxy signalled.
//!
//! # Teardown
//!
//! The ring, pool, proxy handle and engine live in `StubResources`,
//! which `close` takes out of `StubShared` once nothing is in flight.
//! Engines may keep their `HostRef` past `close`; calls through it then
//! find no resources and are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use blkio_core::engine::{HlmEngine, Rejected};
use blkio_core::entry::{BlkioReq, SlotId};
use blkio_core::error::{BlkioError, Result};
use blkio_core::hlm::HlmReq;
use blkio_core::host::{HostInterface, HostRef};

use crate::config::StubConfig;
use crate::hlm_reqs_pool::HlmReqsPool;
use crate::inflight::InflightCounter;
use crate::poller::{poll_loop, POLLER_THREAD_NAME};
use crate::proxy_device::{CharDevProxy, ProxyDevice};
use crate::proxy_ring::ProxyRing;
use crate::stats::{StatsSnapshot, StubStats};

/// Everything `close` tears down, in drop order.
pub(crate) struct StubResources {
    pool: HlmReqsPool,
    pub(crate) ring: ProxyRing,
    pub(crate) device: Arc<dyn ProxyDevice>,
    engine: Arc<dyn HlmEngine>,
    /// Handed to the engine with every request. Points back at the
    /// owning `StubShared`; `close` breaks the loop by dropping this.
    host: HostRef,
}

/// State shared by the poller, the engine and the owning `BlkioStub`.
pub(crate) struct StubShared {
    resources: Mutex<Option<Arc<StubResources>>>,
    host_lock: Mutex<()>,
    inflight: InflightCounter,
    capacity: usize,
    pub(crate) stop: AtomicBool,
    pub(crate) stats: StubStats,
    pub(crate) poll_timeout: Duration,
}

impl StubShared {
    fn lock_host(&self) -> MutexGuard<'_, ()> {
        self.host_lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_resources(&self) -> MutexGuard<'_, Option<Arc<StubResources>>> {
        self.resources.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The live resources, or `None` once the stub is closed.
    pub(crate) fn resources(&self) -> Option<Arc<StubResources>> {
        self.lock_resources().clone()
    }

    /// Take a pool item and count it in flight.
    fn acquire(&self, res: &StubResources, origin: SlotId) -> Box<HlmReq> {
        let _guard = self.lock_host();
        match res.pool.alloc_item() {
            Some(hr) => {
                self.inflight.inc();
                hr
            }
            None => panic!(
                "{} at slot {} (capacity {})",
                BlkioError::PoolExhausted,
                origin,
                res.pool.capacity()
            ),
        }
    }

    /// Return a pool item and drop it from the in-flight count.
    ///
    /// `res` is dropped before the decrement, so once the count reaches
    /// zero no completion still holds the resources.
    fn release(&self, res: Arc<StubResources>, hr: Box<HlmReq>) {
        let _guard = self.lock_host();
        res.pool.free_item(hr);
        drop(res);
        self.inflight.dec();
    }

    /// Tag the slot done with `ret`, then signal the proxy.
    fn finish(&self, res: &StubResources, origin: SlotId, ret: i32) {
        match res.ring.finish(origin, ret) {
            Ok(()) => {
                if let Err(e) = res.device.send_done(origin) {
                    error!(slot = %origin, error = %e, "done signal failed");
                }
            }
            Err(tag) => {
                error!(slot = %origin, tag, "completion for a slot not in progress");
            }
        }
    }

    /// Build a request from the claimed slot `origin` and hand it to the
    /// engine, rolling back if the engine refuses it.
    pub(crate) fn submit(&self, res: &Arc<StubResources>, br: &BlkioReq, origin: SlotId) {
        let mut hr = self.acquire(res, origin);
        if let Err(e) = res.pool.build_req(&mut hr, br, origin) {
            // Retire the slot so the proxy is not left waiting, then stop.
            self.finish(res, origin, -libc::EINVAL);
            self.release(Arc::clone(res), hr);
            panic!("slot {}: {}", origin, BlkioError::from(e));
        }

        debug!(
            slot = %origin,
            op = ?hr.op,
            offset = hr.offset,
            size = hr.size,
            lpa = hr.lpa,
            nr_lpas = hr.nr_lpas,
            "dispatching request"
        );

        if let Err(Rejected { req, status }) = res.engine.make_req(&res.host, hr) {
            let status = if status == 0 { -libc::EIO } else { status };
            error!(slot = %origin, status, "engine rejected request");
            StubStats::bump(&self.stats.rejected);
            self.finish(res, origin, status);
            self.release(Arc::clone(res), req);
        }
    }
}

impl HostInterface for StubShared {
    fn make_req(&self, br: &BlkioReq, origin: SlotId) {
        match self.resources() {
            Some(res) => self.submit(&res, br, origin),
            None => error!(slot = %origin, "request after close dropped"),
        }
    }

    fn end_req(&self, req: Box<HlmReq>) {
        let origin = req.origin;
        let Some(res) = self.resources() else {
            error!(slot = %origin, "completion after close dropped");
            return;
        };
        debug!(slot = %origin, ret = req.ret, "request completed");
        self.finish(&res, origin, req.ret);
        StubStats::bump(&self.stats.completed);
        self.release(res, req);
    }
}

/// A running host stub.
///
/// Dropping the stub closes it.
pub struct BlkioStub {
    shared: Arc<StubShared>,
    poller: Option<JoinHandle<()>>,
    closed: bool,
}

impl BlkioStub {
    /// Open the proxy control device named by `config` and start polling.
    pub fn open(config: &StubConfig, engine: Arc<dyn HlmEngine>) -> Result<Self> {
        config.validate()?;
        let device = CharDevProxy::open(&config.devname)?;
        info!(devname = %config.devname, "proxy device connected");
        Self::open_with(Arc::new(device), config, engine)
    }

    /// Start a stub on an already opened proxy handle.
    ///
    /// Every resource acquired before a failing step is released on
    /// return.
    pub fn open_with(
        device: Arc<dyn ProxyDevice>,
        config: &StubConfig,
        engine: Arc<dyn HlmEngine>,
    ) -> Result<Self> {
        config.validate()?;

        let ring = device.map_ring(config.max_reqs)?;
        ring.verify_ids()?;

        let mapping_unit = config.device.mapping_unit();
        let io_unit = config.device.io_unit();
        let pool = HlmReqsPool::create(config.max_reqs, mapping_unit, io_unit)?;

        let shared = Arc::new(StubShared {
            resources: Mutex::new(None),
            host_lock: Mutex::new(()),
            inflight: InflightCounter::new(),
            capacity: config.max_reqs,
            stop: AtomicBool::new(false),
            stats: StubStats::default(),
            poll_timeout: config.poll_timeout,
        });
        *shared.lock_resources() = Some(Arc::new(StubResources {
            pool,
            ring,
            device,
            engine,
            host: shared.clone(),
        }));

        let spawned = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(POLLER_THREAD_NAME.to_string())
                .spawn(move || poll_loop(&shared))
        };
        let poller = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                shared.lock_resources().take();
                return Err(BlkioError::Spawn(e));
            }
        };

        info!(
            capacity = config.max_reqs,
            mapping_unit,
            io_unit,
            poll_timeout_ms = config.poll_timeout.as_millis() as u64,
            "blkio stub opened"
        );

        Ok(Self {
            shared,
            poller: Some(poller),
            closed: false,
        })
    }

    /// Stop polling, wait for every in-flight request to complete, then
    /// release the pool, the ring mapping and the proxy handle.
    ///
    /// Idempotent. Requests already handed to the engine are not
    /// cancelled; this blocks until the engine has returned them all.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.poller.take() {
            if handle.join().is_err() {
                error!("poller thread panicked");
            }
        }

        self.shared.inflight.wait_zero(self.shared.poll_timeout);

        let taken = self.shared.lock_resources().take();
        if let Some(res) = taken {
            match Arc::try_unwrap(res) {
                Ok(res) => drop(res),
                Err(res) => warn!(
                    refs = Arc::strong_count(&res) - 1,
                    "stub resources still referenced at close, last user releases them"
                ),
            }
        }
        info!(stats = ?self.shared.stats.snapshot(), "blkio stub closed");
    }

    /// Host interface handle for engines wired up after `open`.
    pub fn host(&self) -> HostRef {
        self.shared.clone()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Requests allocated and not yet released.
    pub fn inflight(&self) -> usize {
        self.shared.inflight.get()
    }

    /// Pool items in use; 0 once closed.
    pub fn pool_in_use(&self) -> usize {
        self.shared.resources().map_or(0, |r| r.pool.in_use_count())
    }

    /// Pool items free; 0 once closed.
    pub fn pool_free(&self) -> usize {
        self.shared.resources().map_or(0, |r| r.pool.free_count())
    }

    /// In-flight count and pool items in use, read together under the
    /// host guard.
    pub fn accounting(&self) -> (usize, usize) {
        let _guard = self.shared.lock_host();
        let in_use = self
            .shared
            .lock_resources()
            .as_ref()
            .map_or(0, |r| r.pool.in_use_count());
        (self.shared.inflight.get(), in_use)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for BlkioStub {
    fn drop(&mut self) {
        self.close();
    }
}
