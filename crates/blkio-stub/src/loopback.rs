//! `LoopbackProxy` — an in-process stand-in for the kernel proxy.
//!
//! The ring lives in a memfd. The proxy keeps its own mapping of it and
//! the stub maps the same pages again through `ProxyDevice::map_ring`,
//! so both sides really do meet in shared memory and only the tag
//! protocol keeps them apart. Readiness is an eventfd (coalescing: many
//! kicks before a wait produce one wake-up), done signals are collected
//! in order.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use blkio_core::constants::{BLKIO_MAX_VECS, KPAGE_SIZE};
use blkio_core::entry::{BioVec, BlkioOp, SlotId, SlotState};
use blkio_core::error::{BlkioError, Result};

use crate::proxy_device::{poll_readable, ProxyDevice};
use crate::proxy_ring::ProxyRing;
use crate::proxy_sys::ring_bytes;

/// Create an anonymous shared file of `len` bytes.
pub(crate) fn memfd(name: &str, len: usize) -> io::Result<OwnedFd> {
    let cname = CString::new(name)?;
    let raw = unsafe { libc::memfd_create(cname.as_ptr(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn eventfd() -> io::Result<OwnedFd> {
    let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// One request as the submitting side describes it.
#[derive(Debug, Clone, Copy)]
pub struct LoopbackRequest<'a> {
    pub op: BlkioOp,
    /// First sector.
    pub offset: u64,
    /// Length in sectors.
    pub size: u64,
    /// Kernel page addresses, one per fragment.
    pub pages: &'a [u64],
}

pub struct LoopbackProxy {
    ring: ProxyRing,
    memfd: OwnedFd,
    eventfd: OwnedFd,
    /// Serializes proxy-side slot allocation.
    submit_lock: Mutex<()>,
    done: Mutex<Vec<SlotId>>,
    done_cv: Condvar,
}

impl LoopbackProxy {
    /// Create a formatted ring of `capacity` slots.
    pub fn new(capacity: usize) -> Result<Self> {
        let len = ring_bytes(capacity);
        let memfd = memfd("blkio-loopback", len)
            .map_err(|source| BlkioError::Mapping { len, source })?;
        let ring = ProxyRing::map(memfd.as_fd(), capacity)?;
        ring.format();
        let eventfd = eventfd().map_err(|source| BlkioError::Handle {
            path: "eventfd".to_string(),
            source,
        })?;

        Ok(Self {
            ring,
            memfd,
            eventfd,
            submit_lock: Mutex::new(()),
            done: Mutex::new(Vec::new()),
            done_cv: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Queue a request in the first free slot and wake the stub.
    pub fn submit(&self, req: LoopbackRequest<'_>) -> Option<SlotId> {
        let _guard = lock(&self.submit_lock);
        let id = (0..self.ring.capacity() as u32)
            .map(SlotId)
            .find(|id| self.ring.state(*id) == Some(SlotState::Free))?;
        self.fill(id, req);
        Some(id)
    }

    /// Queue a request in a specific slot. Fails if that slot is not free.
    pub fn submit_at(&self, id: SlotId, req: LoopbackRequest<'_>) -> bool {
        let _guard = lock(&self.submit_lock);
        if self.ring.state(id) != Some(SlotState::Free) {
            return false;
        }
        self.fill(id, req);
        true
    }

    fn fill(&self, id: SlotId, req: LoopbackRequest<'_>) {
        let n = req.pages.len().min(BLKIO_MAX_VECS);
        self.ring.set_state(id, SlotState::Filling);
        let slot = self.ring.slot_raw(id);
        unsafe {
            let br = ptr::addr_of_mut!((*slot).blkio_req);
            (*br).bi_rw = req.op as u32;
            (*br).ret = 0;
            (*br).bi_offset = req.offset;
            (*br).bi_size = req.size;
            (*br).bi_bvec_cnt = n as u32;
            for (j, addr) in req.pages.iter().take(n).enumerate() {
                // Addresses travel through the staging array; the
                // descriptor only gets lengths from this side.
                (*br).bi_bvec[j] = BioVec {
                    addr: 0,
                    len: KPAGE_SIZE as u32,
                    _pad: 0,
                };
                (*slot).bi_bvec_ptr[j] = *addr;
            }
        }
        self.ring.set_state(id, SlotState::Submitted);
        self.kick();
    }

    /// Make the handle readable without queueing anything.
    pub fn kick(&self) {
        let val: u64 = 1;
        // EAGAIN means the counter is saturated: a wake-up is pending anyway.
        unsafe {
            libc::write(
                self.eventfd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    fn drain(&self) {
        let mut val: u64 = 0;
        unsafe {
            libc::read(
                self.eventfd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    pub fn state(&self, id: SlotId) -> Option<SlotState> {
        self.ring.state(id)
    }

    /// Status the stub reported for a finished slot.
    pub fn result(&self, id: SlotId) -> Option<i32> {
        if self.ring.state(id) != Some(SlotState::Done) {
            return None;
        }
        Some(unsafe { self.ring.descriptor(id) }.ret)
    }

    /// Hand a finished slot back to the free list: `USER_DONE → FREE`.
    pub fn reclaim(&self, id: SlotId) -> bool {
        let _guard = lock(&self.submit_lock);
        if self.ring.state(id) != Some(SlotState::Done) {
            return false;
        }
        self.ring.set_state(id, SlotState::Free);
        true
    }

    /// Done signals received so far, in arrival order.
    pub fn done_signals(&self) -> Vec<SlotId> {
        lock(&self.done).clone()
    }

    /// Wait until at least `n` done signals have arrived.
    pub fn wait_done_count(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = lock(&self.done);
        while done.len() < n {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            done = match self.done_cv.wait_timeout(done, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Wait until a done signal for `id` has arrived.
    pub fn wait_done(&self, id: SlotId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = lock(&self.done);
        while !done.contains(&id) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            done = match self.done_cv.wait_timeout(done, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AsFd for LoopbackProxy {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.memfd.as_fd()
    }
}

impl ProxyDevice for LoopbackProxy {
    fn wait_ready(&self, timeout: Duration) -> Result<bool> {
        let ready = poll_readable(self.eventfd.as_fd(), timeout)?;
        if ready {
            self.drain();
        }
        Ok(ready)
    }

    fn send_done(&self, id: SlotId) -> Result<()> {
        lock(&self.done).push(id);
        self.done_cv.notify_all();
        Ok(())
    }
}
