//! `ProxyRing` — the shared request ring.
//!
//! A fixed array of `ProxyReq` slots mmap'd `MAP_SHARED` from the proxy
//! handle. Unlike a head/tail ring there are no cursors: every slot has
//! its own tag and the two sides hand slots back and forth through it.
//!
//! ```text
//!   proxy                         stub
//!   ─────                         ────
//!   FREE ─fill─► KERN_SENT ──begin──► USER_PROG
//!                                        │ engine
//!   FREE ◄─reclaim── USER_DONE ◄─finish──┘
//! ```
//!
//! # Atomics
//!
//! The tag is accessed as an `AtomicU32` inside the mapping. `begin`
//! is a CAS with acquire ordering, so the proxy's payload writes are
//! visible before the stub reads them; `finish` stores the status and
//! then releases the tag, so the proxy sees the status once it observes
//! `USER_DONE`. Only `KERN_SENT → USER_PROG` and `USER_PROG → USER_DONE`
//! are performed from this side.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

use blkio_core::constants::BLKIO_MAX_VECS;
use blkio_core::entry::{tags, BlkioReq, SlotId, SlotState};
use blkio_core::error::{BlkioError, Result};

use crate::proxy_sys::{ring_bytes, ProxyReq};

pub struct ProxyRing {
    base: NonNull<ProxyReq>,
    capacity: usize,
    /// Total mapping size in bytes (for munmap on drop).
    mmap_len: usize,
}

// Safety: the mapping is shared memory; slot payloads are owned by
// exactly one side at a time and the tag is only touched atomically.
unsafe impl Send for ProxyRing {}
unsafe impl Sync for ProxyRing {}

impl ProxyRing {
    /// Map `capacity` slots read/write, shared, from `fd`.
    pub fn map(fd: BorrowedFd<'_>, capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(BlkioError::Config(format!(
                "ring capacity {} out of range",
                capacity
            )));
        }
        let mmap_len = ring_bytes(capacity);
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(BlkioError::Mapping {
                len: mmap_len,
                source: io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(addr as *mut ProxyReq).ok_or_else(|| BlkioError::Mapping {
            len: mmap_len,
            source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
        })?;

        Ok(Self {
            base,
            capacity,
            mmap_len,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub(crate) fn slot_raw(&self, id: SlotId) -> *mut ProxyReq {
        assert!(id.index() < self.capacity, "slot {} out of ring", id);
        unsafe { self.base.as_ptr().add(id.index()) }
    }

    #[inline(always)]
    fn tag(&self, id: SlotId) -> &AtomicU32 {
        unsafe { &(*self.slot_raw(id)).stt }
    }

    /// Identifier stored in slot `index`.
    pub fn id_at(&self, index: usize) -> u32 {
        let slot = self.slot_raw(SlotId(index as u32));
        unsafe { ptr::read_volatile(ptr::addr_of!((*slot).id)) }
    }

    /// Proxy-side initialization: stamp every slot with its index and
    /// mark it free.
    pub fn format(&self) {
        for i in 0..self.capacity {
            let slot = self.slot_raw(SlotId(i as u32));
            unsafe {
                ptr::write_volatile(ptr::addr_of_mut!((*slot).id), i as u32);
                ptr::write_volatile(ptr::addr_of_mut!((*slot).blkio_req), BlkioReq::zeroed());
            }
            self.tag(SlotId(i as u32)).store(tags::FREE, Ordering::Release);
        }
    }

    /// Check that every slot carries its own index as identifier.
    pub fn verify_ids(&self) -> Result<()> {
        for i in 0..self.capacity {
            let found = self.id_at(i);
            if found != i as u32 {
                return Err(BlkioError::RingLayout {
                    index: i as u32,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Raw tag of a slot (acquire).
    #[inline]
    pub fn raw_state(&self, id: SlotId) -> u32 {
        self.tag(id).load(Ordering::Acquire)
    }

    /// Decoded tag of a slot; `None` for an unrecognized value.
    #[inline]
    pub fn state(&self, id: SlotId) -> Option<SlotState> {
        SlotState::from_raw(self.raw_state(id))
    }

    /// Publish a tag (release). Used by the proxy side.
    pub fn set_state(&self, id: SlotId, state: SlotState) {
        self.tag(id).store(state.raw(), Ordering::Release);
    }

    /// Claim a submitted slot: `KERN_SENT → USER_PROG`.
    ///
    /// Returns false if the slot was not submitted; a slot is never
    /// claimed twice for one submission.
    #[inline]
    pub fn begin(&self, id: SlotId) -> bool {
        self.tag(id)
            .compare_exchange(
                tags::KERN_SENT,
                tags::USER_PROG,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Retire a claimed slot: write `ret`, then `USER_PROG → USER_DONE`.
    ///
    /// On a slot that is not in progress nothing is written and the
    /// observed raw tag is returned.
    pub fn finish(&self, id: SlotId, ret: i32) -> std::result::Result<(), u32> {
        let observed = self.raw_state(id);
        if observed != tags::USER_PROG {
            return Err(observed);
        }
        let slot = self.slot_raw(id);
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*slot).blkio_req.ret), ret);
        }
        self.tag(id).store(tags::USER_DONE, Ordering::Release);
        Ok(())
    }

    /// Install the staged fragment addresses into the slot's descriptor.
    ///
    /// # Safety
    /// The caller must own the slot (tag `USER_PROG`, claimed by `begin`).
    pub unsafe fn stage_fragments(&self, id: SlotId) {
        let slot = self.slot_raw(id);
        let req = &mut (*slot).blkio_req;
        let n = (req.bi_bvec_cnt as usize).min(BLKIO_MAX_VECS);
        for j in 0..n {
            req.bi_bvec[j].addr = (*slot).bi_bvec_ptr[j];
        }
    }

    /// The descriptor embedded in a slot.
    ///
    /// # Safety
    /// The caller must own the slot for as long as the reference lives.
    pub unsafe fn descriptor(&self, id: SlotId) -> &BlkioReq {
        &(*self.slot_raw(id)).blkio_req
    }
}

impl Drop for ProxyRing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.mmap_len);
        }
    }
}
