//! Raw bindings to the block-I/O proxy.
//!
//! Mirrors the proxy's ioctl header: the shared contract between the
//! kernel proxy and this process. Changing anything here breaks
//! interoperability with an existing proxy.

use std::sync::atomic::AtomicU32;

use blkio_core::constants::BLKIO_MAX_VECS;
use blkio_core::entry::BlkioReq;

// ── Device ──

pub const BLKIO_PROXY_DEVNAME: &str = "/dev/bdbm_blockio_proxy";

/// Slots in the shared request ring.
pub const BLKIO_PROXY_MAX_REQS: usize = 128;

// ── ioctl ──

const BLKIO_PROXY_IOC_MAGIC: u8 = b'B';
const BLKIO_PROXY_IOC_DONE_NR: u8 = 1;

// _IOW('B', 1, uint32_t): the slot id of a finished request.
nix::ioctl_write_ptr!(
    blkio_proxy_ioc_done,
    BLKIO_PROXY_IOC_MAGIC,
    BLKIO_PROXY_IOC_DONE_NR,
    u32
);

// ── Ring slot ──

/// One slot of the shared request ring.
///
/// `stt` is the handoff tag; the payload behind it is only read after an
/// acquire load of the tag and only published by a release store.
/// `bi_bvec_ptr` is where the proxy stages fragment addresses before the
/// stub installs them into `blkio_req`.
#[repr(C)]
pub struct ProxyReq {
    pub id: u32,
    pub stt: AtomicU32,
    pub blkio_req: BlkioReq,
    pub bi_bvec_ptr: [u64; BLKIO_MAX_VECS],
}

pub const PROXY_REQ_SIZE: usize = std::mem::size_of::<ProxyReq>();

/// Bytes needed to map `capacity` slots.
pub fn ring_bytes(capacity: usize) -> usize {
    capacity * PROXY_REQ_SIZE
}
