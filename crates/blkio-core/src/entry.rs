//! Block-I/O descriptor and slot types.
//!
//! These mirror the layout the kernel proxy writes into the shared
//! request ring. They are plain `repr(C)` data; the synchronization
//! lives on the slot tag, not here.

use std::fmt;

use crate::constants::BLKIO_MAX_VECS;

/// Position of a slot in the shared request ring.
///
/// The proxy stamps each slot with its index when it formats the ring,
/// and the same value identifies the slot in the done signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SlotId(pub u32);

impl SlotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot state tags, as stored in the shared slot header.
pub mod tags {
    /// Owned by the proxy, nothing queued.
    pub const FREE: u32 = 0x01;
    /// The proxy is filling the payload.
    pub const KERN_INIT: u32 = 0x02;
    /// Payload complete, waiting for the stub.
    pub const KERN_SENT: u32 = 0x04;
    /// Claimed by the stub, owned by this side.
    pub const USER_PROG: u32 = 0x08;
    /// Finished by the stub, ownership back with the proxy.
    pub const USER_DONE: u32 = 0x10;
}

/// Decoded slot tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Filling,
    Submitted,
    InProgress,
    Done,
}

impl SlotState {
    /// Decode a raw tag. Unknown values return `None`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            tags::FREE => Some(Self::Free),
            tags::KERN_INIT => Some(Self::Filling),
            tags::KERN_SENT => Some(Self::Submitted),
            tags::USER_PROG => Some(Self::InProgress),
            tags::USER_DONE => Some(Self::Done),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Free => tags::FREE,
            Self::Filling => tags::KERN_INIT,
            Self::Submitted => tags::KERN_SENT,
            Self::InProgress => tags::USER_PROG,
            Self::Done => tags::USER_DONE,
        }
    }
}

/// Block-I/O request type (`bi_rw`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlkioOp {
    Read = 0,
    Write = 1,
    Trim = 2,
}

impl BlkioOp {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::Trim),
            _ => None,
        }
    }
}

/// One buffer fragment: a kernel page address and its length in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct BioVec {
    pub addr: u64,
    pub len: u32,
    pub _pad: u32,
}

/// The block-I/O descriptor embedded in every ring slot.
///
/// `bi_offset` and `bi_size` count 512-byte sectors. Only the first
/// `bi_bvec_cnt` entries of `bi_bvec` are meaningful.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BlkioReq {
    pub bi_rw: u32,
    /// Completion status, written by the stub before the slot is tagged done.
    pub ret: i32,
    pub bi_offset: u64,
    pub bi_size: u64,
    pub bi_bvec_cnt: u32,
    pub _pad: u32,
    pub bi_bvec: [BioVec; BLKIO_MAX_VECS],
}

impl BlkioReq {
    pub fn zeroed() -> Self {
        Self {
            bi_rw: 0,
            ret: 0,
            bi_offset: 0,
            bi_size: 0,
            bi_bvec_cnt: 0,
            _pad: 0,
            bi_bvec: [BioVec::default(); BLKIO_MAX_VECS],
        }
    }

    /// Decoded request type, if known.
    pub fn op(&self) -> Option<BlkioOp> {
        BlkioOp::from_raw(self.bi_rw)
    }

    /// The populated fragments, clamped to the descriptor capacity.
    pub fn fragments(&self) -> &[BioVec] {
        let n = (self.bi_bvec_cnt as usize).min(BLKIO_MAX_VECS);
        &self.bi_bvec[..n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_state_roundtrips_known_tags() {
        for state in [
            SlotState::Free,
            SlotState::Filling,
            SlotState::Submitted,
            SlotState::InProgress,
            SlotState::Done,
        ] {
            assert_eq!(SlotState::from_raw(state.raw()), Some(state));
        }
    }

    #[test]
    fn test_unknown_tag_is_none() {
        assert_eq!(SlotState::from_raw(0), None);
        assert_eq!(SlotState::from_raw(0x20), None);
    }

    #[test]
    fn test_fragments_clamped() {
        let mut req = BlkioReq::zeroed();
        req.bi_bvec_cnt = 2;
        assert_eq!(req.fragments().len(), 2);
        req.bi_bvec_cnt = u32::MAX;
        assert_eq!(req.fragments().len(), BLKIO_MAX_VECS);
    }

    #[test]
    fn test_descriptor_layout_is_stable() {
        assert_eq!(std::mem::size_of::<BioVec>(), 16);
        assert_eq!(
            std::mem::size_of::<BlkioReq>(),
            32 + 16 * BLKIO_MAX_VECS
        );
    }
}
