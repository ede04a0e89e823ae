//! Host-level-mapping requests.
//!
//! An `HlmReq` is what the translation engine actually services. The
//! stub draws one from its pool for every submitted slot, lays the
//! block-I/O descriptor out as logical pages, and hands it over. The
//! page storage is allocated once with the pool item and reused.

use crate::entry::{BlkioOp, SlotId};

/// Operation carried by a host-level request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlmOp {
    Read,
    Write,
    Trim,
}

impl From<BlkioOp> for HlmOp {
    fn from(op: BlkioOp) -> Self {
        match op {
            BlkioOp::Read => Self::Read,
            BlkioOp::Write => Self::Write,
            BlkioOp::Trim => Self::Trim,
        }
    }
}

/// One logical page (mapping unit) touched by a request.
///
/// `kpages[i]` is the address of the kernel page backing the i-th
/// 4 KiB piece of the mapping unit, or `None` when the request does not
/// cover it (a hole).
#[derive(Debug, Clone)]
pub struct HlmPage {
    pub lpa: u64,
    pub kpages: Vec<Option<u64>>,
}

impl HlmPage {
    /// True when every kernel page of the mapping unit is supplied.
    pub fn is_full(&self) -> bool {
        self.kpages.iter().all(Option::is_some)
    }
}

/// A pooled host-level request.
#[derive(Debug)]
pub struct HlmReq {
    index: u32,
    pub op: HlmOp,
    /// Ring slot whose descriptor this request was built from.
    pub origin: SlotId,
    /// First sector and sector count of the originating descriptor.
    pub offset: u64,
    pub size: u64,
    /// First logical page and number of logical pages covered. Trim
    /// requests carry only this range and no pages.
    pub lpa: u64,
    pub nr_lpas: u64,
    /// Logical pages that share one device io unit.
    pub units_per_io: u32,
    /// A write that leaves holes in a logical page needs read-modify-write.
    pub needs_rmw: bool,
    /// Completion status reported back to the proxy; 0 is success.
    pub ret: i32,
    pages: Vec<HlmPage>,
    nr_pages: usize,
}

impl HlmReq {
    /// Allocate an item able to describe `max_pages` logical pages of
    /// `kpages_per_page` kernel pages each.
    pub fn with_capacity(index: u32, max_pages: usize, kpages_per_page: usize) -> Self {
        let pages = (0..max_pages)
            .map(|_| HlmPage {
                lpa: 0,
                kpages: vec![None; kpages_per_page],
            })
            .collect();
        Self {
            index,
            op: HlmOp::Read,
            origin: SlotId(0),
            offset: 0,
            size: 0,
            lpa: 0,
            nr_lpas: 0,
            units_per_io: 1,
            needs_rmw: false,
            ret: 0,
            pages,
            nr_pages: 0,
        }
    }

    /// Pool index of this item.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Clear the item for a new request. Page storage is kept.
    pub fn reset(&mut self, op: HlmOp, origin: SlotId, offset: u64, size: u64) {
        self.op = op;
        self.origin = origin;
        self.offset = offset;
        self.size = size;
        self.lpa = 0;
        self.nr_lpas = 0;
        self.needs_rmw = false;
        self.ret = 0;
        self.nr_pages = 0;
    }

    /// Append a logical page with every kernel page marked as a hole.
    /// Returns `None` when the item's page storage is exhausted.
    pub fn push_page(&mut self, lpa: u64) -> Option<&mut HlmPage> {
        let page = self.pages.get_mut(self.nr_pages)?;
        page.lpa = lpa;
        page.kpages.fill(None);
        self.nr_pages += 1;
        Some(page)
    }

    /// Maximum logical pages this item can describe.
    pub fn max_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[HlmPage] {
        &self.pages[..self.nr_pages]
    }

    pub fn pages_mut(&mut self) -> &mut [HlmPage] {
        &mut self.pages[..self.nr_pages]
    }
}
