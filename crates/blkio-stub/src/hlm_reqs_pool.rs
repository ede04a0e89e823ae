//! `HlmReqsPool` — bounded pool of host-level requests.
//!
//! Every item is allocated up front (one per ring slot) and lives on a
//! lock-free free list. Items move out of the pool as `Box<HlmReq>` and
//! must be moved back in; the box is the ownership token, so a released
//! item cannot be touched again by the releaser. Each item also carries
//! its pool index and the pool tracks which indices are out, which
//! catches an item from another pool or a second release of the same
//! index.
//!
//! `build_req` lays a block-I/O descriptor out as logical pages:
//!
//! ```text
//! sectors   |--------- bi_offset .. bi_offset + bi_size ---------|
//! kpages        [frag 0][frag 1][frag 2]
//! lpas      |   lpa 6 (kp0, kp1)   |   lpa 7 (kp0, kp1)   |
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;

use blkio_core::constants::{BLKIO_MAX_VECS, KPAGE_SECTORS, KPAGE_SIZE, SECTOR_SIZE};
use blkio_core::entry::{BlkioOp, BlkioReq, SlotId};
use blkio_core::error::{BlkioError, BuildError, Result};
use blkio_core::hlm::{HlmOp, HlmReq};

pub struct HlmReqsPool {
    free: ArrayQueue<Box<HlmReq>>,
    /// One flag per item, set while the item is out of the pool.
    in_use: Box<[AtomicBool]>,
    mapping_unit: usize,
    io_unit: usize,
    kpages_per_page: usize,
}

impl HlmReqsPool {
    /// Create a pool of `capacity` items for the given unit sizes (bytes).
    ///
    /// `mapping_unit` must be a multiple of the kernel page and `io_unit`
    /// a multiple of `mapping_unit`.
    pub fn create(capacity: usize, mapping_unit: usize, io_unit: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BlkioError::Config("pool capacity must be at least 1".into()));
        }
        if mapping_unit == 0 || mapping_unit % KPAGE_SIZE != 0 {
            return Err(BlkioError::Config(format!(
                "mapping unit {} is not a multiple of the kernel page",
                mapping_unit
            )));
        }
        if io_unit == 0 || io_unit % mapping_unit != 0 {
            return Err(BlkioError::Config(format!(
                "io unit {} is not a multiple of the mapping unit {}",
                io_unit, mapping_unit
            )));
        }

        let kpages_per_page = mapping_unit / KPAGE_SIZE;
        // A request of BLKIO_MAX_VECS kernel pages starting mid-unit
        // touches one more unit than it fills.
        let max_pages = BLKIO_MAX_VECS.div_ceil(kpages_per_page) + 1;

        let free = ArrayQueue::new(capacity);
        for index in 0..capacity {
            let item = Box::new(HlmReq::with_capacity(index as u32, max_pages, kpages_per_page));
            if free.push(item).is_err() {
                unreachable!("free list sized to capacity");
            }
        }
        let in_use = (0..capacity).map(|_| AtomicBool::new(false)).collect();

        Ok(Self {
            free,
            in_use,
            mapping_unit,
            io_unit,
            kpages_per_page,
        })
    }

    /// Take a free item, or `None` if every item is out.
    pub fn alloc_item(&self) -> Option<Box<HlmReq>> {
        let item = self.free.pop()?;
        let was_out = self.in_use[item.index() as usize].swap(true, Ordering::AcqRel);
        assert!(!was_out, "hlm_req {} was on the free list while in use", item.index());
        Some(item)
    }

    /// Return an item to the pool.
    ///
    /// Panics if the item does not belong to this pool or is not out.
    pub fn free_item(&self, item: Box<HlmReq>) {
        let index = item.index() as usize;
        let flag = self
            .in_use
            .get(index)
            .unwrap_or_else(|| panic!("hlm_req {} does not belong to this pool", index));
        let was_out = flag.swap(false, Ordering::AcqRel);
        assert!(was_out, "hlm_req {} released twice", index);
        if self.free.push(item).is_err() {
            panic!("hlm_req free list overflow at item {}", index);
        }
    }

    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    /// Items currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Items currently out of the pool.
    pub fn in_use_count(&self) -> usize {
        self.capacity() - self.free.len()
    }

    pub fn mapping_unit(&self) -> usize {
        self.mapping_unit
    }

    pub fn io_unit(&self) -> usize {
        self.io_unit
    }

    /// Fill `hr` from the descriptor `br` found in slot `origin`.
    pub fn build_req(
        &self,
        hr: &mut HlmReq,
        br: &BlkioReq,
        origin: SlotId,
    ) -> std::result::Result<(), BuildError> {
        let op = br.op().ok_or(BuildError::UnknownOp(br.bi_rw))?;
        if br.bi_bvec_cnt as usize > BLKIO_MAX_VECS {
            return Err(BuildError::TooManyFragments(br.bi_bvec_cnt));
        }
        if br.bi_size == 0 {
            return Err(BuildError::Empty);
        }

        // Both values come straight from shared memory.
        let last_sector = br
            .bi_offset
            .checked_add(br.bi_size - 1)
            .ok_or(BuildError::Overflow {
                offset: br.bi_offset,
                size: br.bi_size,
            })?;
        let unit_sectors = (self.mapping_unit / SECTOR_SIZE) as u64;
        let first_lpa = br.bi_offset / unit_sectors;
        let last_lpa = last_sector / unit_sectors;

        hr.reset(HlmOp::from(op), origin, br.bi_offset, br.bi_size);
        hr.units_per_io = (self.io_unit / self.mapping_unit) as u32;
        hr.lpa = first_lpa;
        hr.nr_lpas = last_lpa - first_lpa + 1;

        if op == BlkioOp::Trim {
            return Ok(());
        }

        let fragments = br.fragments();
        if br.bi_size != fragments.len() as u64 * KPAGE_SECTORS {
            return Err(BuildError::SizeMismatch {
                size: br.bi_size,
                fragments: br.bi_bvec_cnt,
            });
        }
        if hr.nr_lpas > hr.max_pages() as u64 {
            return Err(BuildError::TooLarge(hr.nr_lpas));
        }

        let kp = self.kpages_per_page as u64;
        let nr_lpas = hr.nr_lpas;
        let first_kpage = br.bi_offset / KPAGE_SECTORS;
        for (i, frag) in fragments.iter().enumerate() {
            if frag.len as usize != KPAGE_SIZE {
                return Err(BuildError::BadFragment {
                    index: i,
                    len: frag.len,
                });
            }
            let kpage = first_kpage + i as u64;
            let lpa = kpage / kp;
            let within = (kpage % kp) as usize;

            let need_new = hr.pages().last().map_or(true, |p| p.lpa != lpa);
            let page = if need_new {
                hr.push_page(lpa).ok_or(BuildError::TooLarge(nr_lpas))?
            } else {
                let n = hr.pages().len();
                &mut hr.pages_mut()[n - 1]
            };
            page.kpages[within] = Some(frag.addr);
        }

        // Sub-page offsets and partial logical pages both force the
        // engine to merge with what is already on flash.
        hr.needs_rmw = op == BlkioOp::Write
            && (br.bi_offset % KPAGE_SECTORS != 0 || hr.pages().iter().any(|p| !p.is_full()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blkio_core::entry::BioVec;

    fn blkio(op: BlkioOp, offset: u64, pages: &[u64]) -> BlkioReq {
        let mut br = BlkioReq::zeroed();
        br.bi_rw = op as u32;
        br.bi_offset = offset;
        br.bi_size = pages.len() as u64 * KPAGE_SECTORS;
        br.bi_bvec_cnt = pages.len() as u32;
        for (j, addr) in pages.iter().enumerate() {
            br.bi_bvec[j] = BioVec {
                addr: *addr,
                len: KPAGE_SIZE as u32,
                _pad: 0,
            };
        }
        br
    }

    #[test]
    fn test_create_validates_units() {
        assert!(HlmReqsPool::create(0, 4096, 4096).is_err());
        assert!(HlmReqsPool::create(4, 1000, 4096).is_err());
        assert!(HlmReqsPool::create(4, 8192, 4096).is_err());
        assert!(HlmReqsPool::create(4, 8192, 12288).is_err());

        let pool = HlmReqsPool::create(4, 4096, 16384).unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.free_count(), 4);
        assert_eq!(pool.mapping_unit(), 4096);
        assert_eq!(pool.io_unit(), 16384);
    }

    #[test]
    fn test_alloc_until_exhausted_then_reuse() {
        let pool = HlmReqsPool::create(2, 8192, 8192).unwrap();
        let a = pool.alloc_item().unwrap();
        let b = pool.alloc_item().unwrap();
        assert_ne!(a.index(), b.index());
        assert!(pool.alloc_item().is_none());
        assert_eq!(pool.in_use_count(), 2);

        let a_index = a.index();
        pool.free_item(a);
        assert_eq!(pool.in_use_count(), 1);
        let c = pool.alloc_item().unwrap();
        assert_eq!(c.index(), a_index);

        pool.free_item(b);
        pool.free_item(c);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_release_of_free_index_panics() {
        let pool = HlmReqsPool::create(2, 8192, 8192).unwrap();
        // An item claiming index 0 while index 0 sits on the free list.
        pool.free_item(Box::new(HlmReq::with_capacity(0, 1, 2)));
    }

    #[test]
    #[should_panic(expected = "does not belong")]
    fn test_release_of_foreign_index_panics() {
        let pool = HlmReqsPool::create(2, 8192, 8192).unwrap();
        pool.free_item(Box::new(HlmReq::with_capacity(9, 1, 2)));
    }

    #[test]
    fn test_build_single_page_read() {
        let pool = HlmReqsPool::create(1, 8192, 8192).unwrap();
        let mut hr = pool.alloc_item().unwrap();
        let br = blkio(BlkioOp::Read, 100, &[0xa000]);

        pool.build_req(&mut hr, &br, SlotId(2)).unwrap();
        assert_eq!(hr.op, HlmOp::Read);
        assert_eq!(hr.origin, SlotId(2));
        assert_eq!(hr.offset, 100);
        assert_eq!(hr.size, 8);
        assert_eq!(hr.lpa, 6);
        assert_eq!(hr.nr_lpas, 1);
        assert_eq!(hr.pages().len(), 1);
        assert!(!hr.needs_rmw);
        pool.free_item(hr);
    }

    #[test]
    fn test_build_write_spanning_units_marks_holes() {
        let pool = HlmReqsPool::create(1, 8192, 16384).unwrap();
        let mut hr = pool.alloc_item().unwrap();
        // Kernel pages 1..=3: the second half of lpa 0 and all of lpa 1.
        let br = blkio(BlkioOp::Write, 8, &[0x1000, 0x2000, 0x3000]);

        pool.build_req(&mut hr, &br, SlotId(0)).unwrap();
        assert_eq!(hr.units_per_io, 2);
        assert_eq!(hr.lpa, 0);
        assert_eq!(hr.nr_lpas, 2);
        let pages = hr.pages();
        assert_eq!(pages[0].lpa, 0);
        assert_eq!(pages[0].kpages, vec![None, Some(0x1000)]);
        assert_eq!(pages[1].lpa, 1);
        assert_eq!(pages[1].kpages, vec![Some(0x2000), Some(0x3000)]);
        assert!(hr.needs_rmw);
        pool.free_item(hr);
    }

    #[test]
    fn test_build_full_unit_write_needs_no_rmw() {
        let pool = HlmReqsPool::create(1, 8192, 8192).unwrap();
        let mut hr = pool.alloc_item().unwrap();
        let br = blkio(BlkioOp::Write, 16, &[0x1000, 0x2000]);

        pool.build_req(&mut hr, &br, SlotId(0)).unwrap();
        assert_eq!(hr.pages().len(), 1);
        assert!(hr.pages()[0].is_full());
        assert!(!hr.needs_rmw);
        pool.free_item(hr);
    }

    #[test]
    fn test_build_trim_carries_range_only() {
        let pool = HlmReqsPool::create(1, 4096, 4096).unwrap();
        let mut hr = pool.alloc_item().unwrap();
        let mut br = BlkioReq::zeroed();
        br.bi_rw = BlkioOp::Trim as u32;
        br.bi_offset = 0;
        br.bi_size = 8 * 1000;

        pool.build_req(&mut hr, &br, SlotId(0)).unwrap();
        assert_eq!(hr.op, HlmOp::Trim);
        assert_eq!(hr.nr_lpas, 1000);
        assert!(hr.pages().is_empty());
        pool.free_item(hr);
    }

    #[test]
    fn test_build_rejects_malformed_descriptors() {
        let pool = HlmReqsPool::create(1, 8192, 8192).unwrap();
        let mut hr = pool.alloc_item().unwrap();

        let mut br = blkio(BlkioOp::Read, 0, &[0x1000]);
        br.bi_rw = 9;
        assert_eq!(pool.build_req(&mut hr, &br, SlotId(0)), Err(BuildError::UnknownOp(9)));

        let mut br = blkio(BlkioOp::Read, 0, &[0x1000]);
        br.bi_bvec_cnt = BLKIO_MAX_VECS as u32 + 1;
        assert!(matches!(
            pool.build_req(&mut hr, &br, SlotId(0)),
            Err(BuildError::TooManyFragments(_))
        ));

        let mut br = blkio(BlkioOp::Read, 0, &[0x1000]);
        br.bi_size = 0;
        assert_eq!(pool.build_req(&mut hr, &br, SlotId(0)), Err(BuildError::Empty));

        let mut br = blkio(BlkioOp::Write, 0, &[0x1000, 0x2000]);
        br.bi_size = 8;
        assert!(matches!(
            pool.build_req(&mut hr, &br, SlotId(0)),
            Err(BuildError::SizeMismatch { size: 8, fragments: 2 })
        ));

        let mut br = blkio(BlkioOp::Write, 0, &[0x1000]);
        br.bi_bvec[0].len = 512;
        assert_eq!(
            pool.build_req(&mut hr, &br, SlotId(0)),
            Err(BuildError::BadFragment { index: 0, len: 512 })
        );
        pool.free_item(hr);
    }

    #[test]
    fn test_build_rejects_range_past_last_sector() {
        let pool = HlmReqsPool::create(1, 8192, 8192).unwrap();
        let mut hr = pool.alloc_item().unwrap();

        let mut br = BlkioReq::zeroed();
        br.bi_rw = BlkioOp::Trim as u32;
        br.bi_offset = u64::MAX - 2;
        br.bi_size = 8;
        assert_eq!(
            pool.build_req(&mut hr, &br, SlotId(0)),
            Err(BuildError::Overflow {
                offset: u64::MAX - 2,
                size: 8
            })
        );

        let mut br = blkio(BlkioOp::Write, u64::MAX - 4, &[0x1000]);
        assert!(matches!(
            pool.build_req(&mut hr, &br, SlotId(0)),
            Err(BuildError::Overflow { .. })
        ));

        // Ending exactly on the last addressable sector is fine.
        br.bi_rw = BlkioOp::Trim as u32;
        br.bi_offset = u64::MAX - 7;
        br.bi_size = 8;
        pool.build_req(&mut hr, &br, SlotId(0)).unwrap();
        assert_eq!(hr.lpa, (u64::MAX - 7) / 16);
        assert_eq!(hr.nr_lpas, 1);
        pool.free_item(hr);
    }

    #[test]
    fn test_concurrent_alloc_free_never_shares_items() {
        use std::collections::HashSet;
        use std::sync::{Arc, Mutex};
        use std::thread;

        let pool = Arc::new(HlmReqsPool::create(8, 8192, 8192).unwrap());
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let mut handles = vec![];

        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            let seen = Arc::clone(&seen);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    if let Some(item) = pool.alloc_item() {
                        assert!(seen.lock().unwrap().insert(item.index()));
                        assert!(seen.lock().unwrap().remove(&item.index()));
                        pool.free_item(item);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.free_count(), 8);
    }
}
