//! Process Memory Lifecycle
//!
//! Hooks the process manager calls when a process is created or destroyed:
//! building the page directory, attaching a virtual heap backed by an
//! exclusive store, and tearing all of it down again.

use alloc::vec::Vec;

use crate::error::{PagingError, Result};
use crate::kern::sched::Scheduler;
use crate::kern::spl;
use crate::kwarn;
use crate::paging::bs_map::StoreSlot;
use crate::paging::pager::Pager;
use crate::paging::pmap::{PdEntry, Tlb};
use crate::paging::vm_heap::BLOCK_HEADER;
use crate::paging::vm_page::FrameClaim;
use crate::paging::vm_param::{
    VirtAddr, ENTRIES_PER_TABLE, GLOBAL_PAGE_TABLES, HEAP_BASE_VPN, PAGE_SHIFT, PAGE_SIZE,
    STORE_PAGES,
};
use crate::types::{FrameIndex, Pid, StoreId};

/// A process's virtual heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRegion {
    /// Exclusive store behind the heap
    pub store: StoreId,
    pub start_vpn: u32,
    pub npages: usize,
    /// Whether the free list has been written into page 0
    pub bootstrapped: bool,
}

impl HeapRegion {
    /// Virtual address of the free-list head
    pub fn base(&self) -> u32 {
        self.start_vpn << PAGE_SHIFT
    }

    /// Bytes spanned
    pub fn bytes(&self) -> u32 {
        (self.npages * PAGE_SIZE) as u32
    }

    /// First address past the heap
    pub fn end(&self) -> u32 {
        self.base() + self.bytes()
    }

    /// Upper bound on free blocks the list can hold
    pub(crate) fn max_blocks(&self) -> usize {
        (self.bytes() / BLOCK_HEADER) as usize
    }
}

/// Per-process memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcMemory {
    /// Frame holding the page directory
    pub directory: Option<FrameIndex>,
    pub heap: Option<HeapRegion>,
}

impl<S: Scheduler, T: Tlb> Pager<S, T> {
    fn check_live(&self, pid: Pid) -> Result<()> {
        if !pid.in_range() || !self.sched.is_live(pid) {
            return Err(PagingError::BadPid(pid));
        }
        Ok(())
    }

    /// Give `pid` a page directory sharing the global low-region tables
    pub fn create_address_space(&mut self, pid: Pid) -> Result<()> {
        let _spl = spl::disable();
        self.check_live(pid)?;
        if self.procs[pid.0].directory.is_some() {
            return Err(PagingError::AddressSpaceExists(pid));
        }
        let pd = self.get_frame(FrameClaim::directory(pid))?;
        self.phys.zero(pd);
        self.install_global_tables(pd);
        self.frames.add_ref(pd, GLOBAL_PAGE_TABLES as i32);
        self.procs[pid.0].directory = Some(pd);
        Ok(())
    }

    /// Attach a heap of `heap_pages` pages at `HEAP_BASE_VPN`
    ///
    /// The free list is written when the first heap page is faulted in.
    /// Returns the store backing the heap.
    pub fn create_virtual_heap(&mut self, pid: Pid, heap_pages: usize) -> Result<StoreId> {
        let _spl = spl::disable();
        self.check_live(pid)?;
        if heap_pages == 0 || heap_pages > STORE_PAGES {
            return Err(PagingError::BadPageCount(heap_pages));
        }
        if self.procs[pid.0].directory.is_none() {
            return Err(PagingError::NoAddressSpace(pid));
        }
        if self.procs[pid.0].heap.is_some() || self.shared.overlaps(pid, HEAP_BASE_VPN, heap_pages) {
            return Err(PagingError::AlreadyMapped(HEAP_BASE_VPN));
        }

        let store = self.stores.reserve_store()?;
        self.stores
            .bind_exclusive(pid, HEAP_BASE_VPN, heap_pages, store)?;
        if let Err(e) = self.ensure_page_table(pid, VirtAddr::from_vpn(HEAP_BASE_VPN)) {
            self.stores.release_store(store)?;
            return Err(e);
        }
        self.procs[pid.0].heap = Some(HeapRegion {
            store,
            start_vpn: HEAP_BASE_VPN,
            npages: heap_pages,
            bootstrapped: false,
        });
        Ok(store)
    }

    /// Release everything `pid` holds
    ///
    /// Dirty pages are written back first; a failed write-back is logged
    /// and the page dropped. Afterwards no frame names `pid` as owner.
    pub fn destroy_address_space(&mut self, pid: Pid) -> Result<()> {
        if !pid.in_range() || pid == Pid::NULL {
            return Err(PagingError::BadPid(pid));
        }
        let _spl = spl::disable();
        let pd = self.procs[pid.0]
            .directory
            .ok_or(PagingError::NoAddressSpace(pid))?;

        for pdi in GLOBAL_PAGE_TABLES..ENTRIES_PER_TABLE {
            let pde = self.phys.pde(pd, pdi);
            if !pde.present() {
                continue;
            }
            if let Some(pt) = self.phys.frame_of(pde.pfn()) {
                self.release_table_pages(pid, pt);
                self.frames.clear(pt);
            }
            self.phys.set_pde(pd, pdi, PdEntry::zero());
        }

        if let Some(heap) = self.procs[pid.0].heap.take() {
            if self.stores.unbind_exclusive(pid, heap.start_vpn).is_err() {
                // Only a store still bound to this process may be freed here
                let still_ours = matches!(
                    self.stores.slot(heap.store),
                    Some(StoreSlot::Exclusive { owner, .. }) if *owner == pid
                );
                if still_ours {
                    self.stores.release_store(heap.store)?;
                }
            }
        }
        for mapping in self.shared.remove_pid(pid) {
            if !self.shared.references(mapping.store) {
                self.stores.release_store(mapping.store)?;
            }
        }

        self.frames.clear(pd);
        for f in self.frames.owned_by(pid) {
            self.queue.remove(f);
            self.frames.clear(f);
        }
        self.procs[pid.0].directory = None;
        if self.sched.current() == pid {
            self.tlb.invalidate_all();
        }
        Ok(())
    }

    fn release_table_pages(&mut self, pid: Pid, pt: FrameIndex) {
        for pti in 0..ENTRIES_PER_TABLE {
            let pte = self.phys.pte(pt, pti);
            if !pte.present() {
                continue;
            }
            let Some(f) = self.phys.frame_of(pte.pfn()) else {
                continue;
            };
            if self.is_dirty(f) {
                let vpn = self.frames.get(f).map_or(0, |d| d.vpn);
                match self.write_back_frame(f) {
                    Ok(()) => self.publish_teardown_write(pid, vpn),
                    Err(e) => {
                        kwarn!("teardown", "pid {} vpn {:#x}: write-back failed: {}", pid, vpn, e)
                    }
                }
            }
            self.queue.remove(f);
            self.frames.clear(f);
        }
    }

    /// Drop other processes' clean copies of a shared page `pid` just wrote back
    fn publish_teardown_write(&mut self, pid: Pid, vpn: u32) {
        let Some((store, page)) = self.shared.lookup_shared(pid, VirtAddr::from_vpn(vpn)) else {
            return;
        };
        // The dying process's own entries are torn down by the caller
        let keep: Vec<(Pid, u32)> = self
            .shared
            .mappers(store, page)
            .into_iter()
            .filter(|&(p, _)| p == pid)
            .collect();
        self.invalidate_clean_mappers(store, page, &keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PagerConfig;
    use crate::kern::sched::ProcTable;

    fn pager() -> Pager<ProcTable> {
        Pager::new(PagerConfig::new().with_frames(32), ProcTable::new()).unwrap()
    }

    #[test]
    fn test_heap_region_bounds() {
        let heap = HeapRegion {
            store: StoreId(0),
            start_vpn: HEAP_BASE_VPN,
            npages: 2,
            bootstrapped: false,
        };
        assert_eq!(heap.base(), 0x0100_0000);
        assert_eq!(heap.end(), 0x0100_2000);
        assert_eq!(heap.max_blocks(), 1024);
    }

    #[test]
    fn test_create_twice_rejected() {
        let mut p = pager();
        let pid = p.scheduler_mut().spawn().unwrap();
        p.create_address_space(pid).unwrap();
        assert_eq!(
            p.create_address_space(pid),
            Err(PagingError::AddressSpaceExists(pid))
        );
        assert_eq!(p.create_address_space(Pid(40)), Err(PagingError::BadPid(Pid(40))));
    }

    #[test]
    fn test_heap_binds_store_and_table() {
        let mut p = pager();
        let pid = p.scheduler_mut().spawn().unwrap();
        p.create_address_space(pid).unwrap();
        let free_before = p.free_frames();
        let store = p.create_virtual_heap(pid, 100).unwrap();
        assert_eq!(
            p.store_slot(store),
            Some(StoreSlot::Exclusive {
                owner: pid,
                start_vpn: HEAP_BASE_VPN,
                npages: 100
            })
        );
        // Heap page table exists before the first fault
        assert_eq!(p.free_frames(), free_before - 1);
        assert_eq!(
            p.create_virtual_heap(pid, 1),
            Err(PagingError::AlreadyMapped(HEAP_BASE_VPN))
        );
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut p = pager();
        let pid = p.scheduler_mut().spawn().unwrap();
        let free_before = p.free_frames();
        p.create_address_space(pid).unwrap();
        let store = p.create_virtual_heap(pid, 4).unwrap();
        p.destroy_address_space(pid).unwrap();
        assert_eq!(p.free_frames(), free_before);
        assert_eq!(p.store_slot(store), Some(StoreSlot::Free));
        assert!(p.address_space(pid).unwrap().directory.is_none());
        assert_eq!(
            p.destroy_address_space(pid),
            Err(PagingError::NoAddressSpace(pid))
        );
        assert_eq!(p.destroy_address_space(Pid::NULL), Err(PagingError::BadPid(Pid::NULL)));
        p.check_invariants().unwrap();
    }

    #[test]
    fn test_destroy_keeps_rebound_heap_store() {
        let mut p = pager();
        let a = p.scheduler_mut().spawn().unwrap();
        let b = p.scheduler_mut().spawn().unwrap();
        p.create_address_space(a).unwrap();
        let store = p.create_virtual_heap(a, 4).unwrap();

        // The slot changes hands behind the heap record
        p.stores.release_store(store).unwrap();
        p.stores.bind_exclusive(b, HEAP_BASE_VPN, 8, store).unwrap();

        p.destroy_address_space(a).unwrap();
        assert_eq!(
            p.store_slot(store),
            Some(StoreSlot::Exclusive {
                owner: b,
                start_vpn: HEAP_BASE_VPN,
                npages: 8
            })
        );
        assert!(p.address_space(a).unwrap().heap.is_none());
    }
}
