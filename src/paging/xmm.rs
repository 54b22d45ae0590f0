//! Shared Mapping Table (xmmap)
//!
//! Records of `(process, virtual page range, backing store)` for shared
//! regions. Any number of entries may name one shared store; one process
//! never holds two entries with overlapping ranges. Removed entries leave
//! holes that later mappings reuse.
//!
//! ## Coherence
//!
//! A writer publishes its dirty copy of a store page when it unmaps, or
//! when another mapper of that page faults. Publishing writes the page back
//! and drops every clean resident copy held by the other mappers, so their
//! next access re-reads the store.

use alloc::vec::Vec;

use crate::error::{PagingError, Result};
use crate::kern::sched::Scheduler;
use crate::kern::spl;
use crate::paging::bs_map::{BackingStoreTable, StoreSlot};
use crate::paging::pager::Pager;
use crate::paging::pmap::Tlb;
use crate::paging::vm_param::{VirtAddr, LOW_REGION_PAGES, MAX_SHARED_MAPPINGS, STORE_PAGES};
use crate::types::{Pid, StoreId};
use crate::{kdebug, kwarn};

/// Highest virtual page number plus one
const VPN_LIMIT: u64 = 1 << 20;

// ============================================================================
// Shared Mapping Entry
// ============================================================================

/// One xmmap region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMapping {
    pub pid: Pid,
    pub start_vpn: u32,
    pub npages: usize,
    pub store: StoreId,
}

impl SharedMapping {
    /// Whether the range holds `vpn`
    pub fn contains(&self, vpn: u32) -> bool {
        vpn >= self.start_vpn && ((vpn - self.start_vpn) as usize) < self.npages
    }

    /// Whether the range intersects `[start, start + npages)`
    pub fn overlaps(&self, start: u32, npages: usize) -> bool {
        let (a0, a1) = (self.start_vpn as u64, self.start_vpn as u64 + self.npages as u64);
        let (b0, b1) = (start as u64, start as u64 + npages as u64);
        a0 < b1 && b0 < a1
    }

    /// Virtual page that maps store page `page`, if the range reaches it
    pub fn vpn_for(&self, page: usize) -> Option<u32> {
        (page < self.npages).then(|| self.start_vpn + page as u32)
    }
}

// ============================================================================
// Shared Mapping Table
// ============================================================================

/// The xmmap registry
pub struct SharedMappingTable {
    entries: heapless::Vec<Option<SharedMapping>, MAX_SHARED_MAPPINGS>,
}

impl SharedMappingTable {
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Drop every entry
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Live entries
    pub fn entries(&self) -> impl Iterator<Item = &SharedMapping> {
        self.entries.iter().flatten()
    }

    /// Live entries with their slot index
    fn indexed(&self) -> impl Iterator<Item = (usize, &SharedMapping)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|m| (i, m)))
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `pid` maps any page of `[start, start + npages)`
    pub fn overlaps(&self, pid: Pid, start: u32, npages: usize) -> bool {
        self.entries()
            .any(|m| m.pid == pid && m.overlaps(start, npages))
    }

    /// Install a shared mapping of `store` for `pid`
    ///
    /// A free store becomes shared; an exclusively bound store is refused.
    pub fn map_shared(
        &mut self,
        stores: &mut BackingStoreTable,
        pid: Pid,
        start_vpn: u32,
        store: StoreId,
        npages: usize,
    ) -> Result<()> {
        if start_vpn < LOW_REGION_PAGES {
            return Err(PagingError::LowRegion(start_vpn));
        }
        let slot = stores.slot(store).ok_or(PagingError::BadStore(store.0))?;
        if npages == 0 || npages > STORE_PAGES || start_vpn as u64 + npages as u64 > VPN_LIMIT {
            return Err(PagingError::BadPageCount(npages));
        }
        if let StoreSlot::Exclusive { .. } = slot {
            return Err(PagingError::StoreInUse(store));
        }
        if self.overlaps(pid, start_vpn, npages) {
            return Err(PagingError::AlreadyMapped(start_vpn));
        }

        let entry = SharedMapping {
            pid,
            start_vpn,
            npages,
            store,
        };
        match self.entries.iter().position(Option::is_none) {
            Some(hole) => self.entries[hole] = Some(entry),
            None => self
                .entries
                .push(Some(entry))
                .map_err(|_| PagingError::MappingTableFull)?,
        }
        stores.mark_shared(store)
    }

    /// Slot of the entry of `pid` containing `vpn`
    pub fn find(&self, pid: Pid, vpn: u32) -> Option<usize> {
        self.indexed()
            .find(|(_, m)| m.pid == pid && m.contains(vpn))
            .map(|(i, _)| i)
    }

    pub fn get(&self, slot: usize) -> Option<&SharedMapping> {
        self.entries.get(slot).and_then(Option::as_ref)
    }

    /// Remove the entry in `slot`
    pub fn remove(&mut self, slot: usize) -> Option<SharedMapping> {
        self.entries.get_mut(slot).and_then(Option::take)
    }

    /// Remove every entry of `pid`
    pub fn remove_pid(&mut self, pid: Pid) -> Vec<SharedMapping> {
        let mut removed = Vec::new();
        for e in self.entries.iter_mut() {
            if matches!(e, Some(m) if m.pid == pid) {
                removed.extend(e.take());
            }
        }
        removed
    }

    /// Store and page within it backing `vaddr` for `pid`
    pub fn lookup_shared(&self, pid: Pid, vaddr: VirtAddr) -> Option<(StoreId, usize)> {
        let vpn = vaddr.vpn();
        self.entries()
            .find(|m| m.pid == pid && m.contains(vpn))
            .map(|m| (m.store, (vpn - m.start_vpn) as usize))
    }

    /// `(pid, vpn)` of every mapping of store page `page`
    pub fn mappers(&self, store: StoreId, page: usize) -> Vec<(Pid, u32)> {
        self.entries()
            .filter(|m| m.store == store)
            .filter_map(|m| m.vpn_for(page).map(|vpn| (m.pid, vpn)))
            .collect()
    }

    /// Whether any entry still names `store`
    pub fn references(&self, store: StoreId) -> bool {
        self.entries().any(|m| m.store == store)
    }
}

impl Default for SharedMappingTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Shared Mapping Operations
// ============================================================================

impl<S: Scheduler, T: Tlb> Pager<S, T> {
    /// Map `npages` of shared store `store` at `vpage` for the current process
    pub fn xmmap(&mut self, vpage: u32, store: StoreId, npages: usize) -> Result<()> {
        let _spl = spl::disable();
        let pid = self.sched.current();
        if !self.sched.is_live(pid) {
            return Err(PagingError::BadPid(pid));
        }
        if let Some(heap) = self.procs[pid.0].heap {
            let heap_range = SharedMapping {
                pid,
                start_vpn: heap.start_vpn,
                npages: heap.npages,
                store: heap.store,
            };
            if heap_range.overlaps(vpage, npages) {
                return Err(PagingError::AlreadyMapped(vpage));
            }
        }
        self.shared
            .map_shared(&mut self.stores, pid, vpage, store, npages)
    }

    /// Remove the current process's shared mapping containing `vpage`
    ///
    /// Dirty pages are published first. A page that fails to write back is
    /// logged and dropped; the mapping is removed regardless.
    pub fn xmunmap(&mut self, vpage: u32) -> Result<()> {
        let pid = self.sched.current();
        self.unmap_shared(pid, vpage)
    }

    /// Remove the shared mapping of `pid` containing `vpage`
    pub fn unmap_shared(&mut self, pid: Pid, vpage: u32) -> Result<()> {
        let _spl = spl::disable();
        let slot = self
            .shared
            .find(pid, vpage)
            .ok_or(PagingError::NotMapped(vpage))?;
        let Some(mapping) = self.shared.get(slot).copied() else {
            return Err(PagingError::NotMapped(vpage));
        };

        for page in 0..mapping.npages {
            let vpn = mapping.start_vpn + page as u32;
            let Some(f) = self.resident_frame(pid, vpn) else {
                continue;
            };
            if self.is_dirty(f) {
                match self.write_back_frame(f) {
                    Ok(()) => self.invalidate_clean_mappers(mapping.store, page, &[(pid, vpn)]),
                    Err(e) => kwarn!(
                        "xmm",
                        "pid {} vpn {:#x}: write-back to store {} failed: {}",
                        pid,
                        vpn,
                        mapping.store,
                        e
                    ),
                }
            }
            self.release_page(f);
        }

        self.shared.remove(slot);
        if !self.shared.references(mapping.store) {
            self.stores.release_store(mapping.store)?;
        }
        Ok(())
    }

    /// Make store page `page` of `store` coherent across its mappers
    ///
    /// Every dirty resident copy is written back; if anything was written,
    /// every clean resident copy is dropped so it is re-read on next access.
    /// A mapper whose write-back fails is terminated and the sync goes on.
    pub fn sync_shared(&mut self, store: StoreId, page: usize, requester: Pid, requesting_vpn: u32) {
        let _spl = spl::disable();
        self.stats.incr_syncs();
        kdebug!(
            "xmm",
            "sync store {} page {} for pid {} vpn {:#x}",
            store,
            page,
            requester,
            requesting_vpn
        );

        let mut written = Vec::new();
        for (pid, vpn) in self.shared.mappers(store, page) {
            let Some(f) = self.resident_frame(pid, vpn) else {
                continue;
            };
            if !self.is_dirty(f) {
                continue;
            }
            match self.write_back_frame(f) {
                Ok(()) => written.push((pid, vpn)),
                Err(e) => {
                    kwarn!("xmm", "pid {} vpn {:#x}: publish failed: {}", pid, vpn, e);
                    self.kill_on_failure(pid);
                }
            }
        }

        if !written.is_empty() {
            self.invalidate_clean_mappers(store, page, &written);
        }
    }

    /// Drop every clean resident copy of a store page except those in `keep`
    pub(crate) fn invalidate_clean_mappers(&mut self, store: StoreId, page: usize, keep: &[(Pid, u32)]) {
        for (pid, vpn) in self.shared.mappers(store, page) {
            if keep.contains(&(pid, vpn)) {
                continue;
            }
            let Some(f) = self.resident_frame(pid, vpn) else {
                continue;
            };
            if !self.is_dirty(f) {
                self.release_page(f);
                self.stats.incr_invalidations();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::vm_param::HEAP_BASE_VPN;

    fn tables() -> (SharedMappingTable, BackingStoreTable) {
        (SharedMappingTable::new(), BackingStoreTable::new())
    }

    #[test]
    fn test_map_rejections() {
        let (mut xmm, mut stores) = tables();
        let s = StoreId(2);
        assert_eq!(
            xmm.map_shared(&mut stores, Pid(1), 100, s, 4),
            Err(PagingError::LowRegion(100))
        );
        assert_eq!(
            xmm.map_shared(&mut stores, Pid(1), 5000, StoreId(8), 4),
            Err(PagingError::BadStore(8))
        );
        assert_eq!(
            xmm.map_shared(&mut stores, Pid(1), 5000, s, 0),
            Err(PagingError::BadPageCount(0))
        );
        assert_eq!(
            xmm.map_shared(&mut stores, Pid(1), 5000, s, 257),
            Err(PagingError::BadPageCount(257))
        );

        stores.bind_exclusive(Pid(3), HEAP_BASE_VPN, 4, StoreId(5)).unwrap();
        assert_eq!(
            xmm.map_shared(&mut stores, Pid(1), 5000, StoreId(5), 4),
            Err(PagingError::StoreInUse(StoreId(5)))
        );
        assert!(xmm.is_empty());
        assert!(stores.slot(s).unwrap().is_free());
    }

    #[test]
    fn test_same_start_rejected_other_start_accepted() {
        let (mut xmm, mut stores) = tables();
        let s = StoreId(2);
        xmm.map_shared(&mut stores, Pid(1), 6000, s, 8).unwrap();
        assert!(stores.slot(s).unwrap().is_shared());
        assert_eq!(
            xmm.map_shared(&mut stores, Pid(1), 6000, s, 8),
            Err(PagingError::AlreadyMapped(6000))
        );
        assert_eq!(
            xmm.map_shared(&mut stores, Pid(1), 6004, s, 8),
            Err(PagingError::AlreadyMapped(6004))
        );
        xmm.map_shared(&mut stores, Pid(1), 7000, s, 8).unwrap();
        xmm.map_shared(&mut stores, Pid(2), 6000, s, 8).unwrap();
        assert_eq!(xmm.len(), 3);
        assert_eq!(xmm.mappers(s, 7).len(), 3);
        assert_eq!(xmm.mappers(s, 8).len(), 0);
    }

    #[test]
    fn test_lookup_by_containment() {
        let (mut xmm, mut stores) = tables();
        xmm.map_shared(&mut stores, Pid(4), 0x2000, StoreId(1), 16).unwrap();
        assert_eq!(
            xmm.lookup_shared(Pid(4), VirtAddr::from_vpn(0x200F)),
            Some((StoreId(1), 15))
        );
        assert_eq!(xmm.lookup_shared(Pid(4), VirtAddr::from_vpn(0x2010)), None);
        assert_eq!(xmm.lookup_shared(Pid(5), VirtAddr::from_vpn(0x2000)), None);
        assert_eq!(xmm.find(Pid(4), 0x2007), Some(0));
    }

    #[test]
    fn test_holes_are_reused() {
        let (mut xmm, mut stores) = tables();
        xmm.map_shared(&mut stores, Pid(1), 5000, StoreId(0), 1).unwrap();
        xmm.map_shared(&mut stores, Pid(2), 5000, StoreId(0), 1).unwrap();
        let removed = xmm.remove(0).unwrap();
        assert_eq!(removed.pid, Pid(1));
        assert!(xmm.references(StoreId(0)));
        xmm.map_shared(&mut stores, Pid(3), 5000, StoreId(0), 1).unwrap();
        assert_eq!(xmm.get(0).map(|m| m.pid), Some(Pid(3)));
        assert_eq!(xmm.entries.len(), 2);
    }

    #[test]
    fn test_remove_pid() {
        let (mut xmm, mut stores) = tables();
        xmm.map_shared(&mut stores, Pid(1), 5000, StoreId(0), 1).unwrap();
        xmm.map_shared(&mut stores, Pid(1), 6000, StoreId(1), 1).unwrap();
        xmm.map_shared(&mut stores, Pid(2), 5000, StoreId(1), 1).unwrap();
        let removed = xmm.remove_pid(Pid(1));
        assert_eq!(removed.len(), 2);
        assert!(!xmm.references(StoreId(0)));
        assert!(xmm.references(StoreId(1)));
    }
}
