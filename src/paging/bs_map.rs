//! Backing Store Table
//!
//! Fixed registry of backing-store slots. A slot is free, bound exclusively
//! to one process (its virtual heap), or shared by any number of xmmap
//! entries. Reserving a slot does not claim it; the caller binds it.

use crate::error::{PagingError, Result};
use crate::paging::vm_param::{VirtAddr, MAX_STORES, STORE_PAGES};
use crate::types::{Pid, StoreId};

/// State of one backing-store slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreSlot {
    /// Unused
    #[default]
    Free,
    /// Heap store of a single process
    Exclusive {
        owner: Pid,
        start_vpn: u32,
        npages: usize,
    },
    /// Referenced by shared mappings
    Shared,
}

impl StoreSlot {
    pub fn is_free(&self) -> bool {
        matches!(self, StoreSlot::Free)
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, StoreSlot::Shared)
    }

    /// Owner of an exclusive slot
    pub fn exclusive_owner(&self) -> Option<Pid> {
        match *self {
            StoreSlot::Exclusive { owner, .. } => Some(owner),
            _ => None,
        }
    }
}

/// The backing-store registry
#[derive(Debug, Clone)]
pub struct BackingStoreTable {
    slots: [StoreSlot; MAX_STORES],
}

impl BackingStoreTable {
    /// All slots free
    pub const fn new() -> Self {
        Self {
            slots: [StoreSlot::Free; MAX_STORES],
        }
    }

    /// Free every slot
    pub fn reset(&mut self) {
        self.slots = [StoreSlot::Free; MAX_STORES];
    }

    fn slot_mut(&mut self, id: StoreId) -> Result<&mut StoreSlot> {
        self.slots.get_mut(id.0).ok_or(PagingError::BadStore(id.0))
    }

    /// State of a slot
    pub fn slot(&self, id: StoreId) -> Option<&StoreSlot> {
        self.slots.get(id.0)
    }

    /// Every slot with its id
    pub fn slots(&self) -> impl Iterator<Item = (StoreId, &StoreSlot)> {
        self.slots.iter().enumerate().map(|(i, s)| (StoreId(i), s))
    }

    /// First free slot
    pub fn reserve_store(&self) -> Result<StoreId> {
        self.slots
            .iter()
            .position(StoreSlot::is_free)
            .map(StoreId)
            .ok_or(PagingError::NoFreeStore)
    }

    /// Return a slot to the free state, whatever it held
    pub fn release_store(&mut self, id: StoreId) -> Result<()> {
        *self.slot_mut(id)? = StoreSlot::Free;
        Ok(())
    }

    /// Turn a free slot into a shared one; shared slots stay shared
    pub fn mark_shared(&mut self, id: StoreId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        match *slot {
            StoreSlot::Free => {
                *slot = StoreSlot::Shared;
                Ok(())
            }
            StoreSlot::Shared => Ok(()),
            StoreSlot::Exclusive { .. } => Err(PagingError::StoreInUse(id)),
        }
    }

    /// Bind a slot to `pid` for `npages` pages starting at `start_vpn`
    ///
    /// Binding the same process again replaces the recorded range.
    pub fn bind_exclusive(
        &mut self,
        pid: Pid,
        start_vpn: u32,
        npages: usize,
        id: StoreId,
    ) -> Result<()> {
        if !id.in_range() {
            return Err(PagingError::BadStore(id.0));
        }
        if npages == 0 || npages > STORE_PAGES {
            return Err(PagingError::BadPageCount(npages));
        }
        if !pid.in_range() {
            return Err(PagingError::BadPid(pid));
        }
        let slot = self.slot_mut(id)?;
        match slot.exclusive_owner() {
            Some(owner) if owner != pid => return Err(PagingError::StoreInUse(id)),
            _ if slot.is_shared() => return Err(PagingError::StoreInUse(id)),
            _ => {}
        }
        *slot = StoreSlot::Exclusive {
            owner: pid,
            start_vpn,
            npages,
        };
        Ok(())
    }

    /// Free the exclusive slot `pid` bound at `start_vpn`
    pub fn unbind_exclusive(&mut self, pid: Pid, start_vpn: u32) -> Result<StoreId> {
        let idx = self
            .slots
            .iter()
            .position(|s| {
                matches!(*s, StoreSlot::Exclusive { owner, start_vpn: v, .. }
                    if owner == pid && v == start_vpn)
            })
            .ok_or(PagingError::NotMapped(start_vpn))?;
        self.slots[idx] = StoreSlot::Free;
        Ok(StoreId(idx))
    }

    /// Store and page within it backing `vaddr` for `pid`
    pub fn lookup_exclusive(&self, pid: Pid, vaddr: VirtAddr) -> Option<(StoreId, usize)> {
        let vpn = vaddr.vpn();
        self.slots.iter().enumerate().find_map(|(i, s)| match *s {
            StoreSlot::Exclusive {
                owner,
                start_vpn,
                npages,
            } if owner == pid && vpn >= start_vpn && ((vpn - start_vpn) as usize) < npages => {
                Some((StoreId(i), (vpn - start_vpn) as usize))
            }
            _ => None,
        })
    }
}

impl Default for BackingStoreTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::vm_param::HEAP_BASE_VPN;

    #[test]
    fn test_reserve_does_not_claim() {
        let table = BackingStoreTable::new();
        assert_eq!(table.reserve_store(), Ok(StoreId(0)));
        assert_eq!(table.reserve_store(), Ok(StoreId(0)));
    }

    #[test]
    fn test_exhaustion() {
        let mut table = BackingStoreTable::new();
        for i in 0..MAX_STORES {
            let id = table.reserve_store().unwrap();
            table.bind_exclusive(Pid(i + 1), HEAP_BASE_VPN, 1, id).unwrap();
        }
        assert_eq!(table.reserve_store(), Err(PagingError::NoFreeStore));
        table.release_store(StoreId(3)).unwrap();
        assert_eq!(table.reserve_store(), Ok(StoreId(3)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut table = BackingStoreTable::new();
        assert!(table.release_store(StoreId(2)).is_ok());
        assert!(table.release_store(StoreId(2)).is_ok());
        assert_eq!(table.release_store(StoreId(8)), Err(PagingError::BadStore(8)));
    }

    #[test]
    fn test_bind_rules() {
        let mut table = BackingStoreTable::new();
        let id = StoreId(1);
        assert_eq!(table.bind_exclusive(Pid(2), 4096, 0, id), Err(PagingError::BadPageCount(0)));
        assert_eq!(table.bind_exclusive(Pid(2), 4096, 257, id), Err(PagingError::BadPageCount(257)));
        assert_eq!(table.bind_exclusive(Pid(99), 4096, 1, id), Err(PagingError::BadPid(Pid(99))));
        assert_eq!(table.bind_exclusive(Pid(2), 4096, 1, StoreId(9)), Err(PagingError::BadStore(9)));

        table.bind_exclusive(Pid(2), 4096, 10, id).unwrap();
        // Same owner may re-bind
        table.bind_exclusive(Pid(2), 4096, 20, id).unwrap();
        assert_eq!(table.bind_exclusive(Pid(3), 4096, 1, id), Err(PagingError::StoreInUse(id)));

        table.mark_shared(StoreId(4)).unwrap();
        assert_eq!(
            table.bind_exclusive(Pid(2), 4096, 1, StoreId(4)),
            Err(PagingError::StoreInUse(StoreId(4)))
        );
    }

    #[test]
    fn test_lookup_covers_range() {
        let mut table = BackingStoreTable::new();
        table.bind_exclusive(Pid(5), 0x2000, 16, StoreId(6)).unwrap();
        for k in 0..16u32 {
            assert_eq!(
                table.lookup_exclusive(Pid(5), VirtAddr::from_vpn(0x2000 + k)),
                Some((StoreId(6), k as usize))
            );
        }
        assert_eq!(table.lookup_exclusive(Pid(5), VirtAddr::from_vpn(0x2010)), None);
        assert_eq!(table.lookup_exclusive(Pid(5), VirtAddr::from_vpn(0x1FFF)), None);
        assert_eq!(table.lookup_exclusive(Pid(4), VirtAddr::from_vpn(0x2000)), None);
    }

    #[test]
    fn test_unbind() {
        let mut table = BackingStoreTable::new();
        table.bind_exclusive(Pid(5), 0x2000, 16, StoreId(6)).unwrap();
        assert_eq!(table.unbind_exclusive(Pid(5), 0x2001), Err(PagingError::NotMapped(0x2001)));
        assert_eq!(table.unbind_exclusive(Pid(5), 0x2000), Ok(StoreId(6)));
        assert!(table.slot(StoreId(6)).unwrap().is_free());
    }
}
