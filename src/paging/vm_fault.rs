//! Page Fault Handling
//!
//! A fault on address `va` of the current process is resolved as follows:
//!
//! 1. Find the store page behind `va`: shared mappings first, then the
//!    process's exclusive heap store. No backing means an illegal access.
//! 2. Make sure the page table covering `va` exists.
//! 3. For a shared page that is absent or resident but clean, make the
//!    store page coherent (see `sync_shared`). This happens once per fault.
//! 4. If the entry is still absent, get a frame (possibly evicting), read
//!    the store page into it, and install the entry.
//!
//! Any failure on this path terminates the faulting process.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PagingError, Result};
use crate::kern::sched::Scheduler;
use crate::kern::spl;
use crate::kwarn;
use crate::paging::pager::Pager;
use crate::paging::pmap::{PdEntry, PtEntry, Tlb, MAPPED};
use crate::paging::vm_heap::bootstrap_free_list;
use crate::paging::vm_page::FrameClaim;
use crate::paging::vm_param::VirtAddr;
use crate::types::{FrameIndex, Pid, StoreId};

// ============================================================================
// Statistics
// ============================================================================

/// Paging event counters
#[derive(Debug, Default)]
pub struct PagingStats {
    /// Faults handled
    pub faults: AtomicU64,
    /// Pages read in from a store
    pub page_ins: AtomicU64,
    /// Frames reclaimed by replacement
    pub evictions: AtomicU64,
    /// Pages written back to a store
    pub write_backs: AtomicU64,
    /// Shared-page coherence passes
    pub syncs: AtomicU64,
    /// Clean shared copies dropped after a publish
    pub invalidations: AtomicU64,
    /// Accessed bits cleared by the clock
    pub second_chances: AtomicU64,
    /// Victims taken by the fallback scan
    pub degraded: AtomicU64,
    /// Processes terminated by the pager
    pub kills: AtomicU64,
}

impl PagingStats {
    pub const fn new() -> Self {
        Self {
            faults: AtomicU64::new(0),
            page_ins: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            write_backs: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            second_chances: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            kills: AtomicU64::new(0),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.faults,
            &self.page_ins,
            &self.evictions,
            &self.write_backs,
            &self.syncs,
            &self.invalidations,
            &self.second_chances,
            &self.degraded,
            &self.kills,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn incr_faults(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_page_ins(&self) {
        self.page_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_evictions(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_write_backs(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_syncs(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_invalidations(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_second_chances(&self) {
        self.second_chances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_kills(&self) {
        self.kills.fetch_add(1, Ordering::Relaxed);
    }

    /// Plain copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            faults: self.faults.load(Ordering::Relaxed),
            page_ins: self.page_ins.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            second_chances: self.second_chances.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            kills: self.kills.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the paging counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub faults: u64,
    pub page_ins: u64,
    pub evictions: u64,
    pub write_backs: u64,
    pub syncs: u64,
    pub invalidations: u64,
    pub second_chances: u64,
    pub degraded: u64,
    pub kills: u64,
}

// ============================================================================
// Page Fault Handling
// ============================================================================

/// Store page behind a faulting address
#[derive(Debug, Clone, Copy)]
struct Backing {
    store: StoreId,
    page: usize,
    shared: bool,
}

impl<S: Scheduler, T: Tlb> Pager<S, T> {
    /// Resolve a fault at `vaddr` for the current process
    ///
    /// On failure the process has been terminated.
    pub fn fault(&mut self, vaddr: u32) -> Result<()> {
        let _spl = spl::disable();
        self.stats.incr_faults();
        let pid = self.sched.current();

        match self.resolve_fault(pid, VirtAddr(vaddr)) {
            Ok(()) => Ok(()),
            Err(e) => {
                match e {
                    PagingError::IllegalAccess { .. } => {
                        kwarn!("fault", "illegal access by pid {} at {:#010x}", pid, vaddr)
                    }
                    _ => kwarn!("fault", "pid {} at {:#010x}: {}", pid, vaddr, e),
                }
                self.kill_on_failure(pid);
                Err(e)
            }
        }
    }

    fn resolve_fault(&mut self, pid: Pid, va: VirtAddr) -> Result<()> {
        let backing = self.backing_of(pid, va).ok_or(PagingError::IllegalAccess {
            pid,
            vaddr: va.0,
        })?;

        let pt = self.ensure_page_table(pid, va)?;
        let pte = self.phys.pte(pt, va.pt_index());

        if backing.shared && (!pte.present() || !pte.dirty()) {
            self.sync_shared(backing.store, backing.page, pid, va.vpn());
            if self.directory(pid).is_none() {
                return Err(PagingError::ProcessKilled(pid));
            }
        }
        if self.resident_frame(pid, va.vpn()).is_some() {
            return Ok(());
        }

        let f = self.get_frame(FrameClaim::page(pid, va.vpn()))?;
        match self.fill_and_install(pid, va, backing, f) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.frames.clear(f);
                Err(e)
            }
        }
    }

    fn backing_of(&self, pid: Pid, va: VirtAddr) -> Option<Backing> {
        if let Some((store, page)) = self.shared.lookup_shared(pid, va) {
            return Some(Backing {
                store,
                page,
                shared: true,
            });
        }
        self.stores
            .lookup_exclusive(pid, va)
            .map(|(store, page)| Backing {
                store,
                page,
                shared: false,
            })
    }

    fn fill_and_install(
        &mut self,
        pid: Pid,
        va: VirtAddr,
        backing: Backing,
        f: FrameIndex,
    ) -> Result<()> {
        self.store
            .read_page(self.phys.frame_mut(f), backing.store, backing.page)?;
        self.stats.incr_page_ins();

        let mut dirty = false;
        if let Some(heap) = self.procs[pid.0].heap.as_mut() {
            if !backing.shared && heap.store == backing.store && backing.page == 0 && !heap.bootstrapped {
                bootstrap_free_list(self.phys.frame_mut(f), heap.start_vpn, heap.npages);
                heap.bootstrapped = true;
                dirty = true;
            }
        }

        // Acquiring the frame may have retired the table
        let pt = self.ensure_page_table(pid, va)?;
        let mut pte = PtEntry::new(f.pfn(), MAPPED);
        pte.set_dirty(dirty);
        self.phys.set_pte(pt, va.pt_index(), pte);
        if let Some(d) = self.frames.get_mut(f) {
            d.refcount = 1;
            d.dirty = dirty;
        }
        self.queue.push(f);
        self.frames.add_ref(pt, 1);
        Ok(())
    }

    /// Page table covering `va` for `pid`, created empty if absent
    pub(crate) fn ensure_page_table(&mut self, pid: Pid, va: VirtAddr) -> Result<FrameIndex> {
        let pd = self.directory(pid).ok_or(PagingError::NoAddressSpace(pid))?;
        let pde = self.phys.pde(pd, va.pd_index());
        if pde.present() {
            return self
                .phys
                .frame_of(pde.pfn())
                .ok_or(PagingError::BadFrame(pde.pfn() as usize));
        }

        let pt = self.get_frame(FrameClaim::table(pid))?;
        self.phys.init_table(pt);
        self.phys.set_pde(pd, va.pd_index(), PdEntry::new(pt.pfn(), MAPPED));
        self.frames.add_ref(pd, 1);
        Ok(pt)
    }
}
