//! The Pager
//!
//! One service object owns every paging table: the frame arena, the frame
//! table and replacement queue, the backing-store and shared-mapping
//! registries, the per-process memory records and the backing device. The
//! fault handler, the xmmap calls, the heap allocator and the lifecycle
//! hooks are all methods on it.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::config::PagerConfig;
use crate::error::{PagingError, Result};
use crate::kern::sched::Scheduler;
use crate::kern::spl;
use crate::kwarn;
use crate::paging::address_space::ProcMemory;
use crate::paging::backing_store::{BackingDevice, BackingStore, SparseDevice};
use crate::paging::bs_map::{BackingStoreTable, StoreSlot};
use crate::paging::pmap::{PdEntry, PhysicalMemory, PtEntry, SoftTlb, Tlb, MAPPED};
use crate::paging::vm_fault::{PagingStats, StatsSnapshot};
use crate::paging::vm_page::{FrameClaim, FrameDescriptor, FrameRole, FrameTable};
use crate::paging::vm_pageout::ReplacementQueue;
use crate::paging::vm_param::{
    vpn_of, VirtAddr, ENTRIES_PER_TABLE, GLOBAL_PAGE_TABLES, NPROC, NULL_DIRECTORY_FRAME,
    RESERVED_FRAMES,
};
use crate::paging::xmm::{SharedMapping, SharedMappingTable};
use crate::types::{FrameIndex, Pid, StoreId};

/// The demand pager
pub struct Pager<S: Scheduler, T: Tlb = SoftTlb> {
    pub(crate) config: PagerConfig,
    pub(crate) phys: PhysicalMemory,
    pub(crate) store: BackingStore,
    pub(crate) tlb: T,
    pub(crate) sched: S,
    pub(crate) stores: BackingStoreTable,
    pub(crate) shared: SharedMappingTable,
    pub(crate) frames: FrameTable,
    pub(crate) queue: ReplacementQueue,
    pub(crate) procs: Vec<ProcMemory>,
    pub(crate) stats: PagingStats,
}

impl<S: Scheduler> Pager<S, SoftTlb> {
    /// Pager over an in-memory backing device
    pub fn new(config: PagerConfig, sched: S) -> Result<Self> {
        Self::with_parts(config, sched, Box::new(SparseDevice::new()), SoftTlb::new())
    }
}

impl<S: Scheduler, T: Tlb> Pager<S, T> {
    /// Pager over the given device and translation cache
    pub fn with_parts(
        config: PagerConfig,
        sched: S,
        device: Box<dyn BackingDevice>,
        tlb: T,
    ) -> Result<Self> {
        config.validate()?;
        let mut pager = Self {
            config,
            phys: PhysicalMemory::new(config.frames),
            store: BackingStore::new(device),
            tlb,
            sched,
            stores: BackingStoreTable::new(),
            shared: SharedMappingTable::new(),
            frames: FrameTable::new(config.frames),
            queue: ReplacementQueue::new(config.frames),
            procs: Vec::new(),
            stats: PagingStats::new(),
        };
        pager.init();
        Ok(pager)
    }

    /// Reset every table and rebuild the boot frames
    ///
    /// Frames 0..4 become the global page tables identity-mapping the low
    /// region, frame 4 the null process's directory.
    pub fn init(&mut self) {
        let _spl = spl::disable();
        self.frames.reset();
        self.queue.clear();
        self.stores.reset();
        self.shared.reset();
        self.stats.reset();
        self.procs.clear();
        self.procs.resize(NPROC, ProcMemory::default());
        for f in 0..self.frames.len() {
            self.phys.zero(FrameIndex(f));
        }

        for t in 0..GLOBAL_PAGE_TABLES {
            let pt = FrameIndex(t);
            for idx in 0..ENTRIES_PER_TABLE {
                self.phys.set_pte(pt, idx, PtEntry::new(vpn_of(t, idx), MAPPED));
            }
            self.frames.occupy(pt, FrameClaim::table(Pid::NULL));
            self.frames.add_ref(pt, ENTRIES_PER_TABLE as i32);
        }

        let pd = FrameIndex(NULL_DIRECTORY_FRAME);
        self.install_global_tables(pd);
        self.frames.occupy(pd, FrameClaim::directory(Pid::NULL));
        self.frames.add_ref(pd, GLOBAL_PAGE_TABLES as i32);
        self.procs[Pid::NULL.0].directory = Some(pd);
        self.tlb.invalidate_all();
    }

    /// Point the low directory slots of `pd` at the global tables
    pub(crate) fn install_global_tables(&mut self, pd: FrameIndex) {
        for t in 0..GLOBAL_PAGE_TABLES {
            self.phys.set_pde(pd, t, PdEntry::new(FrameIndex(t).pfn(), MAPPED));
        }
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &S {
        &self.sched
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.sched
    }

    pub fn tlb(&self) -> &T {
        &self.tlb
    }

    /// Swap the backing device, returning the old one
    pub fn replace_device(&mut self, device: Box<dyn BackingDevice>) -> Box<dyn BackingDevice> {
        self.store.replace_device(device)
    }

    /// Toggle logging of every replacement decision
    pub fn set_replacement_trace(&mut self, on: bool) {
        self.config.trace_replacement = on;
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // Process Termination
    // ========================================================================

    /// Tear down `pid`'s memory and retire it with the scheduler
    ///
    /// Safe to call on a process that is already gone.
    pub fn terminate(&mut self, pid: Pid) -> Result<()> {
        if !pid.in_range() {
            return Err(PagingError::BadPid(pid));
        }
        if pid == Pid::NULL {
            return Ok(());
        }
        let _spl = spl::disable();
        if self.procs[pid.0].directory.is_some() {
            self.destroy_address_space(pid)?;
        }
        if self.sched.is_live(pid) {
            kwarn!("pager", "terminating pid {}", pid);
            self.sched.kill(pid);
            self.stats.incr_kills();
        }
        Ok(())
    }

    /// Terminate `pid` after a failed operation; a teardown error is logged
    pub(crate) fn kill_on_failure(&mut self, pid: Pid) {
        if let Err(e) = self.terminate(pid) {
            kwarn!("pager", "teardown of pid {} failed: {}", pid, e);
        }
    }

    // ========================================================================
    // Table Walks
    // ========================================================================

    /// Directory frame of `pid`
    pub(crate) fn directory(&self, pid: Pid) -> Option<FrameIndex> {
        self.procs.get(pid.0).and_then(|p| p.directory)
    }

    /// Page table and index holding the entry for `va`, if the table exists
    pub(crate) fn locate_pte(&self, pid: Pid, va: VirtAddr) -> Option<(FrameIndex, usize)> {
        let pd = self.directory(pid)?;
        let pde = self.phys.pde(pd, va.pd_index());
        if !pde.present() {
            return None;
        }
        let pt = self.phys.frame_of(pde.pfn())?;
        Some((pt, va.pt_index()))
    }

    /// Frame currently mapped at `vpn` for `pid`
    pub(crate) fn resident_frame(&self, pid: Pid, vpn: u32) -> Option<FrameIndex> {
        let (pt, idx) = self.locate_pte(pid, VirtAddr::from_vpn(vpn))?;
        let pte = self.phys.pte(pt, idx);
        if !pte.present() {
            return None;
        }
        self.phys.frame_of(pte.pfn())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Descriptor of frame `idx`
    pub fn frame(&self, idx: usize) -> Option<FrameDescriptor> {
        self.frames.get(FrameIndex(idx)).copied()
    }

    /// Managed frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Unoccupied frames past the reserved prefix
    pub fn free_frames(&self) -> usize {
        self.frames.free_count()
    }

    /// Table entry for `vaddr` in `pid`'s address space
    pub fn pte(&self, pid: Pid, vaddr: u32) -> Option<PtEntry> {
        let (pt, idx) = self.locate_pte(pid, VirtAddr(vaddr))?;
        Some(self.phys.pte(pt, idx))
    }

    /// Replacement queue from the clock hand onwards
    pub fn replacement_order(&self) -> Vec<FrameIndex> {
        self.queue.iter().collect()
    }

    pub fn store_slot(&self, id: StoreId) -> Option<StoreSlot> {
        self.stores.slot(id).copied()
    }

    pub fn shared_mappings(&self) -> Vec<SharedMapping> {
        self.shared.entries().copied().collect()
    }

    /// Memory record of `pid`
    pub fn address_space(&self, pid: Pid) -> Option<&ProcMemory> {
        self.procs.get(pid.0)
    }

    /// Read a store page straight from the backing device
    pub fn read_store_page(&mut self, store: StoreId, page: usize, buf: &mut [u8]) -> Result<()> {
        self.store.read_page(buf, store, page)
    }

    /// Check the cross-table invariants, describing the first violation
    pub fn check_invariants(&self) -> core::result::Result<(), String> {
        for f in 0..RESERVED_FRAMES {
            if !self.frames.get(FrameIndex(f)).is_some_and(|d| d.is_occupied()) {
                return Err(format!("reserved frame {} is free", f));
            }
        }

        for f in self.queue.iter() {
            if !self.frames.get(f).is_some_and(|d| d.is_page()) {
                return Err(format!("queued frame {} is not an occupied data page", f));
            }
        }

        for (f, d) in self.frames.iter().skip(RESERVED_FRAMES) {
            if !d.is_page() {
                continue;
            }
            if !self.is_resident(f) {
                return Err(format!("data frame {} is not mapped by pid {} vpn {:#x}", f, d.owner, d.vpn));
            }
            if !self.queue.contains(f) {
                return Err(format!("resident frame {} missing from the replacement queue", f));
            }
            if d.refcount != 1 {
                return Err(format!("data frame {} has refcount {}", f, d.refcount));
            }
        }

        for (pid, mem) in self.procs.iter().enumerate() {
            let Some(pd) = mem.directory else {
                continue;
            };
            self.check_directory(Pid(pid), pd)?;
            if let Some(heap) = mem.heap {
                let bound = self.stores.slot(heap.store).and_then(StoreSlot::exclusive_owner);
                if bound != Some(Pid(pid)) {
                    return Err(format!("heap store {} of pid {} is not bound to it", heap.store, pid));
                }
            }
        }

        for m in self.shared.entries() {
            if !self.stores.slot(m.store).is_some_and(StoreSlot::is_shared) {
                return Err(format!("mapping of pid {} names non-shared store {}", m.pid, m.store));
            }
        }
        Ok(())
    }

    fn check_directory(&self, pid: Pid, pd: FrameIndex) -> core::result::Result<(), String> {
        let Some(pd_desc) = self.frames.get(pd).filter(|d| d.role == FrameRole::Directory) else {
            return Err(format!("directory of pid {} is frame {} which is not a directory", pid, pd));
        };
        let mut present = 0;
        for pdi in 0..ENTRIES_PER_TABLE {
            let pde = self.phys.pde(pd, pdi);
            if !pde.present() {
                continue;
            }
            present += 1;
            if pdi < GLOBAL_PAGE_TABLES {
                continue;
            }
            let Some(pt) = self.phys.frame_of(pde.pfn()) else {
                return Err(format!("pid {} pde {} points outside the pool", pid, pdi));
            };
            let Some(pt_desc) = self.frames.get(pt).filter(|d| d.role == FrameRole::PageTable && d.is_occupied()) else {
                return Err(format!("pid {} pde {} points at non-table frame {}", pid, pdi, pt));
            };
            let mut mapped = 0;
            for pti in 0..ENTRIES_PER_TABLE {
                let pte = self.phys.pte(pt, pti);
                if !pte.present() {
                    continue;
                }
                mapped += 1;
                let vpn = vpn_of(pdi, pti);
                let ok = self
                    .phys
                    .frame_of(pte.pfn())
                    .and_then(|f| self.frames.get(f))
                    .is_some_and(|d| d.is_page() && d.owner == pid && d.vpn == vpn);
                if !ok {
                    return Err(format!("pid {} vpn {:#x} maps a frame it does not own", pid, vpn));
                }
            }
            if pt_desc.refcount != mapped {
                return Err(format!(
                    "table frame {} of pid {} has refcount {} but {} present entries",
                    pt, pid, pt_desc.refcount, mapped
                ));
            }
        }
        if pd_desc.refcount != present {
            return Err(format!(
                "directory frame {} of pid {} has refcount {} but {} present entries",
                pd, pid, pd_desc.refcount, present
            ));
        }
        Ok(())
    }
}
