//! Software MMU
//!
//! Loads and stores on behalf of the current process. Translation walks the
//! directory and table held in the frame arena and sets the accessed bit,
//! plus the dirty bit on a store, the way the hardware walker does. A
//! missing entry raises a page fault and the access is retried.

use crate::error::{PagingError, Result};
use crate::kern::sched::Scheduler;
use crate::kern::spl;
use crate::paging::pager::Pager;
use crate::paging::pmap::Tlb;
use crate::paging::vm_param::{VirtAddr, PAGE_SIZE};
use crate::types::{FrameIndex, Pid};

/// Faults one access may raise before the process is given up on
const MAX_FAULT_RETRIES: usize = 3;

impl<S: Scheduler, T: Tlb> Pager<S, T> {
    /// Walk the tables for `va`; `None` means the access faults
    fn walk(&mut self, pid: Pid, va: VirtAddr, write: bool) -> Option<FrameIndex> {
        let pd = self.directory(pid)?;
        let mut pde = self.phys.pde(pd, va.pd_index());
        if !pde.present() {
            return None;
        }
        let pt = self.phys.frame_of(pde.pfn())?;
        let mut pte = self.phys.pte(pt, va.pt_index());
        if !pte.present() {
            return None;
        }
        let f = self.phys.frame_of(pte.pfn())?;

        pde.set_accessed(true);
        self.phys.set_pde(pd, va.pd_index(), pde);
        pte.set_accessed(true);
        if write {
            pte.set_dirty(true);
        }
        self.phys.set_pte(pt, va.pt_index(), pte);
        Some(f)
    }

    /// Frame holding `va` for the current process, faulting it in if needed
    fn translate(&mut self, va: VirtAddr, write: bool) -> Result<FrameIndex> {
        if va.is_low_region() {
            return Err(PagingError::KernelRegion(va.0));
        }
        let pid = self.sched.current();
        for _ in 0..MAX_FAULT_RETRIES {
            if let Some(f) = self.walk(pid, va, write) {
                return Ok(f);
            }
            self.fault(va.0)?;
        }
        self.kill_on_failure(pid);
        Err(PagingError::FaultLoop(va.0))
    }

    /// Copy `buf.len()` bytes starting at `vaddr` into `buf`
    pub fn read_bytes(&mut self, vaddr: u32, buf: &mut [u8]) -> Result<()> {
        let _spl = spl::disable();
        let mut done = 0;
        while done < buf.len() {
            let va = VirtAddr(vaddr.wrapping_add(done as u32));
            let chunk = (PAGE_SIZE - va.offset()).min(buf.len() - done);
            let f = self.translate(va, false)?;
            buf[done..done + chunk]
                .copy_from_slice(&self.phys.frame(f)[va.offset()..va.offset() + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Copy `data` to the current process's memory at `vaddr`
    pub fn write_bytes(&mut self, vaddr: u32, data: &[u8]) -> Result<()> {
        let _spl = spl::disable();
        let mut done = 0;
        while done < data.len() {
            let va = VirtAddr(vaddr.wrapping_add(done as u32));
            let chunk = (PAGE_SIZE - va.offset()).min(data.len() - done);
            let f = self.translate(va, true)?;
            self.phys.frame_mut(f)[va.offset()..va.offset() + chunk]
                .copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Load a little-endian word
    pub fn load_u32(&mut self, vaddr: u32) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read_bytes(vaddr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Store a little-endian word
    pub fn store_u32(&mut self, vaddr: u32, value: u32) -> Result<()> {
        self.write_bytes(vaddr, &value.to_le_bytes())
    }
}
