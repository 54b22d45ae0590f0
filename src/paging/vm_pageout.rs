//! Page Replacement
//!
//! Second-chance (clock) replacement over resident data pages. The
//! replacement queue is a circular doubly-linked list threaded through an
//! arena indexed by frame; the head is the clock hand.
//!
//! ## Eviction
//!
//! Starting at the hand, a frame whose accessed bit is clear is the victim;
//! a frame whose bit is set has it cleared and is passed over. The scan
//! stops after `2 * len + slack` steps. Should that ever happen, a linear
//! scan over resident pages picks a victim regardless of its accessed bit
//! and the event is logged and counted as degraded.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{PagingError, Result};
use crate::kern::sched::Scheduler;
use crate::kern::spl;
use crate::paging::pager::Pager;
use crate::paging::pmap::{EntryFlags, PdEntry, PtEntry, Tlb};
use crate::paging::vm_page::{FrameClaim, FrameRole};
use crate::paging::vm_param::VirtAddr;
use crate::types::{FrameIndex, Pid};
use crate::{kinfo, kwarn};

// ============================================================================
// Replacement Queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    next: usize,
    prev: usize,
}

/// Verdict of the victim probe on one queue member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Recently used; its bit was cleared, pass it over
    Referenced,
    /// Not recently used; take it
    Victim,
    /// Not a candidate at all
    Skip,
}

/// Circular second-chance queue of frame indices
#[derive(Debug, Clone)]
pub struct ReplacementQueue {
    links: Vec<Option<Link>>,
    head: Option<usize>,
    len: usize,
}

impl ReplacementQueue {
    /// Empty queue over `nframes` frames
    pub fn new(nframes: usize) -> Self {
        Self {
            links: vec![None; nframes],
            head: None,
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.links.fill(None);
        self.head = None;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, f: FrameIndex) -> bool {
        matches!(self.links.get(f.0), Some(Some(_)))
    }

    /// Current clock hand
    pub fn head(&self) -> Option<FrameIndex> {
        self.head.map(FrameIndex)
    }

    /// Append `f` behind the hand; false if already queued or out of range
    pub fn push(&mut self, f: FrameIndex) -> bool {
        if f.0 >= self.links.len() || self.contains(f) {
            return false;
        }
        match self.head {
            None => {
                self.links[f.0] = Some(Link { next: f.0, prev: f.0 });
                self.head = Some(f.0);
            }
            Some(h) => {
                let Some(head_link) = self.links[h] else {
                    return false;
                };
                let tail = head_link.prev;
                self.links[f.0] = Some(Link { next: h, prev: tail });
                if let Some(l) = self.links[tail].as_mut() {
                    l.next = f.0;
                }
                if let Some(l) = self.links[h].as_mut() {
                    l.prev = f.0;
                }
            }
        }
        self.len += 1;
        true
    }

    /// Unlink `f`; false if it was not queued
    pub fn remove(&mut self, f: FrameIndex) -> bool {
        let Some(link) = self.links.get_mut(f.0).and_then(Option::take) else {
            return false;
        };
        self.len -= 1;
        if self.len == 0 {
            self.head = None;
            return true;
        }
        if let Some(l) = self.links[link.prev].as_mut() {
            l.next = link.next;
        }
        if let Some(l) = self.links[link.next].as_mut() {
            l.prev = link.prev;
        }
        if self.head == Some(f.0) {
            self.head = Some(link.next);
        }
        true
    }

    /// Members from the hand onwards
    pub fn iter(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        let mut cursor = self.head;
        (0..self.len).filter_map(move |_| {
            let at = cursor?;
            cursor = self.links[at].map(|l| l.next);
            Some(FrameIndex(at))
        })
    }

    /// Run the clock for at most `bound` steps
    ///
    /// The hand follows the cursor and ends just past the victim. The
    /// victim stays queued; the caller removes it.
    pub fn select_victim<F>(&mut self, bound: usize, mut probe: F) -> Option<FrameIndex>
    where
        F: FnMut(FrameIndex) -> Probe,
    {
        let mut cursor = self.head?;
        for _ in 0..bound {
            let next = self.links[cursor]?.next;
            let verdict = probe(FrameIndex(cursor));
            self.head = Some(next);
            if verdict == Probe::Victim {
                return Some(FrameIndex(cursor));
            }
            cursor = next;
        }
        None
    }
}

// ============================================================================
// Frame Acquisition and Release
// ============================================================================

impl<S: Scheduler, T: Tlb> Pager<S, T> {
    /// Obtain a frame for `claim`, evicting a resident page if none is free
    ///
    /// The frame is marked occupied before this returns, with reference
    /// count zero; it is not in the replacement queue.
    pub fn get_frame(&mut self, claim: FrameClaim) -> Result<FrameIndex> {
        let _spl = spl::disable();
        let f = match self.frames.claim_free_frame() {
            Some(f) => f,
            None => self.evict_one()?,
        };
        self.frames.occupy(f, claim);
        Ok(f)
    }

    /// Pick a victim, write it back if dirty, and unmap it
    ///
    /// The returned frame is free. If the write-back fails the victim's
    /// owner is terminated and the call fails.
    pub fn evict_one(&mut self) -> Result<FrameIndex> {
        let _spl = spl::disable();
        let victim = match self.select_by_clock() {
            Some(f) => f,
            None => self.select_degraded().ok_or(PagingError::NoFrame)?,
        };
        let Some(desc) = self.frames.get(victim).copied() else {
            return Err(PagingError::BadFrame(victim.0));
        };

        if self.config.trace_replacement {
            kinfo!(
                "pageout",
                "replacing frame {} (pfn {}) pid {} vpn {:#x}",
                victim,
                victim.pfn(),
                desc.owner,
                desc.vpn
            );
        }

        if self.is_dirty(victim) {
            if let Err(e) = self.write_back_frame(victim) {
                kwarn!(
                    "pageout",
                    "write-back of frame {} for pid {} failed: {}",
                    victim,
                    desc.owner,
                    e
                );
                self.kill_on_failure(desc.owner);
                return Err(PagingError::WriteBack(victim));
            }
        }

        self.release_page(victim);
        self.stats.incr_evictions();
        Ok(victim)
    }

    fn select_by_clock(&mut self) -> Option<FrameIndex> {
        let bound = 2 * self.queue.len() + self.config.scan_slack;
        let Self {
            queue,
            frames,
            phys,
            procs,
            stats,
            ..
        } = self;
        queue.select_victim(bound, |f| {
            let Some(desc) = frames.get(f).filter(|d| d.is_page()) else {
                return Probe::Skip;
            };
            let Some(pd) = procs.get(desc.owner.0).and_then(|p| p.directory) else {
                return Probe::Skip;
            };
            let va = VirtAddr::from_vpn(desc.vpn);
            let pde = phys.pde(pd, va.pd_index());
            let Some(pt) = pde.present().then(|| phys.frame_of(pde.pfn())).flatten() else {
                return Probe::Skip;
            };
            let mut pte = phys.pte(pt, va.pt_index());
            if !pte.present() || pte.pfn() != f.pfn() {
                return Probe::Skip;
            }
            if pte.accessed() {
                pte.set_accessed(false);
                phys.set_pte(pt, va.pt_index(), pte);
                stats.incr_second_chances();
                Probe::Referenced
            } else {
                Probe::Victim
            }
        })
    }

    fn select_degraded(&mut self) -> Option<FrameIndex> {
        let victim = self
            .frames
            .iter()
            .filter(|(f, d)| !self.frames.is_reserved(*f) && d.is_page())
            .map(|(f, _)| f)
            .find(|&f| self.is_resident(f))?;
        kwarn!(
            "pageout",
            "second-chance scan found no victim; taking frame {} unconditionally",
            victim
        );
        self.stats.incr_degraded();
        Some(victim)
    }

    /// Return a frame to the pool
    pub fn free_frame(&mut self, f: FrameIndex) -> Result<()> {
        let _spl = spl::disable();
        if f.0 >= self.frames.len() || self.frames.is_reserved(f) {
            return Err(PagingError::BadFrame(f.0));
        }
        self.queue.remove(f);
        self.frames.clear(f);
        Ok(())
    }

    /// Make a data frame eligible for replacement
    pub fn enqueue_for_replacement(&mut self, f: FrameIndex) {
        let _spl = spl::disable();
        if self.frames.get(f).is_some_and(|d| d.is_page()) {
            self.queue.push(f);
        }
    }

    /// Whether a data frame holds modifications not yet in its store
    pub(crate) fn is_dirty(&self, f: FrameIndex) -> bool {
        let shadow = self.frames.get(f).is_some_and(|d| d.dirty);
        shadow || self.frame_pte(f).is_some_and(|(_, _, pte)| pte.dirty())
    }

    /// Whether a data frame is mapped by its owner's page table
    pub(crate) fn is_resident(&self, f: FrameIndex) -> bool {
        self.frame_pte(f).is_some_and(|(_, _, pte)| pte.present())
    }

    /// Page table, index and entry mapping a data frame
    pub(crate) fn frame_pte(&self, f: FrameIndex) -> Option<(FrameIndex, usize, PtEntry)> {
        let desc = self.frames.get(f).filter(|d| d.is_page())?;
        let va = VirtAddr::from_vpn(desc.vpn);
        let (pt, idx) = self.locate_pte(desc.owner, va)?;
        let pte = self.phys.pte(pt, idx);
        (pte.present() && pte.pfn() == f.pfn()).then_some((pt, idx, pte))
    }

    /// Copy a data frame to the store page backing it
    ///
    /// The owner's shared mappings take precedence over its heap store.
    pub fn write_back_frame(&mut self, f: FrameIndex) -> Result<()> {
        let desc = self
            .frames
            .get(f)
            .copied()
            .filter(|d| d.is_page())
            .ok_or(PagingError::BadFrame(f.0))?;
        let va = VirtAddr::from_vpn(desc.vpn);
        let (store, page) = self
            .shared
            .lookup_shared(desc.owner, va)
            .or_else(|| self.stores.lookup_exclusive(desc.owner, va))
            .ok_or(PagingError::NotMapped(desc.vpn))?;

        self.store.write_page(self.phys.frame(f), store, page)?;

        if let Some((pt, idx, mut pte)) = self.frame_pte(f) {
            pte.set_dirty(false);
            self.phys.set_pte(pt, idx, pte);
        }
        if let Some(d) = self.frames.get_mut(f) {
            d.dirty = false;
        }
        self.stats.incr_write_backs();
        Ok(())
    }

    /// Unmap a data frame from its owner and free it
    pub(crate) fn release_page(&mut self, f: FrameIndex) {
        self.unmap_resident(f);
        self.queue.remove(f);
        self.frames.clear(f);
    }

    /// Clear the entry mapping a data frame and drop the table reference
    ///
    /// A table whose count reaches zero is freed and its directory entry
    /// cleared.
    fn unmap_resident(&mut self, f: FrameIndex) {
        let Some(desc) = self.frames.get(f).copied() else {
            return;
        };
        let Some((pt, idx, _)) = self.frame_pte(f) else {
            return;
        };
        self.phys.set_pte(pt, idx, PtEntry::new(0, EntryFlags::WRITE));

        let va = VirtAddr::from_vpn(desc.vpn);
        if desc.owner == self.sched.current() {
            self.tlb.invalidate(va.0);
        }

        if self.frames.add_ref(pt, -1) == 0 {
            self.retire_table(desc.owner, va.pd_index(), pt);
        }
    }

    /// Free an empty page table and clear its directory entry
    pub(crate) fn retire_table(&mut self, pid: Pid, pd_index: usize, pt: FrameIndex) {
        if self.frames.get(pt).map(|d| d.role) != Some(FrameRole::PageTable) {
            return;
        }
        self.frames.clear(pt);
        if let Some(pd) = self.directory(pid) {
            self.phys.set_pde(pd, pd_index, PdEntry::zero());
            self.frames.add_ref(pd, -1);
        }
    }
}
