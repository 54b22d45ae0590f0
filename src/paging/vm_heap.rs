//! Virtual Heap Allocator
//!
//! A first-fit free list kept inside the process's own demand-paged heap.
//! Every free block starts with an 8-byte header `{next, len}`; the list
//! head is a header at the very start of the heap whose `next` names the
//! lowest free block. Blocks are kept in address order so a free can merge
//! with both neighbours. All list traffic goes through the MMU as the
//! current process, so touching the list faults heap pages in like any
//! other access.

use alloc::vec::Vec;

use crate::error::{PagingError, Result};
use crate::kern::sched::Scheduler;
use crate::kern::spl;
use crate::paging::address_space::HeapRegion;
use crate::paging::pager::Pager;
use crate::paging::pmap::Tlb;
use crate::paging::vm_param::PAGE_SIZE;

/// Size of a free-block header, and the allocation granule
pub const BLOCK_HEADER: u32 = 8;

/// Round a request up to the allocation granule
pub const fn round_block(n: u32) -> Option<u32> {
    match n.checked_add(BLOCK_HEADER - 1) {
        Some(v) => Some(v & !(BLOCK_HEADER - 1)),
        None => None,
    }
}

/// Write the initial free list into heap page 0
///
/// The list head is followed by one free block covering the rest of the
/// heap.
pub(crate) fn bootstrap_free_list(page: &mut [u8], start_vpn: u32, npages: usize) {
    let base = start_vpn << 12;
    let heap_bytes = (npages * PAGE_SIZE) as u32;
    let words = [base + BLOCK_HEADER, 0, 0, heap_bytes - BLOCK_HEADER];
    for (i, w) in words.iter().enumerate() {
        page[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
}

impl<S: Scheduler, T: Tlb> Pager<S, T> {
    fn current_heap(&self) -> Result<HeapRegion> {
        let pid = self.sched.current();
        self.procs
            .get(pid.0)
            .and_then(|p| p.heap)
            .ok_or(PagingError::NoHeap(pid))
    }

    /// Allocate `nbytes` from the current process's heap
    ///
    /// Returns the virtual address of the block.
    pub fn vgetmem(&mut self, nbytes: u32) -> Result<u32> {
        let _spl = spl::disable();
        let heap = self.current_heap()?;
        if nbytes == 0 {
            return Err(PagingError::BadSize(nbytes));
        }
        let n = round_block(nbytes)
            .filter(|&n| n <= heap.bytes() - BLOCK_HEADER)
            .ok_or(PagingError::HeapExhausted(nbytes))?;

        let mut prev = heap.base();
        let mut cur = self.load_u32(prev)?;
        for _ in 0..heap.max_blocks() {
            if cur == 0 {
                break;
            }
            let next = self.load_u32(cur)?;
            let len = self.load_u32(cur + 4)?;
            if len == n {
                self.store_u32(prev, next)?;
                return Ok(cur);
            }
            if len >= n + BLOCK_HEADER {
                let rest = cur + n;
                self.store_u32(rest, next)?;
                self.store_u32(rest + 4, len - n)?;
                self.store_u32(prev, rest)?;
                return Ok(cur);
            }
            if len > n {
                // A leftover too small for a header goes with the block
                self.store_u32(prev, next)?;
                return Ok(cur);
            }
            prev = cur;
            cur = next;
        }
        Err(PagingError::HeapExhausted(nbytes))
    }

    /// Return `nbytes` at `addr` to the current process's heap
    pub fn vfreemem(&mut self, addr: u32, nbytes: u32) -> Result<()> {
        let _spl = spl::disable();
        let heap = self.current_heap()?;
        if nbytes == 0 {
            return Err(PagingError::BadSize(nbytes));
        }
        let bad = PagingError::BadFree { addr, len: nbytes };
        let n = round_block(nbytes).ok_or(bad)?;
        if addr % BLOCK_HEADER != 0
            || addr < heap.base() + BLOCK_HEADER
            || addr as u64 + n as u64 > heap.end() as u64
        {
            return Err(bad);
        }

        let head = heap.base();
        let mut prev = head;
        let mut next = self.load_u32(head)?;
        let mut steps = 0;
        while next != 0 && next < addr {
            steps += 1;
            if steps > heap.max_blocks() {
                return Err(bad);
            }
            prev = next;
            next = self.load_u32(next)?;
        }

        let prev_top = if prev == head {
            None
        } else {
            Some(prev + self.load_u32(prev + 4)?)
        };
        if prev_top.is_some_and(|top| top > addr) || (next != 0 && addr + n > next) {
            return Err(bad);
        }

        let block = if prev_top == Some(addr) {
            let len = self.load_u32(prev + 4)?;
            self.store_u32(prev + 4, len + n)?;
            prev
        } else {
            self.store_u32(addr, next)?;
            self.store_u32(addr + 4, n)?;
            self.store_u32(prev, addr)?;
            addr
        };

        if next != 0 {
            let len = self.load_u32(block + 4)?;
            if block + len == next {
                let next_len = self.load_u32(next + 4)?;
                let next_next = self.load_u32(next)?;
                self.store_u32(block + 4, len + next_len)?;
                self.store_u32(block, next_next)?;
            }
        }
        Ok(())
    }

    /// Free blocks of the current process's heap as `(addr, len)`
    pub fn heap_free_list(&mut self) -> Result<Vec<(u32, u32)>> {
        let _spl = spl::disable();
        let heap = self.current_heap()?;
        let mut blocks = Vec::new();
        let mut cur = self.load_u32(heap.base())?;
        while cur != 0 && blocks.len() < heap.max_blocks() {
            let len = self.load_u32(cur + 4)?;
            blocks.push((cur, len));
            cur = self.load_u32(cur)?;
        }
        Ok(blocks)
    }
}
