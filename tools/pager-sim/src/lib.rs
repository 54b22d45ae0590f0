//! pager-sim - Workloads for the demand pager
//!
//! Each workload builds a fresh `Pager`, spawns processes in a `ProcTable`
//! and drives them through the software MMU, returning a report of what
//! happened. `dump_store` writes a backing store to a file.

pub mod error;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use demand_pager::paging::vm_param::{HEAP_BASE_VPN, PAGE_SIZE, STORE_PAGES};
use demand_pager::paging::StatsSnapshot;
use demand_pager::{Pager, PagerConfig, Pid, ProcTable, Scheduler, StoreId};

pub use error::{Result, SimError};

/// Outcome of a workload run
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Human-readable lines describing the run
    pub lines: Vec<String>,
    pub stats: StatsSnapshot,
}

impl Report {
    fn note(&mut self, line: String) {
        self.lines.push(line);
    }
}

/// Build a pager with `frames` managed frames
pub fn new_pager(frames: usize, trace: bool) -> Result<Pager<ProcTable>> {
    let config = PagerConfig::new().with_frames(frames).with_trace(trace);
    Ok(Pager::new(config, ProcTable::new())?)
}

fn spawn(pager: &mut Pager<ProcTable>, heap_pages: Option<usize>) -> Result<Pid> {
    let pid = pager.scheduler_mut().spawn()?;
    pager.create_address_space(pid)?;
    if let Some(pages) = heap_pages {
        pager.create_virtual_heap(pid, pages)?;
    }
    Ok(pid)
}

/// Write every heap page of one process, then read them all back
///
/// With fewer frames than pages this walks the second-chance clock
/// through several laps, writing back each dirty victim.
pub fn replacement(pager: &mut Pager<ProcTable>, pages: u32) -> Result<Report> {
    let mut report = Report::default();
    let pid = spawn(pager, Some(pages as usize))?;
    pager.scheduler_mut().switch_to(pid)?;

    let base = HEAP_BASE_VPN << 12;
    // Page 0 starts with the free-list head and first block header
    let addr = |page: u32| base + page * PAGE_SIZE as u32 + 16;
    for page in 0..pages {
        pager.store_u32(addr(page), 0x5A00_0000 | page)?;
    }
    for page in 0..pages {
        let found = pager.load_u32(addr(page))?;
        let expected = 0x5A00_0000 | page;
        if found != expected {
            return Err(SimError::Mismatch {
                pid,
                vaddr: addr(page),
                expected,
                found,
            });
        }
    }
    report.note(format!(
        "pid {} wrote and verified {} pages through {} frames",
        pid,
        pages,
        pager.frame_count()
    ));
    report.note(format!(
        "replacement order: {:?}",
        pager
            .replacement_order()
            .iter()
            .map(|f| f.0)
            .collect::<Vec<_>>()
    ));
    report.stats = pager.stats();
    Ok(report)
}

/// One process publishes `message` through a shared store, another reads it
pub fn shared(pager: &mut Pager<ProcTable>, store: StoreId, message: &str) -> Result<Report> {
    let mut report = Report::default();
    let writer = spawn(pager, None)?;
    let reader = spawn(pager, None)?;
    let (writer_vpn, reader_vpn) = (0x6000, 0x7000);

    pager.scheduler_mut().switch_to(writer)?;
    pager.xmmap(writer_vpn, store, 1)?;
    pager.scheduler_mut().switch_to(reader)?;
    pager.xmmap(reader_vpn, store, 1)?;

    pager.scheduler_mut().switch_to(writer)?;
    pager.write_bytes(writer_vpn << 12, message.as_bytes())?;
    pager.xmunmap(writer_vpn)?;
    report.note(format!("pid {} wrote {:?} and unmapped", writer, message));

    pager.scheduler_mut().switch_to(reader)?;
    let mut buf = vec![0u8; message.len()];
    pager.read_bytes(reader_vpn << 12, &mut buf)?;
    let seen = String::from_utf8_lossy(&buf).into_owned();
    if seen != message {
        return Err(SimError::SharedMismatch(seen));
    }
    report.note(format!("pid {} read {:?}", reader, seen));
    report.stats = pager.stats();
    Ok(report)
}

/// Allocate `sizes` from a fresh heap, free every other block, report the list
pub fn heap(pager: &mut Pager<ProcTable>, heap_pages: usize, sizes: &[u32]) -> Result<Report> {
    let mut report = Report::default();
    let pid = spawn(pager, Some(heap_pages))?;
    pager.scheduler_mut().switch_to(pid)?;

    let mut blocks = Vec::new();
    for &size in sizes {
        let addr = pager.vgetmem(size)?;
        report.note(format!("vgetmem({}) = {:#010x}", size, addr));
        blocks.push((addr, size));
    }
    for &(addr, size) in blocks.iter().step_by(2) {
        pager.vfreemem(addr, size)?;
        report.note(format!("vfreemem({:#010x}, {})", addr, size));
    }
    for (addr, len) in pager.heap_free_list()? {
        report.note(format!("free block {:#010x} len {}", addr, len));
    }
    report.stats = pager.stats();
    Ok(report)
}

/// Write all pages of `store` to `path`
pub fn dump_store(pager: &mut Pager<ProcTable>, store: StoreId, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    let mut page = vec![0u8; PAGE_SIZE];
    for idx in 0..STORE_PAGES {
        pager.read_store_page(store, idx, &mut page)?;
        file.write_all(&page)?;
    }
    Ok(())
}

/// Whether `pid` is still alive in the pager's process table
pub fn is_live(pager: &Pager<ProcTable>, pid: Pid) -> bool {
    pager.scheduler().is_live(pid)
}
