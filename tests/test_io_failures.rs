//! Backing-device failures
//!
//! I/O failures during fault resolution or eviction are fatal to the
//! process involved; failures while unmapping are logged and skipped.

use demand_pager::paging::vm_param::{HEAP_BASE_VPN, PAGE_SIZE};
use demand_pager::paging::BackingDevice;
use demand_pager::*;

const HEAP_BASE: u32 = HEAP_BASE_VPN << 12;

/// Device refusing reads, writes or both
struct BrokenDevice {
    reads: bool,
    writes: bool,
}

impl BackingDevice for BrokenDevice {
    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> std::result::Result<(), DeviceError> {
        if self.reads {
            return Err(DeviceError::Medium(offset));
        }
        buf.fill(0);
        Ok(())
    }

    fn write_block(&mut self, offset: usize, _buf: &[u8]) -> std::result::Result<(), DeviceError> {
        if self.writes {
            return Err(DeviceError::Medium(offset));
        }
        Ok(())
    }
}

fn broken(reads: bool, writes: bool) -> Box<BrokenDevice> {
    Box::new(BrokenDevice { reads, writes })
}

fn pager_with_frames(frames: usize) -> Pager<ProcTable> {
    Pager::new(PagerConfig::new().with_frames(frames), ProcTable::new()).unwrap()
}

fn spawn_with_heap(pager: &mut Pager<ProcTable>, pages: usize) -> Pid {
    let pid = pager.scheduler_mut().spawn().unwrap();
    pager.create_address_space(pid).unwrap();
    pager.create_virtual_heap(pid, pages).unwrap();
    pager.scheduler_mut().switch_to(pid).unwrap();
    pid
}

fn owns_frames(pager: &Pager<ProcTable>, pid: Pid) -> bool {
    (0..pager.frame_count())
        .filter_map(|i| pager.frame(i))
        .any(|d| d.is_occupied() && d.owner == pid)
}

#[test]
fn read_failure_kills_faulting_process() {
    let mut pager = pager_with_frames(32);
    let pid = spawn_with_heap(&mut pager, 4);
    pager.replace_device(broken(true, false));

    let err = pager.load_u32(HEAP_BASE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!pager.scheduler().is_live(pid));
    assert!(!owns_frames(&pager, pid));
    assert_eq!(pager.stats().kills, 1);
    pager.check_invariants().unwrap();
}

#[test]
fn eviction_write_back_failure_kills_owner() {
    // Five data frames
    let mut pager = pager_with_frames(12);
    let victim_owner = spawn_with_heap(&mut pager, 16);
    for page in 0..5u32 {
        pager.store_u32(HEAP_BASE + page * PAGE_SIZE as u32, page).unwrap();
    }

    let other = pager.scheduler_mut().spawn().unwrap();
    pager.replace_device(broken(false, true));
    // Building the new directory needs a frame, and every resident page is dirty
    let err = pager.create_address_space(other).unwrap_err();
    assert!(matches!(err, PagingError::WriteBack(_)));
    assert!(!pager.scheduler().is_live(victim_owner));
    assert!(!owns_frames(&pager, victim_owner));
    assert!(pager.scheduler().is_live(other));
    assert!(console::history_contains("write-back of frame"));

    // The owner's frames are free again, so the retry succeeds
    pager.create_address_space(other).unwrap();
    pager.check_invariants().unwrap();
}

#[test]
fn unmap_write_back_failure_is_best_effort() {
    let mut pager = pager_with_frames(32);
    let pid = pager.scheduler_mut().spawn().unwrap();
    pager.create_address_space(pid).unwrap();
    pager.scheduler_mut().switch_to(pid).unwrap();
    pager.xmmap(0x5000, StoreId(2), 2).unwrap();
    pager.store_u32(0x5000 << 12, 1).unwrap();
    pager.store_u32(0x5001 << 12, 2).unwrap();

    pager.replace_device(broken(false, true));
    pager.xmunmap(0x5000).unwrap();

    assert!(pager.shared_mappings().is_empty());
    assert!(pager.scheduler().is_live(pid));
    assert!(console::history_contains("write-back to store 2 failed"));
    assert!(pager
        .replacement_order()
        .iter()
        .all(|f| pager.frame(f.0).unwrap().owner != pid));
    pager.check_invariants().unwrap();
}

#[test]
fn sync_failure_kills_only_the_dirty_mapper() {
    let mut pager = pager_with_frames(32);
    let a = pager.scheduler_mut().spawn().unwrap();
    let b = pager.scheduler_mut().spawn().unwrap();
    for (pid, vpn) in [(a, 0x5000), (b, 0x6000)] {
        pager.create_address_space(pid).unwrap();
        pager.scheduler_mut().switch_to(pid).unwrap();
        pager.xmmap(vpn, StoreId(3), 1).unwrap();
    }
    pager.scheduler_mut().switch_to(a).unwrap();
    pager.store_u32(0x5000 << 12, 0xDEAD).unwrap();

    pager.replace_device(broken(false, true));
    pager.scheduler_mut().switch_to(b).unwrap();
    assert_eq!(pager.load_u32(0x6000 << 12).unwrap(), 0);

    assert!(!pager.scheduler().is_live(a));
    assert!(pager.scheduler().is_live(b));
    assert!(!owns_frames(&pager, a));
    pager.check_invariants().unwrap();
}
