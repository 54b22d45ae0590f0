//! Shared mapping (xmmap) behaviour
//!
//! Two or more processes map the same store at different virtual pages and
//! observe each other's writes through the publish/invalidate protocol.

use demand_pager::paging::StoreSlot;
use demand_pager::*;

const A_VPN: u32 = 0x6000;
const B_VPN: u32 = 0x7000;
const STORE: StoreId = StoreId(4);

fn pager() -> Pager<ProcTable> {
    Pager::new(PagerConfig::new().with_frames(48), ProcTable::new()).unwrap()
}

fn spawn(pager: &mut Pager<ProcTable>) -> Pid {
    let pid = pager.scheduler_mut().spawn().unwrap();
    pager.create_address_space(pid).unwrap();
    pid
}

fn map(pager: &mut Pager<ProcTable>, pid: Pid, vpn: u32, npages: usize) {
    pager.scheduler_mut().switch_to(pid).unwrap();
    pager.xmmap(vpn, STORE, npages).unwrap();
}

fn read(pager: &mut Pager<ProcTable>, pid: Pid, vaddr: u32, len: usize) -> Vec<u8> {
    pager.scheduler_mut().switch_to(pid).unwrap();
    let mut buf = vec![0u8; len];
    pager.read_bytes(vaddr, &mut buf).unwrap();
    buf
}

fn write(pager: &mut Pager<ProcTable>, pid: Pid, vaddr: u32, data: &[u8]) {
    pager.scheduler_mut().switch_to(pid).unwrap();
    pager.write_bytes(vaddr, data).unwrap();
}

#[test]
fn duplicate_start_rejected() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    map(&mut pager, a, A_VPN, 4);
    assert_eq!(
        pager.xmmap(A_VPN, STORE, 4),
        Err(PagingError::AlreadyMapped(A_VPN))
    );
    pager.xmmap(A_VPN + 4, STORE, 4).unwrap();
    assert_eq!(pager.shared_mappings().len(), 2);
    assert_eq!(pager.store_slot(STORE), Some(StoreSlot::Shared));
}

#[test]
fn xmmap_rejects_bad_arguments() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    pager.create_virtual_heap(a, 8).unwrap();
    pager.scheduler_mut().switch_to(a).unwrap();

    assert_eq!(pager.xmmap(100, STORE, 1), Err(PagingError::LowRegion(100)));
    assert_eq!(pager.xmmap(A_VPN, StoreId(8), 1), Err(PagingError::BadStore(8)));
    assert_eq!(pager.xmmap(A_VPN, STORE, 0), Err(PagingError::BadPageCount(0)));
    // The heap store is bound exclusively
    let heap = pager.address_space(a).unwrap().heap.unwrap();
    assert_eq!(
        pager.xmmap(A_VPN, heap.store, 1),
        Err(PagingError::StoreInUse(heap.store))
    );
    // Overlapping the heap range
    assert_eq!(
        pager.xmmap(heap.start_vpn + 2, STORE, 1),
        Err(PagingError::AlreadyMapped(heap.start_vpn + 2))
    );
    assert!(pager.shared_mappings().is_empty());
    assert_eq!(pager.store_slot(STORE), Some(StoreSlot::Free));
}

#[test]
fn unmap_publishes_to_other_mapper() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    let b = spawn(&mut pager);
    map(&mut pager, a, A_VPN, 2);
    map(&mut pager, b, B_VPN, 2);

    write(&mut pager, a, (A_VPN + 1) << 12, b"from a");
    pager.xmunmap(A_VPN + 1).unwrap();
    assert_eq!(pager.shared_mappings().len(), 1);
    assert_eq!(pager.store_slot(STORE), Some(StoreSlot::Shared));

    assert_eq!(read(&mut pager, b, (B_VPN + 1) << 12, 6), b"from a");
    pager.check_invariants().unwrap();
}

#[test]
fn publish_drops_stale_clean_copies() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    let b = spawn(&mut pager);
    map(&mut pager, a, A_VPN, 1);
    map(&mut pager, b, B_VPN, 1);

    // B holds a clean copy before A writes
    assert_eq!(read(&mut pager, b, B_VPN << 12, 4), [0, 0, 0, 0]);
    assert!(pager.pte(b, B_VPN << 12).unwrap().present());

    write(&mut pager, a, A_VPN << 12, b"new!");
    pager.scheduler_mut().switch_to(a).unwrap();
    pager.xmunmap(A_VPN).unwrap();

    // B's only entry went, taking its page table with it
    assert!(pager.pte(b, B_VPN << 12).is_none());
    assert_eq!(pager.stats().invalidations, 1);
    assert_eq!(read(&mut pager, b, B_VPN << 12, 4), b"new!");
}

#[test]
fn fault_by_other_mapper_publishes_dirty_copy() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    let b = spawn(&mut pager);
    map(&mut pager, a, A_VPN, 1);
    map(&mut pager, b, B_VPN, 1);

    write(&mut pager, a, A_VPN << 12, b"live");
    assert_eq!(read(&mut pager, b, B_VPN << 12, 4), b"live");
    // A's copy was written back and is clean now
    let pte = pager.pte(a, A_VPN << 12).unwrap();
    assert!(pte.present());
    assert!(!pte.dirty());
    assert!(pager.stats().write_backs >= 1);
    pager.check_invariants().unwrap();
}

#[test]
fn clean_copy_refreshed_on_next_fault() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    let b = spawn(&mut pager);
    map(&mut pager, a, A_VPN, 1);
    map(&mut pager, b, B_VPN, 1);

    assert_eq!(read(&mut pager, a, A_VPN << 12, 2), [0, 0]);
    write(&mut pager, b, B_VPN << 12, b"hi");
    // A third mapper's fault publishes B and drops A's clean copy
    let c = spawn(&mut pager);
    map(&mut pager, c, A_VPN, 1);
    assert_eq!(read(&mut pager, c, A_VPN << 12, 2), b"hi");
    assert!(pager.pte(a, A_VPN << 12).map_or(true, |e| !e.present()));
    assert_eq!(read(&mut pager, a, A_VPN << 12, 2), b"hi");
}

#[test]
fn last_unmap_frees_store() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    let b = spawn(&mut pager);
    map(&mut pager, a, A_VPN, 3);
    map(&mut pager, b, B_VPN, 3);
    write(&mut pager, b, B_VPN << 12, b"x");

    pager.scheduler_mut().switch_to(a).unwrap();
    pager.xmunmap(A_VPN + 2).unwrap();
    assert_eq!(pager.store_slot(STORE), Some(StoreSlot::Shared));
    assert_eq!(pager.xmunmap(A_VPN), Err(PagingError::NotMapped(A_VPN)));

    pager.scheduler_mut().switch_to(b).unwrap();
    pager.xmunmap(B_VPN).unwrap();
    assert_eq!(pager.store_slot(STORE), Some(StoreSlot::Free));
    assert!(pager.pte(b, B_VPN << 12).map_or(true, |e| !e.present()));
    assert_eq!(
        (0..pager.frame_count())
            .filter_map(|i| pager.frame(i))
            .filter(|d| d.is_page() && d.owner == b)
            .count(),
        0
    );

    // The published page is still in the store
    let mut page = vec![0u8; 4096];
    pager.read_store_page(STORE, 0, &mut page).unwrap();
    assert_eq!(page[0], b'x');
    pager.check_invariants().unwrap();
}

#[test]
fn unmapped_range_faults_as_illegal() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    map(&mut pager, a, A_VPN, 1);
    pager.store_u32(A_VPN << 12, 5).unwrap();
    pager.xmunmap(A_VPN).unwrap();

    assert!(matches!(
        pager.load_u32(A_VPN << 12),
        Err(PagingError::IllegalAccess { .. })
    ));
    assert!(!pager.scheduler().is_live(a));
}

#[test]
fn terminated_writer_publishes_to_other_mapper() {
    let mut pager = pager();
    let a = spawn(&mut pager);
    let b = spawn(&mut pager);
    map(&mut pager, a, A_VPN, 1);
    map(&mut pager, b, B_VPN, 1);

    assert_eq!(read(&mut pager, b, B_VPN << 12, 4), [0, 0, 0, 0]);
    write(&mut pager, a, A_VPN << 12, b"new!");
    pager.terminate(a).unwrap();

    // B's clean copy went stale with the write-back and was dropped
    assert!(pager.pte(b, B_VPN << 12).map_or(true, |e| !e.present()));
    assert_eq!(read(&mut pager, b, B_VPN << 12, 4), b"new!");
    assert_eq!(pager.store_slot(STORE), Some(StoreSlot::Shared));
    assert_eq!(pager.shared_mappings().len(), 1);
    pager.check_invariants().unwrap();
}
