//! Integration tests for the simulator workloads

use std::fs;

use demand_pager::paging::vm_param::{PAGE_SIZE, STORE_PAGES};
use demand_pager::StoreId;
use pager_sim::*;
use proptest::prelude::*;
use tempfile::TempDir;

#[test]
fn test_replacement_workload_evicts() {
    let mut pager = new_pager(16, false).unwrap();
    let report = replacement(&mut pager, 64).unwrap();
    assert!(report.stats.evictions > 0);
    assert!(report.stats.write_backs > 0);
    assert_eq!(report.stats.degraded, 0);
    assert_eq!(report.stats.kills, 0);
    pager.check_invariants().unwrap();
}

#[test]
fn test_shared_workload_delivers_message() {
    let mut pager = new_pager(16, false).unwrap();
    let report = shared(&mut pager, StoreId(7), "ping").unwrap();
    assert!(report.lines.iter().any(|l| l.contains("read \"ping\"")));
}

#[test]
fn test_heap_workload_reuses_first_block() {
    let mut pager = new_pager(32, false).unwrap();
    let report = heap(&mut pager, 256, &[4096, 4096, 4096]).unwrap();
    let allocs: Vec<_> = report
        .lines
        .iter()
        .filter(|l| l.starts_with("vgetmem"))
        .collect();
    assert_eq!(allocs.len(), 3);
    assert!(report.lines.iter().any(|l| l.starts_with("free block")));
}

#[test]
fn test_dump_store_to_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store7.bin");

    let mut pager = new_pager(16, false).unwrap();
    shared(&mut pager, StoreId(7), "dumped").unwrap();
    dump_store(&mut pager, StoreId(7), &path).unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(bytes.len(), STORE_PAGES * PAGE_SIZE);
    assert_eq!(&bytes[..6], b"dumped");
    assert!(bytes[PAGE_SIZE..].iter().all(|&b| b == 0));
}

#[test]
fn test_bad_frame_count_rejected() {
    assert!(matches!(new_pager(4, false), Err(SimError::Paging(_))));
    assert!(matches!(new_pager(5000, false), Err(SimError::Paging(_))));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any frame budget that fits the working set verifies every page
    #[test]
    fn replacement_verifies_for_any_budget(frames in 10usize..64, pages in 1u32..96) {
        let mut pager = new_pager(frames, false).unwrap();
        let report = replacement(&mut pager, pages).unwrap();
        prop_assert_eq!(report.stats.kills, 0);
    }
}
