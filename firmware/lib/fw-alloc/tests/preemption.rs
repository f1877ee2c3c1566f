//! Heap locks are only ever taken with preemption deferred.

use fw_alloc::VmHeapRegistry;
use fw_platform::memory::PAGE_SIZE;
use fw_platform::sim::SimPageDriver;
use fw_platform::{CoreId, RegionAttribute, RegionTable};
use fw_sync::{PreemptHooks, install_hooks};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static DEFERRALS: AtomicUsize = AtomicUsize::new(0);
static DEPTH: AtomicUsize = AtomicUsize::new(0);

fn disable() -> usize {
    DEFERRALS.fetch_add(1, Ordering::SeqCst);
    DEPTH.fetch_add(1, Ordering::SeqCst)
}

fn restore(key: usize) {
    assert_eq!(DEPTH.fetch_sub(1, Ordering::SeqCst), key + 1);
}

#[test]
fn registry_lookups_defer_preemption_for_heap_locks() {
    assert!(install_hooks(PreemptHooks { disable, restore }));

    let table = RegionTable::per_core_layout(0x4000_0000, 1, 8 * PAGE_SIZE, 0).unwrap();
    let registry = VmHeapRegistry::new(table, Arc::new(SimPageDriver::default()));
    let heap = registry
        .init_heap(None, RegionAttribute::CoreHeap, CoreId::PRIMARY, false)
        .unwrap();
    let p = heap.lock_critical().alloc(64).unwrap();

    // registry lock plus the heap lock
    let before = DEFERRALS.load(Ordering::SeqCst);
    assert!(registry.find_owner(p).is_some());
    assert_eq!(DEFERRALS.load(Ordering::SeqCst) - before, 2);

    let before = DEFERRALS.load(Ordering::SeqCst);
    assert!(registry
        .get_heap_by_attribute(RegionAttribute::CoreHeap, CoreId::PRIMARY)
        .is_some());
    assert_eq!(DEFERRALS.load(Ordering::SeqCst) - before, 2);

    heap.lock_critical().free(p).unwrap();
    let before = DEFERRALS.load(Ordering::SeqCst);
    registry.free_heap(&heap).unwrap();
    assert!(DEFERRALS.load(Ordering::SeqCst) - before >= 3);
    assert_eq!(DEPTH.load(Ordering::SeqCst), 0);
}
