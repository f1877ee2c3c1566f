use fw_alloc::{BundleConfig, HeapError, SysHeap, VmHeapConfig, VmHeapRegistry};
use fw_platform::memory::PAGE_SIZE;
use fw_platform::sim::{Arena, SimPageDriver};
use fw_platform::{CoreId, RegionAttribute, RegionTable};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const BASE: usize = 0x4000_0000;

#[test]
fn shared_heap_keeps_pages_consistent_under_contention() {
    let threads = 4;
    let rounds = 500;

    let driver = Arc::new(SimPageDriver::default());
    let table = RegionTable::per_core_layout(BASE, 1, 4 * PAGE_SIZE, 8 * PAGE_SIZE).unwrap();
    let registry = VmHeapRegistry::new(table, Arc::clone(&driver));
    let cfg = VmHeapConfig::new(&[BundleConfig::new(256, 16), BundleConfig::new(1024, 28)]);
    let heap = registry
        .init_heap(Some(&cfg), RegionAttribute::SharedHeap, CoreId::PRIMARY, true)
        .unwrap();
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let heap = Arc::clone(&heap);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for i in 0..rounds {
                    let size = 64 + ((t * 131 + i * 17) % 2048);
                    let Ok(p) = heap.lock_critical().alloc(size) else {
                        continue;
                    };
                    thread::yield_now();
                    heap.lock_critical().free(p).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(heap.lock().is_empty());
    assert_eq!(driver.mapped_pages(), 0);
}

#[test]
fn per_core_heaps_work_independently() {
    let cores = 3;
    let driver = Arc::new(SimPageDriver::default());
    let table = RegionTable::per_core_layout(BASE, cores, 4 * PAGE_SIZE, 0).unwrap();
    let registry = Arc::new(VmHeapRegistry::new(table, Arc::clone(&driver)));
    let cfg = VmHeapConfig::new(&[BundleConfig::new(128, 32), BundleConfig::new(512, 24)]);
    for c in 0..cores {
        registry
            .init_heap(Some(&cfg), RegionAttribute::CoreHeap, CoreId::new(c), false)
            .unwrap();
    }
    let start = Arc::new(Barrier::new(cores));

    let handles: Vec<_> = (0..cores)
        .map(|c| {
            let registry = Arc::clone(&registry);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let heap = registry
                    .get_heap_by_attribute(RegionAttribute::CoreHeap, CoreId::new(c))
                    .unwrap();
                start.wait();
                let mut live = Vec::new();
                for _ in 0..32 {
                    live.push(heap.lock_critical().alloc(100).unwrap());
                }
                assert_eq!(heap.lock_critical().alloc(600), Err(HeapError::OutOfMemory));
                let region = *heap.lock().region();
                assert!(live.iter().all(|p| region.contains(*p)));
                for p in live {
                    heap.lock_critical().free(p).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(driver.mapped_pages(), 0);
}

#[test]
fn racing_inits_register_one_heap() {
    let threads = 6;
    let driver = Arc::new(SimPageDriver::default());
    let table = RegionTable::per_core_layout(BASE, 1, 8 * PAGE_SIZE, 8 * PAGE_SIZE).unwrap();
    let registry = Arc::new(VmHeapRegistry::new(table, driver));
    let winners = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let winners = Arc::clone(&winners);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                match registry.init_heap(None, RegionAttribute::SharedHeap, CoreId::PRIMARY, false) {
                    Ok(_) => {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => assert_eq!(e, HeapError::AlreadyExists),
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn system_heap_under_contention() {
    let threads = 4;
    let arena = Arena::new(64 * 1024).unwrap();
    let heap = Arc::new(unsafe { SysHeap::new("contended", arena.base(), arena.len()) });
    let total = heap.stats().free;
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let heap = Arc::clone(&heap);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for i in 0..1_000 {
                    let size = 16 + (t * 37 + i * 11) % 700;
                    let p = heap.alloc(size, 16).unwrap();
                    heap.free(p).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(heap.is_empty());
    assert_eq!(heap.stats().free, total);
}
