//! Hooks are process-global, so this suite lives in its own test binary
//! and runs as a single test.

use fw_sync::{PreemptGuard, PreemptHooks, SpinLock, install_hooks};
use std::sync::atomic::{AtomicUsize, Ordering};

static DEPTH: AtomicUsize = AtomicUsize::new(0);
static RESTORED: AtomicUsize = AtomicUsize::new(0);

fn disable() -> usize {
    DEPTH.fetch_add(1, Ordering::SeqCst)
}

fn restore(key: usize) {
    let depth = DEPTH.fetch_sub(1, Ordering::SeqCst);
    assert_eq!(depth, key + 1, "restore out of order");
    RESTORED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn guards_nest_and_restore_in_order() {
    // Before installation the guard is inert.
    drop(PreemptGuard::new());
    assert_eq!(DEPTH.load(Ordering::SeqCst), 0);

    assert!(install_hooks(PreemptHooks { disable, restore }));
    assert!(!install_hooks(PreemptHooks { disable, restore }));

    let a = SpinLock::new(1u32);
    let b = SpinLock::new(2u32);
    {
        let ga = a.lock_critical();
        assert_eq!(DEPTH.load(Ordering::SeqCst), 1);
        {
            let gb = b.lock_critical();
            assert_eq!(DEPTH.load(Ordering::SeqCst), 2);
            assert_eq!(*ga + *gb, 3);
        }
        assert_eq!(DEPTH.load(Ordering::SeqCst), 1);
        assert!(a.is_locked());
    }
    assert_eq!(DEPTH.load(Ordering::SeqCst), 0);
    assert_eq!(RESTORED.load(Ordering::SeqCst), 2);
    assert!(!a.is_locked());
}
