//! Interrupt Priority (spl)
//!
//! Every mutation of the paging tables runs with interrupts suppressed, which
//! on a single core makes each public operation one critical section.
//! `disable()` returns a guard; dropping the outermost guard restores the
//! previous state, so nested critical sections compose.

use core::sync::atomic::{AtomicU32, Ordering};

/// Nesting depth of suppressed sections
static SPL_DEPTH: AtomicU32 = AtomicU32::new(0);

/// Guard for an interrupt-suppressed section
#[must_use = "interrupts are restored when the guard is dropped"]
#[derive(Debug)]
pub struct SplGuard {
    _private: (),
}

/// Suppress interrupts until the returned guard is dropped
pub fn disable() -> SplGuard {
    if SPL_DEPTH.fetch_add(1, Ordering::SeqCst) == 0 {
        // SAFETY: paired with the restore in the outermost guard's drop
        unsafe { disable_interrupts() };
    }
    SplGuard { _private: () }
}

impl Drop for SplGuard {
    fn drop(&mut self) {
        if SPL_DEPTH.fetch_sub(1, Ordering::SeqCst) == 1 {
            // SAFETY: outermost section ends here
            unsafe { enable_interrupts() };
        }
    }
}

/// Whether some critical section is open
pub fn interrupts_disabled() -> bool {
    SPL_DEPTH.load(Ordering::SeqCst) > 0
}

/// Enable interrupts
unsafe fn enable_interrupts() {
    // On hardware:
    // asm!("sti");
}

/// Disable interrupts
unsafe fn disable_interrupts() {
    // On hardware:
    // asm!("cli");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting() {
        let outer = disable();
        {
            let _inner = disable();
            assert!(interrupts_disabled());
        }
        assert!(interrupts_disabled());
        drop(outer);
    }
}
