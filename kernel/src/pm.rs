//! Power management
//!
//! The platform defines [`PM_NUM_MODES`] power modes, mode 0 being the
//! deepest. Peripherals and subsystems veto modes they cannot survive by
//! holding a reference count on them; blocking a mode implicitly blocks
//! every deeper one. The idle thread calls [`set_lowest`], which picks
//! the deepest mode with no blocker at or above it and hands it to the
//! platform.

use crate::arch;
use crate::irq::IrqLock;

/// Number of platform power modes.
pub const PM_NUM_MODES: usize = 4;

/// Per-mode blocker reference counts.
static PM_BLOCKER: IrqLock<[u8; PM_NUM_MODES]> = IrqLock::new([0; PM_NUM_MODES]);

/// Veto a power mode (and implicitly all deeper ones).
///
/// # Panics
///
/// Panics if the mode's reference count would wrap.
pub fn block(mode: usize) {
    PM_BLOCKER.with(|blocker| {
        assert!(blocker[mode] != u8::MAX, "pm: blocker count overflow");
        blocker[mode] += 1;
    });
}

/// Release a veto taken with [`block`].
///
/// # Panics
///
/// Panics if the mode is not blocked; unbalanced unblocks are bugs.
pub fn unblock(mode: usize) {
    PM_BLOCKER.with(|blocker| {
        assert!(blocker[mode] > 0, "pm: unblock of an unblocked mode");
        blocker[mode] -= 1;
    });
}

/// Number of blockers currently holding a mode open.
pub fn blocker_count(mode: usize) -> u8 {
    PM_BLOCKER.with(|blocker| blocker[mode])
}

/// Deepest mode allowed by the current blockers, if any mode is allowed.
pub fn lowest_allowed() -> Option<usize> {
    PM_BLOCKER.with(|blocker| {
        let mut mode = PM_NUM_MODES;
        while mode > 0 && blocker[mode - 1] == 0 {
            mode -= 1;
        }
        if mode == PM_NUM_MODES {
            // Even the lightest mode is vetoed: stay awake.
            None
        } else {
            Some(mode)
        }
    })
}

/// Switch the platform to the deepest allowed power mode. Called by the
/// idle thread; does nothing while every mode is blocked.
pub fn set_lowest() {
    if let Some(mode) = lowest_allowed() {
        log::trace!("pm: entering mode {}", mode);
        arch::pm_set(mode);
    }
}

#[cfg(not(target_os = "none"))]
pub(crate) fn reset() {
    PM_BLOCKER.with(|blocker| *blocker = [0; PM_NUM_MODES]);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn unblocked_system_sleeps_deepest() {
        let _t = testing::lock();
        assert_eq!(lowest_allowed(), Some(0));
        set_lowest();
        assert_eq!(testing::last_pm_mode(), Some(0));
    }

    #[test]
    fn blocking_a_mode_blocks_all_deeper_ones() {
        let _t = testing::lock();
        block(1);
        assert_eq!(lowest_allowed(), Some(2));
        set_lowest();
        assert_eq!(testing::last_pm_mode(), Some(2));
        unblock(1);
    }

    #[test]
    fn blocking_the_lightest_mode_keeps_the_cpu_awake() {
        let _t = testing::lock();
        block(PM_NUM_MODES - 1);
        assert_eq!(lowest_allowed(), None);
        set_lowest();
        assert_eq!(testing::last_pm_mode(), None);
        unblock(PM_NUM_MODES - 1);
    }

    #[test]
    fn counts_balance_out() {
        let _t = testing::lock();
        for _ in 0..5 {
            block(2);
        }
        // While held, mode 2 and deeper are never selected.
        assert_eq!(lowest_allowed(), Some(3));
        for _ in 0..5 {
            unblock(2);
        }
        assert_eq!(blocker_count(2), 0);
        assert_eq!(lowest_allowed(), Some(0));
    }

    #[test]
    #[should_panic(expected = "unblock of an unblocked mode")]
    fn unbalanced_unblock_panics() {
        let _t = testing::lock();
        unblock(0);
    }
}
