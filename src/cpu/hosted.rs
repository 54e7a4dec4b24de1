//! Hosted stand-in for the CPU services
//!
//! Compiled for anything that is not a bare-metal ARM target, which in
//! practice means the unit-test build on the development machine. The
//! interrupt mask is emulated so the masking discipline of the portable
//! code holds up; exceptions do not exist, so the deferred context switch
//! is a no-op and nothing ever actually switches. End-to-end scheduling
//! behavior is covered by the in-kernel selftests instead.
//!
//! The test harness runs tests on parallel std threads, so the emulated
//! mask is per test thread while anything that actually excludes (the
//! critical-section implementation) uses a real shared flag.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::thread;

pub const STACK_ALIGN: usize = 8;


#[cfg(not(test))]
mod mask {
    use core::sync::atomic::{AtomicU32, Ordering};

    static PRIMASK: AtomicU32 = AtomicU32::new(0);

    pub fn get() -> u32 {
        PRIMASK.load(Ordering::SeqCst)
    }

    pub fn set(primask: u32) {
        PRIMASK.store(primask, Ordering::SeqCst);
    }
}

pub fn intr_disable() {
    mask::set(1);
}

pub fn intr_enable() {
    mask::set(0);
}

pub fn intr_save() -> u32 {
    let primask = mask::get();
    intr_disable();
    primask
}

pub fn intr_restore(primask: u32) {
    mask::set(primask);
}

pub fn intr_enabled() -> bool {
    mask::get() == 0
}

pub fn idle() {
    core::hint::spin_loop();
}

pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

pub fn raise_svcall() {
    panic!("cpu: error: scheduling requires the target");
}

/// Deferred switches cannot be emulated without exceptions; the request is
/// simply dropped.
pub fn raise_pendsv() {}

pub(super) fn nvic_irq_enable(_irq: u32) {}

pub fn led_set(_on: bool) {}

/// Mirror the target's frame size checks without forging anything; the
/// produced stack pointer is never dispatched on the host.
pub fn stack_forge(stack: *mut u8, size: usize, _f: thread::ThreadFn, _arg: *mut ()) -> *mut u8 {
    assert!(stack as usize % STACK_ALIGN == 0);

    const FRAME_SIZE: usize = 16 * 4;

    if size <= FRAME_SIZE {
        panic!("cpu: error: stack too small");
    }

    // SAFETY: size was validated against the frame size above.
    unsafe { stack.add(size - FRAME_SIZE) }
}

struct HostedCriticalSection;

critical_section::set_impl!(HostedCriticalSection);

static CS_LOCK: AtomicBool = AtomicBool::new(false);

// Kernel code never nests critical sections, so a single flag suffices.
unsafe impl critical_section::Impl for HostedCriticalSection {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        let primask = intr_save();
        while CS_LOCK
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        primask
    }

    unsafe fn release(primask: critical_section::RawRestoreState) {
        CS_LOCK.store(false, Ordering::Release);
        intr_restore(primask);
    }
}
