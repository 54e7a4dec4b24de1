//! CPU services
//!
//! Interrupt control, IRQ handler registration and the context-switch
//! plumbing. The real implementation targets ARMv7-M (PRIMASK masking,
//! PendSV/SVCall two-phase switching, NVIC); any other target gets a hosted
//! stand-in that emulates the interrupt mask so the portable kernel code can
//! be exercised by unit tests on the build machine.
//!
//! The board support crate owns the vector table and points the PendSV,
//! SVCall, fault and SysTick entries at the handlers exported here, and the
//! external interrupt entries at `cpu_irq_main`.

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod armv7m;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use armv7m::{
    STACK_ALIGN, halt, idle, intr_disable, intr_enable, intr_enabled, intr_restore, intr_save,
    led_set, raise_pendsv, raise_svcall, stack_forge,
};
#[cfg(all(target_arch = "arm", target_os = "none"))]
use armv7m::nvic_irq_enable;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod hosted;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use hosted::{
    STACK_ALIGN, halt, idle, intr_disable, intr_enable, intr_enabled, intr_restore, intr_save,
    led_set, raise_pendsv, raise_svcall, stack_forge,
};
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
use hosted::nvic_irq_enable;

use spinning_top::Spinlock;

use crate::thread;

/// External interrupt lines after the 16 system exceptions.
pub const NR_IRQS: usize = 240;

/// IRQ handler functions run with interrupts and preemption disabled.
pub type IrqHandlerFn = fn(*mut ());

#[derive(Clone, Copy)]
struct IrqHandler {
    handler: Option<IrqHandlerFn>,
    arg: *mut (),
}

struct IrqTable([IrqHandler; NR_IRQS]);

// The opaque handler arguments are only ever used on the single core.
unsafe impl Send for IrqTable {}

const NO_HANDLER: IrqHandler = IrqHandler {
    handler: None,
    arg: core::ptr::null_mut(),
};

static IRQ_HANDLERS: Spinlock<IrqTable> = Spinlock::new(IrqTable([NO_HANDLER; NR_IRQS]));

/// RAII guard that disables interrupts and restores the previous mask on
/// drop, so the mask survives early returns.
pub struct IrqGuard {
    primask: u32,
}

impl IrqGuard {
    #[inline]
    pub fn new() -> Self {
        Self {
            primask: intr_save(),
        }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    #[inline]
    fn drop(&mut self) {
        intr_restore(self.primask);
    }
}

/// Run a closure with interrupts disabled.
#[inline]
pub fn with_irqs_disabled<T, F: FnOnce() -> T>(f: F) -> T {
    let _guard = IrqGuard::new();
    f()
}

/// Register an IRQ handler and unmask the line.
///
/// At most one handler per line; registering twice is a caller bug.
pub fn irq_register(irq: u32, handler: IrqHandlerFn, arg: *mut ()) {
    assert!((irq as usize) < NR_IRQS);

    let primask = thread::preempt_disable_intr_save();

    {
        let mut table = IRQ_HANDLERS.lock();
        let entry = &mut table.0[irq as usize];
        assert!(entry.handler.is_none(), "cpu: error: irq {} already registered", irq);
        *entry = IrqHandler {
            handler: Some(handler),
            arg,
        };
    }

    nvic_irq_enable(irq);

    thread::preempt_enable_intr_restore(primask);
}

/// Dispatch an external interrupt to its registered handler.
///
/// Called from the IRQ entry path with interrupts and preemption disabled.
/// An interrupt without a handler is fatal.
pub(crate) fn irq_dispatch(irq: u32) {
    let entry = {
        let table = IRQ_HANDLERS.lock();
        table.0[irq as usize]
    };

    match entry.handler {
        Some(handler) => handler(entry.arg),
        None => panic!("cpu: error: invalid handler for irq {}", irq),
    }
}

pub(crate) fn setup() {
    // The handler table is statically initialized; nothing to do yet on
    // either implementation, but the setup step keeps the boot sequence
    // uniform across modules.
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_irq_guard_restores_mask() {
        assert!(intr_enabled());
        {
            let _guard = IrqGuard::new();
            assert!(!intr_enabled());
        }
        assert!(intr_enabled());
    }

    #[test]
    fn test_with_irqs_disabled_nests() {
        with_irqs_disabled(|| {
            assert!(!intr_enabled());
            with_irqs_disabled(|| assert!(!intr_enabled()));
            assert!(!intr_enabled());
        });
    }

    #[test]
    fn test_irq_register_and_dispatch() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);

        fn handler(arg: *mut ()) {
            assert!(arg.is_null());
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        irq_register(42, handler, core::ptr::null_mut());
        irq_dispatch(42);
        irq_dispatch(42);
        assert_eq!(FIRED.load(Ordering::Relaxed), 2);
    }

    #[test]
    #[should_panic]
    fn test_dispatch_without_handler_is_fatal() {
        irq_dispatch(7);
    }
}
