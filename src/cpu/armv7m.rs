//! ARMv7-M implementation of the CPU services
//!
//! Interrupt masking uses PRIMASK. Context switching is two-phase: the
//! scheduler marks its intent and raises PendSV; the PendSV handler performs
//! the callee-saved register save/restore on the stacks involved. SVCall
//! loads the very first thread. Both handlers and the exception/IRQ entry
//! points are exported with C linkage for the board's vector table.

use core::arch::{asm, global_asm};

use crate::config;
use crate::thread;
use crate::timer;

pub const STACK_ALIGN: usize = 8;

const PRIMASK_I: u32 = 0x1;

/// Interrupt control and state register, used to pend PendSV.
const REG_ICSR: usize = 0xe000_ed04;
const ICSR_PENDSVSET: u32 = 0x1000_0000;

/// NVIC interrupt set-enable registers.
const NVIC_ISER_BASE: usize = 0xe000_e100;

/// GPIO port C, where the board LED lives (pin 13, active low).
const GPIO_C_BSRR: usize = 0x4002_0818;

const EXC_SYSTICK: u32 = 15;
const EXC_IRQ_BASE: u32 = 16;

/// xPSR thumb bit, mandatory in any forged frame.
const PSR_THUMB: u32 = 0x0100_0000;

#[inline]
fn read_primask() -> u32 {
    let primask: u32;
    // SAFETY: reading PRIMASK has no side effects.
    unsafe {
        asm!("mrs {}, primask", out(reg) primask, options(nostack, preserves_flags));
    }
    primask
}

#[inline]
fn inst_barrier() {
    // SAFETY: an instruction barrier is always safe.
    unsafe {
        asm!("isb", options(nostack, preserves_flags));
    }
}

/// Disable interrupts. Implies a compiler barrier.
#[inline]
pub fn intr_disable() {
    // The cpsid instruction is self-synchronizing. The missing `nomem`
    // option makes this a compiler barrier, which critical sections rely on.
    unsafe {
        asm!("cpsid i", options(nostack, preserves_flags));
    }
}

/// Enable interrupts. Implies a compiler barrier.
#[inline]
pub fn intr_enable() {
    unsafe {
        asm!("cpsie i", options(nostack, preserves_flags));
    }
}

/// Disable interrupts, returning the previous mask. Nests with
/// [`intr_restore`].
#[inline]
pub fn intr_save() -> u32 {
    let primask = read_primask();
    intr_disable();
    primask
}

#[inline]
pub fn intr_restore(primask: u32) {
    unsafe {
        asm!("msr primask, {}", in(reg) primask, options(nostack, preserves_flags));
    }
}

#[inline]
pub fn intr_enabled() -> bool {
    read_primask() & PRIMASK_I == 0
}

/// Wait until the next interrupt.
#[inline]
pub fn idle() {
    if config::LOW_POWER {
        unsafe {
            asm!("wfi", options(nostack, preserves_flags));
        }
    }
}

/// Completely halt execution on the processor.
pub fn halt() -> ! {
    intr_disable();

    loop {
        idle();
    }
}

/// Raise an SVCall exception, used to load the first thread.
#[inline]
pub fn raise_svcall() {
    unsafe {
        asm!("svc #0", options(nostack, preserves_flags));
    }
}

/// Request a deferred context switch.
///
/// The PendSV exception is taken once interrupts are enabled and its
/// priority allows, which concentrates all register save/restore in the
/// handler below.
#[inline]
pub fn raise_pendsv() {
    // SAFETY: ICSR is a write-1-to-set register; other bits ignore zeroes.
    unsafe {
        (REG_ICSR as *mut u32).write_volatile(ICSR_PENDSVSET);
    }
    inst_barrier();
}

pub(super) fn nvic_irq_enable(irq: u32) {
    let reg = (NVIC_ISER_BASE + 4 * (irq as usize / 32)) as *mut u32;
    // SAFETY: set-enable registers ignore written zeroes.
    unsafe {
        reg.write_volatile(1 << (irq % 32));
    }
}

/// Drive the board LED. The pin sinks current, so "on" pulls it low.
pub fn led_set(on: bool) {
    let bit = if on { 1u32 << (13 + 16) } else { 1u32 << 13 };
    // SAFETY: BSRR is write-only with set/reset semantics.
    unsafe {
        (GPIO_C_BSRR as *mut u32).write_volatile(bit);
    }
}

/// Stack content forged for a new thread.
///
/// The lower half mirrors what `cpu_exc_pendsv` pushes; the upper half is
/// the hardware exception frame the processor unstacks on return.
#[repr(C)]
struct ExcFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    r14: u32,
    r15: u32,
    psr: u32,
}

/// Build the register image of a preempted thread at the top of a fresh
/// stack, so that the first dispatch lands in `thread_main(f, arg)`.
pub fn stack_forge(stack: *mut u8, size: usize, f: thread::ThreadFn, arg: *mut ()) -> *mut u8 {
    assert!(stack as usize % STACK_ALIGN == 0);

    if size <= size_of::<ExcFrame>() {
        panic!("cpu: error: stack too small");
    }

    // SAFETY: the frame lies inside [stack, stack + size), checked above.
    unsafe {
        let frame = stack.add(size).cast::<ExcFrame>().sub(1);

        frame.write(ExcFrame {
            r4: 4,
            r5: 5,
            r6: 6,
            r7: 7,
            r8: 8,
            r9: 9,
            r10: 10,
            r11: 11,
            r0: f as usize as u32,
            r1: arg as usize as u32,
            r2: 2,
            r3: 3,
            r12: 12,
            // Terminate backtraces; thread_main never returns anyway.
            r14: 0,
            // The entry point must be halfword aligned.
            r15: (thread::thread_main as usize as u32) & !1,
            psr: PSR_THUMB,
        });

        frame.cast()
    }
}

// Context switch handlers.
//
// PendSV saves the callee-saved registers of the outgoing thread on its
// stack (the hardware already pushed the caller-saved half), hands the stack
// pointer to the scheduler, and restores the incoming thread from whatever
// stack pointer comes back. SVCall is the same restore path without a save,
// used once to discard the boot context.
// Both handlers return through EXC_RETURN 0xfffffff9 (thread mode, main
// stack, no FP state): all threads run on MSP. The value is built with
// mvn so no literal pool is needed.
global_asm!(
    r#"
.syntax unified

.section .text.cpu_exc_pendsv
.global cpu_exc_pendsv
.type cpu_exc_pendsv, %function
.thumb_func
cpu_exc_pendsv:
    cpsid i
    push {r4-r11}
    mov r0, sp
    bl thread_yield_from_pendsv
    mov sp, r0
    pop {r4-r11}
    mvn lr, #6
    cpsie i
    bx lr

.section .text.cpu_exc_svcall
.global cpu_exc_svcall
.type cpu_exc_svcall, %function
.thumb_func
cpu_exc_svcall:
    cpsid i
    bl thread_yield_from_svcall
    mov sp, r0
    pop {r4-r11}
    mvn lr, #6
    cpsie i
    bx lr
"#,
    options(raw)
);

#[inline]
fn read_ipsr() -> u32 {
    let ipsr: u32;
    unsafe {
        asm!("mrs {}, ipsr", out(reg) ipsr, options(nostack, preserves_flags));
    }
    ipsr
}

/// Entry point for system exceptions other than PendSV and SVCall.
///
/// Preemption is disabled across the handler body: interrupt context has no
/// schedulable state, so a context switch must wait for the return path.
#[unsafe(no_mangle)]
pub extern "C" fn cpu_exc_main() {
    let vector = read_ipsr();

    assert!(vector < EXC_IRQ_BASE);

    let primask = thread::preempt_disable_intr_save();

    match vector {
        EXC_SYSTICK => {
            thread::report_tick();
            timer::report_tick();
        }
        _ => {
            crate::println!("cpu: error: unhandled exception: {}", vector);
            halt();
        }
    }

    thread::preempt_enable_intr_restore(primask);
}

/// Entry point for external interrupt requests.
#[unsafe(no_mangle)]
pub extern "C" fn cpu_irq_main() {
    let irq = read_ipsr() - EXC_IRQ_BASE;

    let primask = thread::preempt_disable_intr_save();
    super::irq_dispatch(irq);
    thread::preempt_enable_intr_restore(primask);
}

struct PrimaskCriticalSection;

critical_section::set_impl!(PrimaskCriticalSection);

// SAFETY: single core; masking interrupts excludes every other context.
unsafe impl critical_section::Impl for PrimaskCriticalSection {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        intr_save()
    }

    unsafe fn release(primask: critical_section::RawRestoreState) {
        intr_restore(primask);
    }
}
