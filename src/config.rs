//! Kernel configuration constants
//!
//! This module contains tunable parameters for the kernel.
//! Modify these values to adjust kernel behavior.

#![allow(dead_code)]

/// Scheduler tick frequency in Hz.
///
/// The periodic tick source (SysTick on Cortex-M) must be programmed by the
/// board to fire at this rate. One tick is the scheduling quantum and the
/// software timer resolution.
pub const SCHED_FREQ: usize = 100;

/// Total number of thread priorities.
pub const NR_PRIORITIES: u32 = 20;

/// Priority of the idle thread. Regular threads use `MIN_PRIORITY` and up.
pub const IDLE_PRIORITY: u32 = 0;
pub const MIN_PRIORITY: u32 = 1;
pub const MAX_PRIORITY: u32 = NR_PRIORITIES - 1;

/// Maximum size of thread names, including the NUL terminator.
pub const THREAD_NAME_SIZE: usize = 16;

/// Minimum per-thread stack size.
///
/// Spawn requests below this are silently raised. A stack must at least
/// hold the forged exception frame plus the deepest call chain of the
/// thread function.
pub const THREAD_MIN_STACK_SIZE: usize = 512;

/// Stack sizes for the kernel's own service threads. The shell keeps its
/// editor state (history ring included) in its thread stack.
pub const TIMER_STACK_SIZE: usize = 4096;
pub const SHELL_STACK_SIZE: usize = 8192;

/// Size of the backing storage for the kernel heap.
///
/// The heap lives in .bss, so this does not grow the kernel image.
pub const HEAP_SIZE: usize = 64 * 1024;

/// Capacity of the UART receive ring. Must be a power of two.
pub const UART_BUFFER_SIZE: usize = 16;

/// Size of the scratch buffer used by `print!`. Output longer than this is
/// reported as an error rather than printed truncated.
pub const PRINTF_BUFFER_SIZE: usize = 1024;

/// Maximum shell line length, including the NUL terminator.
pub const SHELL_LINE_SIZE: usize = 64;

/// Number of entries in the shell history, counting the line being edited.
pub const SHELL_HISTORY_SIZE: usize = 21;

/// Maximum size of a terminal escape sequence body.
pub const SHELL_ESC_SEQ_SIZE: usize = 8;

/// Binary exponent of the command hash table size (64 buckets).
pub const SHELL_HTABLE_BITS: u32 = 6;

/// Maximum number of whitespace-separated tokens on a command line.
pub const SHELL_MAX_ARGS: usize = 16;

/// When true, the idle thread waits for interrupts in a low-power state
/// instead of spinning.
pub const LOW_POWER: bool = true;
