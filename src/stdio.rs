//! Console output and input
//!
//! `print!`/`println!` format into a process-wide scratch buffer and push
//! the bytes to the UART. The buffer avoids large stack frames on small
//! thread stacks; it is guarded by disabling preemption and interrupts, so
//! printing is safe from any context, interrupt handlers included.

use core::fmt;

use crate::config;
use crate::error::Error;
use crate::thread;
use crate::uart;

static mut PRINT_BUFFER: [u8; config::PRINTF_BUFFER_SIZE] = [0; config::PRINTF_BUFFER_SIZE];

pub fn putchar(byte: u8) {
    uart::write(byte);
}

pub fn getchar() -> Result<u8, Error> {
    uart::read()
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let primask = thread::preempt_disable_intr_save();

    // SAFETY: the scratch buffer is only touched here, and this section
    // cannot be preempted or interrupted.
    let buffer = unsafe { &mut *(&raw mut PRINT_BUFFER) };

    match format_no_std::show(buffer, args) {
        Ok(s) => {
            for byte in s.bytes() {
                uart::write(byte);
            }
        }
        Err(_) => {
            for byte in "stdio: error: message too long\n".bytes() {
                uart::write(byte);
            }
        }
    }

    thread::preempt_enable_intr_restore(primask);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::stdio::_print(core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($fmt:expr) => {
        $crate::print!(concat!($fmt, "\n"))
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::print!(concat!($fmt, "\n"), $($arg)*)
    };
}
