//! UART driver
//!
//! Byte-oriented full-duplex console device. Transmission polls the
//! hardware directly; reception is interrupt-driven, with the RX handler
//! draining ready bytes into a small circular buffer and waking the single
//! parked reader, if any. Buffer and waiter slot are shared between thread
//! and interrupt context, so both interrupts and preemption must be
//! disabled around them.

use spinning_top::Spinlock;

use crate::cbuf::CircBuf;
use crate::config;
use crate::cpu;
use crate::error::Error;
use crate::thread::{self, ThreadRef};

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod hw {
    //! USART1 register access.

    const USART1_BASE: usize = 0x4001_1000;
    const SR: *mut u32 = USART1_BASE as *mut u32;
    const DR: *mut u32 = (USART1_BASE + 0x04) as *mut u32;
    const CR1: *mut u32 = (USART1_BASE + 0x0c) as *mut u32;

    const SR_RXNE: u32 = 0x0000_0020;
    const SR_TXE: u32 = 0x0000_0080;

    const CR1_RE: u32 = 0x0000_0004;
    const CR1_TE: u32 = 0x0000_0008;
    const CR1_RXNEIE: u32 = 0x0000_0020;
    const CR1_UE: u32 = 0x0000_2000;

    pub const UART_IRQ: u32 = 37;

    pub fn setup() {
        // SAFETY: CR1 is a plain read-modify-write configuration register.
        unsafe {
            CR1.write_volatile(CR1.read_volatile() | CR1_UE | CR1_RXNEIE | CR1_TE | CR1_RE);
        }
    }

    pub fn rx_ready() -> bool {
        // SAFETY: status reads have no side effects.
        unsafe { SR.read_volatile() & SR_RXNE != 0 }
    }

    pub fn read_byte() -> u8 {
        // SAFETY: reading DR pops the received byte.
        unsafe { DR.read_volatile() as u8 }
    }

    pub fn write_byte(byte: u8) {
        // SAFETY: see rx_ready/read_byte.
        unsafe {
            while SR.read_volatile() & SR_TXE == 0 {}
            DR.write_volatile(byte as u32);
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[cfg(test)]
mod hw {
    //! Hosted stand-in: per-test wire buffers, so transmitted bytes can be
    //! inspected and the receiver primed without cross-test interference.

    extern crate std;

    use core::cell::RefCell;
    use std::collections::VecDeque;
    use std::vec::Vec;

    pub const UART_IRQ: u32 = 37;

    std::thread_local! {
        static TX: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
        static RX: RefCell<VecDeque<u8>> = const { RefCell::new(VecDeque::new()) };
    }

    pub fn setup() {}

    pub fn rx_ready() -> bool {
        RX.with(|rx| !rx.borrow().is_empty())
    }

    pub fn read_byte() -> u8 {
        RX.with(|rx| rx.borrow_mut().pop_front().unwrap_or(0))
    }

    pub fn write_byte(byte: u8) {
        TX.with(|tx| tx.borrow_mut().push(byte));
    }

    pub fn feed_rx(bytes: &[u8]) {
        RX.with(|rx| rx.borrow_mut().extend(bytes.iter().copied()));
    }

    pub fn take_tx() -> Vec<u8> {
        TX.with(|tx| core::mem::take(&mut *tx.borrow_mut()))
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[cfg(not(test))]
mod hw {
    //! Hosted stand-in outside the test harness: a disconnected wire.

    pub const UART_IRQ: u32 = 37;

    pub fn setup() {}

    pub fn rx_ready() -> bool {
        false
    }

    pub fn read_byte() -> u8 {
        0
    }

    pub fn write_byte(_byte: u8) {}
}

#[cfg(test)]
pub(crate) use hw::take_tx;

/// Receive state shared with the RX interrupt handler.
struct UartRx {
    cbuf: CircBuf<{ config::UART_BUFFER_SIZE }>,
    waiter: Option<ThreadRef>,
}

static UART_RX: Spinlock<UartRx> = Spinlock::new(UartRx {
    cbuf: CircBuf::new(),
    waiter: None,
});

/// RX interrupt: drain everything the hardware has, then wake the reader.
/// Runs with interrupts and preemption disabled.
fn rx_irq_handler(_arg: *mut ()) {
    let mut spurious = true;

    let waiter = {
        let mut rx = UART_RX.lock();

        while hw::rx_ready() {
            spurious = false;
            let byte = hw::read_byte();

            if rx.cbuf.push_byte(byte, false).is_err() {
                crate::println!("uart: error: buffer full");
                break;
            }
        }

        rx.waiter
    };

    if !spurious {
        if let Some(waiter) = waiter {
            thread::wakeup(waiter);
        }
    }
}

pub(crate) fn setup() {
    hw::setup();
    cpu::irq_register(hw::UART_IRQ, rx_irq_handler, core::ptr::null_mut());
}

/// Transmit one byte, translating `\n` to `\r\n`.
pub fn write(byte: u8) {
    if byte == b'\n' {
        hw::write_byte(b'\r');
    }

    hw::write_byte(byte);
}

/// Blocking read of one received byte.
///
/// Only one thread may wait at a time; a second concurrent reader gets
/// `Busy`. Bytes are returned in arrival order; overruns are dropped by
/// the interrupt handler.
pub fn read() -> Result<u8, Error> {
    let primask = thread::preempt_disable_intr_save();
    let result = read_parked();
    thread::preempt_enable_intr_restore(primask);
    result
}

fn read_parked() -> Result<u8, Error> {
    if UART_RX.lock().waiter.is_some() {
        return Err(Error::Busy);
    }

    loop {
        let mut rx = UART_RX.lock();

        if let Ok(byte) = rx.cbuf.pop_byte() {
            return Ok(byte);
        }

        rx.waiter = Some(thread::current());
        drop(rx);

        thread::sleep();

        UART_RX.lock().waiter = None;
    }
}
