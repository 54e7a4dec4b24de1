//! Condition variables
//!
//! Waiting releases the associated mutex and enrolls a stack-allocated
//! waiter on the condition variable in one step: with preemption disabled,
//! unlocking and enqueueing are indivisible as seen by signalers, which
//! also disable preemption to walk the list. Each waiter carries an
//! `awaken` flag so a signal wakes exactly one thread that has not been
//! woken yet; the flag also screens out spurious scheduler wake-ups, but
//! callers must still re-check their own predicate after `wait` returns.
//!
//! Signals sent while the associated mutex is not held may be missed.

use core::cell::{Cell, UnsafeCell};
use core::mem;
use core::ptr::NonNull;

use crate::list;
use crate::sync::{Mutex, MutexGuard};
use crate::thread::{self, ThreadRef};

/// Binds a waiting thread to a condition variable. Lives on the waiter's
/// stack and is linked only while the thread is inside `wait`.
#[repr(C)]
struct Waiter {
    node: list::Node,
    thread: ThreadRef,
    awaken: Cell<bool>,
}

// SAFETY: node is the first field and Waiter is #[repr(C)].
unsafe impl list::Linked for Waiter {}

fn waiter_wakeup(waiter: NonNull<Waiter>) -> bool {
    // SAFETY: waiters on the list are valid while preemption is disabled.
    let waiter = unsafe { waiter.as_ref() };

    if waiter.awaken.get() {
        return false;
    }

    thread::wakeup(waiter.thread);
    waiter.awaken.set(true);
    true
}

pub struct Condvar {
    waiters: UnsafeCell<list::List<Waiter>>,
}

// SAFETY: the waiter list is only touched with preemption disabled.
unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: UnsafeCell::new(list::List::new()),
        }
    }

    /// Atomically release the mutex and wait for a signal, then reacquire
    /// the mutex before returning.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex: &'a Mutex<T> = guard.mutex();

        let mut waiter = Waiter {
            node: list::Node::new(),
            thread: thread::current(),
            awaken: Cell::new(false),
        };

        thread::preempt_disable();

        // Holding the condition variable (preemption disabled) across the
        // unlock is what makes the wait atomic with respect to signalers.
        mutex.unlock();
        mem::forget(guard);

        // SAFETY: preemption is disabled, and the waiter is unlinked below
        // before this frame is left.
        unsafe {
            let waiter_ptr = NonNull::from(&mut waiter);
            (*self.waiters.get()).push_back(waiter_ptr);

            loop {
                thread::sleep();

                if waiter.awaken.get() {
                    break;
                }
            }

            (*self.waiters.get()).remove(waiter_ptr);
        }

        thread::preempt_enable();

        // Relocking must wait until preemption is reenabled, since taking
        // a mutex may sleep.
        mutex.lock()
    }

    /// Wake the first thread that has not been woken yet, if any.
    pub fn signal(&self) {
        thread::preempt_disable();

        // SAFETY: preemption is disabled.
        unsafe {
            for waiter in (*self.waiters.get()).iter() {
                if waiter_wakeup(waiter) {
                    break;
                }
            }
        }

        thread::preempt_enable();
    }

    /// Wake every thread that has not been woken yet.
    ///
    /// The woken threads all contend for the associated mutex, so only one
    /// of them runs on; the others go back to sleep on the mutex. Simple,
    /// at the price of a thundering herd.
    pub fn broadcast(&self) {
        thread::preempt_disable();

        // SAFETY: preemption is disabled.
        unsafe {
            for waiter in (*self.waiters.get()).iter() {
                waiter_wakeup(waiter);
            }
        }

        thread::preempt_enable();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_without_waiters() {
        let cv = Condvar::new();
        cv.signal();
        cv.broadcast();
    }

    #[test]
    fn test_waiter_wakeup_is_once_only() {
        let waiter = Waiter {
            node: list::Node::new(),
            thread: thread::current(),
            awaken: Cell::new(false),
        };
        let ptr = NonNull::from(&waiter);
        assert!(waiter_wakeup(ptr));
        assert!(!waiter_wakeup(ptr));
        assert!(waiter.awaken.get());
    }
}
