//! Mutual exclusion
//!
//! A blocking, non-recursive mutex owning its protected data. Contended
//! lockers enqueue a waiter record allocated in their own stack frame and
//! sleep; unlock wakes the head waiter, which then contends for the mutex
//! again under preemption. There is no direct handoff and no priority
//! inheritance, and spurious wake-ups are tolerated by re-checking the
//! locked flag in a loop.
//!
//! Preemption must be disabled when accessing the mutex state or a waiter.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::error::Error;
use crate::list;
use crate::thread::{self, ThreadRef};

/// Binds a waiting thread to a mutex. Lives on the waiter's stack and is
/// linked only while the thread is inside `lock`.
#[repr(C)]
struct Waiter {
    node: list::Node,
    thread: ThreadRef,
}

// SAFETY: node is the first field and Waiter is #[repr(C)].
unsafe impl list::Linked for Waiter {}

struct MutexState {
    waiters: list::List<Waiter>,
    owner: Option<ThreadRef>,
    locked: bool,
}

pub struct Mutex<T> {
    state: UnsafeCell<MutexState>,
    data: UnsafeCell<T>,
}

// SAFETY: the state is only touched with preemption disabled, which
// serializes all access on the single core.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            state: UnsafeCell::new(MutexState {
                waiters: list::List::new(),
                owner: None,
                locked: false,
            }),
            data: UnsafeCell::new(data),
        }
    }

    /// Only the owner may unlock: `locked` and `owner` change together.
    unsafe fn set_owner(&self, thread: ThreadRef) {
        unsafe {
            let state = &mut *self.state.get();
            debug_assert!(state.owner.is_none());
            debug_assert!(!state.locked);
            state.owner = Some(thread);
            state.locked = true;
        }
    }

    unsafe fn clear_owner(&self) {
        unsafe {
            let state = &mut *self.state.get();
            assert!(
                state.owner == Some(thread::current()),
                "mutex: error: unlock by non-owner"
            );
            state.owner = None;
            state.locked = false;
        }
    }

    /// Acquire the mutex, sleeping while it is held elsewhere.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let current = thread::current();
        let mut waiter = Waiter {
            node: list::Node::new(),
            thread: current,
        };

        thread::preempt_disable();

        // SAFETY: preemption is disabled; the waiter outlives its linkage
        // because it is removed below, before this frame is left.
        unsafe {
            if (*self.state.get()).locked {
                let waiter = NonNull::from(&mut waiter);
                (*self.state.get()).waiters.push_back(waiter);

                loop {
                    thread::sleep();

                    if !(*self.state.get()).locked {
                        break;
                    }
                }

                (*self.state.get()).waiters.remove(waiter);
            }

            self.set_owner(current);
        }

        thread::preempt_enable();

        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Acquire the mutex without blocking, or report `Busy`.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, Error> {
        thread::preempt_disable();

        // SAFETY: preemption is disabled.
        let acquired = unsafe {
            if (*self.state.get()).locked {
                false
            } else {
                self.set_owner(thread::current());
                true
            }
        };

        thread::preempt_enable();

        if acquired {
            Ok(MutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })
        } else {
            Err(Error::Busy)
        }
    }

    /// Release the mutex and wake the head waiter, if any. One wake-up per
    /// unlock keeps the service order FIFO.
    pub(crate) fn unlock(&self) {
        thread::preempt_disable();

        // SAFETY: preemption is disabled.
        unsafe {
            self.clear_owner();

            if let Some(waiter) = (*self.state.get()).waiters.front() {
                thread::wakeup((*waiter.as_ptr()).thread);
            }
        }

        thread::preempt_enable();
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*mut ()>,
}

impl<'a, T> MutexGuard<'a, T> {
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves ownership of the mutex.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
