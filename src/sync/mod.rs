//! Blocking synchronization primitives
//!
//! A mutex and a condition variable built directly on the scheduler's
//! sleep/wakeup interface. Both keep their waiters in intrusive lists whose
//! records live on the sleeping thread's stack, so blocking never
//! allocates.

mod condvar;
mod mutex;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};
