//! Software timers
//!
//! A monotonic tick counter driven by the scheduling clock, and a sorted
//! list of pending timers whose callbacks run in a dedicated kernel thread.
//! The tick handler never touches the list itself: it only reads a small
//! interrupt-visible summary (list empty, earliest deadline) and wakes the
//! timer thread when that summary says work is due. The list proper is
//! protected by a mutex so scheduling a timer keeps preemption enabled.
//!
//! Tick values wrap. The counter is a finite integer, so time must be
//! partitioned between future and past relative to a reference: everything
//! from the reference up to half the value range is the future, the rest is
//! the past. All deadline comparisons go through [`ticks_expired`] and
//! [`ticks_occurred`]; comparing raw tick values is always wrong.

use core::cell::Cell;
use core::mem;
use core::ptr::{self, NonNull};

use critical_section as cs;

use crate::config;
use crate::list;
use crate::sync::Mutex;
use crate::thread::{self, ThreadRef};

pub type TimerFn = fn(*mut ());

/// Boundary between the future and the past, half the counter range.
const THRESHOLD: usize = usize::MAX / 2;

/// True if `ticks` is strictly in the past relative to `reference`.
pub fn ticks_expired(ticks: usize, reference: usize) -> bool {
    ticks.wrapping_sub(reference) > THRESHOLD
}

/// True if `ticks` is now or in the past relative to `reference`.
pub fn ticks_occurred(ticks: usize, reference: usize) -> bool {
    ticks == reference || ticks_expired(ticks, reference)
}

/// A software timer.
///
/// Unscheduled after `new`; [`schedule`] links it into the pending list,
/// expiry unlinks it before the callback runs. The deadline is immutable
/// while pending. Callbacks run in the timer thread with preemption
/// enabled and may reschedule their own timer, which is how periodic
/// timers are built.
#[repr(C)]
pub struct Timer {
    node: list::Node,
    ticks: Cell<usize>,
    f: TimerFn,
    arg: *mut (),
}

// SAFETY: node is the first field and Timer is #[repr(C)].
unsafe impl list::Linked for Timer {}

// SAFETY: all mutable state is guarded by the timer list mutex; the opaque
// callback argument is handed back to the callback unchanged.
unsafe impl Send for Timer {}
unsafe impl Sync for Timer {}

impl Timer {
    pub const fn new(f: TimerFn, arg: *mut ()) -> Self {
        Self {
            node: list::Node::new(),
            ticks: Cell::new(0),
            f,
            arg,
        }
    }

    /// Deadline of the timer. Only meaningful once it has been scheduled.
    pub fn time(&self) -> usize {
        let _list = TIMER_LIST.lock();
        self.ticks.get()
    }
}

/// Interrupt-visible summary, the only state the tick handler reads. The
/// wakeup deadline is only valid while the list is non-empty.
#[derive(Clone, Copy)]
struct IsrState {
    ticks: usize,
    list_empty: bool,
    wakeup_ticks: usize,
}

static ISR_STATE: cs::Mutex<Cell<IsrState>> = cs::Mutex::new(Cell::new(IsrState {
    ticks: 0,
    list_empty: true,
    wakeup_ticks: 0,
}));

/// Pending timers sorted by deadline under the wrap-aware ordering.
static TIMER_LIST: Mutex<list::List<Timer>> = Mutex::new(list::List::new());

/// The thread providing context for all timer callbacks.
static TIMER_THREAD: cs::Mutex<Cell<Option<ThreadRef>>> = cs::Mutex::new(Cell::new(None));

fn work_pending(state: IsrState) -> bool {
    !state.list_empty && ticks_occurred(state.wakeup_ticks, state.ticks)
}

/// Current monotonic tick.
pub fn now() -> usize {
    cs::with(|cs| ISR_STATE.borrow(cs).get().ticks)
}

/// Called from the periodic tick interrupt.
pub fn report_tick() {
    let (pending, timer_thread) = cs::with(|cs| {
        let cell = ISR_STATE.borrow(cs);
        let mut state = cell.get();
        state.ticks = state.ticks.wrapping_add(1);
        cell.set(state);

        (work_pending(state), TIMER_THREAD.borrow(cs).get())
    });

    // The wakeup happens outside the critical section.
    if pending {
        if let Some(timer_thread) = timer_thread {
            thread::wakeup(timer_thread);
        }
    }
}

/// Arm `timer` to fire at the absolute tick `ticks`.
///
/// The timer must not already be scheduled. Insertion keeps the list
/// sorted, an O(n) walk; with few timers this beats a wheel, and using the
/// mutex instead of disabling preemption keeps higher priority threads
/// runnable during the walk.
pub fn schedule(timer: &'static Timer, ticks: usize) {
    let mut pending = TIMER_LIST.lock();

    assert!(!timer.node.is_linked(), "timer: error: already scheduled");
    timer.ticks.set(ticks);

    let mut at = None;
    for tmp in pending.iter() {
        // SAFETY: listed timers are valid while the mutex is held.
        if !ticks_expired(unsafe { tmp.as_ref() }.ticks.get(), ticks) {
            at = Some(tmp);
            break;
        }
    }

    let timer = NonNull::from(timer);
    // SAFETY: the timer is static, unlinked, and the mutex is held.
    unsafe {
        match at {
            Some(at) => pending.insert_before(timer, at),
            None => pending.push_back(timer),
        }
    }

    // Refresh the summary while still holding the mutex; doing it after
    // unlocking would let the tick handler wake the timer thread on a
    // stale deadline and spuriously again after the list drains.
    let first = pending.front();
    cs::with(|cs| {
        let cell = ISR_STATE.borrow(cs);
        let mut state = cell.get();
        state.list_empty = false;
        if let Some(first) = first {
            state.wakeup_ticks = unsafe { first.as_ref() }.ticks.get();
        }
        cell.set(state);
    });
}

/// Pop and run every timer whose deadline has occurred relative to `now`.
fn process_list(now: usize) {
    let mut pending = TIMER_LIST.lock();

    loop {
        let Some(first) = pending.front() else {
            break;
        };

        // SAFETY: listed timers are valid while the mutex is held.
        let (deadline, f, arg) = {
            let timer = unsafe { first.as_ref() };
            (timer.ticks.get(), timer.f, timer.arg)
        };

        if !ticks_occurred(deadline, now) {
            break;
        }

        // SAFETY: first is on the list.
        unsafe { pending.remove(first) };

        // The callback runs unscheduled, without the mutex and with
        // preemption enabled, so it may reschedule its timer.
        drop(pending);
        f(arg);
        pending = TIMER_LIST.lock();
    }

    let first = pending.front();
    cs::with(|cs| {
        let cell = ISR_STATE.borrow(cs);
        let mut state = cell.get();
        match first {
            Some(first) => {
                state.list_empty = false;
                state.wakeup_ticks = unsafe { first.as_ref() }.ticks.get();
            }
            None => state.list_empty = true,
        }
        cell.set(state);
    });
}

fn timer_run(_arg: *mut ()) {
    loop {
        let primask = thread::preempt_disable_intr_save();

        let now = loop {
            let state = cs::with(|cs| ISR_STATE.borrow(cs).get());

            if work_pending(state) {
                break state.ticks;
            }

            thread::sleep();
        };

        thread::preempt_enable_intr_restore(primask);

        process_list(now);
    }
}

pub(crate) fn setup() {
    // Background priority; a deployment that relays real-time events from
    // callbacks would raise this to MAX_PRIORITY instead.
    let handle = match thread::spawn(
        timer_run,
        ptr::null_mut(),
        "timer",
        config::TIMER_STACK_SIZE,
        config::MIN_PRIORITY,
    ) {
        Ok(handle) => handle,
        Err(e) => panic!("timer: unable to create thread: {}", e),
    };

    let timer_thread = handle.thread();
    // The timer thread never exits and is never reaped.
    mem::forget(handle);

    cs::with(|cs| TIMER_THREAD.borrow(cs).set(Some(timer_thread)));
}
