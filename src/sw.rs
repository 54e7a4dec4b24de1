//! Stopwatch demo
//!
//! Counts scheduler ticks with a periodic self-rescheduling timer and
//! exercises the blocking primitives: readers take a mutex, `sw_wait`
//! sleeps on a condition variable signalled from the timer callback. The
//! running count is printed every few seconds.

use core::fmt::Write;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use alloc::boxed::Box;

use crate::config;
use crate::error;
use crate::shell::{self, Shell, ShellIo, cmd::ShellCmd};
use crate::sync::{Condvar, Mutex};
use crate::timer::{self, Timer};

/// Display interval, in seconds.
const DISPLAY_INTERVAL: usize = 5;

/// Maximum wait time for the sw_wait command, in seconds.
const MAX_WAIT: usize = 30;

struct SwState {
    ticks: usize,
    timer_scheduled: bool,
    thread_waiting: bool,
    wait_ticks: usize,
}

struct Sw {
    mutex: Mutex<SwState>,
    cv: Condvar,
    timer: Timer,
}

/// Singleton instance, leaked at setup.
static SW_INSTANCE: AtomicPtr<Sw> = AtomicPtr::new(ptr::null_mut());

fn instance() -> &'static Sw {
    let sw = SW_INSTANCE.load(Ordering::Relaxed);
    assert!(!sw.is_null(), "sw: error: not initialized");
    // SAFETY: the instance is leaked and never freed.
    unsafe { &*sw }
}

fn sw_timer_run(arg: *mut ()) {
    // SAFETY: the argument is the leaked singleton.
    let sw: &'static Sw = unsafe { &*(arg as *const Sw) };

    let mut state = sw.mutex.lock();

    if !state.timer_scheduled {
        return;
    }

    state.ticks = state.ticks.wrapping_add(1);

    if state.ticks % (config::SCHED_FREQ * DISPLAY_INTERVAL) == 0 {
        crate::println!("{}", state.ticks);
    }

    if state.thread_waiting && timer::ticks_occurred(state.wait_ticks, state.ticks) {
        state.thread_waiting = false;
        sw.cv.signal();
    }

    timer::schedule(&sw.timer, sw.timer.time().wrapping_add(1));
}

impl Sw {
    fn schedule(&'static self, state: &mut SwState) {
        if state.timer_scheduled {
            return;
        }

        state.timer_scheduled = true;
        timer::schedule(&self.timer, timer::now().wrapping_add(1));
    }

    fn start(&'static self) {
        let mut state = self.mutex.lock();
        state.ticks = 0;
        self.schedule(&mut state);
    }

    fn stop(&self) {
        self.mutex.lock().timer_scheduled = false;
    }

    fn resume(&'static self) {
        let mut state = self.mutex.lock();
        self.schedule(&mut state);
    }

    fn read(&self) -> usize {
        self.mutex.lock().ticks
    }

    fn wait(&'static self, io: &mut dyn ShellIo, seconds: usize) {
        let mut state = self.mutex.lock();

        if !state.timer_scheduled {
            let _ = io.write_str("sw_wait: error: stopwatch disabled\n");
            return;
        }

        if state.thread_waiting {
            let _ = io.write_str("sw_wait: error: thread already waiting\n");
            return;
        }

        state.thread_waiting = true;
        state.wait_ticks = state.ticks.wrapping_add(seconds * config::SCHED_FREQ);

        loop {
            state = self.cv.wait(state);

            if !state.thread_waiting {
                break;
            }
        }
    }
}

fn cmd_sw_start(_shell: &mut Shell<'_>, _argv: &[&str]) {
    instance().start();
}

fn cmd_sw_stop(_shell: &mut Shell<'_>, _argv: &[&str]) {
    instance().stop();
}

fn cmd_sw_resume(_shell: &mut Shell<'_>, _argv: &[&str]) {
    instance().resume();
}

fn cmd_sw_read(shell: &mut Shell<'_>, _argv: &[&str]) {
    let _ = write!(shell.io(), "{}\n", instance().read());
}

fn cmd_sw_wait(shell: &mut Shell<'_>, argv: &[&str]) {
    // Checked parsing: malformed and out-of-range values (overflow
    // included) are reported instead of being clamped.
    let seconds = match argv {
        [_, arg] => arg.parse::<usize>().ok().filter(|s| *s <= MAX_WAIT),
        _ => None,
    };

    match seconds {
        Some(seconds) => instance().wait(shell.io(), seconds),
        None => {
            let _ = shell.io().write_str("sw_wait: error: invalid arguments\n");
        }
    }
}

static SW_CMDS: [ShellCmd; 5] = [
    ShellCmd::new("sw_start", cmd_sw_start, "sw_start", "start the stopwatch", None),
    ShellCmd::new("sw_stop", cmd_sw_stop, "sw_stop", "stop the stopwatch", None),
    ShellCmd::new(
        "sw_resume",
        cmd_sw_resume,
        "sw_resume",
        "resume the stopwatch",
        None,
    ),
    ShellCmd::new(
        "sw_read",
        cmd_sw_read,
        "sw_read",
        "read the stopwatch time",
        None,
    ),
    ShellCmd::new(
        "sw_wait",
        cmd_sw_wait,
        "sw_wait <seconds>",
        "wait for up to 30 seconds",
        None,
    ),
];

pub(crate) fn setup() {
    let sw = Box::leak(Box::new(Sw {
        mutex: Mutex::new(SwState {
            ticks: 0,
            timer_scheduled: false,
            thread_waiting: false,
            wait_ticks: 0,
        }),
        cv: Condvar::new(),
        timer: Timer::new(sw_timer_run, ptr::null_mut()),
    }));

    // The callback needs its owner back; patch the argument in now that
    // the instance has its final address.
    let sw_ptr = sw as *mut Sw;
    sw.timer = Timer::new(sw_timer_run, sw_ptr.cast());

    SW_INSTANCE.store(sw_ptr, Ordering::Relaxed);

    for cmd in &SW_CMDS {
        error::check(shell::cmd::register(cmd), "sw");
    }
}
