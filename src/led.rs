//! Blinking LED demo
//!
//! A self-rescheduling one-second timer toggling the board LED, with a
//! shell command to pause and resume the blinking. The timer keeps running
//! either way so the blink phase stays aligned.

use core::fmt::Write;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config;
use crate::cpu;
use crate::error;
use crate::shell::{self, Shell, cmd::ShellCmd};
use crate::timer::{self, Timer};

const BLINK_INTERVAL: usize = config::SCHED_FREQ;

static LED_TIMER: Timer = Timer::new(led_toggle, ptr::null_mut());
static LED_ON: AtomicBool = AtomicBool::new(false);
static BLINKING_ENABLED: AtomicBool = AtomicBool::new(false);

fn led_toggle(_arg: *mut ()) {
    let led_on = LED_ON.load(Ordering::Relaxed);

    if BLINKING_ENABLED.load(Ordering::Relaxed) {
        cpu::led_set(!led_on);
    }

    LED_ON.store(!led_on, Ordering::Relaxed);
    timer::schedule(&LED_TIMER, LED_TIMER.time().wrapping_add(BLINK_INTERVAL));
}

fn cmd_led_blink(shell: &mut Shell<'_>, argv: &[&str]) {
    let enabled = match argv {
        [_] => {
            let blinking = BLINKING_ENABLED.load(Ordering::Relaxed);
            let _ = write!(
                shell.io(),
                "led: blinking: {}\n",
                if blinking { "yes" } else { "no" }
            );
            return;
        }
        [_, "on"] => true,
        [_, "off"] => false,
        _ => {
            let _ = shell.io().write_str("led: error: invalid arguments\n");
            return;
        }
    };

    BLINKING_ENABLED.store(enabled, Ordering::Relaxed);
}

static LED_BLINK_CMD: ShellCmd = ShellCmd::new(
    "led_blink",
    cmd_led_blink,
    "led_blink [on|off]",
    "control led blinking",
    None,
);

pub(crate) fn setup() {
    cpu::led_set(false);
    LED_ON.store(false, Ordering::Relaxed);
    BLINKING_ENABLED.store(true, Ordering::Relaxed);

    error::check(shell::cmd::register(&LED_BLINK_CMD), "led");

    timer::schedule(&LED_TIMER, timer::now().wrapping_add(BLINK_INTERVAL));
}
