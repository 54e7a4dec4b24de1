//! Interactive command shell
//!
//! A line-oriented shell running as an ordinary kernel thread. The engine
//! keeps a history ring of fixed-size lines, a cursor into the line being
//! edited, and a small state machine for terminal escape sequences (arrow
//! keys, home/end/delete). Tab completes command names against the sorted
//! command list. Lines are tokenized on spaces and dispatched by exact
//! first-word match.
//!
//! All terminal traffic goes through the per-shell [`ShellIo`] handle, so
//! the engine can run against the UART or against a scripted mock.

pub mod cmd;

use core::fmt::{self, Write};
use core::mem;
use core::ptr;

use crate::config;
use crate::error::{self, Error};
use crate::sync::Mutex;
use crate::thread;
use crate::uart;

use cmd::{CmdSet, Completion, ShellCmd};

const LINE_SIZE: usize = config::SHELL_LINE_SIZE;
const HISTORY_SIZE: usize = config::SHELL_HISTORY_SIZE;
const ESC_SEQ_SIZE: usize = config::SHELL_ESC_SEQ_SIZE;
const MAX_ARGS: usize = config::SHELL_MAX_ARGS;

const SEPARATOR: u8 = b' ';
const ERASE_BS: u8 = b'\x08';
const ERASE_DEL: u8 = b'\x7f';

const COMPLETION_MATCHES_PER_LINE: usize = 4;

/// Byte source and sink tying a shell to its terminal.
pub trait ShellIo: fmt::Write {
    /// Read the next input byte, blocking as needed.
    fn getc(&mut self) -> Result<u8, Error>;
}

/// One entry of the history ring. The line being edited is itself the
/// newest entry.
#[derive(Clone, Copy)]
struct Line {
    buf: [u8; LINE_SIZE],
    size: usize,
}

impl Line {
    const fn new() -> Self {
        Self {
            buf: [0; LINE_SIZE],
            size: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.size]).unwrap_or("")
    }

    fn reset(&mut self) {
        self.size = 0;
    }

    fn insert(&mut self, index: usize, c: u8) -> Result<(), Error> {
        if index > self.size {
            return Err(Error::Inval);
        }

        // One slot is reserved for the terminator of the C string view.
        if self.size + 1 == LINE_SIZE {
            return Err(Error::NoMem);
        }

        self.buf.copy_within(index..self.size, index + 1);
        self.buf[index] = c;
        self.size += 1;
        Ok(())
    }

    fn erase(&mut self, index: usize) -> Result<(), Error> {
        if index >= self.size {
            return Err(Error::Inval);
        }

        self.buf.copy_within(index + 1..self.size, index);
        self.size -= 1;
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EscState {
    /// Regular input.
    None,
    /// An ESC byte was seen.
    Start,
    /// Inside a CSI (or SS3) sequence.
    Csi,
}

pub struct Shell<'io> {
    io: &'io mut dyn ShellIo,
    cmds: &'static Mutex<CmdSet>,

    /// History ring with absolute (wrapping) counters. The entry at
    /// `newest` is the line being edited; `index` tracks the entry last
    /// recalled with up/down and always lies in `[oldest, newest]`.
    history: [Line; HISTORY_SIZE],
    newest: usize,
    oldest: usize,
    index: usize,

    /// Cursor within the current line.
    cursor: usize,

    esc_seq: [u8; ESC_SEQ_SIZE],
    esc_len: usize,
    esc_state: EscState,
}

impl<'io> Shell<'io> {
    pub fn new(io: &'io mut dyn ShellIo, cmds: &'static Mutex<CmdSet>) -> Self {
        Self {
            io,
            cmds,
            history: [Line::new(); HISTORY_SIZE],
            newest: 0,
            oldest: 0,
            index: 0,
            cursor: 0,
            esc_seq: [0; ESC_SEQ_SIZE],
            esc_len: 0,
            esc_state: EscState::None,
        }
    }

    /// The shell's terminal, for command handlers to print through.
    pub fn io(&mut self) -> &mut dyn ShellIo {
        &mut *self.io
    }

    // ------------------------------------------------------------------
    // History ring
    // ------------------------------------------------------------------

    fn history_get(&self, index: usize) -> &Line {
        &self.history[index % HISTORY_SIZE]
    }

    fn history_get_mut(&mut self, index: usize) -> &mut Line {
        &mut self.history[index % HISTORY_SIZE]
    }

    fn current_line(&self) -> &Line {
        self.history_get(self.newest)
    }

    fn current_line_mut(&mut self) -> &mut Line {
        self.history_get_mut(self.newest)
    }

    fn history_same_newest(&self) -> bool {
        self.newest != self.oldest
            && self.current_line().as_str()
                == self.history_get(self.newest.wrapping_sub(1)).as_str()
    }

    /// Commit the current line. Empty lines and repeats of the previous
    /// entry are not recorded.
    fn history_push(&mut self) {
        if self.current_line().size == 0 || self.history_same_newest() {
            self.index = self.newest;
            return;
        }

        self.newest = self.newest.wrapping_add(1);
        self.index = self.newest;

        // Mind integer overflows.
        if self.newest.wrapping_sub(self.oldest) >= HISTORY_SIZE {
            self.oldest = self.newest.wrapping_sub(HISTORY_SIZE - 1);
        }
    }

    fn history_back(&mut self) {
        if self.index == self.oldest {
            return;
        }

        self.index = self.index.wrapping_sub(1);
        let line = *self.history_get(self.index);
        *self.current_line_mut() = line;
    }

    fn history_forward(&mut self) {
        if self.index == self.newest {
            return;
        }

        self.index = self.index.wrapping_add(1);

        if self.index == self.newest {
            self.current_line_mut().reset();
        } else {
            let line = *self.history_get(self.index);
            *self.current_line_mut() = line;
        }
    }

    // ------------------------------------------------------------------
    // Screen updates
    // ------------------------------------------------------------------

    fn prompt(&mut self) {
        let _ = self.io.write_str("shell> ");
    }

    /// Start over with an empty line and a fresh prompt.
    pub fn reset(&mut self) {
        self.current_line_mut().reset();
        self.cursor = 0;
        self.esc_state = EscState::None;
        self.esc_len = 0;
        self.prompt();
    }

    /// Wipe the current line from the screen.
    fn erase(&mut self) {
        let mut remaining = self.current_line().size;

        while self.cursor != remaining {
            let _ = self.io.write_char(' ');
            self.cursor += 1;
        }

        while remaining != 0 {
            let _ = self.io.write_str("\x08 \x08");
            remaining -= 1;
        }

        self.cursor = 0;
    }

    /// Redraw the current line, leaving the cursor at its end.
    fn restore(&mut self) {
        let line = *self.current_line();
        let _ = self.io.write_str(line.as_str());
        self.cursor = line.size;
    }

    fn process_left(&mut self) {
        if self.cursor == 0 {
            return;
        }

        self.cursor -= 1;
        let _ = self.io.write_str("\x1b[1D");
    }

    fn process_right(&mut self) -> Result<(), Error> {
        if self.cursor >= self.current_line().size {
            return Err(Error::Again);
        }

        self.cursor += 1;
        let _ = self.io.write_str("\x1b[1C");
        Ok(())
    }

    fn process_home(&mut self) {
        while self.cursor != 0 {
            self.process_left();
        }
    }

    fn process_end(&mut self) {
        while self.cursor < self.current_line().size {
            let _ = self.process_right();
        }
    }

    fn process_up(&mut self) {
        self.erase();
        self.history_back();
        self.restore();
    }

    fn process_down(&mut self) {
        self.erase();
        self.history_forward();
        self.restore();
    }

    fn process_backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }

        let erase_pos = self.cursor - 1;
        if self.current_line_mut().erase(erase_pos).is_err() {
            return;
        }

        self.cursor -= 1;

        // Redraw the tail, blank the vacated cell, walk the cursor back.
        let line = *self.current_line();
        let tail = &line.as_str()[self.cursor..];
        let _ = write!(self.io, "\x08{} ", tail);

        let mut remaining = tail.len() + 1;
        while remaining != 0 {
            let _ = self.io.write_char('\x08');
            remaining -= 1;
        }
    }

    fn process_del(&mut self) {
        if self.process_right().is_ok() {
            self.process_backspace();
        }
    }

    fn process_raw_char(&mut self, c: u8) -> Result<(), Error> {
        let cursor = self.cursor;

        if let Err(e) = self.current_line_mut().insert(cursor, c) {
            let _ = self.io.write_str("\nshell: line too long\n");
            return Err(e);
        }

        self.cursor += 1;
        let line = *self.current_line();

        if self.cursor == line.size {
            let _ = self.io.write_char(c as char);
            return Ok(());
        }

        // Inserting mid-line: redraw from the new character on, then move
        // the cursor back over the tail. Backspace only moves the cursor.
        let _ = self.io.write_str(&line.as_str()[self.cursor - 1..]);

        let mut remaining = line.size - self.cursor;
        while remaining != 0 {
            let _ = self.io.write_char('\x08');
            remaining -= 1;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    fn print_matches(&mut self, first: &'static ShellCmd, size: usize) {
        let _ = self.io.write_char('\n');

        let prefix = &first.name()[..size.min(first.name().len())];
        let mut printed = 0;

        for tmp in first.iter_sorted() {
            if !tmp.name().starts_with(prefix) {
                break;
            }

            let _ = write!(self.io, "{:<16}", tmp.name());
            printed += 1;

            if printed % COMPLETION_MATCHES_PER_LINE == 0 {
                let _ = self.io.write_char('\n');
            }
        }

        if printed % COMPLETION_MATCHES_PER_LINE != 0 {
            let _ = self.io.write_char('\n');
        }
    }

    fn process_tabulation(&mut self) -> Result<(), Error> {
        let line = *self.current_line();
        let s = line.as_str();

        // Completion applies to the command word only: skip the leading
        // separators, take what lies before the cursor.
        let word_start = s
            .bytes()
            .position(|b| b != SEPARATOR)
            .unwrap_or(s.len())
            .min(self.cursor);
        let word = &s[word_start..self.cursor];
        let cmd_cursor = word_start;

        // Hold the set across the whole operation so registration cannot
        // reorder the chain while matches are being listed.
        let cmds = self.cmds;
        let set = cmds.lock();

        let (cmd, size) = match set.complete(word) {
            Completion::NoMatch => return Ok(()),
            Completion::Unique { cmd, size } => (cmd, size),
            Completion::Partial { first, size } => {
                // Several candidates: list them, then re-issue the prompt
                // and the line, putting the cursor back where it was.
                let cursor = self.cursor;

                self.print_matches(first, size);
                self.prompt();
                self.restore();

                while self.cursor != cursor {
                    self.process_left();
                }

                (first, size)
            }
        };

        // Retype the word as the completed name.
        while self.cursor != cmd_cursor {
            self.process_backspace();
        }

        for &b in &cmd.name().as_bytes()[..size] {
            self.process_raw_char(b)?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Escape sequences
    // ------------------------------------------------------------------

    /// Process one CSI byte. Returns the next parser state.
    fn process_esc_sequence(&mut self, c: u8) -> EscState {
        if self.esc_len >= ESC_SEQ_SIZE - 1 {
            let _ = self.io.write_str("\nshell: escape sequence too long\n");
            self.esc_len = 0;
            return EscState::None;
        }

        self.esc_seq[self.esc_len] = c;
        self.esc_len += 1;

        // A byte in [@, ~] terminates a CSI sequence.
        if !(b'@'..=b'~').contains(&c) {
            return EscState::Csi;
        }

        let seq = self.esc_seq;
        let len = mem::replace(&mut self.esc_len, 0);

        match &seq[..len] {
            b"A" => self.process_up(),
            b"B" => self.process_down(),
            b"C" => {
                let _ = self.process_right();
            }
            b"D" => self.process_left(),
            b"H" | b"1~" => self.process_home(),
            b"F" | b"4~" => self.process_end(),
            b"3~" => self.process_del(),
            // Unknown sequences are silently consumed.
            _ => {}
        }

        EscState::None
    }

    // ------------------------------------------------------------------
    // Line dispatch
    // ------------------------------------------------------------------

    fn process_line(&mut self) {
        // Tokenize a copy, so the handler may scribble over shell state.
        let line = *self.current_line();
        let s = line.as_str();

        let mut argv: [&str; MAX_ARGS] = [""; MAX_ARGS];
        let mut argc = 0;
        let mut overflow = false;

        for token in s.split(SEPARATOR as char).filter(|t| !t.is_empty()) {
            if argc == MAX_ARGS {
                let _ = self.io.write_str("shell: too many arguments\n");
                overflow = true;
                break;
            }

            argv[argc] = token;
            argc += 1;
        }

        let cmd = if overflow || argc == 0 {
            None
        } else {
            let found = {
                let cmds = self.cmds;
                let set = cmds.lock();
                set.lookup(argv[0])
            };

            if found.is_none() {
                let _ = write!(self.io, "shell: {}: command not found\n", argv[0]);
            }

            found
        };

        self.history_push();

        if let Some(cmd) = cmd {
            cmd.invoke(self, &argv[..argc]);
        }
    }

    /// Process one control character. Returns true when the caller should
    /// reset the line state.
    fn process_ctrl_char(&mut self, c: u8) -> bool {
        match c {
            ERASE_BS | ERASE_DEL => {
                self.process_backspace();
                false
            }
            b'\t' => self.process_tabulation().is_err(),
            b'\n' | b'\r' => {
                let _ = self.io.write_char('\n');
                self.process_line();
                true
            }
            _ => false,
        }
    }

    fn is_ctrl_char(c: u8) -> bool {
        c < b' ' || c >= 0x7f
    }

    /// Feed one input byte through the editor. Returns true when the
    /// current line is finished (submitted or abandoned) and the caller
    /// should [`reset`](Shell::reset).
    pub fn feed(&mut self, c: u8) -> bool {
        match self.esc_state {
            EscState::Start => {
                // CSI and SS3 sequences are handled alike.
                self.esc_state = if c == b'[' || c == b'O' {
                    EscState::Csi
                } else {
                    EscState::None
                };
                false
            }
            EscState::Csi => {
                self.esc_state = self.process_esc_sequence(c);
                false
            }
            EscState::None => {
                if Self::is_ctrl_char(c) {
                    if c == 0x1b {
                        self.esc_state = EscState::Start;
                        return false;
                    }
                    self.process_ctrl_char(c)
                } else {
                    self.process_raw_char(c).is_err()
                }
            }
        }
    }

    /// Serve the terminal forever.
    pub fn run(&mut self) -> ! {
        loop {
            self.reset();

            loop {
                match self.io.getc() {
                    Ok(c) => {
                        if self.feed(c) {
                            break;
                        }
                    }
                    // A second reader or a dead terminal; nothing sane to
                    // do but retry.
                    Err(_) => {}
                }
            }
        }
    }
}

// ============================================================================
// Built-in commands
// ============================================================================

fn cmd_help(shell: &mut Shell<'_>, argv: &[&str]) {
    // More than one argument: show the help of help itself.
    let name = if argv.len() > 2 {
        Some("help")
    } else {
        argv.get(1).copied()
    };

    if let Some(name) = name {
        let found = {
            let cmds = shell.cmds;
            let set = cmds.lock();
            set.lookup(name)
        };

        match found {
            None => {
                let _ = write!(shell.io(), "shell: help: {}: command not found\n", name);
            }
            Some(cmd) => {
                let _ = write!(shell.io(), "usage: {}\n{}\n", cmd.usage(), cmd.short_desc());

                if let Some(long_desc) = cmd.long_desc() {
                    let _ = write!(shell.io(), "\n{}\n", long_desc);
                }
            }
        }

        return;
    }

    let cmds = shell.cmds;
    let set = cmds.lock();

    for cmd in set.iter() {
        let _ = write!(shell.io, "{:>13}  {}\n", cmd.name(), cmd.short_desc());
    }
}

fn cmd_history(shell: &mut Shell<'_>, _argv: &[&str]) {
    let mut i = shell.oldest;

    // Mind integer overflows.
    while i != shell.newest {
        let line = *shell.history_get(i);
        let offset = i.wrapping_sub(shell.oldest) + 1;
        let _ = write!(shell.io, "{:6}  {}\n", offset, line.as_str());
        i = i.wrapping_add(1);
    }
}

static HELP_CMD: ShellCmd = ShellCmd::new(
    "help",
    cmd_help,
    "help [command]",
    "obtain help about shell commands",
    None,
);

static HISTORY_CMD: ShellCmd = ShellCmd::new(
    "history",
    cmd_history,
    "history",
    "display history list",
    None,
);

// ============================================================================
// The shell thread
// ============================================================================

/// Terminal handle backed by the UART.
struct UartIo;

impl fmt::Write for UartIo {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            uart::write(b);
        }

        Ok(())
    }
}

impl ShellIo for UartIo {
    fn getc(&mut self) -> Result<u8, Error> {
        uart::read()
    }
}

fn shell_main(_arg: *mut ()) {
    let mut io = UartIo;
    let mut shell = Shell::new(&mut io, cmd::registry());
    shell.run();
}

pub(crate) fn setup() {
    error::check(cmd::register(&HELP_CMD), "shell");
    error::check(cmd::register(&HISTORY_CMD), "shell");

    let handle = match thread::spawn(
        shell_main,
        ptr::null_mut(),
        "shell",
        config::SHELL_STACK_SIZE,
        config::MIN_PRIORITY,
    ) {
        Ok(handle) => handle,
        Err(e) => panic!("shell: unable to create shell thread: {}", e),
    };

    // The shell thread never exits and is never reaped.
    mem::forget(handle);
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::boxed::Box;
    use std::collections::VecDeque;
    use std::string::String;
    use std::vec::Vec;

    struct MockIo {
        input: VecDeque<u8>,
        output: Vec<u8>,
    }

    impl MockIo {
        fn new() -> Self {
            Self {
                input: VecDeque::new(),
                output: Vec::new(),
            }
        }
    }

    impl fmt::Write for MockIo {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.output.extend_from_slice(s.as_bytes());
            Ok(())
        }
    }

    impl ShellIo for MockIo {
        fn getc(&mut self) -> Result<u8, Error> {
            self.input.pop_front().ok_or(Error::Io)
        }
    }

    fn nop(_shell: &mut Shell<'_>, _argv: &[&str]) {}

    fn leak_registry(names: &[&'static str]) -> &'static Mutex<CmdSet> {
        let mut set = CmdSet::new();
        for &name in names {
            let cmd = Box::leak(Box::new(ShellCmd::new(name, nop, name, "test", None)));
            set.register(cmd).unwrap();
        }
        Box::leak(Box::new(Mutex::new(set)))
    }

    fn feed_str(shell: &mut Shell<'_>, input: &str) {
        for b in input.bytes() {
            if shell.feed(b) {
                shell.reset();
            }
        }
    }

    fn line_of(shell: &Shell<'_>) -> String {
        String::from(shell.current_line().as_str())
    }

    /// Minimal terminal model covering exactly what the engine emits:
    /// printable bytes, backspace-as-cursor-move, CR/LF, cursor motion
    /// escapes, and the blank-then-backspace erase idiom.
    struct Term {
        row: Vec<char>,
        cursor: usize,
    }

    impl Term {
        fn new() -> Self {
            Self {
                row: Vec::new(),
                cursor: 0,
            }
        }

        fn apply(&mut self, bytes: &[u8]) {
            let mut i = 0;

            while i < bytes.len() {
                match bytes[i] {
                    0x08 => self.cursor = self.cursor.saturating_sub(1),
                    b'\n' | b'\r' => {
                        self.row.clear();
                        self.cursor = 0;
                    }
                    0x1b => {
                        assert_eq!(bytes.get(i + 1), Some(&b'['), "unexpected escape");
                        assert_eq!(bytes.get(i + 2), Some(&b'1'), "unexpected escape");
                        match bytes.get(i + 3) {
                            Some(b'C') => self.cursor += 1,
                            Some(b'D') => self.cursor = self.cursor.saturating_sub(1),
                            other => panic!("unexpected escape terminator {:?}", other),
                        }
                        i += 3;
                    }
                    c => {
                        if self.cursor == self.row.len() {
                            self.row.push(c as char);
                        } else {
                            self.row[self.cursor] = c as char;
                        }
                        self.cursor += 1;
                    }
                }

                i += 1;
            }
        }

        fn text(&self) -> String {
            let s: String = self.row.iter().collect();
            String::from(s.trim_end())
        }
    }

    fn render(output: &[u8]) -> Term {
        let mut term = Term::new();
        term.apply(output);
        term
    }

    const PROMPT_LEN: usize = 7;

    #[test]
    fn test_plain_typing_echoes() {
        let reg = leak_registry(&[]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "hello");
        assert_eq!(line_of(&shell), "hello");
        assert_eq!(shell.cursor, 5);

        let term = render(&io.output);
        assert_eq!(term.text(), "shell> hello");
        assert_eq!(term.cursor, PROMPT_LEN + 5);
    }

    #[test]
    fn test_cursor_motion_and_insert() {
        let reg = leak_registry(&[]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "helo");
        // Left arrow twice, insert the missing l.
        feed_str(&mut shell, "\x1b[D\x1b[D");
        assert_eq!(shell.cursor, 2);
        feed_str(&mut shell, "l");

        assert_eq!(line_of(&shell), "hello");
        assert_eq!(shell.cursor, 3);

        let term = render(&io.output);
        assert_eq!(term.text(), "shell> hello");
        assert_eq!(term.cursor, PROMPT_LEN + 3);
    }

    #[test]
    fn test_home_end_delete() {
        let reg = leak_registry(&[]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "xabc");
        feed_str(&mut shell, "\x1b[H");
        assert_eq!(shell.cursor, 0);
        // Delete the leading x.
        feed_str(&mut shell, "\x1b[3~");
        assert_eq!(line_of(&shell), "abc");
        feed_str(&mut shell, "\x1b[F");
        assert_eq!(shell.cursor, 3);

        let term = render(&io.output);
        assert_eq!(term.text(), "shell> abc");
        assert_eq!(term.cursor, PROMPT_LEN + 3);
    }

    #[test]
    fn test_backspace_redraws_tail() {
        let reg = leak_registry(&[]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "abcd\x1b[D\x1b[D");
        feed_str(&mut shell, "\x08");

        assert_eq!(line_of(&shell), "acd");
        assert_eq!(shell.cursor, 1);

        let term = render(&io.output);
        assert_eq!(term.text(), "shell> acd");
        assert_eq!(term.cursor, PROMPT_LEN + 1);
    }

    #[test]
    fn test_ss3_prefix_and_unknown_sequences() {
        let reg = leak_registry(&[]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "ab\x1bOD");
        assert_eq!(shell.cursor, 1);
        // Unknown sequence: consumed without effect.
        feed_str(&mut shell, "\x1b[5~");
        assert_eq!(line_of(&shell), "ab");
        assert_eq!(shell.cursor, 1);
        // A bare escape followed by a regular byte cancels the parser;
        // the byte itself is swallowed with it.
        feed_str(&mut shell, "\x1bq");
        assert_eq!(line_of(&shell), "ab");
    }

    #[test]
    fn test_escape_sequence_overflow_resets_parser() {
        let reg = leak_registry(&[]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        // Seven parameter bytes fill the sequence buffer; the terminator
        // overflows it and is swallowed with the diagnostic. The parser
        // recovers and typing works again.
        feed_str(&mut shell, "\x1b[1;2;3;4m");
        feed_str(&mut shell, "ok");
        assert_eq!(line_of(&shell), "ok");

        assert!(String::from_utf8_lossy(&io.output).contains("escape sequence too long"));
    }

    #[test]
    fn test_line_overflow_reports_and_resets() {
        let reg = leak_registry(&[]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        for _ in 0..LINE_SIZE + 8 {
            if shell.feed(b'x') {
                shell.reset();
                break;
            }
        }

        assert_eq!(line_of(&shell), "");
        assert!(String::from_utf8_lossy(&io.output).contains("line too long"));
    }

    #[test]
    fn test_dispatch_tokenizes_and_collapses_separators() {
        static SEEN: Mutex<Vec<String>> = Mutex::new(Vec::new());

        fn record(_shell: &mut Shell<'_>, argv: &[&str]) {
            let mut seen = SEEN.lock();
            seen.clear();
            for a in argv {
                seen.push(String::from(*a));
            }
        }

        let mut set = CmdSet::new();
        let cmd = Box::leak(Box::new(ShellCmd::new("tok", record, "tok", "test", None)));
        set.register(cmd).unwrap();
        let reg: &'static Mutex<CmdSet> = Box::leak(Box::new(Mutex::new(set)));

        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "  tok   one  two ");
        assert!(shell.feed(b'\r'));

        assert_eq!(*SEEN.lock(), ["tok", "one", "two"]);
    }

    #[test]
    fn test_dispatch_unknown_command() {
        let reg = leak_registry(&["help"]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "nosuch\r");

        assert!(
            String::from_utf8_lossy(&io.output).contains("shell: nosuch: command not found")
        );
    }

    #[test]
    fn test_too_many_arguments() {
        let reg = leak_registry(&["help"]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "help 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16\r");

        assert!(String::from_utf8_lossy(&io.output).contains("too many arguments"));
    }

    #[test]
    fn test_history_recall_and_dedup() {
        let reg = leak_registry(&["help"]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        for line in ["first", "second", "second", "third"] {
            feed_str(&mut shell, line);
            assert!(shell.feed(b'\r'));
            shell.reset();
        }

        // The repeated entry was collapsed.
        assert_eq!(shell.newest.wrapping_sub(shell.oldest), 3);

        // Up recalls entries newest-first.
        feed_str(&mut shell, "\x1b[A");
        assert_eq!(line_of(&shell), "third");
        feed_str(&mut shell, "\x1b[A");
        assert_eq!(line_of(&shell), "second");
        feed_str(&mut shell, "\x1b[A");
        assert_eq!(line_of(&shell), "first");
        // Past the oldest entry: unchanged.
        feed_str(&mut shell, "\x1b[A");
        assert_eq!(line_of(&shell), "first");

        // Down walks back and clears past the newest.
        feed_str(&mut shell, "\x1b[B\x1b[B");
        assert_eq!(line_of(&shell), "third");
        feed_str(&mut shell, "\x1b[B");
        assert_eq!(line_of(&shell), "");
    }

    #[test]
    fn test_history_ring_overflow_drops_oldest() {
        let reg = leak_registry(&[]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        for i in 0..HISTORY_SIZE + 5 {
            feed_str(&mut shell, "cmd");
            // Make each line unique so nothing is collapsed.
            let digit = b'0' + (i % 10) as u8;
            shell.feed(digit);
            assert!(shell.feed(b'\r'));
            shell.reset();
        }

        assert_eq!(
            shell.newest.wrapping_sub(shell.oldest),
            HISTORY_SIZE - 1
        );

        // The oldest reachable entry is the first still in the ring.
        for _ in 0..HISTORY_SIZE + 10 {
            feed_str(&mut shell, "\x1b[A");
        }
        assert_eq!(line_of(&shell), "cmd6");
    }

    #[test]
    fn test_history_command_output() {
        let mut set = CmdSet::new();
        set.register(&HISTORY_CMD).unwrap();
        let reg: &'static Mutex<CmdSet> = Box::leak(Box::new(Mutex::new(set)));

        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        for line in ["alpha", "beta", "history"] {
            feed_str(&mut shell, line);
            assert!(shell.feed(b'\r'));
            shell.reset();
        }

        // The history command runs after its own line is recorded, so the
        // listing is one-based and ends with the command itself.
        let output = String::from_utf8_lossy(&io.output).into_owned();
        assert!(output.contains("     1  alpha"));
        assert!(output.contains("     2  beta"));
        assert!(output.contains("     3  history"));
    }

    #[test]
    fn test_completion_lists_and_keeps_cursor() {
        let reg = leak_registry(&[
            "help", "history", "led_blink", "sw_read", "sw_resume", "sw_start", "sw_stop",
            "sw_wait",
        ]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "sw_\t");

        assert_eq!(line_of(&shell), "sw_");
        assert_eq!(shell.cursor, 3);

        let output = String::from_utf8_lossy(&io.output).into_owned();
        for name in ["sw_read", "sw_resume", "sw_start", "sw_stop", "sw_wait"] {
            assert!(output.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_completion_extends_to_common_prefix() {
        let reg = leak_registry(&["sw_start", "sw_stop", "help"]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "sw\t");

        // Both candidates share "sw_st".
        assert_eq!(line_of(&shell), "sw_st");
        assert_eq!(shell.cursor, 5);

        let output = String::from_utf8_lossy(&io.output).into_owned();
        assert!(output.contains("sw_start"));
        assert!(output.contains("sw_stop"));
    }

    #[test]
    fn test_completion_unique_completes_fully() {
        let reg = leak_registry(&["help", "history"]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "he\t");

        assert_eq!(line_of(&shell), "help");
        assert_eq!(shell.cursor, 4);

        let term = render(&io.output);
        assert_eq!(term.text(), "shell> help");
    }

    #[test]
    fn test_completion_no_match_leaves_line() {
        let reg = leak_registry(&["help"]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        shell.reset();
        feed_str(&mut shell, "zz\t");

        assert_eq!(line_of(&shell), "zz");
        assert_eq!(shell.cursor, 2);
    }

    #[test]
    fn test_completion_preserves_arguments() {
        let reg = leak_registry(&["help", "history"]);
        let mut io = MockIo::new();
        let mut shell = Shell::new(&mut io, reg);

        // Completing the command word with arguments present keeps them.
        shell.reset();
        feed_str(&mut shell, "h");
        feed_str(&mut shell, "\t");

        // "h" is ambiguous between help and history: stays "h", lists both.
        assert_eq!(line_of(&shell), "h");
        let output = String::from_utf8_lossy(&io.output).into_owned();
        assert!(output.contains("help"));
        assert!(output.contains("history"));
    }
}
