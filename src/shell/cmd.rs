//! Shell command set
//!
//! Commands are static records kept in two structures at once: a fixed
//! power-of-two hash table chained by name for exact lookup, and a singly
//! linked list sorted by name for listing and prefix completion. A mutex
//! guards both during registration; lookups take it only briefly and hand
//! out plain references, since records are immutable once registered.

use core::cell::Cell;

use crate::config;
use crate::error::Error;
use crate::sync::Mutex;

/// Command handlers receive the calling shell (for I/O and shell state)
/// and the whitespace-separated tokens, command name first.
pub type CmdFn = fn(&mut super::Shell<'_>, &[&str]);

const HTABLE_SIZE: usize = 1 << config::SHELL_HTABLE_BITS;

/// djb2 variant with k=31, truncated to the table bit width.
fn hash_str(name: &str, bits: u32) -> usize {
    let mut hash: usize = 0;

    for byte in name.bytes() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(byte as usize);
    }

    hash & ((1 << bits) - 1)
}

/// A shell command record.
///
/// Registered records must have static lifetime; the chain links are
/// mutated only while the owning set's mutex is held.
pub struct ShellCmd {
    name: &'static str,
    f: CmdFn,
    usage: &'static str,
    short_desc: &'static str,
    long_desc: Option<&'static str>,
    ht_next: Cell<Option<&'static ShellCmd>>,
    ls_next: Cell<Option<&'static ShellCmd>>,
}

// SAFETY: the cells are only written during registration, under the
// command set mutex.
unsafe impl Sync for ShellCmd {}

impl ShellCmd {
    pub const fn new(
        name: &'static str,
        f: CmdFn,
        usage: &'static str,
        short_desc: &'static str,
        long_desc: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            f,
            usage,
            short_desc,
            long_desc,
            ht_next: Cell::new(None),
            ls_next: Cell::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn usage(&self) -> &'static str {
        self.usage
    }

    pub fn short_desc(&self) -> &'static str {
        self.short_desc
    }

    pub fn long_desc(&self) -> Option<&'static str> {
        self.long_desc
    }

    pub(super) fn invoke(&self, shell: &mut super::Shell<'_>, argv: &[&str]) {
        (self.f)(shell, argv)
    }

    /// Following entries in name order, starting with this one.
    pub(super) fn iter_sorted(&'static self) -> SortedIter {
        SortedIter { next: Some(self) }
    }
}

pub(super) struct SortedIter {
    next: Option<&'static ShellCmd>,
}

impl Iterator for SortedIter {
    type Item = &'static ShellCmd;

    fn next(&mut self) -> Option<&'static ShellCmd> {
        let cmd = self.next?;
        self.next = cmd.ls_next.get();
        Some(cmd)
    }
}

/// Result of prefix completion over the sorted list.
pub(super) enum Completion {
    /// Nothing starts with the prefix.
    NoMatch,
    /// Exactly one command matches; `size` is its full name length.
    Unique {
        cmd: &'static ShellCmd,
        size: usize,
    },
    /// Several commands match; `size` is the length of their longest
    /// common prefix and `first` the first of them in name order.
    Partial {
        first: &'static ShellCmd,
        size: usize,
    },
}

pub struct CmdSet {
    htable: [Option<&'static ShellCmd>; HTABLE_SIZE],
    sorted: Option<&'static ShellCmd>,
}

impl CmdSet {
    pub const fn new() -> Self {
        Self {
            htable: [None; HTABLE_SIZE],
            sorted: None,
        }
    }

    fn check_name(name: &str) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::Inval);
        }

        for byte in name.bytes() {
            if !(byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_') {
                return Err(Error::Inval);
            }
        }

        Ok(())
    }

    fn add_sorted(&mut self, cmd: &'static ShellCmd) {
        match self.sorted {
            Some(head) if cmd.name > head.name => {
                let mut prev = head;

                loop {
                    match prev.ls_next.get() {
                        Some(next) if next.name < cmd.name => prev = next,
                        next => {
                            cmd.ls_next.set(next);
                            prev.ls_next.set(Some(cmd));
                            return;
                        }
                    }
                }
            }
            head => {
                cmd.ls_next.set(head);
                self.sorted = Some(cmd);
            }
        }
    }

    /// Register a command.
    ///
    /// Names are validated (`[A-Za-z0-9_-]+`, `Inval` otherwise) and must
    /// be unique (`Exist` otherwise).
    pub fn register(&mut self, cmd: &'static ShellCmd) -> Result<(), Error> {
        Self::check_name(cmd.name)?;

        let bucket = hash_str(cmd.name, config::SHELL_HTABLE_BITS);

        match self.htable[bucket] {
            None => self.htable[bucket] = Some(cmd),
            Some(head) => {
                let mut tail = head;

                loop {
                    if tail.name == cmd.name {
                        return Err(Error::Exist);
                    }

                    match tail.ht_next.get() {
                        Some(next) => tail = next,
                        None => break,
                    }
                }

                tail.ht_next.set(Some(cmd));
            }
        }

        self.add_sorted(cmd);
        Ok(())
    }

    /// Exact lookup by name.
    pub fn lookup(&self, name: &str) -> Option<&'static ShellCmd> {
        let mut cmd = self.htable[hash_str(name, config::SHELL_HTABLE_BITS)];

        while let Some(c) = cmd {
            if c.name == name {
                return Some(c);
            }

            cmd = c.ht_next.get();
        }

        None
    }

    /// Iterate all commands in name order.
    pub(super) fn iter(&self) -> SortedIter {
        SortedIter { next: self.sorted }
    }

    fn match_first(&self, prefix: &str) -> Option<&'static ShellCmd> {
        self.iter().find(|cmd| cmd.name.starts_with(prefix))
    }

    /// Attempt command completion for `prefix`.
    ///
    /// The returned size is the longest prefix shared by every command
    /// matching the input, or the full name length on a unique match; it
    /// never shrinks below the input.
    pub(super) fn complete(&self, prefix: &str) -> Completion {
        let Some(first) = self.match_first(prefix) else {
            return Completion::NoMatch;
        };

        // A unique match completes to the whole name. Since the list is
        // sorted, all matches are consecutive: it suffices to look at the
        // immediate successor.
        let next = first.ls_next.get();
        match next {
            Some(next) if next.name.starts_with(prefix) => {}
            _ => {
                return Completion::Unique {
                    cmd: first,
                    size: first.name.len(),
                };
            }
        }

        // Find the last match, then grow the common length by comparing
        // the first and last names; every name in between shares whatever
        // those two share.
        let mut last = first;
        for cmd in first.iter_sorted().skip(1) {
            if !cmd.name.starts_with(prefix) {
                break;
            }
            last = cmd;
        }

        let mut size = prefix.len().max(1);

        loop {
            let a = first.name.as_bytes().get(size - 1);
            let b = last.name.as_bytes().get(size - 1);

            match (a, b) {
                (Some(a), Some(b)) if a == b => size += 1,
                _ => break,
            }
        }

        Completion::Partial {
            first,
            size: size - 1,
        }
    }
}

impl Default for CmdSet {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel-wide command set.
static REGISTRY: Mutex<CmdSet> = Mutex::new(CmdSet::new());

pub(crate) fn registry() -> &'static Mutex<CmdSet> {
    &REGISTRY
}

/// Register a command with the kernel-wide set.
pub fn register(cmd: &'static ShellCmd) -> Result<(), Error> {
    let result = REGISTRY.lock().register(cmd);

    if result == Err(Error::Exist) {
        crate::println!("shell: error: {}: command name collision", cmd.name());
    }

    result
}
