//! Kernel error kinds
//!
//! Every fallible public operation reports one of these by return value.
//! Violated invariants are not errors; they panic.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument
    Inval,
    /// Resource temporarily unavailable
    Again,
    /// Not enough space
    NoMem,
    /// Input/output error
    Io,
    /// Resource busy
    Busy,
    /// Entry exists
    Exist,
}

impl Error {
    pub fn as_str(self) -> &'static str {
        match self {
            Error::Inval => "invalid argument",
            Error::Again => "resource temporarily unavailable",
            Error::NoMem => "not enough space",
            Error::Io => "input/output error",
            Error::Busy => "resource busy",
            Error::Exist => "entry exists",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Panic with a prefixed diagnostic if `result` carries an error.
///
/// Used where a failure at setup time leaves nothing sensible to do.
pub fn check<T>(result: Result<T, Error>, prefix: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", prefix, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(Error::Again.as_str(), "resource temporarily unavailable");
        assert_eq!(Error::Exist.as_str(), "entry exists");
    }

    #[test]
    fn test_check_passes_value() {
        assert_eq!(check(Ok::<_, Error>(7), "test"), 7);
    }

    #[test]
    #[should_panic]
    fn test_check_panics_on_error() {
        check::<()>(Err(Error::NoMem), "test");
    }
}
