//! Utilities dealing with error handling in this crate.

use failure::Fail;

/// Errors produced by this crate.
#[derive(Debug, Fail)]
pub enum Error {
    /// Errors originating from the OS while managing executable memory.
    #[fail(display = "System Error - {}", _0)]
    System(#[cause] std::io::Error),
    /// Errors originating from calls to `std::env::*`.
    #[fail(display = "Env Error - {}", _0)]
    Env(#[cause] std::env::VarError),
    /// The target is not x86 or the `cpuid` instruction is absent.
    #[fail(display = "cpuid is not available on this platform")]
    UnsupportedPlatform,
    /// A write would run past the end of a code buffer.
    #[fail(
        display = "Code buffer overflow - {} bytes written, {} requested, capacity {}",
        len, requested, capacity
    )]
    BufferOverflow {
        /// Bytes already in the buffer.
        len: usize,
        /// Bytes the rejected write carried.
        requested: usize,
        /// Total capacity of the buffer.
        capacity: usize,
    },
    /// A configured codename is not one this crate knows.
    #[fail(display = "Unknown microarchitecture codename '{}'", _0)]
    UnknownCodename(String),
    /// A configured invoker strategy is not one this crate knows.
    #[fail(display = "Unknown cpuid invoker '{}'", _0)]
    UnknownStrategy(String),
}

impl Error {
    /// Create a new instance of error from the last OS error (`errno` or `GetLastError`).
    #[inline]
    pub fn last_os_error() -> Self {
        Error::System(std::io::Error::last_os_error())
    }
}

macro_rules! error_from {
    ($et: ty => $cet: expr) => {
        impl From<$et> for Error {
            #[inline]
            fn from(err: $et) -> Self {
                $cet(err)
            }
        }
    };
}

error_from!(std::io::Error => Error::System);
error_from!(std::env::VarError => Error::Env);

#[cfg(unix)]
impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        match err.as_errno() {
            Some(errno) => Error::System(std::io::Error::from_raw_os_error(errno as i32)),
            None => Error::System(std::io::Error::new(
                std::io::ErrorKind::Other,
                err.to_string(),
            )),
        }
    }
}

/// Result type used in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_error_conversion() {
        let err: Error = std::env::VarError::NotPresent.into();
        match err {
            Error::Env(std::env::VarError::NotPresent) => {}
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_nix_error_keeps_errno() {
        let err: Error = nix::Error::Sys(nix::errno::Errno::ENOMEM).into();
        match err {
            Error::System(e) => assert_eq!(e.raw_os_error(), Some(nix::libc::ENOMEM)),
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn test_overflow_message() {
        let err = Error::BufferOverflow {
            len: 4,
            requested: 8,
            capacity: 10,
        };
        assert_eq!(
            err.to_string(),
            "Code buffer overflow - 4 bytes written, 8 requested, capacity 10"
        );
    }
}
