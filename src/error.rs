//! Error types and error handling strategy.
//!
//! This module defines the error types surfaced by the driver and the fd
//! wrapper. Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Only system-call failures become `Error`s; programmer errors (parking a
//!   second task on an occupied rendezvous, misusing a detached event) are
//!   debug assertions
//! - `EINTR` from the readiness poll is absorbed, never surfaced

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The readiness poll failed with something other than `EINTR`.
    PollFailed,
    /// Setting up the signal self-pipe failed.
    PipeSetup,
    /// Installing or resetting a signal handler failed.
    SignalSetup,
    /// A signal number outside the supported table was requested.
    BadSignal,
    /// No driver has been initialised on this thread.
    DriverMissing,
    /// The file descriptor wrapper is closed or invalid.
    ClosedFd,
    /// Creating a descriptor pair (pipe, socketpair) failed.
    DescriptorSetup,
}

/// The error type for driver and fd operations.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<std::io::Error>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds the underlying I/O error.
    #[must_use]
    pub fn with_source(mut self, source: std::io::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Creates an error of the given kind from the current OS error.
    #[must_use]
    pub fn last_os_error(kind: ErrorKind) -> Self {
        Self::new(kind).with_source(std::io::Error::last_os_error())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }
}

/// A specialized Result type for rendez operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::PollFailed);
        assert_eq!(err.to_string(), "PollFailed");
    }

    #[test]
    fn display_with_context() {
        let err = Error::new(ErrorKind::BadSignal).with_context("signum 64");
        assert_eq!(err.to_string(), "BadSignal: signum 64");
    }

    #[test]
    fn source_chain_is_exposed() {
        let io = std::io::Error::from_raw_os_error(libc::EBADF);
        let err = Error::new(ErrorKind::ClosedFd).with_source(io);
        assert!(err.source().is_some());
    }

    #[test]
    fn result_ext_adds_context() {
        let res: core::result::Result<(), ErrorKind> = Err(ErrorKind::DriverMissing);
        let err = res.context("at_delay").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::DriverMissing);
        assert_eq!(err.to_string(), "DriverMissing: at_delay");
    }
}
