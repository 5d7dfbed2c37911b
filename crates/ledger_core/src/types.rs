use std::fmt;
use std::io;

use thiserror::Error;

/// Size of the canary written directly in front of every secret.
pub const CANARY_SIZE: usize = 16;

/// Visibility of a secret's pages to the owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protection {
    /// Any access faults. The resting state of every secret.
    NoAccess = 0,
    /// Reads are allowed, writes fault.
    ReadOnly = 1,
    /// Reads and writes are allowed.
    ReadWrite = 2,
}

impl Protection {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Protection::ReadOnly,
            2 => Protection::ReadWrite,
            _ => Protection::NoAccess,
        }
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protection::NoAccess => "no-access",
            Protection::ReadOnly => "read-only",
            Protection::ReadWrite => "read-write",
        };
        f.write_str(name)
    }
}

/// What to do when the operating system refuses to lock secret pages in RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Log a warning once and keep going with swappable pages.
    #[default]
    BestEffort,
    /// Treat a lock failure like an allocation failure.
    Required,
}

/// Capabilities of the hardened allocator on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStatus {
    /// System page size in bytes.
    pub page_size: usize,
    /// Whether pages could be locked against swapping.
    pub lock_available: bool,
    /// Whether protection transitions succeeded.
    pub protect_available: bool,
}

impl MemoryStatus {
    /// Both locking and protection transitions work.
    pub fn is_hardened(&self) -> bool {
        self.lock_available && self.protect_available
    }
}

/// Failures of the hardened allocation primitives.
///
/// `Secret` never hands these to its callers: every one of them ends the
/// process. They exist so the allocator itself stays testable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The requested size overflows once guard pages are added.
    #[error("requested size {0} cannot be laid out with guard pages")]
    Layout(usize),

    /// Mapping fresh pages failed.
    #[error("page mapping failed (os error {0})")]
    Map(i32),

    /// Locking pages in RAM failed under `LockPolicy::Required`.
    #[error("page locking failed (os error {0})")]
    Lock(i32),

    /// A protection transition failed.
    #[error("transition to {target} failed (os error {errno})")]
    Protect {
        /// State that was requested.
        target: Protection,
        /// OS error code.
        errno: i32,
    },

    /// Unmapping failed.
    #[error("page unmapping failed (os error {0})")]
    Unmap(i32),

    /// The canary in front of a secret was overwritten.
    #[error("canary in front of the secret was overwritten")]
    CanaryMismatch,

    /// The per-process canary could not be drawn.
    #[error("random canary could not be generated")]
    Entropy,
}

/// Failures to put the terminal into (or out of) secure input mode.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Standard input is not attached to a terminal.
    #[error("standard input is not a terminal")]
    NotATerminal,

    /// Reading the current terminal settings failed.
    #[error("failed to read terminal attributes: {0}")]
    GetAttributes(#[source] io::Error),

    /// Applying the echo-free settings failed.
    #[error("failed to set terminal attributes: {0}")]
    SetAttributes(#[source] io::Error),
}

/// Failures while capturing a secret from an input stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Nothing was typed before Enter or end of input.
    #[error("no input was provided")]
    Empty,

    /// More bytes were typed than the capture allows.
    #[error("input exceeds the maximum of {max} bytes")]
    TooLong {
        /// Maximum accepted length.
        max: usize,
    },

    /// Reading input or writing feedback failed.
    #[error("I/O error during capture: {0}")]
    Io(#[from] io::Error),
}
