//! # pwledger core - guarded memory for passwords and keys
//!
//! This crate keeps secret bytes out of reach of everything except the code
//! that is actively using them. A [`Secret`] lives in its own page-aligned
//! mapping that is:
//!
//! - locked in RAM so it is never written to swap
//! - bracketed by inaccessible guard pages that fault on overruns
//! - tagged with a random canary that is checked on release
//! - excluded from core dumps where the platform allows it
//! - zeroed before the pages go back to the operating system
//!
//! Between uses the pages are no-access. Reading or writing requires a scoped
//! [`ReadGuard`] or [`WriteGuard`], which lifts the protection for exactly as
//! long as the guard is alive.
//!
//! ## Failure model
//!
//! A secret whose protection state is unknown is worse than no secret. Any
//! failure of the underlying primitives, a clobbered canary, or misuse of the
//! guards ends the process with `abort` instead of returning an error. See
//! [`Violation`] for the full list.
//!
//! ## Usage Example
//!
//! ```
//! use std::num::NonZeroUsize;
//! use pwledger_core::{Protection, Secret};
//!
//! let mut secret = Secret::new(NonZeroUsize::new(16).unwrap());
//!
//! {
//!     let mut guard = secret.write();
//!     guard.view_mut()[..5].copy_from_slice(b"hello");
//! }
//!
//! let hello = secret.with_read_access(|view| &view[..5] == b"hello");
//! assert!(hello);
//! assert_eq!(secret.protection(), Protection::NoAccess);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Interactive and stream-based secret capture
pub mod capture;

/// Fail-fast handling of contract violations
pub mod fatal;

/// Scoped access guards
pub mod guard;

/// Hardened page allocation
///
/// This module implements:
/// - Guard pages around every allocation
/// - Memory locking with a configurable policy
/// - Per-process canaries
/// - Page protection transitions
pub mod memory;

/// The owning secret buffer
pub mod secret;

/// Echo-free terminal input
pub mod terminal;

/// Shared enums, status structs and error types
pub mod types;

// Re-export commonly used types and functions
pub use capture::{prompt_secret, read_secret, DEFAULT_MAX_LEN, MAX_CAPTURE_LEN};
pub use fatal::{guard_checks_enabled, Violation};
pub use guard::{ReadGuard, WriteGuard};
pub use memory::{lock_policy, memory_status, page_size, set_lock_policy};
pub use secret::Secret;
pub use terminal::{EchoSuppressor, StdinTerminal, TerminalMode};
pub use types::{CaptureError, LockPolicy, MemoryError, MemoryStatus, Protection, TerminalError};
