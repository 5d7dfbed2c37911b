use thiserror::Error;

/// Failures specific to the command-line front end.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    /// `--require-mlock` was given but the host refuses to lock pages.
    #[error("memory locking is required but unavailable on this host (check RLIMIT_MEMLOCK)")]
    LockUnavailable,

    /// The confirmation entry differed from the first entry.
    #[error("secrets do not match")]
    ConfirmationMismatch,

    /// A self-test check produced the wrong result.
    #[error("self-test check '{0}' failed")]
    SelfTest(&'static str),
}
