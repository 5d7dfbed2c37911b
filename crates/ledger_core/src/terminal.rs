//! Echo-free terminal input.
//!
//! [`EchoSuppressor`] switches the controlling terminal into a mode where
//! typed characters are neither echoed nor line-buffered, and puts the
//! original settings back when dropped.

use crate::types::TerminalError;

/// A terminal whose echo and line buffering can be switched off and back on.
pub trait TerminalMode {
    /// Save the current settings and disable echo and line buffering.
    fn configure(&mut self) -> Result<(), TerminalError>;

    /// Put the saved settings back. Does nothing if not configured.
    fn restore(&mut self) -> Result<(), TerminalError>;

    /// Whether `configure` succeeded and `restore` has not run since.
    fn is_configured(&self) -> bool;
}

/// Keeps standard input in secure input mode for its lifetime.
///
/// Restoration failures on drop are logged and otherwise ignored.
pub struct EchoSuppressor<T: TerminalMode = StdinTerminal> {
    terminal: T,
}

impl EchoSuppressor<StdinTerminal> {
    /// Configure the process's standard input.
    pub fn new() -> Result<Self, TerminalError> {
        Self::with_terminal(StdinTerminal::default())
    }
}

impl<T: TerminalMode> EchoSuppressor<T> {
    /// Configure an arbitrary terminal.
    pub fn with_terminal(mut terminal: T) -> Result<Self, TerminalError> {
        terminal.configure()?;
        Ok(EchoSuppressor { terminal })
    }

    /// The wrapped terminal.
    pub fn terminal(&self) -> &T {
        &self.terminal
    }
}

impl<T: TerminalMode> Drop for EchoSuppressor<T> {
    fn drop(&mut self) {
        if let Err(err) = self.terminal.restore() {
            tracing::warn!(error = %err, "failed to restore terminal settings");
        }
    }
}

pub use imp::StdinTerminal;

#[cfg(unix)]
#[allow(unsafe_code)]
mod imp {
    use std::io;
    use std::mem::MaybeUninit;

    use super::TerminalMode;
    use crate::types::TerminalError;

    /// The terminal attached to file descriptor 0.
    #[derive(Default)]
    pub struct StdinTerminal {
        saved: Option<libc::termios>,
    }

    impl TerminalMode for StdinTerminal {
        fn configure(&mut self) -> Result<(), TerminalError> {
            if self.saved.is_some() {
                return Ok(());
            }

            if unsafe { libc::isatty(libc::STDIN_FILENO) } != 1 {
                return Err(TerminalError::NotATerminal);
            }

            let mut original = MaybeUninit::<libc::termios>::uninit();
            if unsafe { libc::tcgetattr(libc::STDIN_FILENO, original.as_mut_ptr()) } != 0 {
                return Err(TerminalError::GetAttributes(io::Error::last_os_error()));
            }
            let original = unsafe { original.assume_init() };

            let mut raw = original;
            raw.c_lflag &= !(libc::ECHO | libc::ICANON);
            raw.c_cc[libc::VMIN] = 1;
            raw.c_cc[libc::VTIME] = 0;

            if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, &raw) } != 0 {
                return Err(TerminalError::SetAttributes(io::Error::last_os_error()));
            }

            self.saved = Some(original);
            tracing::debug!("terminal echo disabled");
            Ok(())
        }

        fn restore(&mut self) -> Result<(), TerminalError> {
            let Some(original) = self.saved.take() else {
                return Ok(());
            };

            if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, &original) } != 0 {
                return Err(TerminalError::SetAttributes(io::Error::last_os_error()));
            }

            tracing::debug!("terminal settings restored");
            Ok(())
        }

        fn is_configured(&self) -> bool {
            self.saved.is_some()
        }
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
mod imp {
    use std::io;

    use windows_sys::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, SetConsoleMode, CONSOLE_MODE, ENABLE_ECHO_INPUT,
        ENABLE_LINE_INPUT, STD_INPUT_HANDLE,
    };

    use super::TerminalMode;
    use crate::types::TerminalError;

    /// The console attached to standard input.
    #[derive(Default)]
    pub struct StdinTerminal {
        saved: Option<(HANDLE, CONSOLE_MODE)>,
    }

    impl TerminalMode for StdinTerminal {
        fn configure(&mut self) -> Result<(), TerminalError> {
            if self.saved.is_some() {
                return Ok(());
            }

            let handle = unsafe { GetStdHandle(STD_INPUT_HANDLE) };
            if handle == INVALID_HANDLE_VALUE || handle == 0 {
                return Err(TerminalError::NotATerminal);
            }

            let mut original: CONSOLE_MODE = 0;
            if unsafe { GetConsoleMode(handle, &mut original) } == 0 {
                return Err(TerminalError::NotATerminal);
            }

            let raw = original & !(ENABLE_ECHO_INPUT | ENABLE_LINE_INPUT);
            if unsafe { SetConsoleMode(handle, raw) } == 0 {
                return Err(TerminalError::SetAttributes(io::Error::last_os_error()));
            }

            self.saved = Some((handle, original));
            tracing::debug!("console echo disabled");
            Ok(())
        }

        fn restore(&mut self) -> Result<(), TerminalError> {
            let Some((handle, original)) = self.saved.take() else {
                return Ok(());
            };

            if unsafe { SetConsoleMode(handle, original) } == 0 {
                return Err(TerminalError::SetAttributes(io::Error::last_os_error()));
            }

            tracing::debug!("console mode restored");
            Ok(())
        }

        fn is_configured(&self) -> bool {
            self.saved.is_some()
        }
    }
}
