//! Reading a secret from the keyboard without it ever touching ordinary memory.
//!
//! Bytes are read one at a time straight into the view of a staging
//! [`Secret`]. The result is copied guard-to-guard into an exact-length
//! secret and the staging buffer is wiped when it drops.

use std::io::{self, ErrorKind, Read, Write};
use std::num::NonZeroUsize;

use zeroize::Zeroize;

use crate::secret::Secret;
use crate::terminal::EchoSuppressor;
use crate::types::CaptureError;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const ERASE_FEEDBACK: &[u8] = b"\x08 \x08";
const MASK_FEEDBACK: &[u8] = b"*";

/// Default upper bound on captured input.
pub const DEFAULT_MAX_LEN: usize = 1024;

/// Largest `max_len` accepted by [`read_secret`]. Larger requests fail with
/// [`CaptureError::TooLong`] carrying this cap, before anything is allocated.
pub const MAX_CAPTURE_LEN: usize = 64 * 1024;

/// Capture a secret from `input`, echoing masked feedback to `feedback`.
///
/// Input ends at a newline, carriage return or end of stream. Backspace and
/// delete erase the previous byte. Only printable ASCII is kept; other bytes
/// are discarded. `max_len` may not exceed [`MAX_CAPTURE_LEN`].
///
/// ```
/// use std::io::Cursor;
/// use std::num::NonZeroUsize;
/// use pwledger_core::read_secret;
///
/// let mut echo = Vec::new();
/// let secret = read_secret(
///     Cursor::new(b"pas\x7fss\n".to_vec()),
///     &mut echo,
///     NonZeroUsize::new(64).unwrap(),
/// )
/// .unwrap();
///
/// assert!(secret.with_read_access(|view| view == b"pass"));
/// assert_eq!(echo, b"***\x08 \x08**");
/// ```
pub fn read_secret<R: Read, W: Write>(
    mut input: R,
    mut feedback: W,
    max_len: NonZeroUsize,
) -> Result<Secret, CaptureError> {
    let max = max_len.get();
    if max > MAX_CAPTURE_LEN {
        return Err(CaptureError::TooLong { max: MAX_CAPTURE_LEN });
    }
    let staging_len = NonZeroUsize::new(max + 1).ok_or(CaptureError::TooLong { max })?;

    let mut staging = Secret::new(staging_len);
    let mut len = 0usize;

    {
        let mut guard = staging.write();
        let view = guard.view_mut();

        loop {
            let received = match input.read(&mut view[len..=len]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if received == 0 {
                break;
            }

            match view[len] {
                b'\n' | b'\r' => {
                    view[len] = 0;
                    break;
                }
                BACKSPACE | DELETE => {
                    view[len] = 0;
                    if len > 0 {
                        len -= 1;
                        view[len] = 0;
                        feedback.write_all(ERASE_FEEDBACK)?;
                        feedback.flush()?;
                    }
                }
                32..=126 => {
                    if len == max {
                        view[len] = 0;
                        return Err(CaptureError::TooLong { max });
                    }
                    len += 1;
                    feedback.write_all(MASK_FEEDBACK)?;
                    feedback.flush()?;
                }
                _ => view[len] = 0,
            }
        }
    }

    let len = NonZeroUsize::new(len).ok_or(CaptureError::Empty)?;

    let mut secret = Secret::new(len);
    {
        let source = staging.read();
        let mut target = secret.write();
        target.copy_from_slice(&source[..len.get()]);
    }
    staging.zeroize();

    tracing::debug!(len = len.get(), "secret captured");
    Ok(secret)
}

/// Prompt on standard error and capture a secret from the keyboard.
///
/// Prompt and masked feedback go to standard error so standard output stays
/// free for results. Echo is suppressed for the duration when standard input
/// is a terminal. When it is not (piped input, CI), capture still proceeds.
pub fn prompt_secret(prompt: &str, max_len: NonZeroUsize) -> Result<Secret, CaptureError> {
    let mut stderr = io::stderr().lock();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;

    let suppressor = match EchoSuppressor::new() {
        Ok(suppressor) => Some(suppressor),
        Err(err) => {
            tracing::warn!(error = %err, "terminal echo could not be disabled");
            None
        }
    };

    let outcome = read_secret(RawStdin, &mut stderr, max_len);
    drop(suppressor);

    stderr.write_all(b"\n")?;
    stderr.flush()?;

    outcome
}

/// Unbuffered standard input, so no copy of the secret lingers in a buffer.
struct RawStdin;

#[cfg(unix)]
impl Read for RawStdin {
    #[allow(unsafe_code)]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

#[cfg(windows)]
impl Read for RawStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // TODO: read through ReadConsoleW so nothing passes through std's stdin buffer
        io::stdin().lock().read(buf)
    }
}
