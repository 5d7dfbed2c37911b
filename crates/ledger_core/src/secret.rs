use std::fmt;
use std::num::NonZeroUsize;
use std::panic::Location;
use std::ptr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use constant_time_eq::constant_time_eq;
use zeroize::Zeroize;

use crate::fatal::{self, guard_checks_enabled, Violation};
use crate::guard::{ReadGuard, WriteGuard};
use crate::memory::Region;
use crate::types::Protection;

/// Fixed-size buffer of sensitive bytes in hardened memory.
///
/// The pages behind a `Secret` are locked against swapping, surrounded by
/// guard pages, tagged with a canary, and kept in the no-access state except
/// while a [`ReadGuard`] or [`WriteGuard`] is live. Dropping a `Secret`
/// zeroes the pages before returning them to the operating system.
///
/// Every failure of the underlying primitives aborts the process; see the
/// crate documentation.
///
/// A `Secret` cannot be copied:
///
/// ```compile_fail
/// fn needs_clone<T: Clone>() {}
/// needs_clone::<pwledger_core::Secret>();
/// ```
///
/// It can move to another thread but cannot be shared between threads
/// without external locking:
///
/// ```compile_fail
/// fn needs_sync<T: Sync>() {}
/// needs_sync::<pwledger_core::Secret>();
/// ```
///
/// A view never outlives the guard that produced it:
///
/// ```compile_fail
/// use std::num::NonZeroUsize;
/// use pwledger_core::Secret;
///
/// let secret = Secret::new(NonZeroUsize::new(8).unwrap());
/// let leaked: &[u8];
/// {
///     let guard = secret.read();
///     leaked = guard.view();
/// }
/// println!("{}", leaked.len());
/// ```
///
/// Reading and writing at the same time is rejected by the borrow checker:
///
/// ```compile_fail
/// use std::num::NonZeroUsize;
/// use pwledger_core::Secret;
///
/// let mut secret = Secret::new(NonZeroUsize::new(8).unwrap());
/// let reader = secret.read();
/// let writer = secret.write();
/// drop(reader);
/// ```
pub struct Secret {
    pub(crate) region: Option<Region>,
    state: AtomicU8,
    pub(crate) live_guards: AtomicUsize,
}

// A Secret exclusively owns its pages. Not Sync: guards share the live count
// and protection state without locking.
#[allow(unsafe_code)]
unsafe impl Send for Secret {}

impl Secret {
    /// Allocate `len` bytes of hardened memory, zero-filled and no-access.
    ///
    /// Aborts if the memory cannot be mapped, guarded or locked down.
    ///
    /// ```
    /// use std::num::NonZeroUsize;
    /// use pwledger_core::{Protection, Secret};
    ///
    /// let secret = Secret::new(NonZeroUsize::new(32).unwrap());
    /// assert_eq!(secret.len(), 32);
    /// assert_eq!(secret.protection(), Protection::NoAccess);
    /// ```
    #[track_caller]
    pub fn new(len: NonZeroUsize) -> Self {
        let location = Location::caller();

        let region = match Region::allocate(len) {
            Ok(region) => region,
            Err(err) => fatal::abort(err.into(), Some(location)),
        };

        tracing::trace!(len = len.get(), locked = region.is_locked(), "secret allocated");

        let secret = Secret {
            region: Some(region),
            state: AtomicU8::new(Protection::ReadWrite as u8),
            live_guards: AtomicUsize::new(0),
        };
        secret.transition(Protection::NoAccess, Some(location));

        secret
    }

    /// Move `source` into a new secret and wipe `source`.
    ///
    /// Returns `None` for an empty slice.
    #[track_caller]
    pub fn take_from(source: &mut [u8]) -> Option<Self> {
        let len = NonZeroUsize::new(source.len())?;

        let mut secret = Secret::new(len);
        secret.with_write_access(|view| view.copy_from_slice(source));
        source.zeroize();

        Some(secret)
    }

    /// Number of bytes held. Zero only after [`Secret::relocate`].
    pub fn len(&self) -> usize {
        self.region.as_ref().map_or(0, Region::len)
    }

    /// True once the contents have been relocated elsewhere.
    pub fn is_empty(&self) -> bool {
        self.region.is_none()
    }

    /// Protection state as tracked by this secret.
    pub fn protection(&self) -> Protection {
        Protection::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the pages are locked against swapping.
    pub fn is_locked(&self) -> bool {
        self.region.as_ref().is_some_and(Region::is_locked)
    }

    /// Number of access guards currently open.
    pub fn live_guards(&self) -> usize {
        self.live_guards.load(Ordering::Acquire)
    }

    /// Open a read-only window.
    #[track_caller]
    pub fn read(&self) -> ReadGuard<'_> {
        ReadGuard::open(self, Location::caller())
    }

    /// Open a read-write window.
    #[track_caller]
    pub fn write(&mut self) -> WriteGuard<'_> {
        WriteGuard::open(self, Location::caller())
    }

    /// Run `f` over a read-only view, re-locking afterwards.
    ///
    /// ```
    /// use std::num::NonZeroUsize;
    /// use pwledger_core::Secret;
    ///
    /// let mut secret = Secret::new(NonZeroUsize::new(4).unwrap());
    /// secret.with_write_access(|view| view.copy_from_slice(b"pin!"));
    ///
    /// let starts_with_p = secret.with_read_access(|view| view[0] == b'p');
    /// assert!(starts_with_p);
    /// ```
    #[track_caller]
    pub fn with_read_access<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.read();
        f(guard.view())
    }

    /// Run `f` over a read-write view, re-locking afterwards.
    #[track_caller]
    pub fn with_write_access<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.write();
        f(guard.view_mut())
    }

    /// Hand the pages over to a new `Secret`, leaving this one empty.
    ///
    /// A plain Rust move already transfers ownership; this form is for
    /// places that must keep a valid value behind, such as struct fields.
    #[track_caller]
    pub fn relocate(&mut self) -> Secret {
        let live = self.live_guards.load(Ordering::Acquire);
        if live != 0 {
            if guard_checks_enabled() {
                fatal::abort(Violation::RelocatedWhileGuarded { live }, Some(Location::caller()));
            }
            // Only reachable through a forgotten guard: lock down before handing over
            self.transition(Protection::NoAccess, Some(Location::caller()));
        }

        let region = self.region.take();
        self.state.store(Protection::NoAccess as u8, Ordering::Release);
        self.live_guards.store(0, Ordering::Release);

        Secret {
            region,
            state: AtomicU8::new(Protection::NoAccess as u8),
            live_guards: AtomicUsize::new(0),
        }
    }

    /// Compare contents in constant time.
    pub fn ct_eq(&self, other: &Secret) -> bool {
        if ptr::eq(self, other) {
            return true;
        }

        let lhs = self.read();
        let rhs = other.read();
        constant_time_eq(lhs.view(), rhs.view())
    }

    pub(crate) fn transition(&self, target: Protection, location: Option<&'static Location<'static>>) {
        if let Some(region) = &self.region {
            if let Err(err) = region.protect(target) {
                fatal::abort(err.into(), location);
            }
        }

        self.state.store(target as u8, Ordering::Release);
    }
}

impl Zeroize for Secret {
    /// Overwrite every byte with zero and return to no-access.
    fn zeroize(&mut self) {
        if self.region.is_none() {
            return;
        }

        self.transition(Protection::ReadWrite, None);
        if let Some(region) = self.region.as_mut() {
            #[allow(unsafe_code)]
            unsafe { region.as_mut_slice() }.zeroize();
        }
        self.transition(Protection::NoAccess, None);
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            let len = region.len();

            if let Err(err) = region.release() {
                fatal::abort(err.into(), None);
            }

            tracing::trace!(len, "secret wiped and released");
        }
    }
}

// Prevent accidentally printing sensitive data
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.len())
            .field("protection", &self.protection())
            .finish_non_exhaustive()
    }
}
