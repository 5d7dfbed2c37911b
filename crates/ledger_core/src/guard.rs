//! Scoped access windows onto a [`Secret`].
//!
//! Opening a guard lifts the page protection; dropping it puts the pages
//! back into the no-access state, on every exit path including unwinding.
//! Guards are tied to the thread that opened them.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::atomic::Ordering;

use crate::fatal::{self, guard_checks_enabled, Violation};
use crate::secret::Secret;
use crate::types::Protection;

fn overlapping(live: usize, location: &'static Location<'static>) {
    if guard_checks_enabled() {
        fatal::abort(Violation::OverlappingGuard { live }, Some(location));
    }
}

/// Read-only window onto a secret. Obtained from [`Secret::read`].
///
/// ```compile_fail
/// use std::num::NonZeroUsize;
/// use pwledger_core::Secret;
///
/// fn needs_send<T: Send>(_: T) {}
///
/// let secret = Secret::new(NonZeroUsize::new(8).unwrap());
/// needs_send(secret.read());
/// ```
pub struct ReadGuard<'a> {
    secret: &'a Secret,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ReadGuard<'a> {
    pub(crate) fn open(secret: &'a Secret, location: &'static Location<'static>) -> Self {
        let previous = secret.live_guards.fetch_add(1, Ordering::AcqRel);
        if previous != 0 {
            overlapping(previous, location);
        }

        // Without checks an outer guard may already have made the pages
        // readable. A forgotten guard can leave the count raised over
        // no-access pages, so the state decides, not the count.
        if previous == 0 || secret.protection() == Protection::NoAccess {
            secret.transition(Protection::ReadOnly, Some(location));
        }

        ReadGuard {
            secret,
            _not_send: PhantomData,
        }
    }

    /// The secret's bytes. Empty for a relocated-from secret.
    #[allow(unsafe_code)]
    pub fn view(&self) -> &[u8] {
        match &self.secret.region {
            Some(region) => unsafe { region.as_slice() },
            None => &[],
        }
    }
}

impl Deref for ReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.view()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if self.secret.live_guards.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.secret.transition(Protection::NoAccess, None);
        }
    }
}

impl fmt::Debug for ReadGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadGuard")
            .field("len", &self.view().len())
            .finish_non_exhaustive()
    }
}

/// Read-write window onto a secret. Obtained from [`Secret::write`].
pub struct WriteGuard<'a> {
    secret: &'a mut Secret,
    _not_send: PhantomData<*const ()>,
}

impl<'a> WriteGuard<'a> {
    pub(crate) fn open(secret: &'a mut Secret, location: &'static Location<'static>) -> Self {
        let previous = secret.live_guards.fetch_add(1, Ordering::AcqRel);
        if previous != 0 {
            overlapping(previous, location);
        }
        secret.transition(Protection::ReadWrite, Some(location));

        WriteGuard {
            secret,
            _not_send: PhantomData,
        }
    }

    /// The secret's bytes, read-only.
    #[allow(unsafe_code)]
    pub fn view(&self) -> &[u8] {
        match &self.secret.region {
            Some(region) => unsafe { region.as_slice() },
            None => &[],
        }
    }

    /// The secret's bytes, writable.
    #[allow(unsafe_code)]
    pub fn view_mut(&mut self) -> &mut [u8] {
        match &mut self.secret.region {
            Some(region) => unsafe { region.as_mut_slice() },
            None => &mut [],
        }
    }
}

impl Deref for WriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.view()
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.view_mut()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.secret.transition(Protection::NoAccess, None);
        self.secret.live_guards.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for WriteGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteGuard")
            .field("len", &self.view().len())
            .finish_non_exhaustive()
    }
}
