use std::num::NonZeroUsize;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

use zeroize::Zeroize;

use crate::types::{LockPolicy, MemoryError, MemoryStatus, Protection, CANARY_SIZE};

#[cfg(not(any(unix, windows)))]
compile_error!("pwledger_core needs mprotect/mlock or VirtualProtect/VirtualLock");

// Process-wide lock policy, stored as its discriminant
static LOCK_POLICY: AtomicU8 = AtomicU8::new(0);

// The swap warning is printed once per process, not once per secret
static LOCK_WARNING_ISSUED: AtomicBool = AtomicBool::new(false);

/// Select how allocation reacts when pages cannot be locked in RAM.
///
/// Applies to secrets allocated after the call.
pub fn set_lock_policy(policy: LockPolicy) {
    let value = match policy {
        LockPolicy::BestEffort => 0,
        LockPolicy::Required => 1,
    };
    LOCK_POLICY.store(value, Ordering::SeqCst);
}

/// Currently active lock policy.
pub fn lock_policy() -> LockPolicy {
    match LOCK_POLICY.load(Ordering::SeqCst) {
        1 => LockPolicy::Required,
        _ => LockPolicy::BestEffort,
    }
}

/// System page size, queried once.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(sys::page_size)
}

/// Report what the hardened allocator can do on this host.
///
/// The probe maps, locks and re-protects a single scratch page the first time
/// it is called; later calls return the cached answer.
pub fn memory_status() -> MemoryStatus {
    static STATUS: OnceLock<MemoryStatus> = OnceLock::new();
    *STATUS.get_or_init(probe)
}

fn probe() -> MemoryStatus {
    let page = page_size();

    let base = match sys::map(page) {
        Ok(base) => base,
        Err(err) => {
            tracing::warn!(error = %err, "hardened memory probe could not map a page");
            return MemoryStatus {
                page_size: page,
                lock_available: false,
                protect_available: false,
            };
        }
    };

    let lock_available = sys::lock(base.as_ptr(), page).is_ok();
    let protect_available = sys::protect(base.as_ptr(), page, Protection::NoAccess).is_ok()
        && sys::protect(base.as_ptr(), page, Protection::ReadWrite).is_ok();

    if lock_available {
        let _ = sys::unlock(base.as_ptr(), page);
    }
    let _ = sys::unmap(base, page);

    tracing::debug!(page, lock_available, protect_available, "hardened memory probe finished");

    MemoryStatus {
        page_size: page,
        lock_available,
        protect_available,
    }
}

fn canary() -> Result<&'static [u8; CANARY_SIZE], MemoryError> {
    static CANARY: OnceLock<[u8; CANARY_SIZE]> = OnceLock::new();

    if let Some(canary) = CANARY.get() {
        return Ok(canary);
    }

    let mut bytes = [0u8; CANARY_SIZE];
    getrandom::getrandom(&mut bytes).map_err(|_| MemoryError::Entropy)?;

    Ok(CANARY.get_or_init(|| bytes))
}

fn round_up(value: usize, page: usize) -> Option<usize> {
    value.checked_add(page - 1).map(|v| v & !(page - 1))
}

fn lock_pages(ptr: *mut u8, len: usize) -> Result<bool, MemoryError> {
    match sys::lock(ptr, len) {
        Ok(()) => Ok(true),
        Err(errno) => match lock_policy() {
            LockPolicy::Required => Err(MemoryError::Lock(errno)),
            LockPolicy::BestEffort => {
                if !LOCK_WARNING_ISSUED.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        errno,
                        "could not lock secret pages in memory, sensitive data may be swapped to disk"
                    );
                }
                Ok(false)
            }
        },
    }
}

/// One hardened allocation.
///
/// Layout, low to high addresses:
///
/// ```text
/// | guard page | ...padding... | canary | user bytes | guard page |
///              \______ protected pages (inner) ______/
/// ```
///
/// The user bytes end exactly where the trailing guard page starts, so a
/// linear overflow faults immediately. `Region` has no `Drop`: the owning
/// `Secret` decides how a failed release is handled.
pub(crate) struct Region {
    base: NonNull<u8>,
    total: usize,
    inner_len: usize,
    len: usize,
    locked: bool,
}

#[allow(unsafe_code)]
impl Region {
    /// Map, guard, lock and canary-tag `len` bytes.
    ///
    /// The region is left read-write; callers lock it down themselves.
    pub(crate) fn allocate(len: NonZeroUsize) -> Result<Self, MemoryError> {
        let len = len.get();
        let page = page_size();

        let inner_len = CANARY_SIZE
            .checked_add(len)
            .and_then(|n| round_up(n, page))
            .ok_or(MemoryError::Layout(len))?;
        let total = page
            .checked_mul(2)
            .and_then(|guards| guards.checked_add(inner_len))
            .ok_or(MemoryError::Layout(len))?;

        let canary = canary()?;
        let base = sys::map(total)?;

        let mut region = Region {
            base,
            total,
            inner_len,
            len,
            locked: false,
        };

        if let Err(err) = region.finish_setup(canary) {
            let _ = sys::unmap(region.base, region.total);
            return Err(err);
        }

        Ok(region)
    }

    fn finish_setup(&mut self, canary: &[u8; CANARY_SIZE]) -> Result<(), MemoryError> {
        let page = page_size();
        let base = self.base.as_ptr();

        let leading = Protection::NoAccess;
        sys::protect(base, page, leading)
            .map_err(|errno| MemoryError::Protect { target: leading, errno })?;

        let trailing = unsafe { base.add(page + self.inner_len) };
        sys::protect(trailing, page, leading)
            .map_err(|errno| MemoryError::Protect { target: leading, errno })?;

        self.locked = lock_pages(self.inner(), self.inner_len)?;
        sys::dont_dump(self.inner(), self.inner_len);

        unsafe { ptr::copy_nonoverlapping(canary.as_ptr(), self.canary_ptr(), CANARY_SIZE) };

        Ok(())
    }

    fn inner(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(page_size()) }
    }

    fn data(&self) -> *mut u8 {
        unsafe { self.inner().add(self.inner_len - self.len) }
    }

    fn canary_ptr(&self) -> *mut u8 {
        unsafe { self.data().sub(CANARY_SIZE) }
    }

    /// Number of user bytes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Whether the pages are locked against swapping.
    pub(crate) fn is_locked(&self) -> bool {
        self.locked
    }

    /// Change the protection of the inner pages.
    pub(crate) fn protect(&self, target: Protection) -> Result<(), MemoryError> {
        sys::protect(self.inner(), self.inner_len, target)
            .map_err(|errno| MemoryError::Protect { target, errno })
    }

    /// # Safety
    ///
    /// The inner pages must currently be readable.
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.data(), self.len)
    }

    /// # Safety
    ///
    /// The inner pages must currently be writable.
    pub(crate) unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        slice::from_raw_parts_mut(self.data(), self.len)
    }

    fn canary_intact(&self) -> bool {
        match canary() {
            Ok(expected) => {
                let found = unsafe { slice::from_raw_parts(self.canary_ptr(), CANARY_SIZE) };
                found == expected
            }
            Err(_) => false,
        }
    }

    /// # Safety
    ///
    /// The inner pages must currently be writable.
    unsafe fn wipe(&mut self) {
        slice::from_raw_parts_mut(self.inner(), self.inner_len).zeroize();
    }

    /// Check the canary and zero every inner byte. Leaves the pages read-write.
    fn scrub(&mut self) -> Result<bool, MemoryError> {
        self.protect(Protection::ReadWrite)?;

        let intact = self.canary_intact();
        unsafe { self.wipe() };

        Ok(intact)
    }

    /// Unlock and unmap. The inner pages must be readable.
    fn unmap(self) -> Result<(), MemoryError> {
        #[cfg(test)]
        release_log::record(unsafe { slice::from_raw_parts(self.inner(), self.inner_len) });

        if self.locked {
            let _ = sys::unlock(self.inner(), self.inner_len);
        }

        sys::unmap(self.base, self.total).map_err(MemoryError::Unmap)
    }

    /// Zero every inner byte, then unlock and unmap.
    ///
    /// A clobbered canary is reported only after the wipe and unmap, so the
    /// contents never outlive a detected corruption.
    pub(crate) fn release(mut self) -> Result<(), MemoryError> {
        let intact = self.scrub()?;
        self.unmap()?;

        if !intact {
            return Err(MemoryError::CanaryMismatch);
        }

        Ok(())
    }
}

/// Records, per thread, whether the last region handed to `munmap` was all
/// zeroes at that moment.
#[cfg(test)]
pub(crate) mod release_log {
    use std::cell::Cell;

    thread_local! {
        static LAST_UNMAP_ZEROED: Cell<Option<bool>> = const { Cell::new(None) };
    }

    pub(crate) fn record(inner: &[u8]) {
        let zeroed = inner.iter().all(|&b| b == 0);
        LAST_UNMAP_ZEROED.with(|last| last.set(Some(zeroed)));
    }

    /// Outcome of the last unmap on this thread, clearing it.
    pub(crate) fn take() -> Option<bool> {
        LAST_UNMAP_ZEROED.with(Cell::take)
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
mod sys {
    use std::ptr::{self, NonNull};

    use crate::types::{MemoryError, Protection};

    fn errno() -> i32 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    pub(super) fn page_size() -> usize {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            4096
        } else {
            size as usize
        }
    }

    pub(super) fn map(len: usize) -> Result<NonNull<u8>, MemoryError> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::Map(errno()));
        }

        NonNull::new(ptr.cast::<u8>()).ok_or(MemoryError::Map(0))
    }

    pub(super) fn unmap(ptr: NonNull<u8>, len: usize) -> Result<(), i32> {
        if unsafe { libc::munmap(ptr.as_ptr().cast(), len) } == 0 {
            Ok(())
        } else {
            Err(errno())
        }
    }

    pub(super) fn protect(ptr: *mut u8, len: usize, target: Protection) -> Result<(), i32> {
        let prot = match target {
            Protection::NoAccess => libc::PROT_NONE,
            Protection::ReadOnly => libc::PROT_READ,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };

        if unsafe { libc::mprotect(ptr.cast(), len, prot) } == 0 {
            Ok(())
        } else {
            Err(errno())
        }
    }

    pub(super) fn lock(ptr: *mut u8, len: usize) -> Result<(), i32> {
        if unsafe { libc::mlock(ptr.cast_const().cast(), len) } == 0 {
            Ok(())
        } else {
            Err(errno())
        }
    }

    pub(super) fn unlock(ptr: *mut u8, len: usize) -> Result<(), i32> {
        if unsafe { libc::munlock(ptr.cast_const().cast(), len) } == 0 {
            Ok(())
        } else {
            Err(errno())
        }
    }

    // Keep secrets out of core dumps where the kernel supports it
    #[cfg(target_os = "linux")]
    pub(super) fn dont_dump(ptr: *mut u8, len: usize) {
        let _ = unsafe { libc::madvise(ptr.cast(), len, libc::MADV_DONTDUMP) };
    }

    #[cfg(not(target_os = "linux"))]
    pub(super) fn dont_dump(_ptr: *mut u8, _len: usize) {}
}

#[cfg(windows)]
#[allow(unsafe_code)]
mod sys {
    use std::ptr::{self, NonNull};

    use windows_sys::Win32::Foundation::GetLastError;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, VirtualLock, VirtualProtect, VirtualUnlock, MEM_COMMIT,
        MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_PROTECTION_FLAGS, PAGE_READONLY,
        PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    use crate::types::{MemoryError, Protection};

    fn last_error() -> i32 {
        unsafe { GetLastError() as i32 }
    }

    pub(super) fn page_size() -> usize {
        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        info.dwPageSize as usize
    }

    pub(super) fn map(len: usize) -> Result<NonNull<u8>, MemoryError> {
        let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| MemoryError::Map(last_error()))
    }

    pub(super) fn unmap(ptr: NonNull<u8>, _len: usize) -> Result<(), i32> {
        if unsafe { VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE) } != 0 {
            Ok(())
        } else {
            Err(last_error())
        }
    }

    pub(super) fn protect(ptr: *mut u8, len: usize, target: Protection) -> Result<(), i32> {
        let flags = match target {
            Protection::NoAccess => PAGE_NOACCESS,
            Protection::ReadOnly => PAGE_READONLY,
            Protection::ReadWrite => PAGE_READWRITE,
        };
        let mut previous: PAGE_PROTECTION_FLAGS = 0;

        if unsafe { VirtualProtect(ptr.cast_const().cast(), len, flags, &mut previous) } != 0 {
            Ok(())
        } else {
            Err(last_error())
        }
    }

    pub(super) fn lock(ptr: *mut u8, len: usize) -> Result<(), i32> {
        if unsafe { VirtualLock(ptr.cast_const().cast(), len) } != 0 {
            Ok(())
        } else {
            Err(last_error())
        }
    }

    pub(super) fn unlock(ptr: *mut u8, len: usize) -> Result<(), i32> {
        if unsafe { VirtualUnlock(ptr.cast_const().cast(), len) } != 0 {
            Ok(())
        } else {
            Err(last_error())
        }
    }

    pub(super) fn dont_dump(_ptr: *mut u8, _len: usize) {}
}
