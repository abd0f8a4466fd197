//! Secure memory types for key material and protected field values.
//!
//! This module provides:
//! - [`SecretBuffer`] — variable-length secret storage, zeroed on drop
//! - [`SecretBytes`] — fixed-length keys/seeds, zeroed on drop
//! - [`PageLock`] — best-effort `mlock` guard keeping secrets out of swap
//! - [`disable_core_dumps`] — process-wide `RLIMIT_CORE` shutoff
//!
//! Every type here masks its `Debug`/`Display` output. Comparison of
//! secret contents goes through [`SecretBuffer::ct_eq`], which is
//! constant-time, so equality checks on credentials cannot become a
//! timing oracle.

use crate::error::CryptoError;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ---------------------------------------------------------------------------
// Page locking
// ---------------------------------------------------------------------------

/// RAII guard over an `mlock`'d memory region.
///
/// Locking is best-effort: on failure (quota, privileges, non-Unix
/// target) the region stays unlocked and the guard records that fact.
/// Zeroization on drop does not depend on the lock having succeeded.
pub struct PageLock {
    ptr: *const u8,
    len: usize,
    locked: bool,
}

// SAFETY: the pointer is only handed to mlock/munlock, which are
// thread-safe syscalls. The pointed-to bytes are owned by the wrapping
// secret type and never dereferenced through PageLock.
unsafe impl Send for PageLock {}
unsafe impl Sync for PageLock {}

impl PageLock {
    /// No-op guard for two-phase initialization. Dropping it never calls
    /// `munlock` (`locked` is false).
    pub(crate) const fn unlocked() -> Self {
        Self {
            ptr: std::ptr::null(),
            len: 0,
            locked: false,
        }
    }

    /// Lock `len` bytes at `ptr`. The caller guarantees the region stays
    /// valid for the guard's lifetime, which is why this is crate-private:
    /// external code goes through `SecretBuffer` / `SecretBytes`.
    #[must_use]
    pub(crate) fn acquire(ptr: *const u8, len: usize) -> Self {
        let locked = platform::try_mlock(ptr, len);
        if !locked && len > 0 {
            static WARNED: std::sync::Once = std::sync::Once::new();
            WARNED.call_once(|| {
                eprintln!(
                    "[coffre-crypto-core] WARNING: mlock failed — secret pages \
                     may reach swap. Consider raising RLIMIT_MEMLOCK."
                );
            });
        }
        Self { ptr, len, locked }
    }

    /// Whether the region is currently pinned in RAM.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for PageLock {
    fn drop(&mut self) {
        if self.locked {
            platform::try_munlock(self.ptr, self.len);
        }
    }
}

// ---------------------------------------------------------------------------
// SecretBuffer — variable-length
// ---------------------------------------------------------------------------

/// Variable-length buffer for sensitive data: decrypted payloads,
/// protected entry fields, composite credentials.
///
/// Built on [`SecretSlice<u8>`] from `secrecy` (zeroization on drop),
/// with the backing pages `mlock`'d on construction and all formatting
/// masked.
pub struct SecretBuffer {
    inner: SecretSlice<u8>,
    lock: PageLock,
}

impl SecretBuffer {
    /// Copy `data` into a fresh locked allocation.
    ///
    /// The caller should zeroize its own copy afterwards.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        let inner: SecretSlice<u8> = data.to_vec().into();
        let exposed = inner.expose_secret();
        let lock = PageLock::acquire(exposed.as_ptr(), exposed.len());
        Self { inner, lock }
    }

    /// Take ownership of an existing buffer, zeroizing nothing until drop.
    ///
    /// Prefer this over [`SecretBuffer::new`] when the plaintext already
    /// lives in a `Vec` — it avoids leaving a second, unzeroized copy.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        let inner: SecretSlice<u8> = data.into();
        let exposed = inner.expose_secret();
        let lock = PageLock::acquire(exposed.as_ptr(), exposed.len());
        Self { inner, lock }
    }

    /// Fill a buffer of `len` bytes from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SecureMemory`] if the CSPRNG fails.
    pub fn random(len: usize) -> Result<Self, CryptoError> {
        let mut bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
        Ok(Self::from_vec(bytes))
    }

    /// Expose the underlying bytes for a cryptographic operation or a
    /// deliberate reveal. Keep the borrow short-lived.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    /// Duplicate into a new locked allocation.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self::new(self.expose())
    }

    /// Constant-time equality of contents.
    ///
    /// Length differences return `false` without inspecting bytes; equal
    /// lengths compare in constant time via `ring`.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        ring::constant_time::verify_slices_are_equal(self.expose(), other.expose()).is_ok()
    }

    /// Number of bytes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.expose_secret().len()
    }

    /// Whether the buffer holds zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the backing pages are `mlock`'d.
    #[must_use]
    pub const fn is_page_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

impl fmt::Display for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

// ---------------------------------------------------------------------------
// SecretBytes<N> — fixed-size
// ---------------------------------------------------------------------------

/// Fixed-size secret: derived keys, seeds, stream-start markers.
///
/// Zeroized on drop via the derive. The `mlock` guard tracks the address
/// the value had at construction; if the value is moved afterwards the
/// stale `munlock` is a harmless no-op, and zeroize-on-drop is unaffected.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes<const N: usize> {
    bytes: [u8; N],
    #[zeroize(skip)]
    lock: PageLock,
}

impl<const N: usize> SecretBytes<N> {
    /// Move a fixed-size array into a locked secret. No copy of the
    /// input remains under this type's control — callers hand over
    /// ownership.
    #[must_use]
    pub fn new(data: [u8; N]) -> Self {
        // Two-phase: place the bytes first so the lock sees their final
        // address.
        let mut s = Self {
            bytes: data,
            lock: PageLock::unlocked(),
        };
        s.lock = PageLock::acquire(s.bytes.as_ptr(), N);
        s
    }

    /// Fresh random secret from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SecureMemory`] if the CSPRNG fails.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; N];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
        let secret = Self::new(bytes);
        bytes.zeroize();
        Ok(secret)
    }

    /// Expose the bytes for a cryptographic operation.
    #[must_use]
    pub const fn expose(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Duplicate into a new locked allocation.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self::new(self.bytes)
    }
}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

impl<const N: usize> fmt::Display for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

impl<const N: usize> From<[u8; N]> for SecretBytes<N> {
    fn from(data: [u8; N]) -> Self {
        Self::new(data)
    }
}

// ---------------------------------------------------------------------------
// Core dump disabling
// ---------------------------------------------------------------------------

/// Disable core dumps for the current process.
///
/// On Unix: sets `RLIMIT_CORE` to 0 (soft and hard). Elsewhere: no-op.
/// Embedding applications call this once before opening any database.
///
/// # Errors
///
/// Returns [`CryptoError::SecureMemory`] if `setrlimit` fails.
pub fn disable_core_dumps() -> Result<(), CryptoError> {
    platform::disable_core_dumps_impl()
}

// ---------------------------------------------------------------------------
// Platform-specific implementations
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod platform {
    use crate::error::CryptoError;

    pub(super) fn try_mlock(ptr: *const u8, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        // SAFETY: mlock accepts any pointer/length pair; an invalid
        // region yields ENOMEM, which we report as "not locked".
        unsafe { libc::mlock(ptr.cast(), len) == 0 }
    }

    pub(super) fn try_munlock(ptr: *const u8, len: usize) {
        if len == 0 {
            return;
        }
        // SAFETY: munlock failure is non-critical.
        unsafe {
            libc::munlock(ptr.cast(), len);
        }
    }

    pub(super) fn disable_core_dumps_impl() -> Result<(), CryptoError> {
        let limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: setrlimit with RLIMIT_CORE is a standard POSIX call.
        let ret = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &raw const limit) };
        if ret != 0 {
            return Err(CryptoError::SecureMemory(
                "failed to disable core dumps via RLIMIT_CORE".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod platform {
    use crate::error::CryptoError;

    pub(super) fn try_mlock(_ptr: *const u8, _len: usize) -> bool {
        false
    }

    pub(super) fn try_munlock(_ptr: *const u8, _len: usize) {}

    pub(super) fn disable_core_dumps_impl() -> Result<(), CryptoError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
