//! RAII wrappers for Windows handles.
//!
//! Every kind of Windows handle (kernel objects, file handles, local memory,
//! module handles, ETW registrations, ...) follows the same two-state model:
//! the wrapper either owns exactly one valid handle or holds the kind's invalid
//! value. [`HandleKind`] describes how a particular kind is recognised and
//! released, and [`Owned`] implements the ownership rules once for all of them.
//!
//! # Example
//!
//! ```no_run
//! use raii_windows::handle::OwnedHandle;
//! use windows::Win32::System::Threading::{CreateEventW};
//!
//! let event = unsafe { CreateEventW(None, true, false, None)? };
//! let handle = OwnedHandle::new(event)?;
//! let copy = handle.try_clone()?;
//! assert_ne!(handle.as_raw(), copy.as_raw());
//! # Ok::<(), raii_windows::Error>(())
//! ```

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use windows::Win32::Foundation::{
    CloseHandle, DuplicateHandle, DUPLICATE_SAME_ACCESS, HANDLE, INVALID_HANDLE_VALUE,
};
use windows::Win32::System::Threading::GetCurrentProcess;

/// Describes a kind of Windows handle: its raw type, its invalid value and how
/// it is released.
pub trait HandleKind {
    /// The raw handle type.
    type Raw: Copy + PartialEq + fmt::Debug;

    /// The value a wrapper holds when it owns nothing.
    const INVALID: Self::Raw;

    /// Short name used in error and log messages.
    const NAME: &'static str;

    /// Returns true if `raw` refers to an object that must be released.
    #[inline]
    fn is_valid(raw: Self::Raw) -> bool {
        raw != Self::INVALID
    }

    /// Returns the numeric value of a raw handle, used for ordering.
    fn bits(raw: Self::Raw) -> u64;

    /// Releases the object referred to by `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid handle of this kind that the caller owns and that
    /// is not used again afterwards.
    unsafe fn close(raw: Self::Raw) -> Result<()>;
}

/// A handle kind whose handles can be duplicated into a new, independently
/// released handle.
pub trait DuplicateKind: HandleKind {
    /// Returns a new handle referring to the same object as `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid handle of this kind.
    unsafe fn duplicate(raw: Self::Raw) -> Result<Self::Raw>;
}

/// Owns a single Windows handle and releases it when dropped.
///
/// A default-constructed wrapper holds the kind's invalid value. Moving the
/// wrapper transfers ownership; only the final owner releases the handle.
pub struct Owned<K: HandleKind> {
    raw: K::Raw,
    _kind: PhantomData<K>,
}

impl<K: HandleKind> Owned<K> {
    /// Takes ownership of `raw`.
    ///
    /// Returns an error if `raw` is not a valid handle of this kind.
    #[inline]
    pub fn new(raw: K::Raw) -> Result<Self> {
        if !K::is_valid(raw) {
            return Err(Error::invalid_handle(K::NAME));
        }
        Ok(Self {
            raw,
            _kind: PhantomData,
        })
    }

    /// Takes ownership of `raw` without checking it.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `raw` is either the kind's invalid value or
    /// a handle it owns, and that no other code will release it.
    #[inline]
    pub unsafe fn from_raw(raw: K::Raw) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    /// Returns true if the wrapper owns a handle.
    #[inline]
    pub fn is_valid(&self) -> bool {
        K::is_valid(self.raw)
    }

    /// Returns the raw handle without giving up ownership.
    #[inline]
    pub fn as_raw(&self) -> K::Raw {
        self.raw
    }

    /// Returns the raw handle if the wrapper owns one.
    #[inline]
    pub fn get(&self) -> Option<K::Raw> {
        self.is_valid().then_some(self.raw)
    }

    /// Releases the current handle, if any, and takes ownership of `raw`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Owned::from_raw`].
    pub unsafe fn attach(&mut self, raw: K::Raw) {
        self.free();
        self.raw = raw;
    }

    /// Gives up ownership of the handle, leaving the wrapper invalid.
    ///
    /// The caller becomes responsible for releasing the returned handle.
    #[inline]
    #[must_use = "the detached handle is no longer released automatically"]
    pub fn detach(&mut self) -> K::Raw {
        std::mem::replace(&mut self.raw, K::INVALID)
    }

    /// Consumes the wrapper and returns the raw handle without releasing it.
    #[inline]
    #[must_use = "the returned handle is no longer released automatically"]
    pub fn into_raw(mut self) -> K::Raw {
        self.detach()
    }

    /// Releases the handle if the wrapper owns one. The wrapper becomes invalid.
    ///
    /// Calling this on an invalid wrapper does nothing. Release failures are
    /// logged; use [`Owned::close`] to observe them.
    pub fn free(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("failed to release {}: {}", K::NAME, e);
        }
    }

    /// Releases the handle and reports whether the release succeeded.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let raw = self.detach();
        if K::is_valid(raw) {
            // SAFETY: We owned `raw` and detached it, so it is released exactly once.
            unsafe { K::close(raw) }
        } else {
            Ok(())
        }
    }

    /// Returns a pointer suitable for APIs that return a new handle through an
    /// out parameter.
    ///
    /// The wrapper must not own a handle when this is called, otherwise the
    /// handle would leak when the API overwrites it.
    #[inline]
    pub fn as_out_ptr(&mut self) -> *mut K::Raw {
        debug_assert!(
            !self.is_valid(),
            "as_out_ptr on a wrapper that still owns a {}",
            K::NAME
        );
        &mut self.raw
    }

    /// Returns a non-owning view of the handle.
    #[inline]
    pub fn borrow(&self) -> Borrowed<'_, K> {
        Borrowed {
            raw: self.raw,
            _owner: PhantomData,
        }
    }
}

impl<K: DuplicateKind> Owned<K> {
    /// Returns a duplicate of the owned handle.
    ///
    /// An invalid wrapper duplicates to the invalid value.
    pub fn duplicate(&self) -> Result<K::Raw> {
        if !self.is_valid() {
            return Ok(K::INVALID);
        }
        // SAFETY: The handle is valid and owned by us for the duration of the call.
        unsafe { K::duplicate(self.raw) }
    }

    /// Duplicates this handle into a new, independently owned wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be duplicated (e.g., insufficient access rights).
    pub fn try_clone(&self) -> Result<Self> {
        let raw = self.duplicate()?;
        // SAFETY: `raw` is a fresh duplicate (or the invalid value) that nothing else owns.
        Ok(unsafe { Self::from_raw(raw) })
    }

    /// Duplicates `raw` and takes ownership of the duplicate.
    ///
    /// The current handle is released only after the duplicate was created, so a
    /// failure leaves the wrapper unchanged.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid handle of this kind or the invalid value.
    pub unsafe fn attach_duplicated(&mut self, raw: K::Raw) -> Result<()> {
        let copy = if K::is_valid(raw) {
            K::duplicate(raw)?
        } else {
            K::INVALID
        };
        self.attach(copy);
        Ok(())
    }

    /// Replaces the owned handle with a duplicate of `other`'s handle.
    pub fn clone_from_owned(&mut self, other: &Self) -> Result<()> {
        let copy = other.duplicate()?;
        // SAFETY: `copy` is a fresh duplicate owned by nobody else.
        unsafe { self.attach(copy) };
        Ok(())
    }
}

impl<K: HandleKind> Default for Owned<K> {
    fn default() -> Self {
        Self {
            raw: K::INVALID,
            _kind: PhantomData,
        }
    }
}

impl<K: HandleKind> Drop for Owned<K> {
    fn drop(&mut self) {
        self.free();
    }
}

impl<K: HandleKind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("kind", &K::NAME)
            .field("raw", &self.raw)
            .finish()
    }
}

impl<K: HandleKind> PartialEq<K::Raw> for Owned<K> {
    #[inline]
    fn eq(&self, other: &K::Raw) -> bool {
        self.raw == *other
    }
}

impl<K: HandleKind> PartialOrd<K::Raw> for Owned<K> {
    #[inline]
    fn partial_cmp(&self, other: &K::Raw) -> Option<Ordering> {
        Some(K::bits(self.raw).cmp(&K::bits(*other)))
    }
}

/// A borrowed, non-owning view of a handle.
///
/// Does not release the handle when dropped.
pub struct Borrowed<'a, K: HandleKind> {
    raw: K::Raw,
    _owner: PhantomData<&'a K>,
}

impl<'a, K: HandleKind> Borrowed<'a, K> {
    /// Creates a view of a raw handle.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - The handle will remain valid and open for the entire lifetime `'a`
    /// - The handle will not be closed by other code during lifetime `'a`
    #[inline]
    pub unsafe fn new(raw: K::Raw) -> Self {
        Self {
            raw,
            _owner: PhantomData,
        }
    }

    /// Returns the raw handle.
    #[inline]
    pub fn as_raw(&self) -> K::Raw {
        self.raw
    }

    /// Returns true if the view refers to a valid handle.
    #[inline]
    pub fn is_valid(&self) -> bool {
        K::is_valid(self.raw)
    }
}

impl<K: HandleKind> Clone for Borrowed<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: HandleKind> Copy for Borrowed<'_, K> {}

impl<K: HandleKind> fmt::Debug for Borrowed<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowed")
            .field("kind", &K::NAME)
            .field("raw", &self.raw)
            .finish()
    }
}

impl<'a, K: HandleKind> From<&'a Owned<K>> for Borrowed<'a, K> {
    fn from(owned: &'a Owned<K>) -> Self {
        owned.borrow()
    }
}

unsafe fn close_kernel_handle(raw: HANDLE) -> Result<()> {
    CloseHandle(raw).map_err(Error::from)
}

unsafe fn duplicate_kernel_handle(raw: HANDLE) -> Result<HANDLE> {
    let mut copy = HANDLE::default();
    // SAFETY: GetCurrentProcess returns a pseudo-handle that doesn't need to be closed.
    let current_process = GetCurrentProcess();

    DuplicateHandle(
        current_process,
        raw,
        current_process,
        &mut copy,
        0,
        false,
        DUPLICATE_SAME_ACCESS,
    )?;

    Ok(copy)
}

/// Kernel object handles (events, processes, threads, ...), where null means
/// "no handle".
///
/// `INVALID_HANDLE_VALUE` is also treated as invalid, since it doubles as the
/// current-process pseudo-handle and must never be closed.
#[derive(Debug)]
pub enum KernelObject {}

impl HandleKind for KernelObject {
    type Raw = HANDLE;
    const INVALID: HANDLE = HANDLE(std::ptr::null_mut());
    const NAME: &'static str = "kernel handle";

    #[inline]
    fn is_valid(raw: HANDLE) -> bool {
        raw.is_valid()
    }

    #[inline]
    fn bits(raw: HANDLE) -> u64 {
        raw.0 as usize as u64
    }

    unsafe fn close(raw: HANDLE) -> Result<()> {
        close_kernel_handle(raw)
    }
}

impl DuplicateKind for KernelObject {
    unsafe fn duplicate(raw: HANDLE) -> Result<HANDLE> {
        duplicate_kernel_handle(raw)
    }
}

/// File handles as returned by `CreateFileW` and friends, where
/// `INVALID_HANDLE_VALUE` means "no handle".
#[derive(Debug)]
pub enum FileObject {}

impl HandleKind for FileObject {
    type Raw = HANDLE;
    const INVALID: HANDLE = INVALID_HANDLE_VALUE;
    const NAME: &'static str = "file handle";

    #[inline]
    fn bits(raw: HANDLE) -> u64 {
        raw.0 as usize as u64
    }

    unsafe fn close(raw: HANDLE) -> Result<()> {
        close_kernel_handle(raw)
    }
}

impl DuplicateKind for FileObject {
    unsafe fn duplicate(raw: HANDLE) -> Result<HANDLE> {
        duplicate_kernel_handle(raw)
    }
}

/// An owned kernel object handle, closed with `CloseHandle`.
pub type OwnedHandle = Owned<KernelObject>;

/// An owned file handle, closed with `CloseHandle`.
pub type OwnedFileHandle = Owned<FileObject>;

/// A borrowed kernel object handle.
pub type BorrowedHandle<'a> = Borrowed<'a, KernelObject>;

// SAFETY: Windows kernel handles are process-wide and can be used from any thread.
unsafe impl Send for Owned<KernelObject> {}
// SAFETY: See above.
unsafe impl Sync for Owned<KernelObject> {}
// SAFETY: See above.
unsafe impl Send for Owned<FileObject> {}
// SAFETY: See above.
unsafe impl Sync for Owned<FileObject> {}

/// Extension trait for working with Windows handles.
pub trait HandleExt {
    /// Returns true if this handle is valid (not null and not INVALID_HANDLE_VALUE).
    fn is_valid(&self) -> bool;
}

impl HandleExt for HANDLE {
    #[inline]
    fn is_valid(&self) -> bool {
        !self.is_invalid() && !self.0.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::System::Threading::CreateEventW;

    fn new_event() -> OwnedHandle {
        let raw = unsafe { CreateEventW(None, true, false, None) }.unwrap();
        OwnedHandle::new(raw).unwrap()
    }

    #[test]
    fn test_invalid_handle_rejected() {
        assert!(OwnedHandle::new(INVALID_HANDLE_VALUE).is_err());
        assert!(OwnedFileHandle::new(INVALID_HANDLE_VALUE).is_err());
    }

    #[test]
    fn test_null_handle_rejected() {
        let result = OwnedHandle::new(HANDLE::default());
        assert!(matches!(result, Err(Error::InvalidHandle { .. })));
    }

    #[test]
    fn test_default_is_invalid() {
        let handle = OwnedHandle::default();
        assert!(!handle.is_valid());
        assert_eq!(handle.get(), None);

        let file = OwnedFileHandle::default();
        assert_eq!(file.as_raw(), INVALID_HANDLE_VALUE);
    }

    #[test]
    fn test_detach_leaves_invalid() {
        let mut handle = new_event();
        let raw = handle.detach();
        assert!(!handle.is_valid());
        assert!(raw.is_valid());
        // Reattach so the event is not leaked.
        unsafe { handle.attach(raw) };
        assert_eq!(handle, raw);
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut handle = new_event();
        handle.free();
        assert!(!handle.is_valid());
        handle.free();
        assert!(!handle.is_valid());
    }

    #[test]
    fn test_close_reports_success() {
        assert!(new_event().close().is_ok());
        assert!(OwnedHandle::default().close().is_ok());
    }

    #[test]
    fn test_try_clone_creates_distinct_handle() {
        let handle = new_event();
        let copy = handle.try_clone().unwrap();
        assert!(copy.is_valid());
        assert_ne!(copy.as_raw(), handle.as_raw());
    }

    #[test]
    fn test_clone_of_invalid_is_invalid() {
        let handle = OwnedHandle::default();
        let copy = handle.try_clone().unwrap();
        assert!(!copy.is_valid());
    }

    #[test]
    fn test_clone_from_owned_replaces_handle() {
        let source = new_event();
        let mut target = new_event();
        let before = target.as_raw();
        target.clone_from_owned(&source).unwrap();
        assert!(target.is_valid());
        assert_ne!(target.as_raw(), source.as_raw());
        assert_ne!(target.as_raw(), before);

        target.clone_from_owned(&OwnedHandle::default()).unwrap();
        assert!(!target.is_valid());
    }

    #[test]
    fn test_attach_duplicated_keeps_source() {
        let source = new_event();
        let mut target = OwnedHandle::default();
        unsafe { target.attach_duplicated(source.as_raw()) }.unwrap();
        assert!(target.is_valid());
        assert!(source.is_valid());
        assert_ne!(target.as_raw(), source.as_raw());
    }

    #[test]
    fn test_raw_comparisons() {
        let handle = new_event();
        let raw = handle.as_raw();
        assert!(handle == raw);
        assert!(handle <= raw);
        assert!(handle >= raw);
        assert!(handle > HANDLE::default());
        assert!(!(handle < raw));
    }

    #[test]
    fn test_out_ptr_fills_empty_wrapper() {
        let source = new_event();
        let mut target = OwnedHandle::default();
        unsafe {
            DuplicateHandle(
                GetCurrentProcess(),
                source.as_raw(),
                GetCurrentProcess(),
                target.as_out_ptr(),
                0,
                false,
                DUPLICATE_SAME_ACCESS,
            )
        }
        .unwrap();
        assert!(target.is_valid());
    }

    #[test]
    fn test_borrowed_view() {
        let handle = new_event();
        let view = BorrowedHandle::from(&handle);
        assert_eq!(view.as_raw(), handle.as_raw());
        assert!(view.is_valid());
    }

    #[test]
    fn test_move_transfers_ownership() {
        let handle = new_event();
        let raw = handle.as_raw();
        let moved = handle;
        assert_eq!(moved.as_raw(), raw);
        assert!(moved.is_valid());
    }
}
