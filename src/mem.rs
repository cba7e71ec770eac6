//! Ownership of `LocalAlloc` and `GlobalAlloc` memory blocks.
//!
//! Many Windows APIs hand back memory the caller must release with `LocalFree`
//! (`FormatMessageW` with `FORMAT_MESSAGE_ALLOCATE_BUFFER`, security descriptor
//! conversions, ...) or expect movable global memory (clipboard, OLE data
//! transfer). Both are modelled as handle kinds on top of [`Owned`].

use crate::error::{Error, Result};
use crate::handle::{HandleKind, Owned};
use std::marker::PhantomData;
use std::ptr::NonNull;
use windows::Win32::Foundation::{GlobalFree, LocalFree, HGLOBAL, HLOCAL};
use windows::Win32::System::Memory::{
    GlobalAlloc, GlobalLock, GlobalSize, GlobalUnlock, LocalAlloc, LocalSize, GLOBAL_ALLOC_FLAGS,
    GMEM_MOVEABLE, GMEM_ZEROINIT, LMEM_FIXED, LMEM_ZEROINIT,
};

/// Memory blocks allocated with `LocalAlloc`, released with `LocalFree`.
#[derive(Debug)]
pub enum LocalMemory {}

impl HandleKind for LocalMemory {
    type Raw = HLOCAL;
    const INVALID: HLOCAL = HLOCAL(std::ptr::null_mut());
    const NAME: &'static str = "local memory";

    #[inline]
    fn bits(raw: HLOCAL) -> u64 {
        raw.0 as usize as u64
    }

    unsafe fn close(raw: HLOCAL) -> Result<()> {
        // LocalFree returns null on success and the block itself on failure.
        if LocalFree(Some(raw)).0.is_null() {
            Ok(())
        } else {
            Err(crate::error::last_error())
        }
    }
}

/// Memory blocks allocated with `GlobalAlloc`, released with `GlobalFree`.
#[derive(Debug)]
pub enum GlobalMemory {}

impl HandleKind for GlobalMemory {
    type Raw = HGLOBAL;
    const INVALID: HGLOBAL = HGLOBAL(std::ptr::null_mut());
    const NAME: &'static str = "global memory";

    #[inline]
    fn bits(raw: HGLOBAL) -> u64 {
        raw.0 as usize as u64
    }

    unsafe fn close(raw: HGLOBAL) -> Result<()> {
        GlobalFree(Some(raw)).map(|_| ()).map_err(Error::from)
    }
}

/// An owned `LocalAlloc` block.
pub type OwnedLocal = Owned<LocalMemory>;

/// An owned `GlobalAlloc` block.
pub type OwnedGlobal = Owned<GlobalMemory>;

impl Owned<LocalMemory> {
    /// Allocates a zero-initialised fixed block of `size` bytes.
    pub fn alloc(size: usize) -> Result<Self> {
        // SAFETY: LocalAlloc has no preconditions.
        let raw = unsafe { LocalAlloc(LMEM_FIXED | LMEM_ZEROINIT, size)? };
        Self::new(raw)
    }

    /// Returns the size of the block in bytes, or 0 for an empty wrapper.
    pub fn size(&self) -> usize {
        match self.get() {
            // SAFETY: The block is owned by us and valid.
            Some(raw) => unsafe { LocalSize(raw) },
            None => 0,
        }
    }
}

impl Owned<GlobalMemory> {
    /// Allocates a zero-initialised movable block of `size` bytes.
    pub fn alloc(size: usize) -> Result<Self> {
        Self::alloc_with_flags(GMEM_MOVEABLE | GMEM_ZEROINIT, size)
    }

    /// Allocates a block with explicit `GMEM_*` flags.
    pub fn alloc_with_flags(flags: GLOBAL_ALLOC_FLAGS, size: usize) -> Result<Self> {
        // SAFETY: GlobalAlloc has no preconditions.
        let raw = unsafe { GlobalAlloc(flags, size)? };
        Self::new(raw)
    }

    /// Returns the size of the block in bytes, or 0 for an empty wrapper.
    pub fn size(&self) -> usize {
        match self.get() {
            // SAFETY: The block is owned by us and valid.
            Some(raw) => unsafe { GlobalSize(raw) },
            None => 0,
        }
    }

    /// Locks the block and returns a guard giving access to its bytes.
    ///
    /// The guard borrows the block exclusively, so at most one guard hands out
    /// slices at a time.
    ///
    /// ```compile_fail
    /// use raii_windows::mem::OwnedGlobal;
    ///
    /// let mut block = OwnedGlobal::alloc(4)?;
    /// let first = block.lock()?;
    /// let second = block.lock()?;
    /// drop((first, second));
    /// # Ok::<(), raii_windows::Error>(())
    /// ```
    pub fn lock(&mut self) -> Result<GlobalLockGuard<'_, u8>> {
        GlobalLockGuard::new(self)
    }
}

/// A locked `GlobalAlloc` block; unlocked when dropped.
///
/// The element type `T` describes how the block's contents are viewed. The
/// block must be large enough and suitably aligned for at least one `T`.
pub struct GlobalLockGuard<'a, T = u8> {
    handle: HGLOBAL,
    data: NonNull<T>,
    len: usize,
    _memory: PhantomData<&'a mut OwnedGlobal>,
}

impl<'a, T> GlobalLockGuard<'a, T> {
    /// Locks `memory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the wrapper is empty or `GlobalLock` fails.
    pub fn new(memory: &'a mut OwnedGlobal) -> Result<Self> {
        let handle = memory
            .get()
            .ok_or_else(|| Error::invalid_handle("cannot lock empty global memory"))?;

        // SAFETY: The handle is valid for the lifetime of `memory`.
        let ptr = unsafe { GlobalLock(handle) };
        let data = NonNull::new(ptr as *mut T).ok_or_else(crate::error::last_error)?;

        Ok(Self {
            handle,
            data,
            len: memory.size() / std::mem::size_of::<T>().max(1),
            _memory: PhantomData,
        })
    }

    /// Returns a pointer to the locked data.
    #[inline]
    pub fn data(&self) -> *mut T {
        self.data.as_ptr()
    }
}

impl<T: crate::sanitize::Plain> GlobalLockGuard<'_, T> {
    /// Returns the block's contents.
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: The block is locked and holds `len` plain elements.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    /// Returns the block's contents mutably.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: The block is locked, holds `len` plain elements, and the guard
        // holds the only borrow of its owner.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

impl<T> Drop for GlobalLockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: We locked the block in `new`.
        // GlobalUnlock reports failure once the lock count drops to zero, which is
        // the expected outcome here.
        let _ = unsafe { GlobalUnlock(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_alloc_and_size() {
        let block = OwnedLocal::alloc(64).unwrap();
        assert!(block.is_valid());
        assert!(block.size() >= 64);
        assert!(block.close().is_ok());
    }

    #[test]
    fn test_empty_wrappers() {
        assert_eq!(OwnedLocal::default().size(), 0);
        let mut global = OwnedGlobal::default();
        assert_eq!(global.size(), 0);
        assert!(global.lock().is_err());
    }

    #[test]
    fn test_global_lock_round_trip() {
        let mut block = OwnedGlobal::alloc(16).unwrap();
        {
            let mut guard = block.lock().unwrap();
            assert!(guard.as_slice().iter().all(|&b| b == 0));
            guard.as_mut_slice()[0] = 0x5A;
        }
        let guard = block.lock().unwrap();
        assert_eq!(guard.as_slice()[0], 0x5A);
    }

    #[test]
    fn test_global_typed_view() {
        let mut block = OwnedGlobal::alloc(8).unwrap();
        let size = block.size();
        let mut guard = GlobalLockGuard::<u16>::new(&mut block).unwrap();
        assert_eq!(guard.as_slice().len(), size / 2);
        guard.as_mut_slice()[1] = 0xBEEF;
        assert_eq!(guard.as_slice()[1], 0xBEEF);
    }

    #[test]
    fn test_global_lock_released_between_guards() {
        let mut block = OwnedGlobal::alloc(4).unwrap();
        block.lock().unwrap().as_mut_slice()[0] = 1;
        block.lock().unwrap().as_mut_slice()[0] += 1;
        assert_eq!(block.lock().unwrap().as_slice()[0], 2);
        assert!(block.close().is_ok());
    }
}
