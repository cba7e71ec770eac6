//! Event Tracing for Windows (ETW).
//!
//! Covers both sides of ETW:
//!
//! - **Providers** register with [`EventProvider`] and write events made of
//!   [`EventData`] fields.
//! - **Controllers** start an [`EventSession`] configured by
//!   [`SessionProperties`] and enable providers on it, directly or through a
//!   scoped [`TraceEnabler`].
//! - **Consumers** open an [`EventTrace`] on a real-time session or a log
//!   file, copy the records they want to keep into [`EventRecord`]s and decode
//!   them with the TDH helpers in [`tdh`].
//!
//! # Example
//!
//! ```no_run
//! use raii_windows::etw::{level, EventData, EventDescriptor, EventProvider};
//! use windows::core::GUID;
//!
//! const PROVIDER: GUID = GUID::from_u128(0x8f3c2b1a_5d4e_4f60_9a7b_0c1d2e3f4a5b);
//! const STARTED: EventDescriptor = EventDescriptor::new(1, level::INFORMATION);
//!
//! let provider = EventProvider::register(&PROVIDER)?;
//! let pid = std::process::id();
//! provider.write(&STARTED, &[EventData::from(&pid)])?;
//! # Ok::<(), raii_windows::Error>(())
//! ```

mod data;
mod enabler;
mod provider;
mod record;
mod scope;
mod session;
pub mod tdh;
mod trace;

pub use data::{level, EventData, EventDescriptor, EventScalar, MAX_EVENT_DATA_DESCRIPTORS};
pub use enabler::TraceEnabler;
pub use provider::{ControlCode, EnableInfo, EventProvider, ProviderRegistration};
pub use record::{EventRecord, ExtendedDataItem};
pub use scope::{FunctionScope, FunctionScopeResult};
pub use session::{
    ClockResolution, EnableParameters, EventSession, SessionProperties, SessionStatistics,
};
pub use trace::{EventTrace, ProcessTraceKind};

/// A byte buffer aligned for the variable-length structures ETW and TDH fill in.
#[derive(Clone)]
pub(crate) struct AlignedBuffer {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuffer {
    /// Creates a zeroed buffer of `len` bytes.
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Creates a buffer holding a copy of `bytes`.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::zeroed(bytes.len());
        buffer.bytes_mut().copy_from_slice(bytes);
        buffer
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn as_ptr<T>(&self) -> *const T {
        self.words.as_ptr().cast()
    }

    #[inline]
    pub(crate) fn as_mut_ptr<T>(&mut self) -> *mut T {
        self.words.as_mut_ptr().cast()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: The word vector holds at least `len` initialised bytes.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: The word vector holds at least `len` initialised bytes.
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    /// Views `count` values of `T` stored from byte `offset`, or None if they do
    /// not fit or `offset` is misaligned for `T`.
    ///
    /// Use this for the variable-length arrays trailing ETW and TDH structures;
    /// the pointer is derived from the whole buffer.
    ///
    /// # Safety
    ///
    /// Every bit pattern must be a valid `T`.
    pub(crate) unsafe fn slice_at<T>(&self, offset: usize, count: usize) -> Option<&[T]> {
        let end = count
            .checked_mul(std::mem::size_of::<T>())
            .and_then(|size| size.checked_add(offset))?;
        if end > self.len || offset % std::mem::align_of::<T>() != 0 {
            return None;
        }
        let base = self.as_ptr::<u8>().add(offset).cast::<T>();
        Some(std::slice::from_raw_parts(base, count))
    }

    /// Mutable form of [`AlignedBuffer::slice_at`].
    ///
    /// # Safety
    ///
    /// Every bit pattern must be a valid `T`.
    pub(crate) unsafe fn slice_at_mut<T>(&mut self, offset: usize, count: usize) -> Option<&mut [T]> {
        let end = count
            .checked_mul(std::mem::size_of::<T>())
            .and_then(|size| size.checked_add(offset))?;
        if end > self.len || offset % std::mem::align_of::<T>() != 0 {
            return None;
        }
        let base = self.as_mut_ptr::<u8>().add(offset).cast::<T>();
        Some(std::slice::from_raw_parts_mut(base, count))
    }

    /// Reads the null-terminated UTF-16 string starting at byte `offset`.
    ///
    /// Offset 0 means "not present", as in every ETW and TDH structure.
    pub(crate) fn wide_str_at(&self, offset: usize) -> Option<String> {
        if offset == 0 || offset >= self.len {
            return None;
        }
        let units: Vec<u16> = self.bytes()[offset..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        Some(String::from_utf16_lossy(&units))
    }
}
