//! Event payload fields and descriptors.

use crate::error::{Error, Result};
use crate::string::WideString;
use std::ffi::CStr;
use std::fmt;
use std::marker::PhantomData;
use windows::core::GUID;
use windows::Win32::System::Diagnostics::Etw::{EVENT_DATA_DESCRIPTOR, EVENT_DESCRIPTOR};

/// The largest number of data descriptors a single event may carry.
pub const MAX_EVENT_DATA_DESCRIPTORS: usize = 128;

const NULL_STR: &[u8] = b"(null)\0";
const NULL_WIDE: &[u16] = &[
    b'(' as u16, b'n' as u16, b'u' as u16, b'l' as u16, b'l' as u16, b')' as u16, 0,
];

/// Event severity levels.
pub mod level {
    /// Abnormal exit or termination.
    pub const CRITICAL: u8 = 1;
    /// Severe errors.
    pub const ERROR: u8 = 2;
    /// Warnings such as allocation failures.
    pub const WARNING: u8 = 3;
    /// Non-error informational events.
    pub const INFORMATION: u8 = 4;
    /// Detailed trace events.
    pub const VERBOSE: u8 = 5;
}

mod sealed {
    pub trait Sealed {}
}

/// Fixed-size values that can be written as a single event field.
///
/// The field is the in-memory representation of the value, as ETW manifests
/// expect for integer, floating point and GUID fields.
pub trait EventScalar: sealed::Sealed {}

macro_rules! impl_event_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}
            impl EventScalar for $t {}
        )*
    };
}

impl_event_scalar!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, GUID);

/// One field of an event payload.
///
/// `EventData` borrows the memory it describes; the borrow ends once the
/// event has been written.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct EventData<'a> {
    raw: EVENT_DATA_DESCRIPTOR,
    _data: PhantomData<&'a [u8]>,
}

impl<'a> EventData<'a> {
    fn from_parts(ptr: *const u8, size: usize) -> Result<Self> {
        let size = u32::try_from(size)
            .map_err(|_| Error::limit_exceeded("event field bytes", size, u32::MAX as usize))?;
        Ok(Self {
            raw: EVENT_DATA_DESCRIPTOR {
                Ptr: ptr as usize as u64,
                Size: size,
                ..Default::default()
            },
            _data: PhantomData,
        })
    }

    /// Describes an arbitrary block of bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::LimitExceeded`] if the block is larger than a
    /// descriptor can express (4 GiB).
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        Self::from_parts(bytes.as_ptr(), bytes.len())
    }

    /// Describes a UTF-16 string including its terminator.
    ///
    /// `units` must end with a zero unit for the field to decode as a string.
    /// Fails like [`EventData::from_bytes`].
    pub fn from_wide(units: &'a [u16]) -> Result<Self> {
        Self::from_parts(units.as_ptr().cast(), std::mem::size_of_val(units))
    }

    /// Returns the size of the field in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.raw.Size as usize
    }

    /// Returns the raw descriptor.
    #[inline]
    pub fn as_raw(&self) -> &EVENT_DATA_DESCRIPTOR {
        &self.raw
    }

    /// Views a slice of fields as the raw descriptors `EventWrite` takes.
    pub(crate) fn as_raw_slice<'s>(data: &'s [EventData<'a>]) -> &'s [EVENT_DATA_DESCRIPTOR] {
        // SAFETY: EventData is a transparent wrapper around EVENT_DATA_DESCRIPTOR.
        unsafe { std::slice::from_raw_parts(data.as_ptr().cast(), data.len()) }
    }
}

impl<'a, T: EventScalar> From<&'a T> for EventData<'a> {
    fn from(value: &'a T) -> Self {
        Self {
            raw: EVENT_DATA_DESCRIPTOR {
                Ptr: value as *const T as usize as u64,
                // Scalars are at most 16 bytes.
                Size: std::mem::size_of::<T>() as u32,
                ..Default::default()
            },
            _data: PhantomData,
        }
    }
}

impl<'a> TryFrom<&'a CStr> for EventData<'a> {
    type Error = Error;

    fn try_from(value: &'a CStr) -> Result<Self> {
        Self::from_bytes(value.to_bytes_with_nul())
    }
}

impl<'a> TryFrom<Option<&'a CStr>> for EventData<'a> {
    type Error = Error;

    fn try_from(value: Option<&'a CStr>) -> Result<Self> {
        Self::from_bytes(value.map_or(NULL_STR, CStr::to_bytes_with_nul))
    }
}

impl<'a> TryFrom<&'a WideString> for EventData<'a> {
    type Error = Error;

    fn try_from(value: &'a WideString) -> Result<Self> {
        Self::from_wide(value.as_slice())
    }
}

impl<'a> TryFrom<Option<&'a WideString>> for EventData<'a> {
    type Error = Error;

    fn try_from(value: Option<&'a WideString>) -> Result<Self> {
        Self::from_wide(value.map_or(NULL_WIDE, WideString::as_slice))
    }
}

impl<'a> TryFrom<&'a [u8]> for EventData<'a> {
    type Error = Error;

    fn try_from(value: &'a [u8]) -> Result<Self> {
        Self::from_bytes(value)
    }
}

impl fmt::Debug for EventData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventData")
            .field("ptr", &format_args!("{:#x}", self.raw.Ptr))
            .field("size", &self.raw.Size)
            .finish()
    }
}

/// Identifies an event and its metadata (`EVENT_DESCRIPTOR`).
///
/// ```
/// use raii_windows::etw::{level, EventDescriptor};
///
/// const FAILED: EventDescriptor = EventDescriptor::new(7, level::ERROR).keyword(0x10);
/// assert_eq!(FAILED.as_raw().Id, 7);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct EventDescriptor(EVENT_DESCRIPTOR);

impl EventDescriptor {
    /// Creates a descriptor with the given event id and level; every other
    /// field is zero.
    pub const fn new(id: u16, level: u8) -> Self {
        Self(EVENT_DESCRIPTOR {
            Id: id,
            Version: 0,
            Channel: 0,
            Level: level,
            Opcode: 0,
            Task: 0,
            Keyword: 0,
        })
    }

    /// Sets the event version.
    pub const fn version(mut self, version: u8) -> Self {
        self.0.Version = version;
        self
    }

    /// Sets the channel.
    pub const fn channel(mut self, channel: u8) -> Self {
        self.0.Channel = channel;
        self
    }

    /// Sets the opcode.
    pub const fn opcode(mut self, opcode: u8) -> Self {
        self.0.Opcode = opcode;
        self
    }

    /// Sets the task.
    pub const fn task(mut self, task: u16) -> Self {
        self.0.Task = task;
        self
    }

    /// Sets the keyword mask.
    pub const fn keyword(mut self, keyword: u64) -> Self {
        self.0.Keyword = keyword;
        self
    }

    /// Returns the raw descriptor.
    #[inline]
    pub const fn as_raw(&self) -> &EVENT_DESCRIPTOR {
        &self.0
    }
}

impl PartialEq for EventDescriptor {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.0, &other.0);
        (a.Id, a.Version, a.Channel, a.Level, a.Opcode, a.Task, a.Keyword)
            == (b.Id, b.Version, b.Channel, b.Level, b.Opcode, b.Task, b.Keyword)
    }
}

impl Eq for EventDescriptor {}

impl From<EVENT_DESCRIPTOR> for EventDescriptor {
    fn from(raw: EVENT_DESCRIPTOR) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_fields() {
        let value = 0x1234_5678u32;
        let data = EventData::from(&value);
        assert_eq!(data.size(), 4);
        assert_eq!(data.as_raw().Ptr, &value as *const u32 as usize as u64);

        let id = GUID::from_u128(1);
        assert_eq!(EventData::from(&id).size(), 16);
        assert_eq!(EventData::from(&1.5f64).size(), 8);
    }

    #[test]
    fn test_c_string_includes_terminator() {
        let name = c"main";
        assert_eq!(EventData::try_from(name).unwrap().size(), 5);
    }

    #[test]
    fn test_missing_strings_are_written_as_null() {
        let narrow = EventData::try_from(None::<&CStr>).unwrap();
        assert_eq!(narrow.size(), 7);
        let wide = EventData::try_from(None::<&WideString>).unwrap();
        assert_eq!(wide.size(), 14);
        assert_eq!(String::from_utf16_lossy(&NULL_WIDE[..6]), "(null)");
    }

    #[test]
    fn test_wide_string_field() {
        let text = WideString::new("abc");
        assert_eq!(EventData::try_from(&text).unwrap().size(), 8);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_oversized_field_is_rejected() {
        let size = u32::MAX as usize + 1;
        let err = EventData::from_parts(std::ptr::NonNull::<u8>::dangling().as_ptr(), size)
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { len, .. } if len == size));
        assert_eq!(
            EventData::from_parts(NULL_STR.as_ptr(), u32::MAX as usize)
                .unwrap()
                .size(),
            u32::MAX as usize
        );
    }

    #[test]
    fn test_raw_slice_view() {
        let a = 1u8;
        let bytes = [1u8, 2, 3];
        let fields = [EventData::from(&a), EventData::try_from(&bytes[..]).unwrap()];
        let raw = EventData::as_raw_slice(&fields);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].Size, 3);
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = EventDescriptor::new(3, level::WARNING)
            .version(2)
            .channel(16)
            .opcode(1)
            .task(9)
            .keyword(0x8000);
        let raw = desc.as_raw();
        assert_eq!(
            (raw.Id, raw.Version, raw.Channel, raw.Level, raw.Opcode, raw.Task, raw.Keyword),
            (3, 2, 16, 3, 1, 9, 0x8000)
        );
    }
}
