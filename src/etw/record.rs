//! Owned copies of event records.

use super::data::EventDescriptor;
use super::AlignedBuffer;
use crate::error::{Error, Result};
use crate::guid::GuidDisplay;
use std::fmt;
use windows::core::GUID;
use windows::Win32::System::Diagnostics::Etw::{
    ETW_BUFFER_CONTEXT, EVENT_HEADER, EVENT_HEADER_EXTENDED_DATA_ITEM, EVENT_RECORD,
};

/// One extended data item of an event (stack trace, SID, related activity
/// id, ...).
#[derive(Clone)]
pub struct ExtendedDataItem {
    descriptor: EVENT_HEADER_EXTENDED_DATA_ITEM,
    data: AlignedBuffer,
}

impl ExtendedDataItem {
    /// Creates an item of type `ext_type` (`EVENT_HEADER_EXT_TYPE_*`) holding
    /// a copy of `data`.
    pub fn new(ext_type: u16, data: &[u8]) -> Result<Self> {
        let size = u16::try_from(data.len()).map_err(|_| {
            Error::limit_exceeded("extended data item size", data.len(), u16::MAX as usize)
        })?;
        Ok(Self {
            descriptor: EVENT_HEADER_EXTENDED_DATA_ITEM {
                ExtType: ext_type,
                DataSize: size,
                ..Default::default()
            },
            data: AlignedBuffer::from_bytes(data),
        })
    }

    /// Copies a raw item and the data it points to.
    ///
    /// # Safety
    ///
    /// `raw.DataPtr` must point to `raw.DataSize` readable bytes.
    pub unsafe fn from_raw(raw: &EVENT_HEADER_EXTENDED_DATA_ITEM) -> Self {
        let data = if raw.DataPtr == 0 || raw.DataSize == 0 {
            AlignedBuffer::zeroed(0)
        } else {
            AlignedBuffer::from_bytes(std::slice::from_raw_parts(
                raw.DataPtr as usize as *const u8,
                raw.DataSize as usize,
            ))
        };
        let mut descriptor = *raw;
        descriptor.DataSize = data.len() as u16;
        descriptor.DataPtr = 0;
        Self { descriptor, data }
    }

    /// Returns the `EVENT_HEADER_EXT_TYPE_*` value.
    #[inline]
    pub fn ext_type(&self) -> u16 {
        self.descriptor.ExtType
    }

    /// Returns the item's payload.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data.bytes()
    }

    fn to_raw(&self) -> EVENT_HEADER_EXTENDED_DATA_ITEM {
        let mut raw = self.descriptor;
        raw.DataPtr = if self.data.len() == 0 {
            0
        } else {
            self.data.as_ptr::<u8>() as usize as u64
        };
        raw
    }
}

impl fmt::Debug for ExtendedDataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedDataItem")
            .field("ext_type", &self.ext_type())
            .field("size", &self.data.len())
            .finish()
    }
}

/// An event record that owns its user data and extended data.
///
/// Records handed to a consumer callback are only valid during the callback;
/// copy them into an `EventRecord` to keep them.
#[derive(Clone)]
pub struct EventRecord {
    header: EVENT_HEADER,
    buffer_context: ETW_BUFFER_CONTEXT,
    user_data: AlignedBuffer,
    extended_data: Vec<ExtendedDataItem>,
}

impl Default for EventRecord {
    fn default() -> Self {
        Self {
            header: EVENT_HEADER::default(),
            buffer_context: ETW_BUFFER_CONTEXT::default(),
            user_data: AlignedBuffer::zeroed(0),
            extended_data: Vec::new(),
        }
    }
}

impl EventRecord {
    /// Creates an empty record with the given header.
    pub fn new(header: EVENT_HEADER) -> Self {
        Self {
            header,
            ..Self::default()
        }
    }

    /// Deep-copies `raw`, including its user data and extended data items.
    ///
    /// # Safety
    ///
    /// The pointers and lengths in `raw` must be consistent, as they are in a
    /// record delivered to a consumer callback.
    pub unsafe fn from_raw(raw: &EVENT_RECORD) -> Self {
        let user_data = if raw.UserData.is_null() || raw.UserDataLength == 0 {
            AlignedBuffer::zeroed(0)
        } else {
            AlignedBuffer::from_bytes(std::slice::from_raw_parts(
                raw.UserData as *const u8,
                raw.UserDataLength as usize,
            ))
        };
        let extended_data = if raw.ExtendedData.is_null() {
            Vec::new()
        } else {
            std::slice::from_raw_parts(raw.ExtendedData, raw.ExtendedDataCount as usize)
                .iter()
                .map(|item| ExtendedDataItem::from_raw(item))
                .collect()
        };
        Self {
            header: raw.EventHeader,
            buffer_context: raw.BufferContext,
            user_data,
            extended_data,
        }
    }

    /// Replaces the user data with a copy of `data`.
    pub fn set_user_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > u16::MAX as usize {
            return Err(Error::limit_exceeded(
                "event user data",
                data.len(),
                u16::MAX as usize,
            ));
        }
        self.user_data = AlignedBuffer::from_bytes(data);
        Ok(())
    }

    /// Replaces the extended data items.
    pub fn set_extended_data(&mut self, items: Vec<ExtendedDataItem>) -> Result<()> {
        if items.len() > u16::MAX as usize {
            return Err(Error::limit_exceeded(
                "extended data items",
                items.len(),
                u16::MAX as usize,
            ));
        }
        self.extended_data = items;
        Ok(())
    }

    /// Calls `f` with a raw record pointing into this copy.
    ///
    /// The raw record is only valid inside `f`. Its `UserContext` is null.
    pub fn with_raw<R>(&self, f: impl FnOnce(&EVENT_RECORD) -> R) -> R {
        let mut items: Vec<EVENT_HEADER_EXTENDED_DATA_ITEM> =
            self.extended_data.iter().map(ExtendedDataItem::to_raw).collect();
        let raw = EVENT_RECORD {
            EventHeader: self.header,
            BufferContext: self.buffer_context,
            ExtendedDataCount: items.len() as u16,
            UserDataLength: self.user_data.len() as u16,
            ExtendedData: if items.is_empty() {
                std::ptr::null_mut()
            } else {
                items.as_mut_ptr()
            },
            UserData: if self.user_data.len() == 0 {
                std::ptr::null_mut()
            } else {
                self.user_data.as_ptr::<u8>() as *mut _
            },
            UserContext: std::ptr::null_mut(),
        };
        f(&raw)
    }

    /// Returns the event header.
    #[inline]
    pub fn header(&self) -> &EVENT_HEADER {
        &self.header
    }

    /// Returns the header mutably.
    #[inline]
    pub fn header_mut(&mut self) -> &mut EVENT_HEADER {
        &mut self.header
    }

    /// Returns the buffer context (processor and logger id).
    #[inline]
    pub fn buffer_context(&self) -> &ETW_BUFFER_CONTEXT {
        &self.buffer_context
    }

    /// Returns the provider that wrote the event.
    #[inline]
    pub fn provider_id(&self) -> GUID {
        self.header.ProviderId
    }

    /// Returns the event descriptor.
    #[inline]
    pub fn descriptor(&self) -> EventDescriptor {
        self.header.EventDescriptor.into()
    }

    /// Returns the id of the process that wrote the event.
    #[inline]
    pub fn process_id(&self) -> u32 {
        self.header.ProcessId
    }

    /// Returns the id of the thread that wrote the event.
    #[inline]
    pub fn thread_id(&self) -> u32 {
        self.header.ThreadId
    }

    /// Returns the raw timestamp, in the session's clock resolution.
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.header.TimeStamp
    }

    /// Returns the user data.
    #[inline]
    pub fn user_data(&self) -> &[u8] {
        self.user_data.bytes()
    }

    /// Returns the extended data items.
    #[inline]
    pub fn extended_data(&self) -> &[ExtendedDataItem] {
        &self.extended_data
    }
}

impl fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRecord")
            .field("provider", &GuidDisplay(&self.header.ProviderId))
            .field("id", &self.header.EventDescriptor.Id)
            .field("process_id", &self.header.ProcessId)
            .field("thread_id", &self.header.ThreadId)
            .field("user_data", &self.user_data.len())
            .field("extended_data", &self.extended_data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventRecord {
        let mut header = EVENT_HEADER::default();
        header.ProviderId = GUID::from_u128(0xABCD);
        header.EventDescriptor.Id = 12;
        header.ProcessId = 42;
        let mut record = EventRecord::new(header);
        record.set_user_data(&[1, 2, 3, 4]).unwrap();
        record
            .set_extended_data(vec![ExtendedDataItem::new(5, &[9; 8]).unwrap()])
            .unwrap();
        record
    }

    #[test]
    fn test_accessors() {
        let record = sample();
        assert_eq!(record.provider_id(), GUID::from_u128(0xABCD));
        assert_eq!(record.descriptor().as_raw().Id, 12);
        assert_eq!(record.process_id(), 42);
        assert_eq!(record.user_data(), &[1, 2, 3, 4]);
        assert_eq!(record.extended_data()[0].ext_type(), 5);
        assert_eq!(record.extended_data()[0].data(), &[9; 8]);
    }

    #[test]
    fn test_raw_view_and_deep_copy() {
        let record = sample();
        let copy = record.with_raw(|raw| {
            assert_eq!(raw.UserDataLength, 4);
            assert_eq!(raw.ExtendedDataCount, 1);
            assert!(raw.UserContext.is_null());
            unsafe { EventRecord::from_raw(raw) }
        });
        drop(record);

        assert_eq!(copy.user_data(), &[1, 2, 3, 4]);
        assert_eq!(copy.extended_data()[0].data(), &[9; 8]);
        copy.with_raw(|raw| assert_ne!(raw.UserData, std::ptr::null_mut()));
    }

    #[test]
    fn test_empty_record() {
        let record = EventRecord::default();
        assert!(record.user_data().is_empty());
        record.with_raw(|raw| {
            assert!(raw.UserData.is_null());
            assert!(raw.ExtendedData.is_null());
        });
    }

    #[test]
    fn test_limits() {
        let mut record = EventRecord::default();
        let big = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            record.set_user_data(&big),
            Err(Error::LimitExceeded { .. })
        ));
        assert!(ExtendedDataItem::new(1, &big).is_err());
    }
}
