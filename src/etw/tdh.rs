//! Event decoding with the Trace Data Helper (TDH) API.
//!
//! The functions here take the raw `EVENT_RECORD` a consumer callback
//! receives. For a stored [`EventRecord`](super::EventRecord), go through
//! [`EventRecord::with_raw`](super::EventRecord::with_raw).

use super::AlignedBuffer;
use crate::error::{check_win32_context, Error, Result, Win32Error};
use crate::string::WideString;
use std::fmt;
use windows::core::GUID;
use windows::Win32::Foundation::ERROR_INSUFFICIENT_BUFFER;
use windows::Win32::System::Diagnostics::Etw::{
    TdhGetEventInformation, TdhGetEventMapInformation, TdhGetProperty, TdhGetPropertySize,
    EVENT_DESCRIPTOR, EVENT_MAP_ENTRY, EVENT_MAP_INFO, EVENT_PROPERTY_INFO, EVENT_RECORD,
    PROPERTY_DATA_DESCRIPTOR, TRACE_EVENT_INFO,
};

const STACK_BUFFER_BYTES: usize = 1024;

/// Runs a TDH query that fills a variable-length structure, trying a stack
/// buffer before allocating one of the reported size.
fn query_sized<T>(
    context: &'static str,
    mut query: impl FnMut(*mut T, &mut u32) -> u32,
) -> Result<AlignedBuffer> {
    let mut stack = [0u64; STACK_BUFFER_BYTES / 8];
    let mut size = STACK_BUFFER_BYTES as u32;

    match query(stack.as_mut_ptr().cast(), &mut size) {
        0 => {
            let len = (size as usize).min(STACK_BUFFER_BYTES);
            // SAFETY: The stack array holds STACK_BUFFER_BYTES initialised bytes.
            let bytes = unsafe { std::slice::from_raw_parts(stack.as_ptr().cast::<u8>(), len) };
            Ok(AlignedBuffer::from_bytes(bytes))
        }
        status if status == ERROR_INSUFFICIENT_BUFFER.0 => {
            let mut heap = AlignedBuffer::zeroed(size as usize);
            check_win32_context(query(heap.as_mut_ptr(), &mut size), context)?;
            Ok(heap)
        }
        status => Err(Win32Error::with_context(status, context).into()),
    }
}

/// Decoding metadata of an event (`TRACE_EVENT_INFO`).
#[derive(Clone)]
pub struct TraceEventInfo {
    buffer: AlignedBuffer,
}

impl TraceEventInfo {
    /// Returns the raw structure.
    pub fn as_raw(&self) -> &TRACE_EVENT_INFO {
        // SAFETY: The buffer was filled by TdhGetEventInformation.
        unsafe { &*self.buffer.as_ptr::<TRACE_EVENT_INFO>() }
    }

    fn string(&self, offset: u32) -> Option<String> {
        self.buffer.wide_str_at(offset as usize)
    }

    /// Returns the provider GUID.
    pub fn provider_guid(&self) -> GUID {
        self.as_raw().ProviderGuid
    }

    /// Returns the event descriptor.
    pub fn event_descriptor(&self) -> EVENT_DESCRIPTOR {
        self.as_raw().EventDescriptor
    }

    /// Returns the provider name.
    pub fn provider_name(&self) -> Option<String> {
        self.string(self.as_raw().ProviderNameOffset)
    }

    /// Returns the localized level name.
    pub fn level_name(&self) -> Option<String> {
        self.string(self.as_raw().LevelNameOffset)
    }

    /// Returns the localized channel name.
    pub fn channel_name(&self) -> Option<String> {
        self.string(self.as_raw().ChannelNameOffset)
    }

    /// Returns the localized task name.
    pub fn task_name(&self) -> Option<String> {
        self.string(self.as_raw().TaskNameOffset)
    }

    /// Returns the localized opcode name.
    pub fn opcode_name(&self) -> Option<String> {
        self.string(self.as_raw().OpcodeNameOffset)
    }

    /// Returns the event message template.
    pub fn event_message(&self) -> Option<String> {
        self.string(self.as_raw().EventMessageOffset)
    }

    /// Returns the provider message.
    pub fn provider_message(&self) -> Option<String> {
        self.string(self.as_raw().ProviderMessageOffset)
    }

    /// Returns the number of properties, including nested struct members.
    pub fn property_count(&self) -> u32 {
        self.as_raw().PropertyCount
    }

    /// Returns the number of top-level properties.
    pub fn top_level_property_count(&self) -> u32 {
        self.as_raw().TopLevelPropertyCount
    }

    /// Returns the description of property `index`.
    pub fn property_info(&self, index: u32) -> Option<&EVENT_PROPERTY_INFO> {
        if index >= self.property_count() {
            return None;
        }
        let offset = std::mem::offset_of!(TRACE_EVENT_INFO, EventPropertyInfoArray)
            + index as usize * std::mem::size_of::<EVENT_PROPERTY_INFO>();
        // SAFETY: EVENT_PROPERTY_INFO is plain data.
        unsafe { self.buffer.slice_at::<EVENT_PROPERTY_INFO>(offset, 1) }?.first()
    }

    /// Returns the name of property `index`.
    pub fn property_name(&self, index: u32) -> Option<String> {
        self.property_info(index)
            .and_then(|info| self.string(info.NameOffset))
    }

    /// Returns the names of the top-level properties.
    pub fn top_level_property_names(&self) -> Vec<String> {
        (0..self.top_level_property_count())
            .filter_map(|i| self.property_name(i))
            .collect()
    }
}

impl fmt::Debug for TraceEventInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceEventInfo")
            .field("provider", &self.provider_name())
            .field("task", &self.task_name())
            .field("opcode", &self.opcode_name())
            .field("properties", &self.property_count())
            .finish()
    }
}

/// Returns the decoding metadata of `record`.
pub fn event_information(record: &EVENT_RECORD) -> Result<TraceEventInfo> {
    let buffer = query_sized::<TRACE_EVENT_INFO>("TdhGetEventInformation", |ptr, size| {
        // SAFETY: `ptr` points to at least `*size` writable, aligned bytes.
        unsafe { TdhGetEventInformation(record, None, Some(ptr), size) }
    })?;
    Ok(TraceEventInfo { buffer })
}

/// A value map of an event (`EVENT_MAP_INFO`).
#[derive(Clone)]
pub struct EventMapInfo {
    buffer: AlignedBuffer,
}

impl EventMapInfo {
    /// Returns the raw structure.
    pub fn as_raw(&self) -> &EVENT_MAP_INFO {
        // SAFETY: The buffer was filled by TdhGetEventMapInformation.
        unsafe { &*self.buffer.as_ptr::<EVENT_MAP_INFO>() }
    }

    /// Returns the map name.
    pub fn name(&self) -> Option<String> {
        self.buffer.wide_str_at(self.as_raw().NameOffset as usize)
    }

    /// Returns the number of entries.
    pub fn entry_count(&self) -> u32 {
        self.as_raw().EntryCount
    }

    /// Returns the map's `(value, text)` entries.
    ///
    /// For pattern maps the value is the offset of the input string.
    pub fn entries(&self) -> Vec<(u32, String)> {
        let array = std::mem::offset_of!(EVENT_MAP_INFO, MapEntryArray);
        let entry_size = std::mem::size_of::<EVENT_MAP_ENTRY>();
        let available = self.buffer.len().saturating_sub(array) / entry_size;
        let count = (self.entry_count() as usize).min(available);

        // SAFETY: EVENT_MAP_ENTRY is plain data.
        let entries = unsafe { self.buffer.slice_at::<EVENT_MAP_ENTRY>(array, count) }
            .unwrap_or_default();
        entries
            .iter()
            .map(|entry| {
                // SAFETY: Both union members are plain u32 values.
                let value = unsafe { entry.Anonymous.Value };
                let text = self
                    .buffer
                    .wide_str_at(entry.OutputOffset as usize)
                    .map(|s| s.trim_end().to_owned())
                    .unwrap_or_default();
                (value, text)
            })
            .collect()
    }
}

impl fmt::Debug for EventMapInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMapInfo")
            .field("name", &self.name())
            .field("entries", &self.entry_count())
            .finish()
    }
}

/// Returns the value map `map_name` used by `record`.
pub fn event_map_information(record: &EVENT_RECORD, map_name: &str) -> Result<EventMapInfo> {
    let map_name = WideString::new(map_name);
    let buffer = query_sized::<EVENT_MAP_INFO>("TdhGetEventMapInformation", |ptr, size| {
        // SAFETY: `ptr` points to at least `*size` writable, aligned bytes.
        unsafe { TdhGetEventMapInformation(record, map_name.as_pcwstr(), Some(ptr), size) }
    })?;
    Ok(EventMapInfo { buffer })
}

/// Returns the raw value of the property selected by `descriptors`.
///
/// A property of size zero yields an empty vector.
pub fn property(record: &EVENT_RECORD, descriptors: &[PROPERTY_DATA_DESCRIPTOR]) -> Result<Vec<u8>> {
    if descriptors.is_empty() {
        return Err(Error::custom("no property data descriptors"));
    }
    let mut size = 0u32;
    // SAFETY: The descriptors and record are valid for the call.
    let status = unsafe { TdhGetPropertySize(record, None, descriptors, &mut size) };
    check_win32_context(status, "TdhGetPropertySize")?;
    if size == 0 {
        return Ok(Vec::new());
    }

    let mut data = vec![0u8; size as usize];
    // SAFETY: `data` has the size TDH asked for.
    let status = unsafe { TdhGetProperty(record, None, descriptors, &mut data) };
    check_win32_context(status, "TdhGetProperty")?;
    Ok(data)
}

/// Returns the raw value of the top-level property `name`.
pub fn property_by_name(record: &EVENT_RECORD, name: &str) -> Result<Vec<u8>> {
    let name = WideString::new(name);
    let descriptor = PROPERTY_DATA_DESCRIPTOR {
        PropertyName: name.as_ptr() as usize as u64,
        ArrayIndex: u32::MAX,
        Reserved: 0,
    };
    property(record, &[descriptor])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etw::EventRecord;
    use windows::Win32::System::Diagnostics::Etw::EVENT_HEADER;

    fn unknown_record() -> EventRecord {
        let mut header = EVENT_HEADER::default();
        header.ProviderId = GUID::from_u128(0x0bad_f00d_0000_4000_8000_000000000001);
        let mut record = EventRecord::new(header);
        record.set_user_data(&[1, 0, 0, 0]).unwrap();
        record
    }

    fn push_wide(bytes: &mut Vec<u8>, s: &str) -> u32 {
        let offset = bytes.len() as u32;
        for unit in s.encode_utf16().chain(Some(0)) {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        offset
    }

    #[test]
    fn test_unknown_provider_has_no_metadata() {
        let record = unknown_record();
        record.with_raw(|raw| {
            assert!(event_information(raw).is_err());
            assert!(event_map_information(raw, "NoSuchMap").is_err());
            assert!(property_by_name(raw, "Value").is_err());
        });
    }

    #[test]
    fn test_property_needs_descriptors() {
        let record = unknown_record();
        record.with_raw(|raw| assert!(property(raw, &[]).is_err()));
    }

    #[test]
    fn test_trace_event_info_strings() {
        let header = std::mem::size_of::<TRACE_EVENT_INFO>();
        let mut bytes = vec![0u8; header];
        let provider = push_wide(&mut bytes, "Demo-Provider");
        let task = push_wide(&mut bytes, "Startup");

        let mut info = TraceEventInfo {
            buffer: AlignedBuffer::from_bytes(&bytes),
        };
        // SAFETY: Test-only access to the zeroed header.
        let raw = unsafe { &mut *info.buffer.as_mut_ptr::<TRACE_EVENT_INFO>() };
        raw.ProviderNameOffset = provider;
        raw.TaskNameOffset = task;
        raw.PropertyCount = 1;
        raw.EventPropertyInfoArray[0].NameOffset = task;

        assert_eq!(info.provider_name().as_deref(), Some("Demo-Provider"));
        assert_eq!(info.task_name().as_deref(), Some("Startup"));
        assert_eq!(info.opcode_name(), None);
        assert_eq!(info.property_name(0).as_deref(), Some("Startup"));
        assert!(info.property_info(1).is_none());
    }

    #[test]
    fn test_property_info_past_first_element() {
        let header = std::mem::size_of::<TRACE_EVENT_INFO>();
        let mut bytes = vec![0u8; header + std::mem::size_of::<EVENT_PROPERTY_INFO>()];
        let first = push_wide(&mut bytes, "Count");
        let second = push_wide(&mut bytes, "Name");

        let mut info = TraceEventInfo {
            buffer: AlignedBuffer::from_bytes(&bytes),
        };
        let array = std::mem::offset_of!(TRACE_EVENT_INFO, EventPropertyInfoArray);
        // SAFETY: Test-only access to the zeroed header and both elements.
        unsafe {
            (*info.buffer.as_mut_ptr::<TRACE_EVENT_INFO>()).PropertyCount = 2;
            (*info.buffer.as_mut_ptr::<TRACE_EVENT_INFO>()).TopLevelPropertyCount = 2;
            let properties = info
                .buffer
                .slice_at_mut::<EVENT_PROPERTY_INFO>(array, 2)
                .unwrap();
            properties[0].NameOffset = first;
            properties[1].NameOffset = second;
        }

        assert_eq!(info.top_level_property_names(), vec!["Count", "Name"]);
        assert!(info.property_info(2).is_none());
    }

    #[test]
    fn test_event_map_entries() {
        let header = std::mem::size_of::<EVENT_MAP_INFO>();
        let mut bytes = vec![0u8; header + std::mem::size_of::<EVENT_MAP_ENTRY>()];
        let name = push_wide(&mut bytes, "StateMap");
        let off = push_wide(&mut bytes, "Off ");
        let on = push_wide(&mut bytes, "On ");

        let mut map = EventMapInfo {
            buffer: AlignedBuffer::from_bytes(&bytes),
        };
        // SAFETY: Test-only access to the zeroed header; the buffer holds two
        // entries.
        unsafe {
            let raw = &mut *map.buffer.as_mut_ptr::<EVENT_MAP_INFO>();
            raw.NameOffset = name;
            raw.EntryCount = 2;
            let array = std::mem::offset_of!(EVENT_MAP_INFO, MapEntryArray);
            let entries = map.buffer.slice_at_mut::<EVENT_MAP_ENTRY>(array, 2).unwrap();
            entries[0].OutputOffset = off;
            entries[0].Anonymous.Value = 0;
            entries[1].OutputOffset = on;
            entries[1].Anonymous.Value = 1;
        }

        assert_eq!(map.name().as_deref(), Some("StateMap"));
        assert_eq!(
            map.entries(),
            vec![(0, "Off".to_owned()), (1, "On".to_owned())]
        );
    }
}
