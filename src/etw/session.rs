//! Trace sessions (controllers).

use super::AlignedBuffer;
use crate::error::{check_win32_context, Result};
use crate::guid::GuidDisplay;
use crate::string::{path_to_wide, WideString};
use std::fmt;
use std::path::PathBuf;
use windows::core::GUID;
use windows::Win32::System::Diagnostics::Etw::{
    ControlTraceW, EnableTraceEx, StartTraceW, CONTROLTRACE_HANDLE, EVENT_TRACE_CONTROL,
    EVENT_TRACE_CONTROL_FLUSH, EVENT_TRACE_CONTROL_QUERY, EVENT_TRACE_CONTROL_STOP,
    EVENT_TRACE_FLAG, EVENT_TRACE_PROPERTIES, EVENT_TRACE_REAL_TIME_MODE, WNODE_FLAG_TRACED_GUID,
};

// Room reserved for each name so that QUERY and STOP can write it back.
const NAME_CAPACITY: usize = 1024;

/// Timestamp source of a session (`Wnode.ClientContext`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum ClockResolution {
    /// Query performance counter.
    #[default]
    QueryPerformanceCounter = 1,
    /// System time.
    SystemTime = 2,
    /// CPU cycle counter.
    CpuCycle = 3,
}

/// Configuration of a trace session.
///
/// ```
/// use raii_windows::etw::SessionProperties;
///
/// let props = SessionProperties::new()
///     .buffer_size(64)
///     .buffers(4, 16)
///     .flush_timer(1);
/// assert_eq!(props.get_log_file_mode(), 0x100);
/// ```
#[derive(Debug, Clone)]
pub struct SessionProperties {
    guid: GUID,
    log_file: Option<PathBuf>,
    log_file_mode: u32,
    buffer_size: u32,
    minimum_buffers: u32,
    maximum_buffers: u32,
    maximum_file_size: u32,
    flush_timer: u32,
    clock_resolution: ClockResolution,
    enable_flags: u32,
}

impl Default for SessionProperties {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProperties {
    /// Creates the properties of a real-time session using system defaults
    /// for buffer sizes.
    pub fn new() -> Self {
        Self {
            guid: GUID::zeroed(),
            log_file: None,
            log_file_mode: EVENT_TRACE_REAL_TIME_MODE,
            buffer_size: 0,
            minimum_buffers: 0,
            maximum_buffers: 0,
            maximum_file_size: 0,
            flush_timer: 0,
            clock_resolution: ClockResolution::default(),
            enable_flags: 0,
        }
    }

    /// Sets the session GUID. A zero GUID lets the system pick one.
    pub fn guid(mut self, guid: GUID) -> Self {
        self.guid = guid;
        self
    }

    /// Writes events to `path` in addition to any real-time consumers.
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Replaces the `EVENT_TRACE_*_MODE` flags.
    pub fn log_file_mode(mut self, mode: u32) -> Self {
        self.log_file_mode = mode;
        self
    }

    /// Sets the size of each buffer in kilobytes.
    pub fn buffer_size(mut self, kilobytes: u32) -> Self {
        self.buffer_size = kilobytes;
        self
    }

    /// Sets the minimum and maximum number of buffers.
    pub fn buffers(mut self, minimum: u32, maximum: u32) -> Self {
        self.minimum_buffers = minimum;
        self.maximum_buffers = maximum;
        self
    }

    /// Sets the maximum log file size in megabytes.
    pub fn maximum_file_size(mut self, megabytes: u32) -> Self {
        self.maximum_file_size = megabytes;
        self
    }

    /// Sets how often, in seconds, buffers are flushed.
    pub fn flush_timer(mut self, seconds: u32) -> Self {
        self.flush_timer = seconds;
        self
    }

    /// Sets the timestamp source.
    pub fn clock_resolution(mut self, clock: ClockResolution) -> Self {
        self.clock_resolution = clock;
        self
    }

    /// Sets the `EVENT_TRACE_FLAG_*` kernel flags.
    pub fn enable_flags(mut self, flags: u32) -> Self {
        self.enable_flags = flags;
        self
    }

    /// Returns the configured log mode.
    pub fn get_log_file_mode(&self) -> u32 {
        self.log_file_mode
    }

    /// Lays out `EVENT_TRACE_PROPERTIES` followed by the logger name and, if
    /// set, the log file name.
    pub(crate) fn to_buffer(&self, name: &str) -> AlignedBuffer {
        let header = std::mem::size_of::<EVENT_TRACE_PROPERTIES>();
        let name = WideString::new(name);
        let log_file = self.log_file.as_deref().map(path_to_wide);

        let name_bytes = name.as_slice().len().max(NAME_CAPACITY) * 2;
        let log_file_bytes = log_file
            .as_ref()
            .map_or(0, |units| units.len().max(NAME_CAPACITY) * 2);
        let total = header + name_bytes + log_file_bytes;

        let mut buffer = AlignedBuffer::zeroed(total);
        {
            let bytes = buffer.bytes_mut();
            copy_units(&mut bytes[header..], name.as_slice());
            if let Some(units) = &log_file {
                copy_units(&mut bytes[header + name_bytes..], units);
            }
        }

        // SAFETY: The buffer is aligned and starts with a zeroed header.
        let props = unsafe { &mut *buffer.as_mut_ptr::<EVENT_TRACE_PROPERTIES>() };
        props.Wnode.BufferSize = total as u32;
        props.Wnode.Guid = self.guid;
        props.Wnode.Flags = WNODE_FLAG_TRACED_GUID;
        props.Wnode.ClientContext = self.clock_resolution as u32;
        props.BufferSize = self.buffer_size;
        props.MinimumBuffers = self.minimum_buffers;
        props.MaximumBuffers = self.maximum_buffers;
        props.MaximumFileSize = self.maximum_file_size;
        props.LogFileMode = self.log_file_mode;
        props.FlushTimer = self.flush_timer;
        props.EnableFlags = EVENT_TRACE_FLAG(self.enable_flags);
        props.LoggerNameOffset = header as u32;
        props.LogFileNameOffset = if log_file.is_some() {
            (header + name_bytes) as u32
        } else {
            0
        };
        buffer
    }
}

fn copy_units(dest: &mut [u8], units: &[u16]) {
    for (pair, unit) in dest.chunks_exact_mut(2).zip(units) {
        pair.copy_from_slice(&unit.to_le_bytes());
    }
}

/// How a provider is enabled on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnableParameters {
    /// Highest level to deliver.
    pub level: u8,
    /// Deliver events that have at least one of these keywords.
    pub match_any_keyword: u64,
    /// Deliver only events that have all of these keywords.
    pub match_all_keyword: u64,
    /// `EVENT_ENABLE_PROPERTY_*` flags.
    pub enable_property: u32,
}

impl Default for EnableParameters {
    fn default() -> Self {
        Self {
            level: super::level::VERBOSE,
            match_any_keyword: 0,
            match_all_keyword: 0,
            enable_property: 0,
        }
    }
}

impl EnableParameters {
    /// Creates parameters for `level` and every keyword.
    pub fn new(level: u8) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Sets the match-any keyword mask.
    pub fn match_any(mut self, keyword: u64) -> Self {
        self.match_any_keyword = keyword;
        self
    }

    /// Sets the match-all keyword mask.
    pub fn match_all(mut self, keyword: u64) -> Self {
        self.match_all_keyword = keyword;
        self
    }

    /// Sets the enable property flags.
    pub fn property(mut self, property: u32) -> Self {
        self.enable_property = property;
        self
    }
}

/// Buffer and loss counters of a running session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    /// Buffers allocated.
    pub number_of_buffers: u32,
    /// Buffers currently free.
    pub free_buffers: u32,
    /// Events that could not be recorded.
    pub events_lost: u32,
    /// Buffers written so far.
    pub buffers_written: u32,
    /// Buffers that could not be written to the log file.
    pub log_buffers_lost: u32,
    /// Buffers that could not be delivered to real-time consumers.
    pub real_time_buffers_lost: u32,
}

/// A running trace session; stopped when dropped.
pub struct EventSession {
    handle: CONTROLTRACE_HANDLE,
    properties: AlignedBuffer,
}

impl EventSession {
    /// Starts the session `name`.
    ///
    /// Requires administrator rights or membership in the Performance Log
    /// Users group.
    pub fn start(name: &str, properties: &SessionProperties) -> Result<Self> {
        let wide_name = WideString::new(name);
        let mut buffer = properties.to_buffer(name);
        let mut handle = CONTROLTRACE_HANDLE::default();

        // SAFETY: The properties buffer is laid out as StartTraceW expects and
        // has room for the names it writes back.
        let status = unsafe {
            StartTraceW(
                &mut handle,
                wide_name.as_pcwstr(),
                buffer.as_mut_ptr::<EVENT_TRACE_PROPERTIES>(),
            )
        };
        check_win32_context(status, "StartTraceW")?;
        log::debug!("started trace session {:?}", name);
        Ok(Self {
            handle,
            properties: buffer,
        })
    }

    /// Takes ownership of a session started elsewhere.
    ///
    /// # Safety
    ///
    /// `handle` must be a running session that nothing else stops.
    pub unsafe fn from_raw(
        handle: CONTROLTRACE_HANDLE,
        name: &str,
        properties: &SessionProperties,
    ) -> Self {
        Self {
            handle,
            properties: properties.to_buffer(name),
        }
    }

    /// Returns the session name.
    pub fn name(&self) -> String {
        let offset = self.properties().LoggerNameOffset as usize;
        self.properties.wide_str_at(offset).unwrap_or_default()
    }

    /// Returns the log file name, if the session writes one.
    pub fn log_file(&self) -> Option<PathBuf> {
        let offset = self.properties().LogFileNameOffset as usize;
        self.properties.wide_str_at(offset).map(PathBuf::from)
    }

    /// Returns the session properties as last reported by the system.
    pub fn properties(&self) -> &EVENT_TRACE_PROPERTIES {
        // SAFETY: The buffer was built by `SessionProperties::to_buffer`.
        unsafe { &*self.properties.as_ptr::<EVENT_TRACE_PROPERTIES>() }
    }

    /// Returns the session GUID, passed as the source id when enabling providers.
    pub fn guid(&self) -> GUID {
        self.properties().Wnode.Guid
    }

    /// Returns the raw session handle.
    #[inline]
    pub fn handle(&self) -> CONTROLTRACE_HANDLE {
        self.handle
    }

    /// Enables `provider` on this session.
    pub fn enable_trace(&self, provider: &GUID, params: &EnableParameters) -> Result<()> {
        self.enable_trace_raw(provider, 1, params)
    }

    /// Disables `provider` on this session.
    pub fn disable_trace(&self, provider: &GUID) -> Result<()> {
        self.enable_trace_raw(provider, 0, &EnableParameters::default())
    }

    fn enable_trace_raw(
        &self,
        provider: &GUID,
        enable: u32,
        params: &EnableParameters,
    ) -> Result<()> {
        enable_trace_ex(self.handle, Some(&self.guid()), provider, enable, params)?;
        log::debug!(
            "{} provider {} on session {:?}",
            if enable != 0 { "enabled" } else { "disabled" },
            GuidDisplay(provider),
            self.name()
        );
        Ok(())
    }

    /// Flushes the session's buffers.
    pub fn flush(&mut self) -> Result<()> {
        self.control(EVENT_TRACE_CONTROL_FLUSH, "ControlTraceW(FLUSH)")
    }

    /// Refreshes the properties and returns the session's counters.
    pub fn query(&mut self) -> Result<SessionStatistics> {
        self.control(EVENT_TRACE_CONTROL_QUERY, "ControlTraceW(QUERY)")?;
        let props = self.properties();
        Ok(SessionStatistics {
            number_of_buffers: props.NumberOfBuffers,
            free_buffers: props.FreeBuffers,
            events_lost: props.EventsLost,
            buffers_written: props.BuffersWritten,
            log_buffers_lost: props.LogBuffersLost,
            real_time_buffers_lost: props.RealTimeBuffersLost,
        })
    }

    /// Stops the session and reports whether stopping succeeded.
    pub fn stop(mut self) -> Result<()> {
        self.stop_in_place()
    }

    fn stop_in_place(&mut self) -> Result<()> {
        if self.handle.Value == 0 {
            return Ok(());
        }
        let result = self.control(EVENT_TRACE_CONTROL_STOP, "ControlTraceW(STOP)");
        self.handle = CONTROLTRACE_HANDLE::default();
        if result.is_ok() {
            log::debug!("stopped trace session {:?}", self.name());
        }
        result
    }

    fn control(&mut self, code: EVENT_TRACE_CONTROL, context: &'static str) -> Result<()> {
        let name = WideString::new(&self.name());
        // SAFETY: The properties buffer keeps the layout built at start.
        let status = unsafe {
            ControlTraceW(
                self.handle,
                name.as_pcwstr(),
                self.properties.as_mut_ptr::<EVENT_TRACE_PROPERTIES>(),
                code,
            )
        };
        check_win32_context(status, context)
    }
}

pub(crate) fn enable_trace_ex(
    session: CONTROLTRACE_HANDLE,
    source_id: Option<&GUID>,
    provider: &GUID,
    enable: u32,
    params: &EnableParameters,
) -> Result<()> {
    // SAFETY: `provider` and `source_id` are valid for the call.
    let status = unsafe {
        EnableTraceEx(
            provider,
            source_id.map(|id| id as *const GUID),
            session,
            enable,
            params.level,
            params.match_any_keyword,
            params.match_all_keyword,
            params.enable_property,
            None,
        )
    };
    check_win32_context(status, "EnableTraceEx")
}

impl Drop for EventSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop_in_place() {
            log::warn!("failed to stop trace session: {}", e);
        }
    }
}

impl fmt::Debug for EventSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSession")
            .field("handle", &self.handle.Value)
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS};

    /// Set to fail session tests instead of skipping them without admin rights.
    const REQUIRE_ETW_VAR: &str = "RAII_WINDOWS_REQUIRE_ETW";

    /// Starts a session for a test.
    ///
    /// A session of the same name left over from an aborted run is stopped
    /// first. Returns None, with a note on stderr, when the test runs without
    /// the rights to start sessions and `RAII_WINDOWS_REQUIRE_ETW` is unset.
    pub(crate) fn try_start(name: &str) -> Option<EventSession> {
        try_start_with(name, SessionProperties::new())
    }

    pub(crate) fn try_start_with(name: &str, properties: SessionProperties) -> Option<EventSession> {
        let properties = properties.flush_timer(1);
        let result = match EventSession::start(name, &properties) {
            Err(Error::Win32(e)) if e.code() == ERROR_ALREADY_EXISTS.0 => {
                stop_leftover(name);
                EventSession::start(name, &properties)
            }
            result => result,
        };
        match result {
            Ok(session) => Some(session),
            Err(Error::Win32(e)) if e.code() == ERROR_ACCESS_DENIED.0 => {
                if std::env::var_os(REQUIRE_ETW_VAR).is_some() {
                    panic!("{} is set but starting {:?} was denied", REQUIRE_ETW_VAR, name);
                }
                eprintln!(
                    "skipping ETW test on {:?}: starting a trace session needs administrator rights",
                    name
                );
                None
            }
            Err(e) => panic!("StartTraceW failed: {}", e),
        }
    }

    /// Stops the session `name` by name, ignoring failures.
    fn stop_leftover(name: &str) {
        let wide_name = WideString::new(name);
        let mut buffer = SessionProperties::new().to_buffer(name);
        // SAFETY: The buffer has room for the names STOP writes back.
        let status = unsafe {
            ControlTraceW(
                CONTROLTRACE_HANDLE::default(),
                wide_name.as_pcwstr(),
                buffer.as_mut_ptr::<EVENT_TRACE_PROPERTIES>(),
                EVENT_TRACE_CONTROL_STOP,
            )
        };
        if status.is_err() {
            eprintln!("could not stop leftover session {:?}: {:?}", name, status);
        }
    }

    #[test]
    fn test_properties_layout() {
        let buffer = SessionProperties::new()
            .buffer_size(32)
            .buffers(2, 8)
            .to_buffer("raii-windows layout");
        // SAFETY: Test-only view of the header.
        let props = unsafe { &*buffer.as_ptr::<EVENT_TRACE_PROPERTIES>() };
        let header = std::mem::size_of::<EVENT_TRACE_PROPERTIES>();

        assert_eq!(props.Wnode.BufferSize as usize, buffer.len());
        assert_eq!(props.Wnode.Flags, WNODE_FLAG_TRACED_GUID);
        assert_eq!(props.Wnode.ClientContext, 1);
        assert_eq!(props.LogFileMode, EVENT_TRACE_REAL_TIME_MODE);
        assert_eq!(props.LoggerNameOffset as usize, header);
        assert_eq!(props.LogFileNameOffset, 0);
        assert_eq!((props.BufferSize, props.MinimumBuffers, props.MaximumBuffers), (32, 2, 8));
        assert_eq!(
            buffer.wide_str_at(header).as_deref(),
            Some("raii-windows layout")
        );
    }

    #[test]
    fn test_properties_with_log_file() {
        let buffer = SessionProperties::new()
            .log_file(r"C:\Temp\trace.etl")
            .log_file_mode(0x1)
            .to_buffer("with-file");
        // SAFETY: Test-only view of the header.
        let props = unsafe { &*buffer.as_ptr::<EVENT_TRACE_PROPERTIES>() };
        let offset = props.LogFileNameOffset as usize;
        assert!(offset > props.LoggerNameOffset as usize);
        assert_eq!(buffer.wide_str_at(offset).as_deref(), Some(r"C:\Temp\trace.etl"));
        assert_eq!(props.LogFileMode, 0x1);
    }

    #[test]
    fn test_enable_parameters() {
        let params = EnableParameters::new(3).match_any(0xF0).match_all(0x10).property(1);
        assert_eq!(params.level, 3);
        assert_eq!(params.match_any_keyword, 0xF0);
        assert_eq!(params.match_all_keyword, 0x10);
        assert_eq!(params.enable_property, 1);
        assert_eq!(EnableParameters::default().level, 5);
    }

    #[test]
    fn test_session_lifecycle() {
        let Some(mut session) = try_start("raii-windows-session-test") else {
            return;
        };
        assert_eq!(session.name(), "raii-windows-session-test");
        assert!(session.log_file().is_none());

        let provider = GUID::from_u128(0x3b8e0c4a_91d2_4f57_a6e1_5c0d7b2f9e13);
        session
            .enable_trace(&provider, &EnableParameters::default())
            .unwrap();
        session.flush().unwrap();
        let stats = session.query().unwrap();
        assert!(stats.number_of_buffers > 0);
        session.disable_trace(&provider).unwrap();
        session.stop().unwrap();
    }

    #[test]
    fn test_start_replaces_leftover_session() {
        let name = "raii-windows-leftover-test";
        let Some(leftover) = try_start(name) else {
            return;
        };
        // Simulates a run that died without stopping its session.
        std::mem::forget(leftover);

        let session = try_start(name).expect("leftover session was not stopped");
        assert_eq!(session.name(), name);
        session.stop().unwrap();
    }

    #[test]
    fn test_session_guid_is_reported() {
        let guid = GUID::from_u128(0x0d4c_2b1a_9f8e_4d7c_a6b5_c4d3e2f1a0b9);
        let Some(session) = try_start_with("raii-windows-guid-test", SessionProperties::new().guid(guid))
        else {
            return;
        };
        assert_eq!(session.guid(), guid);
        session.stop().unwrap();
    }
}
