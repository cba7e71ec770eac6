//! Trace consumers.

use super::session::EventSession;
use crate::error::{check_win32_context, Error, Result, Win32Status};
use crate::handle::{HandleKind, Owned};
use crate::string::{path_to_wide, to_wide};
use std::ffi::c_void;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Mutex;
use windows::core::PWSTR;
use windows::Win32::System::Diagnostics::Etw::{
    CloseTrace, OpenTraceW, ProcessTrace, EVENT_RECORD, EVENT_TRACE_LOGFILEW,
    PROCESSTRACE_HANDLE, PROCESS_TRACE_MODE_EVENT_RECORD, PROCESS_TRACE_MODE_REAL_TIME,
};

const ERROR_CTX_CLOSE_PENDING: u32 = 7007;

#[cfg(target_pointer_width = "64")]
const INVALID_TRACE: u64 = u64::MAX;
#[cfg(not(target_pointer_width = "64"))]
const INVALID_TRACE: u64 = u32::MAX as u64;

/// Consumer handles, released with `CloseTrace`.
#[derive(Debug)]
pub enum ProcessTraceKind {}

impl HandleKind for ProcessTraceKind {
    type Raw = PROCESSTRACE_HANDLE;
    const INVALID: PROCESSTRACE_HANDLE = PROCESSTRACE_HANDLE {
        Value: INVALID_TRACE,
    };
    const NAME: &'static str = "trace consumer handle";

    #[inline]
    fn bits(raw: PROCESSTRACE_HANDLE) -> u64 {
        raw.Value
    }

    unsafe fn close(raw: PROCESSTRACE_HANDLE) -> Result<()> {
        // Closing while ProcessTrace still runs succeeds once processing ends.
        match CloseTrace(raw).status() {
            ERROR_CTX_CLOSE_PENDING => Ok(()),
            status => check_win32_context(status, "CloseTrace"),
        }
    }
}

type RecordCallback = Mutex<Box<dyn FnMut(&EVENT_RECORD) + Send>>;

/// An open trace that delivers events to a callback.
///
/// Events only flow while [`EventTrace::process`] runs.
pub struct EventTrace {
    handle: Owned<ProcessTraceKind>,
    _callback: Box<RecordCallback>,
}

impl EventTrace {
    /// Opens the real-time session `name`.
    pub fn open_real_time<F>(name: &str, callback: F) -> Result<Self>
    where
        F: FnMut(&EVENT_RECORD) + Send + 'static,
    {
        let mut name = to_wide(name);
        let mut logfile = EVENT_TRACE_LOGFILEW {
            LoggerName: PWSTR(name.as_mut_ptr()),
            ..Default::default()
        };
        logfile.Anonymous1.ProcessTraceMode =
            PROCESS_TRACE_MODE_REAL_TIME | PROCESS_TRACE_MODE_EVENT_RECORD;
        Self::open(logfile, Box::new(callback))
    }

    /// Opens a running session for real-time consumption.
    pub fn open_session<F>(session: &EventSession, callback: F) -> Result<Self>
    where
        F: FnMut(&EVENT_RECORD) + Send + 'static,
    {
        Self::open_real_time(&session.name(), callback)
    }

    /// Opens the log file at `path`.
    pub fn open_file<F>(path: impl AsRef<Path>, callback: F) -> Result<Self>
    where
        F: FnMut(&EVENT_RECORD) + Send + 'static,
    {
        let mut path = path_to_wide(path.as_ref());
        let mut logfile = EVENT_TRACE_LOGFILEW {
            LogFileName: PWSTR(path.as_mut_ptr()),
            ..Default::default()
        };
        logfile.Anonymous1.ProcessTraceMode = PROCESS_TRACE_MODE_EVENT_RECORD;
        Self::open(logfile, Box::new(callback))
    }

    fn open(
        mut logfile: EVENT_TRACE_LOGFILEW,
        callback: Box<dyn FnMut(&EVENT_RECORD) + Send>,
    ) -> Result<Self> {
        let callback: Box<RecordCallback> = Box::new(Mutex::new(callback));
        logfile.Anonymous2.EventRecordCallback = Some(event_record_callback);
        logfile.Context = &*callback as *const RecordCallback as *mut c_void;

        // SAFETY: The names in `logfile` outlive the call, and the context
        // outlives the handle because `handle` is dropped first.
        let raw = unsafe { OpenTraceW(&mut logfile) };
        if !ProcessTraceKind::is_valid(raw) {
            return Err(crate::error::last_error());
        }
        log::debug!("opened trace consumer {:#x}", raw.Value);
        Ok(Self {
            handle: Owned::new(raw)?,
            _callback: callback,
        })
    }

    /// Delivers events from `traces` to their callbacks until every trace
    /// ends.
    ///
    /// Real-time traces end when their session stops; file traces end at
    /// the end of the file.
    pub fn process(traces: &[&EventTrace]) -> Result<()> {
        if traces.is_empty() {
            return Err(Error::custom("no traces to process"));
        }
        let handles: Vec<PROCESSTRACE_HANDLE> = traces.iter().map(|t| t.as_raw()).collect();
        // SAFETY: Every handle is open and owned by a borrowed trace.
        let status = unsafe { ProcessTrace(&handles, None, None) };
        check_win32_context(status, "ProcessTrace")
    }

    /// Returns the raw consumer handle.
    #[inline]
    pub fn as_raw(&self) -> PROCESSTRACE_HANDLE {
        self.handle.as_raw()
    }

    /// Closes the trace and reports failure.
    ///
    /// [`EventTrace::process`] borrows its traces, so this runs only after
    /// processing returned. Stop the session to end a real-time `process` call.
    pub fn close(mut self) -> Result<()> {
        std::mem::take(&mut self.handle).close()
    }
}

impl fmt::Debug for EventTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTrace")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

unsafe extern "system" fn event_record_callback(record: *mut EVENT_RECORD) {
    let Some(record) = record.as_ref() else {
        return;
    };
    if record.UserContext.is_null() {
        return;
    }
    let callback = &*(record.UserContext as *const RecordCallback);
    let mut callback = callback.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if catch_unwind(AssertUnwindSafe(|| (*callback)(record))).is_err() {
        log::error!("event record callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etw::session::tests::try_start;
    use crate::etw::{level, EnableParameters, EventDescriptor, EventProvider, TraceEnabler};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use windows::core::GUID;

    #[test]
    fn test_invalid_handle_constant() {
        assert!(!ProcessTraceKind::is_valid(ProcessTraceKind::INVALID));
        assert!(ProcessTraceKind::is_valid(PROCESSTRACE_HANDLE { Value: 1 }));
    }

    #[test]
    fn test_open_missing_file_fails() {
        let result = EventTrace::open_file(r"C:\definitely\missing\trace-4711.etl", |_| {});
        assert!(result.is_err());
    }

    #[test]
    fn test_process_requires_traces() {
        assert!(EventTrace::process(&[]).is_err());
    }

    #[test]
    fn test_real_time_round_trip() {
        let Some(session) = try_start("raii-windows-consumer-test") else {
            return;
        };
        let provider_id = GUID::from_u128(0x7d2c_41e8_90ab_4cde_b1f2_3a4b5c6d7e8f);
        let provider = EventProvider::register(&provider_id).unwrap();
        let enabled =
            TraceEnabler::new(&session, &provider_id, EnableParameters::default()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let trace = EventTrace::open_session(&session, move |record| {
            if record.EventHeader.ProviderId == provider_id {
                sink.lock().unwrap().push(record.EventHeader.EventDescriptor.Id);
            }
        })
        .unwrap();
        let consumer = std::thread::spawn(move || EventTrace::process(&[&trace]));

        // Keep writing until the consumer has attached and delivered something.
        let desc = EventDescriptor::new(77, level::INFORMATION);
        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            provider.write(&desc, &[]).unwrap();
            std::thread::sleep(Duration::from_millis(100));
        }
        drop(enabled);
        session.stop().unwrap();

        consumer.join().unwrap().unwrap();
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty(), "no events reached the consumer");
        assert!(seen.iter().all(|&id| id == 77));
    }
}
