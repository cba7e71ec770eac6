//! Event providers: registration and event writing.

use super::data::{EventData, EventDescriptor, MAX_EVENT_DATA_DESCRIPTORS};
use crate::error::{check_win32_context, Error, Result};
use crate::guid::GuidDisplay;
use crate::handle::{HandleKind, Owned};
use crate::string::WideString;
use std::ffi::c_void;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use windows::core::GUID;
use windows::Win32::System::Diagnostics::Etw::{
    EventEnabled, EventProviderEnabled, EventRegister, EventUnregister, EventWrite,
    EventWriteString, ENABLECALLBACK_ENABLED_STATE, EVENT_FILTER_DESCRIPTOR, REGHANDLE,
};

/// Provider registrations, released with `EventUnregister`.
#[derive(Debug)]
pub enum ProviderRegistration {}

impl HandleKind for ProviderRegistration {
    type Raw = REGHANDLE;
    const INVALID: REGHANDLE = REGHANDLE(0);
    const NAME: &'static str = "event provider registration";

    #[inline]
    fn bits(raw: REGHANDLE) -> u64 {
        raw.0 as u64
    }

    unsafe fn close(raw: REGHANDLE) -> Result<()> {
        check_win32_context(EventUnregister(raw), "EventUnregister")
    }
}

/// What a controller asked the provider to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// The provider was disabled.
    Disable,
    /// The provider was enabled or its settings changed.
    Enable,
    /// A session asked for the provider's current state.
    CaptureState,
    /// A code this crate does not know about.
    Other(u32),
}

impl From<ENABLECALLBACK_ENABLED_STATE> for ControlCode {
    fn from(state: ENABLECALLBACK_ENABLED_STATE) -> Self {
        match state.0 {
            0 => Self::Disable,
            1 => Self::Enable,
            2 => Self::CaptureState,
            other => Self::Other(other),
        }
    }
}

/// Arguments of an enable callback.
#[derive(Debug, Clone, Copy)]
pub struct EnableInfo {
    /// The session that changed the provider's state, if known.
    pub source_id: Option<GUID>,
    /// The requested action.
    pub control: ControlCode,
    /// Highest level the session wants to receive.
    pub level: u8,
    /// Keywords of which at least one must be set.
    pub match_any_keyword: u64,
    /// Keywords that must all be set.
    pub match_all_keyword: u64,
}

type EnableCallback = Box<dyn Fn(&EnableInfo) + Send + Sync>;

/// A registered event provider; unregistered when dropped.
pub struct EventProvider {
    // Declared before `callback` so the registration ends before the
    // callback context is freed.
    handle: Owned<ProviderRegistration>,
    callback: Option<Box<EnableCallback>>,
}

impl EventProvider {
    /// Registers the provider `id`.
    pub fn register(id: &GUID) -> Result<Self> {
        let mut handle = Owned::<ProviderRegistration>::default();
        // SAFETY: `id` is valid for the call and the wrapper is empty.
        let status = unsafe { EventRegister(id, None, None, handle.as_out_ptr()) };
        check_win32_context(status, "EventRegister")?;
        log::debug!("registered event provider {}", GuidDisplay(id));
        Ok(Self {
            handle,
            callback: None,
        })
    }

    /// Registers the provider `id` and calls `callback` whenever a session
    /// enables, disables or queries it.
    ///
    /// The callback may run on any thread, including during registration.
    pub fn register_with_callback<F>(id: &GUID, callback: F) -> Result<Self>
    where
        F: Fn(&EnableInfo) + Send + Sync + 'static,
    {
        let callback: Box<EnableCallback> = Box::new(Box::new(callback));
        let context = &*callback as *const EnableCallback as *const c_void;

        let mut handle = Owned::<ProviderRegistration>::default();
        // SAFETY: The context points into a heap allocation that outlives the
        // registration, because `handle` is dropped before `callback`.
        let status = unsafe {
            EventRegister(
                id,
                Some(Some(enable_callback)),
                Some(context),
                handle.as_out_ptr(),
            )
        };
        check_win32_context(status, "EventRegister")?;
        log::debug!(
            "registered event provider {} with enable callback",
            GuidDisplay(id)
        );
        Ok(Self {
            handle,
            callback: Some(callback),
        })
    }

    /// Writes an event made of `data` fields.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::LimitExceeded`] if more than
    /// [`MAX_EVENT_DATA_DESCRIPTORS`] fields are given, or with the status
    /// `EventWrite` returned.
    pub fn write(&self, descriptor: &EventDescriptor, data: &[EventData<'_>]) -> Result<()> {
        if data.len() > MAX_EVENT_DATA_DESCRIPTORS {
            return Err(Error::limit_exceeded(
                "event data descriptors",
                data.len(),
                MAX_EVENT_DATA_DESCRIPTORS,
            ));
        }
        let raw = EventData::as_raw_slice(data);
        let user_data = if raw.is_empty() { None } else { Some(raw) };

        // SAFETY: Every descriptor borrows memory that lives for this call.
        let status = unsafe { EventWrite(self.as_raw(), descriptor.as_raw(), user_data) };
        check_win32_context(status, "EventWrite")
    }

    /// Writes a string-only event.
    pub fn write_string(&self, level: u8, keyword: u64, message: &str) -> Result<()> {
        let message = WideString::new(message);
        // SAFETY: `message` is null-terminated and outlives the call.
        let status =
            unsafe { EventWriteString(self.as_raw(), level, keyword, message.as_pcwstr()) };
        check_win32_context(status, "EventWriteString")
    }

    /// Returns true if any session listens for events of this level and
    /// keyword.
    pub fn is_enabled(&self, level: u8, keyword: u64) -> bool {
        // SAFETY: The registration handle is owned by us.
        unsafe { EventProviderEnabled(self.as_raw(), level, keyword) }
    }

    /// Returns true if any session listens for `descriptor`.
    pub fn is_event_enabled(&self, descriptor: &EventDescriptor) -> bool {
        // SAFETY: The registration handle is owned by us.
        unsafe { EventEnabled(self.as_raw(), descriptor.as_raw()) }
    }

    /// Returns the raw registration handle.
    #[inline]
    pub fn as_raw(&self) -> REGHANDLE {
        self.handle.as_raw()
    }
}

impl fmt::Debug for EventProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventProvider")
            .field("handle", &self.handle)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

unsafe extern "system" fn enable_callback(
    source_id: *const GUID,
    is_enabled: ENABLECALLBACK_ENABLED_STATE,
    level: u8,
    match_any_keyword: u64,
    match_all_keyword: u64,
    _filter_data: *const EVENT_FILTER_DESCRIPTOR,
    context: *mut c_void,
) {
    if context.is_null() {
        return;
    }
    let callback = &*(context as *const EnableCallback);
    let info = EnableInfo {
        source_id: source_id.as_ref().copied(),
        control: is_enabled.into(),
        level,
        match_any_keyword,
        match_all_keyword,
    };
    if catch_unwind(AssertUnwindSafe(|| callback(&info))).is_err() {
        log::error!("event provider enable callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etw::data::level;

    const TEST_PROVIDER: GUID = GUID::from_u128(0x3b8e0c4a_91d2_4f57_a6e1_5c0d7b2f9e13);

    #[test]
    fn test_control_code() {
        assert_eq!(
            ControlCode::from(ENABLECALLBACK_ENABLED_STATE(0)),
            ControlCode::Disable
        );
        assert_eq!(
            ControlCode::from(ENABLECALLBACK_ENABLED_STATE(1)),
            ControlCode::Enable
        );
        assert_eq!(
            ControlCode::from(ENABLECALLBACK_ENABLED_STATE(2)),
            ControlCode::CaptureState
        );
        assert_eq!(
            ControlCode::from(ENABLECALLBACK_ENABLED_STATE(9)),
            ControlCode::Other(9)
        );
    }

    #[test]
    fn test_register_and_write() {
        let provider = EventProvider::register(&TEST_PROVIDER).unwrap();
        assert_ne!(provider.as_raw(), REGHANDLE(0));

        // Writing without listeners succeeds.
        let value = 42u32;
        let desc = EventDescriptor::new(1, level::INFORMATION);
        provider.write(&desc, &[EventData::from(&value)]).unwrap();
        provider.write(&desc, &[]).unwrap();
        provider
            .write_string(level::VERBOSE, 0, "hello from a test")
            .unwrap();
        assert!(!provider.is_enabled(level::VERBOSE, 0x1234_5678));
        assert!(!provider.is_event_enabled(&desc));
    }

    #[test]
    fn test_too_many_fields() {
        let provider = EventProvider::register(&TEST_PROVIDER).unwrap();
        let value = 0u8;
        let fields = vec![EventData::from(&value); MAX_EVENT_DATA_DESCRIPTORS + 1];
        let err = provider
            .write(&EventDescriptor::new(2, level::INFORMATION), &fields)
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { len: 129, max: 128, .. }));
    }

    #[test]
    fn test_register_with_callback() {
        let provider = EventProvider::register_with_callback(&TEST_PROVIDER, |_info| {}).unwrap();
        assert!(format!("{:?}", provider).contains("callback: true"));
    }
}
