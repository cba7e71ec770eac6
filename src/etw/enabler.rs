//! Scoped provider enabling.

use super::session::{enable_trace_ex, EnableParameters, EventSession};
use crate::error::Result;
use crate::guid::GuidDisplay;
use std::marker::PhantomData;
use windows::core::GUID;
use windows::Win32::System::Diagnostics::Etw::CONTROLTRACE_HANDLE;

/// Enables a provider on a session for as long as it lives.
///
/// A `TraceEnabler` only exists once enabling succeeded, so dropping it always
/// disables the provider again.
///
/// ```no_run
/// use raii_windows::etw::{EnableParameters, EventSession, SessionProperties, TraceEnabler};
/// use windows::core::GUID;
///
/// const PROVIDER: GUID = GUID::from_u128(0x8f3c2b1a_5d4e_4f60_9a7b_0c1d2e3f4a5b);
///
/// let session = EventSession::start("my-session", &SessionProperties::new())?;
/// {
///     let _enabled = TraceEnabler::new(&session, &PROVIDER, EnableParameters::new(4))?;
///     // Events of PROVIDER are delivered to the session here.
/// }
/// # Ok::<(), raii_windows::Error>(())
/// ```
#[derive(Debug)]
#[must_use = "the provider is disabled again when the enabler is dropped"]
pub struct TraceEnabler<'a> {
    session: CONTROLTRACE_HANDLE,
    source_id: Option<GUID>,
    provider: GUID,
    params: EnableParameters,
    _session: PhantomData<&'a EventSession>,
}

impl<'a> TraceEnabler<'a> {
    /// Enables `provider` on `session`.
    pub fn new(
        session: &'a EventSession,
        provider: &GUID,
        params: EnableParameters,
    ) -> Result<Self> {
        let source_id = session.guid();
        // SAFETY: The borrow keeps the session running for our lifetime.
        unsafe { Self::from_handle(session.handle(), Some(&source_id), provider, params) }
    }

    /// Enables `provider` on a session identified by its raw handle.
    ///
    /// `source_id` is reported to the provider's enable callback; pass the
    /// session GUID.
    ///
    /// # Safety
    ///
    /// The session must keep running until the enabler is dropped.
    pub unsafe fn from_handle(
        session: CONTROLTRACE_HANDLE,
        source_id: Option<&GUID>,
        provider: &GUID,
        params: EnableParameters,
    ) -> Result<Self> {
        enable_trace_ex(session, source_id, provider, 1, &params)?;
        log::debug!("enabled provider {} on session {}", GuidDisplay(provider), session.Value);
        Ok(Self {
            session,
            source_id: source_id.copied(),
            provider: *provider,
            params,
            _session: PhantomData,
        })
    }

    /// Returns the enabled provider.
    pub fn provider(&self) -> &GUID {
        &self.provider
    }

    /// Returns the parameters the provider was enabled with.
    pub fn params(&self) -> &EnableParameters {
        &self.params
    }
}

impl Drop for TraceEnabler<'_> {
    fn drop(&mut self) {
        if let Err(e) = enable_trace_ex(
            self.session,
            self.source_id.as_ref(),
            &self.provider,
            0,
            &self.params,
        ) {
            log::warn!(
                "failed to disable provider {}: {}",
                GuidDisplay(&self.provider),
                e
            );
        }
    }
}
