//! Error handling utilities for Windows API calls.
//!
//! Provides ergonomic error types that wrap Windows error codes and convert them
//! into idiomatic Rust `Result` types.
//!
//! Two families of Windows APIs are covered:
//!
//! - APIs surfaced by the `windows` crate as `windows::core::Result`, which map to
//!   [`Error::Windows`].
//! - APIs that return a bare `ULONG`/`WIN32_ERROR` status (ETW, TDH, ...), which map
//!   to [`Error::Win32`] through [`check_win32`].

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use windows::core::Error as WinError;
use windows::Win32::Foundation::{GetLastError, SetLastError, WIN32_ERROR};
use windows::Win32::System::Diagnostics::Debug::{
    FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
};

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// A Windows API error with its error code.
    #[error("Windows API error: {0}")]
    Windows(#[from] WinError),

    /// A Win32 status code returned directly by an API.
    #[error("{0}")]
    Win32(#[from] Win32Error),

    /// A null pointer was encountered where a valid pointer was expected.
    #[error("Null pointer error: {context}")]
    NullPointer {
        /// Description of where the null pointer was encountered.
        context: &'static str,
    },

    /// An invalid handle was provided or returned.
    #[error("Invalid handle: {context}")]
    InvalidHandle {
        /// Description of the invalid handle context.
        context: &'static str,
    },

    /// A string conversion error occurred.
    #[error("String conversion error: {0}")]
    StringConversion(String),

    /// A buffer was too small for the requested operation.
    #[error("Buffer too small: needed {needed}, got {actual}")]
    BufferTooSmall {
        /// The required buffer size.
        needed: usize,
        /// The actual buffer size provided.
        actual: usize,
    },

    /// A value did not hold the requested type.
    #[error("Type mismatch: expected {expected}, found VARTYPE {actual:#06x}")]
    TypeMismatch {
        /// Name of the requested type.
        expected: &'static str,
        /// The VARTYPE actually held.
        actual: u16,
    },

    /// A count or length exceeded what the underlying API accepts.
    #[error("{what} limit exceeded: {len} (maximum {max})")]
    LimitExceeded {
        /// What was being counted.
        what: &'static str,
        /// The requested count or length.
        len: usize,
        /// The largest accepted value.
        max: usize,
    },

    /// A custom error with a message.
    #[error("{0}")]
    Custom(String),
}

/// A specialized `Result` type for Windows API operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new null pointer error with the given context.
    pub fn null_pointer(context: &'static str) -> Self {
        Error::NullPointer { context }
    }

    /// Creates a new invalid handle error with the given context.
    pub fn invalid_handle(context: &'static str) -> Self {
        Error::InvalidHandle { context }
    }

    /// Creates a new string conversion error.
    pub fn string_conversion(msg: impl Into<String>) -> Self {
        Error::StringConversion(msg.into())
    }

    /// Creates a new buffer too small error.
    pub fn buffer_too_small(needed: usize, actual: usize) -> Self {
        Error::BufferTooSmall { needed, actual }
    }

    /// Creates a new type mismatch error.
    pub fn type_mismatch(expected: &'static str, actual: u16) -> Self {
        Error::TypeMismatch { expected, actual }
    }

    /// Creates a new limit exceeded error.
    pub fn limit_exceeded(what: &'static str, len: usize, max: usize) -> Self {
        Error::LimitExceeded { what, len, max }
    }

    /// Creates a custom error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Error::Custom(msg.into())
    }

    /// Returns the Windows error code if this is a Windows error.
    ///
    /// For [`Error::Windows`] this is the HRESULT, for [`Error::Win32`] the
    /// Win32 status code.
    pub fn win32_error_code(&self) -> Option<u32> {
        match self {
            Error::Windows(e) => Some(e.code().0 as u32),
            Error::Win32(e) => Some(e.code()),
            _ => None,
        }
    }
}

/// A Win32 status code with an optional description of the failing operation.
///
/// Displays as the system message for the code, prefixed with the context when
/// one is set (`"StartTraceW: Access is denied."`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Win32Error {
    code: u32,
    context: Option<Cow<'static, str>>,
}

impl Win32Error {
    /// Wraps a Win32 status code.
    pub fn new(code: u32) -> Self {
        Self {
            code,
            context: None,
        }
    }

    /// Wraps a Win32 status code together with a description of the failing call.
    pub fn with_context(code: u32, context: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            context: Some(context.into()),
        }
    }

    /// Captures the calling thread's last-error value.
    pub fn last() -> Self {
        Self::new(last_error_code())
    }

    /// Captures the calling thread's last-error value with a context.
    pub fn last_with_context(context: impl Into<Cow<'static, str>>) -> Self {
        Self::with_context(last_error_code(), context)
    }

    /// Returns the numeric Win32 status code.
    #[inline]
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Returns the context, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns the system message for this code in the default language.
    pub fn message(&self) -> String {
        system_message(self.code, 0)
    }
}

impl fmt::Display for Win32Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {}", context, self.message()),
            None => f.write_str(&self.message()),
        }
    }
}

impl std::error::Error for Win32Error {}

/// Returns a user-readable message for a Win32 status code.
///
/// The stock system messages end in CRLF; all trailing white space is trimmed.
/// When the system has no message for the code, `"Error 0x{code:X}"` is returned
/// for codes at or above `0x10000` and `"Error {code}"` otherwise.
///
/// The calling thread's last-error value is preserved.
pub fn system_message(code: u32, language_id: u32) -> String {
    // SAFETY: GetLastError only reads thread-local state.
    let saved = unsafe { GetLastError() };

    // SAFETY: No source and no insert arguments are passed with FROM_SYSTEM.
    let message = unsafe {
        crate::string::format_message_raw(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            code,
            language_id,
            None,
        )
    }
    .map(|text| text.trim_end().to_owned())
    .unwrap_or_default();

    // SAFETY: SetLastError only writes thread-local state.
    unsafe { SetLastError(saved) };

    if message.is_empty() {
        fallback_message(code)
    } else {
        message
    }
}

/// Formats the message used for codes the system has no text for.
pub(crate) fn fallback_message(code: u32) -> String {
    if code >= 0x10000 {
        format!("Error 0x{:X}", code)
    } else {
        format!("Error {}", code)
    }
}

/// Extension trait for converting Windows `Result` types.
pub trait ResultExt<T> {
    /// Converts a Windows result to our Result type.
    fn to_result(self) -> Result<T>;
}

impl<T> ResultExt<T> for windows::core::Result<T> {
    fn to_result(self) -> Result<T> {
        self.map_err(Error::from)
    }
}

/// A bare Win32 status as returned by APIs that do not set the last error.
///
/// Implemented for both `u32` and [`WIN32_ERROR`], the two shapes the `windows`
/// crate uses for such return values.
pub trait Win32Status {
    /// Returns the numeric status code.
    fn status(self) -> u32;
}

impl Win32Status for u32 {
    #[inline]
    fn status(self) -> u32 {
        self
    }
}

impl Win32Status for WIN32_ERROR {
    #[inline]
    fn status(self) -> u32 {
        self.0
    }
}

/// Converts a returned Win32 status into a `Result`.
#[inline]
pub fn check_win32(status: impl Win32Status) -> Result<()> {
    match status.status() {
        0 => Ok(()),
        code => Err(Error::Win32(Win32Error::new(code))),
    }
}

/// Converts a returned Win32 status into a `Result`, naming the failing call.
#[inline]
pub fn check_win32_context(status: impl Win32Status, context: &'static str) -> Result<()> {
    match status.status() {
        0 => Ok(()),
        code => Err(Error::Win32(Win32Error::with_context(code, context))),
    }
}

/// Returns the calling thread's last-error value.
#[inline]
pub fn last_error_code() -> u32 {
    // SAFETY: GetLastError only reads thread-local state.
    unsafe { GetLastError() }.0
}

/// Gets the last Windows error as our Error type.
pub fn last_error() -> Error {
    Error::Windows(WinError::from_win32())
}

/// Checks if the last error indicates success and returns Ok(()), otherwise returns the error.
pub fn check_last_error() -> Result<()> {
    let err = WinError::from_win32();
    if err.code().is_ok() {
        Ok(())
    } else {
        Err(Error::Windows(err))
    }
}
