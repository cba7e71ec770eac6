//! # RAII Windows
//!
//! Ownership wrappers for Windows resources.
//!
//! Every resource this crate hands out is released exactly once, when its
//! owner is dropped, and release failures are logged instead of panicking:
//!
//! - **Error Handling**: one error type for HRESULT and Win32 status codes,
//!   with readable system messages
//! - **Handle Management**: a generic owner for every kind of Windows handle
//! - **String Utilities**: UTF-16 strings and codepage conversion
//! - **Memory**: `LocalAlloc`/`GlobalAlloc` blocks and buffers that are wiped
//!   before they are released
//! - **Modules**: DLL loading and string resources
//! - **COM**: apartment guards, interface pointers, `BSTR` and `VARIANT`
//! - **ETW**: providers, sessions, consumers and TDH decoding
//! - **GUIDs**: registry-style text formatting and parsing
//!
//! ## Quick Start
//!
//! ```no_run
//! use raii_windows::prelude::*;
//!
//! // Convert between UTF-16 and a codepage.
//! let wide = to_wide("Grüße");
//! let bytes = wide_to_multi_byte(CodePage::UTF8, &wide[..wide.len() - 1])?;
//! assert_eq!(bytes, "Grüße".as_bytes());
//!
//! // COM values own their content.
//! let _com = ComGuard::new()?;
//! let value = Variant::from("text");
//! assert_eq!(value.to_string_lossy().as_deref(), Some("text"));
//!
//! # Ok::<(), raii_windows::Error>(())
//! ```
//!
//! ## Handles
//!
//! ```no_run
//! use raii_windows::handle::OwnedHandle;
//! use windows::Win32::System::Threading::CreateEventW;
//!
//! {
//!     let event = OwnedHandle::new(unsafe { CreateEventW(None, true, false, None)? })?;
//!     // Use the event...
//! } // Closed here
//! # Ok::<(), raii_windows::Error>(())
//! ```
//!
//! ## Tracing
//!
//! ```no_run
//! use raii_windows::etw::{level, EventData, EventDescriptor, EventProvider};
//! use windows::core::GUID;
//!
//! const PROVIDER: GUID = GUID::from_u128(0x8f3c2b1a_5d4e_4f60_9a7b_0c1d2e3f4a5b);
//!
//! let provider = EventProvider::register(&PROVIDER)?;
//! if provider.is_enabled(level::INFORMATION, 0) {
//!     provider.write(
//!         &EventDescriptor::new(1, level::INFORMATION),
//!         &[EventData::try_from(c"started")?],
//!     )?;
//! }
//! # Ok::<(), raii_windows::Error>(())
//! ```

#![cfg(windows)]
#![warn(missing_docs)]

// Core modules
pub mod error;
pub mod handle;
pub mod string;

// Memory and modules
pub mod guid;
pub mod mem;
pub mod module;
pub mod sanitize;

// Subsystems
pub mod com;
pub mod etw;

pub use error::{Error, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::com::{Bstr, ComGuard, ComObject, Variant, VariantValue};
    pub use crate::error::{Error, Result, ResultExt, Win32Error};
    pub use crate::etw::{EventData, EventDescriptor, EventProvider, EventSession};
    pub use crate::guid::{guid_to_string, parse_guid};
    pub use crate::handle::{BorrowedHandle, HandleExt, Owned, OwnedFileHandle, OwnedHandle};
    pub use crate::mem::{OwnedGlobal, OwnedLocal};
    pub use crate::module::Library;
    pub use crate::sanitize::{SanitizingString, SanitizingVec};
    pub use crate::string::{
        from_wide, multi_byte_to_wide, to_wide, wide_to_multi_byte, CodePage, WideString,
    };
}
