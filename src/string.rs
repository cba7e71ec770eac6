//! String conversion utilities for Windows APIs.
//!
//! Windows APIs typically use UTF-16 encoded strings (wide strings), while Rust uses UTF-8.
//! This module provides conversions between these formats, conversions between UTF-16
//! and any Windows code page, and `FormatMessageW` based message formatting.

use crate::error::{last_error_code, Error, Result, Win32Error};
use crate::mem::OwnedLocal;
use crate::sanitize::{secure_zero, Plain, SanitizingVec};
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use windows::core::{PCSTR, PCWSTR, PWSTR};
use windows::Win32::Foundation::{BOOL, ERROR_INSUFFICIENT_BUFFER, HLOCAL};
use windows::Win32::Globalization::{
    MultiByteToWideChar, WideCharToMultiByte, MULTI_BYTE_TO_WIDE_CHAR_FLAGS,
};
use windows::Win32::System::Diagnostics::Debug::{
    FormatMessageW, FORMAT_MESSAGE_ALLOCATE_BUFFER, FORMAT_MESSAGE_ARGUMENT_ARRAY,
    FORMAT_MESSAGE_FROM_STRING, FORMAT_MESSAGE_OPTIONS,
};

/// Size of the stack buffer conversions try before allocating.
const STACK_BUFFER_BYTES: usize = 1024;

/// The first-try conversion buffer. With `wipe` set, the whole array is zeroed
/// when it goes out of scope, on success and error paths alike.
struct StackBuffer<T: Plain, const N: usize> {
    data: [T; N],
    wipe: bool,
}

impl<T: Plain, const N: usize> StackBuffer<T, N> {
    fn new(wipe: bool) -> Self {
        Self {
            data: [T::default(); N],
            wipe,
        }
    }
}

impl<T: Plain, const N: usize> Drop for StackBuffer<T, N> {
    fn drop(&mut self) {
        if self.wipe {
            secure_zero(&mut self.data);
        }
    }
}

/// Converts a Rust string to a null-terminated UTF-16 vector.
///
/// # Example
///
/// ```
/// use raii_windows::string::to_wide;
///
/// let wide = to_wide("Hello");
/// assert_eq!(wide, vec![72, 101, 108, 108, 111, 0]);
/// ```
#[inline]
pub fn to_wide(s: &str) -> Vec<u16> {
    // UTF-16 never needs more units than UTF-8 needs bytes.
    let mut result = Vec::with_capacity(s.len() + 1);
    result.extend(s.encode_utf16());
    result.push(0);
    result
}

/// Converts a path to a null-terminated UTF-16 vector.
#[inline]
pub fn path_to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(Some(0)).collect()
}

/// Converts a UTF-16 slice to a Rust `String`, stopping at the first null if any.
///
/// # Example
///
/// ```
/// use raii_windows::string::{to_wide, from_wide};
///
/// let wide = to_wide("Hello");
/// assert_eq!(from_wide(&wide).unwrap(), "Hello");
/// ```
#[inline]
pub fn from_wide(wide: &[u16]) -> Result<String> {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    from_wide_with_len(wide, len)
}

/// Converts a null-terminated UTF-16 pointer to a Rust `String`.
///
/// # Safety
///
/// The caller must ensure that `ptr` is either null or points to a readable,
/// null-terminated UTF-16 string that is not mutated during the call.
///
/// # Errors
///
/// Returns an error if `ptr` is null or the data is not valid UTF-16.
pub unsafe fn from_wide_ptr(ptr: *const u16) -> Result<String> {
    if ptr.is_null() {
        return Err(Error::null_pointer("from_wide_ptr received null pointer"));
    }

    // SAFETY: Caller guarantees the string is null-terminated.
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }

    from_wide_with_len(std::slice::from_raw_parts(ptr, len), len)
}

/// Converts the first `len` UTF-16 units of a slice to a Rust `String`.
///
/// Unlike `from_wide`, this does not look for a null terminator.
#[inline]
pub fn from_wide_with_len(wide: &[u16], len: usize) -> Result<String> {
    String::from_utf16(&wide[..len.min(wide.len())])
        .map_err(|_| Error::string_conversion("Invalid UTF-16 sequence"))
}

/// An owned, null-terminated UTF-16 string for passing to Windows APIs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WideString {
    buffer: Vec<u16>,
}

impl WideString {
    /// Creates a new `WideString` from a Rust string.
    #[inline]
    pub fn new(s: &str) -> Self {
        Self {
            buffer: to_wide(s),
        }
    }

    /// Creates a new `WideString` from a path.
    #[inline]
    pub fn from_path(path: &Path) -> Self {
        Self {
            buffer: path_to_wide(path),
        }
    }

    /// Creates a `WideString` from UTF-16 units, appending a terminator.
    ///
    /// Embedded nulls are kept as-is.
    pub fn from_units(units: &[u16]) -> Self {
        let mut buffer = Vec::with_capacity(units.len() + 1);
        buffer.extend_from_slice(units);
        buffer.push(0);
        Self { buffer }
    }

    /// Returns a pointer to the null-terminated wide string.
    #[inline]
    pub fn as_ptr(&self) -> *const u16 {
        self.buffer.as_ptr()
    }

    /// Returns the string as a PCWSTR for use with Windows APIs.
    #[inline]
    pub fn as_pcwstr(&self) -> PCWSTR {
        PCWSTR::from_raw(self.buffer.as_ptr())
    }

    /// Returns the length in UTF-16 code units, not including the null terminator.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len().saturating_sub(1)
    }

    /// Returns true if the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts back to a Rust String, replacing invalid sequences.
    #[inline]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(self.as_units())
    }

    /// Returns the buffer including the null terminator.
    #[inline]
    pub fn as_slice(&self) -> &[u16] {
        &self.buffer
    }

    /// Returns the buffer without the null terminator.
    #[inline]
    pub fn as_units(&self) -> &[u16] {
        &self.buffer[..self.len()]
    }
}

impl From<&str> for WideString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<&Path> for WideString {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

impl From<String> for WideString {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// A Windows code page identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodePage(pub u32);

impl CodePage {
    /// The system default ANSI code page.
    pub const ACP: Self = Self(0);
    /// The system default OEM code page.
    pub const OEMCP: Self = Self(1);
    /// The ANSI code page of the calling thread.
    pub const THREAD_ACP: Self = Self(3);
    /// UTF-7.
    pub const UTF7: Self = Self(65000);
    /// UTF-8.
    pub const UTF8: Self = Self(65001);

    /// UTF-7 and UTF-8 reject the default-character arguments of `WideCharToMultiByte`.
    #[inline]
    fn accepts_default_char(self) -> bool {
        self != Self::UTF7 && self != Self::UTF8
    }
}

impl Default for CodePage {
    fn default() -> Self {
        Self::ACP
    }
}

/// Result of [`wide_to_multi_byte_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiByte<B = Vec<u8>> {
    /// The converted bytes, without a terminator.
    pub bytes: B,
    /// True if a character had no representation and the default character was used.
    pub used_default_char: bool,
}

/// Destination buffers for the code page conversions.
pub(crate) trait ConversionBuffer<T: Copy>: Sized {
    fn from_slice(units: &[T]) -> Self;
    fn zeroed(len: usize) -> Self;
    fn as_mut_slice(&mut self) -> &mut [T];
    fn truncate(&mut self, len: usize);
}

impl<T: Copy + Default> ConversionBuffer<T> for Vec<T> {
    fn from_slice(units: &[T]) -> Self {
        units.to_vec()
    }

    fn zeroed(len: usize) -> Self {
        vec![T::default(); len]
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        self
    }

    fn truncate(&mut self, len: usize) {
        Vec::truncate(self, len)
    }
}

impl<T: crate::sanitize::Plain> ConversionBuffer<T> for SanitizingVec<T> {
    fn from_slice(units: &[T]) -> Self {
        SanitizingVec::from_slice(units)
    }

    fn zeroed(len: usize) -> Self {
        SanitizingVec::zeroed(len)
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        SanitizingVec::as_mut_slice(self)
    }

    fn truncate(&mut self, len: usize) {
        SanitizingVec::truncate(self, len)
    }
}

/// Converts UTF-16 text to the given code page.
///
/// Empty input converts to an empty vector without calling the system.
///
/// # Example
///
/// ```
/// use raii_windows::string::{wide_to_multi_byte, CodePage};
///
/// let wide: Vec<u16> = "héllo".encode_utf16().collect();
/// let bytes = wide_to_multi_byte(CodePage::UTF8, &wide).unwrap();
/// assert_eq!(bytes, "héllo".as_bytes());
/// ```
pub fn wide_to_multi_byte(code_page: CodePage, wide: &[u16]) -> Result<Vec<u8>> {
    Ok(wide_to_multi_byte_with(code_page, 0, wide, None)?.bytes)
}

/// Converts UTF-16 text to the given code page with explicit flags and default character.
///
/// `default_char` replaces characters that have no representation in the code
/// page; it must be `None` for UTF-7 and UTF-8. `used_default_char` is only
/// reported for code pages that support it.
pub fn wide_to_multi_byte_with(
    code_page: CodePage,
    flags: u32,
    wide: &[u16],
    default_char: Option<u8>,
) -> Result<MultiByte> {
    convert_to_multi_byte(code_page, flags, wide, default_char, false)
}

/// Like [`wide_to_multi_byte_with`], but every intermediate buffer is wiped and
/// the result lives in a [`SanitizingVec`].
pub fn secure_wide_to_multi_byte(
    code_page: CodePage,
    flags: u32,
    wide: &[u16],
    default_char: Option<u8>,
) -> Result<MultiByte<SanitizingVec<u8>>> {
    convert_to_multi_byte(code_page, flags, wide, default_char, true)
}

fn convert_to_multi_byte<B: ConversionBuffer<u8> + Default>(
    code_page: CodePage,
    flags: u32,
    wide: &[u16],
    default_char: Option<u8>,
    wipe: bool,
) -> Result<MultiByte<B>> {
    if wide.is_empty() {
        return Ok(MultiByte::default());
    }

    let default = default_char.map(|c| [c, 0]);
    let default_ptr = default
        .as_ref()
        .map_or(PCSTR::null(), |d| PCSTR::from_raw(d.as_ptr()));
    let mut used_default = BOOL(0);
    let used_ptr = code_page
        .accepts_default_char()
        .then_some(&mut used_default as *mut BOOL);

    let mut stack = StackBuffer::<u8, STACK_BUFFER_BYTES>::new(wipe);
    // SAFETY: All slices and pointers are valid for the duration of the call.
    let len = unsafe {
        WideCharToMultiByte(
            code_page.0,
            flags,
            wide,
            Some(&mut stack.data),
            default_ptr,
            used_ptr,
        )
    };

    let bytes = if len > 0 {
        B::from_slice(&stack.data[..len as usize])
    } else {
        let code = last_error_code();
        if code != ERROR_INSUFFICIENT_BUFFER.0 {
            return Err(Win32Error::with_context(code, "WideCharToMultiByte").into());
        }

        // SAFETY: A `None` output buffer asks for the required size.
        let needed = unsafe {
            WideCharToMultiByte(code_page.0, flags, wide, None, default_ptr, used_ptr)
        };
        if needed <= 0 {
            return Err(Win32Error::last_with_context("WideCharToMultiByte").into());
        }

        let mut heap = B::zeroed(needed as usize);
        // SAFETY: `heap` holds exactly `needed` bytes.
        let len = unsafe {
            WideCharToMultiByte(
                code_page.0,
                flags,
                wide,
                Some(heap.as_mut_slice()),
                default_ptr,
                used_ptr,
            )
        };
        if len <= 0 {
            return Err(Win32Error::last_with_context("WideCharToMultiByte").into());
        }
        heap.truncate(len as usize);
        heap
    };

    Ok(MultiByte {
        bytes,
        used_default_char: used_default.as_bool(),
    })
}

/// Converts text in the given code page to UTF-16.
///
/// Empty input converts to an empty vector without calling the system.
///
/// # Example
///
/// ```
/// use raii_windows::string::{multi_byte_to_wide, CodePage};
///
/// let wide = multi_byte_to_wide(CodePage::UTF8, "héllo".as_bytes()).unwrap();
/// assert_eq!(String::from_utf16(&wide).unwrap(), "héllo");
/// ```
pub fn multi_byte_to_wide(code_page: CodePage, bytes: &[u8]) -> Result<Vec<u16>> {
    multi_byte_to_wide_with(code_page, 0, bytes)
}

/// Converts text in the given code page to UTF-16 with explicit `MB_*` flags.
pub fn multi_byte_to_wide_with(code_page: CodePage, flags: u32, bytes: &[u8]) -> Result<Vec<u16>> {
    convert_to_wide(code_page, flags, bytes, false)
}

/// Like [`multi_byte_to_wide_with`], but every intermediate buffer is wiped and
/// the result lives in a [`SanitizingVec`].
pub fn secure_multi_byte_to_wide(
    code_page: CodePage,
    flags: u32,
    bytes: &[u8],
) -> Result<SanitizingVec<u16>> {
    convert_to_wide(code_page, flags, bytes, true)
}

fn convert_to_wide<B: ConversionBuffer<u16> + Default>(
    code_page: CodePage,
    flags: u32,
    bytes: &[u8],
    wipe: bool,
) -> Result<B> {
    if bytes.is_empty() {
        return Ok(B::default());
    }

    let flags = MULTI_BYTE_TO_WIDE_CHAR_FLAGS(flags);
    let mut stack = StackBuffer::<u16, { STACK_BUFFER_BYTES / 2 }>::new(wipe);
    // SAFETY: Both slices are valid for the duration of the call.
    let len = unsafe { MultiByteToWideChar(code_page.0, flags, bytes, Some(&mut stack.data)) };

    if len > 0 {
        return Ok(B::from_slice(&stack.data[..len as usize]));
    }

    let code = last_error_code();
    if code != ERROR_INSUFFICIENT_BUFFER.0 {
        return Err(Win32Error::with_context(code, "MultiByteToWideChar").into());
    }

    // SAFETY: A `None` output buffer asks for the required size.
    let needed = unsafe { MultiByteToWideChar(code_page.0, flags, bytes, None) };
    if needed <= 0 {
        return Err(Win32Error::last_with_context("MultiByteToWideChar").into());
    }

    let mut heap = B::zeroed(needed as usize);
    // SAFETY: `heap` holds exactly `needed` UTF-16 units.
    let len = unsafe { MultiByteToWideChar(code_page.0, flags, bytes, Some(heap.as_mut_slice())) };
    if len <= 0 {
        return Err(Win32Error::last_with_context("MultiByteToWideChar").into());
    }
    heap.truncate(len as usize);
    Ok(heap)
}

/// Calls `FormatMessageW` with a system-allocated buffer and returns the text.
///
/// `FORMAT_MESSAGE_ALLOCATE_BUFFER` is always added, and
/// `FORMAT_MESSAGE_ARGUMENT_ARRAY` is added when `arguments` is given.
///
/// # Safety
///
/// `source` must match what `flags` says it is (a module handle, a
/// null-terminated template, or nothing), and every argument must be what the
/// corresponding insert expects (pointers to null-terminated UTF-16 strings for
/// the default `%n` inserts).
pub unsafe fn format_message_raw(
    flags: FORMAT_MESSAGE_OPTIONS,
    source: Option<*const c_void>,
    message_id: u32,
    language_id: u32,
    arguments: Option<&[usize]>,
) -> Result<String> {
    let mut flags = flags | FORMAT_MESSAGE_ALLOCATE_BUFFER;
    if arguments.is_some() {
        flags |= FORMAT_MESSAGE_ARGUMENT_ARRAY;
    }

    let mut buffer = PWSTR::null();
    let len = FormatMessageW(
        flags,
        source,
        message_id,
        language_id,
        PWSTR(&mut buffer as *mut PWSTR as *mut u16),
        0,
        arguments.map(|args| args.as_ptr() as *const *const i8),
    );
    if len == 0 {
        return Err(Win32Error::last_with_context("FormatMessageW").into());
    }

    // The system allocated the buffer with LocalAlloc.
    let _owner = OwnedLocal::from_raw(HLOCAL(buffer.0 as *mut c_void));
    let text = std::slice::from_raw_parts(buffer.0, len as usize);
    Ok(String::from_utf16_lossy(text))
}

/// Returns the system message for `message_id` (a Win32 or HRESULT code).
///
/// Unlike [`crate::error::system_message`], the raw text is returned untrimmed
/// and a missing message is an error.
pub fn format_message(message_id: u32, language_id: u32) -> Result<String> {
    use windows::Win32::System::Diagnostics::Debug::{
        FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
    };
    // SAFETY: FROM_SYSTEM takes no source, IGNORE_INSERTS takes no arguments.
    unsafe {
        format_message_raw(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            message_id,
            language_id,
            None,
        )
    }
}

/// Inserts string arguments into a `FormatMessage` template.
///
/// `%1` refers to the first argument, `%2` to the second and so on; `%%`
/// produces a literal percent sign and `%n` a line break.
///
/// # Example
///
/// ```
/// use raii_windows::string::format_message_from_string;
///
/// let text = format_message_from_string("%2 then %1", &["first", "second"]).unwrap();
/// assert_eq!(text, "second then first");
/// ```
pub fn format_message_from_string(template: &str, args: &[&str]) -> Result<String> {
    let template = WideString::new(template);
    let args: Vec<WideString> = args.iter().map(|a| WideString::new(a)).collect();
    let pointers: Vec<usize> = args.iter().map(|a| a.as_ptr() as usize).collect();

    // SAFETY: The template is null-terminated and every argument is a pointer to a
    // null-terminated wide string that outlives the call.
    unsafe {
        format_message_raw(
            FORMAT_MESSAGE_FROM_STRING,
            Some(template.as_ptr() as *const c_void),
            0,
            0,
            Some(&pointers),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let original = "Hello, World! 🌍";
        let wide = to_wide(original);
        let back = from_wide(&wide).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn test_empty_string() {
        let wide = to_wide("");
        assert_eq!(wide, vec![0]);
        assert_eq!(from_wide(&wide).unwrap(), "");
    }

    #[test]
    fn test_from_wide_rejects_lone_surrogate() {
        assert!(from_wide(&[0xD800, 0x41]).is_err());
    }

    #[test]
    fn test_wide_string_from_units_keeps_embedded_null() {
        let s = WideString::from_units(&[0x41, 0, 0x42]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.as_slice(), &[0x41, 0, 0x42, 0]);
    }

    #[test]
    fn test_utf8_conversion() {
        let text = "Grüße, 世界";
        let wide: Vec<u16> = text.encode_utf16().collect();
        let bytes = wide_to_multi_byte(CodePage::UTF8, &wide).unwrap();
        assert_eq!(bytes, text.as_bytes());
        let back = multi_byte_to_wide(CodePage::UTF8, &bytes).unwrap();
        assert_eq!(back, wide);
    }

    #[test]
    fn test_empty_conversion() {
        assert!(wide_to_multi_byte(CodePage::UTF8, &[]).unwrap().is_empty());
        assert!(multi_byte_to_wide(CodePage::ACP, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_conversion_larger_than_stack_buffer() {
        let text = "ä".repeat(3 * STACK_BUFFER_BYTES);
        let wide: Vec<u16> = text.encode_utf16().collect();
        let bytes = wide_to_multi_byte(CodePage::UTF8, &wide).unwrap();
        assert_eq!(bytes.len(), text.len());
        let back = multi_byte_to_wide(CodePage::UTF8, &bytes).unwrap();
        assert_eq!(back.len(), wide.len());
    }

    #[test]
    fn test_used_default_char_reported() {
        // Windows-1252 has no representation for CJK characters.
        let wide: Vec<u16> = "a世".encode_utf16().collect();
        let result = wide_to_multi_byte_with(CodePage(1252), 0, &wide, Some(b'?')).unwrap();
        assert_eq!(result.bytes, b"a?");
        assert!(result.used_default_char);
    }

    #[test]
    fn test_invalid_code_page_reports_error() {
        let wide: Vec<u16> = "a".encode_utf16().collect();
        let err = wide_to_multi_byte(CodePage(0xFFFF_FFF0), &wide).unwrap_err();
        assert!(err.win32_error_code().is_some());
    }

    #[test]
    fn test_secure_conversion_matches_plain() {
        let wide: Vec<u16> = "secret".encode_utf16().collect();
        let secure = secure_wide_to_multi_byte(CodePage::UTF8, 0, &wide, None).unwrap();
        assert_eq!(secure.bytes.as_slice(), b"secret");
        let back = secure_multi_byte_to_wide(CodePage::UTF8, 0, b"secret").unwrap();
        assert_eq!(back.as_slice(), wide.as_slice());
    }

    #[test]
    fn test_secure_conversion_larger_than_stack_buffer() {
        let text = "pässwörd-".repeat(300);
        let wide: Vec<u16> = text.encode_utf16().collect();
        assert!(text.len() > STACK_BUFFER_BYTES);

        let secure = secure_wide_to_multi_byte(CodePage::UTF8, 0, &wide, None).unwrap();
        assert_eq!(secure.bytes.as_slice(), text.as_bytes());

        let back = secure_multi_byte_to_wide(CodePage::UTF8, 0, text.as_bytes()).unwrap();
        assert_eq!(back.as_slice(), wide.as_slice());
    }

    #[test]
    fn test_secure_conversion_reports_invalid_input() {
        use windows::Win32::Globalization::MB_ERR_INVALID_CHARS;

        let mut bytes = "x".repeat(2 * STACK_BUFFER_BYTES).into_bytes();
        bytes.push(0xFF);
        assert!(secure_multi_byte_to_wide(CodePage::UTF8, MB_ERR_INVALID_CHARS.0, &bytes).is_err());
        assert!(secure_multi_byte_to_wide(CodePage::UTF8, MB_ERR_INVALID_CHARS.0, &[0xC3]).is_err());
    }

    #[test]
    fn test_stack_buffer_keeps_data_when_not_wiping() {
        let mut buf = StackBuffer::<u16, 8>::new(false);
        assert_eq!(buf.data, [0u16; 8]);
        buf.data[3] = 7;
        assert_eq!(buf.data[3], 7);
    }

    #[test]
    fn test_format_message_from_string() {
        let text = format_message_from_string("%1 + %1 = %2%%", &["one", "two"]).unwrap();
        assert_eq!(text, "one + one = two%");
    }

    #[test]
    fn test_format_system_message() {
        let text = format_message(5, 0).unwrap();
        assert!(!text.trim().is_empty());
    }
}
