//! Buffers that wipe their contents before the memory is given back.
//!
//! Used for passwords, keys and other secrets that must not linger in freed heap
//! blocks or on the stack. Wiping uses volatile writes followed by a compiler
//! fence so the stores cannot be elided.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{compiler_fence, Ordering};

mod sealed {
    pub trait Sealed {}
}

/// Element types that are plain integers: every bit pattern is valid and zero is
/// the default value.
pub trait Plain: sealed::Sealed + Copy + Default + PartialEq + 'static {}

macro_rules! impl_plain {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Plain for $t {}
        )*
    };
}

impl_plain!(u8, u16, u32, u64, usize, i8, i16, i32, i64);

/// Overwrites every element of `buf` with zero.
///
/// The writes are volatile and will not be optimised away even if `buf` is never
/// read again.
pub fn secure_zero<T: Plain>(buf: &mut [T]) {
    let base = buf.as_mut_ptr();
    for i in 0..buf.len() {
        // SAFETY: `i` is in bounds of `buf`.
        unsafe { ptr::write_volatile(base.add(i), T::default()) };
    }
    compiler_fence(Ordering::SeqCst);
}

/// Wipes the whole allocation of `v`, including spare capacity, and empties it.
fn wipe_allocation<T: Plain>(v: &mut Vec<T>) {
    let base = v.as_mut_ptr();
    for i in 0..v.capacity() {
        // SAFETY: The allocation holds `capacity` elements and `T` is plain data,
        // so writing into the spare capacity is sound.
        unsafe { ptr::write_volatile(base.add(i), T::default()) };
    }
    compiler_fence(Ordering::SeqCst);
    v.clear();
}

/// A growable buffer that wipes every allocation it releases.
///
/// Growing never reallocates in place: a new block is allocated, the contents
/// are copied over and the old block is wiped before it is freed.
pub struct SanitizingVec<T: Plain> {
    buf: Vec<T>,
}

impl<T: Plain> SanitizingVec<T> {
    /// Creates an empty buffer.
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Creates an empty buffer with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Creates a buffer holding a copy of `items`.
    pub fn from_slice(items: &[T]) -> Self {
        let mut v = Self::with_capacity(items.len());
        v.buf.extend_from_slice(items);
        v
    }

    /// Creates a buffer of `len` zero elements.
    pub fn zeroed(len: usize) -> Self {
        Self {
            buf: vec![T::default(); len],
        }
    }

    /// Returns the number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the number of elements the buffer can hold without reallocating.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Returns the contents.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.buf
    }

    /// Returns the contents mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.buf
    }

    /// Makes room for at least `additional` more elements.
    pub fn reserve(&mut self, additional: usize) {
        let free = self.buf.capacity() - self.buf.len();
        if free >= additional {
            return;
        }
        let wanted = (self.buf.len() + additional)
            .max(self.buf.capacity() * 2)
            .max(8);
        let mut next = Vec::with_capacity(wanted);
        next.extend_from_slice(&self.buf);
        wipe_allocation(&mut self.buf);
        self.buf = next;
    }

    /// Appends an element.
    pub fn push(&mut self, value: T) {
        self.reserve(1);
        self.buf.push(value);
    }

    /// Appends all elements of `items`.
    pub fn extend_from_slice(&mut self, items: &[T]) {
        self.reserve(items.len());
        self.buf.extend_from_slice(items);
    }

    /// Shortens the buffer to `len` elements, wiping the removed tail.
    pub fn truncate(&mut self, len: usize) {
        if len < self.buf.len() {
            secure_zero(&mut self.buf[len..]);
            self.buf.truncate(len);
        }
    }

    /// Wipes and removes all elements, keeping the allocation.
    pub fn clear(&mut self) {
        self.truncate(0);
    }
}

impl<T: Plain> Default for SanitizingVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Plain> Drop for SanitizingVec<T> {
    fn drop(&mut self) {
        wipe_allocation(&mut self.buf);
    }
}

impl<T: Plain> Clone for SanitizingVec<T> {
    fn clone(&self) -> Self {
        Self::from_slice(&self.buf)
    }
}

impl<T: Plain> Deref for SanitizingVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.buf
    }
}

impl<T: Plain> DerefMut for SanitizingVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.buf
    }
}

impl<T: Plain> PartialEq for SanitizingVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.buf == other.buf
    }
}

impl<T: Plain> Eq for SanitizingVec<T> {}

impl<T: Plain> fmt::Debug for SanitizingVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizingVec")
            .field("len", &self.buf.len())
            .finish_non_exhaustive()
    }
}

/// A UTF-8 string whose memory is wiped before release.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SanitizingString {
    bytes: SanitizingVec<u8>,
}

impl SanitizingString {
    /// Creates an empty string.
    pub const fn new() -> Self {
        Self {
            bytes: SanitizingVec::new(),
        }
    }

    /// Appends a string slice.
    pub fn push_str(&mut self, s: &str) {
        self.bytes.extend_from_slice(s.as_bytes());
    }

    /// Appends a character.
    pub fn push(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.push_str(c.encode_utf8(&mut utf8));
        secure_zero(&mut utf8);
    }

    /// Returns the contents.
    pub fn as_str(&self) -> &str {
        // SAFETY: Only complete `str` values are ever appended.
        unsafe { std::str::from_utf8_unchecked(&self.bytes) }
    }

    /// Returns the length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Wipes and removes the contents.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

impl From<&str> for SanitizingString {
    fn from(s: &str) -> Self {
        let mut out = Self::new();
        out.push_str(s);
        out
    }
}

impl Deref for SanitizingString {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for SanitizingString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SanitizingString(..)")
    }
}

/// A UTF-16 string whose memory is wiped before release.
///
/// The buffer always ends with a null terminator so it can be passed to
/// Windows APIs directly.
#[derive(Clone, PartialEq, Eq)]
pub struct SanitizingWideString {
    units: SanitizingVec<u16>,
}

impl SanitizingWideString {
    /// Creates an empty string.
    pub fn new() -> Self {
        let mut units = SanitizingVec::new();
        units.push(0);
        Self { units }
    }

    /// Creates a string from UTF-16 units (without terminator).
    pub fn from_units(units: &[u16]) -> Self {
        let mut out = Self::new();
        out.push_units(units);
        out
    }

    /// Appends UTF-16 units.
    pub fn push_units(&mut self, units: &[u16]) {
        self.units.truncate(self.units.len() - 1);
        self.units.extend_from_slice(units);
        self.units.push(0);
    }

    /// Appends a string slice.
    pub fn push_str(&mut self, s: &str) {
        self.units.truncate(self.units.len() - 1);
        self.units.reserve(s.len() + 1);
        for unit in s.encode_utf16() {
            self.units.push(unit);
        }
        self.units.push(0);
    }

    /// Returns the UTF-16 units without the terminator.
    pub fn as_units(&self) -> &[u16] {
        &self.units[..self.units.len() - 1]
    }

    /// Returns the UTF-16 units including the terminator.
    pub fn as_slice_with_nul(&self) -> &[u16] {
        &self.units
    }

    /// Returns the string as a PCWSTR for use with Windows APIs.
    pub fn as_pcwstr(&self) -> windows::core::PCWSTR {
        windows::core::PCWSTR::from_raw(self.units.as_ptr())
    }

    /// Returns the length in UTF-16 units, not including the terminator.
    #[inline]
    pub fn len(&self) -> usize {
        self.units.len() - 1
    }

    /// Returns true if the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes into a [`SanitizingString`], replacing invalid sequences.
    pub fn to_sanitizing_string(&self) -> SanitizingString {
        let mut out = SanitizingString::new();
        for c in char::decode_utf16(self.as_units().iter().copied()) {
            out.push(c.unwrap_or(char::REPLACEMENT_CHARACTER));
        }
        out
    }
}

impl Default for SanitizingWideString {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SanitizingWideString {
    fn from(s: &str) -> Self {
        let mut out = Self::new();
        out.push_str(s);
        out
    }
}

impl fmt::Debug for SanitizingWideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SanitizingWideString(..)")
    }
}

/// A fixed-size, zero-initialised byte block that is wiped on drop.
pub struct SanitizingBlob<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> SanitizingBlob<N> {
    /// Creates a zeroed block.
    pub const fn new() -> Self {
        Self { data: [0; N] }
    }

    /// Returns the block size in bytes.
    pub const fn size(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for SanitizingBlob<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Deref for SanitizingBlob<N> {
    type Target = [u8; N];

    fn deref(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> DerefMut for SanitizingBlob<N> {
    fn deref_mut(&mut self) -> &mut [u8; N] {
        &mut self.data
    }
}

impl<const N: usize> Drop for SanitizingBlob<N> {
    fn drop(&mut self) {
        secure_zero(&mut self.data);
    }
}

impl<const N: usize> fmt::Debug for SanitizingBlob<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SanitizingBlob<{}>(..)", N)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_zero() {
        let mut buf = [0xAAu8; 32];
        secure_zero(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));

        let mut wide = [0xBEEFu16; 4];
        secure_zero(&mut wide);
        assert_eq!(wide, [0; 4]);
    }

    #[test]
    fn test_vec_growth_keeps_contents() {
        let mut v = SanitizingVec::new();
        for i in 0..100u32 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
        assert_eq!(v[99], 99);
        assert!(v.capacity() >= 100);
    }

    #[test]
    fn test_truncate_wipes_tail_in_place() {
        let mut v = SanitizingVec::from_slice(&[1u8, 2, 3, 4]);
        v.truncate(2);
        assert_eq!(v.as_slice(), &[1, 2]);
        // The tail is still inside the allocation; it must read back as zero.
        let spare = unsafe { std::slice::from_raw_parts(v.as_ptr(), 4) };
        assert_eq!(spare, &[1, 2, 0, 0]);
    }

    #[test]
    fn test_debug_does_not_leak_contents() {
        let v = SanitizingVec::from_slice(b"hunter2");
        assert!(!format!("{:?}", v).contains("104"));
        let s = SanitizingString::from("hunter2");
        assert!(!format!("{:?}", s).contains("hunter2"));
    }

    #[test]
    fn test_sanitizing_string() {
        let mut s = SanitizingString::from("pass");
        s.push_str("word");
        s.push('!');
        assert_eq!(s.as_str(), "password!");
        s.clear();
        assert!(s.is_empty());
    }

    #[test]
    fn test_sanitizing_wide_string_terminated() {
        let mut s = SanitizingWideString::from("ab");
        s.push_units(&[0x63]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.as_slice_with_nul(), &[0x61, 0x62, 0x63, 0]);
        assert_eq!(s.to_sanitizing_string().as_str(), "abc");

        let empty = SanitizingWideString::new();
        assert!(empty.is_empty());
        assert_eq!(empty.as_slice_with_nul(), &[0]);
    }

    #[test]
    fn test_blob_starts_zeroed() {
        let mut blob = SanitizingBlob::<16>::new();
        assert!(blob.iter().all(|&b| b == 0));
        blob[0] = 7;
        assert_eq!(blob[0], 7);
        assert_eq!(blob.size(), 16);
    }
}
