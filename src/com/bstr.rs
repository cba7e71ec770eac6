//! Owned COM strings.

use crate::error::Result;
use std::fmt;
use windows::core::BSTR;

/// An owned BSTR.
///
/// The length is stored by the system allocator, so embedded nulls survive a
/// round trip. Cloning allocates a copy, dropping frees with `SysFreeString`.
///
/// # Example
///
/// ```
/// use raii_windows::com::Bstr;
///
/// let s = Bstr::from("hello");
/// assert_eq!(s.len(), 5);
/// assert_eq!(s.to_string(), "hello");
/// ```
#[derive(Clone, Default)]
pub struct Bstr(BSTR);

impl Bstr {
    /// Creates an empty string (a null BSTR).
    pub fn new() -> Self {
        Self(BSTR::new())
    }

    /// Creates a string from UTF-16 units, embedded nulls included.
    pub fn from_wide(units: &[u16]) -> Result<Self> {
        Ok(Self(BSTR::from_wide(units)?))
    }

    /// Returns the length in UTF-16 units.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the UTF-16 units.
    #[inline]
    pub fn as_wide(&self) -> &[u16] {
        &self.0
    }

    /// Decodes the string, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(self.as_wide())
    }

    /// Returns the underlying `BSTR`.
    #[inline]
    pub fn as_bstr(&self) -> &BSTR {
        &self.0
    }

    /// Consumes the wrapper and returns the underlying `BSTR`.
    #[inline]
    pub fn into_inner(self) -> BSTR {
        self.0
    }
}

impl From<&str> for Bstr {
    fn from(s: &str) -> Self {
        Self(BSTR::from(s))
    }
}

impl From<String> for Bstr {
    fn from(s: String) -> Self {
        Self(BSTR::from(s))
    }
}

impl From<BSTR> for Bstr {
    fn from(b: BSTR) -> Self {
        Self(b)
    }
}

impl From<Bstr> for BSTR {
    fn from(b: Bstr) -> Self {
        b.0
    }
}

impl PartialEq for Bstr {
    fn eq(&self, other: &Self) -> bool {
        self.as_wide() == other.as_wide()
    }
}

impl Eq for Bstr {}

impl fmt::Display for Bstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for Bstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bstr({:?})", self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let s = Bstr::new();
        assert!(s.is_empty());
        assert_eq!(s.as_wide(), &[] as &[u16]);
    }

    #[test]
    fn test_embedded_null_preserved() {
        let s = Bstr::from_wide(&[0x61, 0, 0x62]).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.as_wide(), &[0x61, 0, 0x62]);
    }

    #[test]
    fn test_clone_is_deep() {
        let a = Bstr::from("copy me");
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a.as_wide().as_ptr(), b.as_wide().as_ptr());
    }

    #[test]
    fn test_length_in_utf16_units() {
        let s = Bstr::from(String::from("𝄞x"));
        assert_eq!(s.len(), 3);
        assert_eq!(s.to_string(), "𝄞x");
    }
}
