//! GUID text formatting and parsing.
//!
//! The text form is the registry form used throughout Windows:
//! `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}` with upper-case hex digits.

use crate::error::{Error, Result};
use crate::string::to_wide;
use std::fmt;
use windows::core::GUID;

/// Formats a GUID as `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`.
///
/// # Example
///
/// ```
/// use raii_windows::guid::guid_to_string;
/// use windows::core::GUID;
///
/// let id = GUID::from_u128(0x6f5a3b0e_1c2d_4e5f_8091_a2b3c4d5e6f7);
/// assert_eq!(guid_to_string(&id), "{6F5A3B0E-1C2D-4E5F-8091-A2B3C4D5E6F7}");
/// ```
pub fn guid_to_string(guid: &GUID) -> String {
    GuidDisplay(guid).to_string()
}

/// Formats a GUID as a null-terminated UTF-16 string.
pub fn guid_to_wide(guid: &GUID) -> Vec<u16> {
    to_wide(&guid_to_string(guid))
}

/// Parses a GUID from its text form, with or without surrounding braces.
pub fn parse_guid(text: &str) -> Result<GUID> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text);

    let groups: Vec<&str> = inner.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];
    let well_formed = groups.len() == lengths.len()
        && groups
            .iter()
            .zip(lengths)
            .all(|(g, len)| g.len() == len && g.bytes().all(|b| b.is_ascii_hexdigit()));
    if !well_formed {
        return Err(Error::string_conversion(format!("malformed GUID: {}", text)));
    }

    let digits: String = groups.concat();
    u128::from_str_radix(&digits, 16)
        .map(GUID::from_u128)
        .map_err(|e| Error::string_conversion(e.to_string()))
}

/// Adaptor that displays a GUID in its braced text form.
#[derive(Clone, Copy)]
pub struct GuidDisplay<'a>(pub &'a GUID);

impl fmt::Display for GuidDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            g.data1,
            g.data2,
            g.data3,
            g.data4[0],
            g.data4[1],
            g.data4[2],
            g.data4[3],
            g.data4[4],
            g.data4[5],
            g.data4[6],
            g.data4[7]
        )
    }
}

impl fmt::Debug for GuidDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: GUID = GUID::from_u128(0x0123abcd_4567_89ef_0a1b_2c3d4e5f6071);

    #[test]
    fn test_format_is_braced_upper_case() {
        assert_eq!(
            guid_to_string(&SAMPLE),
            "{0123ABCD-4567-89EF-0A1B-2C3D4E5F6071}"
        );
    }

    #[test]
    fn test_zero_guid() {
        assert_eq!(
            guid_to_string(&GUID::zeroed()),
            "{00000000-0000-0000-0000-000000000000}"
        );
    }

    #[test]
    fn test_wide_form_is_terminated() {
        let wide = guid_to_wide(&SAMPLE);
        assert_eq!(wide.len(), 39);
        assert_eq!(wide[0], u16::from(b'{'));
        assert_eq!(*wide.last().unwrap(), 0);
    }

    #[test]
    fn test_parse_accepts_both_forms() {
        assert_eq!(
            parse_guid("{0123ABCD-4567-89EF-0A1B-2C3D4E5F6071}").unwrap(),
            SAMPLE
        );
        assert_eq!(
            parse_guid("0123abcd-4567-89ef-0a1b-2c3d4e5f6071").unwrap(),
            SAMPLE
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_guid("").is_err());
        assert!(parse_guid("{0123ABCD-4567-89EF-0A1B-2C3D4E5F607}").is_err());
        assert!(parse_guid("0123ABCD456789EF0A1B2C3D4E5F6071").is_err());
        assert!(parse_guid("{0123ABCD-4567-89EF-0A1B-2C3D4E5F607G}").is_err());
    }
}
