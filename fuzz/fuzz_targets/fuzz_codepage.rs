//! Fuzz target for codepage conversion.
//!
//! Arbitrary bytes are decoded in a fuzzer-chosen code page. Valid UTF-8 must
//! survive a round trip, and the sanitizing conversions must produce the same
//! output as the plain ones on both sides of the stack buffer.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use raii_windows::string::{
    multi_byte_to_wide, multi_byte_to_wide_with, secure_multi_byte_to_wide,
    secure_wide_to_multi_byte, wide_to_multi_byte, CodePage,
};

#[derive(Debug, Arbitrary)]
enum Page {
    Ansi,
    Oem,
    Utf7,
    Utf8,
    Other(u16),
}

impl Page {
    fn code_page(&self) -> CodePage {
        match self {
            Page::Ansi => CodePage::ACP,
            Page::Oem => CodePage::OEMCP,
            Page::Utf7 => CodePage::UTF7,
            Page::Utf8 => CodePage::UTF8,
            Page::Other(id) => CodePage(u32::from(*id)),
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Input {
    page: Page,
    strict: bool,
    // Repeats the payload to push conversions past the stack buffer.
    repeat: u8,
    data: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let data = input.data.repeat(usize::from(input.repeat % 8).max(1));
    if data.len() > 100_000 {
        return;
    }
    let code_page = input.page.code_page();
    let flags = if input.strict { 0x8 } else { 0 };

    // Plain and sanitizing decoding agree, whatever the code page.
    match (
        multi_byte_to_wide_with(code_page, flags, &data),
        secure_multi_byte_to_wide(code_page, flags, &data),
    ) {
        (Ok(plain), Ok(secure)) => assert_eq!(&secure[..], &plain[..]),
        (Err(_), Err(_)) => {}
        (plain, secure) => panic!("conversions disagree: {:?} vs {:?}", plain.is_ok(), secure.is_ok()),
    }

    let Ok(wide) = multi_byte_to_wide(CodePage::UTF8, &data) else {
        return;
    };
    let back = wide_to_multi_byte(CodePage::UTF8, &wide).expect("UTF-16 from UTF-8 re-encodes");
    if std::str::from_utf8(&data).is_ok() {
        assert_eq!(back, data);
    }

    let secure_back = secure_wide_to_multi_byte(CodePage::UTF8, 0, &wide, None)
        .expect("plain conversion succeeded");
    assert_eq!(&secure_back.bytes[..], &back[..]);
});
