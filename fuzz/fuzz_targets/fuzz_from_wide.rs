//! Fuzz target for from_wide and WideString with arbitrary UTF-16 data.
//!
//! from_wide must never panic, must stop at the first null, and must agree
//! with the lossy conversion whenever the input is valid UTF-16.

#![no_main]

use libfuzzer_sys::fuzz_target;
use raii_windows::string::{from_wide, WideString};

fuzz_target!(|data: Vec<u16>| {
    // Limit size to avoid OOM
    if data.len() > 100_000 {
        return;
    }

    let result = from_wide(&data);

    let end = data.iter().position(|&c| c == 0).unwrap_or(data.len());
    match (&result, String::from_utf16(&data[..end])) {
        (Ok(a), Ok(b)) => assert_eq!(a, &b, "from_wide must stop at the first null"),
        (Err(_), Err(_)) => {}
        _ => panic!("from_wide disagrees with String::from_utf16"),
    }

    // WideString keeps every unit and adds exactly one terminator.
    let wide = WideString::from_units(&data);
    assert_eq!(wide.len(), data.len());
    assert_eq!(wide.as_units(), &data[..]);
    assert_eq!(wide.as_slice().last(), Some(&0));

    if let Ok(s) = &result {
        if !data.contains(&0) {
            assert_eq!(&wide.to_string_lossy(), s);
        }
    }
});
