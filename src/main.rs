//! Example usage of the raii-windows library.

use raii_windows::etw::{level, EventData, EventDescriptor, EventProvider, FunctionScope};
use raii_windows::guid::GuidDisplay;
use raii_windows::prelude::*;
use raii_windows::string::{multi_byte_to_wide, secure_wide_to_multi_byte};
use windows::core::GUID;

const DEMO_PROVIDER: GUID = GUID::from_u128(0x6c1e2a3b_4d5f_4a61_8b7c_9d0e1f2a3b4c);
const ENTER: EventDescriptor = EventDescriptor::new(1, level::VERBOSE);
const LEAVE: EventDescriptor = EventDescriptor::new(2, level::VERBOSE);
const GREETING: EventDescriptor = EventDescriptor::new(3, level::INFORMATION);

fn main() -> Result<()> {
    println!("RAII Windows Demo\n");

    // GUIDs
    println!("=== GUID ===");
    println!("Provider: {}", GuidDisplay(&DEMO_PROVIDER));
    let parsed = parse_guid(&guid_to_string(&DEMO_PROVIDER))?;
    println!("Parsed back: {}", parsed == DEMO_PROVIDER);
    println!();

    // Codepage conversion
    println!("=== Codepage Conversion ===");
    let text = "Grüße, Windows!";
    let wide = WideString::new(text);
    let utf8 = wide_to_multi_byte(CodePage::UTF8, wide.as_units())?;
    println!("UTF-8 bytes: {}", utf8.len());
    let ansi = wide_to_multi_byte(CodePage::ACP, wide.as_units())?;
    println!("ANSI bytes: {}", ansi.len());
    let back = multi_byte_to_wide(CodePage::UTF8, &utf8)?;
    println!("Roundtrip: {}", String::from_utf16_lossy(&back));
    let password = WideString::new("p@ssw0rd");
    let secret = secure_wide_to_multi_byte(CodePage::UTF8, 0, password.as_units(), None)?;
    println!("Sanitized buffer: {:?}", secret.bytes);
    println!();

    // COM values
    println!("=== COM ===");
    let com = ComGuard::new()?;
    println!("Initialized COM: {}", com.owns_initialization());
    let name = Variant::from("raii-windows");
    let answer = Variant::from(42i32);
    println!("VARIANT string: {:?}", name.to_string_lossy());
    println!("VARIANT int: {:?}", answer.as_i32());
    println!("NULL == NULL: {}", Variant::null() == Variant::null());
    println!("BSTR: {}", Bstr::from("hello"));
    println!();

    // ETW
    println!("=== ETW ===");
    let provider = EventProvider::register(&DEMO_PROVIDER)?;
    {
        let _scope = FunctionScope::new(&provider, &ENTER, &LEAVE, c"main");
        let pid = std::process::id();
        provider.write(
            &GREETING,
            &[EventData::try_from(c"hello")?, EventData::from(&pid)],
        )?;
    }
    println!(
        "Listening sessions: {}",
        provider.is_enabled(level::INFORMATION, 0)
    );

    println!("\nDemo complete!");
    Ok(())
}
