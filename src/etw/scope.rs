//! Function entry/exit tracing.

use super::data::{EventData, EventDescriptor, EventScalar};
use super::provider::EventProvider;
use std::ffi::CStr;

fn write_named(
    provider: &EventProvider,
    descriptor: &EventDescriptor,
    name: &CStr,
    result: Option<EventData<'_>>,
) {
    let written = EventData::try_from(name).and_then(|name| match result {
        Some(result) => provider.write(descriptor, &[name, result]),
        None => provider.write(descriptor, &[name]),
    });
    if let Err(e) = written {
        log::warn!("failed to write event {}: {}", descriptor.as_raw().Id, e);
    }
}

/// Writes an entry event when created and an exit event when dropped.
///
/// Both events carry the function name as a single string field.
///
/// ```no_run
/// use raii_windows::etw::{level, EventDescriptor, EventProvider, FunctionScope};
/// use windows::core::GUID;
///
/// const ENTER: EventDescriptor = EventDescriptor::new(100, level::VERBOSE);
/// const LEAVE: EventDescriptor = EventDescriptor::new(101, level::VERBOSE);
///
/// fn work(provider: &EventProvider) {
///     let _scope = FunctionScope::new(provider, &ENTER, &LEAVE, c"work");
///     // ...
/// }
/// ```
#[derive(Debug)]
#[must_use = "the exit event is written when the scope is dropped"]
pub struct FunctionScope<'a> {
    provider: &'a EventProvider,
    exit: EventDescriptor,
    name: &'a CStr,
}

impl<'a> FunctionScope<'a> {
    /// Writes `entry` and arranges for `exit` to be written on drop.
    pub fn new(
        provider: &'a EventProvider,
        entry: &EventDescriptor,
        exit: &EventDescriptor,
        name: &'a CStr,
    ) -> Self {
        write_named(provider, entry, name, None);
        Self {
            provider,
            exit: *exit,
            name,
        }
    }
}

impl Drop for FunctionScope<'_> {
    fn drop(&mut self) {
        write_named(self.provider, &self.exit, self.name, None);
    }
}

/// Like [`FunctionScope`], but the exit event also carries a result value.
#[derive(Debug)]
#[must_use = "the exit event is written when the scope is dropped"]
pub struct FunctionScopeResult<'a, T: EventScalar + Copy> {
    provider: &'a EventProvider,
    exit: EventDescriptor,
    name: &'a CStr,
    result: T,
}

impl<'a, T: EventScalar + Copy> FunctionScopeResult<'a, T> {
    /// Writes `entry` and arranges for `exit` with the current result to be
    /// written on drop. `result` is the value reported if it is never set.
    pub fn new(
        provider: &'a EventProvider,
        entry: &EventDescriptor,
        exit: &EventDescriptor,
        name: &'a CStr,
        result: T,
    ) -> Self {
        write_named(provider, entry, name, None);
        Self {
            provider,
            exit: *exit,
            name,
            result,
        }
    }

    /// Sets the value written with the exit event.
    pub fn set_result(&mut self, result: T) {
        self.result = result;
    }

    /// Returns the value that will be written with the exit event.
    pub fn result(&self) -> T {
        self.result
    }
}

impl<T: EventScalar + Copy> Drop for FunctionScopeResult<'_, T> {
    fn drop(&mut self) {
        write_named(
            self.provider,
            &self.exit,
            self.name,
            Some(EventData::from(&self.result)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etw::level;
    use windows::core::GUID;

    const PROVIDER: GUID = GUID::from_u128(0x9a41_07c2_6d3e_4b58_a2f1_0e9d8c7b6a55);
    const ENTER: EventDescriptor = EventDescriptor::new(10, level::VERBOSE);
    const LEAVE: EventDescriptor = EventDescriptor::new(11, level::VERBOSE);

    #[test]
    fn test_scope_writes_without_listeners() {
        let provider = EventProvider::register(&PROVIDER).unwrap();
        {
            let scope = FunctionScope::new(&provider, &ENTER, &LEAVE, c"test_scope");
            assert_eq!(scope.name, c"test_scope");
        }
    }

    #[test]
    fn test_scope_result() {
        let provider = EventProvider::register(&PROVIDER).unwrap();
        let mut scope = FunctionScopeResult::new(&provider, &ENTER, &LEAVE, c"compute", -1i32);
        assert_eq!(scope.result(), -1);
        scope.set_result(42);
        assert_eq!(scope.result(), 42);
    }
}
