//! Dynamic library (DLL) loading and resource strings.
//!
//! [`Library`] owns a reference on a loaded module. Modules obtained through
//! [`Library::get`] or [`Library::current`] take their own reference with
//! `GetModuleHandleExW`, so every `Library` releases exactly what it acquired.

use crate::error::{Error, Result};
use crate::handle::{HandleKind, Owned};
use crate::string::{format_message_from_string, WideString};
use std::path::{Path, PathBuf};
use windows::core::{PCSTR, PCWSTR, PWSTR};
use windows::Win32::Foundation::{FreeLibrary, HINSTANCE, HMODULE};
use windows::Win32::System::LibraryLoader::{
    GetModuleFileNameW, GetModuleHandleExW, GetProcAddress, LoadLibraryExW, LoadLibraryW,
    LOAD_LIBRARY_AS_DATAFILE, LOAD_LIBRARY_AS_IMAGE_RESOURCE, LOAD_LIBRARY_FLAGS,
    LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR, LOAD_LIBRARY_SEARCH_SYSTEM32,
};
use windows::Win32::UI::WindowsAndMessaging::LoadStringW;

/// Module handles, released with `FreeLibrary`.
#[derive(Debug)]
pub enum ModuleKind {}

impl HandleKind for ModuleKind {
    type Raw = HMODULE;
    const INVALID: HMODULE = HMODULE(std::ptr::null_mut());
    const NAME: &'static str = "module handle";

    #[inline]
    fn bits(raw: HMODULE) -> u64 {
        raw.0 as usize as u64
    }

    unsafe fn close(raw: HMODULE) -> Result<()> {
        FreeLibrary(raw).map_err(Error::from)
    }
}

/// A loaded dynamic library (DLL).
#[derive(Debug)]
pub struct Library {
    handle: Owned<ModuleKind>,
}

impl Library {
    /// Loads a library from the specified path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_wide = WideString::from_path(path.as_ref());

        // SAFETY: The path is a valid null-terminated wide string.
        let raw = unsafe { LoadLibraryW(path_wide.as_pcwstr())? };
        Ok(Self {
            handle: Owned::new(raw)?,
        })
    }

    /// Loads a library with specific flags.
    pub fn load_with_flags(path: impl AsRef<Path>, flags: LoadFlags) -> Result<Self> {
        let path_wide = WideString::from_path(path.as_ref());

        // SAFETY: The path is a valid null-terminated wide string.
        let raw = unsafe { LoadLibraryExW(path_wide.as_pcwstr(), None, flags.to_native())? };
        Ok(Self {
            handle: Owned::new(raw)?,
        })
    }

    /// Takes a new reference on an already-loaded library.
    pub fn get(name: &str) -> Result<Self> {
        let name_wide = WideString::new(name);
        Self::reference(name_wide.as_pcwstr())
    }

    /// Takes a new reference on the current executable.
    pub fn current() -> Result<Self> {
        Self::reference(PCWSTR::null())
    }

    fn reference(name: PCWSTR) -> Result<Self> {
        let mut handle = Owned::<ModuleKind>::default();
        // SAFETY: `name` is null or a valid wide string, and the wrapper is empty.
        unsafe { GetModuleHandleExW(0, name, handle.as_out_ptr())? };
        Ok(Self { handle })
    }

    /// Gets a function pointer from the library.
    ///
    /// # Safety
    ///
    /// The caller must ensure the function signature matches the actual function.
    pub unsafe fn get_proc<F>(&self, name: &str) -> Result<F>
    where
        F: Copy,
    {
        let name_cstr =
            std::ffi::CString::new(name).map_err(|_| Error::custom("Invalid function name"))?;

        match GetProcAddress(self.as_raw(), PCSTR(name_cstr.as_ptr() as *const u8)) {
            Some(p) => Ok(std::mem::transmute_copy(&p)),
            None => Err(Error::custom(format!("Function '{}' not found", name))),
        }
    }

    /// Gets the path to the loaded library.
    pub fn path(&self) -> Result<PathBuf> {
        // MAX_PATH is not enough for extended paths.
        let mut buffer = vec![0u16; 32768];

        // SAFETY: The module handle is valid and the buffer is writable.
        let len = unsafe { GetModuleFileNameW(Some(self.as_raw()), &mut buffer) } as usize;
        if len == 0 {
            return Err(crate::error::last_error());
        }

        Ok(PathBuf::from(crate::string::from_wide(&buffer[..len])?))
    }

    /// Loads a string resource.
    ///
    /// Returns an error if the module has no string with that id.
    pub fn load_string(&self, id: u32) -> Result<String> {
        let mut text: *const u16 = std::ptr::null();
        // SAFETY: With a zero buffer size, LoadStringW stores a read-only pointer to
        // the resource (not null-terminated) into the buffer argument.
        let len = unsafe {
            LoadStringW(
                Some(HINSTANCE(self.as_raw().0)),
                id,
                PWSTR(&mut text as *mut *const u16 as *mut u16),
                0,
            )
        };
        if len <= 0 || text.is_null() {
            return Err(crate::error::last_error());
        }

        // SAFETY: The resource stays mapped while the module is loaded.
        let units = unsafe { std::slice::from_raw_parts(text, len as usize) };
        Ok(String::from_utf16_lossy(units))
    }

    /// Returns a string resource, or `"msg {id}"` if the module has none.
    pub fn message(&self, id: u32) -> String {
        self.load_string(id).unwrap_or_else(|_| format!("msg {}", id))
    }

    /// Loads a string resource and fills its `%1..%n` inserts with `args`.
    pub fn format_message(&self, id: u32, args: &[&str]) -> Result<String> {
        format_message_from_string(&self.load_string(id)?, args)
    }

    /// Returns the raw module handle.
    #[inline]
    pub fn as_raw(&self) -> HMODULE {
        self.handle.as_raw()
    }
}

/// Flags for loading libraries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadFlags(u32);

impl LoadFlags {
    /// No special flags.
    pub const NONE: Self = Self(0);

    /// Load as a data file (no execution).
    pub const AS_DATAFILE: Self = Self(LOAD_LIBRARY_AS_DATAFILE.0);

    /// Load as an image resource.
    pub const AS_IMAGE_RESOURCE: Self = Self(LOAD_LIBRARY_AS_IMAGE_RESOURCE.0);

    /// Search the DLL's directory for dependencies.
    pub const SEARCH_DLL_LOAD_DIR: Self = Self(LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR.0);

    /// Search only System32 for dependencies.
    pub const SEARCH_SYSTEM32: Self = Self(LOAD_LIBRARY_SEARCH_SYSTEM32.0);

    /// Adds a flag.
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    fn to_native(self) -> LOAD_LIBRARY_FLAGS {
        LOAD_LIBRARY_FLAGS(self.0)
    }
}
