//! Optional COM interface pointers.

use crate::error::{Error, Result};
use windows::core::{Interface, GUID};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX};

/// Holds at most one COM interface pointer.
///
/// Dropping the object releases the pointer; cloning adds a reference.
/// An empty object plays the role of a null interface pointer.
///
/// # Example
///
/// ```no_run
/// use raii_windows::com::{ComGuard, ComObject};
/// use windows::core::IUnknown;
/// use windows::Win32::System::Com::CLSCTX_INPROC_SERVER;
/// # use windows::core::GUID;
/// # let clsid = GUID::zeroed();
///
/// let _com = ComGuard::new()?;
/// let mut object = ComObject::<IUnknown>::new();
/// object.create(&clsid, CLSCTX_INPROC_SERVER)?;
/// # Ok::<(), raii_windows::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComObject<T: Interface> {
    inner: Option<T>,
}

impl<T: Interface> ComObject<T> {
    /// Creates an empty object.
    pub const fn new() -> Self {
        Self { inner: None }
    }

    /// Wraps an interface pointer.
    pub fn from_interface(interface: T) -> Self {
        Self {
            inner: Some(interface),
        }
    }

    /// Creates an instance of `clsid` in a new object.
    pub fn create_instance(clsid: &GUID, context: CLSCTX) -> Result<Self> {
        let mut object = Self::new();
        object.create(clsid, context)?;
        Ok(object)
    }

    /// Creates an instance of `clsid` and holds it, releasing the previous pointer.
    ///
    /// On failure the object is left unchanged.
    pub fn create(&mut self, clsid: &GUID, context: CLSCTX) -> Result<()> {
        // SAFETY: The CLSID reference is valid for the call and no outer
        // unknown is passed.
        let interface: T = unsafe { CoCreateInstance(clsid, None, context)? };
        self.inner = Some(interface);
        Ok(())
    }

    /// Queries the held object for interface `U`.
    pub fn query_interface<U: Interface>(&self) -> Result<ComObject<U>> {
        let interface = self.get()?.cast::<U>()?;
        Ok(ComObject::from_interface(interface))
    }

    /// Returns the held interface, or an error for an empty object.
    pub fn get(&self) -> Result<&T> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::null_pointer("empty COM object"))
    }

    /// Returns the held interface, if any.
    #[inline]
    pub fn interface(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    /// Returns true if an interface pointer is held.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Holds `interface`, releasing the previous pointer.
    pub fn attach(&mut self, interface: T) {
        self.inner = Some(interface);
    }

    /// Gives up the held pointer without releasing it.
    #[must_use = "dropping the detached interface releases it"]
    pub fn detach(&mut self) -> Option<T> {
        self.inner.take()
    }

    /// Releases the held pointer, leaving the object empty.
    pub fn free(&mut self) {
        self.inner = None;
    }

    /// Consumes the object and returns the interface, if any.
    pub fn into_inner(self) -> Option<T> {
        self.inner
    }
}

impl<T: Interface> Default for ComObject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Interface> From<T> for ComObject<T> {
    fn from(interface: T) -> Self {
        Self::from_interface(interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::ComGuard;
    use windows::core::IUnknown;
    use windows::Win32::System::Com::{IBindCtx, CreateBindCtx, IMalloc, CLSCTX_INPROC_SERVER};

    #[test]
    fn test_empty_object() {
        let object = ComObject::<IUnknown>::new();
        assert!(!object.is_valid());
        assert!(matches!(object.get(), Err(Error::NullPointer { .. })));
        assert!(object.query_interface::<IBindCtx>().is_err());
    }

    #[test]
    fn test_create_failure_leaves_object_unchanged() {
        let _com = ComGuard::new().unwrap();
        let mut object = ComObject::<IUnknown>::new();
        assert!(object.create(&GUID::zeroed(), CLSCTX_INPROC_SERVER).is_err());
        assert!(!object.is_valid());
    }

    #[test]
    fn test_query_attach_detach() {
        let _com = ComGuard::new().unwrap();
        let ctx: IBindCtx = unsafe { CreateBindCtx(0) }.unwrap();
        let mut object = ComObject::from_interface(ctx);

        let unknown = object.query_interface::<IUnknown>().unwrap();
        assert!(unknown.is_valid());
        assert!(object.query_interface::<IMalloc>().is_err());

        let clone = object.clone();
        assert_eq!(clone, object);

        let raw = object.detach();
        assert!(raw.is_some());
        assert!(!object.is_valid());
        object.attach(raw.unwrap());
        object.free();
        assert!(!object.is_valid());
    }
}
