//! Per-thread COM initialisation.

use crate::error::{Error, Result};
use std::marker::PhantomData;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{
    CoInitializeEx, CoUninitialize, COINIT, COINIT_APARTMENTTHREADED, COINIT_DISABLE_OLE1DDE,
    COINIT_MULTITHREADED,
};

/// The apartment model requested for the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Apartment {
    /// The multithreaded apartment (MTA).
    #[default]
    MultiThreaded,
    /// A single-threaded apartment (STA).
    SingleThreaded,
}

impl Apartment {
    fn to_native(self) -> COINIT {
        match self {
            Apartment::MultiThreaded => COINIT_MULTITHREADED,
            Apartment::SingleThreaded => COINIT_APARTMENTTHREADED | COINIT_DISABLE_OLE1DDE,
        }
    }
}

/// Keeps COM initialised on the current thread.
///
/// `CoUninitialize` is called on drop only when the matching `CoInitializeEx`
/// succeeded (`S_OK` or `S_FALSE`). If the thread already lives in a different
/// apartment (`RPC_E_CHANGED_MODE`) the existing apartment is used and nothing
/// is balanced on drop.
///
/// The guard is bound to the thread that created it and cannot be sent.
///
/// # Example
///
/// ```no_run
/// use raii_windows::com::ComGuard;
///
/// let _com = ComGuard::new()?;
/// // COM calls...
/// # Ok::<(), raii_windows::Error>(())
/// ```
#[must_use = "COM is uninitialised as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ComGuard {
    should_uninit: bool,
    _not_send: PhantomData<*const ()>,
}

impl ComGuard {
    /// Joins the multithreaded apartment.
    pub fn new() -> Result<Self> {
        Self::with_apartment(Apartment::MultiThreaded)
    }

    /// Initialises COM with the requested apartment model.
    pub fn with_apartment(apartment: Apartment) -> Result<Self> {
        // SAFETY: CoInitializeEx has no pointer arguments besides the reserved one.
        let hr = unsafe { CoInitializeEx(None, apartment.to_native()) };

        if hr == RPC_E_CHANGED_MODE {
            log::warn!(
                "CoInitializeEx: thread already initialised with another apartment model, \
                 keeping the existing apartment instead of {:?}",
                apartment
            );
            return Ok(Self {
                should_uninit: false,
                _not_send: PhantomData,
            });
        }

        hr.ok().map_err(Error::from)?;
        Ok(Self {
            should_uninit: true,
            _not_send: PhantomData,
        })
    }

    /// Returns true if this guard balances a successful initialisation on drop.
    #[inline]
    pub fn owns_initialization(&self) -> bool {
        self.should_uninit
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            // SAFETY: Balances the successful CoInitializeEx made on this thread.
            unsafe { CoUninitialize() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_initialisation() {
        let outer = ComGuard::new().unwrap();
        assert!(outer.owns_initialization());
        // S_FALSE for the second call on the same thread still needs balancing.
        let inner = ComGuard::new().unwrap();
        assert!(inner.owns_initialization());
    }

    #[test]
    fn test_changed_mode_is_tolerated() {
        std::thread::spawn(|| {
            let _sta = ComGuard::with_apartment(Apartment::SingleThreaded).unwrap();
            let mta = ComGuard::with_apartment(Apartment::MultiThreaded).unwrap();
            assert!(!mta.owns_initialization());
        })
        .join()
        .unwrap();
    }
}
