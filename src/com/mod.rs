//! COM lifetime management and COM value types.
//!
//! - [`ComGuard`] initialises COM for the current thread.
//! - [`ComObject`] is an optional interface pointer with handle-like semantics.
//! - [`Bstr`] and [`Variant`] own the corresponding COM value types.

mod bstr;
mod guard;
mod object;
mod variant;

pub use bstr::Bstr;
pub use guard::{Apartment, ComGuard};
pub use object::ComObject;
pub use variant::{Currency, Variant, VariantValue};
