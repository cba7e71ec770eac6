//! Owned VARIANT values.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::mem::ManuallyDrop;
use windows::core::{IUnknown, BSTR};
use windows::Win32::Foundation::VARIANT_BOOL;
use windows::Win32::System::Com::{IDispatch, CY, SAFEARRAY};
use windows::Win32::System::Ole::{SafeArrayCopy, SafeArrayGetVartype, VarCmp};
use windows::Win32::System::Variant::{
    VariantClear, VariantCopy, VARENUM, VARIANT, VARIANT_0_0_0, VT_ARRAY, VT_BOOL, VT_BSTR,
    VT_CY, VT_DATE, VT_DISPATCH, VT_EMPTY, VT_ERROR, VT_I1, VT_I2, VT_I4, VT_I8, VT_INT, VT_NULL,
    VT_R4, VT_R8, VT_UI1, VT_UI2, VT_UI4, VT_UI8, VT_UINT, VT_UNKNOWN,
};

use super::Bstr;

// MAKELCID(LANG_USER_DEFAULT, SORT_DEFAULT)
const LOCALE_USER_DEFAULT: u32 = 0x0400;

/// A currency amount, stored as a 64-bit integer scaled by 10 000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Currency(pub i64);

impl Currency {
    /// Fixed-point scale of the stored value.
    pub const SCALE: i64 = 10_000;

    /// Converts from a floating point amount, rounding to four decimal places.
    pub fn from_f64(amount: f64) -> Self {
        Self((amount * Self::SCALE as f64).round() as i64)
    }

    /// Converts to a floating point amount.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

/// A borrowed, typed view of a [`Variant`]'s content.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantValue<'a> {
    /// `VT_EMPTY`.
    Empty,
    /// `VT_NULL`.
    Null,
    /// `VT_BOOL`.
    Bool(bool),
    /// `VT_I1`.
    I1(i8),
    /// `VT_UI1`.
    UI1(u8),
    /// `VT_I2`.
    I2(i16),
    /// `VT_UI2`.
    UI2(u16),
    /// `VT_I4`.
    I4(i32),
    /// `VT_UI4`.
    UI4(u32),
    /// `VT_INT`.
    Int(i32),
    /// `VT_UINT`.
    UInt(u32),
    /// `VT_I8`.
    I8(i64),
    /// `VT_UI8`.
    UI8(u64),
    /// `VT_R4`.
    R4(f32),
    /// `VT_R8`.
    R8(f64),
    /// `VT_CY`.
    Currency(Currency),
    /// `VT_DATE`, as an OLE automation date.
    Date(f64),
    /// `VT_ERROR`, an SCODE.
    Error(i32),
    /// `VT_BSTR`.
    Bstr(&'a BSTR),
    /// `VT_UNKNOWN`, possibly null.
    Unknown(Option<&'a IUnknown>),
    /// `VT_DISPATCH`, possibly null.
    Dispatch(Option<&'a IDispatch>),
    /// `VT_ARRAY | element`, with the element type.
    Array(VARENUM),
    /// Any other type.
    Other(VARENUM),
}

/// An owned VARIANT.
///
/// The default value is `VT_EMPTY`. Cloning uses `VariantCopy` (strings are
/// duplicated, interfaces gain a reference, arrays are copied) and dropping
/// uses `VariantClear`.
///
/// # Comparison
///
/// Two `VT_NULL` values are equal, and neither orders before the other.
/// Values of different types are never equal and never ordered. Values of the
/// same type compare by value: strings by UTF-16 code unit, booleans by their
/// `VARIANT_BOOL` representation (true is -1), interfaces by identity.
///
/// # Example
///
/// ```
/// use raii_windows::com::{Variant, VariantValue};
///
/// let mut v = Variant::from(42i32);
/// assert_eq!(v.value(), VariantValue::I4(42));
/// v.set("text");
/// assert_eq!(v.to_string_lossy().as_deref(), Some("text"));
/// ```
pub struct Variant(VARIANT);

impl Variant {
    /// Creates an empty (`VT_EMPTY`) value.
    pub fn new() -> Self {
        Self(VARIANT::default())
    }

    fn with_value(vt: VARENUM, fill: impl FnOnce(&mut VARIANT_0_0_0)) -> Self {
        let mut raw = VARIANT::default();
        // SAFETY: A default VARIANT is VT_EMPTY with no owned content; the tag and
        // the member `fill` writes always match.
        unsafe {
            let tagged = &mut *raw.Anonymous.Anonymous;
            tagged.vt = vt;
            fill(&mut tagged.Anonymous);
        }
        Self(raw)
    }

    /// Creates a `VT_NULL` value.
    pub fn null() -> Self {
        Self::with_value(VT_NULL, |_| {})
    }

    /// Creates a `VT_INT` value.
    pub fn int(value: i32) -> Self {
        Self::with_value(VT_INT, |u| u.intVal = value)
    }

    /// Creates a `VT_UINT` value.
    pub fn uint(value: u32) -> Self {
        Self::with_value(VT_UINT, |u| u.uintVal = value)
    }

    /// Creates a `VT_ERROR` value holding an SCODE.
    pub fn error(scode: i32) -> Self {
        Self::with_value(VT_ERROR, |u| u.scode = scode)
    }

    /// Creates a `VT_DATE` value from an OLE automation date.
    pub fn date(value: f64) -> Self {
        Self::with_value(VT_DATE, |u| u.date = value)
    }

    /// Creates a `VT_ARRAY` value holding a copy of `array`.
    ///
    /// # Safety
    ///
    /// `array` must point to a valid SAFEARRAY.
    pub unsafe fn from_safe_array(array: *const SAFEARRAY) -> Result<Self> {
        let element = SafeArrayGetVartype(array)?;
        let copy = SafeArrayCopy(array)?;
        Ok(Self::with_value(VARENUM(VT_ARRAY.0 | element.0), |u| {
            u.parray = copy
        }))
    }

    /// Takes ownership of a raw VARIANT.
    ///
    /// # Safety
    ///
    /// `raw` must be a properly initialised VARIANT whose content the caller owns.
    pub unsafe fn from_raw(raw: VARIANT) -> Self {
        Self(raw)
    }

    /// Gives up ownership of the raw VARIANT.
    ///
    /// The caller becomes responsible for calling `VariantClear`.
    #[must_use = "the returned VARIANT must be cleared by the caller"]
    pub fn into_raw(self) -> VARIANT {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the content is moved out exactly once.
        unsafe { std::ptr::read(&this.0) }
    }

    /// Returns the raw VARIANT.
    #[inline]
    pub fn as_raw(&self) -> &VARIANT {
        &self.0
    }

    /// Returns a pointer suitable for `[in, out] VARIANT*` parameters.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut VARIANT {
        &mut self.0
    }

    /// Returns the type tag.
    #[inline]
    pub fn vt(&self) -> VARENUM {
        // SAFETY: The tag is always initialised.
        unsafe { self.0.Anonymous.Anonymous.vt }
    }

    /// Returns true for `VT_EMPTY`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vt() == VT_EMPTY
    }

    /// Returns true for `VT_NULL`.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.vt() == VT_NULL
    }

    /// Releases the content and resets to `VT_EMPTY`.
    pub fn clear(&mut self) -> Result<()> {
        // SAFETY: `self.0` is a valid VARIANT we own.
        unsafe { VariantClear(&mut self.0)? };
        Ok(())
    }

    /// Replaces the content, releasing the previous one.
    pub fn set(&mut self, value: impl Into<Variant>) {
        *self = value.into();
    }

    /// Copies the value with `VariantCopy`, reporting failures.
    pub fn try_clone(&self) -> Result<Self> {
        let mut copy = VARIANT::default();
        // SAFETY: Both VARIANTs are valid; `copy` is empty.
        unsafe { VariantCopy(&mut copy, &self.0)? };
        Ok(Self(copy))
    }

    /// Returns a typed view of the content.
    pub fn value(&self) -> VariantValue<'_> {
        let vt = self.vt();
        // SAFETY: Every arm reads the member that matches the tag.
        unsafe {
            let u = &self.0.Anonymous.Anonymous.Anonymous;
            match vt {
                VT_EMPTY => VariantValue::Empty,
                VT_NULL => VariantValue::Null,
                VT_BOOL => VariantValue::Bool(u.boolVal.as_bool()),
                VT_I1 => VariantValue::I1(u.bVal as i8),
                VT_UI1 => VariantValue::UI1(u.bVal),
                VT_I2 => VariantValue::I2(u.iVal),
                VT_UI2 => VariantValue::UI2(u.uiVal),
                VT_I4 => VariantValue::I4(u.lVal),
                VT_UI4 => VariantValue::UI4(u.ulVal),
                VT_INT => VariantValue::Int(u.intVal),
                VT_UINT => VariantValue::UInt(u.uintVal),
                VT_I8 => VariantValue::I8(u.llVal),
                VT_UI8 => VariantValue::UI8(u.ullVal),
                VT_R4 => VariantValue::R4(u.fltVal),
                VT_R8 => VariantValue::R8(u.dblVal),
                VT_CY => VariantValue::Currency(Currency(u.cyVal.int64)),
                VT_DATE => VariantValue::Date(u.date),
                VT_ERROR => VariantValue::Error(u.scode),
                VT_BSTR => VariantValue::Bstr(&u.bstrVal),
                VT_UNKNOWN => VariantValue::Unknown(u.punkVal.as_ref()),
                VT_DISPATCH => VariantValue::Dispatch(u.pdispVal.as_ref()),
                other if other.0 & VT_ARRAY.0 != 0 => {
                    VariantValue::Array(VARENUM(other.0 & 0x0FFF))
                }
                other => VariantValue::Other(other),
            }
        }
    }

    /// Returns the boolean for `VT_BOOL`.
    pub fn as_bool(&self) -> Option<bool> {
        match self.value() {
            VariantValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the integer for `VT_I4` and `VT_INT`.
    pub fn as_i32(&self) -> Option<i32> {
        match self.value() {
            VariantValue::I4(v) | VariantValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integer for `VT_UI4` and `VT_UINT`.
    pub fn as_u32(&self) -> Option<u32> {
        match self.value() {
            VariantValue::UI4(v) | VariantValue::UInt(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integer for `VT_I8`.
    pub fn as_i64(&self) -> Option<i64> {
        match self.value() {
            VariantValue::I8(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integer for `VT_UI8`.
    pub fn as_u64(&self) -> Option<u64> {
        match self.value() {
            VariantValue::UI8(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the number for `VT_R8`.
    pub fn as_f64(&self) -> Option<f64> {
        match self.value() {
            VariantValue::R8(v) => Some(v),
            _ => None,
        }
    }

    /// Decodes the string for `VT_BSTR`.
    pub fn to_string_lossy(&self) -> Option<String> {
        match self.value() {
            VariantValue::Bstr(b) => Some(String::from_utf16_lossy(b)),
            _ => None,
        }
    }

    fn compare(&self, other: &Self) -> Option<Ordering> {
        use VariantValue as V;

        if self.is_null() && other.is_null() {
            return Some(Ordering::Equal);
        }
        if self.vt() != other.vt() {
            return None;
        }

        // VarCmp does not handle these integer types.
        match (self.value(), other.value()) {
            (V::Empty, V::Empty) => Some(Ordering::Equal),
            (V::I1(a), V::I1(b)) => a.partial_cmp(&b),
            (V::UI2(a), V::UI2(b)) => a.partial_cmp(&b),
            (V::UI4(a), V::UI4(b)) => a.partial_cmp(&b),
            (V::UI8(a), V::UI8(b)) => a.partial_cmp(&b),
            (V::Error(a), V::Error(b)) => a.partial_cmp(&b),
            (V::Unknown(a), V::Unknown(b)) => (a == b).then_some(Ordering::Equal),
            (V::Dispatch(a), V::Dispatch(b)) => (a == b).then_some(Ordering::Equal),
            _ => self.var_cmp(other),
        }
    }

    fn var_cmp(&self, other: &Self) -> Option<Ordering> {
        // SAFETY: Both values are initialised VARIANTs that outlive the call.
        let hr = unsafe { VarCmp(&self.0, &other.0, LOCALE_USER_DEFAULT, 0) };
        match hr.0 {
            0 => Some(Ordering::Less),
            1 => Some(Ordering::Equal),
            2 => Some(Ordering::Greater),
            _ => None,
        }
    }
}

fn bool_repr(b: bool) -> i16 {
    if b {
        -1
    } else {
        0
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Variant {
    fn clone(&self) -> Self {
        self.try_clone().unwrap_or_else(|e| {
            log::warn!("VariantCopy failed, cloning as VT_EMPTY: {}", e);
            Self::new()
        })
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        if let Err(e) = self.clear() {
            log::warn!("VariantClear failed: {}", e);
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other)
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Variant").field(&self.value()).finish()
    }
}

macro_rules! variant_from {
    ($($t:ty => $vt:ident, $field:ident, |$v:ident| $conv:expr;)*) => {
        $(
            impl From<$t> for Variant {
                fn from($v: $t) -> Self {
                    Self::with_value($vt, |u| u.$field = $conv)
                }
            }
        )*
    };
}

variant_from! {
    bool => VT_BOOL, boolVal, |v| VARIANT_BOOL(bool_repr(v));
    i8 => VT_I1, bVal, |v| v as u8;
    u8 => VT_UI1, bVal, |v| v;
    i16 => VT_I2, iVal, |v| v;
    u16 => VT_UI2, uiVal, |v| v;
    i32 => VT_I4, lVal, |v| v;
    u32 => VT_UI4, ulVal, |v| v;
    i64 => VT_I8, llVal, |v| v;
    u64 => VT_UI8, ullVal, |v| v;
    f32 => VT_R4, fltVal, |v| v;
    f64 => VT_R8, dblVal, |v| v;
    Currency => VT_CY, cyVal, |v| CY { int64: v.0 };
    &str => VT_BSTR, bstrVal, |v| ManuallyDrop::new(BSTR::from(v));
    String => VT_BSTR, bstrVal, |v| ManuallyDrop::new(BSTR::from(v));
    Bstr => VT_BSTR, bstrVal, |v| ManuallyDrop::new(v.into_inner());
    IUnknown => VT_UNKNOWN, punkVal, |v| ManuallyDrop::new(Some(v));
    &IUnknown => VT_UNKNOWN, punkVal, |v| ManuallyDrop::new(Some(v.clone()));
    IDispatch => VT_DISPATCH, pdispVal, |v| ManuallyDrop::new(Some(v));
    &IDispatch => VT_DISPATCH, pdispVal, |v| ManuallyDrop::new(Some(v.clone()));
}

macro_rules! variant_try_into {
    ($($t:ty => $name:literal, $getter:ident;)*) => {
        $(
            impl TryFrom<&Variant> for $t {
                type Error = Error;

                fn try_from(v: &Variant) -> Result<Self> {
                    v.$getter().ok_or_else(|| Error::type_mismatch($name, v.vt().0))
                }
            }
        )*
    };
}

variant_try_into! {
    bool => "bool", as_bool;
    i32 => "i32", as_i32;
    u32 => "u32", as_u32;
    i64 => "i64", as_i64;
    u64 => "u64", as_u64;
    f64 => "f64", as_f64;
    String => "BSTR", to_string_lossy;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::ComGuard;
    use windows::core::Interface;
    use windows::Win32::System::Com::{CreateBindCtx, IBindCtx};
    use windows::Win32::System::Ole::{SafeArrayCreateVector, SafeArrayDestroy};

    #[test]
    fn test_default_is_empty() {
        let v = Variant::default();
        assert!(v.is_empty());
        assert_eq!(v.value(), VariantValue::Empty);
    }

    #[test]
    fn test_scalar_constructors() {
        assert_eq!(Variant::from(true).value(), VariantValue::Bool(true));
        assert_eq!(Variant::from(-5i8).value(), VariantValue::I1(-5));
        assert_eq!(Variant::from(200u8).value(), VariantValue::UI1(200));
        assert_eq!(Variant::from(-300i16).value(), VariantValue::I2(-300));
        assert_eq!(Variant::from(7u32).vt(), VT_UI4);
        assert_eq!(Variant::from(1i64 << 40).as_i64(), Some(1 << 40));
        assert_eq!(Variant::from(2.5f64).as_f64(), Some(2.5));
        assert_eq!(Variant::int(3).value(), VariantValue::Int(3));
        assert_eq!(Variant::uint(4).value(), VariantValue::UInt(4));
        assert_eq!(Variant::error(-1).value(), VariantValue::Error(-1));
        assert_eq!(Variant::date(45000.5).value(), VariantValue::Date(45000.5));
        assert_eq!(
            Variant::from(Currency::from_f64(1.2345)).value(),
            VariantValue::Currency(Currency(12345))
        );
    }

    #[test]
    fn test_bool_uses_variant_true() {
        let v = Variant::from(true);
        let raw = unsafe { v.as_raw().Anonymous.Anonymous.Anonymous.boolVal };
        assert_eq!(raw, VARIANT_BOOL(-1));
    }

    #[test]
    fn test_string_and_set() {
        let mut v = Variant::from("first");
        assert_eq!(v.to_string_lossy().as_deref(), Some("first"));
        v.set(Bstr::from("second"));
        assert_eq!(String::try_from(&v).unwrap(), "second");
        v.set(10i32);
        assert!(v.to_string_lossy().is_none());
        assert!(matches!(
            String::try_from(&v),
            Err(Error::TypeMismatch { actual, .. }) if actual == VT_I4.0
        ));
    }

    #[test]
    fn test_clone_is_deep() {
        let a = Variant::from("shared");
        let b = a.clone();
        assert_eq!(a, b);
        let (VariantValue::Bstr(x), VariantValue::Bstr(y)) = (a.value(), b.value()) else {
            panic!("expected strings");
        };
        assert_ne!(x.as_ptr(), y.as_ptr());
    }

    #[test]
    fn test_null_comparisons() {
        let a = Variant::null();
        let b = Variant::null();
        assert!(a == b);
        assert!(!(a < b));
        assert!(!(a > b));
    }

    #[test]
    fn test_different_types_unequal() {
        let a = Variant::from(1i32);
        let b = Variant::from(1i64);
        assert!(a != b);
        assert_eq!(a.partial_cmp(&b), None);
        assert!(Variant::null() != Variant::new());
    }

    #[test]
    fn test_same_type_ordering() {
        assert!(Variant::from(1i32) < Variant::from(2i32));
        assert!(Variant::from("abc") < Variant::from("abd"));
        assert!(Variant::from(true) < Variant::from(false));
        assert!(Variant::from(u64::MAX) > Variant::from(1u64));
        assert!(Variant::from(-1i8) < Variant::from(1i8));
    }

    #[test]
    fn test_bstr_ordering_is_case_sensitive_and_linguistic() {
        assert!(Variant::from("a") < Variant::from("B"));
        assert!(Variant::from("a") != Variant::from("A"));
        assert!(Variant::from("same") == Variant::from("same"));
    }

    fn decimal(value: i32) -> Variant {
        use windows::Win32::System::Variant::{VariantChangeType, VAR_CHANGE_FLAGS, VT_DECIMAL};

        let source = Variant::from(value);
        let mut converted = Variant::new();
        unsafe {
            VariantChangeType(
                converted.as_mut_ptr(),
                source.as_raw(),
                VAR_CHANGE_FLAGS(0),
                VT_DECIMAL,
            )
        }
        .unwrap();
        assert_eq!(converted.vt(), VT_DECIMAL);
        converted
    }

    #[test]
    fn test_decimal_compares_by_value() {
        let seven = decimal(7);
        assert_eq!(seven.partial_cmp(&seven), Some(Ordering::Equal));
        assert!(seven == seven.clone());
        assert!(seven == decimal(7));
        assert!(decimal(-3) < seven);
        assert!(seven != decimal(8));
    }

    #[test]
    fn test_clear_resets_to_empty() {
        let mut v = Variant::from("gone");
        v.clear().unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn test_into_raw_and_back() {
        let v = Variant::from(99u16);
        let raw = v.into_raw();
        let back = unsafe { Variant::from_raw(raw) };
        assert_eq!(back.value(), VariantValue::UI2(99));
    }

    #[test]
    fn test_interface_identity() {
        let _com = ComGuard::new().unwrap();
        let ctx: IBindCtx = unsafe { CreateBindCtx(0) }.unwrap();
        let unknown: IUnknown = ctx.cast().unwrap();

        let a = Variant::from(&unknown);
        let b = Variant::from(unknown.clone());
        assert_eq!(a, b);
        assert_eq!(a.value(), VariantValue::Unknown(Some(&unknown)));

        let other: IUnknown = unsafe { CreateBindCtx(0) }.unwrap().cast().unwrap();
        assert!(a != Variant::from(other));
    }

    #[test]
    fn test_safe_array_copy() {
        unsafe {
            let array = SafeArrayCreateVector(VT_I4, 0, 3);
            assert!(!array.is_null());
            let v = Variant::from_safe_array(array).unwrap();
            SafeArrayDestroy(array).unwrap();
            assert_eq!(v.value(), VariantValue::Array(VT_I4));
            assert_eq!(v.vt(), VARENUM(VT_ARRAY.0 | VT_I4.0));
            let copy = v.try_clone().unwrap();
            assert_eq!(copy.vt(), v.vt());
        }
    }
}
