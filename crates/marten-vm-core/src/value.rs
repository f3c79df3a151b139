//! NaN-boxed values
//!
//! All values fit in a 64-bit payload. Doubles are stored as raw bits;
//! everything else lives in the quiet-NaN space. Heap values carry their
//! reference in a side field next to the bits, keeping the type safe without
//! raw pointers.

use std::sync::Arc;

use marten_vm_bytecode::Module;
use parking_lot::Mutex;

use crate::enumerate::EnumerateState;
use crate::environment::LexicalEnvironment;
use crate::error::VmResult;
use crate::object::JsObject;
use crate::string::JsString;

const TAG_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;
const TAG_NULL: u64 = 0x7FF8_0000_0000_0001;
const TAG_TRUE: u64 = 0x7FF8_0000_0000_0002;
const TAG_FALSE: u64 = 0x7FF8_0000_0000_0003;
// Internal hole marker for dense array storage, never visible to scripts.
const TAG_EMPTY: u64 = 0x7FF8_0000_0000_0004;
// Canonical NaN, distinct from the undefined tag.
const TAG_NAN: u64 = 0x7FFA_0000_0000_0000;
// Int32 payload in the low 32 bits.
const TAG_INT32: u64 = 0x7FF8_0001_0000_0000;
const TAG_INT32_MASK: u64 = 0xFFFF_FFFF_0000_0000;
// Heap values: the bits are only the tag, the reference rides alongside.
const TAG_POINTER: u64 = 0x7FFC_0000_0000_0000;

const QNAN_PREFIX: u64 = 0x7FF8_0000_0000_0000;

/// A reference to a heap-allocated value
#[derive(Debug, Clone)]
pub enum HeapRef {
    /// Interned string
    String(Arc<JsString>),
    /// Ordinary object (also arrays and function objects' property bags)
    Object(Arc<JsObject>),
    /// Bytecode closure
    Function(Arc<Closure>),
    /// Host-provided function
    Native(Arc<NativeFunction>),
    /// Function with bound receiver and leading arguments
    Bound(Arc<BoundFunction>),
    /// Opaque for-in enumeration snapshot
    Enumeration(Arc<Mutex<EnumerateState>>),
}

/// A closure over a bytecode function
pub struct Closure {
    /// Index into the module function table
    pub function_index: u32,
    /// Owning module
    pub module: Arc<Module>,
    /// Environment captured at declaration
    pub env: Arc<LexicalEnvironment>,
    /// The function object carrying `prototype` and other properties
    pub object: Arc<JsObject>,
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("function_index", &self.function_index)
            .finish_non_exhaustive()
    }
}

/// Signature of host-provided functions: (this, args) -> result
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> VmResult<Value> + Send + Sync>;

/// A host-provided function
pub struct NativeFunction {
    /// Function name for stack traces
    pub name: String,
    /// The callable
    pub func: NativeFn,
    /// Whether `new` may be applied
    pub constructible: bool,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A function with pre-bound receiver and leading arguments
#[derive(Debug)]
pub struct BoundFunction {
    /// The wrapped callable
    pub target: Value,
    /// Bound receiver
    pub this_value: Value,
    /// Bound leading arguments
    pub bound_args: Vec<Value>,
}

/// A NaN-boxed value
#[derive(Clone)]
pub struct Value {
    bits: u64,
    heap_ref: Option<HeapRef>,
}

impl Value {
    /// The undefined value
    #[inline]
    pub const fn undefined() -> Self {
        Self {
            bits: TAG_UNDEFINED,
            heap_ref: None,
        }
    }

    /// The null value
    #[inline]
    pub const fn null() -> Self {
        Self {
            bits: TAG_NULL,
            heap_ref: None,
        }
    }

    /// The internal hole marker (dense array storage only)
    #[inline]
    pub const fn empty() -> Self {
        Self {
            bits: TAG_EMPTY,
            heap_ref: None,
        }
    }

    /// Create a boolean value
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self {
            bits: if b { TAG_TRUE } else { TAG_FALSE },
            heap_ref: None,
        }
    }

    /// Create an int32 value
    #[inline]
    pub const fn int32(i: i32) -> Self {
        Self {
            bits: TAG_INT32 | (i as u32 as u64),
            heap_ref: None,
        }
    }

    /// Create a double value (NaN is canonicalized)
    #[inline]
    pub fn double(f: f64) -> Self {
        let bits = if f.is_nan() { TAG_NAN } else { f.to_bits() };
        Self {
            bits,
            heap_ref: None,
        }
    }

    /// Create a number value, preferring the int32 representation
    ///
    /// Negative zero stays a double so its sign survives.
    pub fn number(f: f64) -> Self {
        if f >= i32::MIN as f64
            && f <= i32::MAX as f64
            && f.fract() == 0.0
            && !(f == 0.0 && f.is_sign_negative())
        {
            Self::int32(f as i32)
        } else {
            Self::double(f)
        }
    }

    /// Create a string value
    #[inline]
    pub fn string(s: Arc<JsString>) -> Self {
        Self {
            bits: TAG_POINTER,
            heap_ref: Some(HeapRef::String(s)),
        }
    }

    /// Create an object value
    #[inline]
    pub fn object(o: Arc<JsObject>) -> Self {
        Self {
            bits: TAG_POINTER,
            heap_ref: Some(HeapRef::Object(o)),
        }
    }

    /// Create a closure value
    #[inline]
    pub fn function(c: Arc<Closure>) -> Self {
        Self {
            bits: TAG_POINTER,
            heap_ref: Some(HeapRef::Function(c)),
        }
    }

    /// Create a native function value
    #[inline]
    pub fn native(f: Arc<NativeFunction>) -> Self {
        Self {
            bits: TAG_POINTER,
            heap_ref: Some(HeapRef::Native(f)),
        }
    }

    /// Create a bound function value
    #[inline]
    pub fn bound(b: Arc<BoundFunction>) -> Self {
        Self {
            bits: TAG_POINTER,
            heap_ref: Some(HeapRef::Bound(b)),
        }
    }

    /// Create an enumeration snapshot handle
    #[inline]
    pub fn enumeration(e: Arc<Mutex<EnumerateState>>) -> Self {
        Self {
            bits: TAG_POINTER,
            heap_ref: Some(HeapRef::Enumeration(e)),
        }
    }

    /// Check for undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.bits == TAG_UNDEFINED
    }

    /// Check for null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.bits == TAG_NULL
    }

    /// Check for undefined or null
    #[inline]
    pub fn is_nullish(&self) -> bool {
        self.is_undefined() || self.is_null()
    }

    /// Check for the internal hole marker
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits == TAG_EMPTY
    }

    /// Check for a boolean
    #[inline]
    pub fn is_boolean(&self) -> bool {
        self.bits == TAG_TRUE || self.bits == TAG_FALSE
    }

    /// Check for an int32
    #[inline]
    pub fn is_int32(&self) -> bool {
        (self.bits & TAG_INT32_MASK) == TAG_INT32
    }

    /// Check for a double
    #[inline]
    pub fn is_double(&self) -> bool {
        self.bits == TAG_NAN || (self.bits & QNAN_PREFIX) != QNAN_PREFIX
    }

    /// Check for any number
    #[inline]
    pub fn is_number(&self) -> bool {
        self.is_int32() || self.is_double()
    }

    /// Check for a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self.heap_ref, Some(HeapRef::String(_)))
    }

    /// Check for an object (not a function)
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self.heap_ref, Some(HeapRef::Object(_)))
    }

    /// Check for a primitive (anything toPrimitive would accept as done)
    #[inline]
    pub fn is_primitive(&self) -> bool {
        self.heap_ref.is_none() || self.is_string()
    }

    /// Check whether the value can be called
    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(
            self.heap_ref,
            Some(HeapRef::Function(_) | HeapRef::Native(_) | HeapRef::Bound(_))
        )
    }

    /// Get boolean payload
    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        match self.bits {
            TAG_TRUE => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        }
    }

    /// Get int32 payload
    #[inline]
    pub fn as_int32(&self) -> Option<i32> {
        if self.is_int32() {
            Some(self.bits as u32 as i32)
        } else {
            None
        }
    }

    /// Get numeric payload (int32 or double)
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        if self.is_int32() {
            Some(self.bits as u32 as i32 as f64)
        } else if self.is_double() {
            Some(f64::from_bits(self.bits))
        } else {
            None
        }
    }

    /// Get string payload
    #[inline]
    pub fn as_string(&self) -> Option<&Arc<JsString>> {
        match &self.heap_ref {
            Some(HeapRef::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Get object payload
    #[inline]
    pub fn as_object(&self) -> Option<&Arc<JsObject>> {
        match &self.heap_ref {
            Some(HeapRef::Object(o)) => Some(o),
            _ => None,
        }
    }

    /// Get closure payload
    #[inline]
    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match &self.heap_ref {
            Some(HeapRef::Function(c)) => Some(c),
            _ => None,
        }
    }

    /// Get native function payload
    #[inline]
    pub fn as_native(&self) -> Option<&Arc<NativeFunction>> {
        match &self.heap_ref {
            Some(HeapRef::Native(f)) => Some(f),
            _ => None,
        }
    }

    /// Get bound function payload
    #[inline]
    pub fn as_bound(&self) -> Option<&Arc<BoundFunction>> {
        match &self.heap_ref {
            Some(HeapRef::Bound(b)) => Some(b),
            _ => None,
        }
    }

    /// Get enumeration snapshot payload
    #[inline]
    pub fn as_enumeration(&self) -> Option<&Arc<Mutex<EnumerateState>>> {
        match &self.heap_ref {
            Some(HeapRef::Enumeration(e)) => Some(e),
            _ => None,
        }
    }

    /// Get the heap reference, if any
    #[inline]
    pub fn heap_ref(&self) -> Option<&HeapRef> {
        self.heap_ref.as_ref()
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self.bits {
            TAG_UNDEFINED | TAG_NULL | TAG_FALSE | TAG_EMPTY => false,
            TAG_TRUE => true,
            _ => {
                if let Some(n) = self.as_number() {
                    n != 0.0 && !n.is_nan()
                } else if let Some(s) = self.as_string() {
                    !s.is_empty()
                } else {
                    true
                }
            }
        }
    }

    /// The `typeof` string for this value
    pub fn type_of(&self) -> &'static str {
        if self.is_undefined() {
            "undefined"
        } else if self.is_null() {
            "object"
        } else if self.is_boolean() {
            "boolean"
        } else if self.is_number() {
            "number"
        } else if self.is_string() {
            "string"
        } else if self.is_callable() {
            "function"
        } else {
            "object"
        }
    }

    /// Strict equality (`===`)
    pub fn strict_equals(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a == b;
        }
        match (&self.heap_ref, &other.heap_ref) {
            (None, None) => self.bits == other.bits,
            (Some(HeapRef::String(a)), Some(HeapRef::String(b))) => a == b,
            (Some(HeapRef::Object(a)), Some(HeapRef::Object(b))) => Arc::ptr_eq(a, b),
            (Some(HeapRef::Function(a)), Some(HeapRef::Function(b))) => Arc::ptr_eq(a, b),
            (Some(HeapRef::Native(a)), Some(HeapRef::Native(b))) => Arc::ptr_eq(a, b),
            (Some(HeapRef::Bound(a)), Some(HeapRef::Bound(b))) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_undefined() {
            write!(f, "undefined")
        } else if self.is_null() {
            write!(f, "null")
        } else if self.is_empty() {
            write!(f, "<empty>")
        } else if let Some(b) = self.as_boolean() {
            write!(f, "{}", b)
        } else if let Some(n) = self.as_number() {
            write!(f, "{}", number_to_string(n))
        } else {
            match &self.heap_ref {
                Some(HeapRef::String(s)) => write!(f, "{:?}", s.as_str()),
                Some(HeapRef::Object(_)) => write!(f, "[object]"),
                Some(HeapRef::Function(_)) => write!(f, "[function]"),
                Some(HeapRef::Native(n)) => write!(f, "[native function {}]", n.name),
                Some(HeapRef::Bound(_)) => write!(f, "[bound function]"),
                Some(HeapRef::Enumeration(_)) => write!(f, "[enumeration]"),
                None => write!(f, "<invalid:{:#x}>", self.bits),
            }
        }
    }
}

// Convert ES number formatting and int conversions; shared by the interpreter
// and value rendering.

/// ToInt32 (modular wrap into the signed 32-bit range)
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let n = n.trunc();
    let m = n.rem_euclid(4294967296.0);
    let m = if m >= 2147483648.0 {
        m - 4294967296.0
    } else {
        m
    };
    m as i32
}

/// ToUint32 (modular wrap into the unsigned 32-bit range)
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    n.trunc().rem_euclid(4294967296.0) as u32
}

/// ES number-to-string: no trailing ".0" for integral values, NaN/Infinity
/// spellings, negative zero prints "0"
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    let mut buf = ryu::Buffer::new();
    let s = buf.format(n);
    s.strip_suffix(".0").unwrap_or(s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_is_not_nan() {
        let u = Value::undefined();
        let nan = Value::double(f64::NAN);

        assert!(u.is_undefined());
        assert!(!u.is_number());
        assert!(nan.is_number());
        assert!(nan.as_number().unwrap().is_nan());
    }

    #[test]
    fn test_int32_roundtrip() {
        let v = Value::int32(-42);
        assert!(v.is_int32());
        assert_eq!(v.as_int32(), Some(-42));
        assert_eq!(v.as_number(), Some(-42.0));
    }

    #[test]
    fn test_number_prefers_int32() {
        assert!(Value::number(7.0).is_int32());
        assert!(!Value::number(7.5).is_int32());
        assert!(!Value::number(4294967296.0).is_int32());
    }

    #[test]
    fn test_negative_zero_stays_double() {
        let v = Value::number(-0.0);
        assert!(!v.is_int32());
        assert!(v.as_number().unwrap().is_sign_negative());
    }

    #[test]
    fn test_strict_equals_mixed_numbers() {
        assert!(Value::int32(1).strict_equals(&Value::double(1.0)));
        assert!(!Value::double(f64::NAN).strict_equals(&Value::double(f64::NAN)));
        assert!(Value::double(0.0).strict_equals(&Value::double(-0.0)));
    }

    #[test]
    fn test_to_boolean() {
        assert!(!Value::undefined().to_boolean());
        assert!(!Value::null().to_boolean());
        assert!(!Value::int32(0).to_boolean());
        assert!(!Value::double(f64::NAN).to_boolean());
        assert!(!Value::string(JsString::intern("")).to_boolean());
        assert!(Value::int32(1).to_boolean());
        assert!(Value::string(JsString::intern("x")).to_boolean());
    }

    #[test]
    fn test_to_int32_wraps() {
        assert_eq!(to_int32(4294967296.0), 0);
        assert_eq!(to_int32(2147483648.0), -2147483648);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(2147483648.0), "2147483648");
    }
}
