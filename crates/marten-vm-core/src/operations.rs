//! Abstract operations: coercions, equality, comparison, arithmetic slow
//! paths
//!
//! Everything here can call back into script (valueOf/toString, getters), so
//! these live on the machine rather than on `Value`.

use std::sync::Arc;

use crate::error::{VmError, VmResult};
use crate::interpreter::Machine;
use crate::object::ObjectKind;
use crate::string::{JsString, well_known};
use crate::value::{Value, number_to_string};

/// toPrimitive hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrimitiveHint {
    /// No preference; dates prefer the string order here
    Default,
    Number,
    String,
}

/// ToNumber on string data
pub(crate) fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return match u64::from_str_radix(hex, 16) {
            Ok(v) => v as f64,
            Err(_) => f64::NAN,
        };
    }
    // Rust also parses "inf"/"NaN"; scripts do not
    if t.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        t.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

impl Machine<'_> {
    /// ToPrimitive: valueOf/toString protocol on objects, identity elsewhere
    pub(crate) fn to_primitive(&mut self, value: &Value, hint: PrimitiveHint) -> VmResult<Value> {
        let Some(container) = self.property_container(value) else {
            return Ok(value.clone());
        };
        // Dates answer `+` and `==` with their string form
        let prefer_string = hint == PrimitiveHint::String
            || (hint == PrimitiveHint::Default && container.kind() == ObjectKind::Date);
        let order: [&Arc<JsString>; 2] = if prefer_string {
            [&well_known::TO_STRING, &well_known::VALUE_OF]
        } else {
            [&well_known::VALUE_OF, &well_known::TO_STRING]
        };
        for name in order {
            let method = self.get_property(value, name)?;
            if method.is_callable() {
                let result = self.call_value(&method, value.clone(), &[])?;
                if result.is_primitive() {
                    return Ok(result);
                }
            }
        }
        Err(VmError::type_error(
            "Cannot convert object to primitive value",
        ))
    }

    /// ToNumber
    pub(crate) fn to_number_value(&mut self, value: &Value) -> VmResult<f64> {
        if let Some(n) = value.as_number() {
            return Ok(n);
        }
        if value.is_undefined() {
            return Ok(f64::NAN);
        }
        if value.is_null() {
            return Ok(0.0);
        }
        if let Some(b) = value.as_boolean() {
            return Ok(if b { 1.0 } else { 0.0 });
        }
        if let Some(s) = value.as_string() {
            return Ok(string_to_number(s.as_str()));
        }
        let primitive = self.to_primitive(value, PrimitiveHint::Number)?;
        if primitive.is_primitive() {
            self.to_number_value(&primitive)
        } else {
            Err(VmError::type_error("Cannot convert value to a number"))
        }
    }

    /// ToString
    pub(crate) fn to_string_value(&mut self, value: &Value) -> VmResult<Arc<JsString>> {
        if let Some(s) = value.as_string() {
            return Ok(s.clone());
        }
        if let Some(n) = value.as_number() {
            return Ok(JsString::intern(&number_to_string(n)));
        }
        if value.is_undefined() {
            return Ok(well_known::UNDEFINED.clone());
        }
        if value.is_null() {
            return Ok(well_known::NULL.clone());
        }
        if let Some(b) = value.as_boolean() {
            return Ok(if b {
                well_known::TRUE.clone()
            } else {
                well_known::FALSE.clone()
            });
        }
        let primitive = self.to_primitive(value, PrimitiveHint::String)?;
        if primitive.is_primitive() {
            self.to_string_value(&primitive)
        } else {
            Err(VmError::type_error("Cannot convert value to a string"))
        }
    }

    /// `+` beyond the int32 fast path: numeric add or string concatenation
    pub(crate) fn add_values(&mut self, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return Ok(Value::number(a + b));
        }
        if let (Some(a), Some(b)) = (lhs.as_string(), rhs.as_string()) {
            return Ok(Value::string(a.concat(b)));
        }
        let lp = self.to_primitive(lhs, PrimitiveHint::Default)?;
        let rp = self.to_primitive(rhs, PrimitiveHint::Default)?;
        if lp.is_string() || rp.is_string() {
            let ls = self.to_string_value(&lp)?;
            let rs = self.to_string_value(&rp)?;
            Ok(Value::string(ls.concat(&rs)))
        } else {
            let a = self.to_number_value(&lp)?;
            let b = self.to_number_value(&rp)?;
            Ok(Value::number(a + b))
        }
    }

    /// `%` beyond the positive-int32 fast path, with the IEEE edge cases
    pub(crate) fn mod_values(&mut self, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        let a = self.to_number_value(lhs)?;
        let b = self.to_number_value(rhs)?;
        if a.is_nan() || b.is_nan() || a.is_infinite() || b == 0.0 {
            return Ok(Value::double(f64::NAN));
        }
        if b.is_infinite() || a == 0.0 {
            // result is the dividend, sign of zero included
            return Ok(Value::double(a));
        }
        Ok(Value::number(a % b))
    }

    /// Abstract equality (`==`)
    pub(crate) fn abstract_equals(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        if lhs.is_number() && rhs.is_number() {
            return Ok(lhs.as_number() == rhs.as_number());
        }
        if lhs.is_string() && rhs.is_string() {
            return Ok(lhs.as_string() == rhs.as_string());
        }
        if let Some(b) = lhs.as_boolean() {
            return self.abstract_equals(&Value::int32(b as i32), rhs);
        }
        if let Some(b) = rhs.as_boolean() {
            return self.abstract_equals(lhs, &Value::int32(b as i32));
        }
        if lhs.is_nullish() && rhs.is_nullish() {
            return Ok(true);
        }
        if lhs.is_nullish() || rhs.is_nullish() {
            return Ok(false);
        }
        if lhs.is_number() && rhs.is_string() {
            let n = string_to_number(rhs.as_string().map(|s| s.as_str()).unwrap_or(""));
            return Ok(lhs.as_number() == Some(n));
        }
        if lhs.is_string() && rhs.is_number() {
            let n = string_to_number(lhs.as_string().map(|s| s.as_str()).unwrap_or(""));
            return Ok(Some(n) == rhs.as_number());
        }
        let l_is_object = self.property_container(lhs).is_some();
        let r_is_object = self.property_container(rhs).is_some();
        if l_is_object && !r_is_object && (rhs.is_number() || rhs.is_string()) {
            let lp = self.to_primitive(lhs, PrimitiveHint::Default)?;
            return self.abstract_equals(&lp, rhs);
        }
        if r_is_object && !l_is_object && (lhs.is_number() || lhs.is_string()) {
            let rp = self.to_primitive(rhs, PrimitiveHint::Default)?;
            return self.abstract_equals(lhs, &rp);
        }
        Ok(lhs.strict_equals(rhs))
    }

    /// Abstract relational comparison: is `lhs < rhs`?
    ///
    /// `left_first` fixes the toPrimitive evaluation order; the swapped
    /// operators (`>`, `<=`) pass false. None means NaN was involved and the
    /// comparison is undefined (every operator then yields false).
    pub(crate) fn abstract_compare(
        &mut self,
        lhs: &Value,
        rhs: &Value,
        left_first: bool,
    ) -> VmResult<Option<bool>> {
        let (lp, rp);
        if left_first {
            lp = self.to_primitive(lhs, PrimitiveHint::Number)?;
            rp = self.to_primitive(rhs, PrimitiveHint::Number)?;
        } else {
            rp = self.to_primitive(rhs, PrimitiveHint::Number)?;
            lp = self.to_primitive(lhs, PrimitiveHint::Number)?;
        }
        if let (Some(a), Some(b)) = (lp.as_string(), rp.as_string()) {
            // code-unit comparison, never numeric
            return Ok(Some(a < b));
        }
        let a = self.to_number_value(&lp)?;
        let b = self.to_number_value(&rp)?;
        if a.is_nan() || b.is_nan() {
            Ok(None)
        } else {
            Ok(Some(a < b))
        }
    }

    /// `instanceof`: walk the prototype chain for the target's `prototype`
    pub(crate) fn instance_of(&mut self, value: &Value, target: &Value) -> VmResult<bool> {
        if !target.is_callable() {
            return Err(VmError::type_error(
                "Right-hand side of 'instanceof' is not callable",
            ));
        }
        let proto_value = self.get_property(target, &well_known::PROTOTYPE)?;
        let Some(proto) = proto_value.as_object().cloned() else {
            return Err(VmError::type_error(
                "Function has non-object prototype in instanceof check",
            ));
        };
        let Some(mut cursor) = self.property_container(value) else {
            return Ok(false);
        };
        loop {
            match cursor.prototype() {
                Some(parent) => {
                    if Arc::ptr_eq(&parent, &proto) {
                        return Ok(true);
                    }
                    cursor = parent;
                }
                None => return Ok(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("  42  "), 42.0);
        assert_eq!(string_to_number("-1.5e2"), -150.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number("Infinity"), f64::INFINITY);
        assert!(string_to_number("abc").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("NaN").is_nan());
        assert!(string_to_number("1 2").is_nan());
    }
}
