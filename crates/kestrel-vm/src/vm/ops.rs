//! Value operation helpers with meta-method dispatch.
//!
//! Primitive semantics are IEEE-754 doubles; `Add` is overloaded for string
//! concatenation when either operand is a string. Operators applied to
//! objects dispatch the corresponding `__`-named meta-method from the
//! prototype chain; everything else is a type error.

use crate::error::VmError;
use crate::object::{self, MetaMethod};
use crate::value::{to_int32, Value};
use crate::vm::VM;
use std::cmp::Ordering;

fn type_error(operation: &str, expected: &str, got: String) -> VmError {
    VmError::Type {
        operation: operation.to_string(),
        expected: expected.to_string(),
        got,
    }
}

fn pair(l: &Value, r: &Value) -> String {
    format!("{} and {}", l.type_name(), r.type_name())
}

impl VM {
    /// Dispatch a binary meta-method from either operand's prototype chain.
    fn try_binary_meta(
        &mut self,
        meta: MetaMethod,
        l: &Value,
        r: &Value,
    ) -> Result<Option<Value>, VmError> {
        for side in [l, r] {
            if let Value::Object(obj) = side {
                if let Some(handler) = object::find_meta(obj, meta) {
                    let result = self.call_value(&handler, &[l.clone(), r.clone()])?;
                    return Ok(Some(result));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn op_add(&mut self, l: Value, r: Value) -> Result<Value, VmError> {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            // String concatenation with numeric-to-string coercion.
            (Value::String(a), other) => Ok(Value::string(format!("{}{}", a, other))),
            (other, Value::String(b)) => Ok(Value::string(format!("{}{}", other, b))),
            _ => match self.try_binary_meta(MetaMethod::Add, &l, &r)? {
                Some(result) => Ok(result),
                None => Err(type_error("addition", "number or string", pair(&l, &r))),
            },
        }
    }

    pub(crate) fn op_arith(
        &mut self,
        meta: MetaMethod,
        operation: &'static str,
        l: Value,
        r: Value,
        f: fn(f64, f64) -> f64,
    ) -> Result<Value, VmError> {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(*a, *b))),
            _ => match self.try_binary_meta(meta, &l, &r)? {
                Some(result) => Ok(result),
                None => Err(type_error(operation, "number", pair(&l, &r))),
            },
        }
    }

    pub(crate) fn op_neg(&mut self, v: Value) -> Result<Value, VmError> {
        match &v {
            Value::Number(n) => Ok(Value::Number(-n)),
            Value::Object(obj) => {
                if let Some(handler) = object::find_meta(obj, MetaMethod::Neg) {
                    self.call_value(&handler, &[v.clone()])
                } else {
                    Err(type_error("negation", "number", v.type_name().to_string()))
                }
            }
            _ => Err(type_error("negation", "number", v.type_name().to_string())),
        }
    }

    /// Equality: value-wise for primitives, identity-wise for reference
    /// types, `__eq` for objects that define it. Total (never a type error).
    pub(crate) fn op_eq(&mut self, l: Value, r: Value) -> Result<bool, VmError> {
        if matches!(&l, Value::Object(_)) || matches!(&r, Value::Object(_)) {
            if let Some(result) = self.try_binary_meta(MetaMethod::Eq, &l, &r)? {
                return Ok(result.is_truthy());
            }
        }
        Ok(l == r)
    }

    /// Ordering on numbers and strings; `__lt`/`__lte` for objects (the
    /// strict/inclusive flip handles Gt/Gte via swapped operands).
    pub(crate) fn op_order(
        &mut self,
        l: Value,
        r: Value,
        strict: bool,
        f: fn(Ordering) -> bool,
    ) -> Result<bool, VmError> {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => {
                // NaN comparisons are false, matching double semantics.
                Ok(a.partial_cmp(b).map(f).unwrap_or(false))
            }
            (Value::String(a), Value::String(b)) => Ok(f(a.cmp(b))),
            _ => {
                let meta = if strict {
                    MetaMethod::Lt
                } else {
                    MetaMethod::Lte
                };
                match self.try_binary_meta(meta, &l, &r)? {
                    Some(result) => Ok(result.is_truthy()),
                    None => Err(type_error("comparison", "number or string", pair(&l, &r))),
                }
            }
        }
    }

    /// Bitwise operators coerce through 32-bit signed integers.
    pub(crate) fn op_bitwise(
        &mut self,
        operation: &'static str,
        l: Value,
        r: Value,
        f: fn(i32, i32) -> i32,
    ) -> Result<Value, VmError> {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => {
                Ok(Value::Number(f(to_int32(*a), to_int32(*b)) as f64))
            }
            _ => Err(type_error(operation, "number", pair(&l, &r))),
        }
    }

    pub(crate) fn op_bitnot(&mut self, v: Value) -> Result<Value, VmError> {
        match &v {
            Value::Number(n) => Ok(Value::Number(!to_int32(*n) as f64)),
            _ => Err(type_error(
                "bitwise not",
                "number",
                v.type_name().to_string(),
            )),
        }
    }
}

/// Shift-count masking shared by both shift operators.
pub(crate) fn shl(a: i32, b: i32) -> i32 {
    a << (b & 31)
}

pub(crate) fn shr(a: i32, b: i32) -> i32 {
    a >> (b & 31)
}
