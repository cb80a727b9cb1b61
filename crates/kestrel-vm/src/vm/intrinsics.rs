//! Intrinsic method dispatch for built-in receiver types.
//!
//! `InstanceCall` resolves object fields first; what is left falls through
//! to this registry, keyed by receiver type and method name. This is how
//! arrays get `add`/`len`/`getEnumerator` and objects get their prototype
//! and lock controls without polluting every instance.

use crate::error::VmError;
use crate::object::{FieldKey, ObjectData};
use crate::value::{ArrayRef, Value};
use crate::vm::VM;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Type discriminant for intrinsic method lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDiscriminant {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Function,
}

impl TypeDiscriminant {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(_) => Some(TypeDiscriminant::Object),
            Value::Array(_) => Some(TypeDiscriminant::Array),
            Value::String(_) => Some(TypeDiscriminant::String),
            Value::Number(_) => Some(TypeDiscriminant::Number),
            Value::Boolean(_) => Some(TypeDiscriminant::Boolean),
            Value::Function(_) => Some(TypeDiscriminant::Function),
            Value::Undefined | Value::Null => None,
        }
    }
}

/// Intrinsic method signature: VM, receiver, arguments.
pub type IntrinsicFn = fn(&mut VM, &Value, &[Value]) -> Result<Value, VmError>;

/// Registry of intrinsic methods.
pub struct IntrinsicRegistry {
    methods: HashMap<(TypeDiscriminant, String), IntrinsicFn>,
}

impl IntrinsicRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            methods: HashMap::new(),
        };
        registry.register(TypeDiscriminant::Array, "add", array_add);
        registry.register(TypeDiscriminant::Array, "len", array_len);
        registry.register(TypeDiscriminant::Array, "getEnumerator", array_get_enumerator);
        registry.register(TypeDiscriminant::String, "len", string_len);
        registry.register(TypeDiscriminant::Object, "setPrototype", object_set_prototype);
        registry.register(TypeDiscriminant::Object, "getPrototype", object_get_prototype);
        registry.register(TypeDiscriminant::Object, "lock", object_lock);
        registry.register(TypeDiscriminant::Object, "keys", object_keys);
        registry
    }

    pub fn register(
        &mut self,
        disc: TypeDiscriminant,
        method_name: impl Into<String>,
        func: IntrinsicFn,
    ) {
        self.methods.insert((disc, method_name.into()), func);
    }

    pub fn lookup(&self, disc: &TypeDiscriminant, method_name: &str) -> Option<IntrinsicFn> {
        self.methods
            .get(&(disc.clone(), method_name.to_string()))
            .copied()
    }
}

impl Default for IntrinsicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Arrays =====

fn expect_array(receiver: &Value) -> Result<&ArrayRef, VmError> {
    match receiver {
        Value::Array(arr) => Ok(arr),
        other => Err(VmError::Type {
            operation: "array method".to_string(),
            expected: "array".to_string(),
            got: other.type_name().to_string(),
        }),
    }
}

fn array_add(_vm: &mut VM, receiver: &Value, args: &[Value]) -> Result<Value, VmError> {
    let arr = expect_array(receiver)?;
    arr.borrow_mut()
        .extend(args.iter().cloned());
    Ok(Value::Undefined)
}

fn array_len(_vm: &mut VM, receiver: &Value, _args: &[Value]) -> Result<Value, VmError> {
    let arr = expect_array(receiver)?;
    let len = arr.borrow().len();
    Ok(Value::Number(len as f64))
}

/// Cursor over an array for the foreach protocol.
#[derive(Debug)]
struct ArrayCursor {
    array: ArrayRef,
    index: usize,
    current: Value,
}

fn array_get_enumerator(vm: &mut VM, receiver: &Value, _args: &[Value]) -> Result<Value, VmError> {
    let arr = expect_array(receiver)?;
    let cursor = Rc::new(RefCell::new(ArrayCursor {
        array: arr.clone(),
        index: 0,
        current: Value::Undefined,
    }));
    let mut obj = ObjectData::new();
    obj.set_prototype(Some(vm.enumerator_proto()));
    obj.set_user_data(cursor);
    Ok(Value::object(obj))
}

fn receiver_cursor(args: &[Value]) -> Result<Rc<RefCell<ArrayCursor>>, VmError> {
    args.first()
        .and_then(|v| v.as_object())
        .and_then(|obj| obj.borrow().user_data())
        .and_then(|data| data.downcast::<RefCell<ArrayCursor>>().ok())
        .ok_or_else(|| VmError::Runtime("receiver is not an array enumerator".to_string()))
}

/// Build the prototype shared by all array enumerators.
pub(crate) fn make_enumerator_proto() -> ObjectData {
    let mut proto = ObjectData::new();
    let entries: [(&str, fn(&mut VM, &[Value]) -> Result<Value, VmError>); 3] = [
        ("getEnumerator", enum_get_enumerator),
        ("moveNext", enum_move_next),
        ("current", enum_current),
    ];
    for (name, func) in entries {
        proto
            .set(FieldKey::str(name), Value::native(name, Box::new(func)))
            .expect("fresh prototype is unlocked");
    }
    proto
}

fn enum_get_enumerator(_vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    receiver_cursor(args)?;
    Ok(args[0].clone())
}

fn enum_move_next(_vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    let cursor = receiver_cursor(args)?;
    let mut cursor = cursor.borrow_mut();
    let next = {
        let array = cursor.array.borrow();
        array.get(cursor.index).cloned()
    };
    match next {
        Some(value) => {
            cursor.current = value;
            cursor.index += 1;
            Ok(Value::Boolean(true))
        }
        None => {
            cursor.current = Value::Undefined;
            Ok(Value::Boolean(false))
        }
    }
}

fn enum_current(_vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    let cursor = receiver_cursor(args)?;
    let current = cursor.borrow().current.clone();
    Ok(current)
}

// ===== Strings =====

fn string_len(_vm: &mut VM, receiver: &Value, _args: &[Value]) -> Result<Value, VmError> {
    match receiver {
        Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
        other => Err(VmError::Type {
            operation: "string method".to_string(),
            expected: "string".to_string(),
            got: other.type_name().to_string(),
        }),
    }
}

// ===== Objects =====

fn expect_object(receiver: &Value) -> Result<&crate::object::ObjectRef, VmError> {
    receiver.as_object().ok_or_else(|| VmError::Type {
        operation: "object method".to_string(),
        expected: "object".to_string(),
        got: receiver.type_name().to_string(),
    })
}

fn object_set_prototype(_vm: &mut VM, receiver: &Value, args: &[Value]) -> Result<Value, VmError> {
    let obj = expect_object(receiver)?;
    match args.first() {
        Some(Value::Object(proto)) => {
            obj.borrow_mut().set_prototype(Some(proto.clone()));
            Ok(Value::Undefined)
        }
        Some(Value::Null) | None => {
            obj.borrow_mut().set_prototype(None);
            Ok(Value::Undefined)
        }
        Some(other) => Err(VmError::Type {
            operation: "setPrototype".to_string(),
            expected: "object or null".to_string(),
            got: other.type_name().to_string(),
        }),
    }
}

fn object_get_prototype(_vm: &mut VM, receiver: &Value, _args: &[Value]) -> Result<Value, VmError> {
    let obj = expect_object(receiver)?;
    let proto = obj.borrow().prototype();
    Ok(match proto {
        Some(proto) => Value::Object(proto),
        None => Value::Null,
    })
}

fn object_lock(_vm: &mut VM, receiver: &Value, _args: &[Value]) -> Result<Value, VmError> {
    let obj = expect_object(receiver)?;
    obj.borrow_mut().lock();
    Ok(Value::Undefined)
}

/// Own keys, in insertion order.
fn object_keys(_vm: &mut VM, receiver: &Value, _args: &[Value]) -> Result<Value, VmError> {
    let obj = expect_object(receiver)?;
    let keys: Vec<Value> = obj.borrow().iter().map(|(k, _)| k.to_value()).collect();
    Ok(Value::array(keys))
}
