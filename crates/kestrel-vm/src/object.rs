//! Prototype-based object model.
//!
//! Objects are insertion-ordered key/value containers with an optional
//! prototype link, a lock flag, an opaque user-data slot for host embedding,
//! and a per-object operator table so meta-method dispatch walks the
//! prototype chain over enum-tagged slots instead of string lookups.

use crate::error::VmError;
use crate::value::{ArrayRef, FunctionValue, Value};
use indexmap::IndexMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Shared reference to an object.
pub type ObjectRef = Rc<RefCell<ObjectData>>;

/// Object key: any non-null, non-undefined value. Primitives hash by
/// payload, reference types by pointer identity.
#[derive(Clone)]
pub enum FieldKey {
    Bool(bool),
    /// IEEE-754 bit pattern of the number.
    Number(u64),
    Str(Rc<str>),
    Object(ObjectRef),
    Array(ArrayRef),
    Function(FunctionValue),
}

impl FieldKey {
    /// Wrap a value as a key. `Undefined` and `Null` are not valid keys.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Undefined | Value::Null => None,
            Value::Boolean(b) => Some(FieldKey::Bool(*b)),
            Value::Number(n) => Some(FieldKey::Number(n.to_bits())),
            Value::String(s) => Some(FieldKey::Str(s.clone())),
            Value::Object(o) => Some(FieldKey::Object(o.clone())),
            Value::Array(a) => Some(FieldKey::Array(a.clone())),
            Value::Function(f) => Some(FieldKey::Function(f.clone())),
        }
    }

    pub fn str(s: impl Into<Rc<str>>) -> Self {
        FieldKey::Str(s.into())
    }

    pub fn to_value(&self) -> Value {
        match self {
            FieldKey::Bool(b) => Value::Boolean(*b),
            FieldKey::Number(bits) => Value::Number(f64::from_bits(*bits)),
            FieldKey::Str(s) => Value::String(s.clone()),
            FieldKey::Object(o) => Value::Object(o.clone()),
            FieldKey::Array(a) => Value::Array(a.clone()),
            FieldKey::Function(f) => Value::Function(f.clone()),
        }
    }

    fn identity(&self) -> usize {
        match self {
            FieldKey::Object(o) => Rc::as_ptr(o) as *const () as usize,
            FieldKey::Array(a) => Rc::as_ptr(a) as *const () as usize,
            FieldKey::Function(FunctionValue::Native(n)) => Rc::as_ptr(n) as *const () as usize,
            FieldKey::Function(FunctionValue::Closure(c)) => Rc::as_ptr(c) as *const () as usize,
            _ => 0,
        }
    }
}

impl PartialEq for FieldKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldKey::Bool(a), FieldKey::Bool(b)) => a == b,
            (FieldKey::Number(a), FieldKey::Number(b)) => a == b,
            (FieldKey::Str(a), FieldKey::Str(b)) => a == b,
            (FieldKey::Object(a), FieldKey::Object(b)) => Rc::ptr_eq(a, b),
            (FieldKey::Array(a), FieldKey::Array(b)) => Rc::ptr_eq(a, b),
            (FieldKey::Function(a), FieldKey::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for FieldKey {}

impl Hash for FieldKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            FieldKey::Bool(b) => b.hash(state),
            FieldKey::Number(bits) => bits.hash(state),
            FieldKey::Str(s) => s.hash(state),
            _ => self.identity().hash(state),
        }
    }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Bool(b) => write!(f, "{}", b),
            FieldKey::Number(bits) => write!(f, "{}", f64::from_bits(*bits)),
            FieldKey::Str(s) => write!(f, "{:?}", s),
            FieldKey::Object(_) => write!(f, "<object key>"),
            FieldKey::Array(_) => write!(f, "<array key>"),
            FieldKey::Function(_) => write!(f, "<function key>"),
        }
    }
}

/// Operator tags with a conventional meta-method name in the prototype chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum MetaMethod {
    Add = 0,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Neg,
    Eq,
    Lt,
    Lte,
    GetIndex,
    SetIndex,
    Call,
}

pub const META_METHOD_COUNT: usize = 13;

impl MetaMethod {
    pub fn name(self) -> &'static str {
        match self {
            MetaMethod::Add => "__add",
            MetaMethod::Sub => "__sub",
            MetaMethod::Mul => "__mul",
            MetaMethod::Div => "__div",
            MetaMethod::Mod => "__mod",
            MetaMethod::Exp => "__exp",
            MetaMethod::Neg => "__neg",
            MetaMethod::Eq => "__eq",
            MetaMethod::Lt => "__lt",
            MetaMethod::Lte => "__lte",
            MetaMethod::GetIndex => "__getIndex",
            MetaMethod::SetIndex => "__setIndex",
            MetaMethod::Call => "__call",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "__add" => MetaMethod::Add,
            "__sub" => MetaMethod::Sub,
            "__mul" => MetaMethod::Mul,
            "__div" => MetaMethod::Div,
            "__mod" => MetaMethod::Mod,
            "__exp" => MetaMethod::Exp,
            "__neg" => MetaMethod::Neg,
            "__eq" => MetaMethod::Eq,
            "__lt" => MetaMethod::Lt,
            "__lte" => MetaMethod::Lte,
            "__getIndex" => MetaMethod::GetIndex,
            "__setIndex" => MetaMethod::SetIndex,
            "__call" => MetaMethod::Call,
            _ => return None,
        })
    }
}

/// Object payload.
pub struct ObjectData {
    entries: IndexMap<FieldKey, Value>,
    prototype: Option<ObjectRef>,
    locked: bool,
    user_data: Option<Rc<dyn Any>>,
    /// The object's own meta-methods, mirrored from its `__`-named entries.
    meta: Option<Box<[Option<Value>; META_METHOD_COUNT]>>,
}

impl ObjectData {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            prototype: None,
            locked: false,
            user_data: None,
            meta: None,
        }
    }

    pub fn into_ref(self) -> ObjectRef {
        Rc::new(RefCell::new(self))
    }

    /// Own-entry lookup, no prototype walk.
    pub fn get_own(&self, key: &FieldKey) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    /// Set or update a field. Adding a new key to a locked object fails;
    /// updating an existing key stays legal.
    pub fn set(&mut self, key: FieldKey, value: Value) -> Result<(), VmError> {
        if self.locked && !self.entries.contains_key(&key) {
            return Err(VmError::Runtime(
                "cannot add field to locked object".to_string(),
            ));
        }
        if let FieldKey::Str(name) = &key {
            if let Some(meta) = MetaMethod::from_name(name) {
                self.meta_mut()[meta as usize] = Some(value.clone());
            }
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &FieldKey) -> Option<Value> {
        if let FieldKey::Str(name) = key {
            if let Some(meta) = MetaMethod::from_name(name) {
                if let Some(table) = &mut self.meta {
                    table[meta as usize] = None;
                }
            }
        }
        self.entries.shift_remove(key)
    }

    pub fn contains_own(&self, key: &FieldKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn prototype(&self) -> Option<ObjectRef> {
        self.prototype.clone()
    }

    pub fn set_prototype(&mut self, prototype: Option<ObjectRef>) {
        self.prototype = prototype;
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn user_data(&self) -> Option<Rc<dyn Any>> {
        self.user_data.clone()
    }

    pub fn set_user_data(&mut self, data: Rc<dyn Any>) {
        self.user_data = Some(data);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insertion-ordered iteration over own entries.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &Value)> {
        self.entries.iter()
    }

    fn own_meta(&self, meta: MetaMethod) -> Option<Value> {
        self.meta
            .as_ref()
            .and_then(|table| table[meta as usize].clone())
    }

    fn meta_mut(&mut self) -> &mut [Option<Value>; META_METHOD_COUNT] {
        self.meta
            .get_or_insert_with(|| Box::new(std::array::from_fn(|_| None)))
    }
}

impl Default for ObjectData {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectData {
    // Shallow on purpose: prototype chains and entries may form cycles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectData")
            .field("fields", &self.entries.len())
            .field("locked", &self.locked)
            .field("has_prototype", &self.prototype.is_some())
            .finish()
    }
}

/// Field lookup along the prototype chain. Missing keys read as `None`
/// (the VM maps that to `Undefined`).
pub fn lookup(obj: &ObjectRef, key: &FieldKey) -> Option<Value> {
    let mut current = obj.clone();
    loop {
        let next = {
            let data = current.borrow();
            if let Some(value) = data.get_own(key) {
                return Some(value);
            }
            data.prototype()
        };
        match next {
            Some(proto) => current = proto,
            None => return None,
        }
    }
}

/// Key presence along the prototype chain (the `In` operator on objects).
pub fn contains(obj: &ObjectRef, key: &FieldKey) -> bool {
    lookup(obj, key).is_some()
}

/// Meta-method lookup along the prototype chain, tag-indexed at every level.
pub fn find_meta(obj: &ObjectRef, meta: MetaMethod) -> Option<Value> {
    let mut current = obj.clone();
    loop {
        let next = {
            let data = current.borrow();
            if let Some(value) = data.own_meta(meta) {
                return Some(value);
            }
            data.prototype()
        };
        match next {
            Some(proto) => current = proto,
            None => return None,
        }
    }
}
