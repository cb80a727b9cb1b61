//! Constructors, field access, indexing and slicing.

use crate::error::VmError;
use crate::object::{self, FieldKey, MetaMethod, ObjectData};
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::result::ExecutionResult;
use crate::vm::VM;

impl VM {
    pub(crate) fn execute_objects(&mut self, opcode: OpCode) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::NewObject => {
                self.push(Value::object(ObjectData::new()))?;
            }

            OpCode::NewArray => {
                let count = self.frame_mut()?.read_u32()? as usize;
                let mut items = vec![Value::Undefined; count];
                for slot in items.iter_mut().rev() {
                    *slot = self.pop()?;
                }
                self.push(Value::array(items))?;
            }

            OpCode::Slice => {
                let end = self.pop()?;
                let start = self.pop()?;
                let container = self.pop()?;
                let result = self.op_slice(container, start, end)?;
                self.push(result)?;
            }

            OpCode::LdFld => {
                let idx = self.frame_mut()?.read_u32()? as usize;
                let name = self.frame()?.image.string(idx)?;
                let target = self.pop()?;
                match target {
                    Value::Object(obj) => {
                        let value = object::lookup(&obj, &FieldKey::Str(name))
                            .unwrap_or(Value::Undefined);
                        self.push(value)?;
                    }
                    other => {
                        return Err(VmError::Type {
                            operation: "field access".to_string(),
                            expected: "object".to_string(),
                            got: other.type_name().to_string(),
                        })
                    }
                }
            }

            OpCode::StFld => {
                let idx = self.frame_mut()?.read_u32()? as usize;
                let name = self.frame()?.image.string(idx)?;
                let value = self.pop()?;
                let target = self.pop()?;
                match target {
                    Value::Object(obj) => {
                        obj.borrow_mut().set(FieldKey::Str(name), value)?;
                    }
                    other => {
                        return Err(VmError::Type {
                            operation: "field assignment".to_string(),
                            expected: "object".to_string(),
                            got: other.type_name().to_string(),
                        })
                    }
                }
            }

            OpCode::LdArr => {
                let index = self.pop()?;
                let container = self.pop()?;
                let value = self.op_index_get(container, index)?;
                self.push(value)?;
            }

            OpCode::StArr => {
                let value = self.pop()?;
                let index = self.pop()?;
                let container = self.pop()?;
                self.op_index_set(container, index, value)?;
            }

            OpCode::LdArrF => {
                let idx = self.frame_mut()?.read_u32()?;
                let container = self.pop()?;
                let value = self.op_index_get(container, Value::Number(idx as f64))?;
                self.push(value)?;
            }

            OpCode::StArrF => {
                let idx = self.frame_mut()?.read_u32()?;
                let value = self.pop()?;
                let container = self.pop()?;
                self.op_index_set(container, Value::Number(idx as f64), value)?;
            }

            _ => unreachable!("non-object opcode in object handler"),
        }
        Ok(ExecutionResult::Continue)
    }

    /// Indexed read: arrays and strings by number (out of range reads
    /// `Undefined`), objects by any key with `__getIndex` dispatch.
    fn op_index_get(&mut self, container: Value, index: Value) -> Result<Value, VmError> {
        match &container {
            Value::Array(arr) => {
                let Value::Number(n) = index else {
                    return Err(VmError::Type {
                        operation: "array index".to_string(),
                        expected: "number".to_string(),
                        got: index.type_name().to_string(),
                    });
                };
                let arr = arr.borrow();
                Ok(index_into(&arr, n).cloned().unwrap_or(Value::Undefined))
            }
            Value::String(s) => {
                let Value::Number(n) = index else {
                    return Err(VmError::Type {
                        operation: "string index".to_string(),
                        expected: "number".to_string(),
                        got: index.type_name().to_string(),
                    });
                };
                if n < 0.0 || n.fract() != 0.0 {
                    return Ok(Value::Undefined);
                }
                Ok(s.chars()
                    .nth(n as usize)
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Undefined))
            }
            Value::Object(obj) => {
                if let Some(handler) = object::find_meta(obj, MetaMethod::GetIndex) {
                    return self.call_value(&handler, &[container.clone(), index]);
                }
                Ok(match FieldKey::from_value(&index) {
                    Some(key) => object::lookup(obj, &key).unwrap_or(Value::Undefined),
                    None => Value::Undefined,
                })
            }
            other => Err(VmError::Type {
                operation: "indexing".to_string(),
                expected: "array, string or object".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }

    /// Indexed write. Array writes past the end extend the array, filling
    /// the gap with `Undefined`; negative indices are a runtime error.
    fn op_index_set(
        &mut self,
        container: Value,
        index: Value,
        value: Value,
    ) -> Result<(), VmError> {
        match &container {
            Value::Array(arr) => {
                let Value::Number(n) = index else {
                    return Err(VmError::Type {
                        operation: "array index".to_string(),
                        expected: "number".to_string(),
                        got: index.type_name().to_string(),
                    });
                };
                if n < 0.0 || n.fract() != 0.0 || !n.is_finite() {
                    return Err(VmError::Runtime(format!("invalid array index {}", n)));
                }
                let idx = n as usize;
                let mut arr = arr.borrow_mut();
                if idx >= arr.len() {
                    arr.resize(idx + 1, Value::Undefined);
                }
                arr[idx] = value;
                Ok(())
            }
            Value::Object(obj) => {
                if let Some(handler) = object::find_meta(obj, MetaMethod::SetIndex) {
                    self.call_value(&handler, &[container.clone(), index, value])?;
                    return Ok(());
                }
                let key = FieldKey::from_value(&index).ok_or_else(|| {
                    VmError::Runtime("null and undefined are not valid keys".to_string())
                })?;
                obj.borrow_mut().set(key, value)
            }
            other => Err(VmError::Type {
                operation: "indexed assignment".to_string(),
                expected: "array or object".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }

    /// Sub-range of an array or string. `Undefined` bounds default to the
    /// ends; out-of-range bounds clamp.
    fn op_slice(&mut self, container: Value, start: Value, end: Value) -> Result<Value, VmError> {
        fn bound(v: &Value, default: usize, len: usize) -> Result<usize, VmError> {
            match v {
                Value::Undefined => Ok(default),
                Value::Number(n) if *n >= 0.0 => Ok((*n as usize).min(len)),
                Value::Number(_) => Ok(0),
                other => Err(VmError::Type {
                    operation: "slice bound".to_string(),
                    expected: "number".to_string(),
                    got: other.type_name().to_string(),
                }),
            }
        }

        match &container {
            Value::Array(arr) => {
                let arr = arr.borrow();
                let from = bound(&start, 0, arr.len())?;
                let to = bound(&end, arr.len(), arr.len())?;
                let items = if from < to {
                    arr[from..to].to_vec()
                } else {
                    Vec::new()
                };
                Ok(Value::array(items))
            }
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let from = bound(&start, 0, chars.len())?;
                let to = bound(&end, chars.len(), chars.len())?;
                let slice: String = if from < to {
                    chars[from..to].iter().collect()
                } else {
                    String::new()
                };
                Ok(Value::string(slice))
            }
            other => Err(VmError::Type {
                operation: "slice".to_string(),
                expected: "array or string".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }
}

fn index_into(arr: &[Value], n: f64) -> Option<&Value> {
    if n < 0.0 || n.fract() != 0.0 || !n.is_finite() {
        return None;
    }
    arr.get(n as usize)
}
