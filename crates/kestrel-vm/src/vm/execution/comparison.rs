//! Comparison and membership instructions.

use crate::error::VmError;
use crate::object::{self, FieldKey};
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::result::ExecutionResult;
use crate::vm::VM;
use std::cmp::Ordering;

impl VM {
    pub(crate) fn execute_comparison(
        &mut self,
        opcode: OpCode,
    ) -> Result<ExecutionResult, VmError> {
        let r = self.pop()?;
        let l = self.pop()?;
        let result = match opcode {
            OpCode::Eq => self.op_eq(l, r)?,
            OpCode::Neq => !self.op_eq(l, r)?,
            OpCode::Lt => self.op_order(l, r, true, |o| o == Ordering::Less)?,
            OpCode::Lte => self.op_order(l, r, false, |o| o != Ordering::Greater)?,
            // Gt/Gte dispatch __lt/__lte with swapped operands.
            OpCode::Gt => self.op_order(r, l, true, |o| o == Ordering::Less)?,
            OpCode::Gte => self.op_order(r, l, false, |o| o != Ordering::Greater)?,
            OpCode::In => self.op_in(&l, &r)?,
            OpCode::NotIn => !self.op_in(&l, &r)?,
            _ => unreachable!("non-comparison opcode in comparison handler"),
        };
        self.push(Value::Boolean(result))?;
        Ok(ExecutionResult::Continue)
    }

    /// Key lookup along the prototype chain for objects, linear value
    /// search for arrays.
    fn op_in(&mut self, key: &Value, container: &Value) -> Result<bool, VmError> {
        match container {
            Value::Object(obj) => Ok(match FieldKey::from_value(key) {
                Some(key) => object::contains(obj, &key),
                None => false,
            }),
            Value::Array(arr) => {
                let arr = arr.borrow();
                Ok(arr.iter().any(|v| v == key))
            }
            other => Err(VmError::Type {
                operation: "membership test".to_string(),
                expected: "object or array".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }
}
