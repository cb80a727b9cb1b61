//! Stack shuffling, constants, globals, locals, arguments and upvalues.

use crate::error::VmError;
use crate::object::{self, FieldKey};
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::result::ExecutionResult;
use crate::vm::VM;

impl VM {
    pub(crate) fn execute_variables(
        &mut self,
        opcode: OpCode,
    ) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::Dup => {
                let top = self.frame()?.eval.peek()?.clone();
                self.push(top)?;
            }

            OpCode::Dup2 => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(a.clone())?;
                self.push(b.clone())?;
                self.push(a)?;
                self.push(b)?;
            }

            OpCode::Drop => {
                self.pop()?;
            }

            OpCode::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }

            OpCode::Swap1For2 => {
                // a b c -> c a b
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(c)?;
                self.push(a)?;
                self.push(b)?;
            }

            OpCode::LdUndef => self.push(Value::Undefined)?,
            OpCode::LdNull => self.push(Value::Null)?,
            OpCode::LdTrue => self.push(Value::Boolean(true))?,
            OpCode::LdFalse => self.push(Value::Boolean(false))?,

            OpCode::LdNum => {
                let idx = self.frame_mut()?.read_u32()? as usize;
                let n = self.frame()?.image.number(idx)?;
                self.push(Value::Number(n))?;
            }

            OpCode::LdStr => {
                let idx = self.frame_mut()?.read_u32()? as usize;
                let s = self.frame()?.image.string(idx)?;
                self.push(Value::String(s))?;
            }

            OpCode::LdGlobal => {
                let globals = self.globals();
                self.push(Value::Object(globals))?;
            }

            OpCode::LdGlobalFld => {
                let idx = self.frame_mut()?.read_u32()? as usize;
                let name = self.frame()?.image.string(idx)?;
                let value = object::lookup(&self.globals(), &FieldKey::Str(name))
                    .unwrap_or(Value::Undefined);
                self.push(value)?;
            }

            OpCode::LdLocF => {
                let slot = self.frame_mut()?.read_u16()?;
                let value = self.frame()?.get_local(slot)?;
                self.push(value)?;
            }

            OpCode::StLocF => {
                let slot = self.frame_mut()?.read_u16()?;
                let value = self.pop()?;
                self.frame_mut()?.set_local(slot, value)?;
            }

            OpCode::LdArgF => {
                let idx = self.frame_mut()?.read_u16()?;
                let frame = self.frame()?;
                if idx >= frame.descriptor().num_args {
                    return Err(VmError::Runtime(format!("invalid argument slot {}", idx)));
                }
                let value = frame.args[idx as usize].clone();
                self.push(value)?;
            }

            OpCode::StArgF => {
                let idx = self.frame_mut()?.read_u16()?;
                let value = self.pop()?;
                let frame = self.frame_mut()?;
                if idx >= frame.descriptor().num_args {
                    return Err(VmError::Runtime(format!("invalid argument slot {}", idx)));
                }
                frame.args[idx as usize] = value;
            }

            OpCode::IncF | OpCode::DecF => {
                let slot = self.frame_mut()?.read_u16()?;
                let value = self.frame()?.get_local(slot)?;
                let Value::Number(n) = value else {
                    return Err(VmError::Type {
                        operation: "increment".to_string(),
                        expected: "number".to_string(),
                        got: value.type_name().to_string(),
                    });
                };
                let next = if opcode == OpCode::IncF { n + 1.0 } else { n - 1.0 };
                self.frame_mut()?.set_local(slot, Value::Number(next))?;
            }

            OpCode::CloseLoc => {
                let slot = self.frame_mut()?.read_u16()?;
                self.frame_mut()?.close_local(slot)?;
            }

            OpCode::LdUp => {
                let frame = self.frame()?;
                let closure =
                    Value::closure(frame.image.clone(), frame.func, frame.upvalues.clone());
                self.push(closure)?;
            }

            OpCode::LdUpValue => {
                let idx = self.frame_mut()?.read_u16()? as usize;
                let frame = self.frame()?;
                let cell = frame
                    .upvalues
                    .get(idx)
                    .ok_or_else(|| VmError::Runtime(format!("invalid upvalue slot {}", idx)))?;
                let value = cell.borrow().clone();
                self.push(value)?;
            }

            OpCode::StUpValue => {
                let idx = self.frame_mut()?.read_u16()? as usize;
                let value = self.pop()?;
                let frame = self.frame()?;
                let cell = frame
                    .upvalues
                    .get(idx)
                    .ok_or_else(|| VmError::Runtime(format!("invalid upvalue slot {}", idx)))?;
                *cell.borrow_mut() = value;
            }

            _ => unreachable!("non-variable opcode in variable handler"),
        }
        Ok(ExecutionResult::Continue)
    }
}
