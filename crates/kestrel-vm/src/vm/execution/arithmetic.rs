//! Arithmetic, logical and bitwise instructions.

use crate::error::VmError;
use crate::object::MetaMethod;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::ops::{shl, shr};
use crate::vm::result::ExecutionResult;
use crate::vm::VM;

impl VM {
    pub(crate) fn execute_arithmetic(
        &mut self,
        opcode: OpCode,
    ) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::Neg => {
                let v = self.pop()?;
                let result = self.op_neg(v)?;
                self.push(result)?;
            }
            OpCode::Not => {
                let v = self.pop()?;
                self.push(Value::Boolean(!v.is_truthy()))?;
            }
            OpCode::BitNot => {
                let v = self.pop()?;
                let result = self.op_bitnot(v)?;
                self.push(result)?;
            }
            _ => {
                let r = self.pop()?;
                let l = self.pop()?;
                let result = match opcode {
                    OpCode::Add => self.op_add(l, r)?,
                    OpCode::Sub => {
                        self.op_arith(MetaMethod::Sub, "subtraction", l, r, |a, b| a - b)?
                    }
                    OpCode::Mul => {
                        self.op_arith(MetaMethod::Mul, "multiplication", l, r, |a, b| a * b)?
                    }
                    // IEEE-754: division by zero is an infinity, 0/0 is NaN.
                    OpCode::Div => self.op_arith(MetaMethod::Div, "division", l, r, |a, b| a / b)?,
                    OpCode::Mod => self.op_arith(MetaMethod::Mod, "modulo", l, r, |a, b| a % b)?,
                    OpCode::Exp => {
                        self.op_arith(MetaMethod::Exp, "exponentiation", l, r, f64::powf)?
                    }
                    OpCode::BitLShift => self.op_bitwise("left shift", l, r, shl)?,
                    OpCode::BitRShift => self.op_bitwise("right shift", l, r, shr)?,
                    OpCode::BitAnd => self.op_bitwise("bitwise and", l, r, |a, b| a & b)?,
                    OpCode::BitOr => self.op_bitwise("bitwise or", l, r, |a, b| a | b)?,
                    OpCode::BitXor => self.op_bitwise("bitwise xor", l, r, |a, b| a ^ b)?,
                    _ => unreachable!("non-arithmetic opcode in arithmetic handler"),
                };
                self.push(result)?;
            }
        }
        Ok(ExecutionResult::Continue)
    }
}
