//! Control flow, throw and debug instructions.

use crate::error::VmError;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::result::ExecutionResult;
use crate::vm::VM;

impl VM {
    pub(crate) fn execute_control(&mut self, opcode: OpCode) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::Jmp => {
                let target = self.frame_mut()?.read_u32()?;
                self.frame_mut()?.ip = target as usize;
            }

            OpCode::JmpTrue | OpCode::JmpFalse => {
                let target = self.frame_mut()?.read_u32()?;
                let cond = self.pop()?;
                let jump = cond.is_truthy() == (opcode == OpCode::JmpTrue);
                if jump {
                    self.frame_mut()?.ip = target as usize;
                }
            }

            // Peek variants leave the deciding value for short-circuit
            // operators.
            OpCode::JmpTrueP | OpCode::JmpFalseP => {
                let target = self.frame_mut()?.read_u32()?;
                let truthy = self.frame()?.eval.peek()?.is_truthy();
                if truthy == (opcode == OpCode::JmpTrueP) {
                    self.frame_mut()?.ip = target as usize;
                }
            }

            OpCode::JmpTable => {
                let frame = self.frame_mut()?;
                let base = frame.read_i32()?;
                let count = frame.read_u32()? as usize;
                let default = frame.read_u32()?;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(frame.read_u32()?);
                }
                let subject = self.pop()?;
                let target = match subject {
                    Value::Number(n) if n.fract() == 0.0 && n.is_finite() => {
                        let idx = n as i64 - base as i64;
                        if (0..count as i64).contains(&idx) {
                            targets[idx as usize]
                        } else {
                            default
                        }
                    }
                    _ => default,
                };
                self.frame_mut()?.ip = target as usize;
            }

            OpCode::Throw => {
                let value = self.pop()?;
                return Ok(ExecutionResult::Exception(value));
            }

            OpCode::Breakpoint => {
                let at = self.frame()?.op_ip;
                if let Some(debugger) = self.debugger_mut() {
                    debugger.on_break(at);
                }
            }

            OpCode::DebugCheckpoint => {
                let at = self.frame()?.op_ip;
                if let Some(debugger) = self.debugger_mut() {
                    if debugger.should_pause(at) {
                        debugger.on_break(at);
                    }
                }
            }

            _ => unreachable!("non-control opcode in control handler"),
        }
        Ok(ExecutionResult::Continue)
    }
}
