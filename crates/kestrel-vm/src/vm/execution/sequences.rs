//! Sequence suspension and the bytecode-level resume primitive.

use crate::error::VmError;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::result::ExecutionResult;
use crate::vm::sequence::sequence_state_of;
use crate::vm::{SeqStep, VM};

impl VM {
    pub(crate) fn execute_sequences(&mut self, opcode: OpCode) -> Result<ExecutionResult, VmError> {
        match opcode {
            // Pop the yielded value and hand the frame back to whoever
            // resumed it.
            OpCode::SeqSuspend => {
                let value = self.pop()?;
                Ok(ExecutionResult::Yield(value))
            }

            // Pop a sequence object, advance it one step, push whether it
            // yielded. The yielded value stays readable via `current`.
            OpCode::SeqResume => {
                let target = self.pop()?;
                let state = sequence_state_of(&target).ok_or_else(|| VmError::Type {
                    operation: "sequence resume".to_string(),
                    expected: "sequence".to_string(),
                    got: target.type_name().to_string(),
                })?;
                let step = self.resume_sequence(&state, None)?;
                self.push(Value::Boolean(matches!(step, SeqStep::Yielded(_))))?;
                Ok(ExecutionResult::Continue)
            }

            _ => unreachable!("non-sequence opcode in sequence handler"),
        }
    }
}
