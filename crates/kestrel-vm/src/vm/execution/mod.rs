//! Per-opcode execution handlers, grouped by instruction band.

mod arithmetic;
mod comparison;
mod control;
mod functions;
mod objects;
mod sequences;
mod variables;

use crate::error::VmError;
use crate::opcode::OpCode;
use crate::vm::result::ExecutionResult;
use crate::vm::VM;

impl VM {
    /// Dispatch one fetched opcode. Operand bytes are consumed by the
    /// handler.
    pub(crate) fn execute_instruction(
        &mut self,
        opcode: OpCode,
    ) -> Result<ExecutionResult, VmError> {
        match opcode {
            // Stack shuffling, constants, globals, locals, args, upvalues
            OpCode::Dup
            | OpCode::Dup2
            | OpCode::Drop
            | OpCode::Swap
            | OpCode::Swap1For2
            | OpCode::LdUndef
            | OpCode::LdNull
            | OpCode::LdTrue
            | OpCode::LdFalse
            | OpCode::LdNum
            | OpCode::LdStr
            | OpCode::LdGlobal
            | OpCode::LdGlobalFld
            | OpCode::LdLocF
            | OpCode::StLocF
            | OpCode::LdArgF
            | OpCode::StArgF
            | OpCode::IncF
            | OpCode::DecF
            | OpCode::CloseLoc
            | OpCode::LdUp
            | OpCode::LdUpValue
            | OpCode::StUpValue => self.execute_variables(opcode),

            // Arithmetic, logical and bitwise
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Exp
            | OpCode::Neg
            | OpCode::Not
            | OpCode::BitLShift
            | OpCode::BitRShift
            | OpCode::BitAnd
            | OpCode::BitOr
            | OpCode::BitXor
            | OpCode::BitNot => self.execute_arithmetic(opcode),

            // Comparison and membership
            OpCode::Eq
            | OpCode::Neq
            | OpCode::Gt
            | OpCode::Gte
            | OpCode::Lt
            | OpCode::Lte
            | OpCode::In
            | OpCode::NotIn => self.execute_comparison(opcode),

            // Control flow, throw, debug
            OpCode::Jmp
            | OpCode::JmpTrue
            | OpCode::JmpFalse
            | OpCode::JmpTrueP
            | OpCode::JmpFalseP
            | OpCode::JmpTable
            | OpCode::Throw
            | OpCode::Breakpoint
            | OpCode::DebugCheckpoint => self.execute_control(opcode),

            // Constructors, fields and indexing
            OpCode::NewObject
            | OpCode::NewArray
            | OpCode::Slice
            | OpCode::LdFld
            | OpCode::StFld
            | OpCode::LdArr
            | OpCode::StArr
            | OpCode::LdArrF
            | OpCode::StArrF => self.execute_objects(opcode),

            // Calls
            OpCode::Closure
            | OpCode::Call
            | OpCode::TailCall
            | OpCode::InstanceCall
            | OpCode::Enter
            | OpCode::Ret
            | OpCode::VarArgs => self.execute_functions(opcode),

            // Sequences
            OpCode::SeqResume | OpCode::SeqSuspend => self.execute_sequences(opcode),

            // Pseudo-ops never survive linking.
            OpCode::Label
            | OpCode::MetaStatement
            | OpCode::MetaPos
            | OpCode::MetaScopeOpen
            | OpCode::MetaScopeClose
            | OpCode::MetaLocal
            | OpCode::MetaFuncName => Err(VmError::InvalidOpcode(opcode.as_u8())),
        }
    }
}
