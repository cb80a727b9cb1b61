//! Identifier and global references.

use crate::compiler::{Binding, Compiler};
use crate::error::CompileError;
use crate::opcode::Ins;

impl Compiler {
    pub(crate) fn compile_ident(&mut self, name: &str) -> Result<(), CompileError> {
        match self.resolve(name)? {
            Binding::Local(slot) => self.emit(Ins::LdLocF(slot)),
            Binding::Upvalue(idx) => self.emit(Ins::LdUpValue(idx)),
            Binding::Global => {
                let name_idx = self.str_const(name)?;
                self.emit(Ins::LdGlobalFld(name_idx));
            }
        }
        Ok(())
    }

    pub(crate) fn compile_global(&mut self) -> Result<(), CompileError> {
        self.emit(Ins::LdGlobal);
        Ok(())
    }
}
