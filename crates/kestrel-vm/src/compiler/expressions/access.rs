//! Field and index access.

use crate::compiler::statements::static_index;
use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::opcode::Ins;
use kestrel_ast::Node;

impl Compiler {
    pub(crate) fn compile_field(&mut self, target: &Node, name: &str) -> Result<(), CompileError> {
        let name_idx = self.str_const(name)?;
        self.compile_expression(target)?;
        self.emit(Ins::LdFld(name_idx));
        Ok(())
    }

    pub(crate) fn compile_index(&mut self, target: &Node, index: &Node) -> Result<(), CompileError> {
        self.compile_expression(target)?;
        if let Some(idx) = static_index(index) {
            self.emit(Ins::LdArrF(idx));
        } else {
            self.compile_expression(index)?;
            self.emit(Ins::LdArr);
        }
        Ok(())
    }
}
