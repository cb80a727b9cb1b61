//! Literal and constructor expressions.

use crate::compiler::fold::Folded;
use crate::compiler::statements::static_index;
use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::opcode::Ins;
use kestrel_ast::{Node, ObjectKey};

impl Compiler {
    pub(crate) fn emit_folded(&mut self, folded: &Folded) -> Result<(), CompileError> {
        match folded {
            Folded::Number(n) => {
                let idx = self.num_const(*n)?;
                self.emit(Ins::LdNum(idx));
            }
            Folded::Bool(true) => self.emit(Ins::LdTrue),
            Folded::Bool(false) => self.emit(Ins::LdFalse),
            Folded::Str(s) => {
                let idx = self.str_const(s)?;
                self.emit(Ins::LdStr(idx));
            }
            Folded::Undefined => self.emit(Ins::LdUndef),
            Folded::Null => self.emit(Ins::LdNull),
        }
        Ok(())
    }

    pub(crate) fn compile_array_literal(&mut self, items: &[Node]) -> Result<(), CompileError> {
        for item in items {
            self.compile_expression(item)?;
        }
        self.emit(Ins::NewArray(items.len() as u32));
        Ok(())
    }

    pub(crate) fn compile_object_literal(
        &mut self,
        entries: &[(ObjectKey, Node)],
    ) -> Result<(), CompileError> {
        self.emit(Ins::NewObject);
        for (key, value) in entries {
            self.emit(Ins::Dup);
            match key {
                ObjectKey::Name(name) => {
                    let name_idx = self.str_const(name)?;
                    self.compile_expression(value)?;
                    self.emit(Ins::StFld(name_idx));
                }
                ObjectKey::Computed(key_expr) => {
                    if let Some(idx) = static_index(key_expr) {
                        self.compile_expression(value)?;
                        self.emit(Ins::StArrF(idx));
                    } else {
                        self.compile_expression(key_expr)?;
                        self.compile_expression(value)?;
                        self.emit(Ins::StArr);
                    }
                }
            }
        }
        Ok(())
    }
}
