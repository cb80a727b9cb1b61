//! Binary, unary and ternary operators, including short-circuit lowering.

use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::opcode::Ins;
use kestrel_ast::{BinaryOp, Node, UnaryOp};

impl Compiler {
    pub(crate) fn compile_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Node,
        rhs: &Node,
    ) -> Result<(), CompileError> {
        match op {
            // Short-circuit operators keep the deciding value: peek-jump,
            // then drop it only when the right side runs.
            BinaryOp::And => {
                let end = self.new_label();
                self.compile_expression(lhs)?;
                self.emit(Ins::JmpFalseP(end));
                self.emit(Ins::Drop);
                self.compile_expression(rhs)?;
                self.mark_label(end);
                Ok(())
            }
            BinaryOp::Or => {
                let end = self.new_label();
                self.compile_expression(lhs)?;
                self.emit(Ins::JmpTrueP(end));
                self.emit(Ins::Drop);
                self.compile_expression(rhs)?;
                self.mark_label(end);
                Ok(())
            }
            _ => {
                self.compile_expression(lhs)?;
                self.compile_expression(rhs)?;
                self.emit(match op {
                    BinaryOp::Add => Ins::Add,
                    BinaryOp::Sub => Ins::Sub,
                    BinaryOp::Mul => Ins::Mul,
                    BinaryOp::Div => Ins::Div,
                    BinaryOp::Mod => Ins::Mod,
                    BinaryOp::Exp => Ins::Exp,
                    BinaryOp::Eq => Ins::Eq,
                    BinaryOp::Neq => Ins::Neq,
                    BinaryOp::Lt => Ins::Lt,
                    BinaryOp::Lte => Ins::Lte,
                    BinaryOp::Gt => Ins::Gt,
                    BinaryOp::Gte => Ins::Gte,
                    BinaryOp::BitAnd => Ins::BitAnd,
                    BinaryOp::BitOr => Ins::BitOr,
                    BinaryOp::BitXor => Ins::BitXor,
                    BinaryOp::Shl => Ins::BitLShift,
                    BinaryOp::Shr => Ins::BitRShift,
                    BinaryOp::In => Ins::In,
                    BinaryOp::NotIn => Ins::NotIn,
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                });
                Ok(())
            }
        }
    }

    pub(crate) fn compile_unary(&mut self, op: UnaryOp, operand: &Node) -> Result<(), CompileError> {
        self.compile_expression(operand)?;
        self.emit(match op {
            UnaryOp::Neg => Ins::Neg,
            UnaryOp::Not => Ins::Not,
            UnaryOp::BitNot => Ins::BitNot,
        });
        Ok(())
    }

    /// `c ? t : e` uses two jumps.
    pub(crate) fn compile_ternary(
        &mut self,
        cond: &Node,
        then: &Node,
        otherwise: &Node,
    ) -> Result<(), CompileError> {
        self.compile_expression(cond)?;
        let els = self.new_label();
        let end = self.new_label();
        self.emit(Ins::JmpFalse(els));
        self.compile_expression(then)?;
        self.emit(Ins::Jmp(end));
        self.mark_label(els);
        self.compile_expression(otherwise)?;
        self.mark_label(end);
        Ok(())
    }
}
