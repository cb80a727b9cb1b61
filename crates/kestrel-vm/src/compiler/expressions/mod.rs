//! Expression lowering: every compiled expression leaves exactly one value
//! on the evaluation stack.

mod access;
mod functions;
mod literals;
mod operators;
mod variables;

use super::fold::fold;
use super::Compiler;
use crate::error::CompileError;
use kestrel_ast::{Node, NodeKind};

impl Compiler {
    pub(crate) fn compile_expression(&mut self, node: &Node) -> Result<(), CompileError> {
        self.mark_pos(&node.source);

        // Literal subtrees collapse before emission, so `3+4*2` and `11`
        // compile identically.
        if let Some(folded) = fold(node) {
            return self.emit_folded(&folded);
        }

        match &node.kind {
            NodeKind::ArrayLiteral(items) => self.compile_array_literal(items),
            NodeKind::ObjectLiteral(entries) => self.compile_object_literal(entries),
            NodeKind::Ident(name) => self.compile_ident(name),
            NodeKind::Global => self.compile_global(),
            NodeKind::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs),
            NodeKind::Unary { op, operand } => self.compile_unary(*op, operand),
            NodeKind::Ternary {
                cond,
                then,
                otherwise,
            } => self.compile_ternary(cond, then, otherwise),
            NodeKind::Field { target, name } => self.compile_field(target, name),
            NodeKind::Index { target, index } => self.compile_index(target, index),
            NodeKind::Call { target, args } => self.compile_call(target, args),
            NodeKind::MethodCall {
                receiver,
                name,
                args,
            } => self.compile_method_call(receiver, name, args),
            NodeKind::Function(decl) => self.compile_closure(decl, &node.source),
            NodeKind::Yield(value) => self.compile_yield(value),
            // Non-foldable literals cannot occur (fold covers them), and
            // statement kinds have no value.
            other => Err(CompileError::Error(format!(
                "not an expression: {:?}",
                std::mem::discriminant(other)
            ))),
        }
    }
}
