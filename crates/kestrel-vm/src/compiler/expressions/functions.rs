//! Function declarations, calls and yields.

use crate::compiler::{Binding, Compiler};
use crate::error::CompileError;
use crate::opcode::Ins;
use kestrel_ast::{FunctionDecl, Node, NodeKind, SourceRef};

impl Compiler {
    /// Compile a function declaration into a nested function and emit the
    /// `Closure` instruction that captures its upvalues.
    pub(crate) fn compile_closure(
        &mut self,
        decl: &FunctionDecl,
        source: &SourceRef,
    ) -> Result<(), CompileError> {
        self.begin_function(
            decl.name.as_deref(),
            &decl.params,
            decl.has_varargs,
            decl.is_sequence,
            source,
        )?;

        // Like the program body, a trailing expression is the return value,
        // so `fun () -> x` returns x.
        if let Some((last, rest)) = decl.body.split_last() {
            for stmt in rest {
                self.compile_statement(stmt)?;
            }
            if last.is_expression() {
                self.stmt_marker(&last.source);
                self.compile_expression(last)?;
                self.emit(Ins::Ret);
            } else {
                self.compile_statement(last)?;
            }
        }

        let index = self.finish_function()?;
        self.emit(Ins::Closure(index));
        Ok(())
    }

    pub(crate) fn compile_call(&mut self, target: &Node, args: &[Node]) -> Result<(), CompileError> {
        self.compile_callee(target)?;
        for arg in args {
            self.compile_expression(arg)?;
        }
        self.emit(Ins::Call(args.len() as u16));
        Ok(())
    }

    /// Compile the callee of a call. A reference to the current function's
    /// own (otherwise unbound) name loads the running closure itself.
    pub(crate) fn compile_callee(&mut self, target: &Node) -> Result<(), CompileError> {
        if let NodeKind::Ident(name) = &target.kind {
            let is_self = self.cur_ref().name.as_deref() == Some(name.as_str());
            if is_self && self.resolve(name)? == Binding::Global {
                self.emit(Ins::LdUp);
                return Ok(());
            }
        }
        self.compile_expression(target)
    }

    pub(crate) fn compile_method_call(
        &mut self,
        receiver: &Node,
        name: &str,
        args: &[Node],
    ) -> Result<(), CompileError> {
        let name_idx = self.str_const(name)?;
        self.compile_expression(receiver)?;
        for arg in args {
            self.compile_expression(arg)?;
        }
        self.emit(Ins::InstanceCall {
            name: name_idx,
            argc: args.len() as u16,
        });
        Ok(())
    }

    /// `yield v` suspends the sequence; the expression itself reads as
    /// `undefined` after resumption.
    pub(crate) fn compile_yield(&mut self, value: &Node) -> Result<(), CompileError> {
        if !self.cur_ref().is_sequence {
            return Err(CompileError::YieldOutsideSequence);
        }
        self.compile_expression(value)?;
        self.emit(Ins::SeqSuspend);
        self.emit(Ins::LdUndef);
        Ok(())
    }
}
