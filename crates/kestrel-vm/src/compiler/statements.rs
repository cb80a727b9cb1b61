//! Statement lowering.

use super::context::{LoopContext, TryContext};
use super::fold::fold;
use super::{Binding, Compiler, SymbolicHandler};
use crate::bytecode::HandlerKind;
use crate::error::CompileError;
use crate::opcode::Ins;
use kestrel_ast::{BinaryOp, CatchClause, Node, NodeKind, SwitchCase};

impl Compiler {
    pub(crate) fn compile_statement(&mut self, node: &Node) -> Result<(), CompileError> {
        self.stmt_marker(&node.source);

        match &node.kind {
            NodeKind::VarDecl { name, init } => {
                // The initializer still sees an outer binding of the same name.
                match init {
                    Some(init) => self.compile_expression(init)?,
                    None => self.emit(Ins::LdUndef),
                }
                let slot = self.declare_local(name)?;
                self.emit(Ins::StLocF(slot));
                Ok(())
            }

            NodeKind::Assign { target, value } => self.compile_assign(target, value),

            NodeKind::Function(decl) if decl.name.is_some() => {
                // Named declaration: bind a local first so the body can
                // capture its own cell for recursion.
                let name = decl.name.clone().expect("checked above");
                let slot = self.declare_local(&name)?;
                self.compile_closure(decl, &node.source)?;
                self.emit(Ins::StLocF(slot));
                Ok(())
            }

            NodeKind::Block(body) => {
                self.begin_scope();
                for stmt in body {
                    self.compile_statement(stmt)?;
                }
                self.end_scope();
                Ok(())
            }

            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.compile_if(cond, then_branch, else_branch.as_deref()),

            NodeKind::While { cond, body } => self.compile_while(cond, body),
            NodeKind::DoWhile { body, cond } => self.compile_do_while(body, cond),
            NodeKind::For {
                init,
                cond,
                step,
                body,
            } => self.compile_for(init.as_deref(), cond.as_deref(), step.as_deref(), body),
            NodeKind::Foreach {
                var,
                iterable,
                body,
            } => self.compile_foreach(var, iterable, body),
            NodeKind::Switch {
                subject,
                cases,
                default,
            } => self.compile_switch(subject, cases, default.as_deref()),

            NodeKind::Break => {
                let ctx = self
                    .cur_ref()
                    .loops
                    .last()
                    .ok_or(CompileError::BreakOutsideLoop)?;
                let (label, depth) = (ctx.break_label, ctx.try_depth);
                self.inline_finallys(depth)?;
                self.emit(Ins::Jmp(label));
                Ok(())
            }

            NodeKind::Continue => {
                let ctx = self
                    .cur_ref()
                    .loops
                    .last()
                    .ok_or(CompileError::ContinueOutsideLoop)?;
                let (label, depth) = (ctx.continue_label, ctx.try_depth);
                self.inline_finallys(depth)?;
                self.emit(Ins::Jmp(label));
                Ok(())
            }

            NodeKind::Return(value) => self.compile_return(value.as_deref()),

            NodeKind::Try {
                body,
                catch,
                finally,
            } => self.compile_try(body, catch.as_ref(), finally.as_deref()),

            NodeKind::Import { name } => {
                // Module wiring is the embedder's business: imports read the
                // preloaded global of that name into a local.
                let name_idx = self.str_const(name)?;
                self.emit(Ins::LdGlobalFld(name_idx));
                let slot = self.declare_local(name)?;
                self.emit(Ins::StLocF(slot));
                Ok(())
            }

            NodeKind::Export { name, value } => {
                let name_idx = self.str_const(name)?;
                self.emit(Ins::LdGlobal);
                self.compile_expression(value)?;
                self.emit(Ins::StFld(name_idx));
                Ok(())
            }

            // Anything else is an expression in statement position.
            _ => {
                self.compile_expression(node)?;
                self.emit(Ins::Drop);
                Ok(())
            }
        }
    }

    // ===== Assignment =====

    fn compile_assign(&mut self, target: &Node, value: &Node) -> Result<(), CompileError> {
        // `x = x + 1` / `x = x - 1` on a local lowers to in-place inc/dec.
        if let Some(ins) = self.as_inc_dec(target, value)? {
            self.emit(ins);
            return Ok(());
        }

        match &target.kind {
            NodeKind::Ident(name) => match self.resolve(name)? {
                Binding::Local(slot) => {
                    self.compile_expression(value)?;
                    self.emit(Ins::StLocF(slot));
                    Ok(())
                }
                Binding::Upvalue(idx) => {
                    self.compile_expression(value)?;
                    self.emit(Ins::StUpValue(idx));
                    Ok(())
                }
                Binding::Global => {
                    let name_idx = self.str_const(name)?;
                    self.emit(Ins::LdGlobal);
                    self.compile_expression(value)?;
                    self.emit(Ins::StFld(name_idx));
                    Ok(())
                }
            },
            NodeKind::Field { target, name } => {
                let name_idx = self.str_const(name)?;
                self.compile_expression(target)?;
                self.compile_expression(value)?;
                self.emit(Ins::StFld(name_idx));
                Ok(())
            }
            NodeKind::Index { target, index } => {
                self.compile_expression(target)?;
                if let Some(static_idx) = static_index(index) {
                    self.compile_expression(value)?;
                    self.emit(Ins::StArrF(static_idx));
                } else {
                    self.compile_expression(index)?;
                    self.compile_expression(value)?;
                    self.emit(Ins::StArr);
                }
                Ok(())
            }
            _ => Err(CompileError::InvalidAssignmentTarget),
        }
    }

    fn as_inc_dec(&mut self, target: &Node, value: &Node) -> Result<Option<Ins>, CompileError> {
        let NodeKind::Ident(name) = &target.kind else {
            return Ok(None);
        };
        let NodeKind::Binary { op, lhs, rhs } = &value.kind else {
            return Ok(None);
        };
        if !matches!(op, BinaryOp::Add | BinaryOp::Sub) {
            return Ok(None);
        }
        if !matches!(&lhs.kind, NodeKind::Ident(n) if n == name) {
            return Ok(None);
        }
        if !matches!(&rhs.kind, NodeKind::Number(n) if *n == 1.0) {
            return Ok(None);
        }
        match self.resolve(name)? {
            Binding::Local(slot) => Ok(Some(match op {
                BinaryOp::Add => Ins::IncF(slot),
                _ => Ins::DecF(slot),
            })),
            _ => Ok(None),
        }
    }

    // ===== Conditionals and loops =====

    fn compile_if(
        &mut self,
        cond: &Node,
        then_branch: &[Node],
        else_branch: Option<&[Node]>,
    ) -> Result<(), CompileError> {
        // Dead-branch elimination for constant conditions.
        if let Some(folded) = fold(cond) {
            return if folded.is_truthy() {
                self.compile_scoped_block(then_branch)
            } else {
                match else_branch {
                    Some(body) => self.compile_scoped_block(body),
                    None => Ok(()),
                }
            };
        }

        self.compile_expression(cond)?;
        match else_branch {
            None => {
                let end = self.new_label();
                self.emit(Ins::JmpFalse(end));
                self.compile_scoped_block(then_branch)?;
                self.mark_label(end);
            }
            Some(else_body) => {
                let els = self.new_label();
                let end = self.new_label();
                self.emit(Ins::JmpFalse(els));
                self.compile_scoped_block(then_branch)?;
                self.emit(Ins::Jmp(end));
                self.mark_label(els);
                self.compile_scoped_block(else_body)?;
                self.mark_label(end);
            }
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Node, body: &[Node]) -> Result<(), CompileError> {
        if let Some(folded) = fold(cond) {
            if !folded.is_truthy() {
                return Ok(());
            }
        }

        let top = self.new_label();
        let end = self.new_label();
        self.mark_label(top);
        if fold(cond).is_none() {
            self.compile_expression(cond)?;
            self.emit(Ins::JmpFalse(end));
        }
        self.push_loop(end, top);
        self.compile_scoped_block(body)?;
        self.pop_loop();
        self.emit(Ins::Jmp(top));
        self.mark_label(end);
        Ok(())
    }

    fn compile_do_while(&mut self, body: &[Node], cond: &Node) -> Result<(), CompileError> {
        let top = self.new_label();
        let cont = self.new_label();
        let end = self.new_label();
        self.mark_label(top);
        self.push_loop(end, cont);
        self.compile_scoped_block(body)?;
        self.pop_loop();
        self.mark_label(cont);
        self.compile_expression(cond)?;
        self.emit(Ins::JmpTrue(top));
        self.mark_label(end);
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&Node>,
        cond: Option<&Node>,
        step: Option<&Node>,
        body: &[Node],
    ) -> Result<(), CompileError> {
        // The induction variable's scope is the whole loop, so every
        // closure created in the body shares its single cell.
        self.begin_scope();
        if let Some(init) = init {
            self.compile_statement(init)?;
        }

        let top = self.new_label();
        let cont = self.new_label();
        let end = self.new_label();
        self.mark_label(top);
        if let Some(cond) = cond {
            if fold(cond).is_none() {
                self.compile_expression(cond)?;
                self.emit(Ins::JmpFalse(end));
            } else if !fold(cond).expect("folded above").is_truthy() {
                self.emit(Ins::Jmp(end));
            }
        }
        self.push_loop(end, cont);
        self.compile_scoped_block(body)?;
        self.pop_loop();
        self.mark_label(cont);
        if let Some(step) = step {
            self.compile_statement(step)?;
        }
        self.emit(Ins::Jmp(top));
        self.mark_label(end);
        self.end_scope();
        Ok(())
    }

    /// `foreach` lowers to `getEnumerator`, then a `moveNext`/`current`
    /// loop. The loop variable is a fresh binding per iteration: its shared
    /// cell (if any) is detached at the end of every pass.
    fn compile_foreach(
        &mut self,
        var: &str,
        iterable: &Node,
        body: &[Node],
    ) -> Result<(), CompileError> {
        let get_enum = self.str_const("getEnumerator")?;
        let move_next = self.str_const("moveNext")?;
        let current = self.str_const("current")?;

        self.begin_scope();
        self.compile_expression(iterable)?;
        self.emit(Ins::InstanceCall {
            name: get_enum,
            argc: 0,
        });
        let enumerator = self.cur().symbols.declare_temp()?;
        self.emit(Ins::StLocF(enumerator));

        self.emit(Ins::LdUndef);
        let var_slot = self.declare_local(var)?;
        self.emit(Ins::StLocF(var_slot));

        let top = self.new_label();
        let cont = self.new_label();
        let end = self.new_label();

        self.mark_label(top);
        self.emit(Ins::LdLocF(enumerator));
        self.emit(Ins::InstanceCall {
            name: move_next,
            argc: 0,
        });
        self.emit(Ins::JmpFalse(end));
        self.emit(Ins::LdLocF(enumerator));
        self.emit(Ins::InstanceCall {
            name: current,
            argc: 0,
        });
        self.emit(Ins::StLocF(var_slot));

        self.push_loop(end, cont);
        self.compile_scoped_block(body)?;
        self.pop_loop();

        self.mark_label(cont);
        if self.cur_ref().symbols.is_captured(var_slot) {
            self.emit(Ins::CloseLoc(var_slot));
        }
        self.emit(Ins::Jmp(top));
        self.mark_label(end);
        self.end_scope();
        Ok(())
    }

    fn compile_switch(
        &mut self,
        subject: &Node,
        cases: &[SwitchCase],
        default: Option<&[Node]>,
    ) -> Result<(), CompileError> {
        self.compile_expression(subject)?;

        if cases.is_empty() {
            self.emit(Ins::Drop);
            if let Some(body) = default {
                self.compile_scoped_block(body)?;
            }
            return Ok(());
        }

        let min = cases.iter().map(|c| c.value).min().expect("non-empty");
        let max = cases.iter().map(|c| c.value).max().expect("non-empty");
        let count = (max as i64 - min as i64 + 1) as u64;
        if count > 4096 {
            return Err(CompileError::Error(
                "switch table too sparse (span over 4096)".to_string(),
            ));
        }

        let end = self.new_label();
        let default_label = if default.is_some() {
            self.new_label()
        } else {
            end
        };

        let mut targets = vec![default_label; count as usize];
        let mut case_labels = Vec::with_capacity(cases.len());
        for case in cases {
            let label = self.new_label();
            let slot = (case.value as i64 - min as i64) as usize;
            if targets[slot] != default_label {
                return Err(CompileError::Error(format!(
                    "duplicate case value {}",
                    case.value
                )));
            }
            targets[slot] = label;
            case_labels.push(label);
        }

        self.emit(Ins::JmpTable {
            base: min,
            default: default_label,
            targets,
        });

        // Arms do not fall through.
        for (case, label) in cases.iter().zip(case_labels) {
            self.mark_label(label);
            self.compile_scoped_block(&case.body)?;
            self.emit(Ins::Jmp(end));
        }
        if let Some(body) = default {
            self.mark_label(default_label);
            self.compile_scoped_block(body)?;
        }
        self.mark_label(end);
        Ok(())
    }

    // ===== Return =====

    fn compile_return(&mut self, value: Option<&Node>) -> Result<(), CompileError> {
        match value {
            Some(value) => self.compile_return_expr(value),
            None => {
                self.emit(Ins::LdUndef);
                self.finish_return()
            }
        }
    }

    /// Compile an expression in return position, keeping tail positions
    /// alive through ternary branches so `n==0 ? acc : f(n-1, acc+n)`
    /// tail-calls.
    fn compile_return_expr(&mut self, value: &Node) -> Result<(), CompileError> {
        if let NodeKind::Ternary {
            cond,
            then,
            otherwise,
        } = &value.kind
        {
            if let Some(folded) = fold(cond) {
                return if folded.is_truthy() {
                    self.compile_return_expr(then)
                } else {
                    self.compile_return_expr(otherwise)
                };
            }
            self.compile_expression(cond)?;
            let els = self.new_label();
            self.emit(Ins::JmpFalse(els));
            self.compile_return_expr(then)?;
            self.mark_label(els);
            return self.compile_return_expr(otherwise);
        }

        // `return f(...)` in tail position reuses the frame, unless a
        // finally block must still run or this is a sequence completion.
        if let NodeKind::Call { target, args } = &value.kind {
            let plain_exit = self.cur_ref().tries.iter().all(|t| t.finally.is_none());
            if plain_exit && !self.cur_ref().is_sequence {
                self.compile_callee(target)?;
                for arg in args {
                    self.compile_expression(arg)?;
                }
                self.emit(Ins::TailCall(args.len() as u16));
                return Ok(());
            }
        }

        self.compile_expression(value)?;
        self.finish_return()
    }

    fn finish_return(&mut self) -> Result<(), CompileError> {
        if self.cur_ref().tries.iter().any(|t| t.finally.is_some()) {
            // The return value is computed before the finally bodies run.
            let slot = self.cur().symbols.declare_temp()?;
            self.emit(Ins::StLocF(slot));
            self.inline_finallys(0)?;
            self.emit(Ins::LdLocF(slot));
        }
        self.emit(Ins::Ret);
        Ok(())
    }

    // ===== Try / catch / finally =====

    /// Handler records are static per function: a catch record covering the
    /// body, and finally records covering the body and the catch body. The
    /// exception-path finally copy rethrows; normal-path exits get inlined
    /// copies.
    fn compile_try(
        &mut self,
        body: &[Node],
        catch: Option<&CatchClause>,
        finally: Option<&[Node]>,
    ) -> Result<(), CompileError> {
        let l_start = self.new_label();
        let l_body_end = self.new_label();
        let l_end = self.new_label();
        let l_catch = catch.map(|_| self.new_label());
        let l_catch_end = catch.map(|_| self.new_label());
        let l_fin_exc = finally.map(|_| self.new_label());

        // Outer-first emission so the VM's innermost-last scan works for
        // nested trys compiled inside this body.
        if let Some(target) = l_fin_exc {
            self.cur().handlers.push(SymbolicHandler {
                start: l_start,
                end: l_body_end,
                target,
                kind: HandlerKind::Finally,
            });
        }
        if let Some(target) = l_catch {
            self.cur().handlers.push(SymbolicHandler {
                start: l_start,
                end: l_body_end,
                target,
                kind: HandlerKind::Catch,
            });
        }
        if let (Some(target), Some(start), Some(end)) = (l_fin_exc, l_catch, l_catch_end) {
            self.cur().handlers.push(SymbolicHandler {
                start,
                end,
                target,
                kind: HandlerKind::Finally,
            });
        }

        self.mark_label(l_start);
        self.cur().tries.push(TryContext {
            finally: finally.map(<[Node]>::to_vec),
        });
        self.compile_scoped_block(body)?;
        self.cur().tries.pop();
        self.mark_label(l_body_end);
        if let Some(finally_body) = finally {
            self.compile_scoped_block(finally_body)?;
        }
        self.emit(Ins::Jmp(l_end));

        if let Some(clause) = catch {
            self.mark_label(l_catch.expect("label allocated above"));
            // The VM pushes the error value on handler entry.
            self.begin_scope();
            let slot = self.declare_local(&clause.var)?;
            self.emit(Ins::StLocF(slot));
            self.cur().tries.push(TryContext {
                finally: finally.map(<[Node]>::to_vec),
            });
            for stmt in &clause.body {
                self.compile_statement(stmt)?;
            }
            self.cur().tries.pop();
            self.end_scope();
            self.mark_label(l_catch_end.expect("label allocated above"));
            if let Some(finally_body) = finally {
                self.compile_scoped_block(finally_body)?;
            }
            self.emit(Ins::Jmp(l_end));
        }

        if let Some(finally_body) = finally {
            // Exception path: stash the in-flight error, run the body,
            // rethrow.
            self.mark_label(l_fin_exc.expect("label allocated above"));
            let slot = self.cur().symbols.declare_temp()?;
            self.emit(Ins::StLocF(slot));
            self.compile_scoped_block(finally_body)?;
            self.emit(Ins::LdLocF(slot));
            self.emit(Ins::Throw);
        }

        self.mark_label(l_end);
        Ok(())
    }

    // ===== Helpers =====

    pub(crate) fn compile_scoped_block(&mut self, body: &[Node]) -> Result<(), CompileError> {
        self.begin_scope();
        for stmt in body {
            self.compile_statement(stmt)?;
        }
        self.end_scope();
        Ok(())
    }

    fn push_loop(&mut self, break_label: u32, continue_label: u32) {
        let try_depth = self.cur_ref().tries.len();
        self.cur().loops.push(LoopContext {
            break_label,
            continue_label,
            try_depth,
        });
    }

    fn pop_loop(&mut self) {
        self.cur().loops.pop();
    }

    /// Inline the finally bodies of every try context deeper than
    /// `down_to`, innermost first. Each body compiles with its own context
    /// already popped, so a `return` inside a finally cannot re-enter it.
    fn inline_finallys(&mut self, down_to: usize) -> Result<(), CompileError> {
        let mut saved = Vec::new();
        while self.cur_ref().tries.len() > down_to {
            let ctx = self.cur().tries.pop().expect("checked above");
            if let Some(body) = ctx.finally.clone() {
                self.compile_scoped_block(&body)?;
            }
            saved.push(ctx);
        }
        for ctx in saved.into_iter().rev() {
            self.cur().tries.push(ctx);
        }
        Ok(())
    }
}

/// A non-negative integral number literal usable as a static array index.
pub(crate) fn static_index(node: &Node) -> Option<u32> {
    match &node.kind {
        NodeKind::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64 => {
            Some(*n as u32)
        }
        _ => None,
    }
}
