//! Code generator: lowers the expression tree into symbolic instruction
//! lists, then links them into a program image.
//!
//! Functions are compiled on a builder stack (one builder per lexical
//! function). Each builder owns its instruction list, scope stack, local
//! slots, upvalues, loop contexts and try contexts. The linker assigns byte
//! offsets to labels, erases pseudo-ops into the debug tables, and resolves
//! handler ranges.

use crate::bytecode::{
    CaptureSource, DebugInfo, FunctionDescriptor, HandlerKind, HandlerRecord, ProgramImage,
    ScopeInfo,
};
use crate::error::CompileError;
use crate::opcode::Ins;
use kestrel_ast::{Node, SourceRef};
use std::collections::HashMap;

mod constants;
mod context;
mod expressions;
mod fold;
mod statements;
pub(crate) mod symbols;

use constants::ConstantPools;
use context::{LoopContext, TryContext};
use symbols::SymbolTable;

/// What an identifier reference resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    Local(u16),
    Upvalue(u16),
    /// Unresolved: reads and writes go to the global object.
    Global,
}

/// Handler record with symbolic (label) boundaries.
#[derive(Debug, Clone)]
pub(crate) struct SymbolicHandler {
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) target: u32,
    pub(crate) kind: HandlerKind,
}

/// Per-function compilation state.
pub(crate) struct FuncBuilder {
    pub(crate) index: u32,
    pub(crate) name: Option<String>,
    pub(crate) debug_name: Option<u32>,
    pub(crate) num_args: u16,
    pub(crate) has_varargs: bool,
    pub(crate) is_sequence: bool,
    pub(crate) ins: Vec<Ins>,
    pub(crate) symbols: SymbolTable,
    pub(crate) loops: Vec<LoopContext>,
    pub(crate) tries: Vec<TryContext>,
    pub(crate) handlers: Vec<SymbolicHandler>,
    next_label: u32,
    enter_pos: usize,
    /// String-pool index of the source file, for debug positions.
    file: u32,
    /// Last line a position marker was emitted for.
    line: u32,
}

/// Finished function waiting for the linker.
struct FinishedFunc {
    ins: Vec<Ins>,
    num_args: u16,
    num_locals: u16,
    has_varargs: bool,
    is_sequence: bool,
    debug_name: Option<u32>,
    captures: Vec<CaptureSource>,
    handlers: Vec<SymbolicHandler>,
    file: u32,
}

/// Bytecode compiler
pub struct Compiler {
    pools: ConstantPools,
    funcs: Vec<Option<FinishedFunc>>,
    stack: Vec<FuncBuilder>,
    emit_debug: bool,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            pools: ConstantPools::new(),
            funcs: Vec::new(),
            stack: Vec::new(),
            emit_debug: true,
        }
    }

    /// Switch debug-table emission off (smaller images, no source positions).
    pub fn set_emit_debug(&mut self, emit: bool) {
        self.emit_debug = emit;
    }

    /// Compile a program (a list of top-level nodes) into a program image.
    /// A trailing expression becomes the program result.
    pub fn compile(&mut self, nodes: &[Node]) -> Result<ProgramImage, CompileError> {
        self.pools = ConstantPools::new();
        self.funcs.clear();
        self.stack.clear();

        let source = nodes
            .first()
            .map(|n| n.source.clone())
            .unwrap_or_else(|| SourceRef::new("<input>", 0));
        self.begin_function(Some("<main>"), &[], false, false, &source)?;

        if let Some((last, rest)) = nodes.split_last() {
            for node in rest {
                self.compile_statement(node)?;
            }
            if last.is_expression() {
                self.stmt_marker(&last.source);
                self.compile_expression(last)?;
                self.emit(Ins::Ret);
            } else {
                self.compile_statement(last)?;
            }
        }

        self.finish_function()?;
        let image = self.link()?;
        log::debug!(
            "compiled {} functions into {} bytecode bytes",
            image.functions.len(),
            image.bytecode.len()
        );
        Ok(image)
    }

    // ===== Builder access =====

    pub(crate) fn cur(&mut self) -> &mut FuncBuilder {
        self.stack.last_mut().expect("function builder stack empty")
    }

    pub(crate) fn cur_ref(&self) -> &FuncBuilder {
        self.stack.last().expect("function builder stack empty")
    }

    pub(crate) fn emit(&mut self, ins: Ins) {
        self.cur().ins.push(ins);
    }

    pub(crate) fn new_label(&mut self) -> u32 {
        let builder = self.cur();
        let label = builder.next_label;
        builder.next_label += 1;
        label
    }

    pub(crate) fn mark_label(&mut self, label: u32) {
        self.emit(Ins::Label(label));
    }

    pub(crate) fn num_const(&mut self, n: f64) -> Result<u32, CompileError> {
        self.pools.number(n)
    }

    pub(crate) fn str_const(&mut self, s: &str) -> Result<u32, CompileError> {
        self.pools.string(s)
    }

    /// Emit a position marker when the line changes.
    pub(crate) fn mark_pos(&mut self, source: &SourceRef) {
        if !self.emit_debug {
            return;
        }
        if self.cur_ref().line != source.line {
            self.cur().line = source.line;
            self.emit(Ins::MetaPos(source.line));
        }
    }

    /// Statement boundary marker plus position.
    pub(crate) fn stmt_marker(&mut self, source: &SourceRef) {
        if self.emit_debug {
            self.emit(Ins::MetaStatement(source.line));
        }
        self.mark_pos(source);
    }

    // ===== Scopes =====

    pub(crate) fn begin_scope(&mut self) {
        self.cur().symbols.begin_scope();
        if self.emit_debug {
            self.emit(Ins::MetaScopeOpen);
        }
    }

    /// Close the innermost scope, detaching shared cells of captured locals.
    pub(crate) fn end_scope(&mut self) {
        let closed = self.cur().symbols.end_scope();
        for (slot, captured) in closed {
            if captured {
                self.emit(Ins::CloseLoc(slot));
            }
        }
        if self.emit_debug {
            self.emit(Ins::MetaScopeClose);
        }
    }

    /// Declare a named local in the innermost scope, with its debug marker.
    pub(crate) fn declare_local(&mut self, name: &str) -> Result<u16, CompileError> {
        let slot = self.cur().symbols.declare(name)?;
        if self.emit_debug {
            let name_idx = self.str_const(name)?;
            self.emit(Ins::MetaLocal {
                slot,
                name: name_idx,
            });
        }
        Ok(slot)
    }

    // ===== Name resolution =====

    /// Resolve a reference: local of the current function, then upvalue
    /// (capturing transitively through every enclosing function), then the
    /// global object.
    pub(crate) fn resolve(&mut self, name: &str) -> Result<Binding, CompileError> {
        let top = self.stack.len() - 1;
        if let Some(slot) = self.stack[top].symbols.resolve_local(name) {
            return Ok(Binding::Local(slot));
        }
        if let Some(idx) = self.stack[top].symbols.find_upvalue(name) {
            return Ok(Binding::Upvalue(idx));
        }
        match self.capture_from_enclosing(top, name)? {
            Some(idx) => Ok(Binding::Upvalue(idx)),
            None => Ok(Binding::Global),
        }
    }

    /// Capture `name` into function `level` from an enclosing function,
    /// threading the capture through every intermediate function.
    fn capture_from_enclosing(
        &mut self,
        level: usize,
        name: &str,
    ) -> Result<Option<u16>, CompileError> {
        if level == 0 {
            return Ok(None);
        }
        let parent = level - 1;

        if let Some(slot) = self.stack[parent].symbols.resolve_local(name) {
            self.stack[parent].symbols.mark_captured(slot);
            return self.stack[level]
                .symbols
                .add_upvalue(name, CaptureSource::Local(slot))
                .map(Some);
        }
        if let Some(idx) = self.stack[parent].symbols.find_upvalue(name) {
            return self.stack[level]
                .symbols
                .add_upvalue(name, CaptureSource::Upvalue(idx))
                .map(Some);
        }
        match self.capture_from_enclosing(parent, name)? {
            Some(idx) => self.stack[level]
                .symbols
                .add_upvalue(name, CaptureSource::Upvalue(idx))
                .map(Some),
            None => Ok(None),
        }
    }

    // ===== Function lifecycle =====

    /// Open a new function builder and emit its prologue: `Enter`, parameter
    /// copies into fresh locals, and the vararg binding.
    pub(crate) fn begin_function(
        &mut self,
        name: Option<&str>,
        params: &[String],
        has_varargs: bool,
        is_sequence: bool,
        source: &SourceRef,
    ) -> Result<(), CompileError> {
        let index = u32::try_from(self.funcs.len())
            .map_err(|_| CompileError::Error("too many functions".to_string()))?;
        self.funcs.push(None);

        let file = self.pools.string(&source.file)?;
        let debug_name = name.map(|n| self.pools.string(n)).transpose()?;

        self.stack.push(FuncBuilder {
            index,
            name: name.map(String::from),
            debug_name,
            num_args: params.len() as u16,
            has_varargs,
            is_sequence,
            ins: Vec::new(),
            symbols: SymbolTable::new(),
            loops: Vec::new(),
            tries: Vec::new(),
            handlers: Vec::new(),
            next_label: 0,
            enter_pos: 0,
            file,
            line: 0,
        });

        if self.emit_debug {
            if let Some(name_idx) = debug_name {
                self.emit(Ins::MetaFuncName(name_idx));
            }
        }
        let enter_pos = self.cur_ref().ins.len();
        self.cur().enter_pos = enter_pos;
        self.emit(Ins::Enter(0));

        self.begin_scope();
        for (i, param) in params.iter().enumerate() {
            let slot = self.declare_local(param)?;
            self.emit(Ins::LdArgF(i as u16));
            self.emit(Ins::StLocF(slot));
        }
        if has_varargs {
            let slot = self.declare_local("varargs")?;
            self.emit(Ins::VarArgs(params.len() as u16));
            self.emit(Ins::StLocF(slot));
        }
        Ok(())
    }

    /// Seal the current builder: append the implicit return, patch `Enter`
    /// with the final local count, and park the function for the linker.
    pub(crate) fn finish_function(&mut self) -> Result<u32, CompileError> {
        self.emit(Ins::LdUndef);
        self.emit(Ins::Ret);

        let mut builder = self.stack.pop().expect("function builder stack empty");
        builder.symbols.end_scope();

        let num_locals = u16::try_from(builder.symbols.local_count())
            .map_err(|_| CompileError::TooManyLocals)?;
        let enter_pos = builder.enter_pos;
        builder.ins[enter_pos] = Ins::Enter(num_locals);

        let index = builder.index;
        self.funcs[index as usize] = Some(FinishedFunc {
            ins: builder.ins,
            num_args: builder.num_args,
            num_locals,
            has_varargs: builder.has_varargs,
            is_sequence: builder.is_sequence,
            debug_name: builder.debug_name,
            captures: builder.symbols.captures(),
            handlers: builder.handlers,
            file: builder.file,
        });
        Ok(index)
    }

    // ===== Linking =====

    /// Assign byte offsets to labels, erase pseudo-ops into the debug
    /// tables, resolve handler ranges and serialize everything.
    fn link(&mut self) -> Result<ProgramImage, CompileError> {
        let mut bytecode: Vec<u8> = Vec::new();
        let mut descriptors = Vec::new();
        let mut debug = DebugInfo::default();

        let funcs = std::mem::take(&mut self.funcs);
        for func in funcs {
            let func = func.expect("unfinished function reached the linker");
            let entry = bytecode.len() as u64;

            // Pass 1: label offsets and debug tables.
            let mut labels: HashMap<u32, u32> = HashMap::new();
            let mut offset = entry;
            let mut open_stmt: Option<(u32, u32)> = None;
            let mut scope_stack: Vec<ScopeInfo> = Vec::new();

            for ins in &func.ins {
                if offset > u32::MAX as u64 {
                    return Err(CompileError::CodeTooLarge);
                }
                let at = offset as u32;
                match ins {
                    Ins::Label(id) => {
                        labels.insert(*id, at);
                    }
                    Ins::MetaStatement(line) => {
                        if let Some((start, l)) = open_stmt.take() {
                            if start != at {
                                debug.statements.push((start, at, l));
                            }
                        }
                        open_stmt = Some((at, *line));
                    }
                    Ins::MetaPos(line) => {
                        debug.positions.push((at, func.file, *line));
                    }
                    Ins::MetaScopeOpen => scope_stack.push(ScopeInfo {
                        start: at,
                        end: 0,
                        locals: Vec::new(),
                    }),
                    Ins::MetaScopeClose => {
                        if let Some(mut scope) = scope_stack.pop() {
                            scope.end = at;
                            debug.scopes.push(scope);
                        }
                    }
                    Ins::MetaLocal { slot, name } => {
                        if let Some(scope) = scope_stack.last_mut() {
                            scope.locals.push((*slot, *name));
                        }
                    }
                    Ins::MetaFuncName(name) => {
                        debug.function_names.push((entry as u32, *name));
                    }
                    other => offset += other.encoded_len() as u64,
                }
            }
            if offset > u32::MAX as u64 {
                return Err(CompileError::CodeTooLarge);
            }
            if let Some((start, l)) = open_stmt.take() {
                debug.statements.push((start, offset as u32, l));
            }
            while let Some(mut scope) = scope_stack.pop() {
                scope.end = offset as u32;
                debug.scopes.push(scope);
            }

            // Pass 2: serialize with resolved jump targets.
            for ins in &func.ins {
                if ins.is_pseudo() {
                    continue;
                }
                let resolved = match ins {
                    Ins::Jmp(l) => Ins::Jmp(resolve_label(&labels, *l)?),
                    Ins::JmpTrue(l) => Ins::JmpTrue(resolve_label(&labels, *l)?),
                    Ins::JmpFalse(l) => Ins::JmpFalse(resolve_label(&labels, *l)?),
                    Ins::JmpTrueP(l) => Ins::JmpTrueP(resolve_label(&labels, *l)?),
                    Ins::JmpFalseP(l) => Ins::JmpFalseP(resolve_label(&labels, *l)?),
                    Ins::JmpTable {
                        base,
                        default,
                        targets,
                    } => Ins::JmpTable {
                        base: *base,
                        default: resolve_label(&labels, *default)?,
                        targets: targets
                            .iter()
                            .map(|t| resolve_label(&labels, *t))
                            .collect::<Result<_, _>>()?,
                    },
                    other => other.clone(),
                };
                resolved.encode_into(&mut bytecode);
            }

            let handlers = func
                .handlers
                .iter()
                .map(|h| {
                    Ok(HandlerRecord {
                        start: resolve_label(&labels, h.start)?,
                        end: resolve_label(&labels, h.end)?,
                        target: resolve_label(&labels, h.target)?,
                        kind: h.kind,
                    })
                })
                .collect::<Result<Vec<_>, CompileError>>()?;

            descriptors.push(FunctionDescriptor {
                entry_offset: entry as u32,
                code_len: bytecode.len() as u32 - entry as u32,
                num_args: func.num_args,
                num_locals: func.num_locals,
                num_upvalues: func.captures.len() as u16,
                has_varargs: func.has_varargs,
                is_sequence: func.is_sequence,
                debug_name: func.debug_name,
                captures: func.captures,
                handlers,
            });
        }

        let (numbers, strings) = std::mem::take(&mut self.pools).into_pools();
        Ok(ProgramImage {
            numbers,
            strings,
            functions: descriptors,
            bytecode,
            debug: self.emit_debug.then_some(debug),
        })
    }
}

fn resolve_label(labels: &HashMap<u32, u32>, label: u32) -> Result<u32, CompileError> {
    labels
        .get(&label)
        .copied()
        .ok_or_else(|| CompileError::Error(format!("unresolved label {}", label)))
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}
