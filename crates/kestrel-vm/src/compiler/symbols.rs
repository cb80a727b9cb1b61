//! Symbol table for one function: lexical scopes, local slots and upvalues.
//!
//! Local slots are assigned monotonically and never reused; a lexical scope
//! only controls name visibility and reports, on exit, which captured slots
//! need their shared cells closed.

use crate::bytecode::CaptureSource;
use crate::error::CompileError;

#[derive(Debug)]
struct LocalInfo {
    name: String,
    captured: bool,
}

/// Upvalue slot of the function being compiled.
#[derive(Debug)]
pub(crate) struct UpvalInfo {
    pub(crate) name: String,
    pub(crate) source: CaptureSource,
}

#[derive(Debug)]
pub(crate) struct SymbolTable {
    locals: Vec<LocalInfo>,
    /// Innermost scope last; each holds the slots it declared.
    scopes: Vec<Vec<u16>>,
    upvalues: Vec<UpvalInfo>,
}

impl SymbolTable {
    pub(crate) fn new() -> Self {
        Self {
            locals: Vec::new(),
            scopes: Vec::new(),
            upvalues: Vec::new(),
        }
    }

    pub(crate) fn begin_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Close the innermost scope, returning `(slot, captured)` for every
    /// local it declared, in declaration order.
    pub(crate) fn end_scope(&mut self) -> Vec<(u16, bool)> {
        let slots = self.scopes.pop().unwrap_or_default();
        slots
            .into_iter()
            .map(|slot| {
                let captured = self.locals[slot as usize].captured;
                // The name goes out of scope; the slot stays allocated.
                self.locals[slot as usize].name.clear();
                (slot, captured)
            })
            .collect()
    }

    /// Declare a named local in the innermost scope.
    pub(crate) fn declare(&mut self, name: &str) -> Result<u16, CompileError> {
        let scope = self
            .scopes
            .last()
            .expect("declaration outside any scope");
        for &slot in scope {
            if self.locals[slot as usize].name == name {
                return Err(CompileError::DuplicateDeclaration(name.to_string()));
            }
        }
        self.push_local(name.to_string())
    }

    /// Allocate an anonymous slot for compiler temporaries.
    pub(crate) fn declare_temp(&mut self) -> Result<u16, CompileError> {
        self.push_local(String::new())
    }

    fn push_local(&mut self, name: String) -> Result<u16, CompileError> {
        let slot = u16::try_from(self.locals.len()).map_err(|_| CompileError::TooManyLocals)?;
        self.locals.push(LocalInfo {
            name,
            captured: false,
        });
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(slot);
        }
        Ok(slot)
    }

    /// Innermost visible local with this name.
    pub(crate) fn resolve_local(&self, name: &str) -> Option<u16> {
        if name.is_empty() {
            return None;
        }
        for scope in self.scopes.iter().rev() {
            for &slot in scope.iter().rev() {
                if self.locals[slot as usize].name == name {
                    return Some(slot);
                }
            }
        }
        None
    }

    pub(crate) fn mark_captured(&mut self, slot: u16) {
        self.locals[slot as usize].captured = true;
    }

    pub(crate) fn is_captured(&self, slot: u16) -> bool {
        self.locals[slot as usize].captured
    }

    pub(crate) fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Existing upvalue slot for a name.
    pub(crate) fn find_upvalue(&self, name: &str) -> Option<u16> {
        self.upvalues
            .iter()
            .position(|u| u.name == name)
            .map(|idx| idx as u16)
    }

    /// Add an upvalue in capture order, reusing an existing slot for the
    /// same name.
    pub(crate) fn add_upvalue(
        &mut self,
        name: &str,
        source: CaptureSource,
    ) -> Result<u16, CompileError> {
        if let Some(idx) = self.find_upvalue(name) {
            return Ok(idx);
        }
        let idx =
            u16::try_from(self.upvalues.len()).map_err(|_| CompileError::TooManyUpvalues)?;
        self.upvalues.push(UpvalInfo {
            name: name.to_string(),
            source,
        });
        Ok(idx)
    }

    pub(crate) fn captures(&self) -> Vec<CaptureSource> {
        self.upvalues.iter().map(|u| u.source).collect()
    }
}
