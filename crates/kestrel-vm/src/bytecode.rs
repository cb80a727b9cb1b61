//! Program image: the immutable, linkable compilation artifact.
//!
//! An image holds the constant pools, the function table, the linked
//! instruction stream and the optional debug tables. Binary layout:
//!
//! ```text
//! magic (4) | version (u16)
//! | #numbers (u32) | numbers (f64*)
//! | #strings (u32) | (u32 length + UTF-8 bytes)*
//! | #functions (u32) | function table
//! | bytecode length (u32) | bytecode bytes
//! | debug section length (u32) | debug bytes
//! ```
//!
//! Everything is little-endian. Magic and version are validated on load.

use crate::error::{SourceLocation, VmError};
use crate::opcode::encoding::{read_u16, read_u32, write_u16, write_u32};
use std::rc::Rc;

pub const IMAGE_MAGIC: [u8; 4] = *b"KSTL";
pub const IMAGE_VERSION: u16 = 1;

/// Where one upvalue slot of a new closure is captured from, relative to the
/// frame executing the `Closure` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// Shared cell of local slot i of the current frame.
    Local(u16),
    /// Upvalue j of the current frame, re-shared.
    Upvalue(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Catch,
    Finally,
}

/// Exception handler record: a protected byte range and a target. The VM
/// scans a function's records innermost (latest) first for one covering the
/// faulting instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRecord {
    pub start: u32,
    pub end: u32,
    pub target: u32,
    pub kind: HandlerKind,
}

impl HandlerRecord {
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// One entry of the function table.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    /// Absolute byte offset of the entry point.
    pub entry_offset: u32,
    /// Length of the function's linked code in bytes.
    pub code_len: u32,
    pub num_args: u16,
    pub num_locals: u16,
    pub num_upvalues: u16,
    pub has_varargs: bool,
    /// Sequence functions return an enumerable object instead of executing.
    pub is_sequence: bool,
    /// String-pool index of the debug name, if any.
    pub debug_name: Option<u32>,
    /// One entry per upvalue slot, in capture order.
    pub captures: Vec<CaptureSource>,
    pub handlers: Vec<HandlerRecord>,
}

/// Lexical scope entry of the debug tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeInfo {
    pub start: u32,
    pub end: u32,
    /// (local slot, string-pool index of the name)
    pub locals: Vec<(u16, u32)>,
}

/// Debug tables, stripped out of the instruction stream by the linker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugInfo {
    /// (instruction offset, file string index, line), sorted by offset.
    pub positions: Vec<(u32, u32, u32)>,
    /// Statement ranges: (start offset, end offset, line).
    pub statements: Vec<(u32, u32, u32)>,
    pub scopes: Vec<ScopeInfo>,
    /// (entry offset, name string index), one per named function.
    pub function_names: Vec<(u32, u32)>,
}

/// The immutable compilation artifact executed by the VM.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramImage {
    pub numbers: Vec<f64>,
    pub strings: Vec<Rc<str>>,
    pub functions: Vec<FunctionDescriptor>,
    pub bytecode: Vec<u8>,
    pub debug: Option<DebugInfo>,
}

impl ProgramImage {
    pub fn descriptor(&self, func: u32) -> Result<&FunctionDescriptor, VmError> {
        self.functions
            .get(func as usize)
            .ok_or(VmError::BadFunction(func as usize))
    }

    pub fn number(&self, idx: usize) -> Result<f64, VmError> {
        self.numbers.get(idx).copied().ok_or(VmError::BadConstant(idx))
    }

    pub fn string(&self, idx: usize) -> Result<Rc<str>, VmError> {
        self.strings.get(idx).cloned().ok_or(VmError::BadConstant(idx))
    }

    pub fn function_name(&self, func: u32) -> Option<Rc<str>> {
        let idx = self.functions.get(func as usize)?.debug_name?;
        self.strings.get(idx as usize).cloned()
    }

    /// Source location of the instruction at `offset`, resolved through the
    /// debug position table.
    pub fn location_at(&self, offset: usize) -> Option<SourceLocation> {
        let positions = &self.debug.as_ref()?.positions;
        let offset = offset as u32;
        // Last position entry at or before the offset.
        let idx = match positions.binary_search_by_key(&offset, |&(off, _, _)| off) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        let (_, file, line) = positions[idx];
        Some(SourceLocation {
            file: self.strings.get(file as usize).cloned(),
            line,
        })
    }

    // ===== Serialization =====

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&IMAGE_MAGIC);
        write_u16(&mut out, IMAGE_VERSION);

        write_u32(&mut out, self.numbers.len() as u32);
        for n in &self.numbers {
            out.extend_from_slice(&n.to_le_bytes());
        }

        write_u32(&mut out, self.strings.len() as u32);
        for s in &self.strings {
            write_u32(&mut out, s.len() as u32);
            out.extend_from_slice(s.as_bytes());
        }

        write_u32(&mut out, self.functions.len() as u32);
        for func in &self.functions {
            write_function(&mut out, func);
        }

        write_u32(&mut out, self.bytecode.len() as u32);
        out.extend_from_slice(&self.bytecode);

        let debug_bytes = match &self.debug {
            Some(debug) => write_debug(debug),
            None => Vec::new(),
        };
        write_u32(&mut out, debug_bytes.len() as u32);
        out.extend_from_slice(&debug_bytes);

        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VmError> {
        let mut r = Reader::new(bytes);

        let magic = r.take(4)?;
        if magic != IMAGE_MAGIC {
            return Err(VmError::BadImage("bad magic".to_string()));
        }
        let version = r.u16()?;
        if version != IMAGE_VERSION {
            return Err(VmError::BadImage(format!(
                "unsupported image version {} (expected {})",
                version, IMAGE_VERSION
            )));
        }

        let num_count = r.u32()? as usize;
        let mut numbers = Vec::with_capacity(num_count.min(1 << 16));
        for _ in 0..num_count {
            let raw = r.take(8)?;
            numbers.push(f64::from_le_bytes(raw.try_into().expect("8-byte slice")));
        }

        let str_count = r.u32()? as usize;
        let mut strings = Vec::with_capacity(str_count.min(1 << 16));
        for _ in 0..str_count {
            let len = r.u32()? as usize;
            let raw = r.take(len)?;
            let s = std::str::from_utf8(raw)
                .map_err(|_| VmError::BadImage("invalid UTF-8 in string pool".to_string()))?;
            strings.push(Rc::from(s));
        }

        let func_count = r.u32()? as usize;
        let mut functions = Vec::with_capacity(func_count.min(1 << 16));
        for _ in 0..func_count {
            functions.push(read_function(&mut r)?);
        }

        let code_len = r.u32()? as usize;
        let bytecode = r.take(code_len)?.to_vec();

        let debug_len = r.u32()? as usize;
        let debug = if debug_len == 0 {
            None
        } else {
            let raw = r.take(debug_len)?;
            Some(read_debug(raw)?)
        };

        if !r.at_end() {
            return Err(VmError::BadImage("trailing bytes after image".to_string()));
        }

        for func in &functions {
            let end = func.entry_offset as usize + func.code_len as usize;
            if end > bytecode.len() {
                return Err(VmError::BadImage(
                    "function code range outside bytecode".to_string(),
                ));
            }
        }

        log::debug!(
            "loaded program image: {} functions, {} bytecode bytes, {} numbers, {} strings",
            functions.len(),
            bytecode.len(),
            numbers.len(),
            strings.len()
        );

        Ok(Self {
            numbers,
            strings,
            functions,
            bytecode,
            debug,
        })
    }
}

// ===== Binary helpers =====

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, at: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], VmError> {
        let slice = self
            .bytes
            .get(self.at..self.at + len)
            .ok_or_else(|| VmError::BadImage("truncated image".to_string()))?;
        self.at += len;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, VmError> {
        let v = read_u16(self.bytes, self.at)
            .map_err(|_| VmError::BadImage("truncated image".to_string()))?;
        self.at += 2;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32, VmError> {
        let v = read_u32(self.bytes, self.at)
            .map_err(|_| VmError::BadImage("truncated image".to_string()))?;
        self.at += 4;
        Ok(v)
    }

    fn at_end(&self) -> bool {
        self.at == self.bytes.len()
    }
}

const NO_NAME: u32 = u32::MAX;

fn write_function(out: &mut Vec<u8>, func: &FunctionDescriptor) {
    write_u32(out, func.entry_offset);
    write_u32(out, func.code_len);
    write_u16(out, func.num_args);
    write_u16(out, func.num_locals);
    write_u16(out, func.num_upvalues);
    let mut flags = 0u8;
    if func.has_varargs {
        flags |= 1;
    }
    if func.is_sequence {
        flags |= 2;
    }
    out.push(flags);
    write_u32(out, func.debug_name.unwrap_or(NO_NAME));

    for capture in &func.captures {
        match capture {
            CaptureSource::Local(slot) => {
                out.push(0);
                write_u16(out, *slot);
            }
            CaptureSource::Upvalue(idx) => {
                out.push(1);
                write_u16(out, *idx);
            }
        }
    }

    write_u16(out, func.handlers.len() as u16);
    for handler in &func.handlers {
        write_u32(out, handler.start);
        write_u32(out, handler.end);
        write_u32(out, handler.target);
        out.push(match handler.kind {
            HandlerKind::Catch => 0,
            HandlerKind::Finally => 1,
        });
    }
}

fn read_function(r: &mut Reader<'_>) -> Result<FunctionDescriptor, VmError> {
    let entry_offset = r.u32()?;
    let code_len = r.u32()?;
    let num_args = r.u16()?;
    let num_locals = r.u16()?;
    let num_upvalues = r.u16()?;
    let flags = r.take(1)?[0];
    let name = r.u32()?;

    let mut captures = Vec::with_capacity(num_upvalues as usize);
    for _ in 0..num_upvalues {
        let kind = r.take(1)?[0];
        let idx = r.u16()?;
        captures.push(match kind {
            0 => CaptureSource::Local(idx),
            1 => CaptureSource::Upvalue(idx),
            other => {
                return Err(VmError::BadImage(format!(
                    "unknown capture source tag {}",
                    other
                )))
            }
        });
    }

    let handler_count = r.u16()? as usize;
    let mut handlers = Vec::with_capacity(handler_count);
    for _ in 0..handler_count {
        let start = r.u32()?;
        let end = r.u32()?;
        let target = r.u32()?;
        let kind = match r.take(1)?[0] {
            0 => HandlerKind::Catch,
            1 => HandlerKind::Finally,
            other => {
                return Err(VmError::BadImage(format!(
                    "unknown handler kind tag {}",
                    other
                )))
            }
        };
        handlers.push(HandlerRecord {
            start,
            end,
            target,
            kind,
        });
    }

    Ok(FunctionDescriptor {
        entry_offset,
        code_len,
        num_args,
        num_locals,
        num_upvalues,
        has_varargs: flags & 1 != 0,
        is_sequence: flags & 2 != 0,
        debug_name: (name != NO_NAME).then_some(name),
        captures,
        handlers,
    })
}

fn write_debug(debug: &DebugInfo) -> Vec<u8> {
    let mut out = Vec::new();

    write_u32(&mut out, debug.positions.len() as u32);
    for (offset, file, line) in &debug.positions {
        write_u32(&mut out, *offset);
        write_u32(&mut out, *file);
        write_u32(&mut out, *line);
    }

    write_u32(&mut out, debug.statements.len() as u32);
    for (start, end, line) in &debug.statements {
        write_u32(&mut out, *start);
        write_u32(&mut out, *end);
        write_u32(&mut out, *line);
    }

    write_u32(&mut out, debug.scopes.len() as u32);
    for scope in &debug.scopes {
        write_u32(&mut out, scope.start);
        write_u32(&mut out, scope.end);
        write_u16(&mut out, scope.locals.len() as u16);
        for (slot, name) in &scope.locals {
            write_u16(&mut out, *slot);
            write_u32(&mut out, *name);
        }
    }

    write_u32(&mut out, debug.function_names.len() as u32);
    for (offset, name) in &debug.function_names {
        write_u32(&mut out, *offset);
        write_u32(&mut out, *name);
    }

    out
}

fn read_debug(bytes: &[u8]) -> Result<DebugInfo, VmError> {
    let mut r = Reader::new(bytes);

    let count = r.u32()? as usize;
    let mut positions = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        positions.push((r.u32()?, r.u32()?, r.u32()?));
    }

    let count = r.u32()? as usize;
    let mut statements = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        statements.push((r.u32()?, r.u32()?, r.u32()?));
    }

    let count = r.u32()? as usize;
    let mut scopes = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let start = r.u32()?;
        let end = r.u32()?;
        let local_count = r.u16()? as usize;
        let mut locals = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            locals.push((r.u16()?, r.u32()?));
        }
        scopes.push(ScopeInfo { start, end, locals });
    }

    let count = r.u32()? as usize;
    let mut function_names = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        function_names.push((r.u32()?, r.u32()?));
    }

    if !r.at_end() {
        return Err(VmError::BadImage(
            "trailing bytes in debug section".to_string(),
        ));
    }

    Ok(DebugInfo {
        positions,
        statements,
        scopes,
        function_names,
    })
}
