//! Call frame: locals, arguments, evaluation stack, upvalues and the open
//! cells of captured locals.

use crate::bytecode::{FunctionDescriptor, ProgramImage};
use crate::error::VmError;
use crate::opcode::encoding;
use crate::value::{ArrayRef, UpvalueCell, Upvalues, Value};
use crate::vm::pool::PoolHandle;
use crate::vm::sequence::SequenceState;
use std::cell::RefCell;
use std::rc::Rc;

/// Rented evaluation stack with a top index.
#[derive(Debug)]
pub struct EvalStack {
    buf: PoolHandle,
    top: usize,
}

impl EvalStack {
    pub fn new(buf: PoolHandle) -> Self {
        Self { buf, top: 0 }
    }

    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.top == self.buf.len() {
            return Err(VmError::Runtime("evaluation stack overflow".to_string()));
        }
        self.buf[self.top] = value;
        self.top += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        if self.top == 0 {
            return Err(VmError::Runtime("evaluation stack underflow".to_string()));
        }
        self.top -= 1;
        Ok(std::mem::replace(&mut self.buf[self.top], Value::Undefined))
    }

    pub fn peek(&self) -> Result<&Value, VmError> {
        if self.top == 0 {
            return Err(VmError::Runtime("evaluation stack underflow".to_string()));
        }
        Ok(&self.buf[self.top - 1])
    }

    pub fn clear(&mut self) {
        for slot in self.buf[..self.top].iter_mut() {
            *slot = Value::Undefined;
        }
        self.top = 0;
    }

    pub fn depth(&self) -> usize {
        self.top
    }
}

/// Function activation record.
#[derive(Debug)]
pub struct CallFrame {
    pub image: Rc<ProgramImage>,
    /// Index into the image's function table.
    pub func: u32,
    /// Instruction pointer: absolute byte offset of the next instruction.
    pub ip: usize,
    /// Offset of the instruction currently executing, for handler ranges
    /// and debug positions.
    pub op_ip: usize,
    pub locals: PoolHandle,
    pub args: PoolHandle,
    /// Trailing arguments, when the function declares varargs.
    pub var_args: Option<ArrayRef>,
    pub eval: EvalStack,
    /// Open shared cells for captured locals, created on first capture.
    /// Reads and writes of a celled slot go through the cell so every
    /// closure sees the same identity.
    pub cells: Vec<Option<UpvalueCell>>,
    pub upvalues: Upvalues,
    /// Backlink to the owning sequence, when this is a sequence frame.
    pub sequence: Option<Rc<RefCell<SequenceState>>>,
    /// Returning from (or unwinding past) an entry frame leaves the
    /// interpreter loop and hands control back to the embedder or the
    /// native caller.
    pub entry: bool,
}

impl CallFrame {
    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.image.functions[self.func as usize]
    }

    /// Fetch the next opcode byte and advance. `None` past the end of the
    /// instruction stream.
    pub fn fetch_op(&mut self) -> Option<u8> {
        let byte = self.image.bytecode.get(self.ip).copied();
        if byte.is_some() {
            self.op_ip = self.ip;
            self.ip += 1;
        }
        byte
    }

    pub fn read_u16(&mut self) -> Result<u16, VmError> {
        let v = encoding::read_u16(&self.image.bytecode, self.ip)?;
        self.ip += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, VmError> {
        let v = encoding::read_u32(&self.image.bytecode, self.ip)?;
        self.ip += 4;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32, VmError> {
        let v = encoding::read_i32(&self.image.bytecode, self.ip)?;
        self.ip += 4;
        Ok(v)
    }

    // ===== Locals (cell-aware) =====

    fn check_slot(&self, slot: u16) -> Result<usize, VmError> {
        let idx = slot as usize;
        if idx >= self.locals.len() {
            return Err(VmError::Runtime(format!("invalid local slot {}", slot)));
        }
        Ok(idx)
    }

    pub fn get_local(&self, slot: u16) -> Result<Value, VmError> {
        let idx = self.check_slot(slot)?;
        if let Some(Some(cell)) = self.cells.get(idx) {
            return Ok(cell.borrow().clone());
        }
        Ok(self.locals[idx].clone())
    }

    pub fn set_local(&mut self, slot: u16, value: Value) -> Result<(), VmError> {
        let idx = self.check_slot(slot)?;
        if let Some(Some(cell)) = self.cells.get(idx) {
            *cell.borrow_mut() = value;
            return Ok(());
        }
        self.locals[idx] = value;
        Ok(())
    }

    /// Shared cell for a captured slot, created from the raw value on first
    /// capture. Every closure capturing this slot while the cell is open
    /// shares it with the frame.
    pub fn local_cell(&mut self, slot: u16) -> Result<UpvalueCell, VmError> {
        let idx = self.check_slot(slot)?;
        if self.cells.len() <= idx {
            self.cells.resize(idx + 1, None);
        }
        if let Some(cell) = &self.cells[idx] {
            return Ok(cell.clone());
        }
        let cell = Rc::new(RefCell::new(self.locals[idx].clone()));
        self.cells[idx] = Some(cell.clone());
        Ok(cell)
    }

    /// Detach the slot's cell, syncing its value back into the raw slot.
    /// The next capture gets a fresh binding.
    pub fn close_local(&mut self, slot: u16) -> Result<(), VmError> {
        let idx = self.check_slot(slot)?;
        if let Some(cell) = self.cells.get_mut(idx).and_then(Option::take) {
            self.locals[idx] = cell.borrow().clone();
        }
        Ok(())
    }

    /// Function prologue: reset locals and open cells (also the reset point
    /// of tail calls).
    pub fn enter(&mut self, local_count: u16) -> Result<(), VmError> {
        let count = local_count as usize;
        if count > self.locals.len() {
            return Err(VmError::Runtime(
                "locals buffer smaller than frame requires".to_string(),
            ));
        }
        for slot in self.locals[..count].iter_mut() {
            *slot = Value::Undefined;
        }
        self.cells.clear();
        Ok(())
    }
}
