//! Closures, calls, tail calls, method dispatch and returns.

use crate::bytecode::CaptureSource;
use crate::error::VmError;
use crate::object::{self, FieldKey};
use crate::opcode::OpCode;
use crate::value::{FunctionValue, Value};
use crate::vm::intrinsics::TypeDiscriminant;
use crate::vm::result::ExecutionResult;
use crate::vm::VM;
use std::rc::Rc;

impl VM {
    pub(crate) fn execute_functions(&mut self, opcode: OpCode) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::Closure => {
                let func = self.frame_mut()?.read_u32()?;
                let closure = self.make_closure(func)?;
                self.push(closure)?;
            }

            OpCode::Call => {
                let argc = self.frame_mut()?.read_u16()?;
                let args = self.pop_args(argc)?;
                let callee = self.pop()?;
                if let Some(result) = self.begin_call(callee, args, false)? {
                    self.push(result)?;
                }
            }

            OpCode::TailCall => {
                let argc = self.frame_mut()?.read_u16()?;
                let args = self.pop_args(argc)?;
                let callee = self.pop()?;
                return self.tail_call(callee, args);
            }

            OpCode::InstanceCall => {
                let name_idx = self.frame_mut()?.read_u32()? as usize;
                let argc = self.frame_mut()?.read_u16()?;
                let name = self.frame()?.image.string(name_idx)?;
                let args = self.pop_args(argc)?;
                let receiver = self.pop()?;
                return self.instance_call(receiver, &name, args);
            }

            OpCode::Enter => {
                let count = self.frame_mut()?.read_u16()?;
                self.frame_mut()?.enter(count)?;
            }

            OpCode::Ret => {
                let value = self.pop()?;
                return Ok(ExecutionResult::Return(value));
            }

            OpCode::VarArgs => {
                // The fixed count is implicit in the frame's binding; the
                // operand is carried for disassembly and validation.
                let fixed = self.frame_mut()?.read_u16()?;
                let frame = self.frame()?;
                if fixed != frame.descriptor().num_args {
                    return Err(VmError::Runtime(
                        "vararg count does not match the function".to_string(),
                    ));
                }
                let array = match &frame.var_args {
                    Some(arr) => Value::Array(arr.clone()),
                    None => Value::array(Vec::new()),
                };
                self.push(array)?;
            }

            _ => unreachable!("non-call opcode in call handler"),
        }
        Ok(ExecutionResult::Continue)
    }

    fn pop_args(&mut self, argc: u16) -> Result<Vec<Value>, VmError> {
        let mut args = vec![Value::Undefined; argc as usize];
        for slot in args.iter_mut().rev() {
            *slot = self.pop()?;
        }
        Ok(args)
    }

    /// Build a closure over function `func` of the executing image,
    /// capturing per its descriptor: locals as shared cells of this frame,
    /// upvalues re-shared from this frame's upvalue array.
    fn make_closure(&mut self, func: u32) -> Result<Value, VmError> {
        let image = self.frame()?.image.clone();
        let desc = image.descriptor(func)?;
        let captures = desc.captures.clone();

        let mut upvalues = Vec::with_capacity(captures.len());
        for capture in captures {
            let cell = match capture {
                CaptureSource::Local(slot) => self.frame_mut()?.local_cell(slot)?,
                CaptureSource::Upvalue(idx) => self
                    .frame()?
                    .upvalues
                    .get(idx as usize)
                    .cloned()
                    .ok_or_else(|| {
                        VmError::Runtime(format!("invalid capture of upvalue {}", idx))
                    })?,
            };
            upvalues.push(cell);
        }
        Ok(Value::closure(image, func, Rc::new(upvalues)))
    }

    /// Tail call: replace the current frame instead of pushing a new one.
    /// Native and sequence callees degenerate to an ordinary return of
    /// their result.
    fn tail_call(&mut self, callee: Value, args: Vec<Value>) -> Result<ExecutionResult, VmError> {
        let closure = match &callee {
            Value::Function(FunctionValue::Closure(closure)) => {
                let desc = closure.image.descriptor(closure.func)?;
                if desc.is_sequence {
                    let result = self.make_sequence(closure, args)?;
                    return Ok(ExecutionResult::Return(result));
                }
                closure.clone()
            }
            Value::Function(FunctionValue::Native(native)) => {
                let native = native.clone();
                let result = (native.func)(self, &args)?;
                return Ok(ExecutionResult::Return(result));
            }
            _ => {
                return Err(VmError::Type {
                    operation: "tail call".to_string(),
                    expected: "function".to_string(),
                    got: callee.type_name().to_string(),
                })
            }
        };

        let desc = closure.image.descriptor(closure.func)?;
        let num_args = desc.num_args as usize;
        let num_locals = desc.num_locals as usize;
        let has_varargs = desc.has_varargs;
        let entry = desc.entry_offset as usize;

        let (locals, args_buf) = self.rent_frame_buffers(num_locals, num_args);
        let frame = self.frame_mut()?;

        // The callee's `Enter` clears locals and cells again; resetting
        // here keeps the frame consistent if the prologue faults.
        frame.image = closure.image.clone();
        frame.func = closure.func;
        frame.upvalues = closure.upvalues.clone();
        frame.cells.clear();
        frame.eval.clear();
        if locals.len() > frame.locals.len() {
            frame.locals = locals;
        }
        if args_buf.len() > frame.args.len() {
            frame.args = args_buf;
        }
        for slot in frame.locals.iter_mut() {
            *slot = Value::Undefined;
        }
        for slot in frame.args.iter_mut() {
            *slot = Value::Undefined;
        }
        for (i, arg) in args.iter().take(num_args).enumerate() {
            frame.args[i] = arg.clone();
        }
        frame.var_args = if has_varargs {
            let rest: Vec<Value> = args.iter().skip(num_args).cloned().collect();
            Some(Rc::new(std::cell::RefCell::new(rest)))
        } else {
            None
        };
        frame.ip = entry;
        frame.op_ip = entry;
        Ok(ExecutionResult::Continue)
    }

    /// Method dispatch: a field on the receiver's prototype chain first,
    /// then a type intrinsic. The receiver becomes the first argument.
    fn instance_call(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<ExecutionResult, VmError> {
        if let Value::Object(obj) = &receiver {
            if let Some(method) = object::lookup(obj, &FieldKey::str(name)) {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver.clone());
                full.extend(args);
                if let Some(result) = self.begin_call(method, full, false)? {
                    self.push(result)?;
                }
                return Ok(ExecutionResult::Continue);
            }
        }

        if let Some(disc) = TypeDiscriminant::from_value(&receiver) {
            if let Some(intrinsic) = self.intrinsics_lookup(&disc, name) {
                let result = intrinsic(self, &receiver, &args)?;
                self.push(result)?;
                return Ok(ExecutionResult::Continue);
            }
        }

        Err(VmError::Runtime(format!(
            "no method '{}' on {}",
            name,
            receiver.type_name()
        )))
    }
}
