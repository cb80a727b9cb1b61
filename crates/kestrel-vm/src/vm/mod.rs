//! Virtual machine: a stack machine executing linked program images.
//!
//! One VM instance is single-threaded. Frames live on an explicit call
//! stack; `entry` frames mark re-entry points (embedder calls, native
//! re-entry, sequence resumption) where the interpreter loop hands control
//! back. Exception unwinding walks the static handler tables of each frame,
//! never host exceptions, so `finally` semantics stay explicit and the VM is
//! re-entrant.

use crate::bytecode::ProgramImage;
use crate::error::VmError;
use crate::object::{self, FieldKey, MetaMethod, ObjectData, ObjectRef};
use crate::value::{FunctionValue, NativeFn, Upvalues, Value};
use std::cell::RefCell;
use std::rc::Rc;

mod execution;
pub mod frame;
mod intrinsics;
mod ops;
pub mod pool;
mod result;
pub mod scheduler;
pub mod sequence;

pub use frame::{CallFrame, EvalStack};
pub use intrinsics::{IntrinsicFn, IntrinsicRegistry, TypeDiscriminant};
pub use pool::{ArrayPool, PoolHandle, PoolStats};
pub use scheduler::{CompletionHandle, HostPayload, Scheduler, TaskErrorSink, TaskFailure};
pub use sequence::{SequenceState, SequenceStatus};

use frame::EvalStack as Eval;
use result::ExecutionResult;

/// VM tuning knobs.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum call stack depth.
    pub max_call_depth: usize,
    /// Slot count of pooled frame buffers (locals, args, eval stacks).
    pub pool_buffer_len: usize,
    /// Maximum idle buffers retained by the pool.
    pub pool_max_entries: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 10000,
            pool_buffer_len: 256,
            pool_max_entries: 64,
        }
    }
}

/// Debugger attachment point for the `Breakpoint`/`DebugCheckpoint`
/// instructions. The wire protocol lives outside the engine.
pub trait DebugObserver {
    /// Whether an attached debugger wants to stop at this offset.
    fn should_pause(&mut self, offset: usize) -> bool;
    fn on_break(&mut self, offset: usize);
}

/// Outcome of leaving an interpreter activation.
pub(crate) enum RunExit {
    Returned(Value),
    Suspended(Value),
}

/// One step of a sequence.
pub(crate) enum SeqStep {
    Yielded(Value),
    Done(Value),
}

/// Virtual machine
pub struct VM {
    frames: Vec<CallFrame>,
    globals: ObjectRef,
    pool: ArrayPool,
    config: VmConfig,
    intrinsics: IntrinsicRegistry,
    scheduler: Scheduler,
    sequence_proto: ObjectRef,
    enumerator_proto: ObjectRef,
    debugger: Option<Box<dyn DebugObserver>>,
}

impl VM {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let pool = ArrayPool::new(config.pool_buffer_len, config.pool_max_entries);
        let mut vm = Self {
            frames: Vec::with_capacity(64),
            globals: ObjectData::new().into_ref(),
            pool,
            config,
            intrinsics: IntrinsicRegistry::new(),
            scheduler: Scheduler::new(),
            sequence_proto: sequence::make_sequence_proto().into_ref(),
            enumerator_proto: intrinsics::make_enumerator_proto().into_ref(),
            debugger: None,
        };
        vm.install_core();
        vm
    }

    fn install_core(&mut self) {
        self.register_native("error", Box::new(native_error));
        self.register_native("print", Box::new(native_print));
        self.register_native("typeof", Box::new(native_typeof));
        self.register_native("start", Box::new(scheduler::sched_start));
        self.register_native("run", Box::new(scheduler::sched_run));
        self.register_native(
            "runToCompletion",
            Box::new(scheduler::sched_run_to_completion),
        );
    }

    // ===== Host embedding =====

    /// Execute a program image's main function.
    pub fn execute(&mut self, image: Rc<ProgramImage>) -> Result<Value, VmError> {
        image.descriptor(0)?;
        log::trace!(
            "executing image: {} functions, {} bytes",
            image.functions.len(),
            image.bytecode.len()
        );
        let main = Value::closure(image, 0, Rc::new(Vec::new()));
        self.call_value(&main, &[])
    }

    /// Register a native function on the global object.
    pub fn register_native(&mut self, name: &str, func: NativeFn) {
        let value = Value::native(name, func);
        self.set_global(name, value);
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals
            .borrow_mut()
            .set(FieldKey::str(name), value)
            .expect("global object is never locked by the engine");
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get_own(&FieldKey::str(name))
    }

    /// The VM's global object.
    pub fn globals(&self) -> ObjectRef {
        self.globals.clone()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn attach_debugger(&mut self, debugger: Box<dyn DebugObserver>) {
        self.debugger = Some(debugger);
    }

    /// Invoke a callable value with an argument list and run it to
    /// completion.
    pub fn call_value(&mut self, func: &Value, args: &[Value]) -> Result<Value, VmError> {
        let base = self.frames.len();
        match self.begin_call(func.clone(), args.to_vec(), true)? {
            Some(value) => Ok(value),
            None => match self.run_until(base)? {
                RunExit::Returned(value) => Ok(value),
                RunExit::Suspended(_) => {
                    Err(VmError::Runtime("unexpected suspension".to_string()))
                }
            },
        }
    }

    /// Method invocation for host code and natives: object field first,
    /// then type intrinsics, receiver passed as first argument.
    pub fn invoke_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, VmError> {
        if let Value::Object(obj) = receiver {
            if let Some(method) = object::lookup(obj, &FieldKey::str(name)) {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver.clone());
                full.extend_from_slice(args);
                return self.call_value(&method, &full);
            }
        }
        if let Some(disc) = TypeDiscriminant::from_value(receiver) {
            if let Some(intrinsic) = self.intrinsics.lookup(&disc, name) {
                return intrinsic(self, receiver, args);
            }
        }
        Err(VmError::Runtime(format!(
            "no method '{}' on {}",
            name,
            receiver.type_name()
        )))
    }

    // ===== Internal accessors =====

    pub(crate) fn frame(&self) -> Result<&CallFrame, VmError> {
        self.frames
            .last()
            .ok_or_else(|| VmError::Runtime("no active frame".to_string()))
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut CallFrame, VmError> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::Runtime("no active frame".to_string()))
    }

    pub(crate) fn push(&mut self, value: Value) -> Result<(), VmError> {
        self.frame_mut()?.eval.push(value)
    }

    pub(crate) fn pop(&mut self) -> Result<Value, VmError> {
        self.frame_mut()?.eval.pop()
    }

    pub(crate) fn intrinsics_lookup(
        &self,
        disc: &TypeDiscriminant,
        name: &str,
    ) -> Option<IntrinsicFn> {
        self.intrinsics.lookup(disc, name)
    }

    pub(crate) fn enumerator_proto(&self) -> ObjectRef {
        self.enumerator_proto.clone()
    }

    pub(crate) fn debugger_mut(&mut self) -> Option<&mut Box<dyn DebugObserver>> {
        self.debugger.as_mut()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub(crate) fn rent_frame_buffers(
        &self,
        num_locals: usize,
        num_args: usize,
    ) -> (PoolHandle, PoolHandle) {
        (self.pool.rent(num_locals), self.pool.rent(num_args))
    }

    // ===== Call protocol =====

    /// Start a call. Natives and sequence creations complete immediately
    /// and return `Some(result)`; bytecode callees push a frame and return
    /// `None` (their `Ret` delivers the result).
    pub(crate) fn begin_call(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        entry: bool,
    ) -> Result<Option<Value>, VmError> {
        match callee {
            Value::Function(FunctionValue::Native(native)) => {
                let result = (native.func)(self, &args)?;
                Ok(Some(result))
            }
            Value::Function(FunctionValue::Closure(closure)) => {
                let desc = closure.image.descriptor(closure.func)?;
                if desc.is_sequence {
                    return Ok(Some(self.make_sequence(&closure, args)?));
                }
                let frame = self.build_frame(
                    closure.image.clone(),
                    closure.func,
                    closure.upvalues.clone(),
                    &args,
                    entry,
                )?;
                self.frames.push(frame);
                Ok(None)
            }
            // Objects are callable through their `__call` meta-method.
            Value::Object(obj) => {
                if let Some(handler) = object::find_meta(&obj, MetaMethod::Call) {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(Value::Object(obj));
                    full.extend(args);
                    self.begin_call(handler, full, entry)
                } else {
                    Err(VmError::Type {
                        operation: "call".to_string(),
                        expected: "function".to_string(),
                        got: "object".to_string(),
                    })
                }
            }
            other => Err(VmError::Type {
                operation: "call".to_string(),
                expected: "function".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }

    /// Allocate and bind a frame: rent buffers, copy the declared
    /// arguments, collect the rest into the vararg array.
    pub(crate) fn build_frame(
        &mut self,
        image: Rc<ProgramImage>,
        func: u32,
        upvalues: Upvalues,
        args: &[Value],
        entry: bool,
    ) -> Result<CallFrame, VmError> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(VmError::StackOverflow);
        }
        let desc = image.descriptor(func)?;
        let num_args = desc.num_args as usize;
        let entry_offset = desc.entry_offset as usize;
        let has_varargs = desc.has_varargs;
        let num_locals = desc.num_locals as usize;

        let (locals, mut args_buf) = self.rent_frame_buffers(num_locals, num_args);
        for (i, arg) in args.iter().take(num_args).enumerate() {
            args_buf[i] = arg.clone();
        }
        let var_args = if has_varargs {
            let rest: Vec<Value> = args.iter().skip(num_args).cloned().collect();
            Some(Rc::new(RefCell::new(rest)))
        } else {
            None
        };
        let eval = Eval::new(self.pool.rent(self.config.pool_buffer_len));

        Ok(CallFrame {
            image,
            func,
            ip: entry_offset,
            op_ip: entry_offset,
            locals,
            args: args_buf,
            var_args,
            eval,
            cells: Vec::new(),
            upvalues,
            sequence: None,
            entry,
        })
    }

    // ===== Sequences =====

    /// Calling a sequence function: capture everything, run nothing.
    pub(crate) fn make_sequence(
        &mut self,
        closure: &crate::value::Closure,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        closure.image.descriptor(closure.func)?;
        let state = Rc::new(RefCell::new(SequenceState {
            image: closure.image.clone(),
            func: closure.func,
            upvalues: closure.upvalues.clone(),
            args,
            frame: None,
            status: SequenceStatus::Initial,
            last_yielded: Value::Undefined,
        }));
        let mut obj = ObjectData::new();
        obj.set_prototype(Some(self.sequence_proto.clone()));
        obj.set_user_data(state);
        Ok(Value::Object(obj.into_ref()))
    }

    /// Advance a sequence one step, optionally injecting an error at its
    /// suspension point. The saved frame is pushed as an entry frame and
    /// taken back on suspension.
    pub(crate) fn resume_sequence(
        &mut self,
        state: &Rc<RefCell<SequenceState>>,
        inject: Option<Value>,
    ) -> Result<SeqStep, VmError> {
        let base = self.frames.len();
        let mut frame = {
            let mut s = state.borrow_mut();
            match s.status {
                SequenceStatus::Running => {
                    return Err(VmError::Runtime(
                        "sequence is already running".to_string(),
                    ))
                }
                SequenceStatus::Completed | SequenceStatus::Errored => {
                    return Ok(SeqStep::Done(Value::Undefined));
                }
                SequenceStatus::Initial => {
                    let (image, func, upvalues, args) = (
                        s.image.clone(),
                        s.func,
                        s.upvalues.clone(),
                        std::mem::take(&mut s.args),
                    );
                    drop(s);
                    let frame = self.build_frame(image, func, upvalues, &args, true)?;
                    state.borrow_mut().status = SequenceStatus::Running;
                    frame
                }
                SequenceStatus::Suspended => {
                    s.status = SequenceStatus::Running;
                    s.frame.take().expect("suspended sequence has a frame")
                }
            }
        };

        frame.sequence = Some(state.clone());
        frame.entry = true;
        self.frames.push(frame);

        if let Some(value) = inject {
            self.unwind(value)?;
        }

        match self.run_until(base) {
            Ok(RunExit::Suspended(value)) => Ok(SeqStep::Yielded(value)),
            Ok(RunExit::Returned(value)) => Ok(SeqStep::Done(value)),
            Err(error) => Err(error),
        }
    }

    // ===== Interpreter loop =====

    /// Run frames above `base` until the activation's entry frame returns
    /// or suspends.
    fn run_until(&mut self, base: usize) -> Result<RunExit, VmError> {
        loop {
            let frame = self.frame_mut()?;
            let Some(byte) = frame.fetch_op() else {
                return Err(VmError::BadImage(
                    "execution ran off the end of the bytecode".to_string(),
                ));
            };
            let opcode = crate::opcode::OpCode::from_u8(byte).ok_or(VmError::InvalidOpcode(byte))?;

            let result = match self.execute_instruction(opcode) {
                Ok(result) => result,
                Err(error) if error.is_catchable() => {
                    ExecutionResult::Exception(error.fault_value())
                }
                Err(fatal) => return Err(fatal),
            };

            match result {
                ExecutionResult::Continue => {}

                ExecutionResult::Return(value) => {
                    let finished = self.frames.pop().expect("returning frame exists");
                    if let Some(state) = &finished.sequence {
                        let mut s = state.borrow_mut();
                        s.status = SequenceStatus::Completed;
                        s.last_yielded = Value::Undefined;
                        // Dropping the frame returns its pooled buffers.
                    }
                    if finished.entry {
                        debug_assert_eq!(self.frames.len(), base);
                        return Ok(RunExit::Returned(value));
                    }
                    self.frame_mut()?.eval.push(value)?;
                }

                ExecutionResult::Yield(value) => {
                    let mut frame = self.frames.pop().expect("yielding frame exists");
                    // The backlink is dropped while suspended so the saved
                    // frame and its state do not form a reference cycle.
                    let Some(state) = frame.sequence.take() else {
                        return Err(VmError::Runtime(
                            "yield outside a sequence frame".to_string(),
                        ));
                    };
                    {
                        let mut s = state.borrow_mut();
                        s.status = SequenceStatus::Suspended;
                        s.last_yielded = value.clone();
                        s.frame = Some(frame);
                    }
                    debug_assert_eq!(self.frames.len(), base);
                    return Ok(RunExit::Suspended(value));
                }

                ExecutionResult::Exception(value) => {
                    self.unwind(value)?;
                }
            }
        }
    }

    /// Walk handler records innermost-first in the current frame, then pop
    /// frames (marking sequences errored) until a handler takes the error
    /// or an entry frame is crossed.
    fn unwind(&mut self, value: Value) -> Result<(), VmError> {
        let location = self
            .frames
            .last()
            .and_then(|f| f.image.location_at(f.op_ip));

        loop {
            let Some(frame) = self.frames.last() else {
                return Err(VmError::Uncaught { value, location });
            };

            let target = {
                let at = frame.op_ip as u32;
                frame
                    .descriptor()
                    .handlers
                    .iter()
                    .rev()
                    .find(|h| h.covers(at))
                    .map(|h| h.target)
            };

            if let Some(target) = target {
                let frame = self.frames.last_mut().expect("checked above");
                frame.ip = target as usize;
                // Faults abandon whatever the interrupted expression left
                // behind; the handler starts from a clean stack holding
                // only the error value.
                frame.eval.clear();
                frame.eval.push(value)?;
                return Ok(());
            }

            let dropped = self.frames.pop().expect("checked above");
            if let Some(state) = &dropped.sequence {
                let mut s = state.borrow_mut();
                s.status = SequenceStatus::Errored;
                s.last_yielded = Value::Undefined;
            }
            if dropped.entry {
                return Err(VmError::Uncaught { value, location });
            }
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Core natives =====

/// `error(v)`: raise v as a script error.
fn native_error(_vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    Err(VmError::Script(
        args.first().cloned().unwrap_or(Value::Undefined),
    ))
}

fn native_print(_vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::Undefined)
}

fn native_typeof(_vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    let value = args.first().cloned().unwrap_or(Value::Undefined);
    Ok(Value::string(value.type_name()))
}
