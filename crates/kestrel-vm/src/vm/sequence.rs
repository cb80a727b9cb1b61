//! Sequence (generator) runtime state and the enumerable prototype.
//!
//! Calling a sequence-flagged function allocates no frame: it captures the
//! arguments and upvalues into a `SequenceState` and returns an ordinary
//! object whose prototype provides `getEnumerator`, `moveNext` and
//! `current`, and whose user-data slot anchors the state. The saved frame
//! lives on the heap inside the state until completion; it is never owned by
//! the main call stack between resumptions.

use crate::bytecode::ProgramImage;
use crate::error::VmError;
use crate::object::ObjectData;
use crate::value::{Upvalues, Value};
use crate::vm::frame::CallFrame;
use crate::vm::{SeqStep, VM};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    /// Created, body not started.
    Initial,
    /// Suspended at a yield.
    Suspended,
    /// Currently executing (re-entrant moveNext is an error).
    Running,
    Completed,
    Errored,
}

/// Heap-anchored state of one sequence instance.
#[derive(Debug)]
pub struct SequenceState {
    pub image: Rc<ProgramImage>,
    pub func: u32,
    pub upvalues: Upvalues,
    /// Arguments captured at creation, bound on the first moveNext.
    pub args: Vec<Value>,
    /// The suspended frame (locals and eval stack persist here).
    pub frame: Option<CallFrame>,
    pub status: SequenceStatus,
    pub last_yielded: Value,
}

impl SequenceState {
    pub fn is_done(&self) -> bool {
        matches!(
            self.status,
            SequenceStatus::Completed | SequenceStatus::Errored
        )
    }
}

/// The sequence state anchored by a value, when it is a sequence object.
pub(crate) fn sequence_state_of(value: &Value) -> Option<Rc<RefCell<SequenceState>>> {
    let obj = value.as_object()?;
    let data = obj.borrow().user_data()?;
    data.downcast::<RefCell<SequenceState>>().ok()
}

/// Build the shared prototype carrying the enumerable protocol.
pub(crate) fn make_sequence_proto() -> ObjectData {
    let mut proto = ObjectData::new();
    let entries: [(&str, fn(&mut VM, &[Value]) -> Result<Value, VmError>); 3] = [
        ("getEnumerator", seq_get_enumerator),
        ("moveNext", seq_move_next),
        ("current", seq_current),
    ];
    for (name, func) in entries {
        proto
            .set(
                crate::object::FieldKey::str(name),
                Value::native(name, Box::new(func)),
            )
            .expect("fresh prototype is unlocked");
    }
    proto
}

fn receiver_state(args: &[Value]) -> Result<Rc<RefCell<SequenceState>>, VmError> {
    args.first()
        .and_then(sequence_state_of)
        .ok_or_else(|| VmError::Runtime("receiver is not a sequence".to_string()))
}

/// `getEnumerator()` on a sequence returns the sequence itself.
fn seq_get_enumerator(_vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    receiver_state(args)?;
    Ok(args[0].clone())
}

/// Advance to the next yield; true while a value was produced.
fn seq_move_next(vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    let state = receiver_state(args)?;
    match vm.resume_sequence(&state, None)? {
        SeqStep::Yielded(_) => Ok(Value::Boolean(true)),
        SeqStep::Done(_) => Ok(Value::Boolean(false)),
    }
}

/// The value produced by the last successful moveNext.
fn seq_current(_vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    let state = receiver_state(args)?;
    let state = state.borrow();
    Ok(state.last_yielded.clone())
}
