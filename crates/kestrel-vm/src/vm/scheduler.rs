//! Cooperative async scheduler.
//!
//! Single-threaded: tasks are sequence instances, advanced one step per
//! pump. A pump drains the ready queue by its length at entry, FIFO;
//! continuations enqueued during the pump wait for the next one. Tasks that
//! yield a host-completion sentinel park until the completion is signalled;
//! completions are signalled from any thread under a mutex, but consumed
//! only from the scheduler's owner thread at the start of each pump. Task
//! failures land in the mutex-guarded error FIFO and the oldest is raised by
//! the next `run()`.

use crate::error::{SourceLocation, VmError};
use crate::object::ObjectData;
use crate::sync::{shared_queue, Arc, Mutex, SharedQueue};
use crate::value::Value;
use crate::vm::sequence::{sequence_state_of, SequenceState};
use crate::vm::{SeqStep, VM};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// A failure recorded by the scheduler. Flattened to owned text so host
/// threads can enqueue and inspect it.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub message: String,
    pub location: Option<(String, u32)>,
}

impl TaskFailure {
    fn from_vm_error(error: &VmError) -> Self {
        let location = match error {
            VmError::Uncaught {
                location: Some(loc),
                ..
            } => Some((
                loc.file.as_deref().unwrap_or("<unknown>").to_string(),
                loc.line,
            )),
            _ => None,
        };
        Self {
            message: error.fault_value().to_string(),
            location,
        }
    }

    fn into_vm_error(self) -> VmError {
        VmError::TaskFailed {
            message: self.message,
            location: self.location.map(|(file, line)| SourceLocation {
                file: Some(file.into()),
                line,
            }),
        }
    }
}

/// Thread-safe handle for reporting a task failure from host code (e.g. a
/// host-side timeout).
#[derive(Clone)]
pub struct TaskErrorSink {
    queue: SharedQueue<VecDeque<TaskFailure>>,
}

impl TaskErrorSink {
    pub fn report(&self, message: impl Into<String>) {
        self.queue.lock().push_back(TaskFailure {
            message: message.into(),
            location: None,
        });
    }
}

/// Payload a host thread may complete a completion with. `Value` itself is
/// not `Send`; the payload converts on the VM thread.
#[derive(Debug, Clone)]
pub enum HostPayload {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl HostPayload {
    fn to_value(&self) -> Value {
        match self {
            HostPayload::Undefined => Value::Undefined,
            HostPayload::Null => Value::Null,
            HostPayload::Boolean(b) => Value::Boolean(*b),
            HostPayload::Number(n) => Value::Number(*n),
            HostPayload::Text(s) => Value::string(s.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct CompletionState {
    ready: bool,
    result: Option<Result<HostPayload, String>>,
}

/// Send + Sync side of a host completion.
#[derive(Clone)]
pub struct CompletionHandle {
    state: Arc<Mutex<CompletionState>>,
}

impl CompletionHandle {
    pub fn complete(&self, payload: HostPayload) {
        let mut state = self.state.lock();
        state.ready = true;
        state.result = Some(Ok(payload));
    }

    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.state.lock();
        state.ready = true;
        state.result = Some(Err(message.into()));
    }
}

/// VM-side anchor stored in the sentinel object's user-data slot.
pub(crate) struct CompletionCell {
    state: Arc<Mutex<CompletionState>>,
}

struct Task {
    seq: Rc<RefCell<SequenceState>>,
    /// Failure injected at the task's suspension point on its next resume.
    inject: Option<String>,
}

struct ParkedTask {
    task: Task,
    sentinel: Value,
    state: Arc<Mutex<CompletionState>>,
}

/// Scheduler state owned by one VM.
pub struct Scheduler {
    ready: VecDeque<Task>,
    parked: Vec<ParkedTask>,
    active: usize,
    errors: SharedQueue<VecDeque<TaskFailure>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            parked: Vec::new(),
            active: 0,
            errors: shared_queue(VecDeque::new()),
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.active
    }

    fn idle(&self) -> bool {
        self.active == 0 && self.ready.is_empty() && self.parked.is_empty()
    }
}

impl VM {
    /// Thread-safe error injector for host code.
    pub fn task_error_sink(&self) -> TaskErrorSink {
        TaskErrorSink {
            queue: self.scheduler().errors.clone(),
        }
    }

    /// Create a completion sentinel: the script-visible object (yield it
    /// from a task) and the host handle (signal it from any thread). When
    /// the task resumes, the object carries `done` and `value` fields.
    pub fn create_completion(&mut self) -> (Value, CompletionHandle) {
        let state = Arc::new(Mutex::new(CompletionState::default()));
        let mut obj = ObjectData::new();
        obj.set(
            crate::object::FieldKey::str("done"),
            Value::Boolean(false),
        )
        .expect("fresh object is unlocked");
        obj.set_user_data(Rc::new(CompletionCell {
            state: state.clone(),
        }));
        (Value::Object(obj.into_ref()), CompletionHandle { state })
    }

    /// One pump: promote signalled completions, then drain the ready queue
    /// by its length at entry. Returns whether any task advanced.
    pub(crate) fn scheduler_pump(&mut self) -> Result<bool, VmError> {
        let mut progressed = false;

        // Promote signalled completions, in park order, on the owner
        // thread only.
        let parked = std::mem::take(&mut self.scheduler_mut().parked);
        for mut parked_task in parked {
            let outcome = {
                let state = parked_task.state.lock();
                if state.ready {
                    state.result.clone()
                } else {
                    None
                }
            };
            match outcome {
                Some(Ok(payload)) => {
                    if let Value::Object(obj) = &parked_task.sentinel {
                        let mut data = obj.borrow_mut();
                        data.set(
                            crate::object::FieldKey::str("done"),
                            Value::Boolean(true),
                        )?;
                        data.set(crate::object::FieldKey::str("value"), payload.to_value())?;
                    }
                    self.scheduler_mut().ready.push_back(parked_task.task);
                    progressed = true;
                }
                Some(Err(message)) => {
                    parked_task.task.inject = Some(message);
                    self.scheduler_mut().ready.push_back(parked_task.task);
                    progressed = true;
                }
                None => self.scheduler_mut().parked.push(parked_task),
            }
        }

        let snapshot = self.scheduler().ready.len();
        log::trace!(
            "scheduler pump: {} ready, {} parked, {} active",
            snapshot,
            self.scheduler().parked.len(),
            self.scheduler().active_tasks()
        );

        for _ in 0..snapshot {
            let Some(mut task) = self.scheduler_mut().ready.pop_front() else {
                break;
            };
            progressed = true;
            let inject = task.inject.take().map(Value::string);
            match self.resume_sequence(&task.seq, inject) {
                Ok(SeqStep::Yielded(value)) => {
                    if let Some(state) = completion_of(&value) {
                        self.scheduler_mut().parked.push(ParkedTask {
                            task,
                            sentinel: value,
                            state,
                        });
                    } else {
                        // Plain cooperative yield: back of the queue, next
                        // pump.
                        self.scheduler_mut().ready.push_back(task);
                    }
                }
                Ok(SeqStep::Done(_)) => {
                    self.scheduler_mut().active -= 1;
                }
                Err(error) => {
                    self.scheduler_mut().active -= 1;
                    let failure = TaskFailure::from_vm_error(&error);
                    log::debug!("async task failed: {}", failure.message);
                    self.scheduler().errors.lock().push_back(failure);
                }
            }
        }
        Ok(progressed)
    }

    fn raise_oldest_task_error(&mut self) -> Result<(), VmError> {
        let failure = self.scheduler().errors.lock().pop_front();
        match failure {
            Some(failure) => Err(failure.into_vm_error()),
            None => Ok(()),
        }
    }
}

fn completion_of(value: &Value) -> Option<Arc<Mutex<CompletionState>>> {
    let obj = value.as_object()?;
    let data = obj.borrow().user_data()?;
    let cell = data.downcast::<CompletionCell>().ok()?;
    Some(cell.state.clone())
}

// ===== Script-facing natives =====

/// `start(task)`: accept a function (invoked to obtain a sequence) or an
/// enumerable object; count it active and schedule its first step for the
/// next pump.
pub(crate) fn sched_start(vm: &mut VM, args: &[Value]) -> Result<Value, VmError> {
    let task = args.first().cloned().unwrap_or(Value::Undefined);
    let seq_obj = match &task {
        Value::Function(_) => vm.call_value(&task, &[])?,
        Value::Object(_) => {
            if sequence_state_of(&task).is_some() {
                task.clone()
            } else {
                vm.invoke_method(&task, "getEnumerator", &[])?
            }
        }
        other => {
            return Err(VmError::Type {
                operation: "start".to_string(),
                expected: "function or enumerable object".to_string(),
                got: other.type_name().to_string(),
            })
        }
    };
    let seq = sequence_state_of(&seq_obj)
        .ok_or_else(|| VmError::Runtime("start() requires a sequence-backed task".to_string()))?;
    let scheduler = vm.scheduler_mut();
    scheduler.active += 1;
    scheduler.ready.push_back(Task { seq, inject: None });
    Ok(Value::Undefined)
}

/// `run()`: one pump; raise the oldest pending task failure; true while
/// tasks or errors remain.
pub(crate) fn sched_run(vm: &mut VM, _args: &[Value]) -> Result<Value, VmError> {
    vm.scheduler_pump()?;
    vm.raise_oldest_task_error()?;
    let busy = !vm.scheduler().idle() || !vm.scheduler().errors.lock().is_empty();
    Ok(Value::Boolean(busy))
}

/// `runToCompletion()`: pump to quiescence, sleeping briefly between pumps
/// that made no progress so external completions are not busy-polled.
pub(crate) fn sched_run_to_completion(vm: &mut VM, _args: &[Value]) -> Result<Value, VmError> {
    loop {
        let progressed = vm.scheduler_pump()?;
        vm.raise_oldest_task_error()?;
        if vm.scheduler().idle() {
            return Ok(Value::Undefined);
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
