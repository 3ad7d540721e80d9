#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::{
    AgentExecutor, CancelToken, ContentPart, ExecutionError, ExecutionEvent, Interaction,
    InteractionOutcome, ProviderProfile, RunMessage, RunRequest, SessionId, TaskId,
};
use agent_session::{
    CoordinatorConfig, ProjectionListener, Role, SessionSnapshot, TaskCoordinator, TaskPhase,
    TaskScheduler, ThreadScheduler,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Listener that records every notification.
#[derive(Default)]
pub struct RecordingListener {
    changes: Mutex<Vec<SessionId>>,
    compressions: Mutex<Vec<SessionId>>,
}

impl RecordingListener {
    pub fn change_count(&self, session_id: &str) -> usize {
        lock_unpoisoned(&self.changes)
            .iter()
            .filter(|changed| changed.as_str() == session_id)
            .count()
    }

    pub fn compressions(&self) -> Vec<SessionId> {
        lock_unpoisoned(&self.compressions).clone()
    }
}

impl ProjectionListener for RecordingListener {
    fn projection_changed(&self, session_id: &str) {
        lock_unpoisoned(&self.changes).push(session_id.to_string());
    }

    fn compression_needed(&self, session_id: &str) {
        lock_unpoisoned(&self.compressions).push(session_id.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Answer(String),
    Fail(String),
    /// Emits an `Error` event before failing with the same message.
    EmitAndFail(String),
}

#[derive(Debug, Clone)]
pub struct StartedRun {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub generation: u64,
    pub prompt: String,
    pub history_len: usize,
    pub token: CancelToken,
}

#[derive(Default)]
struct GateState {
    started: Vec<StartedRun>,
    released: HashMap<TaskId, GateOutcome>,
    returned: Vec<TaskId>,
}

/// Executor whose runs block until the test releases them.
///
/// Each run emits one content delta, then waits. With `ignore_cancel` the run keeps
/// waiting after its token is cancelled, which models a slow provider that unwinds late.
pub struct GatedExecutor {
    state: Mutex<GateState>,
    changed: Condvar,
    ignore_cancel: bool,
}

impl GatedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
            ignore_cancel: false,
        })
    }

    pub fn ignoring_cancel() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
            ignore_cancel: true,
        })
    }

    pub fn release(&self, task_id: TaskId, outcome: GateOutcome) {
        lock_unpoisoned(&self.state)
            .released
            .insert(task_id, outcome);
        self.changed.notify_all();
    }

    /// Waits until at least `count` runs have started and returns them in start order.
    pub fn wait_for_runs(&self, count: usize) -> Vec<StartedRun> {
        let deadline = Instant::now() + WAIT;
        let mut state = lock_unpoisoned(&self.state);
        while state.started.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert!(
                !remaining.is_zero(),
                "expected {count} runs, saw {}",
                state.started.len()
            );
            state = match self.changed.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        state.started.clone()
    }

    pub fn started(&self) -> Vec<StartedRun> {
        lock_unpoisoned(&self.state).started.clone()
    }

    /// True once `run` for `task_id` has returned to the coordinator.
    pub fn has_returned(&self, task_id: TaskId) -> bool {
        lock_unpoisoned(&self.state).returned.contains(&task_id)
    }
}

impl AgentExecutor for GatedExecutor {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: "gated".to_string(),
            model_id: "gated-model".to_string(),
            context_window: Some(1_000),
        }
    }

    fn run(
        &self,
        req: RunRequest,
        cancel: CancelToken,
        emit: &mut dyn FnMut(ExecutionEvent),
        _interact: &mut dyn FnMut(Interaction) -> InteractionOutcome,
    ) -> Result<String, ExecutionError> {
        let prompt = prompt_text(&req);
        {
            let mut state = lock_unpoisoned(&self.state);
            state.started.push(StartedRun {
                task_id: req.task_id,
                session_id: req.session_id.clone(),
                generation: req.generation,
                prompt: prompt.clone(),
                history_len: req.messages.len(),
                token: cancel.clone(),
            });
        }
        self.changed.notify_all();

        emit(ExecutionEvent::ContentDelta {
            session_id: req.session_id.clone(),
            message_id: format!("{}-reply", req.task_id),
            text: format!("working on {prompt}"),
        });

        let outcome = {
            let mut state = lock_unpoisoned(&self.state);
            loop {
                if let Some(outcome) = state.released.remove(&req.task_id) {
                    state.returned.push(req.task_id);
                    break outcome;
                }
                if !self.ignore_cancel && cancel.is_cancelled() {
                    state.returned.push(req.task_id);
                    return Err(ExecutionError::Cancelled);
                }
                state = match self.changed.wait_timeout(state, Duration::from_millis(5)) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        };

        match outcome {
            GateOutcome::Answer(text) => Ok(text),
            GateOutcome::Fail(message) => Err(ExecutionError::failed(message)),
            GateOutcome::EmitAndFail(message) => {
                emit(ExecutionEvent::Error {
                    session_id: req.session_id.clone(),
                    message: message.clone(),
                });
                Err(ExecutionError::failed(message))
            }
        }
    }
}

/// Executor that answers with the prompt and records the history size of every run.
#[derive(Default)]
pub struct EchoExecutor {
    histories: Mutex<Vec<Vec<RunMessage>>>,
}

impl EchoExecutor {
    pub fn history_lens(&self) -> Vec<usize> {
        lock_unpoisoned(&self.histories).iter().map(Vec::len).collect()
    }

    pub fn histories(&self) -> Vec<Vec<RunMessage>> {
        lock_unpoisoned(&self.histories).clone()
    }
}

impl AgentExecutor for EchoExecutor {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: "echo".to_string(),
            model_id: "echo-model".to_string(),
            context_window: None,
        }
    }

    fn run(
        &self,
        req: RunRequest,
        _cancel: CancelToken,
        _emit: &mut dyn FnMut(ExecutionEvent),
        _interact: &mut dyn FnMut(Interaction) -> InteractionOutcome,
    ) -> Result<String, ExecutionError> {
        lock_unpoisoned(&self.histories).push(req.messages.clone());
        Ok(format!("echo: {}", prompt_text(&req)))
    }
}

/// Executor that fails immediately with a message derived from the prompt.
pub struct FailingExecutor;

impl AgentExecutor for FailingExecutor {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: "failing".to_string(),
            model_id: "failing-model".to_string(),
            context_window: None,
        }
    }

    fn run(
        &self,
        req: RunRequest,
        _cancel: CancelToken,
        _emit: &mut dyn FnMut(ExecutionEvent),
        _interact: &mut dyn FnMut(Interaction) -> InteractionOutcome,
    ) -> Result<String, ExecutionError> {
        Err(ExecutionError::failed(format!("failed: {}", prompt_text(&req))))
    }
}

/// Executor that panics inside `run`.
pub struct PanickingExecutor;

impl AgentExecutor for PanickingExecutor {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: "panicking".to_string(),
            model_id: "panicking-model".to_string(),
            context_window: None,
        }
    }

    fn run(
        &self,
        _req: RunRequest,
        _cancel: CancelToken,
        _emit: &mut dyn FnMut(ExecutionEvent),
        _interact: &mut dyn FnMut(Interaction) -> InteractionOutcome,
    ) -> Result<String, ExecutionError> {
        panic!("provider state corrupted");
    }
}

pub fn prompt_text(req: &RunRequest) -> String {
    req.input
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::Attachment { .. } => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn threaded_coordinator(
    executor: Arc<dyn AgentExecutor>,
    listener: Arc<dyn ProjectionListener>,
) -> Arc<TaskCoordinator> {
    coordinator_with(executor, Arc::new(ThreadScheduler), listener)
}

pub fn coordinator_with(
    executor: Arc<dyn AgentExecutor>,
    scheduler: Arc<dyn TaskScheduler>,
    listener: Arc<dyn ProjectionListener>,
) -> Arc<TaskCoordinator> {
    TaskCoordinator::new(executor, scheduler, listener, CoordinatorConfig::default())
}

pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

/// Waits until the session is idle with an empty queue.
pub fn wait_for_idle(coordinator: &TaskCoordinator, session_id: &str) -> SessionSnapshot {
    let settled = wait_until(WAIT, || {
        coordinator.snapshot(session_id).is_ok_and(|snapshot| {
            snapshot.phase == TaskPhase::Idle && snapshot.queued.is_empty()
        })
    });
    let snapshot = coordinator.snapshot(session_id).expect("session exists");
    assert!(settled, "session did not settle: {:?}", snapshot.phase);
    snapshot
}

pub fn wait_for_running(coordinator: &TaskCoordinator, session_id: &str) {
    let running = wait_until(WAIT, || {
        matches!(
            coordinator.phase(session_id),
            Ok(TaskPhase::Running { .. })
        )
    });
    assert!(running, "task never started");
}

pub fn contents_by_role(snapshot: &SessionSnapshot, role: Role) -> Vec<String> {
    snapshot
        .session
        .messages
        .iter()
        .filter(|message| message.role == role)
        .map(|message| message.content.clone())
        .collect()
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
