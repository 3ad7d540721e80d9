use std::collections::{HashMap, VecDeque};
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_provider::{
    AgentExecutor, ApprovalScope, CancelToken, ExecutionError, ExecutionEvent, Interaction,
    InteractionOutcome, ProviderProfile, QuestionAnswers, RunRequest, SessionId, TaskId,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::batch::ToolBatchAggregator;
use crate::broker::{ConfirmationRecord, ConfirmationResponse, Opened, QuestionRecord, Waiter};
use crate::cancel::CancelRegistry;
use crate::config::CoordinatorConfig;
use crate::context::ContextWindowTracker;
use crate::dispatch::{dispatch_event, DispatchOutcome, DropReason};
use crate::error::CoordinatorError;
use crate::projection::Projection;
use crate::queue::{Command, CommandQueue};
use crate::scheduler::{lock_unpoisoned, TaskScheduler};
use crate::session::Session;

const INTERACTION_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Receives change notifications. Called without any coordinator lock held.
pub trait ProjectionListener: Send + Sync + 'static {
    fn projection_changed(&self, _session_id: &str) {}

    /// The session's context usage crossed the compression threshold.
    fn compression_needed(&self, _session_id: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ProjectionListener for NoopListener {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The command will start on the next scheduler tick.
    Scheduled {
        session_id: SessionId,
        generation: u64,
    },
    /// A task is in flight; the command waits at this 1-based position.
    Queued {
        session_id: SessionId,
        position: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TaskPhase {
    Idle,
    Scheduled {
        generation: u64,
    },
    Running {
        task_id: TaskId,
        generation: u64,
        #[serde(with = "time::serde::rfc3339")]
        started_at: OffsetDateTime,
    },
}

/// Read-only copy of everything the UI renders for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub is_current: bool,
    pub phase: TaskPhase,
    pub queued: Vec<Command>,
    pub pending_confirmations: Vec<ConfirmationRecord>,
    pub pending_questions: Vec<QuestionRecord>,
    pub context: ContextWindowTracker,
}

struct ActiveTask {
    task_id: TaskId,
    generation: u64,
    started_at: OffsetDateTime,
    error_surfaced: bool,
}

#[derive(Default)]
enum Phase {
    #[default]
    Idle,
    Scheduled { generation: u64 },
    Running(ActiveTask),
}

#[derive(Default)]
struct SessionSlot {
    phase: Phase,
    queue: CommandQueue,
    registry: CancelRegistry,
    generation: u64,
    stop_latch: bool,
}

impl SessionSlot {
    fn running(&self, generation: u64) -> Option<&ActiveTask> {
        match &self.phase {
            Phase::Running(active) if active.generation == generation => Some(active),
            _ => None,
        }
    }

    fn running_mut(&mut self, generation: u64) -> Option<&mut ActiveTask> {
        match &mut self.phase {
            Phase::Running(active) if active.generation == generation => Some(active),
            _ => None,
        }
    }

    fn task_phase(&self) -> TaskPhase {
        match &self.phase {
            Phase::Idle => TaskPhase::Idle,
            Phase::Scheduled { generation } => TaskPhase::Scheduled {
                generation: *generation,
            },
            Phase::Running(active) => TaskPhase::Running {
                task_id: active.task_id,
                generation: active.generation,
                started_at: active.started_at,
            },
        }
    }
}

/// Identity of the task an event or callback comes from.
#[derive(Clone)]
struct TaskOrigin {
    session_id: SessionId,
    generation: u64,
    task_id: TaskId,
    token: CancelToken,
}

struct PendingEvent {
    origin: TaskOrigin,
    event: ExecutionEvent,
}

enum Notice {
    Changed(SessionId),
    CompressionNeeded(SessionId),
}

struct CoordinatorState {
    projection: Projection,
    slots: HashMap<SessionId, SessionSlot>,
    current: Option<SessionId>,
    next_task_id: TaskId,
}

impl CoordinatorState {
    fn create_session(&mut self) -> SessionId {
        let session_id = self.projection.sessions.create();
        self.slots.insert(session_id.clone(), SessionSlot::default());
        session_id
    }

    fn slot(&self, session_id: &str) -> Result<&SessionSlot, CoordinatorError> {
        self.slots
            .get(session_id)
            .ok_or_else(|| unknown_session(session_id))
    }

    fn current_slot(&self) -> Option<&SessionSlot> {
        self.current
            .as_deref()
            .and_then(|session_id| self.slots.get(session_id))
    }

    /// True while `origin` is the running task of its session and was not cancelled.
    fn is_live(&self, origin: &TaskOrigin) -> bool {
        !origin.token.is_cancelled()
            && self
                .slots
                .get(&origin.session_id)
                .and_then(|slot| slot.running(origin.generation))
                .is_some()
    }
}

/// Single-flight execution driver for every session.
///
/// Each session runs at most one task; commands submitted meanwhile are queued and
/// started in order as tasks settle. Executor events are buffered and applied to the
/// projection in arrival order. In hosts that never drive the scheduler from an event
/// loop, call [`TaskCoordinator::flush_pending_events`] to apply buffered events.
pub struct TaskCoordinator {
    state: Mutex<CoordinatorState>,
    pending_events: Mutex<VecDeque<PendingEvent>>,
    executor: Arc<dyn AgentExecutor>,
    scheduler: Arc<dyn TaskScheduler>,
    listener: Arc<dyn ProjectionListener>,
    config: CoordinatorConfig,
    profile: ProviderProfile,
}

impl TaskCoordinator {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        scheduler: Arc<dyn TaskScheduler>,
        listener: Arc<dyn ProjectionListener>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        let profile = executor.profile();
        let tracker = match config.max_context_tokens {
            Some(max) => ContextWindowTracker::with_configured_max(max),
            None => {
                ContextWindowTracker::with_provider_default(profile.context_window.unwrap_or(0))
            }
        };
        let projection = Projection::new(
            ToolBatchAggregator::new(config.read_only_policy.clone(), config.batch_tools),
            tracker,
            config.compress_threshold,
        );

        tracing::debug!(
            provider = %profile.provider_id,
            model = %profile.model_id,
            batch_tools = config.batch_tools,
            "task coordinator created"
        );

        Arc::new(Self {
            state: Mutex::new(CoordinatorState {
                projection,
                slots: HashMap::new(),
                current: None,
                next_task_id: 1,
            }),
            pending_events: Mutex::new(VecDeque::new()),
            executor,
            scheduler,
            listener,
            config,
            profile,
        })
    }

    #[must_use]
    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Creates an empty session and makes it current.
    pub fn create_session(&self) -> SessionId {
        let session_id = {
            let mut state = self.lock_state();
            let session_id = state.create_session();
            state.current = Some(session_id.clone());
            session_id
        };
        tracing::info!(session_id = %session_id, "session created");
        self.listener.projection_changed(&session_id);
        session_id
    }

    pub fn select_session(&self, session_id: &str) -> Result<(), CoordinatorError> {
        {
            let mut state = self.lock_state();
            state.slot(session_id)?;
            state.current = Some(session_id.to_string());
        }
        self.listener.projection_changed(session_id);
        Ok(())
    }

    #[must_use]
    pub fn current_session(&self) -> Option<SessionId> {
        self.lock_state().current.clone()
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.lock_state()
            .projection
            .sessions
            .ids()
            .map(str::to_string)
            .collect()
    }

    /// Removes a session. A running task is cancelled and its queue dropped.
    pub fn delete_session(&self, session_id: &str) -> Result<(), CoordinatorError> {
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let slot = state
                .slots
                .remove(session_id)
                .ok_or_else(|| unknown_session(session_id))?;
            slot.registry.cancel();
            state.projection.forget_session(session_id);
            if state.current.as_deref() == Some(session_id) {
                state.current = None;
            }
            tracing::info!(
                session_id,
                dropped = slot.queue.len(),
                "session deleted"
            );
        }
        self.listener.projection_changed(session_id);
        Ok(())
    }

    /// Submits a command to the current session, creating one when none is selected.
    pub fn submit(self: &Arc<Self>, command: Command) -> Result<SubmitOutcome, CoordinatorError> {
        if command.is_empty() {
            return Err(CoordinatorError::EmptyCommand);
        }

        let (session_id, outcome) = {
            let mut state = self.lock_state();
            let session_id = match state.current.clone() {
                Some(session_id) => session_id,
                None => {
                    let session_id = state.create_session();
                    state.current = Some(session_id.clone());
                    session_id
                }
            };
            let outcome = self.submit_locked(&mut state, &session_id, command)?;
            (session_id, outcome)
        };

        self.listener.projection_changed(&session_id);
        Ok(outcome)
    }

    pub fn submit_to(
        self: &Arc<Self>,
        session_id: &str,
        command: Command,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        if command.is_empty() {
            return Err(CoordinatorError::EmptyCommand);
        }

        let outcome = {
            let mut state = self.lock_state();
            self.submit_locked(&mut state, session_id, command)?
        };
        self.listener.projection_changed(session_id);
        Ok(outcome)
    }

    fn submit_locked(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        session_id: &str,
        command: Command,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        let slot = state
            .slots
            .get_mut(session_id)
            .ok_or_else(|| unknown_session(session_id))?;

        if !matches!(slot.phase, Phase::Idle) {
            let position = slot.queue.push(command);
            tracing::info!(session_id, position, "command queued");
            return Ok(SubmitOutcome::Queued {
                session_id: session_id.to_string(),
                position,
            });
        }

        // Idle with a backlog means an earlier start failed; the backlog goes first.
        if !slot.queue.is_empty() {
            let position = slot.queue.push(command) - 1;
            self.start_queued(slot, session_id, Duration::ZERO)?;
            tracing::info!(session_id, position, "command queued behind backlog");
            return Ok(SubmitOutcome::Queued {
                session_id: session_id.to_string(),
                position,
            });
        }

        let generation = self.schedule_start(slot, session_id, command, Duration::ZERO)?;
        Ok(SubmitOutcome::Scheduled {
            session_id: session_id.to_string(),
            generation,
        })
    }

    /// Schedules the oldest queued command. If scheduling fails it stays at the head.
    fn start_queued(
        self: &Arc<Self>,
        slot: &mut SessionSlot,
        session_id: &str,
        delay: Duration,
    ) -> Result<(), CoordinatorError> {
        let Some(next) = slot.queue.pop() else {
            return Ok(());
        };
        let retry = next.clone();
        if let Err(error) = self.schedule_start(slot, session_id, next, delay) {
            slot.queue.push_front(retry);
            return Err(error);
        }
        Ok(())
    }

    fn schedule_start(
        self: &Arc<Self>,
        slot: &mut SessionSlot,
        session_id: &str,
        command: Command,
        delay: Duration,
    ) -> Result<u64, CoordinatorError> {
        slot.generation += 1;
        let generation = slot.generation;
        slot.phase = Phase::Scheduled { generation };
        slot.stop_latch = false;

        let coordinator = Arc::clone(self);
        let owner = session_id.to_string();
        let scheduled = self.scheduler.schedule(
            format!("agent-session-task-{generation}"),
            delay,
            Box::new(move || coordinator.start_task(owner, generation, command)),
        );

        if let Err(error) = scheduled {
            slot.phase = Phase::Idle;
            tracing::error!(session_id, generation, %error, "failed to schedule task");
            return Err(CoordinatorError::Schedule {
                session_id: session_id.to_string(),
                reason: error.to_string(),
            });
        }

        tracing::debug!(session_id, generation, ?delay, "task scheduled");
        Ok(generation)
    }

    fn start_task(self: Arc<Self>, session_id: SessionId, generation: u64, command: Command) {
        let (request, origin) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let Some(slot) = state.slots.get_mut(&session_id) else {
                tracing::debug!(
                    session_id = %session_id,
                    generation,
                    "session gone before task start"
                );
                return;
            };
            let scheduled = matches!(
                slot.phase,
                Phase::Scheduled { generation: pending } if pending == generation
            );
            if !scheduled {
                tracing::debug!(session_id = %session_id, generation, "start job superseded");
                return;
            }

            let live_token = slot
                .registry
                .current()
                .is_some_and(|token| !token.is_cancelled());
            if live_token {
                tracing::error!(
                    session_id = %session_id,
                    generation,
                    "live cancellation token found at task start"
                );
            }
            debug_assert!(!live_token, "live cancellation token found at task start");

            let token = slot.registry.create();
            let task_id = state.next_task_id;
            state.next_task_id += 1;
            slot.phase = Phase::Running(ActiveTask {
                task_id,
                generation,
                started_at: OffsetDateTime::now_utc(),
                error_surfaced: false,
            });

            let history = state
                .projection
                .session(&session_id)
                .map(Session::run_history)
                .unwrap_or_default();
            if let Some(session) = state.projection.session_mut(&session_id) {
                session.push_user(command.display.as_str(), command.content.clone(), task_id);
            }
            state.projection.begin_task(&session_id, task_id);

            let request = RunRequest {
                task_id,
                session_id: session_id.clone(),
                generation,
                messages: history,
                input: command.content,
                instructions: self.config.system_instructions.clone(),
            };
            let origin = TaskOrigin {
                session_id: session_id.clone(),
                generation,
                task_id,
                token,
            };
            (request, origin)
        };

        tracing::info!(
            session_id = %origin.session_id,
            generation,
            task_id = origin.task_id,
            "task started"
        );
        self.listener.projection_changed(&origin.session_id);

        let result = self.run_executor(request, &origin);
        self.settle(origin, result);
    }

    fn run_executor(
        self: &Arc<Self>,
        request: RunRequest,
        origin: &TaskOrigin,
    ) -> Result<String, ExecutionError> {
        let executor = Arc::clone(&self.executor);
        let mut emit = |event: ExecutionEvent| self.enqueue_event(origin, event);
        let mut interact = |interaction: Interaction| self.await_interaction(origin, interaction);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            executor.run(request, origin.token.clone(), &mut emit, &mut interact)
        }));

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|message| message.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    session_id = %origin.session_id,
                    task_id = origin.task_id,
                    panic = %detail,
                    "executor panicked"
                );
                Err(ExecutionError::failed(format!("Agent execution panicked: {detail}")))
            }
        }
    }

    fn enqueue_event(&self, origin: &TaskOrigin, event: ExecutionEvent) {
        lock_unpoisoned(&self.pending_events).push_back(PendingEvent {
            origin: origin.clone(),
            event,
        });
        self.flush_pending_events();
    }

    /// Applies buffered executor events in arrival order and notifies the listener.
    /// Returns how many events were drained.
    pub fn flush_pending_events(&self) -> usize {
        let mut notices = Vec::new();
        let drained = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let mut drained = 0usize;

            loop {
                let next = lock_unpoisoned(&self.pending_events).pop_front();
                let Some(PendingEvent { origin, event }) = next else {
                    break;
                };
                drained += 1;

                if !state.is_live(&origin) {
                    tracing::debug!(
                        session_id = %origin.session_id,
                        generation = origin.generation,
                        kind = event.kind(),
                        "discarding event from stale or cancelled task"
                    );
                    continue;
                }
                if event.session_id() != origin.session_id {
                    tracing::debug!(
                        session_id = %origin.session_id,
                        event_session = event.session_id(),
                        task_id = origin.task_id,
                        kind = event.kind(),
                        reason = ?DropReason::SessionMismatch,
                        "discarding event addressed to another session"
                    );
                    continue;
                }

                let current = state.current.as_deref();
                let outcome = dispatch_event(&mut state.projection, current, &event);
                match outcome {
                    DispatchOutcome::Dropped(_) => continue,
                    DispatchOutcome::ErrorSurfaced => {
                        if let Some(active) = state
                            .slots
                            .get_mut(&origin.session_id)
                            .and_then(|slot| slot.running_mut(origin.generation))
                        {
                            active.error_surfaced = true;
                        }
                    }
                    DispatchOutcome::CompressionNeeded => {
                        notices.push(Notice::CompressionNeeded(origin.session_id.clone()));
                    }
                    DispatchOutcome::Applied | DispatchOutcome::AutoApproved { .. } => {}
                }

                let repeated = matches!(
                    notices.last(),
                    Some(Notice::Changed(last)) if *last == origin.session_id
                );
                if !repeated {
                    notices.push(Notice::Changed(origin.session_id));
                }
            }

            drained
        };

        self.notify(notices);
        drained
    }

    /// Blocks the executor thread until the request resolves or the task is cancelled.
    fn await_interaction(
        &self,
        origin: &TaskOrigin,
        interaction: Interaction,
    ) -> InteractionOutcome {
        self.flush_pending_events();

        let request_id = interaction.request_id().to_string();
        let waiter = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if !state.is_live(origin) {
                return InteractionOutcome::Cancelled;
            }

            let broker = &mut state.projection.broker;
            let opened = match interaction {
                Interaction::Confirm(request) => {
                    broker.open_confirmation(&origin.session_id, request)
                }
                Interaction::Ask(request) => broker
                    .open_question(&origin.session_id, request)
                    .map(|()| Opened::Pending),
            };
            match opened {
                Ok(Opened::AutoApproved) => {
                    return InteractionOutcome::Approved {
                        scope: ApprovalScope::Session,
                    }
                }
                Ok(Opened::Pending) => {}
                Err(error) => {
                    tracing::warn!(
                        session_id = %origin.session_id,
                        %error,
                        "interaction rejected"
                    );
                    return InteractionOutcome::Denied;
                }
            }
            broker.waiter(&request_id)
        };

        tracing::debug!(
            session_id = %origin.session_id,
            request_id = %request_id,
            "awaiting interaction"
        );
        self.listener.projection_changed(&origin.session_id);

        let receiver = match waiter {
            None => return InteractionOutcome::Cancelled,
            Some(Waiter::Resolved(outcome)) => return outcome,
            Some(Waiter::Pending(receiver)) => receiver,
        };

        loop {
            match receiver.recv_timeout(INTERACTION_POLL_INTERVAL) {
                Ok(outcome) => return outcome,
                Err(RecvTimeoutError::Timeout) if origin.token.is_cancelled() => {
                    return InteractionOutcome::Cancelled
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return InteractionOutcome::Cancelled,
            }
        }
    }

    fn settle(self: &Arc<Self>, origin: TaskOrigin, result: Result<String, ExecutionError>) {
        let mut notices = Vec::new();
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let session_id = origin.session_id.as_str();
            let Some(slot) = state.slots.get_mut(session_id) else {
                tracing::debug!(session_id, task_id = origin.task_id, "session gone before settle");
                return;
            };

            let cleared = slot.registry.clear(Some(&origin.token));
            let Some(active) = slot.running(origin.generation) else {
                tracing::debug!(
                    session_id,
                    generation = origin.generation,
                    current_generation = slot.generation,
                    "stale task settled"
                );
                return;
            };
            if !cleared {
                tracing::error!(
                    session_id,
                    generation = origin.generation,
                    "cancellation token missing at settlement"
                );
            }

            let error_surfaced = active.error_surfaced;
            slot.phase = Phase::Idle;
            state.projection.end_task(session_id);
            state.projection.finish_streaming(session_id);

            let cancelled =
                origin.token.is_cancelled() || matches!(result, Err(ExecutionError::Cancelled));
            match result {
                Ok(text) if !cancelled => {
                    if let Some(session) = state.projection.session_mut(session_id) {
                        let answered = session.has_assistant_output_for(origin.task_id);
                        if !answered && !text.trim().is_empty() {
                            session.push_assistant_text(text, origin.task_id);
                        }
                    }
                    tracing::info!(session_id, task_id = origin.task_id, "task completed");
                }
                Err(ExecutionError::Failed { message }) if !cancelled => {
                    if !error_surfaced {
                        if let Some(session) = state.projection.session_mut(session_id) {
                            session.surface_error(&message);
                        }
                    }
                    tracing::warn!(
                        session_id,
                        task_id = origin.task_id,
                        error = %message,
                        "task failed"
                    );
                }
                _ => tracing::info!(session_id, task_id = origin.task_id, "task cancelled"),
            }

            if let Err(error) = self.start_queued(slot, session_id, self.config.requeue_delay) {
                if let Some(session) = state.projection.session_mut(session_id) {
                    session.surface_error(&error.to_string());
                }
            }
            notices.push(Notice::Changed(origin.session_id.clone()));
        }

        self.notify(notices);
    }

    /// Stops the running task of the current session. Returns false when nothing was
    /// running (including a command that is scheduled but not yet started).
    pub fn abort(&self) -> bool {
        let session_id = match self.current_session() {
            Some(session_id) => session_id,
            None => return false,
        };
        self.abort_session(&session_id).unwrap_or(false)
    }

    pub fn abort_session(&self, session_id: &str) -> Result<bool, CoordinatorError> {
        let aborted = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let slot = state
                .slots
                .get_mut(session_id)
                .ok_or_else(|| unknown_session(session_id))?;

            if !matches!(slot.phase, Phase::Running(_)) {
                tracing::debug!(session_id, "abort ignored; no running task");
                return Ok(false);
            }
            let Phase::Running(active) = mem::replace(&mut slot.phase, Phase::Idle) else {
                return Ok(false);
            };

            state.projection.end_task(session_id);
            state.projection.finish_streaming(session_id);
            if !slot.stop_latch {
                slot.stop_latch = true;
                if let Some(session) = state.projection.session_mut(session_id) {
                    session.push_stop_marker();
                }
            }
            slot.registry.cancel();
            let dropped = slot.queue.clear();
            let resolved = state.projection.broker.cancel_session(session_id);

            tracing::info!(
                session_id,
                task_id = active.task_id,
                generation = active.generation,
                dropped,
                resolved,
                "task aborted"
            );
            true
        };

        self.listener.projection_changed(session_id);
        Ok(aborted)
    }

    pub fn respond_confirmation(
        &self,
        request_id: &str,
        response: ConfirmationResponse,
    ) -> Result<InteractionOutcome, CoordinatorError> {
        let (session_id, outcome) = {
            let mut state = self.lock_state();
            let broker = &mut state.projection.broker;
            let outcome = broker.respond_confirmation(request_id, response)?;
            let session_id = broker
                .confirmation(request_id)
                .map(|record| record.session_id.clone());
            (session_id, outcome)
        };

        if let Some(session_id) = session_id {
            self.listener.projection_changed(&session_id);
        }
        Ok(outcome)
    }

    pub fn answer_question(
        &self,
        request_id: &str,
        answers: QuestionAnswers,
    ) -> Result<(), CoordinatorError> {
        let session_id = {
            let mut state = self.lock_state();
            let broker = &mut state.projection.broker;
            broker.answer_question(request_id, answers)?;
            broker
                .question(request_id)
                .map(|record| record.session_id.clone())
        };

        if let Some(session_id) = session_id {
            self.listener.projection_changed(&session_id);
        }
        Ok(())
    }

    /// Clears the compression flag and usage counters once history was compacted.
    pub fn reset_context(&self, session_id: &str) -> Result<(), CoordinatorError> {
        let reset = self.lock_state().projection.reset_context(session_id);
        if !reset {
            return Err(unknown_session(session_id));
        }
        self.listener.projection_changed(session_id);
        Ok(())
    }

    /// True while the current session has a started, unaborted task.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_state()
            .current_slot()
            .is_some_and(|slot| matches!(slot.phase, Phase::Running(_)))
    }

    /// True while the current session has a task scheduled or running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock_state()
            .current_slot()
            .is_some_and(|slot| !matches!(slot.phase, Phase::Idle))
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.lock_state()
            .current_slot()
            .map_or(0, |slot| slot.queue.len())
    }

    #[must_use]
    pub fn queued_commands(&self) -> Vec<Command> {
        self.lock_state()
            .current_slot()
            .map(|slot| slot.queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn phase(&self, session_id: &str) -> Result<TaskPhase, CoordinatorError> {
        Ok(self.lock_state().slot(session_id)?.task_phase())
    }

    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, CoordinatorError> {
        let state = self.lock_state();
        let slot = state.slot(session_id)?;
        let session = state
            .projection
            .session(session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        let broker = &state.projection.broker;

        Ok(SessionSnapshot {
            session: session.clone(),
            is_current: state.current.as_deref() == Some(session_id),
            phase: slot.task_phase(),
            queued: slot.queue.iter().cloned().collect(),
            pending_confirmations: broker.pending_confirmations(session_id).cloned().collect(),
            pending_questions: broker.pending_questions(session_id).cloned().collect(),
            context: state.projection.tracker(session_id).clone(),
        })
    }

    #[must_use]
    pub fn current_snapshot(&self) -> Option<SessionSnapshot> {
        let session_id = self.current_session()?;
        self.snapshot(&session_id).ok()
    }

    fn notify(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Changed(session_id) => self.listener.projection_changed(&session_id),
                Notice::CompressionNeeded(session_id) => {
                    self.listener.compression_needed(&session_id)
                }
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        lock_unpoisoned(&self.state)
    }
}

fn unknown_session(session_id: &str) -> CoordinatorError {
    CoordinatorError::UnknownSession {
        session_id: session_id.to_string(),
    }
}
