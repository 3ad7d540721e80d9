//! Provider-neutral contract between the session coordinator and an agent execution.
//!
//! This crate defines the execution event union, the cancellation token handed to
//! each task, the blocking interaction contract used for confirmations and
//! questions, and the [`AgentExecutor`] trait. It excludes provider transport
//! details and any multi-task orchestration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifier for one session.
pub type SessionId = String;

/// Identifier for one projected message.
pub type MessageId = String;

/// Identifier for one tool call.
pub type CallId = String;

/// Correlation identifier for confirmation/question round trips.
pub type RequestId = String;

/// Identifier for one task (one executed command).
pub type TaskId = u64;

type CancelListener = Box<dyn FnOnce() + Send>;

struct CancelInner {
    cancelled: AtomicBool,
    listeners: Mutex<Vec<CancelListener>>,
}

/// Cooperative cancellation token shared between the coordinator and one task.
///
/// Clones share state. Identity (not equality of the flag) decides whether two
/// handles refer to the same task generation, see [`CancelToken::ptr_eq`].
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Marks the token cancelled and fires registered listeners.
    ///
    /// Returns `false` when the token was already cancelled; listeners only fire on
    /// the first call.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let listeners = std::mem::take(&mut *lock_unpoisoned(&self.inner.listeners));
        for listener in listeners {
            listener();
        }

        true
    }

    /// Registers a listener fired once on cancellation.
    ///
    /// Listeners registered after cancellation run immediately on the caller thread.
    /// Listeners run on whichever thread cancels the token, which may hold host locks,
    /// so they must not call back into the host.
    pub fn on_cancel(&self, listener: impl FnOnce() + Send + 'static) {
        {
            let mut listeners = lock_unpoisoned(&self.inner.listeners);
            if !self.is_cancelled() {
                listeners.push(Box::new(listener));
                return;
            }
        }

        listener();
    }

    /// Returns true when both handles point at the same token allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

/// Error returned while constructing/configuring a provider before any task starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Outcome of an execution that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The task observed its cancellation token. Never user-visible.
    #[error("execution cancelled")]
    Cancelled,
    /// Provider or tool failure.
    #[error("{message}")]
    Failed { message: String },
}

impl ExecutionError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self::Failed { message }
    }
}

/// One segment of a command's resolved content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Attachment {
        name: String,
        media_type: String,
        data: String,
    },
}

impl ContentPart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Provider-neutral model-facing history item replayed on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunMessage {
    /// A user turn with its resolved content, attachments included.
    User {
        content: Vec<ContentPart>,
    },
    AssistantText {
        text: String,
    },
    ToolCall {
        call_id: CallId,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: CallId,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

/// Input required to start one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub generation: u64,
    pub messages: Vec<RunMessage>,
    pub input: Vec<ContentPart>,
    pub instructions: String,
}

/// Token counters reported by a provider. Absent fields are "not reported".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u64>,
}

impl TokenUsage {
    /// Overwrites fields present in `update`, leaving the others untouched.
    pub fn merge(&mut self, update: &TokenUsage) {
        merge_field(&mut self.input_tokens, update.input_tokens);
        merge_field(&mut self.output_tokens, update.output_tokens);
        merge_field(&mut self.total_tokens, update.total_tokens);
        merge_field(&mut self.cache_read_tokens, update.cache_read_tokens);
        merge_field(&mut self.max_context_tokens, update.max_context_tokens);
    }

    /// Reported total, or input + output when the provider omits it.
    #[must_use]
    pub fn effective_total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.input_tokens
                .unwrap_or(0)
                .saturating_add(self.output_tokens.unwrap_or(0))
        })
    }
}

fn merge_field(target: &mut Option<u64>, update: Option<u64>) {
    if update.is_some() {
        *target = update;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

/// Marks a tool call as a sub-agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentSpec {
    pub agent_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    Tool,
    TurnLimit,
}

/// Permission request for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub request_id: RequestId,
    pub kind: ConfirmationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    pub tool_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl ConfirmationRequest {
    #[must_use]
    pub fn tool(
        request_id: impl Into<RequestId>,
        call_id: impl Into<CallId>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            kind: ConfirmationKind::Tool,
            call_id: Some(call_id.into()),
            tool_name: tool_name.into(),
            description: description.into(),
            diff: None,
        }
    }

    #[must_use]
    pub fn turn_limit(request_id: impl Into<RequestId>, turns: u32) -> Self {
        Self {
            request_id: request_id.into(),
            kind: ConfirmationKind::TurnLimit,
            call_id: None,
            tool_name: TURN_LIMIT_SIGNATURE.to_string(),
            description: format!("Reached {turns} turns. Continue?"),
            diff: None,
        }
    }

    #[must_use]
    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }

    /// Stable key used to cache session-wide approvals.
    #[must_use]
    pub fn signature(&self) -> &str {
        match self.kind {
            ConfirmationKind::Tool => &self.tool_name,
            ConfirmationKind::TurnLimit => TURN_LIMIT_SIGNATURE,
        }
    }
}

const TURN_LIMIT_SIGNATURE: &str = "turn_limit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub header: String,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multi_select: bool,
}

/// Clarification request carrying one or more questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub request_id: RequestId,
    pub questions: Vec<Question>,
}

/// Answers keyed by question header.
pub type QuestionAnswers = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    Once,
    Session,
    Deny,
}

/// Out-of-band request an executor blocks on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Confirm(ConfirmationRequest),
    Ask(QuestionRequest),
}

impl Interaction {
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Confirm(request) => &request.request_id,
            Self::Ask(request) => &request.request_id,
        }
    }
}

/// Terminal resolution of an [`Interaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionOutcome {
    Approved { scope: ApprovalScope },
    Denied,
    Answered(QuestionAnswers),
    Cancelled,
}

impl InteractionOutcome {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// Event emitted by an execution, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ContentDelta {
        session_id: SessionId,
        message_id: MessageId,
        text: String,
    },
    ThinkingDelta {
        session_id: SessionId,
        message_id: MessageId,
        text: String,
    },
    ToolStart {
        session_id: SessionId,
        message_id: MessageId,
        call_id: CallId,
        tool_name: String,
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subagent: Option<SubagentSpec>,
    },
    ToolResult {
        session_id: SessionId,
        call_id: CallId,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    TokenUsage {
        session_id: SessionId,
        usage: TokenUsage,
    },
    TodoUpdate {
        session_id: SessionId,
        message_id: MessageId,
        todos: Vec<TodoItem>,
    },
    SubagentStart {
        session_id: SessionId,
        call_id: CallId,
        spec: SubagentSpec,
    },
    SubagentUpdate {
        session_id: SessionId,
        call_id: CallId,
        activity: String,
        tool_count: u32,
    },
    SubagentComplete {
        session_id: SessionId,
        call_id: CallId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    ConfirmationRequired {
        session_id: SessionId,
        request: ConfirmationRequest,
    },
    QuestionRequired {
        session_id: SessionId,
        request: QuestionRequest,
    },
    TurnLimitReached {
        session_id: SessionId,
        request_id: RequestId,
        turns: u32,
    },
    Completed {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
    },
    Error {
        session_id: SessionId,
        message: String,
    },
}

impl ExecutionEvent {
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::ContentDelta { session_id, .. }
            | Self::ThinkingDelta { session_id, .. }
            | Self::ToolStart { session_id, .. }
            | Self::ToolResult { session_id, .. }
            | Self::TokenUsage { session_id, .. }
            | Self::TodoUpdate { session_id, .. }
            | Self::SubagentStart { session_id, .. }
            | Self::SubagentUpdate { session_id, .. }
            | Self::SubagentComplete { session_id, .. }
            | Self::ConfirmationRequired { session_id, .. }
            | Self::QuestionRequired { session_id, .. }
            | Self::TurnLimitReached { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    /// Short stable name used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContentDelta { .. } => "content_delta",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::TokenUsage { .. } => "token_usage",
            Self::TodoUpdate { .. } => "todo_update",
            Self::SubagentStart { .. } => "subagent_start",
            Self::SubagentUpdate { .. } => "subagent_update",
            Self::SubagentComplete { .. } => "subagent_complete",
            Self::ConfirmationRequired { .. } => "confirmation_required",
            Self::QuestionRequired { .. } => "question_required",
            Self::TurnLimitReached { .. } => "turn_limit_reached",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }

    /// Returns true when this event ends the active agent response.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}

/// Immutable metadata describing an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
    /// Provider default context window, when known.
    pub context_window: Option<u64>,
}

/// Agent execution collaborator.
pub trait AgentExecutor: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Executes one command and emits events in execution order.
    ///
    /// Cancellation is cooperative: implementations poll `cancel` (or register a
    /// listener) and return [`ExecutionError::Cancelled`] once they observe it.
    /// `interact` blocks until the host resolves the request; it returns
    /// [`InteractionOutcome::Cancelled`] when the task is aborted meanwhile.
    fn run(
        &self,
        req: RunRequest,
        cancel: CancelToken,
        emit: &mut dyn FnMut(ExecutionEvent),
        interact: &mut dyn FnMut(Interaction) -> InteractionOutcome,
    ) -> Result<String, ExecutionError>;
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
