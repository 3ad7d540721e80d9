//! Execution coordination and streaming state for an interactive coding agent.
//!
//! Invariant: a session runs at most one task, and a task's cleanup only ever clears the
//! cancellation token that task was given.
//!
//! # Public API Overview
//! - Drive executions through [`TaskCoordinator`]: `submit`, `abort`, queue queries and
//!   session selection.
//! - Render from [`SessionSnapshot`]s and react to [`ProjectionListener`] notifications.
//! - Resolve executor confirmations and questions with
//!   [`TaskCoordinator::respond_confirmation`] and [`TaskCoordinator::answer_question`].
//! - Use [`dispatch_event`] directly to project recorded event streams without executing.

pub mod batch;
pub mod broker;
pub mod cancel;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod projection;
pub mod queue;
pub mod scheduler;
pub mod session;

/// Tool batching.
pub use crate::batch::{BatchId, BatchRoute, ReadOnlyPolicy, ToolBatch, ToolBatchAggregator};
/// Confirmation and question correlation.
pub use crate::broker::{
    ConfirmationRecord, ConfirmationResponse, ConfirmationStatus, InteractionBroker, Opened,
    QuestionRecord, QuestionStatus, Waiter,
};
pub use crate::cancel::CancelRegistry;
pub use crate::config::CoordinatorConfig;
pub use crate::context::{ContextWindowTracker, MaxContextSource, DEFAULT_COMPRESS_THRESHOLD};
/// Coordinator surface.
pub use crate::coordinator::{
    NoopListener, ProjectionListener, SessionSnapshot, SubmitOutcome, TaskCoordinator, TaskPhase,
};
pub use crate::dispatch::{dispatch_event, DispatchOutcome, DropReason};
pub use crate::error::{BrokerError, ConfigError, CoordinatorError, LoggingError};
pub use crate::logging::{init_logging, LogConfig};
pub use crate::projection::Projection;
pub use crate::queue::{Command, CommandQueue};
pub use crate::scheduler::{Job, ManualScheduler, TaskScheduler, ThreadScheduler};
/// Projected session state.
pub use crate::session::{
    AgentResponse, Message, MessageKind, Role, Session, SessionStore, SubagentProgress,
    SubagentStatus, ToolCallRecord, ToolCallStatus, TASK_STOPPED_MESSAGE,
};

/// Provider contract types re-exported for hosts that only depend on this crate.
pub use agent_provider::{
    AgentExecutor, ApprovalScope, CancelToken, ContentPart, ExecutionError, ExecutionEvent,
    Interaction, InteractionOutcome, QuestionAnswers, SessionId, TaskId,
};
