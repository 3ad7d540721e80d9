//! Applies execution events to the session projection.
//!
//! Dispatch is a pure state transition over [`Projection`]: no I/O, no locking and no
//! notification. The coordinator calls it once per event, in arrival order.

use agent_provider::{ConfirmationRequest, ExecutionEvent, RequestId, SubagentSpec, TaskId};

use crate::batch::{BatchRoute, ToolBatch};
use crate::broker::Opened;
use crate::projection::Projection;
use crate::session::{AgentResponse, SubagentProgress, SubagentStatus, ToolCallRecord};

/// Why an event left the projection untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The event names a session other than the one being dispatched for.
    SessionMismatch,
    UnknownSession,
    UnknownCall,
    DuplicateCall,
    /// A result for a call that already reached a terminal state.
    DuplicateResult,
    DuplicateRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    Dropped(DropReason),
    /// A session-wide approval resolved the confirmation without a pending record.
    AutoApproved { request_id: RequestId },
    /// Usage crossed the compression threshold for the first time since the last reset.
    CompressionNeeded,
    /// An error event was written to the session.
    ErrorSurfaced,
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

/// Applies `event` for `current_session`. Events naming any other session are dropped.
pub fn dispatch_event(
    projection: &mut Projection,
    current_session: Option<&str>,
    event: &ExecutionEvent,
) -> DispatchOutcome {
    let session_id = event.session_id();
    if current_session != Some(session_id) {
        tracing::debug!(
            session_id,
            current_session = current_session.unwrap_or("<none>"),
            kind = event.kind(),
            "dropping event for non-current session"
        );
        return DispatchOutcome::Dropped(DropReason::SessionMismatch);
    }
    if !projection.sessions.contains(session_id) {
        tracing::debug!(session_id, kind = event.kind(), "dropping event for unknown session");
        return DispatchOutcome::Dropped(DropReason::UnknownSession);
    }

    let outcome = apply(projection, session_id, event);
    if let DispatchOutcome::Dropped(reason) = &outcome {
        tracing::debug!(session_id, kind = event.kind(), ?reason, "event dropped");
    }
    outcome
}

fn apply(projection: &mut Projection, session_id: &str, event: &ExecutionEvent) -> DispatchOutcome {
    let task_id = projection.running_task(session_id);

    match event {
        ExecutionEvent::ContentDelta {
            message_id, text, ..
        } => with_agent_message(projection, session_id, message_id, task_id, |message, _| {
            message.push_str(text);
        }),
        ExecutionEvent::ThinkingDelta {
            message_id, text, ..
        } => with_agent_message(projection, session_id, message_id, task_id, |_, agent| {
            agent.thinking.push_str(text);
        }),
        ExecutionEvent::ToolStart {
            message_id,
            call_id,
            tool_name,
            arguments,
            subagent,
            ..
        } => {
            let record =
                ToolCallRecord::running(call_id.as_str(), tool_name.as_str(), arguments.clone());
            start_tool(
                projection,
                session_id,
                message_id,
                task_id,
                record,
                subagent.as_ref(),
            )
        }
        ExecutionEvent::ToolResult {
            call_id,
            is_error,
            output,
            summary,
            ..
        } => finish_tool(
            projection,
            session_id,
            call_id,
            *is_error,
            output.clone(),
            summary.clone(),
        ),
        ExecutionEvent::TokenUsage { usage, .. } => {
            projection.tracker_mut(session_id).observe(usage);
            let crossed = projection
                .tracker(session_id)
                .should_compress(projection.compress_threshold());

            let Some(session) = projection.sessions.get_mut(session_id) else {
                return DispatchOutcome::Dropped(DropReason::UnknownSession);
            };
            session.usage.merge(usage);
            if crossed && !session.compression_needed {
                session.compression_needed = true;
                tracing::info!(session_id, "context window crossed compression threshold");
                return DispatchOutcome::CompressionNeeded;
            }
            DispatchOutcome::Applied
        }
        ExecutionEvent::TodoUpdate {
            message_id, todos, ..
        } => with_agent_message(projection, session_id, message_id, task_id, |_, agent| {
            agent.todos = todos.clone();
        }),
        ExecutionEvent::SubagentStart { call_id, spec, .. } => {
            let Some(session) = projection.sessions.get_mut(session_id) else {
                return DispatchOutcome::Dropped(DropReason::UnknownSession);
            };
            let Some(agent) = session.agent_for_call_mut(call_id) else {
                return DispatchOutcome::Dropped(DropReason::UnknownCall);
            };
            upsert_subagent(agent, call_id, spec);
            DispatchOutcome::Applied
        }
        ExecutionEvent::SubagentUpdate {
            call_id,
            activity,
            tool_count,
            ..
        } => with_subagent(projection, session_id, call_id, |progress| {
            progress.activity = Some(activity.clone());
            progress.tool_count = *tool_count;
        }),
        ExecutionEvent::SubagentComplete {
            call_id,
            success,
            summary,
            ..
        } => with_subagent(projection, session_id, call_id, |progress| {
            progress.status = if *success {
                SubagentStatus::Completed
            } else {
                SubagentStatus::Failed
            };
            progress.activity = None;
            progress.summary = summary.clone();
        }),
        ExecutionEvent::ConfirmationRequired { request, .. } => {
            open_confirmation(projection, session_id, request.clone())
        }
        ExecutionEvent::TurnLimitReached {
            request_id, turns, ..
        } => open_confirmation(
            projection,
            session_id,
            ConfirmationRequest::turn_limit(request_id.as_str(), *turns),
        ),
        ExecutionEvent::QuestionRequired { request, .. } => {
            match projection.broker.open_question(session_id, request.clone()) {
                Ok(()) => DispatchOutcome::Applied,
                Err(error) => {
                    tracing::warn!(session_id, %error, "rejected question request");
                    DispatchOutcome::Dropped(DropReason::DuplicateRequest)
                }
            }
        }
        ExecutionEvent::Completed { .. } => {
            projection.finish_streaming(session_id);
            DispatchOutcome::Applied
        }
        ExecutionEvent::Error { message, .. } => {
            projection.finish_streaming(session_id);
            let Some(session) = projection.sessions.get_mut(session_id) else {
                return DispatchOutcome::Dropped(DropReason::UnknownSession);
            };
            session.surface_error(message);
            DispatchOutcome::ErrorSurfaced
        }
    }
}

fn with_agent_message(
    projection: &mut Projection,
    session_id: &str,
    message_id: &str,
    task_id: Option<TaskId>,
    update: impl FnOnce(&mut String, &mut AgentResponse),
) -> DispatchOutcome {
    let Some(session) = projection.sessions.get_mut(session_id) else {
        return DispatchOutcome::Dropped(DropReason::UnknownSession);
    };
    let message = session.ensure_agent_message(message_id, task_id);
    if let Some(agent) = message.agent.as_mut() {
        update(&mut message.content, agent);
    }
    DispatchOutcome::Applied
}

fn with_subagent(
    projection: &mut Projection,
    session_id: &str,
    call_id: &str,
    update: impl FnOnce(&mut SubagentProgress),
) -> DispatchOutcome {
    let Some(session) = projection.sessions.get_mut(session_id) else {
        return DispatchOutcome::Dropped(DropReason::UnknownSession);
    };
    match session.subagent_mut(call_id) {
        Some(progress) => {
            update(progress);
            DispatchOutcome::Applied
        }
        None => DispatchOutcome::Dropped(DropReason::UnknownCall),
    }
}

fn start_tool(
    projection: &mut Projection,
    session_id: &str,
    message_id: &str,
    task_id: Option<TaskId>,
    record: ToolCallRecord,
    subagent: Option<&SubagentSpec>,
) -> DispatchOutcome {
    let Some(session) = projection.sessions.get_mut(session_id) else {
        return DispatchOutcome::Dropped(DropReason::UnknownSession);
    };
    if session.has_tool_call(&record.call_id) {
        return DispatchOutcome::Dropped(DropReason::DuplicateCall);
    }

    let route = projection
        .batches
        .route(session_id, &record.call_id, &record.tool_name, |batch_id| {
            session
                .batch(batch_id)
                .is_some_and(|batch| !batch.is_complete)
        });

    let call_id = record.call_id.clone();
    match route {
        BatchRoute::Standalone => {
            if let Some(agent) = session.ensure_agent_message(message_id, task_id).agent.as_mut() {
                agent.tool_calls.push(record);
            }
        }
        BatchRoute::Append(batch_id) => {
            // The open batch may live on an earlier assistant message of this session.
            session.ensure_agent_message(message_id, task_id);
            if let Some(batch) = session.batch_mut(&batch_id) {
                batch.push(record);
            }
        }
        BatchRoute::Open(batch_id) => {
            let mut batch = ToolBatch::new(batch_id);
            batch.push(record);
            if let Some(agent) = session.ensure_agent_message(message_id, task_id).agent.as_mut() {
                agent.batches.push(batch);
            }
        }
    }

    if let Some(spec) = subagent {
        if let Some(agent) = session.agent_for_call_mut(&call_id) {
            upsert_subagent(agent, &call_id, spec);
        }
    }
    DispatchOutcome::Applied
}

fn finish_tool(
    projection: &mut Projection,
    session_id: &str,
    call_id: &str,
    is_error: bool,
    output: Option<String>,
    summary: Option<String>,
) -> DispatchOutcome {
    let Some(session) = projection.sessions.get_mut(session_id) else {
        return DispatchOutcome::Dropped(DropReason::UnknownSession);
    };

    if let Some(batch_id) = projection.batches.batch_for(call_id).cloned() {
        let Some(batch) = session.batch_mut(&batch_id) else {
            return DispatchOutcome::Dropped(DropReason::UnknownCall);
        };
        if !batch.finish_member(call_id, is_error, output, summary) {
            return DispatchOutcome::Dropped(DropReason::DuplicateResult);
        }
        if batch.is_complete {
            projection.batches.release(batch);
            if projection.batches.open_batch(session_id) == Some(&batch_id) {
                projection.batches.close(session_id);
            }
        }
        return DispatchOutcome::Applied;
    }

    let Some(record) = session.tool_call_mut(call_id) else {
        // Batched calls are forgotten once their batch completes.
        let reason = if session.has_tool_call(call_id) {
            DropReason::DuplicateResult
        } else {
            DropReason::UnknownCall
        };
        return DispatchOutcome::Dropped(reason);
    };

    if record.finish(is_error, output, summary) {
        DispatchOutcome::Applied
    } else {
        DispatchOutcome::Dropped(DropReason::DuplicateResult)
    }
}

fn upsert_subagent(agent: &mut AgentResponse, call_id: &str, spec: &SubagentSpec) {
    if let Some(progress) = agent.subagent_mut(call_id) {
        progress.agent_name = spec.agent_name.clone();
        progress.description = spec.description.clone();
        return;
    }
    agent.subagents.push(SubagentProgress {
        call_id: call_id.to_string(),
        agent_name: spec.agent_name.clone(),
        description: spec.description.clone(),
        status: SubagentStatus::Running,
        activity: None,
        tool_count: 0,
        summary: None,
    });
}

fn open_confirmation(
    projection: &mut Projection,
    session_id: &str,
    request: ConfirmationRequest,
) -> DispatchOutcome {
    let request_id = request.request_id.clone();
    match projection.broker.open_confirmation(session_id, request) {
        Ok(Opened::Pending) => DispatchOutcome::Applied,
        Ok(Opened::AutoApproved) => DispatchOutcome::AutoApproved { request_id },
        Err(error) => {
            tracing::warn!(session_id, %error, "rejected confirmation request");
            DispatchOutcome::Dropped(DropReason::DuplicateRequest)
        }
    }
}
