//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic. A [`MockProvider`] plays a
//! fixed script of [`ScriptStep`]s, stamping each emitted event with the
//! requesting session id, and is intended for local runs and coordinator tests.

use std::thread;
use std::time::Duration;

use agent_provider::{
    AgentExecutor, CancelToken, ConfirmationRequest, ExecutionError, ExecutionEvent, Interaction,
    InteractionOutcome, ProviderProfile, QuestionRequest, RunRequest, SubagentSpec, TodoItem,
    TokenUsage,
};
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

const DEFAULT_CONTEXT_WINDOW: u64 = 128_000;
const CANCEL_POLL_MS: u64 = 5;

/// One scripted action. Message ids are scoped per run as `"{task_id}-{message}"`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Content {
        message: String,
        text: String,
    },
    Thinking {
        message: String,
        text: String,
    },
    ToolStart {
        message: String,
        call_id: String,
        tool_name: String,
        arguments: Value,
        subagent: Option<SubagentSpec>,
    },
    ToolResult {
        call_id: String,
        is_error: bool,
        output: Option<String>,
    },
    Usage(TokenUsage),
    Todos {
        message: String,
        todos: Vec<TodoItem>,
    },
    /// Blocks on a confirmation; a non-approval fails the run with `"denied: {tool}"`.
    Confirm(ConfirmationRequest),
    /// Blocks on a question; answers are appended to the final result text.
    Ask(QuestionRequest),
    Sleep(Duration),
    /// Blocks until the token is cancelled.
    AwaitCancel,
    /// Emits an `Error` event and fails the run.
    Fail(String),
}

impl ScriptStep {
    #[must_use]
    pub fn content(message: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Content {
            message: message.into(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn tool_start(
        message: impl Into<String>,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self::ToolStart {
            message: message.into(),
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            subagent: None,
        }
    }

    #[must_use]
    pub fn tool_ok(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            is_error: false,
            output: Some(output.into()),
        }
    }

    #[must_use]
    pub fn tool_err(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            is_error: true,
            output: Some(output.into()),
        }
    }
}

/// Deterministic scripted executor.
#[derive(Debug, Clone)]
pub struct MockProvider {
    steps: Vec<ScriptStep>,
    model_id: String,
    context_window: Option<u64>,
    token_delay: Duration,
    complete: bool,
}

impl MockProvider {
    /// Creates a provider that plays `steps` and then emits `Completed`.
    #[must_use]
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            model_id: "mock".to_string(),
            context_window: Some(DEFAULT_CONTEXT_WINDOW),
            token_delay: Duration::ZERO,
            complete: true,
        }
    }

    /// Streams each content step word by word with `delay` between words.
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    #[must_use]
    pub fn with_context_window(mut self, context_window: Option<u64>) -> Self {
        self.context_window = context_window;
        self
    }

    /// Skips the trailing `Completed` event so the host has to finalize on settlement.
    #[must_use]
    pub fn without_completion_event(mut self) -> Self {
        self.complete = false;
        self
    }

    #[must_use]
    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    fn emit_content(
        &self,
        cancel: &CancelToken,
        emit: &mut dyn FnMut(ExecutionEvent),
        session_id: &str,
        message_id: &str,
        text: &str,
        result: &mut String,
    ) -> Result<(), ExecutionError> {
        if self.token_delay.is_zero() {
            emit(ExecutionEvent::ContentDelta {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
                text: text.to_string(),
            });
            result.push_str(text);
            return Ok(());
        }

        let mut pending_token = String::new();
        for ch in text.chars() {
            pending_token.push(ch);
            if matches!(ch, ' ' | '\n') {
                check_cancel(cancel)?;
                result.push_str(&pending_token);
                emit(ExecutionEvent::ContentDelta {
                    session_id: session_id.to_string(),
                    message_id: message_id.to_string(),
                    text: std::mem::take(&mut pending_token),
                });
                thread::sleep(self.token_delay);
            }
        }

        if !pending_token.is_empty() {
            check_cancel(cancel)?;
            result.push_str(&pending_token);
            emit(ExecutionEvent::ContentDelta {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
                text: pending_token,
            });
            thread::sleep(self.token_delay);
        }

        Ok(())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(vec![
            ScriptStep::Thinking {
                message: "answer".to_string(),
                text: "Looking at the workspace layout first.".to_string(),
            },
            ScriptStep::tool_start(
                "answer",
                "list-1",
                "list_dir",
                serde_json::json!({ "path": "." }),
            ),
            ScriptStep::tool_start(
                "answer",
                "read-1",
                "read_file",
                serde_json::json!({ "path": "Cargo.toml" }),
            ),
            ScriptStep::tool_ok("list-1", "Cargo.toml\nsrc/\ncrates/"),
            ScriptStep::tool_ok("read-1", "[workspace]"),
            ScriptStep::Usage(TokenUsage {
                input_tokens: Some(1_840),
                output_tokens: Some(212),
                ..TokenUsage::default()
            }),
            ScriptStep::content(
                "answer",
                "The workspace has a root library plus provider crates.\n",
            ),
            ScriptStep::content("answer", "Nothing needs to change.\n"),
        ])
        .with_token_delay(Duration::from_millis(30))
    }
}

impl AgentExecutor for MockProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
            context_window: self.context_window,
        }
    }

    fn run(
        &self,
        req: RunRequest,
        cancel: CancelToken,
        emit: &mut dyn FnMut(ExecutionEvent),
        interact: &mut dyn FnMut(Interaction) -> InteractionOutcome,
    ) -> Result<String, ExecutionError> {
        let session_id = req.session_id.clone();
        let scoped = |message: &str| format!("{}-{message}", req.task_id);
        let mut result = String::new();

        for step in &self.steps {
            check_cancel(&cancel)?;

            match step {
                ScriptStep::Content { message, text } => {
                    self.emit_content(
                        &cancel,
                        emit,
                        &session_id,
                        &scoped(message),
                        text,
                        &mut result,
                    )?;
                }
                ScriptStep::Thinking { message, text } => emit(ExecutionEvent::ThinkingDelta {
                    session_id: session_id.clone(),
                    message_id: scoped(message),
                    text: text.clone(),
                }),
                ScriptStep::ToolStart {
                    message,
                    call_id,
                    tool_name,
                    arguments,
                    subagent,
                } => emit(ExecutionEvent::ToolStart {
                    session_id: session_id.clone(),
                    message_id: scoped(message),
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments: arguments.clone(),
                    subagent: subagent.clone(),
                }),
                ScriptStep::ToolResult {
                    call_id,
                    is_error,
                    output,
                } => emit(ExecutionEvent::ToolResult {
                    session_id: session_id.clone(),
                    call_id: call_id.clone(),
                    is_error: *is_error,
                    output: output.clone(),
                    summary: None,
                }),
                ScriptStep::Usage(usage) => emit(ExecutionEvent::TokenUsage {
                    session_id: session_id.clone(),
                    usage: usage.clone(),
                }),
                ScriptStep::Todos { message, todos } => emit(ExecutionEvent::TodoUpdate {
                    session_id: session_id.clone(),
                    message_id: scoped(message),
                    todos: todos.clone(),
                }),
                ScriptStep::Confirm(request) => {
                    match interact(Interaction::Confirm(request.clone())) {
                        InteractionOutcome::Approved { .. } => {}
                        InteractionOutcome::Cancelled => return Err(ExecutionError::Cancelled),
                        _ => {
                            return Err(ExecutionError::failed(format!(
                                "denied: {}",
                                request.tool_name
                            )))
                        }
                    }
                }
                ScriptStep::Ask(request) => match interact(Interaction::Ask(request.clone())) {
                    InteractionOutcome::Answered(answers) => {
                        for (header, labels) in answers {
                            result.push_str(&format!("{header}: {}\n", labels.join(", ")));
                        }
                    }
                    InteractionOutcome::Cancelled => return Err(ExecutionError::Cancelled),
                    other => {
                        return Err(ExecutionError::failed(format!(
                            "question {} unresolved: {other:?}",
                            request.request_id
                        )))
                    }
                },
                ScriptStep::Sleep(duration) => sleep_unless_cancelled(&cancel, *duration)?,
                ScriptStep::AwaitCancel => {
                    while !cancel.is_cancelled() {
                        thread::sleep(Duration::from_millis(CANCEL_POLL_MS));
                    }
                    return Err(ExecutionError::Cancelled);
                }
                ScriptStep::Fail(message) => {
                    emit(ExecutionEvent::Error {
                        session_id: session_id.clone(),
                        message: message.clone(),
                    });
                    return Err(ExecutionError::failed(message.clone()));
                }
            }
        }

        check_cancel(&cancel)?;
        if self.complete {
            emit(ExecutionEvent::Completed {
                session_id,
                message_id: None,
            });
        }

        tracing::debug!(task_id = req.task_id, "mock run finished");
        Ok(result)
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<(), ExecutionError> {
    if cancel.is_cancelled() {
        Err(ExecutionError::Cancelled)
    } else {
        Ok(())
    }
}

fn sleep_unless_cancelled(cancel: &CancelToken, duration: Duration) -> Result<(), ExecutionError> {
    let poll = Duration::from_millis(CANCEL_POLL_MS);
    let mut remaining = duration;
    while !remaining.is_zero() {
        check_cancel(cancel)?;
        let step = remaining.min(poll);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    check_cancel(cancel)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn request() -> RunRequest {
        RunRequest {
            task_id: 7,
            session_id: "session-a".to_string(),
            generation: 1,
            messages: Vec::new(),
            input: Vec::new(),
            instructions: "system instructions".to_string(),
        }
    }

    fn collect_events(
        provider: &MockProvider,
        cancel: CancelToken,
        outcome: InteractionOutcome,
    ) -> (Vec<ExecutionEvent>, Result<String, ExecutionError>) {
        let mut events = Vec::new();
        let result = provider.run(
            request(),
            cancel,
            &mut |event| events.push(event),
            &mut |_interaction| outcome.clone(),
        );
        (events, result)
    }

    #[test]
    fn profile_exposes_explicit_mock_provider_identity() {
        let profile = MockProvider::new(Vec::new()).profile();

        assert_eq!(profile.provider_id, MOCK_PROVIDER_ID);
        assert_eq!(profile.model_id, "mock");
        assert_eq!(profile.context_window, Some(DEFAULT_CONTEXT_WINDOW));
    }

    #[test]
    fn run_stamps_session_and_scopes_message_ids() {
        let provider = MockProvider::new(vec![
            ScriptStep::content("answer", "one two"),
            ScriptStep::tool_start("answer", "call-1", "grep", json!({ "pattern": "fn" })),
            ScriptStep::tool_ok("call-1", "3 matches"),
        ]);

        let (events, result) =
            collect_events(&provider, CancelToken::new(), InteractionOutcome::Denied);

        assert_eq!(result, Ok("one two".to_string()));
        assert!(events.iter().all(|event| event.session_id() == "session-a"));
        assert_matches!(
            &events[0],
            ExecutionEvent::ContentDelta { message_id, .. } if message_id == "7-answer"
        );
        assert_matches!(events.last(), Some(ExecutionEvent::Completed { .. }));
    }

    #[test]
    fn token_delay_streams_word_chunks() {
        let provider = MockProvider::new(vec![ScriptStep::content("answer", "alpha beta")])
            .with_token_delay(Duration::from_millis(1));

        let (events, _) = collect_events(&provider, CancelToken::new(), InteractionOutcome::Denied);

        let chunks: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::ContentDelta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["alpha ", "beta"]);
    }

    #[test]
    fn cancelled_token_stops_before_first_step() {
        let provider = MockProvider::new(vec![ScriptStep::content("answer", "ignored")]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let (events, result) = collect_events(&provider, cancel, InteractionOutcome::Denied);

        assert!(events.is_empty());
        assert_eq!(result, Err(ExecutionError::Cancelled));
    }

    #[test]
    fn fail_step_emits_error_and_returns_failure() {
        let provider = MockProvider::new(vec![ScriptStep::Fail("rate limited".to_string())]);

        let (events, result) =
            collect_events(&provider, CancelToken::new(), InteractionOutcome::Denied);

        assert_matches!(
            events.as_slice(),
            [ExecutionEvent::Error { message, .. }] if message == "rate limited"
        );
        assert_eq!(result, Err(ExecutionError::failed("rate limited")));
    }

    #[test]
    fn denied_confirmation_fails_the_run() {
        let provider = MockProvider::new(vec![ScriptStep::Confirm(ConfirmationRequest::tool(
            "req-1", "call-1", "bash", "rm -rf target",
        ))]);

        let (_, result) = collect_events(&provider, CancelToken::new(), InteractionOutcome::Denied);

        assert_eq!(result, Err(ExecutionError::failed("denied: bash")));
    }

    #[test]
    fn cancelled_interaction_reports_cancellation() {
        let provider = MockProvider::new(vec![ScriptStep::Confirm(ConfirmationRequest::tool(
            "req-1", "call-1", "bash", "ls",
        ))]);

        let (_, result) =
            collect_events(&provider, CancelToken::new(), InteractionOutcome::Cancelled);

        assert_eq!(result, Err(ExecutionError::Cancelled));
    }

    #[test]
    fn await_cancel_returns_once_token_is_cancelled() {
        let provider = MockProvider::new(vec![ScriptStep::AwaitCancel]);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.cancel();
        });

        let (_, result) = collect_events(&provider, cancel, InteractionOutcome::Denied);
        handle.join().expect("cancel thread joins");

        assert_eq!(result, Err(ExecutionError::Cancelled));
    }

    #[test]
    fn without_completion_event_skips_completed() {
        let provider =
            MockProvider::new(vec![ScriptStep::content("answer", "x")]).without_completion_event();

        let (events, _) = collect_events(&provider, CancelToken::new(), InteractionOutcome::Denied);

        assert!(events.iter().all(|event| !event.is_terminal()));
    }
}
