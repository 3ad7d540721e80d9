//! Session-scoped projected state rendered by the UI.

use agent_provider::{
    CallId, ContentPart, MessageId, RunMessage, SessionId, TaskId, TodoItem, TokenUsage,
};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::batch::{BatchId, ToolBatch};

pub const TASK_STOPPED_MESSAGE: &str = "Task stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    StopMarker,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub call_id: CallId,
    pub tool_name: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    pub output: Option<String>,
    pub summary: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

impl ToolCallRecord {
    #[must_use]
    pub fn running(
        call_id: impl Into<CallId>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            status: ToolCallStatus::Running,
            output: None,
            summary: None,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status != ToolCallStatus::Running
    }

    /// Moves a running call to its terminal state. Returns false when the call already
    /// settled; the earlier result is kept.
    pub fn finish(
        &mut self,
        is_error: bool,
        output: Option<String>,
        summary: Option<String>,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.status = if is_error {
            ToolCallStatus::Error
        } else {
            ToolCallStatus::Success
        };
        self.output = output;
        self.summary = summary;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubagentProgress {
    pub call_id: CallId,
    pub agent_name: String,
    pub description: String,
    pub status: SubagentStatus,
    pub activity: Option<String>,
    pub tool_count: u32,
    pub summary: Option<String>,
}

/// Structured part of an assistant message produced by an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub thinking: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub batches: Vec<ToolBatch>,
    pub subagents: Vec<SubagentProgress>,
    pub todos: Vec<TodoItem>,
    pub streaming: bool,
}

impl AgentResponse {
    #[must_use]
    pub fn streaming() -> Self {
        Self {
            thinking: String::new(),
            tool_calls: Vec::new(),
            batches: Vec::new(),
            subagents: Vec::new(),
            todos: Vec::new(),
            streaming: true,
        }
    }

    pub fn subagent_mut(&mut self, call_id: &str) -> Option<&mut SubagentProgress> {
        self.subagents
            .iter_mut()
            .find(|progress| progress.call_id == call_id)
    }

    /// Standalone and batched calls in display order (standalone first).
    pub fn all_tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.tool_calls
            .iter()
            .chain(self.batches.iter().flat_map(|batch| batch.members.iter()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub kind: MessageKind,
    pub content: String,
    /// Resolved content of a user turn; `content` holds its display text.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<ContentPart>,
    pub agent: Option<AgentResponse>,
    pub task_id: Option<TaskId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    fn new(id: MessageId, role: Role, kind: MessageKind, content: String) -> Self {
        Self {
            id,
            role,
            kind,
            content,
            input: Vec::new(),
            agent: None,
            task_id: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.agent.as_ref().is_some_and(|agent| agent.streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
    pub active_task: bool,
    pub error: Option<String>,
    pub compression_needed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            usage: TokenUsage::default(),
            active_task: false,
            error: None,
            compression_needed: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .rev()
            .find(|message| message.id == message_id)
    }

    /// Returns the assistant message for `message_id`, creating an empty streaming one
    /// when deltas arrive before the message is known.
    pub fn ensure_agent_message(
        &mut self,
        message_id: &str,
        task_id: Option<TaskId>,
    ) -> &mut Message {
        let index = match self
            .messages
            .iter()
            .rposition(|message| message.id == message_id)
        {
            Some(index) => index,
            None => {
                let mut message = Message::new(
                    message_id.to_string(),
                    Role::Assistant,
                    MessageKind::Text,
                    String::new(),
                );
                message.task_id = task_id;
                self.messages.push(message);
                self.messages.len() - 1
            }
        };

        let message = &mut self.messages[index];
        if message.agent.is_none() {
            message.agent = Some(AgentResponse::streaming());
        }
        message
    }

    /// Standalone tool call lookup, newest message first.
    pub fn tool_call_mut(&mut self, call_id: &str) -> Option<&mut ToolCallRecord> {
        self.messages
            .iter_mut()
            .rev()
            .filter_map(|message| message.agent.as_mut())
            .flat_map(|agent| agent.tool_calls.iter_mut())
            .find(|record| record.call_id == call_id)
    }

    #[must_use]
    pub fn batch(&self, batch_id: &BatchId) -> Option<&ToolBatch> {
        self.messages
            .iter()
            .rev()
            .filter_map(|message| message.agent.as_ref())
            .flat_map(|agent| agent.batches.iter())
            .find(|batch| &batch.id == batch_id)
    }

    pub fn batch_mut(&mut self, batch_id: &BatchId) -> Option<&mut ToolBatch> {
        self.messages
            .iter_mut()
            .rev()
            .filter_map(|message| message.agent.as_mut())
            .flat_map(|agent| agent.batches.iter_mut())
            .find(|batch| &batch.id == batch_id)
    }

    /// Agent response that owns `call_id`, standalone or batched.
    pub fn agent_for_call_mut(&mut self, call_id: &str) -> Option<&mut AgentResponse> {
        self.messages
            .iter_mut()
            .rev()
            .filter_map(|message| message.agent.as_mut())
            .find(|agent| agent.all_tool_calls().any(|record| record.call_id == call_id))
    }

    #[must_use]
    pub fn has_tool_call(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .filter_map(|message| message.agent.as_ref())
            .any(|agent| agent.all_tool_calls().any(|record| record.call_id == call_id))
    }

    pub fn subagent_mut(&mut self, call_id: &str) -> Option<&mut SubagentProgress> {
        self.messages
            .iter_mut()
            .rev()
            .filter_map(|message| message.agent.as_mut())
            .find_map(|agent| agent.subagent_mut(call_id))
    }

    pub fn push_user(
        &mut self,
        display: impl Into<String>,
        input: Vec<ContentPart>,
        task_id: TaskId,
    ) -> &Message {
        let mut message =
            Message::new(new_message_id(), Role::User, MessageKind::Text, display.into());
        message.input = input;
        message.task_id = Some(task_id);
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn push_assistant_text(&mut self, text: impl Into<String>, task_id: TaskId) {
        let mut message =
            Message::new(new_message_id(), Role::Assistant, MessageKind::Text, text.into());
        message.task_id = Some(task_id);
        self.messages.push(message);
    }

    pub fn push_stop_marker(&mut self) {
        self.messages.push(Message::new(
            new_message_id(),
            Role::System,
            MessageKind::StopMarker,
            TASK_STOPPED_MESSAGE.to_string(),
        ));
    }

    /// Sets the error field and appends the visible error message.
    pub fn surface_error(&mut self, error: &str) {
        self.error = Some(error.to_string());
        self.messages.push(Message::new(
            new_message_id(),
            Role::Assistant,
            MessageKind::Error,
            format!("Error: {error}"),
        ));
    }

    /// Ends every streaming agent response and drops transient thinking text.
    pub fn finish_streaming(&mut self) -> usize {
        let mut finished = 0;
        for agent in self
            .messages
            .iter_mut()
            .filter_map(|message| message.agent.as_mut())
            .filter(|agent| agent.streaming)
        {
            agent.streaming = false;
            agent.thinking.clear();
            finished += 1;
        }
        finished
    }

    #[must_use]
    pub fn has_assistant_output_for(&self, task_id: TaskId) -> bool {
        self.messages.iter().any(|message| {
            message.role == Role::Assistant
                && message.kind == MessageKind::Text
                && message.task_id == Some(task_id)
        })
    }

    /// Model-facing history: user text, assistant text and settled tool calls.
    #[must_use]
    pub fn run_history(&self) -> Vec<RunMessage> {
        let mut history = Vec::new();
        for message in &self.messages {
            match (message.role, message.kind) {
                (Role::User, MessageKind::Text) => {
                    let content = if message.input.is_empty() {
                        vec![ContentPart::text(message.content.as_str())]
                    } else {
                        message.input.clone()
                    };
                    history.push(RunMessage::User { content });
                }
                (Role::Assistant, MessageKind::Text) => {
                    if let Some(agent) = message.agent.as_ref() {
                        for record in agent.all_tool_calls().filter(|record| record.is_terminal()) {
                            history.push(RunMessage::ToolCall {
                                call_id: record.call_id.clone(),
                                tool_name: record.tool_name.clone(),
                                arguments: record.arguments.clone(),
                            });
                            history.push(RunMessage::ToolResult {
                                call_id: record.call_id.clone(),
                                tool_name: record.tool_name.clone(),
                                content: record.output.clone().unwrap_or_default(),
                                is_error: record.status == ToolCallStatus::Error,
                            });
                        }
                    }
                    if !message.content.is_empty() {
                        history.push(RunMessage::AssistantText {
                            text: message.content.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
        history
    }
}

/// All known sessions in creation order.
#[derive(Debug, Default, Clone)]
pub struct SessionStore {
    sessions: Vec<Session>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session with a fresh id and returns the id.
    pub fn create(&mut self) -> SessionId {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.push(Session::new(id.clone()));
        id
    }

    /// Inserts a session with a caller-chosen id. Returns false when the id exists.
    pub fn insert(&mut self, session: Session) -> bool {
        if self.contains(&session.id) {
            return false;
        }
        self.sessions.push(session);
        true
    }

    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).is_some()
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|session| session.id == session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|session| session.id == session_id)
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Session> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.id == session_id)?;
        Some(self.sessions.remove(index))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|session| session.id.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn new_message_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_call_settles_exactly_once() {
        let mut record = ToolCallRecord::running("call-1", "bash", json!({ "command": "ls" }));

        assert!(record.finish(false, Some("ok".to_string()), None));
        assert!(!record.finish(true, Some("late".to_string()), None));
        assert_eq!(record.status, ToolCallStatus::Success);
        assert_eq!(record.output.as_deref(), Some("ok"));
    }

    #[test]
    fn ensure_agent_message_creates_lazily_and_reuses() {
        let mut session = Session::new("s1");
        session.ensure_agent_message("m1", Some(3)).content.push_str("hello");
        session.ensure_agent_message("m1", Some(3)).content.push_str(" world");

        assert_eq!(session.messages.len(), 1);
        let message = &session.messages[0];
        assert_eq!(message.content, "hello world");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.task_id, Some(3));
        assert!(message.is_streaming());
    }

    #[test]
    fn finish_streaming_clears_thinking_and_reports_count() {
        let mut session = Session::new("s1");
        session
            .ensure_agent_message("m1", None)
            .agent
            .as_mut()
            .expect("agent response")
            .thinking
            .push_str("pondering");

        assert_eq!(session.finish_streaming(), 1);
        assert_eq!(session.finish_streaming(), 0);
        let agent = session.messages[0].agent.as_ref().expect("agent response");
        assert!(!agent.streaming);
        assert!(agent.thinking.is_empty());
    }

    #[test]
    fn run_history_replays_user_text_tools_and_answers() {
        let mut session = Session::new("s1");
        session.push_user("list files", Vec::new(), 1);
        let message = session.ensure_agent_message("m1", Some(1));
        message.content.push_str("two files");
        let agent = message.agent.as_mut().expect("agent response");
        let mut record = ToolCallRecord::running("call-1", "list_dir", json!({ "path": "." }));
        record.finish(false, Some("a\nb".to_string()), None);
        agent.tool_calls.push(record);
        agent
            .tool_calls
            .push(ToolCallRecord::running("call-2", "bash", json!({})));
        session.push_stop_marker();

        assert_eq!(
            session.run_history(),
            vec![
                RunMessage::User {
                    content: vec![ContentPart::text("list files")],
                },
                RunMessage::ToolCall {
                    call_id: "call-1".to_string(),
                    tool_name: "list_dir".to_string(),
                    arguments: json!({ "path": "." }),
                },
                RunMessage::ToolResult {
                    call_id: "call-1".to_string(),
                    tool_name: "list_dir".to_string(),
                    content: "a\nb".to_string(),
                    is_error: false,
                },
                RunMessage::AssistantText {
                    text: "two files".to_string(),
                },
            ]
        );
    }

    #[test]
    fn run_history_replays_attachments_of_earlier_turns() {
        let mut session = Session::new("s1");
        let input = vec![
            ContentPart::text("what is in"),
            ContentPart::Attachment {
                name: "notes.txt".to_string(),
                media_type: "text/plain".to_string(),
                data: "remember the milk".to_string(),
            },
        ];
        session.push_user("what is in [notes.txt]", input.clone(), 1);
        session.push_assistant_text("a reminder", 1);

        assert_eq!(session.messages[0].content, "what is in [notes.txt]");
        assert_eq!(
            session.run_history(),
            vec![
                RunMessage::User { content: input },
                RunMessage::AssistantText {
                    text: "a reminder".to_string(),
                },
            ]
        );
    }

    #[test]
    fn surface_error_sets_field_and_appends_message() {
        let mut session = Session::new("s1");
        session.surface_error("provider unavailable");

        assert_eq!(session.error.as_deref(), Some("provider unavailable"));
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].kind, MessageKind::Error);
        assert_eq!(session.messages[0].content, "Error: provider unavailable");
    }

    #[test]
    fn store_preserves_creation_order_and_rejects_duplicates() {
        let mut store = SessionStore::new();
        let first = store.create();
        assert!(store.insert(Session::new("named")));
        assert!(!store.insert(Session::new("named")));

        assert_eq!(store.ids().collect::<Vec<_>>(), vec![first.as_str(), "named"]);
        assert!(store.remove("named").is_some());
        assert_eq!(store.len(), 1);
    }
}
