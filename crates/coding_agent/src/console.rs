use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use agent_session::{
    AgentResponse, MessageKind, ProjectionListener, Role, SessionId, SessionSnapshot,
    TaskCoordinator, ToolCallStatus,
};

/// Tracks what of a session transcript was already written, so each change prints
/// only the new part.
#[derive(Debug, Default)]
pub struct TranscriptCursor {
    printed: HashMap<String, usize>,
    announced: HashSet<String>,
}

impl TranscriptCursor {
    pub fn advance(&mut self, snapshot: &SessionSnapshot) -> String {
        let mut out = String::new();

        for message in &snapshot.session.messages {
            match (message.role, message.kind) {
                (Role::User, _) => {}
                (Role::Assistant, MessageKind::Text) => {
                    if let Some(agent) = message.agent.as_ref() {
                        self.advance_agent(agent, &mut out);
                    }

                    let printed = self.printed.entry(message.id.clone()).or_insert(0);
                    if let Some(fresh) = message.content.get(*printed..) {
                        out.push_str(fresh);
                        *printed = message.content.len();
                    }

                    let finished = !message.is_streaming() && !message.content.is_empty();
                    if finished
                        && self.announce(format!("done:{}", message.id))
                        && !message.content.ends_with('\n')
                    {
                        out.push('\n');
                    }
                }
                _ => {
                    if self.announce(format!("message:{}", message.id)) {
                        out.push_str(&message.content);
                        out.push('\n');
                    }
                }
            }
        }

        for record in &snapshot.pending_confirmations {
            let request = &record.request;
            if !self.announce(format!("confirm:{}", request.request_id)) {
                continue;
            }
            out.push_str(&format!(
                "[approval] {}: {}\n",
                request.request_id, request.description
            ));
            if let Some(diff) = request.diff.as_deref() {
                out.push_str(diff);
                if !diff.ends_with('\n') {
                    out.push('\n');
                }
            }
            out.push_str(&format!(
                "  /approve {id} [session] or /deny {id}\n",
                id = request.request_id
            ));
        }

        for record in &snapshot.pending_questions {
            let request = &record.request;
            if !self.announce(format!("question:{}", request.request_id)) {
                continue;
            }
            out.push_str(&format!("[question] {}\n", request.request_id));
            for question in &request.questions {
                let labels: Vec<&str> = question
                    .options
                    .iter()
                    .map(|option| option.label.as_str())
                    .collect();
                out.push_str(&format!(
                    "  {}: {} ({})\n",
                    question.header,
                    question.prompt,
                    labels.join(" / ")
                ));
            }
            out.push_str(&format!(
                "  /answer {} <header>=<label>\n",
                request.request_id
            ));
        }

        out
    }

    fn advance_agent(&mut self, agent: &AgentResponse, out: &mut String) {
        for record in agent.all_tool_calls() {
            if self.announce(format!("tool:{}", record.call_id)) {
                out.push_str(&format!("[tool] {} {}\n", record.tool_name, record.call_id));
            }
            let verdict = match record.status {
                ToolCallStatus::Running => continue,
                ToolCallStatus::Success => "ok",
                ToolCallStatus::Error => "failed",
            };
            if self.announce(format!("tool-done:{}", record.call_id)) {
                out.push_str(&format!("[tool] {} {verdict}\n", record.call_id));
            }
        }

        for batch in agent.batches.iter().filter(|batch| batch.is_complete) {
            if self.announce(format!("batch:{}", batch.id)) {
                out.push_str(&format!(
                    "[batch] {} read-only calls finished\n",
                    batch.members.len()
                ));
            }
        }
    }

    fn announce(&mut self, key: String) -> bool {
        self.announced.insert(key)
    }
}

struct ConsoleState {
    out: Box<dyn Write + Send>,
    cursors: HashMap<SessionId, TranscriptCursor>,
}

/// Line-mode renderer for the selected session.
pub struct Console {
    coordinator: OnceLock<Weak<TaskCoordinator>>,
    state: Mutex<ConsoleState>,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            coordinator: OnceLock::new(),
            state: Mutex::new(ConsoleState {
                out: Box::new(out),
                cursors: HashMap::new(),
            }),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Connects the console to the coordinator it renders. Later calls are ignored.
    pub fn attach(&self, coordinator: &Arc<TaskCoordinator>) {
        let _ = self.coordinator.set(Arc::downgrade(coordinator));
    }

    pub fn print(&self, line: &str) {
        let mut state = self.lock_state();
        if let Err(error) = writeln!(state.out, "{line}").and_then(|()| state.out.flush()) {
            tracing::warn!(%error, "console write failed");
        }
    }

    fn render(&self, session_id: &str) {
        let Some(coordinator) = self.coordinator.get().and_then(Weak::upgrade) else {
            return;
        };
        // Snapshot before taking the console lock; the coordinator never calls back
        // while holding its own.
        let Ok(snapshot) = coordinator.snapshot(session_id) else {
            return;
        };
        if !snapshot.is_current {
            return;
        }

        let mut guard = self.lock_state();
        let state = &mut *guard;
        let text = state
            .cursors
            .entry(session_id.to_string())
            .or_default()
            .advance(&snapshot);
        if text.is_empty() {
            return;
        }
        if let Err(error) = state
            .out
            .write_all(text.as_bytes())
            .and_then(|()| state.out.flush())
        {
            tracing::warn!(%error, "console write failed");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConsoleState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ProjectionListener for Console {
    fn projection_changed(&self, session_id: &str) {
        self.render(session_id);
    }

    fn compression_needed(&self, session_id: &str) {
        self.print(&format!(
            "[context] session {session_id} is close to its context window limit"
        ));
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::ConfirmationRequest;
    use agent_session::{
        ConfirmationRecord, ConfirmationStatus, ContextWindowTracker, Session, TaskPhase,
        ToolCallRecord,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn snapshot(session: Session) -> SessionSnapshot {
        SessionSnapshot {
            session,
            is_current: true,
            phase: TaskPhase::Idle,
            queued: Vec::new(),
            pending_confirmations: Vec::new(),
            pending_questions: Vec::new(),
            context: ContextWindowTracker::with_provider_default(0),
        }
    }

    #[test]
    fn streamed_content_is_printed_once() {
        let mut session = Session::new("session-1");
        session.push_user("hi", Vec::new(), 1);
        session
            .ensure_agent_message("1-answer", Some(1))
            .content
            .push_str("Hello");

        let mut cursor = TranscriptCursor::default();
        assert_eq!(cursor.advance(&snapshot(session.clone())), "Hello");
        assert_eq!(cursor.advance(&snapshot(session.clone())), "");

        session
            .ensure_agent_message("1-answer", Some(1))
            .content
            .push_str(", world");
        session.finish_streaming();
        assert_eq!(cursor.advance(&snapshot(session)), ", world\n");
    }

    #[test]
    fn tool_calls_are_announced_on_start_and_finish() {
        let mut session = Session::new("session-1");
        let message = session.ensure_agent_message("1-answer", Some(1));
        if let Some(agent) = message.agent.as_mut() {
            agent.tool_calls.push(ToolCallRecord::running(
                "call-1",
                "edit_file",
                json!({ "path": "src/lib.rs" }),
            ));
        }

        let mut cursor = TranscriptCursor::default();
        assert_eq!(
            cursor.advance(&snapshot(session.clone())),
            "[tool] edit_file call-1\n"
        );

        if let Some(record) = session.tool_call_mut("call-1") {
            record.finish(true, Some("permission denied".to_string()), None);
        }
        assert_eq!(cursor.advance(&snapshot(session)), "[tool] call-1 failed\n");
    }

    #[test]
    fn errors_stop_markers_and_confirmations_print_once() {
        let mut session = Session::new("session-1");
        session.surface_error("rate limited");
        session.push_stop_marker();
        let mut view = snapshot(session);
        view.pending_confirmations.push(ConfirmationRecord {
            session_id: "session-1".to_string(),
            request: ConfirmationRequest::tool("confirm-1", "call-1", "bash", "Run cargo fmt"),
            status: ConfirmationStatus::Pending,
        });

        let mut cursor = TranscriptCursor::default();
        let first = cursor.advance(&view);
        assert!(first.starts_with("Error: rate limited\n"));
        assert!(first.contains("[approval] confirm-1: Run cargo fmt\n"));
        assert!(first.contains("/approve confirm-1 [session] or /deny confirm-1"));
        assert_eq!(cursor.advance(&view), "");
    }
}
