//! Commands submitted while a task is executing.

use std::collections::VecDeque;

use agent_provider::ContentPart;
use serde::Serialize;
use time::OffsetDateTime;

/// User command: display text for the transcript plus the resolved content sent to
/// the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub display: String,
    pub content: Vec<ContentPart>,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
}

impl Command {
    /// Plain-text command whose display and content are the same text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            display: text.clone(),
            content: vec![ContentPart::text(text)],
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn with_content(display: impl Into<String>, content: Vec<ContentPart>) -> Self {
        Self {
            display: display.into(),
            content,
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }

    /// True when neither the display text nor any content part carries data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display.trim().is_empty()
            && self.content.iter().all(|part| match part {
                ContentPart::Text { text } => text.trim().is_empty(),
                ContentPart::Attachment { .. } => false,
            })
    }
}

/// FIFO of pending commands for one session.
#[derive(Debug, Default, Clone)]
pub struct CommandQueue {
    pending: VecDeque<Command>,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command and returns its 1-based position.
    pub fn push(&mut self, command: Command) -> usize {
        self.pending.push_back(command);
        self.pending.len()
    }

    pub fn pop(&mut self) -> Option<Command> {
        self.pending.pop_front()
    }

    /// Puts a command back at the head, ahead of everything queued after it.
    pub fn push_front(&mut self, command: Command) {
        self.pending.push_front(command);
    }

    /// Drops every pending command and returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.pending.iter()
    }
}
