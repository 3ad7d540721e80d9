use std::collections::HashMap;

use agent_provider::{SessionId, TaskId};

use crate::batch::ToolBatchAggregator;
use crate::broker::InteractionBroker;
use crate::context::{ContextWindowTracker, DEFAULT_COMPRESS_THRESHOLD};
use crate::session::{Session, SessionStore};

/// Everything the event dispatcher mutates: sessions plus their satellite state.
#[derive(Debug)]
pub struct Projection {
    pub sessions: SessionStore,
    pub batches: ToolBatchAggregator,
    pub broker: InteractionBroker,
    trackers: HashMap<SessionId, ContextWindowTracker>,
    tracker_template: ContextWindowTracker,
    compress_threshold: f64,
    running: HashMap<SessionId, TaskId>,
}

impl Projection {
    #[must_use]
    pub fn new(
        batches: ToolBatchAggregator,
        tracker_template: ContextWindowTracker,
        compress_threshold: f64,
    ) -> Self {
        Self {
            sessions: SessionStore::new(),
            batches,
            broker: InteractionBroker::new(),
            trackers: HashMap::new(),
            tracker_template,
            compress_threshold,
            running: HashMap::new(),
        }
    }

    #[must_use]
    pub fn compress_threshold(&self) -> f64 {
        self.compress_threshold
    }

    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    /// Tracker of a session; sessions without usage reports share the template values.
    #[must_use]
    pub fn tracker(&self, session_id: &str) -> &ContextWindowTracker {
        self.trackers
            .get(session_id)
            .unwrap_or(&self.tracker_template)
    }

    pub fn tracker_mut(&mut self, session_id: &str) -> &mut ContextWindowTracker {
        self.trackers
            .entry(session_id.to_string())
            .or_insert_with(|| self.tracker_template.clone())
    }

    /// Records which task owns streaming output of a session.
    pub fn begin_task(&mut self, session_id: &str, task_id: TaskId) {
        self.running.insert(session_id.to_string(), task_id);
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.active_task = true;
            session.error = None;
        }
    }

    pub fn end_task(&mut self, session_id: &str) {
        self.running.remove(session_id);
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.active_task = false;
        }
    }

    #[must_use]
    pub fn running_task(&self, session_id: &str) -> Option<TaskId> {
        self.running.get(session_id).copied()
    }

    /// Ends streaming output and closes the open batch. Returns the number of agent
    /// responses that stopped streaming.
    pub fn finish_streaming(&mut self, session_id: &str) -> usize {
        self.batches.close(session_id);
        self.sessions
            .get_mut(session_id)
            .map_or(0, Session::finish_streaming)
    }

    /// Clears the compression flag and the usage counters after history was compacted.
    pub fn reset_context(&mut self, session_id: &str) -> bool {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        session.compression_needed = false;
        session.usage = Default::default();
        if let Some(tracker) = self.trackers.get_mut(session_id) {
            tracker.reset_counters();
        }
        true
    }

    /// Removes a session together with its batches, trackers and broker records.
    pub fn forget_session(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        let call_ids = session
            .messages
            .iter()
            .filter_map(|message| message.agent.as_ref())
            .flat_map(|agent| agent.all_tool_calls())
            .map(|record| record.call_id.clone())
            .collect::<Vec<_>>();

        self.batches.forget_session(session_id, call_ids);
        self.broker.forget_session(session_id);
        self.trackers.remove(session_id);
        self.running.remove(session_id);
        Some(session)
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::new(
            ToolBatchAggregator::default(),
            ContextWindowTracker::with_provider_default(0),
            DEFAULT_COMPRESS_THRESHOLD,
        )
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::TokenUsage;

    use super::*;

    #[test]
    fn tracker_is_created_from_template_on_first_write() {
        let mut projection = Projection::new(
            ToolBatchAggregator::default(),
            ContextWindowTracker::with_provider_default(1_000),
            0.5,
        );

        assert_eq!(projection.tracker("s1").max_context_tokens(), 1_000);
        projection.tracker_mut("s1").observe(&TokenUsage {
            input_tokens: Some(600),
            ..TokenUsage::default()
        });

        assert!(projection
            .tracker("s1")
            .should_compress(projection.compress_threshold()));
        assert_eq!(projection.tracker("s2").total_tokens(), 0);
    }

    #[test]
    fn forget_session_drops_satellite_state() {
        let mut projection = Projection::default();
        let session_id = projection.sessions.create();
        projection.begin_task(&session_id, 7);
        projection.tracker_mut(&session_id);

        assert!(projection.forget_session(&session_id).is_some());
        assert!(projection.running_task(&session_id).is_none());
        assert!(projection.session(&session_id).is_none());
        assert!(projection.forget_session(&session_id).is_none());
    }

    #[test]
    fn begin_and_end_task_toggle_the_active_flag() {
        let mut projection = Projection::default();
        let session_id = projection.sessions.create();
        if let Some(session) = projection.session_mut(&session_id) {
            session.error = Some("old failure".to_string());
        }

        projection.begin_task(&session_id, 1);
        let session = projection.session(&session_id).expect("session");
        assert!(session.active_task);
        assert!(session.error.is_none());

        projection.end_task(&session_id);
        assert!(!projection.session(&session_id).expect("session").active_task);
    }
}
