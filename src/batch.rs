//! Groups consecutive read-only tool calls into one visual batch.

use std::collections::{HashMap, HashSet};

use agent_provider::{CallId, SessionId};
use serde::Serialize;

use crate::session::ToolCallRecord;

pub type BatchId = String;

/// Consecutive read-only tool calls rendered together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolBatch {
    pub id: BatchId,
    pub members: Vec<ToolCallRecord>,
    pub is_complete: bool,
}

impl ToolBatch {
    #[must_use]
    pub fn new(id: impl Into<BatchId>) -> Self {
        Self {
            id: id.into(),
            members: Vec::new(),
            is_complete: false,
        }
    }

    /// Adds a member while the batch is still open. Returns false once complete.
    pub fn push(&mut self, record: ToolCallRecord) -> bool {
        if self.is_complete {
            return false;
        }
        self.members.push(record);
        self.recompute();
        true
    }

    /// Settles one member and recomputes completion. Returns false when the call is
    /// unknown, already settled, or the batch is complete.
    pub fn finish_member(
        &mut self,
        call_id: &str,
        is_error: bool,
        output: Option<String>,
        summary: Option<String>,
    ) -> bool {
        if self.is_complete {
            return false;
        }

        let Some(member) = self
            .members
            .iter_mut()
            .find(|member| member.call_id == call_id)
        else {
            return false;
        };

        let settled = member.finish(is_error, output, summary);
        self.recompute();
        settled
    }

    fn recompute(&mut self) {
        self.is_complete =
            !self.members.is_empty() && self.members.iter().all(ToolCallRecord::is_terminal);
    }
}

/// Classifies tool names as read-only.
///
/// Exact names, name prefixes and infix conventions are kept as a table so callers can
/// swap in their own classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlyPolicy {
    exact: HashSet<String>,
    prefixes: Vec<String>,
    infixes: Vec<String>,
}

const READ_ONLY_TOOLS: &[&str] = &[
    "read",
    "read_file",
    "read_many_files",
    "view",
    "ls",
    "list",
    "list_dir",
    "list_directory",
    "glob",
    "grep",
    "search",
    "search_files",
    "find",
    "find_files",
    "codebase_search",
    "web_fetch",
    "web_search",
];
const READ_ONLY_PREFIXES: &[&str] = &["read_", "list_", "get_", "search_"];
const READ_ONLY_INFIXES: &[&str] = &["_get_", "_list_", "_search_"];

impl ReadOnlyPolicy {
    #[must_use]
    pub fn new(
        exact: impl IntoIterator<Item = impl Into<String>>,
        prefixes: impl IntoIterator<Item = impl Into<String>>,
        infixes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            exact: exact.into_iter().map(Into::into).collect(),
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            infixes: infixes.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_read_only(&self, tool_name: &str) -> bool {
        let name = tool_name.trim().to_ascii_lowercase();
        self.exact.contains(&name)
            || self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
            || self.infixes.iter().any(|infix| name.contains(infix.as_str()))
    }
}

impl Default for ReadOnlyPolicy {
    fn default() -> Self {
        Self::new(
            READ_ONLY_TOOLS.iter().copied(),
            READ_ONLY_PREFIXES.iter().copied(),
            READ_ONLY_INFIXES.iter().copied(),
        )
    }
}

/// Where a starting tool call goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRoute {
    Standalone,
    Append(BatchId),
    Open(BatchId),
}

/// Per-session batching state: the open batch and the call-id → batch-id map.
#[derive(Debug, Clone)]
pub struct ToolBatchAggregator {
    policy: ReadOnlyPolicy,
    enabled: bool,
    open: HashMap<SessionId, BatchId>,
    members: HashMap<CallId, BatchId>,
    next_batch: u64,
}

impl ToolBatchAggregator {
    #[must_use]
    pub fn new(policy: ReadOnlyPolicy, enabled: bool) -> Self {
        Self {
            policy,
            enabled,
            open: HashMap::new(),
            members: HashMap::new(),
            next_batch: 1,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &ReadOnlyPolicy {
        &self.policy
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decides where a starting call belongs and records batch membership.
    ///
    /// `open_batch_accepts` reports whether the session's open batch is still
    /// incomplete in the projection; a complete batch is never appended to.
    pub fn route(
        &mut self,
        session_id: &str,
        call_id: &str,
        tool_name: &str,
        open_batch_accepts: impl FnOnce(&BatchId) -> bool,
    ) -> BatchRoute {
        if !self.enabled || !self.policy.is_read_only(tool_name) {
            self.close(session_id);
            return BatchRoute::Standalone;
        }

        if let Some(batch_id) = self.open.get(session_id) {
            if open_batch_accepts(batch_id) {
                let batch_id = batch_id.clone();
                self.members.insert(call_id.to_string(), batch_id.clone());
                return BatchRoute::Append(batch_id);
            }
        }

        let batch_id = format!("batch-{}", self.next_batch);
        self.next_batch += 1;
        self.open.insert(session_id.to_string(), batch_id.clone());
        self.members.insert(call_id.to_string(), batch_id.clone());
        BatchRoute::Open(batch_id)
    }

    /// Batch owning `call_id`, if it was routed into one.
    #[must_use]
    pub fn batch_for(&self, call_id: &str) -> Option<&BatchId> {
        self.members.get(call_id)
    }

    #[must_use]
    pub fn open_batch(&self, session_id: &str) -> Option<&BatchId> {
        self.open.get(session_id)
    }

    /// Stops the session's open batch from accepting members. Running members keep
    /// their batch membership.
    pub fn close(&mut self, session_id: &str) -> Option<BatchId> {
        self.open.remove(session_id)
    }

    /// Forgets membership for settled calls of a completed batch.
    pub fn release(&mut self, batch: &ToolBatch) {
        if !batch.is_complete {
            return;
        }
        for member in &batch.members {
            self.members.remove(&member.call_id);
        }
    }

    /// Drops everything known about a session's batches.
    pub fn forget_session(&mut self, session_id: &str, call_ids: impl IntoIterator<Item = CallId>) {
        self.open.remove(session_id);
        for call_id in call_ids {
            self.members.remove(&call_id);
        }
    }
}

impl Default for ToolBatchAggregator {
    fn default() -> Self {
        Self::new(ReadOnlyPolicy::default(), true)
    }
}
