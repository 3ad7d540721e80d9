//! Correlates confirmation and question requests with their responses.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};

use agent_provider::{
    ApprovalScope, ConfirmationRequest, InteractionOutcome, QuestionAnswers, QuestionRequest,
    RequestId, SessionId,
};
use serde::Serialize;

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationResponse {
    pub approved: bool,
    pub scope: ApprovalScope,
}

impl ConfirmationResponse {
    #[must_use]
    pub fn approve(scope: ApprovalScope) -> Self {
        Self {
            approved: true,
            scope,
        }
    }

    #[must_use]
    pub fn deny() -> Self {
        Self {
            approved: false,
            scope: ApprovalScope::Deny,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    Approved { scope: ApprovalScope },
    Denied,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Answered { answers: QuestionAnswers },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRecord {
    pub session_id: SessionId,
    pub request: ConfirmationRequest,
    pub status: ConfirmationStatus,
}

impl ConfirmationRecord {
    fn outcome(&self) -> Option<InteractionOutcome> {
        match &self.status {
            ConfirmationStatus::Pending => None,
            ConfirmationStatus::Approved { scope } => {
                Some(InteractionOutcome::Approved { scope: *scope })
            }
            ConfirmationStatus::Denied => Some(InteractionOutcome::Denied),
            ConfirmationStatus::Cancelled => Some(InteractionOutcome::Cancelled),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionRecord {
    pub session_id: SessionId,
    pub request: QuestionRequest,
    pub status: QuestionStatus,
}

impl QuestionRecord {
    fn outcome(&self) -> Option<InteractionOutcome> {
        match &self.status {
            QuestionStatus::Pending => None,
            QuestionStatus::Answered { answers } => {
                Some(InteractionOutcome::Answered(answers.clone()))
            }
            QuestionStatus::Cancelled => Some(InteractionOutcome::Cancelled),
        }
    }
}

/// Result of opening a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opened {
    Pending,
    /// A session-wide approval already covers the operation; no record was created.
    AutoApproved,
}

/// Handle a blocked executor waits on.
#[derive(Debug)]
pub enum Waiter {
    Resolved(InteractionOutcome),
    Pending(Receiver<InteractionOutcome>),
}

#[derive(Debug, Default)]
pub struct InteractionBroker {
    confirmations: HashMap<RequestId, ConfirmationRecord>,
    questions: HashMap<RequestId, QuestionRecord>,
    /// Unresolved request ids per session, in the order they were opened.
    pending: HashMap<SessionId, Vec<RequestId>>,
    session_approvals: HashMap<SessionId, HashSet<String>>,
    waiters: HashMap<RequestId, Sender<InteractionOutcome>>,
}

impl InteractionBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a permission request, or auto-approves it when the session already granted
    /// a session-wide approval for the same operation signature.
    pub fn open_confirmation(
        &mut self,
        session_id: &str,
        request: ConfirmationRequest,
    ) -> Result<Opened, BrokerError> {
        if self.is_session_approved(session_id, request.signature()) {
            tracing::debug!(
                session_id,
                request_id = %request.request_id,
                signature = request.signature(),
                "confirmation auto-approved by session scope"
            );
            return Ok(Opened::AutoApproved);
        }

        self.ensure_unique(&request.request_id)?;
        self.list_pending(session_id, &request.request_id);
        self.confirmations.insert(
            request.request_id.clone(),
            ConfirmationRecord {
                session_id: session_id.to_string(),
                request,
                status: ConfirmationStatus::Pending,
            },
        );
        Ok(Opened::Pending)
    }

    pub fn open_question(
        &mut self,
        session_id: &str,
        request: QuestionRequest,
    ) -> Result<(), BrokerError> {
        self.ensure_unique(&request.request_id)?;
        self.list_pending(session_id, &request.request_id);
        self.questions.insert(
            request.request_id.clone(),
            QuestionRecord {
                session_id: session_id.to_string(),
                request,
                status: QuestionStatus::Pending,
            },
        );
        Ok(())
    }

    pub fn respond_confirmation(
        &mut self,
        request_id: &str,
        response: ConfirmationResponse,
    ) -> Result<InteractionOutcome, BrokerError> {
        let Some(record) = self.confirmations.get_mut(request_id) else {
            return Err(if self.questions.contains_key(request_id) {
                BrokerError::WrongKind {
                    request_id: request_id.to_string(),
                    expected: "question",
                }
            } else {
                BrokerError::UnknownRequest {
                    request_id: request_id.to_string(),
                }
            });
        };

        if record.status != ConfirmationStatus::Pending {
            return Err(BrokerError::AlreadyResolved {
                request_id: request_id.to_string(),
            });
        }

        let approved = response.approved && response.scope != ApprovalScope::Deny;
        record.status = if approved {
            ConfirmationStatus::Approved {
                scope: response.scope,
            }
        } else {
            ConfirmationStatus::Denied
        };

        let session_id = record.session_id.clone();
        if approved && response.scope == ApprovalScope::Session {
            let signature = record.request.signature().to_string();
            self.session_approvals
                .entry(session_id.clone())
                .or_default()
                .insert(signature);
        }
        self.unlist_pending(&session_id, request_id);

        let outcome = if approved {
            InteractionOutcome::Approved {
                scope: response.scope,
            }
        } else {
            InteractionOutcome::Denied
        };
        self.notify(request_id, outcome.clone());
        Ok(outcome)
    }

    pub fn answer_question(
        &mut self,
        request_id: &str,
        answers: QuestionAnswers,
    ) -> Result<(), BrokerError> {
        let Some(record) = self.questions.get_mut(request_id) else {
            return Err(if self.confirmations.contains_key(request_id) {
                BrokerError::WrongKind {
                    request_id: request_id.to_string(),
                    expected: "confirmation",
                }
            } else {
                BrokerError::UnknownRequest {
                    request_id: request_id.to_string(),
                }
            });
        };

        if record.status != QuestionStatus::Pending {
            return Err(BrokerError::AlreadyResolved {
                request_id: request_id.to_string(),
            });
        }

        validate_answers(&record.request, &answers)?;
        record.status = QuestionStatus::Answered {
            answers: answers.clone(),
        };
        let session_id = record.session_id.clone();
        self.unlist_pending(&session_id, request_id);
        self.notify(request_id, InteractionOutcome::Answered(answers));
        Ok(())
    }

    /// Resolves every pending request of a session as cancelled. Returns how many were
    /// resolved.
    pub fn cancel_session(&mut self, session_id: &str) -> usize {
        let Some(pending) = self.pending.remove(session_id) else {
            return 0;
        };

        for request_id in &pending {
            if let Some(record) = self.confirmations.get_mut(request_id) {
                record.status = ConfirmationStatus::Cancelled;
            } else if let Some(record) = self.questions.get_mut(request_id) {
                record.status = QuestionStatus::Cancelled;
            }
            self.notify(request_id, InteractionOutcome::Cancelled);
        }

        pending.len()
    }

    /// Cancels pending requests and drops all records and approvals of a session.
    pub fn forget_session(&mut self, session_id: &str) {
        self.cancel_session(session_id);
        self.confirmations
            .retain(|_, record| record.session_id != session_id);
        self.questions
            .retain(|_, record| record.session_id != session_id);
        self.session_approvals.remove(session_id);
    }

    /// Returns the resolution if already known, otherwise a receiver that yields it.
    pub fn waiter(&mut self, request_id: &str) -> Option<Waiter> {
        let resolved = if let Some(record) = self.confirmation(request_id) {
            record.outcome()
        } else if let Some(record) = self.question(request_id) {
            record.outcome()
        } else {
            return None;
        };

        if let Some(outcome) = resolved {
            return Some(Waiter::Resolved(outcome));
        }

        let (sender, receiver) = mpsc::channel();
        self.waiters.insert(request_id.to_string(), sender);
        Some(Waiter::Pending(receiver))
    }

    #[must_use]
    pub fn confirmation(&self, request_id: &str) -> Option<&ConfirmationRecord> {
        self.confirmations.get(request_id)
    }

    #[must_use]
    pub fn question(&self, request_id: &str) -> Option<&QuestionRecord> {
        self.questions.get(request_id)
    }

    /// Unresolved confirmations of a session, oldest first.
    pub fn pending_confirmations<'a>(
        &'a self,
        session_id: &'a str,
    ) -> impl Iterator<Item = &'a ConfirmationRecord> + 'a {
        self.pending_ids(session_id)
            .filter_map(move |request_id| self.confirmations.get(request_id))
    }

    /// Unresolved questions of a session, oldest first.
    pub fn pending_questions<'a>(
        &'a self,
        session_id: &'a str,
    ) -> impl Iterator<Item = &'a QuestionRecord> + 'a {
        self.pending_ids(session_id)
            .filter_map(move |request_id| self.questions.get(request_id))
    }

    /// Number of unresolved requests across all sessions.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_session_approved(&self, session_id: &str, signature: &str) -> bool {
        self.session_approvals
            .get(session_id)
            .is_some_and(|approved| approved.contains(signature))
    }

    fn pending_ids<'a>(&'a self, session_id: &str) -> impl Iterator<Item = &'a RequestId> + 'a {
        self.pending.get(session_id).into_iter().flatten()
    }

    fn list_pending(&mut self, session_id: &str, request_id: &str) {
        self.pending
            .entry(session_id.to_string())
            .or_default()
            .push(request_id.to_string());
    }

    fn unlist_pending(&mut self, session_id: &str, request_id: &str) {
        if let Some(pending) = self.pending.get_mut(session_id) {
            pending.retain(|pending_id| pending_id != request_id);
            if pending.is_empty() {
                self.pending.remove(session_id);
            }
        }
    }

    fn ensure_unique(&self, request_id: &str) -> Result<(), BrokerError> {
        if self.confirmations.contains_key(request_id) || self.questions.contains_key(request_id) {
            return Err(BrokerError::DuplicateRequest {
                request_id: request_id.to_string(),
            });
        }
        Ok(())
    }

    fn notify(&mut self, request_id: &str, outcome: InteractionOutcome) {
        if let Some(sender) = self.waiters.remove(request_id) {
            // The waiter may have given up after its token was cancelled.
            let _ = sender.send(outcome);
        }
    }
}

fn validate_answers(
    request: &QuestionRequest,
    answers: &QuestionAnswers,
) -> Result<(), BrokerError> {
    for (header, labels) in answers {
        let Some(question) = request
            .questions
            .iter()
            .find(|question| &question.header == header)
        else {
            return Err(BrokerError::InvalidAnswer {
                request_id: request.request_id.clone(),
                reason: format!("unknown question header '{header}'"),
            });
        };

        if !question.multi_select && labels.len() > 1 {
            return Err(BrokerError::InvalidAnswer {
                request_id: request.request_id.clone(),
                reason: format!("question '{header}' accepts a single selection"),
            });
        }
    }
    Ok(())
}
