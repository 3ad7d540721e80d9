//! Per-session cancellation token lifecycle.

use agent_provider::CancelToken;

/// Owns the current cancellation token of one session.
///
/// Cleanup paths pass the token they were handed to [`CancelRegistry::clear`], so a
/// slow task from generation N-1 can never clear the token of generation N.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    current: Option<CancelToken>,
}

impl CancelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored token when it is still live, otherwise stores a fresh one.
    pub fn create(&mut self) -> CancelToken {
        if let Some(token) = self.current.as_ref() {
            if !token.is_cancelled() {
                return token.clone();
            }
        }

        let token = CancelToken::new();
        self.current = Some(token.clone());
        token
    }

    #[must_use]
    pub fn current(&self) -> Option<&CancelToken> {
        self.current.as_ref()
    }

    /// Clears the stored token.
    ///
    /// With `Some(expected)` the token is only cleared when it is the same allocation.
    /// Returns whether a token was removed.
    pub fn clear(&mut self, expected: Option<&CancelToken>) -> bool {
        match (expected, self.current.as_ref()) {
            (_, None) => false,
            (None, Some(_)) => {
                self.current = None;
                true
            }
            (Some(expected), Some(current)) if expected.ptr_eq(current) => {
                self.current = None;
                true
            }
            (Some(_), Some(_)) => false,
        }
    }

    /// Cancels the stored token, keeping the reference. Returns false without a token
    /// or when it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.current.as_ref().is_some_and(CancelToken::cancel)
    }
}
