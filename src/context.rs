//! Context window accounting and the compression trigger.

use agent_provider::TokenUsage;
use serde::Serialize;

pub const DEFAULT_COMPRESS_THRESHOLD: f64 = 0.92;

/// Where the max context value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxContextSource {
    /// Provider default; shown as an estimate.
    ProviderDefault,
    Configured,
    /// Reported by the provider during a run.
    Reported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextWindowTracker {
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
    /// Last total the provider reported; later partial reports keep it.
    reported_total: Option<u64>,
    max_context_tokens: u64,
    source: MaxContextSource,
}

impl ContextWindowTracker {
    #[must_use]
    pub fn with_provider_default(max_context_tokens: u64) -> Self {
        Self::with_source(max_context_tokens, MaxContextSource::ProviderDefault)
    }

    #[must_use]
    pub fn with_configured_max(max_context_tokens: u64) -> Self {
        Self::with_source(max_context_tokens, MaxContextSource::Configured)
    }

    fn with_source(max_context_tokens: u64, source: MaxContextSource) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            reported_total: None,
            max_context_tokens,
            source,
        }
    }

    /// Applies a partial usage report. Counters absent from `usage` keep their value.
    pub fn observe(&mut self, usage: &TokenUsage) {
        if let Some(input) = usage.input_tokens {
            self.input_tokens = input;
        }
        if let Some(output) = usage.output_tokens {
            self.output_tokens = output;
        }
        if let Some(total) = usage.total_tokens {
            self.reported_total = Some(total);
        }
        self.total_tokens = self
            .reported_total
            .unwrap_or_else(|| self.input_tokens.saturating_add(self.output_tokens));

        if let Some(max) = usage.max_context_tokens.filter(|max| *max > 0) {
            self.max_context_tokens = max;
            self.source = MaxContextSource::Reported;
        }
    }

    /// True when `total / max >= ratio`. A zero max never triggers.
    #[must_use]
    pub fn should_compress(&self, ratio: f64) -> bool {
        if self.max_context_tokens == 0 {
            return false;
        }
        self.usage_ratio() >= ratio
    }

    #[must_use]
    pub fn usage_ratio(&self) -> f64 {
        if self.max_context_tokens == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.max_context_tokens as f64
    }

    /// True while the max is the provider default rather than a confirmed value.
    #[must_use]
    pub fn is_estimated(&self) -> bool {
        self.source == MaxContextSource::ProviderDefault
    }

    /// Zeroes the counters after history was compacted; the max is kept.
    pub fn reset_counters(&mut self) {
        self.input_tokens = 0;
        self.output_tokens = 0;
        self.total_tokens = 0;
        self.reported_total = None;
    }

    #[must_use]
    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    #[must_use]
    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    #[must_use]
    pub fn max_context_tokens(&self) -> u64 {
        self.max_context_tokens
    }

    #[must_use]
    pub fn source(&self) -> MaxContextSource {
        self.source
    }
}
