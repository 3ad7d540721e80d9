//! Coordinator configuration and its environment overrides.

use std::env;
use std::time::Duration;

use crate::batch::ReadOnlyPolicy;
use crate::context::DEFAULT_COMPRESS_THRESHOLD;
use crate::error::ConfigError;

pub const BATCH_TOOLS_ENV_VAR: &str = "AGENT_SESSION_BATCH_TOOLS";
pub const COMPRESS_THRESHOLD_ENV_VAR: &str = "AGENT_SESSION_COMPRESS_THRESHOLD";
pub const MAX_CONTEXT_TOKENS_ENV_VAR: &str = "AGENT_SESSION_MAX_CONTEXT_TOKENS";
pub const REQUEUE_DELAY_ENV_VAR: &str = "AGENT_SESSION_REQUEUE_DELAY_MS";
pub const SYSTEM_INSTRUCTIONS_ENV_VAR: &str = "AGENT_SESSION_SYSTEM_INSTRUCTIONS";

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str =
    "You are a careful coding agent. Follow user requests exactly, keep output deterministic, and fail explicitly when constraints cannot be satisfied.";

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Group consecutive read-only tool calls into batches.
    pub batch_tools: bool,
    pub read_only_policy: ReadOnlyPolicy,
    /// Usage ratio at which a session is flagged for compression.
    pub compress_threshold: f64,
    /// Overrides the provider default context window.
    pub max_context_tokens: Option<u64>,
    /// Pause before the next queued command starts.
    pub requeue_delay: Duration,
    pub system_instructions: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_tools: true,
            read_only_policy: ReadOnlyPolicy::default(),
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
            max_context_tokens: None,
            requeue_delay: Duration::ZERO,
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by the `AGENT_SESSION_*` environment variables.
    ///
    /// Unset or blank variables keep their defaults; malformed values are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = value(BATCH_TOOLS_ENV_VAR) {
            config.batch_tools = parse_flag(BATCH_TOOLS_ENV_VAR, &raw)?;
        }
        if let Some(raw) = value(COMPRESS_THRESHOLD_ENV_VAR) {
            config.compress_threshold = parse_ratio(COMPRESS_THRESHOLD_ENV_VAR, &raw)?;
        }
        if let Some(raw) = value(MAX_CONTEXT_TOKENS_ENV_VAR) {
            config.max_context_tokens = Some(parse_u64(MAX_CONTEXT_TOKENS_ENV_VAR, &raw)?);
        }
        if let Some(raw) = value(REQUEUE_DELAY_ENV_VAR) {
            config.requeue_delay =
                Duration::from_millis(parse_u64(REQUEUE_DELAY_ENV_VAR, &raw)?);
        }
        if let Some(raw) = value(SYSTEM_INSTRUCTIONS_ENV_VAR) {
            config.system_instructions = raw.trim().to_string();
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_batch_tools(mut self, enabled: bool) -> Self {
        self.batch_tools = enabled;
        self
    }

    #[must_use]
    pub fn with_read_only_policy(mut self, policy: ReadOnlyPolicy) -> Self {
        self.read_only_policy = policy;
        self
    }

    #[must_use]
    pub fn with_compress_threshold(mut self, ratio: f64) -> Self {
        self.compress_threshold = ratio;
        self
    }

    #[must_use]
    pub fn with_max_context_tokens(mut self, max: u64) -> Self {
        self.max_context_tokens = Some(max);
        self
    }

    #[must_use]
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    #[must_use]
    pub fn with_system_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = instructions.into();
        self
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected 1 or 0")),
    }
}

fn parse_ratio(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    let ratio = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| invalid(key, raw, "expected a number"))?;
    if ratio > 0.0 && ratio <= 1.0 {
        Ok(ratio)
    } else {
        Err(invalid(key, raw, "expected a ratio in (0, 1]"))
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| invalid(key, raw, "expected a non-negative integer"))
}

fn invalid(key: &'static str, raw: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    use assert_matches::assert_matches;

    use super::*;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        match LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    fn clear_all() -> Vec<EnvGuard> {
        [
            BATCH_TOOLS_ENV_VAR,
            COMPRESS_THRESHOLD_ENV_VAR,
            MAX_CONTEXT_TOKENS_ENV_VAR,
            REQUEUE_DELAY_ENV_VAR,
            SYSTEM_INSTRUCTIONS_ENV_VAR,
        ]
        .into_iter()
        .map(|key| set_env_guard(key, None))
        .collect()
    }

    #[test]
    fn env_defaults_match_default_config() {
        let _lock = env_lock();
        let _guards = clear_all();

        assert_eq!(CoordinatorConfig::from_env(), Ok(CoordinatorConfig::default()));
    }

    #[test]
    fn env_overrides_every_field() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard(BATCH_TOOLS_ENV_VAR, Some("0"));
        let _g2 = set_env_guard(COMPRESS_THRESHOLD_ENV_VAR, Some("0.8"));
        let _g3 = set_env_guard(MAX_CONTEXT_TOKENS_ENV_VAR, Some("200000"));
        let _g4 = set_env_guard(REQUEUE_DELAY_ENV_VAR, Some("25"));
        let _g5 = set_env_guard(SYSTEM_INSTRUCTIONS_ENV_VAR, Some("  be brief  "));

        let config = CoordinatorConfig::from_env().expect("valid env");
        assert!(!config.batch_tools);
        assert_eq!(config.compress_threshold, 0.8);
        assert_eq!(config.max_context_tokens, Some(200_000));
        assert_eq!(config.requeue_delay, Duration::from_millis(25));
        assert_eq!(config.system_instructions, "be brief");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard(SYSTEM_INSTRUCTIONS_ENV_VAR, Some("   \n\t"));
        let _g2 = set_env_guard(COMPRESS_THRESHOLD_ENV_VAR, Some(""));

        let config = CoordinatorConfig::from_env().expect("valid env");
        assert_eq!(config.system_instructions, DEFAULT_SYSTEM_INSTRUCTIONS);
        assert_eq!(config.compress_threshold, DEFAULT_COMPRESS_THRESHOLD);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let lookup = |pairs: &'static [(&'static str, &'static str)]| {
            move |key: &str| {
                pairs
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, value)| value.to_string())
            }
        };

        assert_matches!(
            CoordinatorConfig::from_lookup(lookup(&[(COMPRESS_THRESHOLD_ENV_VAR, "1.5")])),
            Err(ConfigError::InvalidValue { key: COMPRESS_THRESHOLD_ENV_VAR, .. })
        );
        assert_matches!(
            CoordinatorConfig::from_lookup(lookup(&[(COMPRESS_THRESHOLD_ENV_VAR, "0")])),
            Err(ConfigError::InvalidValue { .. })
        );
        assert_matches!(
            CoordinatorConfig::from_lookup(lookup(&[(BATCH_TOOLS_ENV_VAR, "maybe")])),
            Err(ConfigError::InvalidValue { key: BATCH_TOOLS_ENV_VAR, .. })
        );
        assert_matches!(
            CoordinatorConfig::from_lookup(lookup(&[(REQUEUE_DELAY_ENV_VAR, "-5")])),
            Err(ConfigError::InvalidValue { key: REQUEUE_DELAY_ENV_VAR, .. })
        );
    }

    #[test]
    fn builders_override_defaults() {
        let config = CoordinatorConfig::default()
            .with_batch_tools(false)
            .with_compress_threshold(0.5)
            .with_max_context_tokens(10)
            .with_requeue_delay(Duration::from_millis(3))
            .with_system_instructions("terse");

        assert!(!config.batch_tools);
        assert_eq!(config.compress_threshold, 0.5);
        assert_eq!(config.max_context_tokens, Some(10));
        assert_eq!(config.requeue_delay, Duration::from_millis(3));
        assert_eq!(config.system_instructions, "terse");
    }
}
