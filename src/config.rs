//! Engine configuration.

use std::time::Duration;

use crate::profile::{SafetyMode, Severity};

/// Decision engine configuration.
///
/// The default safety mode here is the boot-time baseline; per-conversation
/// overrides (set via the dashboard) take precedence, and the effective mode
/// is snapshotted into each safety screen call — there is no process-wide
/// mutable setting read mid-decision.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Generation attempts before routing to approval with
    /// "generation unavailable".
    pub generation_attempts: u32,
    /// Per-attempt generation timeout.
    pub generation_timeout: Duration,
    /// Dispatch attempts before degrading to human review.
    pub dispatch_attempts: u32,
    /// Base delay for exponential backoff (generation and dispatch).
    pub backoff_base: Duration,
    /// Deadline for approval requests; expired requests are discarded.
    pub approval_deadline: Duration,
    /// How often the expiry sweep runs.
    pub expiry_sweep_interval: Duration,
    /// Baseline safety mode for conversations without an override.
    pub default_safety_mode: SafetyMode,
    /// Minimum redline severity that blocks.
    pub redline_threshold: Severity,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generation_attempts: 3,
            generation_timeout: Duration::from_secs(30),
            dispatch_attempts: 3,
            backoff_base: Duration::from_millis(500),
            approval_deadline: Duration::from_secs(600), // 10 minutes
            expiry_sweep_interval: Duration::from_secs(60),
            default_safety_mode: SafetyMode::Strict, // shadow mode until opted out
            redline_threshold: Severity::Medium,
        }
    }
}

impl EngineConfig {
    /// Build a config from `MIRRORME_*` environment variables, falling back
    /// to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MIRRORME_SAFETY_MODE") {
            config.default_safety_mode = SafetyMode::parse(&v);
        }
        if let Some(n) = env_u64("MIRRORME_GENERATION_ATTEMPTS") {
            config.generation_attempts = n as u32;
        }
        if let Some(n) = env_u64("MIRRORME_GENERATION_TIMEOUT_SECS") {
            config.generation_timeout = Duration::from_secs(n);
        }
        if let Some(n) = env_u64("MIRRORME_DISPATCH_ATTEMPTS") {
            config.dispatch_attempts = n as u32;
        }
        if let Some(n) = env_u64("MIRRORME_APPROVAL_DEADLINE_SECS") {
            config.approval_deadline = Duration::from_secs(n);
        }
        if let Some(n) = env_u64("MIRRORME_EXPIRY_SWEEP_SECS") {
            config.expiry_sweep_interval = Duration::from_secs(n);
        }
        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_fail_closed() {
        let config = EngineConfig::default();
        assert_eq!(config.default_safety_mode, SafetyMode::Strict);
        assert_eq!(config.generation_attempts, 3);
        assert_eq!(config.approval_deadline, Duration::from_secs(600));
    }
}
