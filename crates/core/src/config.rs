//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! while a matching run is in flight, which can lead to inconsistent behaviour between runs of
//! the same patient context.

use crate::compatibility::ScoreWeights;
use crate::constants::DEFAULT_TRANSFUSION_INTERVAL_HOURS;
use crate::escalation::EscalationConfig;
use crate::{MatchError, MatchResult};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    weights: ScoreWeights,
    escalation: EscalationConfig,
    stage_pause: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::Config` if the weights do not sum to 100 or the escalation
    /// settings are out of range.
    pub fn new(
        weights: ScoreWeights,
        escalation: EscalationConfig,
        stage_pause: Duration,
    ) -> MatchResult<Self> {
        weights.validate()?;
        escalation.validate()?;

        Ok(Self {
            weights,
            escalation,
            stage_pause,
        })
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    pub fn escalation(&self) -> &EscalationConfig {
        &self.escalation
    }

    /// Pause inserted after each pipeline stage so observers can render progress.
    pub fn stage_pause(&self) -> Duration {
        self.stage_pause
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            escalation: EscalationConfig::default(),
            stage_pause: Duration::ZERO,
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the per-stage pause (milliseconds) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, no pause is inserted.
pub fn stage_pause_from_env_value(value: Option<String>) -> MatchResult<Duration> {
    match trimmed(value) {
        None => Ok(Duration::ZERO),
        Some(v) => v.parse::<u64>().map(Duration::from_millis).map_err(|_| {
            MatchError::Config(format!("MATCH_STAGE_PAUSE_MS must be whole milliseconds, got '{v}'"))
        }),
    }
}

/// Parse the emergency search radius (km) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, `default` is returned.
pub fn emergency_radius_from_env_value(value: Option<String>, default: f64) -> MatchResult<f64> {
    match trimmed(value) {
        None => Ok(default),
        Some(v) => match v.parse::<f64>() {
            Ok(km) if km.is_finite() && km > 0.0 => Ok(km),
            _ => Err(MatchError::Config(format!(
                "EMERGENCY_RADIUS_KM must be a positive number, got '{v}'"
            ))),
        },
    }
}

/// Parse an initial transfusion countdown (seconds) from an optional string value.
///
/// Returns `None` when the value is absent, so callers can fall back to the patient schedule.
pub fn countdown_from_env_value(value: Option<String>) -> MatchResult<Option<u64>> {
    trimmed(value)
        .map(|v| {
            v.parse::<u64>().map_err(|_| {
                MatchError::Config(format!(
                    "TRANSFUSION_COUNTDOWN_SECS must be whole seconds, got '{v}'"
                ))
            })
        })
        .transpose()
}

/// Countdown used when none is configured: one full transfusion interval.
pub fn default_countdown_secs() -> u64 {
    chrono::Duration::hours(DEFAULT_TRANSFUSION_INTERVAL_HOURS)
        .num_seconds()
        .unsigned_abs()
}
