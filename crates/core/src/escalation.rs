//! Emergency escalation.
//!
//! Emergency mode relaxes a patient's match constraints by fixed deltas so more donors qualify:
//!
//! - the search radius widens to the emergency radius (never narrows; `unlimited` stays),
//! - the compatibility floor drops by `compatibility_delta`, holding at zero,
//! - the reliability floor drops by `reliability_delta`, holding at zero.
//!
//! The constraints in force when emergency mode is first activated are stored and restored
//! exactly on deactivation. Repeated activation does not compound the relaxation.
//!
//! Activation also broadcasts an urgent request to compatible donors through a
//! [`BroadcastNotifier`]. A partially failed broadcast is logged and recorded, not fatal.

use crate::constants::{
    DEFAULT_BROADCAST_ACK_LATENCY_SECS, DEFAULT_EMERGENCY_COMPATIBILITY_DELTA,
    DEFAULT_EMERGENCY_RADIUS_KM, DEFAULT_EMERGENCY_RELIABILITY_DELTA,
};
use crate::filter::{MatchConstraints, MaxDistance};
use crate::model::{Donor, PatientId};
use crate::{MatchError, MatchResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How far emergency mode relaxes constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub emergency_radius_km: f64,
    pub compatibility_delta: u8,
    pub reliability_delta: u8,
    /// Response time quoted to clinicians after a broadcast.
    pub ack_latency: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            emergency_radius_km: DEFAULT_EMERGENCY_RADIUS_KM,
            compatibility_delta: DEFAULT_EMERGENCY_COMPATIBILITY_DELTA,
            reliability_delta: DEFAULT_EMERGENCY_RELIABILITY_DELTA,
            ack_latency: Duration::from_secs(DEFAULT_BROADCAST_ACK_LATENCY_SECS),
        }
    }
}

impl EscalationConfig {
    /// # Errors
    ///
    /// Returns `MatchError::Config` if the radius is not a positive finite number or a delta
    /// exceeds 100.
    pub fn validate(&self) -> MatchResult<()> {
        if !self.emergency_radius_km.is_finite() || self.emergency_radius_km <= 0.0 {
            return Err(MatchError::Config(format!(
                "emergency radius must be positive, got {}",
                self.emergency_radius_km
            )));
        }
        if self.compatibility_delta > 100 || self.reliability_delta > 100 {
            return Err(MatchError::Config(
                "emergency deltas must be between 0 and 100".into(),
            ));
        }
        Ok(())
    }

    pub fn with_radius(mut self, emergency_radius_km: f64) -> Self {
        self.emergency_radius_km = emergency_radius_km;
        self
    }

    /// Relaxes `constraints` by the configured deltas.
    pub fn relax(&self, constraints: &MatchConstraints) -> MatchConstraints {
        let max_distance = match constraints.max_distance {
            MaxDistance::Unlimited => MaxDistance::Unlimited,
            MaxDistance::Km(km) => MaxDistance::Km(km.max(self.emergency_radius_km)),
        };
        MatchConstraints {
            max_distance,
            min_compatibility: constraints
                .min_compatibility
                .saturating_sub(self.compatibility_delta),
            min_reliability: constraints
                .min_reliability
                .saturating_sub(self.reliability_delta),
            ..constraints.clone()
        }
    }
}

/// Per-patient emergency state.
#[derive(Debug, Clone, Default)]
pub struct EscalationController {
    baseline: Option<MatchConstraints>,
}

impl EscalationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.baseline.is_some()
    }

    /// Constraints that will be restored on deactivation, if emergency mode is active.
    pub fn baseline(&self) -> Option<&MatchConstraints> {
        self.baseline.as_ref()
    }

    /// Enters emergency mode and returns the relaxed constraints.
    ///
    /// The baseline is captured only on the first activation; while active, `current` is
    /// ignored and the relaxation is recomputed from the stored baseline.
    pub fn activate(
        &mut self,
        config: &EscalationConfig,
        current: &MatchConstraints,
    ) -> MatchConstraints {
        let baseline = self.baseline.get_or_insert_with(|| current.clone());
        config.relax(baseline)
    }

    /// Leaves emergency mode and returns the stored baseline.
    ///
    /// When emergency mode is not active, `current` is returned unchanged.
    pub fn deactivate(&mut self, current: &MatchConstraints) -> MatchConstraints {
        self.baseline.take().unwrap_or_else(|| current.clone())
    }
}

/// Delivery report for one urgent broadcast.
///
/// `acknowledged` counts requests the delivery channel accepted. It says nothing about whether
/// a donor has confirmed; the broadcast stays recorded as issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    pub issued: usize,
    pub acknowledged: usize,
}

impl BroadcastReceipt {
    pub fn is_partial(&self) -> bool {
        self.acknowledged < self.issued
    }
}

/// Delivers urgent donation requests. Implementations must not fail the whole broadcast
/// because one donor could not be reached.
pub trait BroadcastNotifier: Send + Sync {
    fn broadcast(&self, patient_id: &PatientId, donors: &[&Donor]) -> BroadcastReceipt;
}

/// Notifier that writes each request to the log. Every logged request counts as accepted by the
/// channel; no donor confirmation is implied.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl BroadcastNotifier for LoggingNotifier {
    fn broadcast(&self, patient_id: &PatientId, donors: &[&Donor]) -> BroadcastReceipt {
        for donor in donors {
            tracing::info!(patient = %patient_id, donor = %donor.id, "urgent donation request sent");
        }
        BroadcastReceipt {
            issued: donors.len(),
            acknowledged: donors.len(),
        }
    }
}

/// Raised once per emergency activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationIssued {
    pub patient_id: PatientId,
    pub target_count: usize,
    /// Requests accepted by the delivery channel, not donor confirmations.
    pub acknowledged: usize,
    /// Always `false` when raised: donor replies arrive outside the engine.
    pub confirmed: bool,
    /// Estimated donor response time in seconds.
    pub estimated_response_secs: u64,
    pub constraints: MatchConstraints,
    /// Set when some donors could not be reached.
    pub delivery_warning: Option<String>,
}

/// Sends the urgent broadcast for an activation and builds the escalation record.
pub fn issue_broadcast(
    notifier: &dyn BroadcastNotifier,
    config: &EscalationConfig,
    patient_id: &PatientId,
    targets: &[&Donor],
    constraints: MatchConstraints,
) -> EscalationIssued {
    let receipt = notifier.broadcast(patient_id, targets);
    let delivery_warning = receipt.is_partial().then(|| {
        let err = MatchError::BroadcastPartialFailure {
            issued: receipt.issued,
            acknowledged: receipt.acknowledged,
        };
        tracing::warn!(patient = %patient_id, error = %err, "emergency broadcast incomplete");
        err.to_string()
    });

    tracing::info!(
        patient = %patient_id,
        targets = targets.len(),
        acknowledged = receipt.acknowledged,
        "emergency escalation issued"
    );

    EscalationIssued {
        patient_id: patient_id.clone(),
        target_count: targets.len(),
        acknowledged: receipt.acknowledged,
        confirmed: false,
        estimated_response_secs: config.ack_latency.as_secs(),
        constraints,
        delivery_warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use match_types::BloodType;
    use std::collections::BTreeSet;

    fn baseline() -> MatchConstraints {
        MatchConstraints {
            max_distance: MaxDistance::Km(10.0),
            min_compatibility: 70,
            min_reliability: 60,
            required_antigens: BTreeSet::from(["Kell-".to_string()]),
            priority_only: true,
            include_previous: false,
            ..Default::default()
        }
    }

    #[test]
    fn activate_relaxes_by_configured_deltas() {
        let mut controller = EscalationController::new();
        let relaxed = controller.activate(&EscalationConfig::default(), &baseline());

        assert_eq!(relaxed.max_distance, MaxDistance::Km(50.0));
        assert_eq!(relaxed.min_compatibility, 55);
        assert_eq!(relaxed.min_reliability, 40);
        assert!(relaxed.priority_only);
        assert_eq!(relaxed.required_antigens, baseline().required_antigens);
        assert!(controller.is_active());
    }

    #[test]
    fn floors_hold_at_zero() {
        let low = MatchConstraints {
            min_compatibility: 5,
            min_reliability: 10,
            ..Default::default()
        };
        let relaxed = EscalationConfig::default().relax(&low);
        assert_eq!(relaxed.min_compatibility, 0);
        assert_eq!(relaxed.min_reliability, 0);
    }

    #[test]
    fn radius_never_narrows() {
        let config = EscalationConfig::default();
        let unlimited = MatchConstraints::default();
        assert_eq!(config.relax(&unlimited).max_distance, MaxDistance::Unlimited);

        let wide = MatchConstraints {
            max_distance: MaxDistance::Km(120.0),
            ..Default::default()
        };
        assert_eq!(config.relax(&wide).max_distance, MaxDistance::Km(120.0));
    }

    #[test]
    fn deactivate_restores_baseline_exactly() {
        let mut controller = EscalationController::new();
        let original = baseline();
        let relaxed = controller.activate(&EscalationConfig::default(), &original);
        let restored = controller.deactivate(&relaxed);

        assert_eq!(restored, original);
        assert!(!controller.is_active());
    }

    #[test]
    fn repeated_activation_does_not_compound() {
        let mut controller = EscalationController::new();
        let config = EscalationConfig::default();
        let first = controller.activate(&config, &baseline());
        let second = controller.activate(&config, &first);

        assert_eq!(first, second);
        assert_eq!(controller.deactivate(&second), baseline());
    }

    #[test]
    fn deactivate_when_inactive_is_a_no_op() {
        let mut controller = EscalationController::new();
        assert_eq!(controller.deactivate(&baseline()), baseline());
    }

    #[test]
    fn validate_rejects_bad_radius_and_deltas() {
        assert!(EscalationConfig::default().validate().is_ok());
        assert!(EscalationConfig::default().with_radius(0.0).validate().is_err());
        let config = EscalationConfig {
            reliability_delta: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    struct FlakyNotifier;

    impl BroadcastNotifier for FlakyNotifier {
        fn broadcast(&self, _patient_id: &PatientId, donors: &[&Donor]) -> BroadcastReceipt {
            BroadcastReceipt {
                issued: donors.len(),
                acknowledged: donors.len() / 2,
            }
        }
    }

    #[test]
    fn partial_broadcast_is_recorded_not_fatal() {
        let patient_id = PatientId::new("P-1").unwrap();
        let donors: Vec<Donor> = (0..4)
            .map(|i| Donor::new(format!("D-{i}"), BloodType::ONeg).unwrap())
            .collect();
        let targets: Vec<&Donor> = donors.iter().collect();

        let issued = issue_broadcast(
            &FlakyNotifier,
            &EscalationConfig::default(),
            &patient_id,
            &targets,
            MatchConstraints::default(),
        );
        assert_eq!(issued.target_count, 4);
        assert_eq!(issued.acknowledged, 2);
        assert_eq!(issued.estimated_response_secs, 120);
        assert!(issued
            .delivery_warning
            .as_deref()
            .is_some_and(|w| w.contains("issued=4")));

        let clean = issue_broadcast(
            &LoggingNotifier,
            &EscalationConfig::default(),
            &patient_id,
            &targets,
            MatchConstraints::default(),
        );
        assert!(clean.delivery_warning.is_none());
    }

    #[test]
    fn broadcast_is_recorded_as_issued_not_confirmed() {
        let patient_id = PatientId::new("P-1").unwrap();
        let donor = Donor::new("D-1", BloodType::ONeg).unwrap();

        let issued = issue_broadcast(
            &LoggingNotifier,
            &EscalationConfig::default(),
            &patient_id,
            &[&donor],
            MatchConstraints::default(),
        );
        assert_eq!(issued.target_count, 1);
        assert_eq!(issued.acknowledged, 1);
        assert!(!issued.confirmed);
    }
}
