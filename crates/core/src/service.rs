//! Engine entry point.
//!
//! [`MatchingService`] bundles the scorer, filter, ranking, pipeline, urgency clock and
//! per-patient escalation state behind the operations the API layers call. It is cheap to share
//! behind an `Arc`; all mutable state is internally synchronised.

use crate::compatibility::{CompatibilityResult, CompatibilityScorer};
use crate::config::CoreConfig;
use crate::escalation::{
    issue_broadcast, BroadcastNotifier, EscalationController, EscalationIssued, LoggingNotifier,
};
use crate::filter::{Criterion, EligibilityFilter, ExclusionReason, MatchConstraints, ScoreTable};
use crate::model::{Donor, DonorId, Patient, PatientId};
use crate::pipeline::{LogisticsConditions, MatchingPipeline, RankedMatch, RunHandle, RunRequest};
use crate::ranking::rank;
use crate::run_id::RunId;
use crate::urgency::{lock_clock, SharedClock, UrgencySnapshot, UrgencyTransition};
use crate::validation::{validate_donor, validate_patient};
use crate::MatchResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Owned result of filtering a donor pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    pub eligible: Vec<Donor>,
    pub excluded: Vec<(DonorId, ExclusionReason)>,
}

/// Inputs for a matching run.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub patient: Patient,
    pub donors: Vec<Donor>,
    pub constraints: MatchConstraints,
    pub logistics: LogisticsConditions,
}

impl MatchRequest {
    pub fn new(patient: Patient, donors: Vec<Donor>, constraints: MatchConstraints) -> Self {
        Self {
            patient,
            donors,
            constraints,
            logistics: LogisticsConditions::default(),
        }
    }
}

/// Result of entering emergency mode: the broadcast record and the re-run it started.
#[derive(Debug)]
pub struct EmergencyActivation {
    pub issued: EscalationIssued,
    pub run: RunHandle,
}

pub struct MatchingService {
    cfg: Arc<CoreConfig>,
    pipeline: MatchingPipeline,
    clock: SharedClock,
    escalations: Mutex<HashMap<PatientId, EscalationController>>,
    notifier: Arc<dyn BroadcastNotifier>,
}

impl MatchingService {
    pub fn new(cfg: Arc<CoreConfig>, clock: SharedClock) -> Self {
        Self {
            pipeline: MatchingPipeline::new(cfg.clone()),
            cfg,
            clock,
            escalations: Mutex::new(HashMap::new()),
            notifier: Arc::new(LoggingNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn BroadcastNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    fn scorer(&self, as_of: NaiveDate) -> CompatibilityScorer {
        CompatibilityScorer::new(self.cfg.weights(), as_of)
    }

    fn escalations(&self) -> MutexGuard<'_, HashMap<PatientId, EscalationController>> {
        self.escalations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Scores one donor for one patient.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::InvalidInput` for an invalid patient and
    /// `MatchError::InvalidDonor` for a corrupt donor record.
    pub fn score(
        &self,
        patient: &Patient,
        donor: &Donor,
        as_of: NaiveDate,
    ) -> MatchResult<CompatibilityResult> {
        validate_patient(patient)?;
        validate_donor(donor, as_of)?;
        Ok(self.scorer(as_of).score(patient, donor))
    }

    /// Scores the valid donors and reports the invalid ones as exclusions. A repeated id keeps
    /// the first valid record's score.
    fn score_pool(
        &self,
        patient: &Patient,
        donors: &[Donor],
        as_of: NaiveDate,
    ) -> (ScoreTable, Vec<(DonorId, ExclusionReason)>) {
        let scorer = self.scorer(as_of);
        let mut scores = ScoreTable::new();
        let mut invalid = Vec::new();
        for donor in donors {
            match validate_donor(donor, as_of) {
                Ok(()) => {
                    scores
                        .entry(donor.id.clone())
                        .or_insert_with(|| scorer.score(patient, donor));
                }
                Err(e) => invalid.push((
                    donor.id.clone(),
                    ExclusionReason::InvalidRecord {
                        detail: e.to_string(),
                    },
                )),
            }
        }
        (scores, invalid)
    }

    /// Applies every eligibility criterion in one pass.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::InvalidInput` for an invalid patient. Corrupt donors are excluded.
    pub fn filter(
        &self,
        patient: &Patient,
        donors: &[Donor],
        constraints: &MatchConstraints,
        as_of: NaiveDate,
    ) -> MatchResult<FilterReport> {
        validate_patient(patient)?;
        let (scores, invalid) = self.score_pool(patient, donors, as_of);
        let valid = donors.iter().filter(|d| scores.contains_key(&d.id));

        let outcome = EligibilityFilter::new(patient, constraints).apply_criteria(
            valid,
            &scores,
            &Criterion::ALL,
        );
        let eligible = outcome.eligible.into_iter().cloned().collect();
        let mut excluded = outcome.excluded;
        excluded.extend(invalid);
        Ok(FilterReport { eligible, excluded })
    }

    /// Ranks donors best-first without filtering. Corrupt donors are left out.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::InvalidInput` for an invalid patient.
    pub fn rank(
        &self,
        patient: &Patient,
        donors: &[Donor],
        as_of: NaiveDate,
    ) -> MatchResult<Vec<RankedMatch>> {
        validate_patient(patient)?;
        let (mut scores, _) = self.score_pool(patient, donors, as_of);
        let scored: Vec<&Donor> = donors.iter().filter(|d| scores.contains_key(&d.id)).collect();

        let ordered: Vec<Donor> = rank(patient, scored, &scores).into_iter().cloned().collect();
        Ok(ordered
            .into_iter()
            .enumerate()
            .filter_map(|(i, donor)| {
                let compatibility = scores.remove(&donor.id)?;
                Some(RankedMatch {
                    rank: i + 1,
                    distance_km: donor.distance_to(patient),
                    eta_minutes: donor.travel_minutes,
                    compatibility,
                    donor,
                })
            })
            .collect())
    }

    /// Starts a pipeline run, superseding any active run for the same patient.
    ///
    /// While emergency mode is active for the patient, the run uses the relaxation of the stored
    /// baseline and the requested constraints are ignored, so passing the escalated constraints
    /// back in does not relax them twice.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::InvalidInput` if the patient or logistics conditions are invalid.
    pub fn start_run(&self, request: MatchRequest) -> MatchResult<RunHandle> {
        let escalated = self
            .escalations()
            .get(request.patient.id.as_str())
            .and_then(EscalationController::baseline)
            .map(|baseline| self.cfg.escalation().relax(baseline));
        match escalated {
            Some(constraints) => self.launch(MatchRequest {
                constraints,
                ..request
            }),
            None => self.launch(request),
        }
    }

    fn launch(&self, request: MatchRequest) -> MatchResult<RunHandle> {
        self.pipeline.start_run(RunRequest {
            patient: request.patient,
            donors: request.donors,
            constraints: request.constraints,
            logistics: request.logistics,
            urgency: Some(self.urgency()),
            as_of: Utc::now(),
        })
    }

    /// # Errors
    ///
    /// Returns `MatchError::RunNotFound` if no run is active for the patient.
    pub fn cancel_run(&self, patient_id: &str) -> MatchResult<RunId> {
        self.pipeline.cancel_run(patient_id)
    }

    pub fn active_run(&self, patient_id: &str) -> Option<RunId> {
        self.pipeline.active_run(patient_id)
    }

    pub fn urgency(&self) -> UrgencySnapshot {
        lock_clock(&self.clock).snapshot()
    }

    /// Feeds a countdown reading from an external timer.
    pub fn tick(&self, countdown: u64) -> Option<UrgencyTransition> {
        lock_clock(&self.clock).tick(countdown)
    }

    pub fn reset(&self, countdown: u64) -> Option<UrgencyTransition> {
        lock_clock(&self.clock).reset(countdown)
    }

    /// Resets the countdown from the patient's transfusion schedule.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::InvalidInput` if the interval puts the due time out of range.
    pub fn reset_from_schedule(
        &self,
        last_transfusion: DateTime<Utc>,
        interval: chrono::Duration,
    ) -> MatchResult<Option<UrgencyTransition>> {
        let countdown =
            crate::urgency::countdown_from_schedule(last_transfusion, interval, Utc::now())?;
        Ok(self.reset(countdown))
    }

    pub fn emergency_active(&self, patient_id: &str) -> bool {
        self.escalations()
            .get(patient_id)
            .is_some_and(EscalationController::is_active)
    }

    /// Enters emergency mode for the patient, broadcasts to every donor eligible under the
    /// relaxed constraints and starts a new run with them.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::InvalidInput` for an invalid patient or invalid logistics conditions;
    /// emergency mode is not entered and nothing is broadcast.
    pub fn activate_emergency(&self, request: MatchRequest) -> MatchResult<EmergencyActivation> {
        validate_patient(&request.patient)?;
        request.logistics.validate()?;

        let relaxed = self
            .escalations()
            .entry(request.patient.id.clone())
            .or_default()
            .activate(self.cfg.escalation(), &request.constraints);

        tracing::warn!(patient = %request.patient.id, "emergency mode activated");

        let today = Utc::now().date_naive();
        let (scores, _) = self.score_pool(&request.patient, &request.donors, today);
        let mut seen = HashSet::new();
        let unique = request.donors.iter().filter(|d| seen.insert(&d.id));
        let outcome = EligibilityFilter::new(&request.patient, &relaxed).apply_criteria(
            unique,
            &scores,
            &Criterion::ALL,
        );
        let issued = issue_broadcast(
            self.notifier.as_ref(),
            self.cfg.escalation(),
            &request.patient.id,
            &outcome.eligible,
            relaxed.clone(),
        );

        let run = self.launch(MatchRequest {
            constraints: relaxed,
            ..request
        })?;
        Ok(EmergencyActivation { issued, run })
    }

    /// Leaves emergency mode and returns the constraints in force before activation.
    ///
    /// When emergency mode is not active, `current` is returned unchanged.
    pub fn deactivate_emergency(
        &self,
        patient_id: &str,
        current: &MatchConstraints,
    ) -> MatchConstraints {
        let mut escalations = self.escalations();
        let restored = match escalations.get_mut(patient_id) {
            Some(controller) => controller.deactivate(current),
            None => current.clone(),
        };
        escalations.remove(patient_id);
        tracing::info!(patient = patient_id, "emergency mode deactivated");
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::BroadcastReceipt;
    use crate::filter::MaxDistance;
    use crate::model::Availability;
    use crate::pipeline::PipelineEventKind;
    use crate::urgency::{shared_clock, UrgencyLevel};
    use crate::MatchError;
    use match_types::BloodType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service() -> MatchingService {
        MatchingService::new(Arc::new(CoreConfig::default()), shared_clock(30_000))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn patient() -> Patient {
        Patient::new("P-7", BloodType::BNeg)
            .unwrap()
            .with_required_antigens(["Kell-", "Duffy-"])
    }

    fn donor(id: &str, distance: f64, reliability: u8) -> Donor {
        let mut d = Donor::new(id, BloodType::BNeg).unwrap();
        d.antigens = ["Kell-", "Duffy-"].map(String::from).into();
        d.availability = Some(Availability::Available);
        d.reliability = Some(reliability);
        d.distance_km = Some(distance);
        d
    }

    fn constraints() -> MatchConstraints {
        MatchConstraints {
            max_distance: MaxDistance::Km(5.0),
            min_reliability: 80,
            ..Default::default()
        }
    }

    #[test]
    fn score_matches_the_reference_scenario() {
        let result = service()
            .score(&patient(), &donor("D-1", 2.0, 95), today())
            .unwrap();
        assert!(result.blood_type_compatible);
        assert!(result.score >= 90, "score was {}", result.score);
    }

    #[test]
    fn score_rejects_corrupt_donor() {
        let mut bad = donor("D-1", 2.0, 95);
        bad.rating = Some(9.0);
        assert!(service().score(&patient(), &bad, today()).is_err());
    }

    #[test]
    fn filter_reports_corrupt_donors_as_excluded() {
        let mut bad = donor("D-bad", 1.0, 90);
        bad.distance_km = Some(-1.0);
        let donors = vec![donor("D-1", 2.0, 95), donor("D-far", 8.2, 99), bad];

        let report = service()
            .filter(&patient(), &donors, &constraints(), today())
            .unwrap();
        let ids: Vec<&str> = report.eligible.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["D-1"]);
        assert_eq!(report.excluded.len(), 2);
    }

    #[test]
    fn rank_orders_best_first() {
        let donors = vec![donor("D-low", 1.0, 50), donor("D-high", 3.0, 99)];
        let ranked = service().rank(&patient(), &donors, today()).unwrap();
        assert_eq!(ranked[0].donor.id.as_str(), "D-high");
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn tick_and_reset_drive_the_shared_clock() {
        let service = service();
        assert_eq!(service.urgency().level, UrgencyLevel::Medium);
        let transition = service.tick(3_000).unwrap();
        assert_eq!(transition.to, UrgencyLevel::Critical);
        assert!(service.tick(9_000).is_none());
        assert_eq!(service.reset(90_000).unwrap().to, UrgencyLevel::Low);
    }

    struct CountingNotifier(AtomicUsize);

    impl BroadcastNotifier for CountingNotifier {
        fn broadcast(&self, _patient_id: &PatientId, donors: &[&Donor]) -> BroadcastReceipt {
            self.0.fetch_add(donors.len(), Ordering::SeqCst);
            BroadcastReceipt {
                issued: donors.len(),
                acknowledged: donors.len(),
            }
        }
    }

    #[tokio::test]
    async fn emergency_widens_search_and_restores_baseline() {
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let service = service().with_notifier(notifier.clone());
        let donors = vec![
            donor("D-near", 2.0, 95),
            donor("D-far", 30.0, 95),
            donor("D-shaky", 3.0, 65),
        ];

        let baseline = service
            .start_run(MatchRequest::new(patient(), donors.clone(), constraints()))
            .unwrap()
            .collect()
            .await
            .outcome
            .unwrap();
        assert_eq!(baseline.matches.len(), 1);

        let activation = service
            .activate_emergency(MatchRequest::new(patient(), donors, constraints()))
            .unwrap();
        assert_eq!(activation.issued.target_count, 3);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 3);
        assert!(service.emergency_active("P-7"));

        let log = activation.run.collect().await;
        let outcome = log.outcome.unwrap();
        assert_eq!(outcome.matches.len(), 3);
        assert_eq!(outcome.constraints.max_distance, MaxDistance::Km(50.0));
        assert!(log
            .events
            .iter()
            .all(|e| !matches!(e.kind, PipelineEventKind::Superseded { .. })));

        let restored = service.deactivate_emergency("P-7", &outcome.constraints);
        assert_eq!(restored, constraints());
        assert!(!service.emergency_active("P-7"));
    }

    #[tokio::test]
    async fn run_during_emergency_relaxes_from_the_baseline_once() {
        let service = service();
        let strict = MatchConstraints {
            max_distance: MaxDistance::Km(10.0),
            min_compatibility: 70,
            min_reliability: 60,
            ..Default::default()
        };
        let donors = vec![donor("D-1", 2.0, 95)];

        let activation = service
            .activate_emergency(MatchRequest::new(patient(), donors.clone(), strict.clone()))
            .unwrap();
        let escalated = activation.issued.constraints.clone();
        assert_eq!(escalated.min_compatibility, 55);
        assert_eq!(escalated.min_reliability, 40);
        activation.run.collect().await;

        for requested in [escalated.clone(), strict] {
            let outcome = service
                .start_run(MatchRequest::new(patient(), donors.clone(), requested))
                .unwrap()
                .collect()
                .await
                .outcome
                .unwrap();
            assert_eq!(outcome.constraints, escalated);
        }
    }

    #[tokio::test]
    async fn invalid_logistics_leave_emergency_mode_off() {
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let service = service().with_notifier(notifier.clone());
        let mut request = MatchRequest::new(patient(), vec![donor("D-1", 2.0, 95)], constraints());
        request.logistics.traffic_factor = 0.0;

        let err = service.activate_emergency(request).unwrap_err();
        assert!(matches!(err, MatchError::InvalidInput(_)));
        assert!(!service.emergency_active("P-7"));
        assert_eq!(notifier.0.load(Ordering::SeqCst), 0);
        assert_eq!(service.active_run("P-7"), None);
    }

    #[tokio::test]
    async fn broadcast_reaches_each_donor_id_once() {
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let service = service().with_notifier(notifier.clone());
        let donors = vec![
            donor("D-1", 2.0, 95),
            donor("D-1", 2.0, 95),
            donor("D-2", 30.0, 95),
        ];

        let activation = service
            .activate_emergency(MatchRequest::new(patient(), donors, constraints()))
            .unwrap();
        assert_eq!(activation.issued.target_count, 2);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 2);
        activation.run.collect().await;
    }

    #[tokio::test]
    async fn runs_carry_an_urgency_snapshot() {
        let service = service();
        service.tick(3_500);
        let outcome = service
            .start_run(MatchRequest::new(
                patient(),
                vec![donor("D-1", 1.0, 90)],
                MatchConstraints::default(),
            ))
            .unwrap()
            .collect()
            .await
            .outcome
            .unwrap();
        assert_eq!(outcome.urgency.map(|u| u.level), Some(UrgencyLevel::Critical));
        assert_eq!(service.urgency().countdown, 3_500);
    }
}
