//! Staged matching pipeline.
//!
//! A run moves a donor pool through a fixed sequence of analysis stages and reports progress
//! to its observer as [`PipelineEvent`]s:
//!
//! 1. blood-type compatibility (every donor is validated and scored concurrently)
//! 2. rare-antigen analysis
//! 3. geographic proximity
//! 4. real-time availability
//! 5. reliability scoring (reliability floor, priority-only, repeat donors, compatibility floor)
//! 6. logistics adjustment (traffic/weather scaled ETA)
//! 7. final optimization (ranking)
//!
//! Each stage emits `StageActive` on entry and `StageCompleted` with the cumulative progress
//! fraction on exit, always in the order above.
//!
//! ## Run supersession
//!
//! At most one run is active per patient. The registry maps a patient to its active run and is
//! guarded by a single mutex; every event a run emits is sent while holding that mutex after
//! checking the run still owns the slot. Starting a new run swaps the slot under the same lock,
//! so once the new run exists the old one can no longer emit anything: its late events are
//! identified as stale by run id and dropped. The superseded observer receives a final
//! `Superseded` event instead.

use crate::compatibility::{CompatibilityResult, CompatibilityScorer};
use crate::config::CoreConfig;
use crate::filter::{Criterion, EligibilityFilter, ExclusionReason, MatchConstraints, ScoreTable};
use crate::model::{Donor, DonorId, Patient, PatientId};
use crate::ranking::rank;
use crate::run_id::RunId;
use crate::urgency::UrgencySnapshot;
use crate::validation::{validate_donor, validate_patient};
use crate::{MatchError, MatchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Analysis stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BloodType,
    RareAntigens,
    GeographicProximity,
    Availability,
    Reliability,
    Logistics,
    Optimization,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::BloodType,
        Stage::RareAntigens,
        Stage::GeographicProximity,
        Stage::Availability,
        Stage::Reliability,
        Stage::Logistics,
        Stage::Optimization,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::BloodType => "Blood type compatibility",
            Stage::RareAntigens => "Rare antigen analysis",
            Stage::GeographicProximity => "Geographic proximity",
            Stage::Availability => "Real-time availability",
            Stage::Reliability => "Reliability scoring",
            Stage::Logistics => "Logistics adjustment",
            Stage::Optimization => "Final optimization",
        }
    }

    /// Eligibility criteria enforced when this stage runs.
    pub fn criteria(&self) -> &'static [Criterion] {
        match self {
            Stage::BloodType => &[Criterion::BloodType],
            Stage::RareAntigens => &[Criterion::Antigens],
            Stage::GeographicProximity => &[Criterion::Distance],
            Stage::Availability => &[Criterion::Availability],
            Stage::Reliability => &[
                Criterion::Reliability,
                Criterion::Priority,
                Criterion::PreviousDonor,
                Criterion::Compatibility,
            ],
            Stage::Logistics | Stage::Optimization => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Candidates still in the pool when the stage finished.
    pub remaining: usize,
}

impl StageResult {
    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            remaining: 0,
        }
    }
}

/// Record of one run's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub patient_id: PatientId,
    pub stages: Vec<StageResult>,
    pub progress: f64,
    pub cancelled: bool,
}

/// Traffic and weather multipliers applied to travel time. `1.0` means no delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticsConditions {
    pub traffic_factor: f64,
    pub weather_factor: f64,
}

impl Default for LogisticsConditions {
    fn default() -> Self {
        Self {
            traffic_factor: 1.0,
            weather_factor: 1.0,
        }
    }
}

impl LogisticsConditions {
    pub(crate) fn validate(&self) -> MatchResult<()> {
        for (name, factor) in [("traffic", self.traffic_factor), ("weather", self.weather_factor)] {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(MatchError::InvalidInput(format!(
                    "{name} factor must be a positive number, got {factor}"
                )));
            }
        }
        Ok(())
    }

    pub fn adjust(&self, travel_minutes: u32) -> u32 {
        (f64::from(travel_minutes) * self.traffic_factor * self.weather_factor)
            .round()
            .clamp(0.0, f64::from(u32::MAX)) as u32
    }
}

/// A donor that survived every stage, with its rank (1-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub rank: usize,
    pub donor: Donor,
    pub compatibility: CompatibilityResult,
    pub distance_km: Option<f64>,
    /// Travel time after logistics adjustment.
    pub eta_minutes: Option<u32>,
}

/// A donor dropped during a run and the stage that dropped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub donor_id: DonorId,
    pub stage: Stage,
    pub reason: ExclusionReason,
}

/// Final result of a completed run. An empty `matches` list is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub run: PipelineRun,
    pub constraints: MatchConstraints,
    pub urgency: Option<UrgencySnapshot>,
    pub matches: Vec<RankedMatch>,
    pub excluded: Vec<Exclusion>,
}

impl MatchOutcome {
    pub fn no_eligible_donors(&self) -> bool {
        self.matches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEventKind {
    StageActive {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
        progress: f64,
    },
    StageFailed {
        stage: Stage,
        reason: String,
    },
    Completed {
        outcome: Box<MatchOutcome>,
    },
    /// The run was cancelled; `by` names the run that replaced it, if any.
    Superseded {
        by: Option<RunId>,
    },
}

impl PipelineEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEventKind::Completed { .. }
                | PipelineEventKind::Superseded { .. }
                | PipelineEventKind::StageFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub run_id: RunId,
    #[serde(flatten)]
    pub kind: PipelineEventKind,
}

/// Everything needed to start a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub patient: Patient,
    pub donors: Vec<Donor>,
    pub constraints: MatchConstraints,
    pub logistics: LogisticsConditions,
    /// Countdown snapshot taken when the run was requested. Runs never write the clock.
    pub urgency: Option<UrgencySnapshot>,
    /// Date the scorer measures donation recency against.
    pub as_of: DateTime<Utc>,
}

impl RunRequest {
    pub fn new(patient: Patient, donors: Vec<Donor>, constraints: MatchConstraints) -> Self {
        Self {
            patient,
            donors,
            constraints,
            logistics: LogisticsConditions::default(),
            urgency: None,
            as_of: Utc::now(),
        }
    }
}

/// Observer side of a started run.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    pub patient_id: PatientId,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    task: JoinHandle<()>,
}

/// Events observed for a run, up to and including its terminal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: RunId,
    pub events: Vec<PipelineEvent>,
    pub outcome: Option<MatchOutcome>,
    pub superseded: bool,
    pub failure: Option<String>,
}

impl RunHandle {
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Drains events until the run finishes, is superseded, or fails.
    pub async fn collect(mut self) -> RunLog {
        let mut log = RunLog {
            run_id: self.run_id,
            events: Vec::new(),
            outcome: None,
            superseded: false,
            failure: None,
        };

        while let Some(event) = self.events.recv().await {
            let terminal = event.kind.is_terminal();
            match &event.kind {
                PipelineEventKind::Completed { outcome } => {
                    log.outcome = Some(outcome.as_ref().clone());
                }
                PipelineEventKind::Superseded { .. } => log.superseded = true,
                PipelineEventKind::StageFailed { reason, .. } => {
                    log.failure = Some(reason.clone());
                }
                _ => {}
            }
            log.events.push(event);
            if terminal {
                break;
            }
        }

        self.task.abort();
        log
    }
}

struct ActiveRun {
    run_id: RunId,
    cancelled: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

type Registry = Arc<Mutex<HashMap<PatientId, ActiveRun>>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<PatientId, ActiveRun>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts, supersedes and cancels matching runs; one active run per patient.
#[derive(Clone)]
pub struct MatchingPipeline {
    cfg: Arc<CoreConfig>,
    registry: Registry,
}

impl MatchingPipeline {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self {
            cfg,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts a run, cancelling any run already active for the same patient.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::InvalidInput` if the patient record or logistics conditions are
    /// invalid. The run is never started in that case and any active run is left untouched.
    pub fn start_run(&self, request: RunRequest) -> MatchResult<RunHandle> {
        validate_patient(&request.patient)?;
        request.logistics.validate()?;

        let run_id = RunId::new();
        let patient_id = request.patient.id.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut registry = lock_registry(&self.registry);
            let previous = registry.insert(
                patient_id.clone(),
                ActiveRun {
                    run_id,
                    cancelled: cancelled.clone(),
                    events: tx.clone(),
                },
            );
            if let Some(previous) = previous {
                tracing::info!(
                    patient = %patient_id,
                    superseded = %previous.run_id,
                    by = %run_id,
                    "superseding active run"
                );
                supersede(previous, Some(run_id));
            }
        }

        tracing::info!(
            run = %run_id,
            patient = %patient_id,
            donors = request.donors.len(),
            "starting matching run"
        );

        let ctx = RunContext {
            run_id,
            patient_id: patient_id.clone(),
            registry: self.registry.clone(),
            cancelled,
            events: tx,
        };
        let task = tokio::spawn(execute(ctx, self.cfg.clone(), request));

        Ok(RunHandle {
            run_id,
            patient_id,
            events: rx,
            task,
        })
    }

    /// Cancels the active run for `patient_id`.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::RunNotFound` if no run is active for the patient.
    pub fn cancel_run(&self, patient_id: &str) -> MatchResult<RunId> {
        let previous = lock_registry(&self.registry).remove(patient_id);
        match previous {
            Some(previous) => {
                let run_id = previous.run_id;
                tracing::info!(run = %run_id, patient = patient_id, "run cancelled");
                supersede(previous, None);
                Ok(run_id)
            }
            None => Err(MatchError::RunNotFound(patient_id.to_string())),
        }
    }

    pub fn active_run(&self, patient_id: &str) -> Option<RunId> {
        lock_registry(&self.registry)
            .get(patient_id)
            .map(|run| run.run_id)
    }
}

fn supersede(previous: ActiveRun, by: Option<RunId>) {
    previous.cancelled.store(true, Ordering::SeqCst);
    let _ = previous.events.send(PipelineEvent {
        run_id: previous.run_id,
        kind: PipelineEventKind::Superseded { by },
    });
}

/// Emission side of a run. Every send re-checks ownership of the patient slot under the
/// registry lock.
struct RunContext {
    run_id: RunId,
    patient_id: PatientId,
    registry: Registry,
    cancelled: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl RunContext {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn owns_slot(&self, registry: &HashMap<PatientId, ActiveRun>) -> bool {
        !self.is_cancelled()
            && registry
                .get(&self.patient_id)
                .is_some_and(|active| active.run_id == self.run_id)
    }

    /// Sends `kind` if this run is still current. Returns `false` once the run is stale.
    fn emit(&self, kind: PipelineEventKind) -> bool {
        let registry = lock_registry(&self.registry);
        if !self.owns_slot(&registry) {
            tracing::debug!(run = %self.run_id, "dropping event from stale run");
            return false;
        }
        // A dropped observer does not cancel the run.
        let _ = self.events.send(PipelineEvent {
            run_id: self.run_id,
            kind,
        });
        true
    }

    /// Sends the terminal event and releases the patient slot in one step.
    fn finish(&self, kind: PipelineEventKind) {
        let mut registry = lock_registry(&self.registry);
        if !self.owns_slot(&registry) {
            tracing::debug!(run = %self.run_id, "discarding terminal event from stale run");
            return;
        }
        registry.remove(&self.patient_id);
        let _ = self.events.send(PipelineEvent {
            run_id: self.run_id,
            kind,
        });
    }
}

struct RunState {
    stages: Vec<StageResult>,
    candidates: Vec<Donor>,
    scores: ScoreTable,
    eta: HashMap<DonorId, Option<u32>>,
    excluded: Vec<Exclusion>,
    matches: Vec<RankedMatch>,
}

impl RunState {
    fn exclude(&mut self, donor_id: DonorId, stage: Stage, reason: ExclusionReason) {
        tracing::debug!(donor = %donor_id, stage = ?stage, %reason, "donor excluded");
        self.excluded.push(Exclusion {
            donor_id,
            stage,
            reason,
        });
    }
}

async fn execute(ctx: RunContext, cfg: Arc<CoreConfig>, request: RunRequest) {
    let RunRequest {
        patient,
        donors,
        constraints,
        logistics,
        urgency,
        as_of,
    } = request;
    let patient = Arc::new(patient);
    let scorer = CompatibilityScorer::new(cfg.weights(), as_of.date_naive());
    let total = Stage::ALL.len();

    let mut state = RunState {
        stages: Stage::ALL.iter().copied().map(StageResult::pending).collect(),
        candidates: Vec::new(),
        scores: ScoreTable::new(),
        eta: HashMap::new(),
        excluded: Vec::new(),
        matches: Vec::new(),
    };
    let mut pending_donors = Some(donors);

    for (index, stage) in Stage::ALL.iter().copied().enumerate() {
        if ctx.is_cancelled() {
            tracing::debug!(run = %ctx.run_id, stage = ?stage, "run cancelled at stage boundary");
            return;
        }

        state.stages[index].status = StageStatus::Active;
        state.stages[index].started_at = Some(Utc::now());
        if !ctx.emit(PipelineEventKind::StageActive { stage }) {
            return;
        }

        let result = match stage {
            Stage::BloodType => {
                let donors = pending_donors.take().unwrap_or_default();
                score_stage(&ctx, &patient, &constraints, scorer, donors, &mut state).await
            }
            Stage::Logistics => {
                for donor in &state.candidates {
                    let eta = donor.travel_minutes.map(|m| logistics.adjust(m));
                    state.eta.insert(donor.id.clone(), eta);
                }
                Ok(())
            }
            Stage::Optimization => {
                let ordered: Vec<Donor> =
                    rank(&patient, state.candidates.iter().collect(), &state.scores)
                        .into_iter()
                        .cloned()
                        .collect();
                state.matches = ordered
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, donor)| {
                        let compatibility = state.scores.get(&donor.id)?.clone();
                        Some(RankedMatch {
                            rank: i + 1,
                            distance_km: donor.distance_to(&patient),
                            eta_minutes: state.eta.get(&donor.id).copied().flatten(),
                            compatibility,
                            donor,
                        })
                    })
                    .collect();
                Ok(())
            }
            _ => {
                apply_criteria(&patient, &constraints, stage, &mut state);
                Ok(())
            }
        };

        if let Err(reason) = result {
            if ctx.is_cancelled() {
                return;
            }
            state.stages[index].status = StageStatus::Failed;
            state.stages[index].finished_at = Some(Utc::now());
            tracing::error!(run = %ctx.run_id, stage = ?stage, %reason, "stage failed");
            ctx.finish(PipelineEventKind::StageFailed { stage, reason });
            return;
        }

        state.stages[index].status = StageStatus::Completed;
        state.stages[index].finished_at = Some(Utc::now());
        state.stages[index].remaining = state.candidates.len();

        let progress = (index + 1) as f64 / total as f64;
        tracing::debug!(
            run = %ctx.run_id,
            stage = ?stage,
            remaining = state.candidates.len(),
            progress,
            "stage completed"
        );
        if !ctx.emit(PipelineEventKind::StageCompleted { stage, progress }) {
            return;
        }

        if !cfg.stage_pause().is_zero() {
            tokio::time::sleep(cfg.stage_pause()).await;
        }
    }

    tracing::info!(
        run = %ctx.run_id,
        patient = %ctx.patient_id,
        matches = state.matches.len(),
        excluded = state.excluded.len(),
        "matching run completed"
    );

    let outcome = MatchOutcome {
        run: PipelineRun {
            id: ctx.run_id,
            patient_id: ctx.patient_id.clone(),
            stages: state.stages,
            progress: 1.0,
            cancelled: false,
        },
        constraints,
        urgency,
        matches: state.matches,
        excluded: state.excluded,
    };
    ctx.finish(PipelineEventKind::Completed {
        outcome: Box::new(outcome),
    });
}

/// Validates and scores every donor concurrently, then applies the blood-type criterion.
///
/// Results are stored by input position, so completion order never affects the outcome.
async fn score_stage(
    ctx: &RunContext,
    patient: &Arc<Patient>,
    constraints: &MatchConstraints,
    scorer: CompatibilityScorer,
    donors: Vec<Donor>,
    state: &mut RunState,
) -> Result<(), String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(donors.len());
    for donor in donors {
        if seen.insert(donor.id.clone()) {
            unique.push(donor);
        } else {
            state.exclude(donor.id, Stage::BloodType, ExclusionReason::DuplicateId);
        }
    }

    let mut set = JoinSet::new();
    for (index, donor) in unique.iter().cloned().enumerate() {
        let patient = patient.clone();
        let cancelled = ctx.cancelled.clone();
        set.spawn(async move {
            if cancelled.load(Ordering::SeqCst) {
                return (index, None);
            }
            let result = validate_donor(&donor, scorer.as_of())
                .map(|()| scorer.score(&patient, &donor));
            (index, Some(result))
        });
    }

    let results = join_scores(ctx.run_id, &ctx.cancelled, set, unique.len()).await?;

    for (donor, result) in unique.into_iter().zip(results) {
        match result {
            Some(Ok(score)) => {
                state.scores.insert(donor.id.clone(), score);
                state.candidates.push(donor);
            }
            Some(Err(MatchError::InvalidDonor { reason, .. })) => {
                tracing::warn!(donor = %donor.id, %reason, "excluding corrupt donor record");
                state.exclude(
                    donor.id,
                    Stage::BloodType,
                    ExclusionReason::InvalidRecord { detail: reason },
                );
            }
            Some(Err(other)) => {
                state.exclude(
                    donor.id,
                    Stage::BloodType,
                    ExclusionReason::InvalidRecord {
                        detail: other.to_string(),
                    },
                );
            }
            None => state.exclude(donor.id, Stage::BloodType, ExclusionReason::NotScored),
        }
    }

    apply_criteria(patient, constraints, Stage::BloodType, state);
    Ok(())
}

type ScoreSlot = Option<MatchResult<CompatibilityResult>>;

/// Collects scoring tasks into input order. Fails the stage only when every task failed.
async fn join_scores(
    run_id: RunId,
    cancelled: &AtomicBool,
    mut set: JoinSet<(usize, ScoreSlot)>,
    len: usize,
) -> Result<Vec<ScoreSlot>, String> {
    let mut results: Vec<ScoreSlot> = (0..len).map(|_| None).collect();
    let mut join_failures = 0usize;
    while let Some(joined) = set.join_next().await {
        if cancelled.load(Ordering::SeqCst) {
            set.abort_all();
            return Err("run cancelled".into());
        }
        match joined {
            Ok((index, result)) => results[index] = result,
            Err(e) => {
                join_failures += 1;
                tracing::error!(run = %run_id, error = %e, "donor scoring task failed");
            }
        }
    }

    if len > 0 && join_failures == len {
        return Err("every donor scoring task failed".into());
    }
    Ok(results)
}

fn apply_criteria(
    patient: &Patient,
    constraints: &MatchConstraints,
    stage: Stage,
    state: &mut RunState,
) {
    let filter = EligibilityFilter::new(patient, constraints);
    let outcome = filter.apply_criteria(state.candidates.iter(), &state.scores, stage.criteria());
    let kept: HashSet<&DonorId> = outcome.eligible.iter().map(|d| &d.id).collect();
    let next: Vec<Donor> = state
        .candidates
        .iter()
        .filter(|d| kept.contains(&d.id))
        .cloned()
        .collect();
    let excluded = outcome.excluded;
    state.candidates = next;
    for (donor_id, reason) in excluded {
        state.exclude(donor_id, stage, reason);
    }
}
