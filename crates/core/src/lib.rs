//! # Donor Match Core
//!
//! Core matching logic for the donor matching and prioritization engine.
//!
//! This crate contains the pure matching operations and the in-process run machinery:
//! - Compatibility scoring of a donor against a patient
//! - Eligibility filtering against patient-configurable constraints
//! - Deterministic ranking of eligible donors
//! - The urgency clock driven by the transfusion countdown
//! - The staged matching pipeline with run supersession
//! - Emergency escalation of constraints and the urgent donor broadcast
//!
//! **No API concerns**: HTTP servers, CLI parsing and wire DTOs belong in `api-rest`, `cli` and
//! `api-shared`.

pub mod compatibility;
pub mod config;
pub mod constants;
pub mod error;
pub mod escalation;
pub mod filter;
pub mod model;
pub mod pipeline;
pub mod ranking;
pub mod run_id;
pub mod service;
pub mod urgency;
pub mod validation;

pub use compatibility::{CompatibilityResult, CompatibilityScorer, ScoreBand, ScoreWeights};
pub use config::CoreConfig;
pub use error::{MatchError, MatchResult};
pub use escalation::{
    BroadcastNotifier, BroadcastReceipt, EscalationConfig, EscalationController, EscalationIssued,
    LoggingNotifier,
};
pub use filter::{
    AvailabilityWindow, Criterion, EligibilityFilter, ExclusionReason, MatchConstraints,
    MaxDistance,
};
pub use match_types::{BloodType, NonEmptyText};
pub use model::{Availability, Coordinate, Donor, DonorId, Patient, PatientId};
pub use pipeline::{
    LogisticsConditions, MatchOutcome, MatchingPipeline, PipelineEvent, PipelineEventKind,
    RankedMatch, RunHandle, RunLog, Stage,
};
pub use run_id::RunId;
pub use service::{EmergencyActivation, FilterReport, MatchRequest, MatchingService};
pub use urgency::{SharedClock, UrgencyClock, UrgencyLevel, UrgencySnapshot, UrgencyTransition};
