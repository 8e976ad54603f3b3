//! Request and response bodies.
//!
//! Engine types are carried as-is; in the OpenAPI document they appear as plain objects.

use chrono::{NaiveDate, Utc};
use donor_match_core::escalation::EscalationIssued;
use donor_match_core::pipeline::{MatchOutcome, PipelineEvent, RankedMatch, RunLog};
use donor_match_core::service::{FilterReport, MatchRequest};
use donor_match_core::urgency::{UrgencySnapshot, UrgencyTransition};
use donor_match_core::{
    CompatibilityResult, Donor, DonorId, ExclusionReason, LogisticsConditions, MatchConstraints,
    Patient, RunId, ScoreBand, UrgencyLevel,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Date recency is measured against; today when absent.
pub fn resolve_as_of(as_of: Option<NaiveDate>) -> NaiveDate {
    as_of.unwrap_or_else(|| Utc::now().date_naive())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScoreReq {
    #[schema(value_type = Object)]
    pub patient: Patient,
    #[schema(value_type = Object)]
    pub donor: Donor,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScoreRes {
    #[schema(value_type = Object)]
    pub result: CompatibilityResult,
    #[schema(value_type = String)]
    pub band: ScoreBand,
}

impl From<CompatibilityResult> for ScoreRes {
    fn from(result: CompatibilityResult) -> Self {
        Self {
            band: result.band(),
            result,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FilterReq {
    #[schema(value_type = Object)]
    pub patient: Patient,
    #[schema(value_type = Vec<Object>)]
    pub donors: Vec<Donor>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub constraints: MatchConstraints,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExcludedDonor {
    #[schema(value_type = String)]
    pub donor_id: DonorId,
    #[schema(value_type = Object)]
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FilterRes {
    #[schema(value_type = Vec<Object>)]
    pub eligible: Vec<Donor>,
    pub excluded: Vec<ExcludedDonor>,
}

impl From<FilterReport> for FilterRes {
    fn from(report: FilterReport) -> Self {
        Self {
            eligible: report.eligible,
            excluded: report
                .excluded
                .into_iter()
                .map(|(donor_id, reason)| ExcludedDonor { donor_id, reason })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RankReq {
    #[schema(value_type = Object)]
    pub patient: Patient,
    #[schema(value_type = Vec<Object>)]
    pub donors: Vec<Donor>,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RankRes {
    #[schema(value_type = Vec<Object>)]
    pub matches: Vec<RankedMatch>,
}

/// Starts a matching run; also the body for emergency activation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartRunReq {
    #[schema(value_type = Object)]
    pub patient: Patient,
    #[schema(value_type = Vec<Object>)]
    pub donors: Vec<Donor>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub constraints: MatchConstraints,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub logistics: LogisticsConditions,
}

impl From<StartRunReq> for MatchRequest {
    fn from(req: StartRunReq) -> Self {
        MatchRequest {
            patient: req.patient,
            donors: req.donors,
            constraints: req.constraints,
            logistics: req.logistics,
        }
    }
}

/// Every event a run emitted, plus its outcome when it completed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunRes {
    #[schema(value_type = String)]
    pub run_id: RunId,
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<PipelineEvent>,
    #[schema(value_type = Option<Object>)]
    pub outcome: Option<MatchOutcome>,
    pub superseded: bool,
    pub failure: Option<String>,
}

impl From<RunLog> for RunRes {
    fn from(log: RunLog) -> Self {
        Self {
            run_id: log.run_id,
            events: log.events,
            outcome: log.outcome,
            superseded: log.superseded,
            failure: log.failure,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelRunRes {
    #[schema(value_type = String)]
    pub run_id: RunId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UrgencyRes {
    pub countdown: u64,
    #[schema(value_type = String)]
    pub level: UrgencyLevel,
    /// Emergency mode may be offered to the caller.
    pub escalation_available: bool,
}

impl From<UrgencySnapshot> for UrgencyRes {
    fn from(snapshot: UrgencySnapshot) -> Self {
        Self {
            countdown: snapshot.countdown,
            level: snapshot.level,
            escalation_available: snapshot.level == UrgencyLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountdownReq {
    pub countdown: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountdownRes {
    pub urgency: UrgencyRes,
    #[schema(value_type = Option<Object>)]
    pub transition: Option<UrgencyTransition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivateEmergencyRes {
    #[schema(value_type = Object)]
    pub issued: EscalationIssued,
    pub run: RunRes,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeactivateEmergencyReq {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub constraints: MatchConstraints,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeactivateEmergencyRes {
    #[schema(value_type = Object)]
    pub constraints: MatchConstraints,
    pub was_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_run_req_defaults_constraints_and_logistics() {
        let req: StartRunReq = serde_json::from_str(
            r#"{
                "patient": {"id": "P-1", "blood_type": "B-"},
                "donors": [{"id": "D-1", "blood_type": "O-", "reliability": 90}]
            }"#,
        )
        .unwrap();
        let request = MatchRequest::from(req);
        assert_eq!(request.constraints, MatchConstraints::default());
        assert_eq!(request.logistics, LogisticsConditions::default());
        assert_eq!(request.donors[0].reliability, Some(90));
    }

    #[test]
    fn urgency_res_flags_escalation_only_when_critical() {
        let critical = UrgencyRes::from(UrgencySnapshot {
            countdown: 100,
            level: UrgencyLevel::Critical,
        });
        assert!(critical.escalation_available);
        let high = UrgencyRes::from(UrgencySnapshot {
            countdown: 4_000,
            level: UrgencyLevel::High,
        });
        assert!(!high.escalation_available);
    }

    #[test]
    fn resolve_as_of_prefers_explicit_date() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(resolve_as_of(Some(date)), date);
    }
}
