//! Eligibility filtering.
//!
//! Constraints are applied conjunctively: a donor is eligible only if every active criterion
//! passes. A criterion whose constraint value is unset (zero floor, `unlimited` distance,
//! `any` availability, empty antigen set) always passes. An empty result is a normal outcome.
//!
//! Criteria are exposed individually so the pipeline can apply them stage by stage; the
//! combined [`EligibilityFilter::apply`] gives the same answer as running every stage.

use crate::compatibility::CompatibilityResult;
use crate::model::{Availability, Donor, DonorId, Patient};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Scores keyed by donor, as produced by the scorer.
pub type ScoreTable = HashMap<DonorId, CompatibilityResult>;

/// Search radius.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxDistance {
    #[default]
    Unlimited,
    Km(f64),
}

impl MaxDistance {
    pub fn limit_km(&self) -> Option<f64> {
        match self {
            MaxDistance::Unlimited => None,
            MaxDistance::Km(km) => Some(*km),
        }
    }
}

/// How soon a donor must be able to donate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityWindow {
    /// No restriction.
    #[default]
    Any,
    /// Donor must be available right now.
    Now,
    /// Available or busy; excludes donors marked unavailable.
    Today,
}

/// Patient-configurable match constraints for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConstraints {
    pub max_distance: MaxDistance,
    pub availability: AvailabilityWindow,
    pub min_compatibility: u8,
    pub min_reliability: u8,
    /// Every listed antigen must be among the donor's matched antigens.
    pub required_antigens: BTreeSet<String>,
    pub priority_only: bool,
    pub include_previous: bool,
}

impl Default for MatchConstraints {
    fn default() -> Self {
        Self {
            max_distance: MaxDistance::Unlimited,
            availability: AvailabilityWindow::Any,
            min_compatibility: 0,
            min_reliability: 0,
            required_antigens: BTreeSet::new(),
            priority_only: false,
            include_previous: true,
        }
    }
}

/// A single eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    BloodType,
    Antigens,
    Distance,
    Availability,
    Reliability,
    Priority,
    PreviousDonor,
    Compatibility,
}

impl Criterion {
    pub const ALL: [Criterion; 8] = [
        Criterion::BloodType,
        Criterion::Antigens,
        Criterion::Distance,
        Criterion::Availability,
        Criterion::Reliability,
        Criterion::Priority,
        Criterion::PreviousDonor,
        Criterion::Compatibility,
    ];
}

/// Why a donor was dropped from a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    InvalidRecord { detail: String },
    DuplicateId,
    NotScored,
    BloodTypeIncompatible,
    MissingAntigens { missing: BTreeSet<String> },
    TooFar { distance_km: Option<f64>, max_km: f64 },
    NotAvailable { status: Option<Availability> },
    BelowReliability { reliability: Option<u8>, min: u8 },
    NotPriority,
    PreviousDonor,
    BelowCompatibility { score: u8, min: u8 },
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::InvalidRecord { detail } => write!(f, "invalid record: {detail}"),
            ExclusionReason::DuplicateId => write!(f, "duplicate donor id"),
            ExclusionReason::NotScored => write!(f, "no compatibility score"),
            ExclusionReason::BloodTypeIncompatible => write!(f, "blood type incompatible"),
            ExclusionReason::MissingAntigens { missing } => {
                let missing: Vec<&str> = missing.iter().map(String::as_str).collect();
                write!(f, "missing antigens: {}", missing.join(", "))
            }
            ExclusionReason::TooFar { distance_km, max_km } => match distance_km {
                Some(d) => write!(f, "{d:.1} km exceeds {max_km:.1} km"),
                None => write!(f, "distance unknown, limit {max_km:.1} km"),
            },
            ExclusionReason::NotAvailable { status } => write!(f, "not available ({status:?})"),
            ExclusionReason::BelowReliability { reliability, min } => {
                write!(f, "reliability {reliability:?} below {min}")
            }
            ExclusionReason::NotPriority => write!(f, "not a priority donor"),
            ExclusionReason::PreviousDonor => write!(f, "previously donated to this patient"),
            ExclusionReason::BelowCompatibility { score, min } => {
                write!(f, "compatibility {score} below {min}")
            }
        }
    }
}

/// Result of filtering a donor set.
#[derive(Debug)]
pub struct FilterOutcome<'a> {
    pub eligible: Vec<&'a Donor>,
    pub excluded: Vec<(DonorId, ExclusionReason)>,
}

/// Applies [`MatchConstraints`] to donors for one patient.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityFilter<'c> {
    patient: &'c Patient,
    constraints: &'c MatchConstraints,
}

impl<'c> EligibilityFilter<'c> {
    pub fn new(patient: &'c Patient, constraints: &'c MatchConstraints) -> Self {
        Self {
            patient,
            constraints,
        }
    }

    /// Runs every criterion. The eligible list preserves input order and is always a subset
    /// of `donors`.
    pub fn apply<'a>(&self, donors: &'a [Donor], scores: &ScoreTable) -> FilterOutcome<'a> {
        self.apply_criteria(donors.iter(), scores, &Criterion::ALL)
    }

    /// Runs the given criteria only.
    pub fn apply_criteria<'a, I>(
        &self,
        donors: I,
        scores: &ScoreTable,
        criteria: &[Criterion],
    ) -> FilterOutcome<'a>
    where
        I: IntoIterator<Item = &'a Donor>,
    {
        let mut eligible = Vec::new();
        let mut excluded = Vec::new();

        for donor in donors {
            let verdict = match scores.get(&donor.id) {
                Some(score) => criteria
                    .iter()
                    .try_for_each(|criterion| self.check(*criterion, donor, score)),
                None => Err(ExclusionReason::NotScored),
            };

            match verdict {
                Ok(()) => eligible.push(donor),
                Err(reason) => excluded.push((donor.id.clone(), reason)),
            }
        }

        FilterOutcome { eligible, excluded }
    }

    /// Checks one criterion for one donor.
    pub fn check(
        &self,
        criterion: Criterion,
        donor: &Donor,
        score: &CompatibilityResult,
    ) -> Result<(), ExclusionReason> {
        let c = self.constraints;
        match criterion {
            Criterion::BloodType => {
                if score.blood_type_compatible {
                    Ok(())
                } else {
                    Err(ExclusionReason::BloodTypeIncompatible)
                }
            }
            Criterion::Antigens => {
                let missing: BTreeSet<String> = c
                    .required_antigens
                    .difference(&score.antigens.matched)
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(ExclusionReason::MissingAntigens { missing })
                }
            }
            Criterion::Distance => match c.max_distance.limit_km() {
                None => Ok(()),
                Some(max_km) => {
                    let distance_km = donor.distance_to(self.patient);
                    match distance_km {
                        Some(d) if d <= max_km => Ok(()),
                        _ => Err(ExclusionReason::TooFar {
                            distance_km,
                            max_km,
                        }),
                    }
                }
            },
            Criterion::Availability => {
                let ok = match c.availability {
                    AvailabilityWindow::Any => true,
                    AvailabilityWindow::Now => donor.availability == Some(Availability::Available),
                    AvailabilityWindow::Today => matches!(
                        donor.availability,
                        Some(Availability::Available | Availability::Busy)
                    ),
                };
                if ok {
                    Ok(())
                } else {
                    Err(ExclusionReason::NotAvailable {
                        status: donor.availability,
                    })
                }
            }
            Criterion::Reliability => {
                if c.min_reliability == 0 || donor.reliability.unwrap_or(0) >= c.min_reliability {
                    Ok(())
                } else {
                    Err(ExclusionReason::BelowReliability {
                        reliability: donor.reliability,
                        min: c.min_reliability,
                    })
                }
            }
            Criterion::Priority => {
                if !c.priority_only || donor.priority {
                    Ok(())
                } else {
                    Err(ExclusionReason::NotPriority)
                }
            }
            Criterion::PreviousDonor => {
                // Unknown history fails open.
                if c.include_previous || donor.previously_donated_to_patient != Some(true) {
                    Ok(())
                } else {
                    Err(ExclusionReason::PreviousDonor)
                }
            }
            Criterion::Compatibility => {
                if score.score >= c.min_compatibility {
                    Ok(())
                } else {
                    Err(ExclusionReason::BelowCompatibility {
                        score: score.score,
                        min: c.min_compatibility,
                    })
                }
            }
        }
    }
}
