//! Compatibility scoring.
//!
//! [`CompatibilityScorer::score`] turns a (patient, donor) pair into a [`CompatibilityResult`].
//! It is pure: the same inputs and the same `as_of` date always produce the same result.
//!
//! ## Algorithm
//!
//! 1. Blood type is checked against the fixed red-cell supply table. An incompatible donor
//!    scores 0 and every other dimension is reported as 0.
//! 2. Rare antigens contribute `matched / required` of their weight band. A patient with no
//!    required antigens grants the full band.
//! 3. Availability, reliability and donation recency share the rest of the 100 points.
//! 4. The sum is rounded and clamped to 0..=100. A donor missing any required antigen is then
//!    capped at [`ANTIGEN_DEFICIT_CEILING`].
//!
//! Missing donor data is never an error here; it simply earns nothing for that dimension.

use crate::constants::{
    ANTIGEN_DEFICIT_CEILING, BUSY_AVAILABILITY_FRACTION, MIN_DONATION_REST_DAYS,
    WEIGHT_ANTIGENS, WEIGHT_AVAILABILITY, WEIGHT_RECENCY, WEIGHT_RELIABILITY,
};
use crate::model::{Availability, Donor, DonorId, Patient};
use crate::{MatchError, MatchResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Points allotted to each scored dimension. Must sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub antigens: u8,
    pub availability: u8,
    pub reliability: u8,
    pub recency: u8,
}

impl ScoreWeights {
    pub fn total(&self) -> u16 {
        u16::from(self.antigens)
            + u16::from(self.availability)
            + u16::from(self.reliability)
            + u16::from(self.recency)
    }

    pub fn validate(&self) -> MatchResult<()> {
        if self.total() != 100 {
            return Err(MatchError::Config(format!(
                "score weights must sum to 100, got {}",
                self.total()
            )));
        }
        Ok(())
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            antigens: WEIGHT_ANTIGENS,
            availability: WEIGHT_AVAILABILITY,
            reliability: WEIGHT_RELIABILITY,
            recency: WEIGHT_RECENCY,
        }
    }
}

/// Rare antigens the patient requires and which of them the donor carries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AntigenMatch {
    pub required: BTreeSet<String>,
    pub matched: BTreeSet<String>,
}

impl AntigenMatch {
    fn evaluate(patient: &Patient, donor: &Donor) -> Self {
        Self {
            required: patient.required_antigens.clone(),
            matched: patient
                .required_antigens
                .intersection(&donor.antigens)
                .cloned()
                .collect(),
        }
    }

    pub fn missing(&self) -> BTreeSet<String> {
        self.required.difference(&self.matched).cloned().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.matched.len() == self.required.len()
    }

    /// Fraction of required antigens present; 1.0 when nothing is required.
    pub fn fraction(&self) -> f64 {
        if self.required.is_empty() {
            1.0
        } else {
            self.matched.len() as f64 / self.required.len() as f64
        }
    }
}

/// Points earned per dimension, kept for auditability.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub antigens: f64,
    pub availability: f64,
    pub reliability: f64,
    pub recency: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.antigens + self.availability + self.reliability + self.recency
    }
}

/// Display band for a compatibility score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ScoreBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => ScoreBand::Excellent,
            75..=89 => ScoreBand::Good,
            50..=74 => ScoreBand::Fair,
            _ => ScoreBand::Poor,
        }
    }
}

/// Outcome of scoring one donor against one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub donor_id: DonorId,
    /// Integer percentage, 0–100.
    pub score: u8,
    pub blood_type_compatible: bool,
    pub antigens: AntigenMatch,
    pub breakdown: ScoreBreakdown,
    /// True when the antigen-deficit ceiling lowered the score.
    pub capped: bool,
}

impl CompatibilityResult {
    pub fn band(&self) -> ScoreBand {
        ScoreBand::from_score(self.score)
    }
}

/// Scores donors against a patient as of a fixed date.
#[derive(Debug, Clone, Copy)]
pub struct CompatibilityScorer {
    weights: ScoreWeights,
    as_of: NaiveDate,
}

impl CompatibilityScorer {
    pub fn new(weights: ScoreWeights, as_of: NaiveDate) -> Self {
        Self { weights, as_of }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn score(&self, patient: &Patient, donor: &Donor) -> CompatibilityResult {
        let antigens = AntigenMatch::evaluate(patient, donor);

        if !donor.blood_type.can_donate_to(patient.blood_type) {
            return CompatibilityResult {
                donor_id: donor.id.clone(),
                score: 0,
                blood_type_compatible: false,
                antigens,
                breakdown: ScoreBreakdown::default(),
                capped: false,
            };
        }

        let breakdown = ScoreBreakdown {
            antigens: f64::from(self.weights.antigens) * antigens.fraction(),
            availability: f64::from(self.weights.availability) * availability_fraction(donor),
            reliability: f64::from(self.weights.reliability) * reliability_fraction(donor),
            recency: f64::from(self.weights.recency) * self.recency_fraction(donor),
        };

        let raw = breakdown.total().round().clamp(0.0, 100.0) as u8;
        let (score, capped) = if !antigens.is_complete() && raw > ANTIGEN_DEFICIT_CEILING {
            (ANTIGEN_DEFICIT_CEILING, true)
        } else {
            (raw, false)
        };

        CompatibilityResult {
            donor_id: donor.id.clone(),
            score,
            blood_type_compatible: true,
            antigens,
            breakdown,
            capped,
        }
    }

    fn recency_fraction(&self, donor: &Donor) -> f64 {
        match donor.last_donation {
            Some(last) => {
                let rested = (self.as_of - last).num_days().max(0);
                (rested as f64 / MIN_DONATION_REST_DAYS as f64).min(1.0)
            }
            // A first-time donor has no cooldown to wait out.
            None if donor.total_donations == 0 => 1.0,
            None => 0.0,
        }
    }
}

fn availability_fraction(donor: &Donor) -> f64 {
    match donor.availability {
        Some(Availability::Available) => 1.0,
        Some(Availability::Busy) => BUSY_AVAILABILITY_FRACTION,
        Some(Availability::Unavailable) | None => 0.0,
    }
}

fn reliability_fraction(donor: &Donor) -> f64 {
    donor
        .reliability
        .map(|r| f64::from(r.min(100)) / 100.0)
        .unwrap_or(0.0)
}
