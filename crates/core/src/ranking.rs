//! Deterministic donor ranking.
//!
//! Sort keys, in order:
//! 1. priority flag (priority donors first)
//! 2. compatibility score, descending
//! 3. reliability, descending (unknown ranks as 0)
//! 4. distance, ascending (unknown distance ranks last)
//! 5. donor id, ascending
//!
//! The id tie-break makes the order total for any set of distinct donor ids, so the same input
//! always ranks the same way regardless of insertion order.

use crate::filter::ScoreTable;
use crate::model::{Donor, DonorId, Patient};
use std::cmp::Ordering;

/// The values a donor is ranked by.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingKey {
    pub priority: bool,
    pub score: u8,
    pub reliability: u8,
    pub distance_km: Option<f64>,
    pub donor_id: DonorId,
}

impl RankingKey {
    pub fn for_donor(patient: &Patient, donor: &Donor, scores: &ScoreTable) -> Self {
        Self {
            priority: donor.priority,
            score: scores.get(&donor.id).map_or(0, |s| s.score),
            reliability: donor.reliability.unwrap_or(0),
            distance_km: donor.distance_to(patient),
            donor_id: donor.id.clone(),
        }
    }

    /// Total order: `Less` means `self` ranks ahead of `other`.
    pub fn cmp_rank(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.score.cmp(&self.score))
            .then_with(|| other.reliability.cmp(&self.reliability))
            .then_with(|| cmp_distance(self.distance_km, other.distance_km))
            .then_with(|| self.donor_id.cmp(&other.donor_id))
    }
}

fn cmp_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Orders donors best-first.
pub fn rank<'a>(patient: &Patient, donors: Vec<&'a Donor>, scores: &ScoreTable) -> Vec<&'a Donor> {
    let mut keyed: Vec<(RankingKey, &'a Donor)> = donors
        .into_iter()
        .map(|d| (RankingKey::for_donor(patient, d, scores), d))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| a.cmp_rank(b));
    keyed.into_iter().map(|(_, d)| d).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compatibility::{CompatibilityScorer, ScoreWeights};
    use crate::model::Availability;
    use chrono::NaiveDate;
    use match_types::BloodType;

    fn patient() -> Patient {
        Patient::new("P-1", BloodType::APos).unwrap()
    }

    fn donor(id: &str, reliability: u8, distance: f64) -> Donor {
        let mut d = Donor::new(id, BloodType::APos).unwrap();
        d.availability = Some(Availability::Available);
        d.reliability = Some(reliability);
        d.distance_km = Some(distance);
        d
    }

    fn table(patient: &Patient, donors: &[Donor]) -> ScoreTable {
        let scorer = CompatibilityScorer::new(
            ScoreWeights::default(),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        );
        donors
            .iter()
            .map(|d| (d.id.clone(), scorer.score(patient, d)))
            .collect()
    }

    fn ids(ranked: &[&Donor]) -> Vec<String> {
        ranked.iter().map(|d| d.id.to_string()).collect()
    }

    #[test]
    fn priority_outranks_score() {
        let patient = patient();
        let mut flagged = donor("D-flagged", 40, 5.0);
        flagged.priority = true;
        let donors = vec![donor("D-best", 100, 1.0), flagged];
        let scores = table(&patient, &donors);

        let ranked = rank(&patient, donors.iter().collect(), &scores);
        assert_eq!(ids(&ranked), vec!["D-flagged", "D-best"]);
    }

    #[test]
    fn distance_then_id_break_ties() {
        let patient = patient();
        let donors = vec![
            donor("D-c", 80, 9.0),
            donor("D-b", 80, 2.0),
            donor("D-a", 80, 2.0),
        ];
        let scores = table(&patient, &donors);

        let ranked = rank(&patient, donors.iter().collect(), &scores);
        assert_eq!(ids(&ranked), vec!["D-a", "D-b", "D-c"]);
    }

    #[test]
    fn unknown_distance_ranks_last_among_equals() {
        let patient = patient();
        let mut unknown = donor("D-a", 80, 0.0);
        unknown.distance_km = None;
        let donors = vec![unknown, donor("D-z", 80, 40.0)];
        let scores = table(&patient, &donors);

        let ranked = rank(&patient, donors.iter().collect(), &scores);
        assert_eq!(ids(&ranked), vec!["D-z", "D-a"]);
    }

    #[test]
    fn order_is_independent_of_input_order() {
        let patient = patient();
        let donors: Vec<Donor> = (0..10)
            .map(|i| donor(&format!("D-{i}"), 50 + (i % 3) as u8 * 10, f64::from(i % 4)))
            .collect();
        let scores = table(&patient, &donors);

        let forward = ids(&rank(&patient, donors.iter().collect(), &scores));
        let backward = ids(&rank(&patient, donors.iter().rev().collect(), &scores));
        assert_eq!(forward, backward);
    }

    #[test]
    fn comparator_is_strict_and_antisymmetric() {
        let patient = patient();
        let donors = vec![donor("D-1", 70, 3.0), donor("D-2", 70, 3.0)];
        let scores = table(&patient, &donors);
        let a = RankingKey::for_donor(&patient, &donors[0], &scores);
        let b = RankingKey::for_donor(&patient, &donors[1], &scores);

        assert_eq!(a.cmp_rank(&b), Ordering::Less);
        assert_eq!(b.cmp_rank(&a), Ordering::Greater);
        assert_eq!(a.cmp_rank(&a), Ordering::Equal);
        assert_eq!(a.cmp_rank(&b), a.cmp_rank(&b));
    }
}
