//! Input validation utilities.
//!
//! Patient validation gates a run: without a valid patient no compatibility judgment is
//! possible, so an invalid patient is rejected before any stage starts. Donor validation is
//! per-record; a corrupt donor is excluded from the run with the returned reason while the
//! remaining donors are still matched.

use crate::model::{Donor, Patient};
use crate::{MatchError, MatchResult};
use chrono::NaiveDate;

/// Upper bound on a plausible hemoglobin reading, in g/dL.
const MAX_HEMOGLOBIN: f64 = 25.0;

/// Validates a patient record before a run starts.
///
/// # Errors
///
/// Returns `MatchError::InvalidInput` if:
/// - a required antigen label is blank,
/// - the location is not a valid coordinate,
/// - the hemoglobin reading is not a finite value in (0, 25] g/dL.
pub fn validate_patient(patient: &Patient) -> MatchResult<()> {
    if patient.required_antigens.iter().any(|a| a.trim().is_empty()) {
        return Err(MatchError::InvalidInput(format!(
            "patient {} has a blank required antigen",
            patient.id
        )));
    }

    if let Some(location) = patient.location {
        if !location.is_valid() {
            return Err(MatchError::InvalidInput(format!(
                "patient {} has an out-of-range location",
                patient.id
            )));
        }
    }

    if let Some(hb) = patient.hemoglobin {
        if !hb.is_finite() || hb <= 0.0 || hb > MAX_HEMOGLOBIN {
            return Err(MatchError::InvalidInput(format!(
                "patient {} has an implausible hemoglobin level: {hb}",
                patient.id
            )));
        }
    }

    Ok(())
}

/// Validates a single donor record as of `today`.
///
/// # Errors
///
/// Returns `MatchError::InvalidDonor` describing the first problem found.
pub fn validate_donor(donor: &Donor, today: NaiveDate) -> MatchResult<()> {
    let invalid = |reason: String| MatchError::InvalidDonor {
        donor_id: donor.id.to_string(),
        reason,
    };

    if let Some(reliability) = donor.reliability {
        if reliability > 100 {
            return Err(invalid(format!("reliability {reliability} exceeds 100")));
        }
    }

    if let Some(rating) = donor.rating {
        if !rating.is_finite() || !(0.0..=5.0).contains(&rating) {
            return Err(invalid(format!("rating {rating} outside 0-5")));
        }
    }

    if let Some(distance) = donor.distance_km {
        if !distance.is_finite() || distance < 0.0 {
            return Err(invalid(format!("distance {distance} is not a non-negative number")));
        }
    }

    if let Some(location) = donor.location {
        if !location.is_valid() {
            return Err(invalid("location out of range".into()));
        }
    }

    if donor.antigens.iter().any(|a| a.trim().is_empty()) {
        return Err(invalid("blank antigen label".into()));
    }

    if let Some(last) = donor.last_donation {
        if last > today {
            return Err(invalid(format!("last donation {last} is in the future")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coordinate;
    use match_types::BloodType;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn accepts_minimal_patient() {
        let patient = Patient::new("P-1", BloodType::BNeg).unwrap();
        validate_patient(&patient).expect("minimal patient is valid");
    }

    #[test]
    fn rejects_patient_with_blank_antigen() {
        let patient = Patient::new("P-1", BloodType::BNeg)
            .unwrap()
            .with_required_antigens(["Kell", " "]);
        let err = validate_patient(&patient).expect_err("expected validation failure");
        assert!(matches!(err, MatchError::InvalidInput(_)));
    }

    #[test]
    fn rejects_patient_with_implausible_hemoglobin() {
        let mut patient = Patient::new("P-1", BloodType::BNeg).unwrap();
        patient.hemoglobin = Some(f64::NAN);
        assert!(validate_patient(&patient).is_err());
        patient.hemoglobin = Some(7.4);
        assert!(validate_patient(&patient).is_ok());
    }

    #[test]
    fn rejects_patient_with_bad_location() {
        let mut patient = Patient::new("P-1", BloodType::BNeg).unwrap();
        patient.location = Some(Coordinate::new(120.0, 0.0));
        assert!(validate_patient(&patient).is_err());
    }

    #[test]
    fn rejects_corrupt_donor_fields() {
        let base = Donor::new("D-1", BloodType::ONeg).unwrap();

        let mut donor = base.clone();
        donor.reliability = Some(140);
        assert!(matches!(
            validate_donor(&donor, today()),
            Err(MatchError::InvalidDonor { .. })
        ));

        let mut donor = base.clone();
        donor.distance_km = Some(-1.0);
        assert!(validate_donor(&donor, today()).is_err());

        let mut donor = base.clone();
        donor.rating = Some(6.5);
        assert!(validate_donor(&donor, today()).is_err());

        let mut donor = base;
        donor.last_donation = NaiveDate::from_ymd_opt(2026, 4, 1);
        assert!(validate_donor(&donor, today()).is_err());
    }

    #[test]
    fn accepts_donor_with_missing_optional_fields() {
        let donor = Donor::new("D-1", BloodType::ONeg).unwrap();
        validate_donor(&donor, today()).expect("missing fields are not corrupt");
    }
}
