//! Patient and donor records consumed by the engine.
//!
//! Both records are supplied by external collaborators and are read-only to the core. Optional
//! fields model data a collaborator may not have; the scorer treats a missing value as the
//! worst case for that dimension rather than rejecting the record.

use crate::constants::EARTH_RADIUS_KM;
use crate::MatchResult;
use chrono::{DateTime, NaiveDate, Utc};
use match_types::{BloodType, NonEmptyText};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a patient context.
pub type PatientId = NonEmptyText;

/// Identifier of a donor.
pub type DonorId = NonEmptyText;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Real-time availability reported for a donor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Busy,
    Unavailable,
}

/// The patient a transfusion match is requested for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub blood_type: BloodType,
    #[serde(default)]
    pub required_antigens: BTreeSet<String>,
    #[serde(default)]
    pub location: Option<Coordinate>,
    #[serde(default)]
    pub last_transfusion: Option<DateTime<Utc>>,
    /// Hemoglobin in g/dL.
    #[serde(default)]
    pub hemoglobin: Option<f64>,
}

impl Patient {
    pub fn new(id: impl AsRef<str>, blood_type: BloodType) -> MatchResult<Self> {
        Ok(Self {
            id: NonEmptyText::new(id)?,
            blood_type,
            required_antigens: BTreeSet::new(),
            location: None,
            last_transfusion: None,
            hemoglobin: None,
        })
    }

    pub fn with_required_antigens<I, S>(mut self, antigens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_antigens = antigens.into_iter().map(Into::into).collect();
        self
    }
}

/// A candidate donor, with logistics precomputed relative to the patient where available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donor {
    pub id: DonorId,
    pub blood_type: BloodType,
    #[serde(default)]
    pub antigens: BTreeSet<String>,
    #[serde(default)]
    pub location: Option<Coordinate>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub travel_minutes: Option<u32>,
    #[serde(default)]
    pub availability: Option<Availability>,
    /// Historical on-time/fulfilled donation rate, 0–100.
    #[serde(default)]
    pub reliability: Option<u8>,
    /// Star rating, 0–5.
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub total_donations: u32,
    /// Verified high-reliability donor.
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub last_donation: Option<NaiveDate>,
    /// Whether this donor has donated to the patient before. `None` when unknown.
    #[serde(default)]
    pub previously_donated_to_patient: Option<bool>,
}

impl Donor {
    pub fn new(id: impl AsRef<str>, blood_type: BloodType) -> MatchResult<Self> {
        Ok(Self {
            id: NonEmptyText::new(id)?,
            blood_type,
            antigens: BTreeSet::new(),
            location: None,
            distance_km: None,
            travel_minutes: None,
            availability: None,
            reliability: None,
            rating: None,
            total_donations: 0,
            priority: false,
            last_donation: None,
            previously_donated_to_patient: None,
        })
    }

    /// Distance to the patient: the precomputed value, else straight-line from coordinates.
    pub fn distance_to(&self, patient: &Patient) -> Option<f64> {
        self.distance_km.or_else(|| {
            let (donor, patient) = (self.location?, patient.location?);
            Some(donor.distance_km(&patient))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_matches_known_distance() {
        // London to Paris is roughly 344 km.
        let london = Coordinate::new(51.5074, -0.1278);
        let paris = Coordinate::new(48.8566, 2.3522);
        let d = london.distance_km(&paris);
        assert!((d - 343.5).abs() < 2.0, "got {d}");
    }

    #[test]
    fn distance_prefers_precomputed_value() {
        let mut patient = Patient::new("P-1", BloodType::ONeg).unwrap();
        patient.location = Some(Coordinate::new(0.0, 0.0));

        let mut donor = Donor::new("D-1", BloodType::ONeg).unwrap();
        donor.location = Some(Coordinate::new(0.0, 1.0));
        assert!(donor.distance_to(&patient).unwrap() > 100.0);

        donor.distance_km = Some(8.2);
        assert_eq!(donor.distance_to(&patient), Some(8.2));
    }

    #[test]
    fn distance_unknown_without_data() {
        let patient = Patient::new("P-1", BloodType::ONeg).unwrap();
        let donor = Donor::new("D-1", BloodType::ONeg).unwrap();
        assert_eq!(donor.distance_to(&patient), None);
    }

    #[test]
    fn donor_deserializes_with_defaults() {
        let donor: Donor = serde_json::from_str(
            r#"{"id":"D-9","blood_type":"B-","availability":"busy","reliability":88}"#,
        )
        .unwrap();
        assert_eq!(donor.blood_type, BloodType::BNeg);
        assert_eq!(donor.availability, Some(Availability::Busy));
        assert_eq!(donor.reliability, Some(88));
        assert!(donor.antigens.is_empty());
        assert_eq!(donor.previously_donated_to_patient, None);
    }
}
