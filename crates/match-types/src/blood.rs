//! ABO/RhD blood groups and red-cell supply compatibility.

use std::{fmt, str::FromStr};

/// Errors raised when parsing a blood type label.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BloodTypeError {
    #[error("unknown blood type: '{0}' (expected one of O-, O+, A-, A+, B-, B+, AB-, AB+)")]
    Unknown(String),
}

/// One of the eight ABO/RhD blood groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BloodType {
    ONeg,
    OPos,
    ANeg,
    APos,
    BNeg,
    BPos,
    AbNeg,
    AbPos,
}

impl BloodType {
    /// Every blood group, in a fixed order.
    pub const ALL: [BloodType; 8] = [
        BloodType::ONeg,
        BloodType::OPos,
        BloodType::ANeg,
        BloodType::APos,
        BloodType::BNeg,
        BloodType::BPos,
        BloodType::AbNeg,
        BloodType::AbPos,
    ];

    /// Recipient groups this donor group can safely supply with red cells.
    pub fn can_supply(self) -> &'static [BloodType] {
        use BloodType::{ANeg, APos, AbNeg, AbPos, BNeg, BPos, ONeg, OPos};
        match self {
            ONeg => &[ONeg, OPos, ANeg, APos, BNeg, BPos, AbNeg, AbPos],
            OPos => &[OPos, APos, BPos, AbPos],
            ANeg => &[ANeg, APos, AbNeg, AbPos],
            APos => &[APos, AbPos],
            BNeg => &[BNeg, BPos, AbNeg, AbPos],
            BPos => &[BPos, AbPos],
            AbNeg => &[AbNeg, AbPos],
            AbPos => &[AbPos],
        }
    }

    /// Whether a donor of this group can supply `recipient`.
    pub fn can_donate_to(self, recipient: BloodType) -> bool {
        self.can_supply().contains(&recipient)
    }

    /// Canonical label, e.g. `AB-`.
    pub fn label(self) -> &'static str {
        match self {
            BloodType::ONeg => "O-",
            BloodType::OPos => "O+",
            BloodType::ANeg => "A-",
            BloodType::APos => "A+",
            BloodType::BNeg => "B-",
            BloodType::BPos => "B+",
            BloodType::AbNeg => "AB-",
            BloodType::AbPos => "AB+",
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BloodType {
    type Err = BloodTypeError;

    /// Parses labels such as `b-`, `AB+` or `O neg`. Surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        let normalised = normalised
            .replace("POS", "+")
            .replace("NEG", "-");

        BloodType::ALL
            .into_iter()
            .find(|bt| bt.label() == normalised)
            .ok_or_else(|| BloodTypeError::Unknown(s.to_string()))
    }
}

impl serde::Serialize for BloodType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.label())
    }
}

impl<'de> serde::Deserialize<'de> for BloodType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn o_negative_supplies_every_group() {
        for recipient in BloodType::ALL {
            assert!(BloodType::ONeg.can_donate_to(recipient));
        }
    }

    #[test]
    fn ab_positive_receives_from_every_group() {
        for donor in BloodType::ALL {
            assert!(donor.can_donate_to(BloodType::AbPos));
        }
    }

    #[test]
    fn rh_positive_never_supplies_rh_negative() {
        for donor in [BloodType::OPos, BloodType::APos, BloodType::BPos, BloodType::AbPos] {
            for recipient in [BloodType::ONeg, BloodType::ANeg, BloodType::BNeg, BloodType::AbNeg] {
                assert!(!donor.can_donate_to(recipient), "{donor} -> {recipient}");
            }
        }
    }

    #[test]
    fn a_and_b_are_mutually_incompatible() {
        assert!(!BloodType::ANeg.can_donate_to(BloodType::BNeg));
        assert!(!BloodType::BPos.can_donate_to(BloodType::APos));
    }

    #[test]
    fn parses_common_spellings() {
        assert_eq!("b-".parse::<BloodType>().unwrap(), BloodType::BNeg);
        assert_eq!(" AB+ ".parse::<BloodType>().unwrap(), BloodType::AbPos);
        assert_eq!("O neg".parse::<BloodType>().unwrap(), BloodType::ONeg);
        assert!("C+".parse::<BloodType>().is_err());
    }

    #[test]
    fn serializes_as_label() {
        let json = serde_json::to_string(&BloodType::AbNeg).unwrap();
        assert_eq!(json, "\"AB-\"");
        let back: BloodType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BloodType::AbNeg);
    }
}
