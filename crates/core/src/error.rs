#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid donor record {donor_id}: {reason}")]
    InvalidDonor { donor_id: String, reason: String },
    #[error("invalid blood type: {0}")]
    BloodType(#[from] match_types::BloodTypeError),
    #[error("identifier cannot be empty")]
    EmptyIdentifier(#[from] match_types::TextError),
    #[error("no active run for patient {0}")]
    RunNotFound(String),
    #[error("broadcast partially failed: issued={issued}, acknowledged={acknowledged}")]
    BroadcastPartialFailure { issued: usize, acknowledged: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to deserialize input: {0}")]
    Deserialization(serde_json::Error),
    #[error("failed to serialize output: {0}")]
    Serialization(serde_json::Error),
}

pub type MatchResult<T> = std::result::Result<T, MatchError>;
