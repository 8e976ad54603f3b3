//! Constants used throughout the matching core.
//!
//! Scoring weights, urgency thresholds and escalation defaults live here so every
//! component (and every test) reads the same values.

/// Points available to the rare-antigen dimension.
pub const WEIGHT_ANTIGENS: u8 = 30;

/// Points available to the availability dimension.
pub const WEIGHT_AVAILABILITY: u8 = 20;

/// Points available to the reliability dimension.
pub const WEIGHT_RELIABILITY: u8 = 35;

/// Points available to the donation-recency dimension.
pub const WEIGHT_RECENCY: u8 = 15;

/// Share of the availability band granted to a busy donor.
pub const BUSY_AVAILABILITY_FRACTION: f64 = 0.4;

/// Minimum rest interval between whole-blood donations.
pub const MIN_DONATION_REST_DAYS: i64 = 56;

/// Highest score a donor missing a required rare antigen can reach.
pub const ANTIGEN_DEFICIT_CEILING: u8 = 80;

/// Below this many seconds the urgency level is critical.
pub const CRITICAL_BELOW_SECS: u64 = 3_600;

/// Below this many seconds the urgency level is high.
pub const HIGH_BELOW_SECS: u64 = 21_600;

/// Below this many seconds the urgency level is medium.
pub const MEDIUM_BELOW_SECS: u64 = 43_200;

/// Default search radius once emergency mode is active.
pub const DEFAULT_EMERGENCY_RADIUS_KM: f64 = 50.0;

/// Default amount the compatibility floor drops by in emergency mode.
pub const DEFAULT_EMERGENCY_COMPATIBILITY_DELTA: u8 = 15;

/// Default amount the reliability floor drops by in emergency mode.
pub const DEFAULT_EMERGENCY_RELIABILITY_DELTA: u8 = 20;

/// Nominal time for broadcast recipients to acknowledge an emergency request.
pub const DEFAULT_BROADCAST_ACK_LATENCY_SECS: u64 = 120;

/// Default interval between transfusions when deriving a countdown from the schedule.
pub const DEFAULT_TRANSFUSION_INTERVAL_HOURS: i64 = 72;

/// Mean Earth radius used for straight-line distance.
pub const EARTH_RADIUS_KM: f64 = 6_371.0;
