//! # API Shared
//!
//! Shared utilities and definitions for the donor matching APIs.
//!
//! Contains:
//! - Request/response types (`dto` module) used by the REST API and the CLI
//! - Shared services like `HealthService`
//!
//! Used by `api-rest` and the workspace's main binary.

pub mod dto;
pub mod health;

pub use dto::*;
pub use health::{HealthRes, HealthService};
