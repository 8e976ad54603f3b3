//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! This binary is useful for development and debugging when you only want the REST server (with
//! OpenAPI/Swagger UI). The workspace's main `donor-match-run` binary also runs the countdown
//! ticker alongside it.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use donor_match_core::config::{
    countdown_from_env_value, default_countdown_secs, emergency_radius_from_env_value,
    stage_pause_from_env_value,
};
use donor_match_core::constants::DEFAULT_EMERGENCY_RADIUS_KM;
use donor_match_core::urgency::shared_clock;
use donor_match_core::{CoreConfig, EscalationConfig, MatchingService, ScoreWeights};

/// Main entry point for the donor matching REST API server
///
/// # Environment Variables
/// - `DONOR_MATCH_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `MATCH_STAGE_PAUSE_MS`: Pause after each pipeline stage (default: 0)
/// - `EMERGENCY_RADIUS_KM`: Search radius in emergency mode (default: 50)
/// - `TRANSFUSION_COUNTDOWN_SECS`: Initial countdown (default: the standard transfusion interval)
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - a configuration variable is malformed,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("donor_match_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("DONOR_MATCH_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("-- Starting donor match REST API on {}", addr);

    let stage_pause = stage_pause_from_env_value(std::env::var("MATCH_STAGE_PAUSE_MS").ok())?;
    let radius = emergency_radius_from_env_value(
        std::env::var("EMERGENCY_RADIUS_KM").ok(),
        DEFAULT_EMERGENCY_RADIUS_KM,
    )?;
    let countdown = countdown_from_env_value(std::env::var("TRANSFUSION_COUNTDOWN_SECS").ok())?
        .unwrap_or_else(default_countdown_secs);

    let cfg = Arc::new(CoreConfig::new(
        ScoreWeights::default(),
        EscalationConfig::default().with_radius(radius),
        stage_pause,
    )?);
    let service = MatchingService::new(cfg, shared_clock(countdown));

    let app = router(AppState::new(Arc::new(service)));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
