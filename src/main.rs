use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use donor_match_core::config::{
    countdown_from_env_value, default_countdown_secs, emergency_radius_from_env_value,
    stage_pause_from_env_value,
};
use donor_match_core::constants::DEFAULT_EMERGENCY_RADIUS_KM;
use donor_match_core::urgency::{UrgencyTransition, shared_clock, spawn_countdown_ticker};
use donor_match_core::{CoreConfig, EscalationConfig, MatchingService, ScoreWeights};

/// Main entry point for the donor matching application
///
/// Starts the REST server and the process-wide transfusion countdown:
/// - REST server on port 3000 (configurable via DONOR_MATCH_REST_ADDR)
/// - countdown ticker decrementing the urgency clock once per second
///
/// Urgency level changes are logged as they happen. Reaching critical only makes emergency
/// mode available; activating it is always an explicit API call.
///
/// # Environment Variables
/// - `DONOR_MATCH_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `MATCH_STAGE_PAUSE_MS`: Pause after each pipeline stage (default: 0)
/// - `EMERGENCY_RADIUS_KM`: Search radius in emergency mode (default: 50)
/// - `TRANSFUSION_COUNTDOWN_SECS`: Initial countdown (default: one transfusion interval)
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If configuration, startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("donor_match=info".parse()?)
                .add_directive("donor_match_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr =
        std::env::var("DONOR_MATCH_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

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
    let clock = shared_clock(countdown);

    tracing::info!("++ Starting transfusion countdown at {}s", countdown);
    let (transitions, receiver) = broadcast::channel(16);
    let ticker = spawn_countdown_ticker(clock.clone(), Duration::from_secs(1), transitions);
    let watcher = tokio::spawn(log_transitions(receiver));

    let service = Arc::new(MatchingService::new(cfg, clock));
    let rest_app = router(AppState::new(service));

    tracing::info!("++ Starting donor match REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    let rest_server = tokio::spawn(async move { axum::serve(listener, rest_app).await });

    let rest_result = rest_server.await;
    ticker.abort();
    watcher.abort();
    rest_result??;

    Ok(())
}

async fn log_transitions(mut receiver: broadcast::Receiver<UrgencyTransition>) {
    loop {
        match receiver.recv().await {
            Ok(transition) if transition.escalation_available => {
                tracing::warn!(
                    countdown = transition.countdown,
                    "urgency is critical; emergency mode is available"
                );
            }
            Ok(transition) => {
                tracing::info!(from = %transition.from, to = %transition.to, "urgency changed");
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "urgency watcher fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
