//! # API REST
//!
//! REST API for the donor matching engine.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! Uses `api-shared` for request/response types.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use api_shared::{
    resolve_as_of, ActivateEmergencyRes, CancelRunRes, CountdownReq, CountdownRes,
    DeactivateEmergencyReq, DeactivateEmergencyRes, ExcludedDonor, FilterReq, FilterRes,
    HealthRes, HealthService, RankReq, RankRes, RunRes, ScoreReq, ScoreRes, StartRunReq,
    UrgencyRes,
};
use donor_match_core::{MatchError, MatchingService};

/// Application state for the REST API server
///
/// Holds the matching service shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MatchingService>,
}

impl AppState {
    pub fn new(service: Arc<MatchingService>) -> Self {
        Self { service }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        score,
        filter,
        rank,
        start_run,
        cancel_run,
        urgency,
        tick,
        reset,
        activate_emergency,
        deactivate_emergency,
    ),
    components(schemas(
        HealthRes,
        ScoreReq,
        ScoreRes,
        FilterReq,
        FilterRes,
        ExcludedDonor,
        RankReq,
        RankRes,
        StartRunReq,
        RunRes,
        CancelRunRes,
        UrgencyRes,
        CountdownReq,
        CountdownRes,
        ActivateEmergencyRes,
        DeactivateEmergencyReq,
        DeactivateEmergencyRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/score", post(score))
        .route("/filter", post(filter))
        .route("/rank", post(rank))
        .route("/runs", post(start_run))
        .route("/runs/:patient_id", delete(cancel_run))
        .route("/urgency", get(urgency))
        .route("/urgency/tick", post(tick))
        .route("/urgency/reset", post(reset))
        .route("/emergency/:patient_id/activate", post(activate_emergency))
        .route("/emergency/:patient_id/deactivate", post(deactivate_emergency))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps engine errors onto HTTP status codes.
fn error_response(context: &str, e: MatchError) -> (StatusCode, &'static str) {
    match e {
        MatchError::InvalidInput(_)
        | MatchError::InvalidDonor { .. }
        | MatchError::BloodType(_)
        | MatchError::EmptyIdentifier(_)
        | MatchError::Deserialization(_) => {
            tracing::warn!("{context}: {e}");
            (StatusCode::BAD_REQUEST, "Invalid input")
        }
        MatchError::RunNotFound(_) => {
            tracing::warn!("{context}: {e}");
            (StatusCode::NOT_FOUND, "No active run")
        }
        e => {
            tracing::error!("{context}: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// This endpoint is used for monitoring and load balancer health checks.
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/score",
    request_body = ScoreReq,
    responses(
        (status = 200, description = "Compatibility of one donor", body = ScoreRes),
        (status = 400, description = "Invalid patient or donor record")
    )
)]
/// Score one donor against one patient
#[axum::debug_handler]
async fn score(
    State(state): State<AppState>,
    Json(req): Json<ScoreReq>,
) -> Result<Json<ScoreRes>, (StatusCode, &'static str)> {
    state
        .service
        .score(&req.patient, &req.donor, resolve_as_of(req.as_of))
        .map(|result| Json(ScoreRes::from(result)))
        .map_err(|e| error_response("Score error", e))
}

#[utoipa::path(
    post,
    path = "/filter",
    request_body = FilterReq,
    responses(
        (status = 200, description = "Eligible and excluded donors", body = FilterRes),
        (status = 400, description = "Invalid patient record")
    )
)]
/// Apply match constraints to a donor pool
///
/// Corrupt donor records are reported as exclusions rather than failing the request.
#[axum::debug_handler]
async fn filter(
    State(state): State<AppState>,
    Json(req): Json<FilterReq>,
) -> Result<Json<FilterRes>, (StatusCode, &'static str)> {
    state
        .service
        .filter(
            &req.patient,
            &req.donors,
            &req.constraints,
            resolve_as_of(req.as_of),
        )
        .map(|report| Json(FilterRes::from(report)))
        .map_err(|e| error_response("Filter error", e))
}

#[utoipa::path(
    post,
    path = "/rank",
    request_body = RankReq,
    responses(
        (status = 200, description = "Donors ranked best-first", body = RankRes),
        (status = 400, description = "Invalid patient record")
    )
)]
#[axum::debug_handler]
async fn rank(
    State(state): State<AppState>,
    Json(req): Json<RankReq>,
) -> Result<Json<RankRes>, (StatusCode, &'static str)> {
    state
        .service
        .rank(&req.patient, &req.donors, resolve_as_of(req.as_of))
        .map(|matches| Json(RankRes { matches }))
        .map_err(|e| error_response("Rank error", e))
}

#[utoipa::path(
    post,
    path = "/runs",
    request_body = StartRunReq,
    responses(
        (status = 200, description = "Events and outcome of the run", body = RunRes),
        (status = 400, description = "Invalid patient record")
    )
)]
/// Run the matching pipeline and wait for it to finish
///
/// A run started for the same patient while this one is active supersedes it; the response then
/// has `superseded` set and no outcome.
#[axum::debug_handler]
async fn start_run(
    State(state): State<AppState>,
    Json(req): Json<StartRunReq>,
) -> Result<Json<RunRes>, (StatusCode, &'static str)> {
    let handle = state
        .service
        .start_run(req.into())
        .map_err(|e| error_response("Start run error", e))?;
    Ok(Json(RunRes::from(handle.collect().await)))
}

#[utoipa::path(
    delete,
    path = "/runs/{patient_id}",
    params(("patient_id" = String, Path, description = "Patient whose active run is cancelled")),
    responses(
        (status = 200, description = "Run cancelled", body = CancelRunRes),
        (status = 404, description = "No active run for the patient")
    )
)]
#[axum::debug_handler]
async fn cancel_run(
    State(state): State<AppState>,
    AxumPath(patient_id): AxumPath<String>,
) -> Result<Json<CancelRunRes>, (StatusCode, &'static str)> {
    state
        .service
        .cancel_run(&patient_id)
        .map(|run_id| Json(CancelRunRes { run_id }))
        .map_err(|e| error_response("Cancel run error", e))
}

#[utoipa::path(
    get,
    path = "/urgency",
    responses(
        (status = 200, description = "Current countdown and urgency level", body = UrgencyRes)
    )
)]
async fn urgency(State(state): State<AppState>) -> Json<UrgencyRes> {
    Json(UrgencyRes::from(state.service.urgency()))
}

#[utoipa::path(
    post,
    path = "/urgency/tick",
    request_body = CountdownReq,
    responses(
        (status = 200, description = "Clock state and any level change", body = CountdownRes)
    )
)]
/// Feed a countdown reading from an external timer
///
/// Readings above the current countdown are ignored; use `/urgency/reset` to raise it.
async fn tick(State(state): State<AppState>, Json(req): Json<CountdownReq>) -> Json<CountdownRes> {
    let transition = state.service.tick(req.countdown);
    Json(CountdownRes {
        urgency: state.service.urgency().into(),
        transition,
    })
}

#[utoipa::path(
    post,
    path = "/urgency/reset",
    request_body = CountdownReq,
    responses(
        (status = 200, description = "Clock state after the reset", body = CountdownRes)
    )
)]
async fn reset(
    State(state): State<AppState>,
    Json(req): Json<CountdownReq>,
) -> Json<CountdownRes> {
    let transition = state.service.reset(req.countdown);
    Json(CountdownRes {
        urgency: state.service.urgency().into(),
        transition,
    })
}

#[utoipa::path(
    post,
    path = "/emergency/{patient_id}/activate",
    request_body = StartRunReq,
    params(("patient_id" = String, Path, description = "Patient entering emergency mode")),
    responses(
        (status = 200, description = "Broadcast issued and re-run completed", body = ActivateEmergencyRes),
        (status = 400, description = "Invalid patient record or mismatched patient id")
    )
)]
/// Enter emergency mode
///
/// Relaxes the constraints, broadcasts to every donor eligible under them and re-runs the
/// pipeline with the relaxed constraints.
#[axum::debug_handler]
async fn activate_emergency(
    State(state): State<AppState>,
    AxumPath(patient_id): AxumPath<String>,
    Json(req): Json<StartRunReq>,
) -> Result<Json<ActivateEmergencyRes>, (StatusCode, &'static str)> {
    if req.patient.id.as_str() != patient_id {
        tracing::warn!(path = %patient_id, body = %req.patient.id, "patient id mismatch");
        return Err((StatusCode::BAD_REQUEST, "Patient id does not match path"));
    }

    let activation = state
        .service
        .activate_emergency(req.into())
        .map_err(|e| error_response("Activate emergency error", e))?;
    let run = RunRes::from(activation.run.collect().await);
    Ok(Json(ActivateEmergencyRes {
        issued: activation.issued,
        run,
    }))
}

#[utoipa::path(
    post,
    path = "/emergency/{patient_id}/deactivate",
    request_body = DeactivateEmergencyReq,
    params(("patient_id" = String, Path, description = "Patient leaving emergency mode")),
    responses(
        (status = 200, description = "Constraints in force before activation", body = DeactivateEmergencyRes)
    )
)]
async fn deactivate_emergency(
    State(state): State<AppState>,
    AxumPath(patient_id): AxumPath<String>,
    Json(req): Json<DeactivateEmergencyReq>,
) -> Json<DeactivateEmergencyRes> {
    let was_active = state.service.emergency_active(&patient_id);
    let constraints = state
        .service
        .deactivate_emergency(&patient_id, &req.constraints);
    Json(DeactivateEmergencyRes {
        constraints,
        was_active,
    })
}
