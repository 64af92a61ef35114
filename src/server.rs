use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use log::{error, info, warn};
use serde::Serialize;
use tower::limit::GlobalConcurrencyLimitLayer;

use crate::config::ServerConfig;
use crate::data::{
    ExamDiagnostics, ExamInput, ExamSchedule, InvigilationDiagnostics, InvigilationInput,
    InvigilationSchedule,
};
use crate::diagnostics;
use crate::error::SchedulingError;
use crate::model;
use crate::solver;

/// JSON error body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

/// Failure of a request, mapped onto an HTTP status.
#[derive(Debug)]
pub enum AppError {
    Scheduling(SchedulingError),
    /// The blocking solve task panicked or was cancelled.
    Join(String),
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        AppError::Scheduling(err)
    }
}

impl From<crate::error::ConfigError> for AppError {
    fn from(err: crate::error::ConfigError) -> Self {
        AppError::Scheduling(err.into())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Join(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::Scheduling(err) => {
                let status = match err {
                    SchedulingError::Configuration(_) => StatusCode::BAD_REQUEST,
                    SchedulingError::Infeasible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    SchedulingError::DecodeInconsistency(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind(), err.to_string())
            }
            AppError::Join(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };
        if status.is_server_error() {
            error!("{}", message);
        } else {
            warn!("Request rejected ({}): {}", kind, message);
        }

        let body = ApiError {
            error: kind.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

async fn solve_exams(Json(input): Json<ExamInput>) -> Result<Json<ExamSchedule>, AppError> {
    let schedule = tokio::task::spawn_blocking(move || solver::exam::solve(&input)).await??;
    Ok(Json(schedule))
}

async fn exam_diagnostics(
    Json(input): Json<ExamInput>,
) -> Result<Json<ExamDiagnostics>, AppError> {
    let report =
        tokio::task::spawn_blocking(move || diagnostics::exam_diagnostics(&input)).await??;
    Ok(Json(report))
}

async fn solve_invigilation(
    Json(input): Json<InvigilationInput>,
) -> Result<Json<InvigilationSchedule>, AppError> {
    let schedule =
        tokio::task::spawn_blocking(move || solver::invigilation::solve(&input)).await??;
    Ok(Json(schedule))
}

async fn invigilation_diagnostics(
    Json(input): Json<InvigilationInput>,
) -> Result<Json<InvigilationDiagnostics>, AppError> {
    let report =
        tokio::task::spawn_blocking(move || diagnostics::invigilation_diagnostics(&input))
            .await??;
    Ok(Json(report))
}

/// Routes of the service. Solve routes share one concurrency budget.
pub fn router(config: &ServerConfig) -> Router {
    let solves = Router::new()
        .route("/v1/exams/solve", post(solve_exams))
        .route("/v1/invigilation/solve", post(solve_invigilation))
        .layer(GlobalConcurrencyLimitLayer::new(config.max_concurrent_solves));

    Router::new()
        .route("/v1/exams/diagnostics", post(exam_diagnostics))
        .route("/v1/invigilation/diagnostics", post(invigilation_diagnostics))
        .merge(solves)
}

pub async fn run_server(config: ServerConfig) -> std::io::Result<()> {
    let threads = model::pin_solver_threads(config.solver_threads);
    let app = router(&config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    info!(
        "Server running at http://{} (max {} concurrent solves, {} solver threads)",
        listener.local_addr()?,
        config.max_concurrent_solves,
        threads
    );

    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn post_json(uri: &str, body: Value) -> (StatusCode, Value) {
        let app = router(&ServerConfig::default());
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn exam_body(duration: u32) -> Value {
        json!({
            "examGroups": [
                { "id": "G1", "durationMin": duration },
                { "id": "G2" }
            ],
            "students": [
                { "id": "S1", "program": "CS", "examGroups": ["G1", "G2"] }
            ],
            "slots": [
                { "date": "2025-01-06", "slotId": "AM", "startMin": 540, "endMin": 660, "capacity": 30 },
                { "date": "2025-01-08", "slotId": "AM", "startMin": 540, "endMin": 660, "capacity": 30 }
            ],
            "solver": { "timeLimitSecs": 10.0, "workers": 1 }
        })
    }

    #[tokio::test]
    async fn exam_solve_returns_schedule() {
        let (status, body) = post_json("/v1/exams/solve", exam_body(120)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OPTIMAL");
        assert_eq!(body["assignments"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn configuration_error_is_bad_request() {
        let (status, body) = post_json("/v1/exams/solve", exam_body(150)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "configuration");
        assert!(body["message"].as_str().unwrap().contains("G1"));
    }

    #[tokio::test]
    async fn exam_diagnostics_report_groups_without_slot() {
        let (status, body) = post_json("/v1/exams/diagnostics", exam_body(150)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["groupsWithoutSlot"], json!(["G1"]));
        assert_eq!(body["uniqueDays"], 2);
    }

    #[tokio::test]
    async fn infeasible_invigilation_is_unprocessable() {
        // two overlapping sessions, one invigilator
        let body = json!({
            "sessions": [
                { "id": "A", "date": "2025-01-06", "startMin": 540, "endMin": 660, "invigilatorsNeeded": 1 },
                { "id": "B", "date": "2025-01-06", "startMin": 600, "endMin": 720, "invigilatorsNeeded": 1 }
            ],
            "staff": [ { "id": "D1", "name": "Dr One" } ],
            "solver": { "timeLimitSecs": 10.0, "workers": 1 }
        });
        let (status, reply) = post_json("/v1/invigilation/solve", body.clone()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(reply["error"], "infeasible");

        let (status, reply) = post_json("/v1/invigilation/diagnostics", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["overlappingSessionPairs"], 1);
    }

    #[tokio::test]
    async fn diagnostics_list_unknown_enrollments() {
        let mut body = exam_body(120);
        body["students"][0]["examGroups"] = json!(["G1", "G404"]);
        let (status, reply) = post_json("/v1/exams/diagnostics", body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            reply["unknownEnrollments"],
            json!([{ "studentId": "S1", "examGroup": "G404" }])
        );

        let (status, reply) = post_json("/v1/exams/solve", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["error"], "configuration");
    }

    #[tokio::test]
    async fn invalid_solver_settings_are_bad_request() {
        let mut body = exam_body(120);
        body["solver"]["timeLimitSecs"] = json!(0.0);
        let (status, reply) = post_json("/v1/exams/solve", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(reply["message"].as_str().unwrap().contains("timeLimitSecs"));
    }
}
