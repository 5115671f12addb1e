//! REST API handlers.
//!
//! Reads go straight to the `StateStore`; `process` and `cancel` go through
//! the `Orchestrator`. Every response uses the same `{success, data, error}`
//! envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use burstgrid_state::{Job, JobStatus};
use burstgrid_workflow::WorkflowError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn workflow_error(e: WorkflowError) -> axum::response::Response {
    let status = match &e {
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Conflict { .. } => StatusCode::CONFLICT,
        WorkflowError::InvalidTarget { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Jobs ───────────────────────────────────────────────────────

/// Submit request body. Everything is optional.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitJobRequest {
    pub id: Option<String>,
    pub pool_id: Option<String>,
    #[serde(default)]
    pub input: Value,
}

/// POST /api/v1/jobs
pub async fn submit_job(
    State(state): State<ApiState>,
    Json(req): Json<SubmitJobRequest>,
) -> impl IntoResponse {
    let id = req.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let pool_id = req.pool_id.unwrap_or_else(|| state.orchestrator.config().pool_id.clone());

    match state.store.get_job(&id) {
        Ok(Some(_)) => {
            return error_response(&format!("job {id} already exists"), StatusCode::CONFLICT)
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }

    let job = Job::new(&id, &pool_id, req.input);
    match state.store.put_job(&job) {
        Ok(()) => {
            info!(job_id = %id, pool = %pool_id, "job submitted");
            (StatusCode::CREATED, ApiResponse::ok(job)).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let result = match query.status.as_deref() {
        None => state.store.list_jobs(),
        Some(raw) => match JobStatus::parse(raw) {
            Some(status) => state.store.query_jobs_by_status(status),
            None => {
                return error_response(&format!("unknown job status `{raw}`"), StatusCode::BAD_REQUEST)
                    .into_response();
            }
        },
    };
    match result {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/jobs/:id
pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_job(&id) {
        Ok(Some(job)) => ApiResponse::ok(job).into_response(),
        Ok(None) => error_response("job not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/jobs/:id/process
///
/// Returns as soon as the workflow is started; poll the job or execution
/// for the outcome.
pub async fn process_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.start(&id) {
        Ok(handle) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({
                "job_id": handle.job_id,
                "execution_id": handle.execution_id,
                "status": JobStatus::ScalingUp,
            })),
        )
            .into_response(),
        Err(e) => workflow_error(e),
    }
}

/// POST /api/v1/jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_job(&id) {
        Ok(Some(job)) => {
            if state.orchestrator.cancel(&id) {
                ApiResponse::ok(serde_json::json!({ "job_id": id, "cancelling": true }))
                    .into_response()
            } else {
                error_response(
                    &format!("job {id} has no cancellable execution (status {})", job.status),
                    StatusCode::CONFLICT,
                )
                .into_response()
            }
        }
        Ok(None) => error_response("job not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Executions ─────────────────────────────────────────────────

/// GET /api/v1/executions/:id
pub async fn get_execution(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.execution(&id) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => workflow_error(e),
    }
}

// ── Pools ──────────────────────────────────────────────────────

/// GET /api/v1/pools/:id
pub async fn get_pool(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_pool(&id) {
        Ok(Some(pool)) => ApiResponse::ok(serde_json::json!({
            "pool_id": pool.pool_id,
            "requested": pool.requested,
            "applied": pool.applied,
            "converged": pool.is_converged(),
            "ready": pool.applied.is_ready(),
        }))
        .into_response(),
        Ok(None) => error_response("pool not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/health
pub async fn health() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::to_bytes;
    use burstgrid_capacity::{CapacityController, StoreCapacityBackend};
    use burstgrid_executor::StagedExecutor;
    use burstgrid_state::{CapacityTarget, PoolCapacity, StateStore};
    use burstgrid_workflow::{Orchestrator, WorkflowConfig};
    use serde_json::json;

    /// No provisioner runs, so pools never become ready and started
    /// workflows stay in `scaling_up`.
    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let controller = CapacityController::new(Arc::new(StoreCapacityBackend::new(store.clone())));
        let orchestrator = Orchestrator::new(
            store.clone(),
            controller,
            Arc::new(StagedExecutor::media_pipeline(Duration::ZERO)),
            WorkflowConfig::default(),
        );
        ApiState {
            store,
            orchestrator,
        }
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_assigns_id_and_default_pool() {
        let state = test_state();
        let req = SubmitJobRequest {
            input: json!({ "media_uri": "s3://b/a.mp4" }),
            ..Default::default()
        };

        let resp = submit_job(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["pool_id"], "media-pool");
        assert_eq!(body["data"]["status"], "submitted");
        let id = body["data"]["id"].as_str().unwrap();
        assert!(state.store.get_job(id).unwrap().is_some());
    }

    #[tokio::test]
    async fn submit_duplicate_id_conflicts() {
        let state = test_state();
        let req = || SubmitJobRequest {
            id: Some("job-1".into()),
            ..Default::default()
        };

        let resp = submit_job(State(state.clone()), Json(req())).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = submit_job(State(state), Json(req())).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn get_nonexistent_job() {
        let state = test_state();
        let resp = get_job(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status() {
        let state = test_state();
        state.store.put_job(&Job::new("a", "p", Value::Null)).unwrap();
        let mut done = Job::new("b", "p", Value::Null);
        done.status = JobStatus::Completed;
        state.store.put_job(&done).unwrap();

        let query = ListJobsQuery {
            status: Some("completed".into()),
        };
        let resp = list_jobs(State(state.clone()), Query(query)).await.into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["id"], "b");

        let resp = list_jobs(State(state), Query(ListJobsQuery::default()))
            .await
            .into_response();
        assert_eq!(body_json(resp).await["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_jobs_rejects_unknown_status() {
        let state = test_state();
        let query = ListJobsQuery {
            status: Some("exploded".into()),
        };
        let resp = list_jobs(State(state), Query(query)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn process_accepts_then_conflicts() {
        let state = test_state();
        state.store.put_job(&Job::new("job-1", "media-pool", Value::Null)).unwrap();

        let resp = process_job(State(state.clone()), Path("job-1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = body_json(resp).await;
        assert!(body["data"]["execution_id"].is_string());

        let resp = process_job(State(state.clone()), Path("job-1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        assert!(state.orchestrator.cancel("job-1"));
    }

    #[tokio::test]
    async fn process_missing_job_is_404() {
        let state = test_state();
        let resp = process_job(State(state), Path("ghost".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn process_with_invalid_target_is_400() {
        let mut state = test_state();
        let controller =
            CapacityController::new(Arc::new(StoreCapacityBackend::new(state.store.clone())));
        state.orchestrator = Orchestrator::new(
            state.store.clone(),
            controller,
            Arc::new(StagedExecutor::new()),
            WorkflowConfig {
                high_target: CapacityTarget::new(4, 1),
                ..Default::default()
            },
        );
        state.store.put_job(&Job::new("job-1", "media-pool", Value::Null)).unwrap();

        let resp = process_job(State(state.clone()), Path("job-1".to_string()))
            .await
            .into_response();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.get_pool("media-pool").unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_without_running_execution_conflicts() {
        let state = test_state();
        state.store.put_job(&Job::new("job-1", "media-pool", Value::Null)).unwrap();

        let resp = cancel_job(State(state.clone()), Path("job-1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = cancel_job(State(state), Path("ghost".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_missing_execution_is_404() {
        let state = test_state();
        let resp = get_execution(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_pool_reports_convergence() {
        let state = test_state();
        let mut pool = PoolCapacity::idle("media-pool");
        pool.requested = CapacityTarget::new(2, 5);
        state.store.put_pool(&pool).unwrap();

        let resp = get_pool(State(state), Path("media-pool".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["requested"], json!({ "min_units": 2, "max_units": 5 }));
        assert_eq!(body["data"]["converged"], false);
        assert_eq!(body["data"]["ready"], false);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = health().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
