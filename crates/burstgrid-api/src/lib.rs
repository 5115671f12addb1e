//! burstgrid-api — REST API for BurstGrid.
//!
//! A thin axum layer over the orchestration core: submit a job, query it,
//! trigger processing, and inspect executions and pool capacity.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/jobs` | Submit a job |
//! | GET | `/api/v1/jobs` | List jobs (`?status=` to filter) |
//! | GET | `/api/v1/jobs/{id}` | Get a job |
//! | POST | `/api/v1/jobs/{id}/process` | Start the workflow (202) |
//! | POST | `/api/v1/jobs/{id}/cancel` | Cancel the running workflow |
//! | GET | `/api/v1/executions/{id}` | Get an execution checkpoint |
//! | GET | `/api/v1/pools/{id}` | Requested vs applied capacity |
//! | GET | `/api/v1/health` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use burstgrid_state::StateStore;
use burstgrid_workflow::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub orchestrator: Orchestrator,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/jobs", get(handlers::list_jobs).post(handlers::submit_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/process", post(handlers::process_job))
        .route("/jobs/{id}/cancel", post(handlers::cancel_job))
        .route("/executions/{id}", get(handlers::get_execution))
        .route("/pools/{id}", get(handlers::get_pool))
        .route("/health", get(handlers::health))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
