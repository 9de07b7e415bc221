//! Read-only operator status API (SPEC_FULL.md ambient-stack "HTTP
//! surface"): exposes already-internal scheduler/tracker/router state over
//! HTTP, with no write paths — mutation stays on the RPC surface (spec
//! §4.C, §6).
//!
//! Grounded on the reference crate's `rest_api.rs`: an `axum::Router` built
//! from a cloneable state handle, `Json` responses, a `/health` endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::router::PacketRouter;
use crate::scheduler::model::ScheduleModel;
use crate::scheduler::Task;
use crate::tracker::OrbitTracker;

/// Shared read-only handles the status API reports on.
#[derive(Clone)]
pub struct AppState {
    /// The active schedule (spec §4.G).
    pub schedule: Arc<RwLock<ScheduleModel>>,
    /// The orbit tracker state machine (spec §4.H).
    pub tracker: Arc<RwLock<OrbitTracker>>,
    /// The packet router's endpoint graph (spec §4.J).
    pub router: Arc<PacketRouter>,
}

/// `GET /api/v1/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"`; presence of a response at all is the real signal.
    pub status: String,
}

/// `GET /api/v1/tracker` response.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatusResponse {
    /// Current lifecycle state, as its `Debug` rendering
    /// (`Disabled`/`Waiting`/`Aos`/`Tracking`/`Los`).
    pub state: String,
    /// Name of the currently tracked target, if any.
    pub target: Option<String>,
}

/// Builds the router over `state`.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/scheduler/tasks", get(list_tasks))
        .route("/api/v1/tracker", get(tracker_status))
        .route("/api/v1/router", get(router_status))
        .with_state(state)
}

/// Binds and serves the status API on `addr` until the process exits.
pub async fn start_server(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = create_app(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy".to_string() })
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    let schedule = state.schedule.read().await;
    Json(schedule.active_tasks().cloned().collect())
}

async fn tracker_status(State(state): State<AppState>) -> Json<TrackerStatusResponse> {
    let tracker = state.tracker.read().await;
    Json(TrackerStatusResponse {
        state: format!("{:?}", tracker.state()),
        target: tracker.target_name().map(str::to_string),
    })
}

async fn router_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (endpoints, routes) = state.router.list().await;
    Json(serde_json::json!({ "endpoints": endpoints, "routes": routes }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass_prediction::target::GroundStation;

    fn empty_state() -> AppState {
        AppState {
            schedule: Arc::new(RwLock::new(ScheduleModel::new())),
            tracker: Arc::new(RwLock::new(OrbitTracker::new(
                "test",
                GroundStation { latitude_deg: 0.0, longitude_deg: 0.0, elevation_m: 0.0 },
            ))),
            router: Arc::new(PacketRouter::new()),
        }
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let response = health().await;
        assert_eq!(response.0.status, "healthy");
    }

    #[tokio::test]
    async fn tracker_status_reports_disabled_with_no_target() {
        let state = empty_state();
        let response = tracker_status(State(state)).await;
        assert_eq!(response.0.state, "Disabled");
        assert!(response.0.target.is_none());
    }

    #[tokio::test]
    async fn scheduler_tasks_starts_empty() {
        let state = empty_state();
        let response = list_tasks(State(state)).await;
        assert!(response.0.is_empty());
    }
}
