use axum::{Json, Router, extract::State, http::Method, routing::get};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::db::services::{incident_service, monitoring_result_service, service_service};
use crate::server::event_broadcaster::EventBroadcaster;
use crate::web::error::AppError;
use crate::web::models::event_models::{ServiceSnapshot, StateSnapshot};

pub mod error;
pub mod models;
pub mod websocket_handler;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub broadcaster: EventBroadcaster,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

/// Full-state fetch for subscribers reconciling after a (re)connect: the
/// broadcaster keeps no backlog, so this is the only way to catch up.
async fn state_snapshot_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<StateSnapshot>, AppError> {
    let services = service_service::list_services(&app_state.db).await?;

    let mut snapshots = Vec::with_capacity(services.len());
    for service in services {
        let latest_results =
            monitoring_result_service::latest_results_for_service(&app_state.db, service.id)
                .await?;
        snapshots.push(ServiceSnapshot {
            service,
            latest_results,
        });
    }

    let open_incidents = incident_service::list_open_incidents(&app_state.db).await?;

    Ok(Json(StateSnapshot {
        services: snapshots,
        open_incidents,
    }))
}

pub fn create_router(db: DatabaseConnection, broadcaster: EventBroadcaster) -> Router {
    let app_state = Arc::new(AppState { db, broadcaster });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check_handler))
        .route("/api/state", get(state_snapshot_handler))
        .route("/ws", get(websocket_handler::websocket_handler))
        .layer(cors)
        .with_state(app_state)
}
