pub mod flows;
pub mod health;
pub mod reference;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/vehicles", get(reference::list_vehicles))
        .route("/api/vehicles/:vehicle_id", get(reference::get_vehicle))
        .route("/api/service-centers", get(reference::list_service_centers))
        .route(
            "/api/service-centers/:id/time-slots",
            get(reference::list_time_slots),
        )
        .route(
            "/api/vehicles/:vehicle_id/predicted-issues",
            get(reference::list_predicted_issues),
        )
        .route(
            "/api/vehicles/:vehicle_id/appointments",
            get(reference::list_appointments),
        )
        .route("/api/appointments", post(reference::create_appointment))
        .route("/api/flows", post(flows::create_flow))
        .route(
            "/api/flows/:id",
            get(flows::get_flow).delete(flows::delete_flow),
        )
        .route("/api/flows/:id/open", post(flows::open_flow))
        .route("/api/flows/:id/fields", post(flows::set_field))
        .route("/api/flows/:id/time-slots", get(flows::time_slots))
        .route("/api/flows/:id/advance", post(flows::advance))
        .route("/api/flows/:id/retreat", post(flows::retreat))
        .route("/api/flows/:id/close", post(flows::close))
        .route("/api/flows/:id/submit", post(flows::submit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
