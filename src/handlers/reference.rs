use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{
    Appointment, CreateAppointmentInput, PredictedIssue, ServiceCenter, TimeSlot, Vehicle,
};
use crate::services::backend::Rejection;
use crate::state::AppState;

// GET /api/vehicles
pub async fn list_vehicles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Vehicle>>, AppError> {
    Ok(Json(state.queries.vehicles().await?))
}

// GET /api/vehicles/:vehicle_id
pub async fn get_vehicle(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Vehicle>, AppError> {
    state
        .queries
        .vehicle(&vehicle_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("vehicle {vehicle_id}")))
}

// GET /api/service-centers
pub async fn list_service_centers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServiceCenter>>, AppError> {
    Ok(Json(state.queries.service_centers().await?))
}

// GET /api/service-centers/:id/time-slots?date=YYYY-MM-DD
#[derive(Deserialize)]
pub struct TimeSlotsQuery {
    pub date: NaiveDate,
}

pub async fn list_time_slots(
    State(state): State<Arc<AppState>>,
    Path(service_center_id): Path<String>,
    Query(query): Query<TimeSlotsQuery>,
) -> Result<Json<Vec<TimeSlot>>, AppError> {
    let slots = state
        .queries
        .time_slots(&service_center_id, query.date)
        .await?;
    Ok(Json(slots))
}

// GET /api/vehicles/:vehicle_id/predicted-issues
pub async fn list_predicted_issues(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Vec<PredictedIssue>>, AppError> {
    Ok(Json(state.queries.predicted_issues(&vehicle_id).await?))
}

// GET /api/vehicles/:vehicle_id/appointments
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    Ok(Json(state.queries.appointments(&vehicle_id).await?))
}

// POST /api/appointments
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateAppointmentInput>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let appointment = state
        .queries
        .backend()
        .create_appointment(input)
        .await
        .map_err(|e| match e.downcast_ref::<Rejection>() {
            Some(rejection) => AppError::Rejected(rejection.to_string()),
            None => AppError::from(e),
        })?;

    state.queries.invalidate_after_booking(&appointment);
    Ok((StatusCode::CREATED, Json(appointment)))
}
