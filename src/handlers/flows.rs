use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{Appointment, TimeSlot};
use crate::services::booking_flow::{BookingFlow, FlowSnapshot, Loadable};
use crate::state::AppState;

#[derive(Serialize)]
pub struct FlowResponse {
    id: String,
    #[serde(flatten)]
    snapshot: FlowSnapshot,
}

fn respond(id: String, flow: &BookingFlow) -> Json<FlowResponse> {
    Json(FlowResponse {
        id,
        snapshot: flow.snapshot(),
    })
}

fn lookup(state: &AppState, id: &str) -> Result<Arc<BookingFlow>, AppError> {
    state
        .flows
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("booking flow {id}")))
}

// POST /api/flows
pub async fn create_flow(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<FlowResponse>) {
    let id = uuid::Uuid::new_v4().to_string();
    let flow = Arc::new(BookingFlow::new(Arc::clone(&state.queries)));
    state.flows.insert(id.clone(), Arc::clone(&flow));

    tracing::info!(flow = %id, "booking flow created");
    (StatusCode::CREATED, respond(id, &flow))
}

// GET /api/flows/:id
pub async fn get_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = lookup(&state, &id)?;
    Ok(respond(id, &flow))
}

// DELETE /api/flows/:id
pub async fn delete_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    match state.flows.remove(&id) {
        Some(flow) => {
            flow.close();
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AppError::NotFound(format!("booking flow {id}"))),
    }
}

// POST /api/flows/:id/open
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    pub vehicle_id: String,
    pub issue_id: Option<String>,
}

pub async fn open_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<OpenRequest>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = lookup(&state, &id)?;
    flow.open(&req.vehicle_id, req.issue_id.as_deref()).await;
    Ok(respond(id, &flow))
}

// POST /api/flows/:id/fields
#[derive(Deserialize)]
pub struct SetFieldRequest {
    pub field: String,
    #[serde(default)]
    pub value: String,
}

pub async fn set_field(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetFieldRequest>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = lookup(&state, &id)?;
    flow.set_field_by_name(&req.field, &req.value)?;
    Ok(respond(id, &flow))
}

// GET /api/flows/:id/time-slots
pub async fn time_slots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Loadable<Vec<TimeSlot>>>, AppError> {
    let flow = lookup(&state, &id)?;
    Ok(Json(flow.time_slots().await?))
}

// POST /api/flows/:id/advance
pub async fn advance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = lookup(&state, &id)?;
    flow.advance()?;
    Ok(respond(id, &flow))
}

// POST /api/flows/:id/retreat
pub async fn retreat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = lookup(&state, &id)?;
    flow.retreat()?;
    Ok(respond(id, &flow))
}

// POST /api/flows/:id/close
pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = lookup(&state, &id)?;
    flow.close();
    Ok(respond(id, &flow))
}

// POST /api/flows/:id/submit
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let flow = lookup(&state, &id)?;
    let appointment = flow.submit().await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}
