use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::config::DataSource;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let data_source = match state.config.data_source {
        DataSource::Local => "local",
        DataSource::Agent => "agent",
    };
    Json(serde_json::json!({ "status": "ok", "dataSource": data_source }))
}
