use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Days, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use servicebook::config::{AppConfig, DataSource};
use servicebook::db;
use servicebook::handlers;
use servicebook::services::backend::agent::AgentBackend;
use servicebook::services::backend::local::LocalBackend;
use servicebook::services::backend::BookingBackend;
use servicebook::services::query_cache::QueryClient;
use servicebook::state::AppState;

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        data_source: DataSource::Local,
        agent_url: "http://localhost:8000".to_string(),
        agent_timeout_secs: 5,
        customer_id: "cust-001".to_string(),
        query_stale_secs: 300,
        flow_idle_secs: 1800,
    }
}

fn state_with_backend(config: AppConfig, backend: Arc<dyn BookingBackend>) -> Arc<AppState> {
    let queries = Arc::new(QueryClient::new(backend, Duration::from_secs(300)));
    Arc::new(AppState::new(config, queries))
}

fn test_state() -> Arc<AppState> {
    let config = test_config();
    let conn = db::init_db(":memory:").unwrap();
    let backend = LocalBackend::new(Arc::new(Mutex::new(conn)), config.customer_id.clone());
    state_with_backend(config, Arc::new(backend))
}

fn test_app(state: Arc<AppState>) -> Router {
    handlers::router(state)
}

// Far enough out for the flow to accept.
fn next_week() -> String {
    (Utc::now().date_naive() + Days::new(7))
        .format("%Y-%m-%d")
        .to_string()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
    let res = test_app(state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn create_flow(state: &Arc<AppState>) -> String {
    let (status, json) = send(state, post_empty("/api/flows")).await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_string()
}

async fn set_field(state: &Arc<AppState>, id: &str, field: &str, value: &str) -> (StatusCode, Value) {
    send(
        state,
        post_json(
            &format!("/api/flows/{id}/fields"),
            json!({ "field": field, "value": value }),
        ),
    )
    .await
}

// ── Reference data ──

#[tokio::test]
async fn test_health() {
    let state = test_state();
    let (status, json) = send(&state, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["dataSource"], "local");
}

#[tokio::test]
async fn test_vehicles() {
    let state = test_state();

    let (status, json) = send(&state, get("/api/vehicles")).await;
    assert_eq!(status, StatusCode::OK);
    let vehicles = json.as_array().unwrap();
    assert_eq!(vehicles.len(), 2);
    assert_eq!(vehicles[0]["registrationNumber"], "TN-01-AB-1234");

    let (status, json) = send(&state, get("/api/vehicles/veh-002")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model"], "Civic");

    let (status, _) = send(&state, get("/api/vehicles/veh-999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_service_centers() {
    let state = test_state();
    let (status, json) = send(&state, get("/api/service-centers")).await;

    assert_eq!(status, StatusCode::OK);
    let centers = json.as_array().unwrap();
    assert_eq!(centers.len(), 3);
    assert_eq!(centers[0]["id"], "sc-001");
    assert!(centers[0]["availableServices"].is_array());
}

#[tokio::test]
async fn test_time_slots_reflect_bookings() {
    let state = test_state();
    let (status, json) = send(
        &state,
        get("/api/service-centers/sc-001/time-slots?date=2025-01-15"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let slots = json.as_array().unwrap();
    assert_eq!(slots.len(), 6);
    let booked = slots
        .iter()
        .find(|s| s["time"] == "10:00 AM - 11:00 AM")
        .unwrap();
    assert_eq!(booked["available"], false);
    assert_eq!(slots[0]["available"], true);
}

#[tokio::test]
async fn test_time_slots_rejects_bad_date() {
    let state = test_state();
    let res = test_app(state)
        .oneshot(get("/api/service-centers/sc-001/time-slots?date=tomorrow"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predicted_issues_and_appointments() {
    let state = test_state();

    let (status, json) = send(&state, get("/api/vehicles/veh-001/predicted-issues")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 3);

    let (status, json) = send(&state, get("/api/vehicles/veh-001/appointments")).await;
    assert_eq!(status, StatusCode::OK);
    let appointments = json.as_array().unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0]["id"], "apt-001");
    assert_eq!(appointments[0]["serviceCenter"]["id"], "sc-001");
}

#[tokio::test]
async fn test_create_appointment_invalidates_list() {
    let state = test_state();
    let date = next_week();

    // Warm the cached list
    let (_, json) = send(&state, get("/api/vehicles/veh-001/appointments")).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, json) = send(
        &state,
        post_json(
            "/api/appointments",
            json!({
                "vehicleId": "veh-001",
                "serviceCenterId": "sc-002",
                "date": date,
                "timeSlot": "09:00 AM - 10:00 AM",
                "serviceType": "General Service",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "Scheduled");
    assert!(json["id"].as_str().unwrap().starts_with("apt-"));

    let (_, json) = send(&state, get("/api/vehicles/veh-001/appointments")).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_appointment_double_booking_rejected() {
    let state = test_state();
    let body = json!({
        "vehicleId": "veh-002",
        "serviceCenterId": "sc-001",
        "date": "2025-01-15",
        "timeSlot": "10:00 AM - 11:00 AM",
        "serviceType": "General Service",
    });

    let (status, json) = send(&state, post_json("/api/appointments", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("already booked"));
}

#[tokio::test]
async fn test_create_appointment_for_unknown_vehicle_rejected() {
    let state = test_state();
    let body = json!({
        "vehicleId": "veh-777",
        "serviceCenterId": "sc-001",
        "date": next_week(),
        "timeSlot": "09:00 AM - 10:00 AM",
        "serviceType": "General Service",
    });

    let (status, json) = send(&state, post_json("/api/appointments", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("unknown vehicle"));
}

// ── Booking flow ──

#[tokio::test]
async fn test_flow_not_found() {
    let state = test_state();

    let (status, _) = send(&state, get("/api/flows/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&state, post_empty("/api/flows/missing/advance")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_new_flow_is_closed() {
    let state = test_state();
    let id = create_flow(&state).await;

    let (status, json) = send(&state, get(&format!("/api/flows/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["stage"], "closed");
    assert!(json["session"].is_null());

    let (status, _) = send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_open_loads_reference_data() {
    let state = test_state();
    let id = create_flow(&state).await;

    let (status, json) = send(
        &state,
        post_json(
            &format!("/api/flows/{id}/open"),
            json!({ "vehicleId": "veh-001", "issueId": "issue-001" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stage"], "issue");
    assert_eq!(json["step"], 1);
    let session = &json["session"];
    assert_eq!(session["serviceCenters"]["status"], "ready");
    assert_eq!(session["serviceCenters"]["data"].as_array().unwrap().len(), 3);
    assert_eq!(session["issue"]["status"], "ready");
    assert_eq!(session["issue"]["data"]["componentName"], "Front Brake Pads");
    assert_eq!(session["vehicle"]["data"]["model"], "Model S");
    assert_eq!(session["draft"]["serviceType"], "Predicted Issue Service");
}

#[tokio::test]
async fn test_open_with_unknown_vehicle() {
    let state = test_state();
    let id = create_flow(&state).await;

    let (status, json) = send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-999" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["session"]["vehicle"]["status"], "failed");
    assert_eq!(json["session"]["serviceCenters"]["status"], "ready");
}

#[tokio::test]
async fn test_open_with_unknown_issue() {
    let state = test_state();
    let id = create_flow(&state).await;

    let (_, json) = send(
        &state,
        post_json(
            &format!("/api/flows/{id}/open"),
            json!({ "vehicleId": "veh-001", "issueId": "issue-999" }),
        ),
    )
    .await;

    assert_eq!(json["session"]["issue"]["status"], "ready");
    assert!(json["session"]["issue"]["data"].is_null());
}

#[tokio::test]
async fn test_center_step_requires_selection() {
    let state = test_state();
    let id = create_flow(&state).await;
    send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-001" })),
    )
    .await;

    let (status, json) = send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stage"], "center");
    assert_eq!(json["session"]["draft"]["serviceType"], "General Service");

    let (status, json) = send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("service center"));
}

#[tokio::test]
async fn test_field_errors() {
    let state = test_state();
    let id = create_flow(&state).await;

    let (status, _) = set_field(&state, &id, "notes", "hello").await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-001" })),
    )
    .await;

    let (status, _) = set_field(&state, &id, "mileage", "1200").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = set_field(&state, &id, "date", "15/01/2025").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_full_booking_flow() {
    let state = test_state();
    let id = create_flow(&state).await;
    let date = next_week();

    send(
        &state,
        post_json(
            &format!("/api/flows/{id}/open"),
            json!({ "vehicleId": "veh-001", "issueId": "issue-001" }),
        ),
    )
    .await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;

    let (status, _) = set_field(&state, &id, "serviceCenterId", "sc-003").await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stage"], "schedule");
    assert_eq!(json["step"], 3);

    // No date yet
    let (_, json) = send(&state, get(&format!("/api/flows/{id}/time-slots"))).await;
    assert_eq!(json["status"], "idle");

    set_field(&state, &id, "date", &date).await;
    let (status, json) = send(&state, get(&format!("/api/flows/{id}/time-slots"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ready");
    assert_eq!(json["data"].as_array().unwrap().len(), 6);

    set_field(&state, &id, "timeSlot", "02:00 PM - 03:00 PM").await;
    set_field(&state, &id, "notes", "Squeaking on cold mornings").await;

    let (status, json) = send(&state, post_empty(&format!("/api/flows/{id}/submit"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["serviceCenterId"], "sc-003");
    assert_eq!(json["issueId"], "issue-001");
    assert_eq!(json["serviceType"], "Predicted Issue Service");
    assert_eq!(json["notes"], "Squeaking on cold mornings");

    let (_, json) = send(&state, get(&format!("/api/flows/{id}"))).await;
    assert_eq!(json["stage"], "closed");
    assert!(json["session"].is_null());

    // The booked slot is gone for the next customer
    let (_, json) = send(
        &state,
        get(&format!("/api/service-centers/sc-003/time-slots?date={date}")),
    )
    .await;
    let slot = json
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["time"] == "02:00 PM - 03:00 PM")
        .cloned()
        .unwrap();
    assert_eq!(slot["available"], false);

    let (_, json) = send(&state, get("/api/vehicles/veh-001/appointments")).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_submit_missing_slot_keeps_flow_open() {
    let state = test_state();
    let id = create_flow(&state).await;

    send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-001" })),
    )
    .await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    set_field(&state, &id, "serviceCenterId", "sc-001").await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    set_field(&state, &id, "date", &next_week()).await;

    let (status, json) = send(&state, post_empty(&format!("/api/flows/{id}/submit"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("time slot"));

    let (_, json) = send(&state, get(&format!("/api/flows/{id}"))).await;
    assert_eq!(json["stage"], "schedule");
}

#[tokio::test]
async fn test_submit_past_date_rejected() {
    let state = test_state();
    let id = create_flow(&state).await;

    send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-001" })),
    )
    .await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    set_field(&state, &id, "serviceCenterId", "sc-002").await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    set_field(&state, &id, "date", "2020-03-01").await;
    set_field(&state, &id, "timeSlot", "09:00 AM - 10:00 AM").await;

    let (status, _) = send(&state, post_empty(&format!("/api/flows/{id}/submit"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_retreat_from_first_step_closes() {
    let state = test_state();
    let id = create_flow(&state).await;

    send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-001" })),
    )
    .await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;

    let (_, json) = send(&state, post_empty(&format!("/api/flows/{id}/retreat"))).await;
    assert_eq!(json["stage"], "issue");

    let (_, json) = send(&state, post_empty(&format!("/api/flows/{id}/retreat"))).await;
    assert_eq!(json["stage"], "closed");
    assert!(json["session"].is_null());
}

#[tokio::test]
async fn test_close_and_delete_flow() {
    let state = test_state();
    let id = create_flow(&state).await;

    send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-001" })),
    )
    .await;
    let (status, json) = send(&state, post_empty(&format!("/api/flows/{id}/close"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stage"], "closed");

    let res = test_app(state.clone())
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/flows/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let (status, _) = send(&state, get(&format!("/api/flows/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Agent data source ──

// Local backend served on an ephemeral port, standing in for the agent.
async fn spawn_agent() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = test_app(test_state());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn agent_state(url: String) -> Arc<AppState> {
    let mut config = test_config();
    config.data_source = DataSource::Agent;
    config.agent_url = url.clone();
    let backend = AgentBackend::new(url, Duration::from_secs(5)).unwrap();
    state_with_backend(config, Arc::new(backend))
}

#[tokio::test]
async fn test_agent_backend_reference_data() {
    let url = spawn_agent().await;
    let state = agent_state(url);

    let (status, json) = send(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["dataSource"], "agent");

    let (status, json) = send(&state, get("/api/service-centers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 3);

    let (status, json) = send(&state, get("/api/vehicles/veh-001/predicted-issues")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["severity"], "Medium");
}

#[tokio::test]
async fn test_agent_backend_booking_flow() {
    let url = spawn_agent().await;
    let state = agent_state(url);
    let id = create_flow(&state).await;
    let date = next_week();

    send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-001" })),
    )
    .await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    set_field(&state, &id, "serviceCenterId", "sc-001").await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    set_field(&state, &id, "date", &date).await;
    set_field(&state, &id, "timeSlot", "11:00 AM - 12:00 PM").await;

    let (status, json) = send(&state, post_empty(&format!("/api/flows/{id}/submit"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["vehicleId"], "veh-001");
    assert_eq!(json["customerId"], "cust-001");
}

#[tokio::test]
async fn test_agent_backend_submission_failure() {
    let url = spawn_agent().await;
    let state = agent_state(url);
    let id = create_flow(&state).await;

    send(
        &state,
        post_json(&format!("/api/flows/{id}/open"), json!({ "vehicleId": "veh-001" })),
    )
    .await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    set_field(&state, &id, "serviceCenterId", "sc-404").await;
    send(&state, post_empty(&format!("/api/flows/{id}/advance"))).await;
    set_field(&state, &id, "date", &next_week()).await;
    set_field(&state, &id, "timeSlot", "09:00 AM - 10:00 AM").await;

    // The agent refuses the unknown center, which is a rejection, not an outage
    let (status, _) = send(&state, post_empty(&format!("/api/flows/{id}/submit"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, json) = send(&state, get(&format!("/api/flows/{id}"))).await;
    assert_eq!(json["stage"], "schedule");
    assert!(json["session"]["lastError"].is_string());
    assert_eq!(json["session"]["draft"]["serviceCenterId"], "sc-404");
}

#[tokio::test]
async fn test_agent_rejection_is_unprocessable() {
    let url = spawn_agent().await;
    let state = agent_state(url);
    let body = json!({
        "vehicleId": "veh-001",
        "serviceCenterId": "sc-001",
        "date": "2025-01-15",
        "timeSlot": "10:00 AM - 11:00 AM",
        "serviceType": "General Service",
    });

    let (status, json) = send(&state, post_json("/api/appointments", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("already booked"));
}

#[tokio::test]
async fn test_unreachable_agent_is_bad_gateway() {
    // Nothing listens on the discard port
    let state = agent_state("http://127.0.0.1:9".to_string());
    let body = json!({
        "vehicleId": "veh-001",
        "serviceCenterId": "sc-001",
        "date": next_week(),
        "timeSlot": "09:00 AM - 10:00 AM",
        "serviceType": "General Service",
    });

    let (status, json) = send(&state, post_json("/api/appointments", body)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("failed to call agent service"));

    let (status, _) = send(&state, get("/api/service-centers")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_agent_encodes_path_ids() {
    let url = spawn_agent().await;
    let state = agent_state(url);

    // A slash inside the id must not reach a different route on the agent
    let (status, json) = send(&state, get("/api/vehicles/veh-001%2Fappointments/predicted-issues")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.as_array().unwrap().is_empty());
}
