use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use super::{BookingBackend, Rejection};
use crate::models::{
    Appointment, CreateAppointmentInput, PredictedIssue, ServiceCenter, TimeSlot, Vehicle,
};

// Thin HTTP client for the external agent service.
pub struct AgentBackend {
    base: Url,
    client: reqwest::Client,
}

impl AgentBackend {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(&url).with_context(|| format!("invalid agent URL: {url}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("agent URL cannot carry a path: {url}");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build agent HTTP client")?;
        Ok(Self { base, client })
    }

    // Each segment is percent-encoded, so ids never change the path shape.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> anyhow::Result<T> {
        let path = url.path().to_string();
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to call agent service: GET {path}"))?
            .error_for_status()
            .context("agent service returned error")?;

        resp.json()
            .await
            .with_context(|| format!("failed to parse agent response for {path}"))
    }
}

#[async_trait]
impl BookingBackend for AgentBackend {
    async fn list_vehicles(&self) -> anyhow::Result<Vec<Vehicle>> {
        self.get_json(self.endpoint(&["api", "vehicles"])).await
    }

    async fn get_vehicle(&self, vehicle_id: &str) -> anyhow::Result<Option<Vehicle>> {
        let url = self.endpoint(&["api", "vehicles", vehicle_id]);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to call agent service: GET /api/vehicles/:id")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let vehicle = resp
            .error_for_status()
            .context("agent service returned error")?
            .json()
            .await
            .context("failed to parse agent vehicle")?;
        Ok(Some(vehicle))
    }

    async fn list_service_centers(&self) -> anyhow::Result<Vec<ServiceCenter>> {
        self.get_json(self.endpoint(&["api", "service-centers"])).await
    }

    async fn list_time_slots(
        &self,
        service_center_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<TimeSlot>> {
        let mut url = self.endpoint(&["api", "service-centers", service_center_id, "time-slots"]);
        url.query_pairs_mut()
            .append_pair("date", &date.format("%Y-%m-%d").to_string());
        self.get_json(url).await
    }

    async fn list_predicted_issues(&self, vehicle_id: &str) -> anyhow::Result<Vec<PredictedIssue>> {
        self.get_json(self.endpoint(&["api", "vehicles", vehicle_id, "predicted-issues"]))
            .await
    }

    async fn list_appointments(&self, vehicle_id: &str) -> anyhow::Result<Vec<Appointment>> {
        self.get_json(self.endpoint(&["api", "vehicles", vehicle_id, "appointments"]))
            .await
    }

    async fn create_appointment(&self, input: CreateAppointmentInput) -> anyhow::Result<Appointment> {
        let resp = self
            .client
            .post(self.endpoint(&["api", "appointments"]))
            .json(&input)
            .send()
            .await
            .context("failed to call agent service: POST /api/appointments")?;

        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let reason = body["error"].as_str().unwrap_or("no error message");
            if status.is_client_error() {
                return Err(Rejection(format!("agent service refused appointment: {reason}")).into());
            }
            anyhow::bail!("agent service failed to create appointment ({status}): {reason}");
        }

        resp.json()
            .await
            .context("failed to parse created appointment")
    }
}
