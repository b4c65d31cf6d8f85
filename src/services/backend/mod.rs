pub mod agent;
pub mod local;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{
    Appointment, CreateAppointmentInput, PredictedIssue, ServiceCenter, TimeSlot, Vehicle,
};

// A request the backend understood and refused (unknown center, slot
// already taken). Anything else is treated as the backend being unreachable
// or broken.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct Rejection(pub String);

#[async_trait]
pub trait BookingBackend: Send + Sync {
    // Vehicles owned by the configured customer.
    async fn list_vehicles(&self) -> anyhow::Result<Vec<Vehicle>>;

    async fn get_vehicle(&self, vehicle_id: &str) -> anyhow::Result<Option<Vehicle>> {
        let vehicles = self.list_vehicles().await?;
        Ok(vehicles.into_iter().find(|v| v.id == vehicle_id))
    }

    async fn list_service_centers(&self) -> anyhow::Result<Vec<ServiceCenter>>;

    async fn list_time_slots(
        &self,
        service_center_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<TimeSlot>>;

    async fn list_predicted_issues(&self, vehicle_id: &str) -> anyhow::Result<Vec<PredictedIssue>>;

    async fn get_issue(
        &self,
        vehicle_id: &str,
        issue_id: &str,
    ) -> anyhow::Result<Option<PredictedIssue>> {
        let issues = self.list_predicted_issues(vehicle_id).await?;
        Ok(issues.into_iter().find(|i| i.id == issue_id))
    }

    async fn list_appointments(&self, vehicle_id: &str) -> anyhow::Result<Vec<Appointment>>;

    async fn create_appointment(&self, input: CreateAppointmentInput) -> anyhow::Result<Appointment>;
}
