use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;

use super::{BookingBackend, Rejection};
use crate::db::queries;
use crate::models::time_slot::{is_known_slot, slots_for_day};
use crate::models::{
    Appointment, AppointmentStatus, CreateAppointmentInput, PredictedIssue, ServiceCenter,
    TimeSlot, Vehicle,
};

pub struct LocalBackend {
    db: Arc<Mutex<Connection>>,
    customer_id: String,
}

impl LocalBackend {
    pub fn new(db: Arc<Mutex<Connection>>, customer_id: String) -> Self {
        Self { db, customer_id }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BookingBackend for LocalBackend {
    async fn list_vehicles(&self) -> anyhow::Result<Vec<Vehicle>> {
        queries::list_vehicles(&self.conn(), &self.customer_id)
    }

    async fn get_vehicle(&self, vehicle_id: &str) -> anyhow::Result<Option<Vehicle>> {
        queries::get_vehicle(&self.conn(), &self.customer_id, vehicle_id)
    }

    async fn list_service_centers(&self) -> anyhow::Result<Vec<ServiceCenter>> {
        queries::list_service_centers(&self.conn())
    }

    async fn list_time_slots(
        &self,
        service_center_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<TimeSlot>> {
        let db = self.conn();
        if queries::get_service_center(&db, service_center_id)?.is_none() {
            anyhow::bail!("unknown service center: {service_center_id}");
        }
        let booked = queries::booked_time_slots(&db, service_center_id, &date)?;
        Ok(slots_for_day(&booked))
    }

    async fn list_predicted_issues(&self, vehicle_id: &str) -> anyhow::Result<Vec<PredictedIssue>> {
        queries::list_predicted_issues(&self.conn(), vehicle_id)
    }

    async fn list_appointments(&self, vehicle_id: &str) -> anyhow::Result<Vec<Appointment>> {
        queries::list_appointments(&self.conn(), vehicle_id)
    }

    async fn create_appointment(&self, input: CreateAppointmentInput) -> anyhow::Result<Appointment> {
        let db = self.conn();

        if queries::get_vehicle(&db, &self.customer_id, &input.vehicle_id)?.is_none() {
            return Err(Rejection(format!("unknown vehicle: {}", input.vehicle_id)).into());
        }

        let center = queries::get_service_center(&db, &input.service_center_id)?
            .ok_or_else(|| Rejection(format!("unknown service center: {}", input.service_center_id)))?;

        if !is_known_slot(&input.time_slot) {
            return Err(Rejection(format!("unknown time slot: {}", input.time_slot)).into());
        }

        let booked = queries::booked_time_slots(&db, &center.id, &input.date)?;
        if booked.iter().any(|b| *b == input.time_slot) {
            return Err(Rejection(format!(
                "time slot {} on {} is already booked at {}",
                input.time_slot, input.date, center.name
            ))
            .into());
        }

        let appointment = Appointment {
            id: format!("apt-{}", uuid::Uuid::new_v4()),
            vehicle_id: input.vehicle_id,
            customer_id: self.customer_id.clone(),
            service_center_id: center.id.clone(),
            service_center: Some(center),
            date: input.date,
            time_slot: input.time_slot,
            status: AppointmentStatus::Scheduled,
            issue_id: input.issue_id,
            service_type: input.service_type,
            notes: input.notes,
            created_at: Utc::now(),
        };

        queries::create_appointment(&db, &appointment)?;

        tracing::info!(
            appointment_id = %appointment.id,
            vehicle_id = %appointment.vehicle_id,
            service_center_id = %appointment.service_center_id,
            "appointment created"
        );

        Ok(appointment)
    }
}
