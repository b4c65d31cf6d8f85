use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Appointment, AppointmentStatus, PredictedIssue, ServiceCenter, Severity, Vehicle,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ── Service centers ──

pub fn list_service_centers(conn: &Connection) -> anyhow::Result<Vec<ServiceCenter>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, address, phone, available_services FROM service_centers ORDER BY id ASC",
    )?;

    let rows = stmt.query_map([], |row| Ok(parse_service_center_row(row)))?;

    let mut centers = vec![];
    for row in rows {
        centers.push(row??);
    }
    Ok(centers)
}

pub fn get_service_center(conn: &Connection, id: &str) -> anyhow::Result<Option<ServiceCenter>> {
    let row = conn
        .query_row(
            "SELECT id, name, address, phone, available_services FROM service_centers WHERE id = ?1",
            params![id],
            |row| Ok(parse_service_center_row(row)),
        )
        .optional()?;

    row.transpose()
}

fn parse_service_center_row(row: &rusqlite::Row) -> anyhow::Result<ServiceCenter> {
    let services_json: String = row.get(4)?;
    Ok(ServiceCenter {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        phone: row.get(3)?,
        available_services: serde_json::from_str(&services_json).unwrap_or_default(),
    })
}

// ── Vehicles ──

pub fn list_vehicles(conn: &Connection, customer_id: &str) -> anyhow::Result<Vec<Vehicle>> {
    let mut stmt = conn.prepare(
        "SELECT id, make, model, year, registration_number, vin, customer_id
         FROM vehicles WHERE customer_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![customer_id], parse_vehicle_row)?;

    let mut vehicles = vec![];
    for row in rows {
        vehicles.push(row?);
    }
    Ok(vehicles)
}

pub fn get_vehicle(
    conn: &Connection,
    customer_id: &str,
    vehicle_id: &str,
) -> anyhow::Result<Option<Vehicle>> {
    let vehicle = conn
        .query_row(
            "SELECT id, make, model, year, registration_number, vin, customer_id
             FROM vehicles WHERE id = ?1 AND customer_id = ?2",
            params![vehicle_id, customer_id],
            parse_vehicle_row,
        )
        .optional()?;
    Ok(vehicle)
}

fn parse_vehicle_row(row: &rusqlite::Row) -> rusqlite::Result<Vehicle> {
    Ok(Vehicle {
        id: row.get(0)?,
        make: row.get(1)?,
        model: row.get(2)?,
        year: row.get(3)?,
        registration_number: row.get(4)?,
        vin: row.get(5)?,
        customer_id: row.get(6)?,
    })
}

// ── Predicted issues ──

pub fn list_predicted_issues(
    conn: &Connection,
    vehicle_id: &str,
) -> anyhow::Result<Vec<PredictedIssue>> {
    let mut stmt = conn.prepare(
        "SELECT id, vehicle_id, component_name, component_id, probability, severity, description,
                recommended_service_window, estimated_cost, predicted_date
         FROM predicted_issues WHERE vehicle_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![vehicle_id], |row| Ok(parse_issue_row(row)))?;

    let mut issues = vec![];
    for row in rows {
        issues.push(row??);
    }
    Ok(issues)
}

fn parse_issue_row(row: &rusqlite::Row) -> anyhow::Result<PredictedIssue> {
    let severity: String = row.get(5)?;
    let predicted_date: Option<String> = row.get(9)?;
    Ok(PredictedIssue {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        component_name: row.get(2)?,
        component_id: row.get(3)?,
        probability: row.get(4)?,
        severity: Severity::parse(&severity),
        description: row.get(6)?,
        recommended_service_window: row.get(7)?,
        estimated_cost: row.get(8)?,
        predicted_date: predicted_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok()),
    })
}

// ── Appointments ──

pub fn create_appointment(conn: &Connection, appointment: &Appointment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, vehicle_id, customer_id, service_center_id, date, time_slot, status, issue_id, service_type, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            appointment.id,
            appointment.vehicle_id,
            appointment.customer_id,
            appointment.service_center_id,
            appointment.date.format(DATE_FORMAT).to_string(),
            appointment.time_slot,
            appointment.status.as_str(),
            appointment.issue_id,
            appointment.service_type,
            appointment.notes,
            appointment.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn list_appointments(conn: &Connection, vehicle_id: &str) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(
        "SELECT id, vehicle_id, customer_id, service_center_id, date, time_slot, status, issue_id, service_type, notes, created_at
         FROM appointments WHERE vehicle_id = ?1 ORDER BY date ASC, created_at ASC",
    )?;

    let rows = stmt.query_map(params![vehicle_id], |row| Ok(parse_appointment_row(row)))?;

    let mut appointments = vec![];
    for row in rows {
        let mut appointment = row??;
        appointment.service_center = get_service_center(conn, &appointment.service_center_id)?;
        appointments.push(appointment);
    }
    Ok(appointments)
}

pub fn booked_time_slots(
    conn: &Connection,
    service_center_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT time_slot FROM appointments
         WHERE service_center_id = ?1 AND date = ?2 AND status != 'Cancelled'",
    )?;

    let rows = stmt.query_map(
        params![service_center_id, date.format(DATE_FORMAT).to_string()],
        |row| row.get::<_, String>(0),
    )?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row?);
    }
    Ok(slots)
}

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let date_str: String = row.get(4)?;
    let status_str: String = row.get(6)?;
    let created_at_str: String = row.get(10)?;

    Ok(Appointment {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        customer_id: row.get(2)?,
        service_center_id: row.get(3)?,
        service_center: None,
        date: NaiveDate::parse_from_str(&date_str, DATE_FORMAT)?,
        time_slot: row.get(5)?,
        status: AppointmentStatus::parse(&status_str),
        issue_id: row.get(7)?,
        service_type: row.get(8)?,
        notes: row.get(9)?,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
