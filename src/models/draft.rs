use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const ISSUE_SERVICE_TYPE: &str = "Predicted Issue Service";
pub const GENERAL_SERVICE_TYPE: &str = "General Service";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    pub service_center_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub time_slot: Option<String>,
    pub service_type: String,
    pub notes: Option<String>,
}

impl BookingDraft {
    pub fn new(has_issue: bool) -> Self {
        let service_type = if has_issue {
            ISSUE_SERVICE_TYPE
        } else {
            GENERAL_SERVICE_TYPE
        };
        Self {
            service_center_id: None,
            date: None,
            time_slot: None,
            service_type: service_type.to_string(),
            notes: None,
        }
    }

    pub fn apply(&mut self, field: DraftField) {
        match field {
            DraftField::ServiceCenterId(v) => self.service_center_id = v,
            DraftField::Date(v) => {
                // Slot availability is per date
                self.date = v;
                self.time_slot = None;
            }
            DraftField::TimeSlot(v) => self.time_slot = v,
            DraftField::ServiceType(v) => self.service_type = v,
            DraftField::Notes(v) => self.notes = v,
        }
    }

    pub fn slot_key(&self) -> Option<(String, NaiveDate)> {
        match (&self.service_center_id, self.date) {
            (Some(center), Some(date)) => Some((center.clone(), date)),
            _ => None,
        }
    }

    pub fn first_missing_for_submit(&self) -> Option<MissingField> {
        if self.service_center_id.is_none() {
            return Some(MissingField::ServiceCenter);
        }
        if self.date.is_none() {
            return Some(MissingField::Date);
        }
        if self.time_slot.is_none() {
            return Some(MissingField::TimeSlot);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MissingField {
    ServiceCenter,
    Date,
    TimeSlot,
}

impl std::fmt::Display for MissingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingField::ServiceCenter => write!(f, "a service center must be selected"),
            MissingField::Date => write!(f, "a date must be selected"),
            MissingField::TimeSlot => write!(f, "a time slot must be selected"),
        }
    }
}

// `None` clears the field.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftField {
    ServiceCenterId(Option<String>),
    Date(Option<NaiveDate>),
    TimeSlot(Option<String>),
    ServiceType(String),
    Notes(Option<String>),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FieldError {
    #[error("unknown field: {0}")]
    Unknown(String),

    #[error("invalid date: {0} (expected YYYY-MM-DD)")]
    InvalidDate(String),
}

impl DraftField {
    // Blank values clear the field.
    pub fn parse(name: &str, value: &str) -> Result<Self, FieldError> {
        let trimmed = value.trim();
        let optional = || (!trimmed.is_empty()).then(|| trimmed.to_string());

        match name {
            "serviceCenterId" | "service_center_id" => Ok(DraftField::ServiceCenterId(optional())),
            "date" => {
                if trimmed.is_empty() {
                    return Ok(DraftField::Date(None));
                }
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .map(|d| DraftField::Date(Some(d)))
                    .map_err(|_| FieldError::InvalidDate(trimmed.to_string()))
            }
            "timeSlot" | "time_slot" => Ok(DraftField::TimeSlot(optional())),
            "serviceType" | "service_type" => Ok(DraftField::ServiceType(trimmed.to_string())),
            "notes" => Ok(DraftField::Notes(optional())),
            other => Err(FieldError::Unknown(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DraftField::ServiceCenterId(_) => "serviceCenterId",
            DraftField::Date(_) => "date",
            DraftField::TimeSlot(_) => "timeSlot",
            DraftField::ServiceType(_) => "serviceType",
            DraftField::Notes(_) => "notes",
        }
    }
}
