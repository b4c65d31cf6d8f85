pub mod appointment;
pub mod draft;
pub mod flow;
pub mod issue;
pub mod service_center;
pub mod time_slot;
pub mod vehicle;

pub use appointment::{Appointment, AppointmentStatus, CreateAppointmentInput};
pub use draft::{BookingDraft, DraftField, FieldError, MissingField};
pub use flow::{FlowEvent, FlowStage};
pub use issue::{PredictedIssue, Severity};
pub use service_center::ServiceCenter;
pub use time_slot::TimeSlot;
pub use vehicle::Vehicle;
