use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::models::{
    Appointment, BookingDraft, CreateAppointmentInput, DraftField, FieldError, FlowEvent,
    FlowStage, MissingField, PredictedIssue, ServiceCenter, TimeSlot, Vehicle,
};
use crate::services::backend::Rejection;
use crate::services::query_cache::{QueryClient, SlotKey};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BookingError {
    #[error("booking flow is not open")]
    NotOpen,

    #[error("cannot {event:?} while in the {} stage", .stage.as_str())]
    InvalidTransition { stage: FlowStage, event: FlowEvent },

    #[error("{0}")]
    Validation(MissingField),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("appointment date {date} must be after {today}")]
    DateNotInFuture { date: NaiveDate, today: NaiveDate },

    #[error("time slot {0} is not available")]
    SlotUnavailable(String),

    #[error("a submission is already in progress")]
    SubmissionInProgress,

    #[error("failed to create appointment: {0}")]
    Submission(String),

    #[error("appointment refused: {0}")]
    SubmissionRejected(String),
}

impl BookingError {
    fn rejected(stage: FlowStage, event: FlowEvent) -> Self {
        match stage {
            FlowStage::Closed => BookingError::NotOpen,
            FlowStage::Submitting => BookingError::SubmissionInProgress,
            _ => BookingError::InvalidTransition { stage, event },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Loadable<T> {
    Idle,
    Loading,
    Ready(T),
    Failed(String),
}

impl<T> Loadable<T> {
    fn from_result(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(v) => Loadable::Ready(v),
            Err(e) => Loadable::Failed(format!("{e:#}")),
        }
    }

    fn fail_if_loading(&mut self, message: &str) {
        if matches!(self, Loadable::Loading) {
            *self = Loadable::Failed(message.to_string());
        }
    }
}

// One open-to-close lifecycle of the flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: u64,
    pub vehicle_id: String,
    pub issue_id: Option<String>,
    pub draft: BookingDraft,
    pub vehicle: Loadable<Vehicle>,
    pub issue: Loadable<Option<PredictedIssue>>,
    pub service_centers: Loadable<Vec<ServiceCenter>>,
    pub time_slots: Loadable<Vec<TimeSlot>>,
    pub last_error: Option<String>,
}

impl Session {
    fn new(id: u64, vehicle_id: String, issue_id: Option<String>) -> Self {
        let issue = if issue_id.is_some() {
            Loadable::Loading
        } else {
            Loadable::Idle
        };
        Self {
            id,
            vehicle_id,
            draft: BookingDraft::new(issue_id.is_some()),
            issue_id,
            vehicle: Loadable::Loading,
            issue,
            service_centers: Loadable::Loading,
            time_slots: Loadable::Idle,
            last_error: None,
        }
    }

    fn appointment_input(&self) -> Result<CreateAppointmentInput, BookingError> {
        let draft = &self.draft;
        match (&draft.service_center_id, draft.date, &draft.time_slot) {
            (Some(center), Some(date), Some(slot)) => Ok(CreateAppointmentInput {
                vehicle_id: self.vehicle_id.clone(),
                service_center_id: center.clone(),
                date,
                time_slot: slot.clone(),
                issue_id: self.issue_id.clone(),
                service_type: draft.service_type.clone(),
                notes: draft.notes.clone(),
            }),
            _ => Err(BookingError::Validation(
                draft
                    .first_missing_for_submit()
                    .unwrap_or(MissingField::ServiceCenter),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSnapshot {
    pub stage: FlowStage,
    pub step: Option<u8>,
    pub session: Option<Session>,
}

struct Inner {
    stage: FlowStage,
    // Some exactly when stage != Closed
    session: Option<Session>,
    next_session_id: u64,
}

impl Inner {
    fn is_current(&self, id: u64) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(id)
    }

    fn session_mut(&mut self, id: u64) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.id == id)
    }
}

type SharedInner = Arc<Mutex<Inner>>;

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

// Three-step booking wizard for one customer. Fetches and the submission run
// on spawned tasks that own their share of the state and settle even if the
// caller goes away. Results for a closed or replaced session are dropped.
pub struct BookingFlow {
    queries: Arc<QueryClient>,
    today: Box<dyn Fn() -> NaiveDate + Send + Sync>,
    inner: SharedInner,
}

impl BookingFlow {
    pub fn new(queries: Arc<QueryClient>) -> Self {
        Self {
            queries,
            today: Box::new(|| Utc::now().date_naive()),
            inner: Arc::new(Mutex::new(Inner {
                stage: FlowStage::Closed,
                session: None,
                next_session_id: 0,
            })),
        }
    }

    // Overrides the clock used for the "date must be in the future" rule.
    pub fn with_today(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    pub fn stage(&self) -> FlowStage {
        self.inner().stage
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let inner = self.inner();
        FlowSnapshot {
            stage: inner.stage,
            step: inner.stage.step(),
            session: inner.session.clone(),
        }
    }

    // Starts a new session, replacing any open one, and loads the vehicle,
    // the service centers and the pre-selected issue. Returns the session id.
    pub async fn open(&self, vehicle_id: &str, issue_id: Option<&str>) -> u64 {
        let session_id = {
            let mut inner = self.inner();
            inner.next_session_id += 1;
            let id = inner.next_session_id;
            inner.stage = inner.stage.on(FlowEvent::Open).unwrap_or(FlowStage::Issue);
            inner.session = Some(Session::new(
                id,
                vehicle_id.to_string(),
                issue_id.map(str::to_string),
            ));
            id
        };

        tracing::info!(session = session_id, vehicle_id, issue_id = ?issue_id, "booking flow opened");

        let task = tokio::spawn(load_reference_data(
            Arc::clone(&self.queries),
            Arc::clone(&self.inner),
            session_id,
            vehicle_id.to_string(),
            issue_id.map(str::to_string),
        ));

        if let Err(e) = task.await {
            tracing::error!(session = session_id, error = %e, "reference data task failed");
            let message = format!("reference data task failed: {e}");
            let mut inner = self.inner();
            if let Some(session) = inner.session_mut(session_id) {
                session.vehicle.fail_if_loading(&message);
                session.issue.fail_if_loading(&message);
                session.service_centers.fail_if_loading(&message);
            }
        }

        session_id
    }

    pub fn set_field(&self, field: DraftField) -> Result<(), BookingError> {
        let mut inner = self.inner();
        match inner.stage {
            FlowStage::Closed => return Err(BookingError::NotOpen),
            FlowStage::Submitting => return Err(BookingError::SubmissionInProgress),
            _ => {}
        }
        let session = inner.session.as_mut().ok_or(BookingError::NotOpen)?;

        if let DraftField::TimeSlot(Some(label)) = &field {
            if let Some((center, date)) = session.draft.slot_key() {
                let taken = self
                    .queries
                    .cached_time_slots(&center, date)
                    .map(|slots| slots.iter().any(|s| s.time == *label && !s.available))
                    .unwrap_or(false);
                if taken {
                    return Err(BookingError::SlotUnavailable(label.clone()));
                }
            }
        }

        let key_before = session.draft.slot_key();
        tracing::debug!(session = session.id, field = field.name(), "draft field set");
        session.draft.apply(field);

        if session.draft.slot_key() != key_before {
            session.time_slots = Loadable::Idle;
        }
        Ok(())
    }

    pub fn set_field_by_name(&self, name: &str, value: &str) -> Result<(), BookingError> {
        self.set_field(DraftField::parse(name, value)?)
    }

    // Loads time slots for the draft's current center and date. Stays
    // `Idle` until both are chosen.
    pub async fn time_slots(&self) -> Result<Loadable<Vec<TimeSlot>>, BookingError> {
        let (session_id, key): (u64, SlotKey) = {
            let mut inner = self.inner();
            let session = inner.session.as_mut().ok_or(BookingError::NotOpen)?;
            match session.draft.slot_key() {
                Some(key) => {
                    session.time_slots = Loadable::Loading;
                    (session.id, key)
                }
                None => return Ok(Loadable::Idle),
            }
        };

        let task = tokio::spawn(load_time_slots(
            Arc::clone(&self.queries),
            Arc::clone(&self.inner),
            session_id,
            key.clone(),
        ));

        match task.await {
            Ok(slots) => Ok(slots),
            Err(e) => {
                tracing::error!(session = session_id, error = %e, "time slot task failed");
                let message = format!("time slot task failed: {e}");
                let mut inner = self.inner();
                let current = inner
                    .session_mut(session_id)
                    .filter(|s| s.draft.slot_key().as_ref() == Some(&key));
                if let Some(session) = current {
                    session.time_slots.fail_if_loading(&message);
                }
                Ok(Loadable::Failed(message))
            }
        }
    }

    pub fn advance(&self) -> Result<FlowStage, BookingError> {
        let mut inner = self.inner();
        let stage = inner.stage;
        let next = stage
            .on(FlowEvent::Advance)
            .ok_or_else(|| BookingError::rejected(stage, FlowEvent::Advance))?;

        if stage == FlowStage::Center {
            let has_center = inner
                .session
                .as_ref()
                .map(|s| s.draft.service_center_id.is_some())
                .unwrap_or(false);
            if !has_center {
                return Err(BookingError::Validation(MissingField::ServiceCenter));
            }
        }

        inner.stage = next;
        Ok(next)
    }

    // Goes back one step; from the first step this closes the flow.
    pub fn retreat(&self) -> Result<FlowStage, BookingError> {
        let mut inner = self.inner();
        let stage = inner.stage;
        let next = stage
            .on(FlowEvent::Retreat)
            .ok_or_else(|| BookingError::rejected(stage, FlowEvent::Retreat))?;

        inner.stage = next;
        if next == FlowStage::Closed {
            inner.session = None;
            tracing::info!("booking flow cancelled");
        }
        Ok(next)
    }

    pub fn close(&self) {
        let mut inner = self.inner();
        if let Some(session) = inner.session.take() {
            tracing::info!(session = session.id, "booking flow closed");
        }
        inner.stage = inner.stage.on(FlowEvent::Close).unwrap_or(FlowStage::Closed);
    }

    // Creates the appointment. On success the vehicle's appointment list is
    // invalidated and the flow closes; on failure the draft is kept and the
    // flow returns to the schedule step with the error attached. The request
    // keeps running if the caller goes away.
    pub async fn submit(&self) -> Result<Appointment, BookingError> {
        let today = (self.today)();

        let (session_id, input) = {
            let mut inner = self.inner();
            let stage = inner.stage;
            let next = stage
                .on(FlowEvent::Submit)
                .ok_or_else(|| BookingError::rejected(stage, FlowEvent::Submit))?;
            let session = inner.session.as_mut().ok_or(BookingError::NotOpen)?;

            let input = session.appointment_input()?;
            if input.date <= today {
                return Err(BookingError::DateNotInFuture {
                    date: input.date,
                    today,
                });
            }

            session.last_error = None;
            let id = session.id;
            inner.stage = next;
            (id, input)
        };

        tracing::info!(
            session = session_id,
            vehicle_id = %input.vehicle_id,
            service_center_id = %input.service_center_id,
            date = %input.date,
            "submitting appointment"
        );

        let task = tokio::spawn(create_appointment(
            Arc::clone(&self.queries),
            Arc::clone(&self.inner),
            session_id,
            input,
        ));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(session = session_id, error = %e, "submission task failed");
                settle_submission(
                    &self.inner,
                    session_id,
                    Err(BookingError::Submission(format!("submission task failed: {e}"))),
                )
            }
        }
    }
}

async fn load_reference_data(
    queries: Arc<QueryClient>,
    state: SharedInner,
    session_id: u64,
    vehicle_id: String,
    issue_id: Option<String>,
) {
    let vehicle = async {
        match queries.vehicle(&vehicle_id).await {
            Ok(Some(vehicle)) => Ok(vehicle),
            Ok(None) => Err(anyhow::anyhow!("unknown vehicle: {vehicle_id}")),
            Err(e) => Err(e),
        }
    };
    let centers = queries.service_centers();
    let issue = async {
        match &issue_id {
            Some(issue_id) => Some(queries.issue(&vehicle_id, issue_id).await),
            None => None,
        }
    };
    let (vehicle, centers, issue) = tokio::join!(vehicle, centers, issue);

    if let Err(e) = &vehicle {
        tracing::warn!(session = session_id, error = %e, "failed to load vehicle");
    }
    if let Err(e) = &centers {
        tracing::warn!(session = session_id, error = %e, "failed to load service centers");
    }
    if let Some(Err(e)) = &issue {
        tracing::warn!(session = session_id, error = %e, "failed to load issue detail");
    }

    let mut inner = lock(&state);
    match inner.session_mut(session_id) {
        Some(session) => {
            session.vehicle = Loadable::from_result(vehicle);
            session.service_centers = Loadable::from_result(centers);
            if let Some(issue) = issue {
                session.issue = Loadable::from_result(issue);
            }
        }
        None => tracing::debug!(session = session_id, "discarding stale reference data"),
    }
}

// Returns the slot list the session ends up showing: the fetched one, or
// whatever the current session holds if this fetch went stale.
async fn load_time_slots(
    queries: Arc<QueryClient>,
    state: SharedInner,
    session_id: u64,
    key: SlotKey,
) -> Loadable<Vec<TimeSlot>> {
    let result = queries.time_slots(&key.0, key.1).await;
    if let Err(e) = &result {
        tracing::warn!(
            session = session_id,
            service_center_id = %key.0,
            date = %key.1,
            error = %e,
            "failed to load time slots"
        );
    }
    let slots = Loadable::from_result(result);

    let mut inner = lock(&state);
    let current = inner
        .session_mut(session_id)
        .filter(|s| s.draft.slot_key().as_ref() == Some(&key));
    if let Some(session) = current {
        session.time_slots = slots.clone();
        return slots;
    }

    tracing::debug!(session = session_id, "discarding stale time slots");
    inner
        .session
        .as_ref()
        .map(|s| s.time_slots.clone())
        .unwrap_or(Loadable::Idle)
}

async fn create_appointment(
    queries: Arc<QueryClient>,
    state: SharedInner,
    session_id: u64,
    input: CreateAppointmentInput,
) -> Result<Appointment, BookingError> {
    let result = queries.backend().create_appointment(input).await;

    let result = match result {
        Ok(appointment) => {
            queries.invalidate_after_booking(&appointment);
            tracing::info!(
                session = session_id,
                appointment_id = %appointment.id,
                "appointment booked"
            );
            Ok(appointment)
        }
        Err(e) => {
            let message = format!("{e:#}");
            tracing::warn!(session = session_id, error = %message, "appointment submission failed");
            match e.downcast_ref::<Rejection>() {
                Some(rejection) => Err(BookingError::SubmissionRejected(rejection.to_string())),
                None => Err(BookingError::Submission(message)),
            }
        }
    };

    settle_submission(&state, session_id, result)
}

// Leaves `Submitting` for the session that started the submission. A closed
// or replaced session is left alone.
fn settle_submission(
    state: &Mutex<Inner>,
    session_id: u64,
    result: Result<Appointment, BookingError>,
) -> Result<Appointment, BookingError> {
    let mut inner = lock(state);
    let current = inner.is_current(session_id) && inner.stage == FlowStage::Submitting;

    match result {
        Ok(appointment) => {
            if current {
                inner.stage = inner
                    .stage
                    .on(FlowEvent::SubmitSucceeded)
                    .unwrap_or(FlowStage::Closed);
                inner.session = None;
            }
            Ok(appointment)
        }
        Err(err) => {
            if current {
                inner.stage = inner
                    .stage
                    .on(FlowEvent::SubmitFailed)
                    .unwrap_or(FlowStage::Schedule);
                if let Some(session) = inner.session.as_mut() {
                    session.last_error = Some(err.to_string());
                }
            }
            Err(err)
        }
    }
}
