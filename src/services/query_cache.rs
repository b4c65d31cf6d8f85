use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::sync::OnceCell;

use crate::models::{Appointment, PredictedIssue, ServiceCenter, TimeSlot, Vehicle};
use crate::services::backend::BookingBackend;

struct Entry<V> {
    value: V,
    fetched_at: Instant,
}

type Slot<V> = Arc<OnceCell<Entry<V>>>;

// Concurrent callers for a key share one in-flight fetch. Failures are not
// cached and entries older than `stale_after` are refetched.
pub struct QueryCache<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
    stale_after: Duration,
}

impl<K, V> QueryCache<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stale_after,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> anyhow::Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let slot = {
            let mut entries = self.entries();
            let fresh = entries
                .get(&key)
                .filter(|slot| !self.is_stale(slot))
                .cloned();
            match fresh {
                Some(slot) => slot,
                None => {
                    tracing::debug!(key = ?key, "query cache miss");
                    let slot: Slot<V> = Arc::new(OnceCell::new());
                    entries.insert(key, Arc::clone(&slot));
                    slot
                }
            }
        };

        let entry = slot
            .get_or_try_init(|| async move {
                let value = fetch().await?;
                Ok::<_, anyhow::Error>(Entry {
                    value,
                    fetched_at: Instant::now(),
                })
            })
            .await?;

        Ok(entry.value.clone())
    }

    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries()
            .get(key)
            .and_then(|slot| slot.get().map(|entry| entry.value.clone()))
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn invalidate_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|k, _| !predicate(k));
        before - entries.len()
    }

    fn is_stale(&self, slot: &Slot<V>) -> bool {
        // A pending fetch is never stale; callers join it.
        slot.get()
            .map(|entry| entry.fetched_at.elapsed() >= self.stale_after)
            .unwrap_or(false)
    }
}

pub type SlotKey = (String, NaiveDate);
pub type IssueKey = (String, String);

pub struct QueryClient {
    backend: Arc<dyn BookingBackend>,
    vehicles: QueryCache<(), Vec<Vehicle>>,
    vehicle: QueryCache<String, Option<Vehicle>>,
    service_centers: QueryCache<(), Vec<ServiceCenter>>,
    time_slots: QueryCache<SlotKey, Vec<TimeSlot>>,
    issues: QueryCache<IssueKey, Option<PredictedIssue>>,
    predicted_issues: QueryCache<String, Vec<PredictedIssue>>,
    appointments: QueryCache<String, Vec<Appointment>>,
}

impl QueryClient {
    pub fn new(backend: Arc<dyn BookingBackend>, stale_after: Duration) -> Self {
        Self {
            backend,
            vehicles: QueryCache::new(stale_after),
            vehicle: QueryCache::new(stale_after),
            service_centers: QueryCache::new(stale_after),
            time_slots: QueryCache::new(stale_after),
            issues: QueryCache::new(stale_after),
            predicted_issues: QueryCache::new(stale_after),
            appointments: QueryCache::new(stale_after),
        }
    }

    pub fn backend(&self) -> &Arc<dyn BookingBackend> {
        &self.backend
    }

    pub async fn vehicles(&self) -> anyhow::Result<Vec<Vehicle>> {
        self.vehicles
            .get_or_fetch((), || self.backend.list_vehicles())
            .await
    }

    pub async fn vehicle(&self, vehicle_id: &str) -> anyhow::Result<Option<Vehicle>> {
        self.vehicle
            .get_or_fetch(vehicle_id.to_string(), || self.backend.get_vehicle(vehicle_id))
            .await
    }

    pub async fn service_centers(&self) -> anyhow::Result<Vec<ServiceCenter>> {
        self.service_centers
            .get_or_fetch((), || self.backend.list_service_centers())
            .await
    }

    pub async fn time_slots(
        &self,
        service_center_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<TimeSlot>> {
        self.time_slots
            .get_or_fetch((service_center_id.to_string(), date), || {
                self.backend.list_time_slots(service_center_id, date)
            })
            .await
    }

    pub fn cached_time_slots(&self, service_center_id: &str, date: NaiveDate) -> Option<Vec<TimeSlot>> {
        self.time_slots.peek(&(service_center_id.to_string(), date))
    }

    pub async fn issue(
        &self,
        vehicle_id: &str,
        issue_id: &str,
    ) -> anyhow::Result<Option<PredictedIssue>> {
        self.issues
            .get_or_fetch((vehicle_id.to_string(), issue_id.to_string()), || {
                self.backend.get_issue(vehicle_id, issue_id)
            })
            .await
    }

    pub async fn predicted_issues(&self, vehicle_id: &str) -> anyhow::Result<Vec<PredictedIssue>> {
        self.predicted_issues
            .get_or_fetch(vehicle_id.to_string(), || {
                self.backend.list_predicted_issues(vehicle_id)
            })
            .await
    }

    pub async fn appointments(&self, vehicle_id: &str) -> anyhow::Result<Vec<Appointment>> {
        self.appointments
            .get_or_fetch(vehicle_id.to_string(), || {
                self.backend.list_appointments(vehicle_id)
            })
            .await
    }

    // Drops the vehicle's appointments and the booked day's slot list.
    pub fn invalidate_after_booking(&self, appointment: &Appointment) {
        self.appointments.invalidate(&appointment.vehicle_id);
        let removed = self.time_slots.invalidate_where(|(center, date)| {
            *center == appointment.service_center_id && *date == appointment.date
        });
        tracing::debug!(
            vehicle_id = %appointment.vehicle_id,
            slot_lists = removed,
            "invalidated queries after booking"
        );
    }
}
