// libs/appointment-cell/src/store/memory.rs
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AppointmentError, AppointmentRequest, Confirmation, Doctor, RequestStatus, SlotTuple,
    TimeSlot, TimeSlotId,
};
use crate::store::{AppointmentStore, ConfirmOutcome, DoctorDirectory, RequestFilter, TimeSlotSource};

#[derive(Default)]
struct Tables {
    requests: HashMap<Uuid, AppointmentRequest>,
    /// Request ids per tuple in insertion order.
    by_tuple: HashMap<SlotTuple, Vec<Uuid>>,
}

impl Tables {
    fn on_tuple<'a>(&'a self, tuple: &SlotTuple) -> impl Iterator<Item = &'a AppointmentRequest> + 'a {
        self.by_tuple
            .get(tuple)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.requests.get(id))
    }
}

/// Process-local request store. Every write holds the table lock, so the
/// check-then-cascade of a confirmation is a single critical section.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    tables: RwLock<Tables>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, request: AppointmentRequest) -> Result<AppointmentRequest, AppointmentError> {
        let mut tables = self.tables.write().await;
        if tables.requests.contains_key(&request.id) {
            return Err(AppointmentError::Conflict(format!(
                "appointment request {} already exists",
                request.id
            )));
        }

        tables
            .by_tuple
            .entry(request.tuple())
            .or_default()
            .push(request.id);
        tables.requests.insert(request.id, request.clone());

        debug!("Stored appointment request {}", request.id);
        Ok(request)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AppointmentRequest>, AppointmentError> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn find_by_tuple(&self, tuple: &SlotTuple) -> Result<Vec<AppointmentRequest>, AppointmentError> {
        let tables = self.tables.read().await;
        Ok(tables.on_tuple(tuple).cloned().collect())
    }

    async fn confirmed_slot_ids(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<HashSet<TimeSlotId>, AppointmentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .requests
            .values()
            .filter(|r| {
                r.doctor_id == doctor_id
                    && r.appointment_date == date
                    && r.status == RequestStatus::Confirmed
            })
            .map(|r| r.time_slot_id)
            .collect())
    }

    async fn search(&self, filter: &RequestFilter) -> Result<Vec<AppointmentRequest>, AppointmentError> {
        let tables = self.tables.read().await;
        let mut matches: Vec<AppointmentRequest> = tables
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matches.sort_by_key(|r| (r.appointment_date, r.created_at));
        Ok(matches)
    }

    async fn count(&self, filter: &RequestFilter) -> Result<u64, AppointmentError> {
        let tables = self.tables.read().await;
        Ok(tables.requests.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: RequestStatus,
    ) -> Result<AppointmentRequest, AppointmentError> {
        let mut tables = self.tables.write().await;
        let current = tables
            .requests
            .get_mut(&id)
            .ok_or_else(|| AppointmentError::not_found("appointment request", id))?;

        if current.version != expected_version {
            return Err(AppointmentError::Conflict(format!(
                "appointment request {} is at version {}, expected {}",
                id, current.version, expected_version
            )));
        }

        *current = current.transitioned(status, Utc::now());
        Ok(current.clone())
    }

    async fn confirm_exclusive(
        &self,
        id: Uuid,
        expected_version: i64,
    ) -> Result<ConfirmOutcome, AppointmentError> {
        let mut tables = self.tables.write().await;

        let target = tables
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| AppointmentError::not_found("appointment request", id))?;
        let tuple = target.tuple();

        if let Some(blocking) = tables
            .on_tuple(&tuple)
            .find(|r| r.id != id && r.status == RequestStatus::Confirmed)
        {
            return Ok(ConfirmOutcome::SlotTaken {
                blocking: blocking.clone(),
            });
        }

        if target.version != expected_version || target.status != RequestStatus::Pending {
            return Ok(ConfirmOutcome::Stale { current: target });
        }

        let now = Utc::now();
        let competitors: Vec<Uuid> = tables
            .on_tuple(&tuple)
            .filter(|r| r.id != id && r.status == RequestStatus::Pending)
            .map(|r| r.id)
            .collect();

        let confirmed = target.transitioned(RequestStatus::Confirmed, now);
        tables.requests.insert(id, confirmed.clone());

        let mut cascaded = Vec::with_capacity(competitors.len());
        for competitor_id in competitors {
            if let Some(competitor) = tables.requests.get_mut(&competitor_id) {
                *competitor = competitor.transitioned(RequestStatus::Rejected, now);
                cascaded.push(competitor.clone());
            }
        }

        debug!(
            "Confirmed request {} on {} and rejected {} competitors",
            id,
            tuple,
            cascaded.len()
        );

        Ok(ConfirmOutcome::Confirmed(Confirmation { confirmed, cascaded }))
    }
}

/// Slot catalog held in memory, seeded with [`TimeSlot::default_catalog`] by default.
pub struct InMemorySlotCatalog {
    slots: RwLock<Vec<TimeSlot>>,
}

impl InMemorySlotCatalog {
    pub fn new(slots: Vec<TimeSlot>) -> Self {
        Self {
            slots: RwLock::new(slots),
        }
    }
}

impl Default for InMemorySlotCatalog {
    fn default() -> Self {
        Self::new(TimeSlot::default_catalog())
    }
}

#[async_trait]
impl TimeSlotSource for InMemorySlotCatalog {
    async fn load_slots(&self) -> Result<Vec<TimeSlot>, AppointmentError> {
        Ok(self.slots.read().await.clone())
    }

    async fn insert_slot(&self, start_time: NaiveTime, end_time: NaiveTime) -> Result<TimeSlot, AppointmentError> {
        let mut slots = self.slots.write().await;
        if let Some(clash) = slots.iter().find(|s| s.overlaps(start_time, end_time)) {
            return Err(AppointmentError::Conflict(format!(
                "slot {}-{} overlaps slot {}",
                start_time, end_time, clash.id
            )));
        }
        let id = slots.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let slot = TimeSlot::new(id, start_time, end_time);
        slots.push(slot.clone());
        Ok(slot)
    }
}

/// Fixed set of doctors, registered at startup.
#[derive(Default)]
pub struct InMemoryDoctorDirectory {
    doctors: HashMap<Uuid, Doctor>,
}

impl InMemoryDoctorDirectory {
    pub fn new(doctors: impl IntoIterator<Item = Doctor>) -> Self {
        Self {
            doctors: doctors.into_iter().map(|d| (d.id, d)).collect(),
        }
    }
}

#[async_trait]
impl DoctorDirectory for InMemoryDoctorDirectory {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError> {
        Ok(self.doctors.get(&doctor_id).cloned())
    }
}
