// libs/appointment-cell/src/store/mod.rs
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::models::{
    AppointmentError, AppointmentRequest, Confirmation, Doctor, RequestStatus, SlotTuple,
    TimeSlot, TimeSlotId,
};

pub mod memory;
pub mod supabase;

pub use memory::{InMemoryAppointmentStore, InMemoryDoctorDirectory, InMemorySlotCatalog};
pub use supabase::{SupabaseAppointmentStore, SupabaseDoctorDirectory, SupabaseSlotCatalog};

/// Filter shared by listings and counts. Every populated field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
    pub appointment_date: Option<NaiveDate>,
    /// Inclusive lower bound on the appointment date.
    pub date_from: Option<NaiveDate>,
    /// Exclusive upper bound on the appointment date.
    pub date_before: Option<NaiveDate>,
}

impl RequestFilter {
    pub fn with_status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, request: &AppointmentRequest) -> bool {
        self.doctor_id.map_or(true, |id| request.doctor_id == id)
            && self.patient_id.map_or(true, |id| request.patient_id == id)
            && self.status.map_or(true, |status| request.status == status)
            && self
                .appointment_date
                .map_or(true, |date| request.appointment_date == date)
            && self
                .date_from
                .map_or(true, |date| request.appointment_date >= date)
            && self
                .date_before
                .map_or(true, |date| request.appointment_date < date)
    }
}

/// What happened when a pending request asked for exclusive confirmation.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    Confirmed(Confirmation),
    /// Another request already holds the tuple.
    SlotTaken { blocking: AppointmentRequest },
    /// The request moved on since it was read.
    Stale { current: AppointmentRequest },
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert(&self, request: AppointmentRequest) -> Result<AppointmentRequest, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Option<AppointmentRequest>, AppointmentError>;

    /// All requests on the tuple, oldest first.
    async fn find_by_tuple(&self, tuple: &SlotTuple) -> Result<Vec<AppointmentRequest>, AppointmentError>;

    async fn confirmed_slot_ids(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<HashSet<TimeSlotId>, AppointmentError>;

    async fn search(&self, filter: &RequestFilter) -> Result<Vec<AppointmentRequest>, AppointmentError>;

    async fn count(&self, filter: &RequestFilter) -> Result<u64, AppointmentError>;

    /// Compare-and-set on `version`. A stale version yields `AppointmentError::Conflict`.
    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: RequestStatus,
    ) -> Result<AppointmentRequest, AppointmentError>;

    /// Confirm a pending request and reject its pending competitors as one atomic step.
    async fn confirm_exclusive(
        &self,
        id: Uuid,
        expected_version: i64,
    ) -> Result<ConfirmOutcome, AppointmentError>;
}

#[async_trait]
pub trait TimeSlotSource: Send + Sync {
    async fn load_slots(&self) -> Result<Vec<TimeSlot>, AppointmentError>;

    async fn insert_slot(&self, start_time: NaiveTime, end_time: NaiveTime) -> Result<TimeSlot, AppointmentError>;
}

/// Read access to doctors owned by the profile subsystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DoctorDirectory: Send + Sync {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError>;
}
