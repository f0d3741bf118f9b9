// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::models::{AppointmentError, TimeSlot};
use crate::services::catalog::SlotCatalogService;
use crate::store::{AppointmentStore, DoctorDirectory};

/// Slots a doctor can still be booked into: the catalog minus confirmed tuples.
/// Pending requests do not hide a slot.
pub struct AvailabilityService {
    store: Arc<dyn AppointmentStore>,
    doctors: Arc<dyn DoctorDirectory>,
    catalog: Arc<SlotCatalogService>,
}

impl AvailabilityService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        doctors: Arc<dyn DoctorDirectory>,
        catalog: Arc<SlotCatalogService>,
    ) -> Self {
        Self { store, doctors, catalog }
    }

    pub async fn available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, AppointmentError> {
        let (doctor, slots, taken) = futures::try_join!(
            self.doctors.find_doctor(doctor_id),
            self.catalog.slots(),
            self.store.confirmed_slot_ids(doctor_id, date),
        )?;

        if doctor.is_none() {
            return Err(AppointmentError::not_found("doctor", doctor_id));
        }

        let available: Vec<TimeSlot> = slots
            .iter()
            .filter(|slot| !taken.contains(&slot.id))
            .cloned()
            .collect();

        debug!(
            "Doctor {} has {}/{} slots open on {}",
            doctor_id,
            available.len(),
            slots.len(),
            date
        );
        Ok(available)
    }
}
