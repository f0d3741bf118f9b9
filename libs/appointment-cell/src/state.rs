// libs/appointment-cell/src/state.rs
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, PersistenceBackend};
use shared_database::supabase::SupabaseClient;

use crate::models::{AppointmentValidationRules, Doctor};
use crate::services::booking::AppointmentBookingService;
use crate::services::catalog::SlotCatalogService;
use crate::services::notification::NotificationService;
use crate::store::{
    AppointmentStore, DoctorDirectory, InMemoryAppointmentStore, InMemoryDoctorDirectory,
    InMemorySlotCatalog, SupabaseAppointmentStore, SupabaseDoctorDirectory, SupabaseSlotCatalog,
    TimeSlotSource,
};

/// Shared handler state for the appointment routes.
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<AppointmentBookingService>,
}

impl AppointmentState {
    pub fn new(config: Arc<AppConfig>, booking: Arc<AppointmentBookingService>) -> Self {
        Self { config, booking }
    }

    /// Wire the engine against the backend selected in `config`.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let (store, slots, doctors): (
            Arc<dyn AppointmentStore>,
            Arc<dyn TimeSlotSource>,
            Arc<dyn DoctorDirectory>,
        ) = match config.persistence {
            PersistenceBackend::Supabase => {
                info!("Using Supabase appointment store at {}", config.supabase_url);
                let supabase = Arc::new(SupabaseClient::new(&config));
                (
                    Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase))),
                    Arc::new(SupabaseSlotCatalog::new(Arc::clone(&supabase))),
                    Arc::new(SupabaseDoctorDirectory::new(supabase)),
                )
            }
            PersistenceBackend::Memory => {
                let doctors = seed_doctors(&config.memory_seed_doctors);
                info!("Using in-memory appointment store with {} seeded doctors", doctors.len());
                (
                    Arc::new(InMemoryAppointmentStore::new()),
                    Arc::new(InMemorySlotCatalog::default()),
                    Arc::new(InMemoryDoctorDirectory::new(doctors)),
                )
            }
        };

        let catalog = Arc::new(SlotCatalogService::new(
            slots,
            Duration::from_secs(config.slot_catalog_cache_ttl_secs),
        ));
        let booking = AppointmentBookingService::new(
            store,
            doctors,
            catalog,
            NotificationService::from_config(&config),
        )
        .with_validation_rules(AppointmentValidationRules::from_config(&config));

        Self::new(config, Arc::new(booking))
    }
}

fn seed_doctors(entries: &[String]) -> Vec<Doctor> {
    entries
        .iter()
        .filter_map(|entry| {
            let parsed = entry.split_once(':').and_then(|(doctor_id, user_id)| {
                Some((
                    Uuid::parse_str(doctor_id.trim()).ok()?,
                    Uuid::parse_str(user_id.trim()).ok()?,
                ))
            });
            if parsed.is_none() {
                warn!("Ignoring malformed seed doctor entry '{}'", entry);
            }
            parsed
        })
        .map(|(id, user_id)| Doctor {
            id,
            user_id,
            specialty: None,
            consultation_fee: None,
        })
        .collect()
}
