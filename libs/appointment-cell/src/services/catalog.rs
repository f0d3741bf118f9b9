// libs/appointment-cell/src/services/catalog.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use shared_models::auth::Actor;

use crate::models::{AddTimeSlotRequest, AppointmentError, TimeSlot, TimeSlotId};
use crate::store::TimeSlotSource;

struct CachedCatalog {
    slots: Arc<Vec<TimeSlot>>,
    loaded_at: Instant,
}

/// Read-mostly view of the slot catalog, cached for `ttl`.
pub struct SlotCatalogService {
    source: Arc<dyn TimeSlotSource>,
    ttl: Duration,
    cache: RwLock<Option<CachedCatalog>>,
}

impl SlotCatalogService {
    pub fn new(source: Arc<dyn TimeSlotSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// All slots ordered by start time.
    pub async fn slots(&self) -> Result<Arc<Vec<TimeSlot>>, AppointmentError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.slots));
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.slots));
            }
        }

        let mut slots = self.source.load_slots().await?;
        slots.sort_by_key(|slot| (slot.start_time, slot.id));
        debug!("Loaded {} time slots into the catalog cache", slots.len());

        let slots = Arc::new(slots);
        *cache = Some(CachedCatalog {
            slots: Arc::clone(&slots),
            loaded_at: Instant::now(),
        });
        Ok(slots)
    }

    pub async fn get_slot(&self, id: TimeSlotId) -> Result<Option<TimeSlot>, AppointmentError> {
        Ok(self.slots().await?.iter().find(|slot| slot.id == id).cloned())
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Admin-only. Rejects empty intervals and overlaps with existing slots.
    pub async fn add_slot(
        &self,
        actor: &Actor,
        request: AddTimeSlotRequest,
    ) -> Result<TimeSlot, AppointmentError> {
        if !actor.is_admin() {
            return Err(AppointmentError::forbidden("Only admins can manage time slots"));
        }

        if request.start_time >= request.end_time {
            return Err(AppointmentError::validation("Slot start must be before its end"));
        }

        self.invalidate().await;
        let existing = self.slots().await?;
        if let Some(clash) = existing
            .iter()
            .find(|slot| slot.overlaps(request.start_time, request.end_time))
        {
            return Err(AppointmentError::validation(format!(
                "Slot overlaps existing slot {} ({}-{})",
                clash.id, clash.start_time, clash.end_time
            )));
        }

        // Two admins adding at once can both pass the check above. The source
        // rejects the loser (exclusion constraint on time_slots in Postgres)
        // with Conflict.
        let slot = self
            .source
            .insert_slot(request.start_time, request.end_time)
            .await?;
        self.invalidate().await;

        info!("Added time slot {} ({}-{})", slot.id, slot.start_time, slot.end_time);
        Ok(slot)
    }
}
