// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use tracing::{info, warn};

use crate::models::{
    AppointmentError, AppointmentRequest, Confirmation, ConflictCheckResponse, RequestStatus,
    SlotTuple,
};
use crate::store::{AppointmentStore, ConfirmOutcome};

/// Decides exclusive ownership of a (doctor, date, slot) tuple.
pub struct ConflictResolutionService {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictResolutionService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Confirm `request` as the sole holder of its tuple and reject pending competitors.
    ///
    /// Of two racing confirmations on one tuple exactly one wins; the other gets
    /// `SlotTaken` naming the winner.
    pub async fn try_confirm(
        &self,
        request: &AppointmentRequest,
    ) -> Result<Confirmation, AppointmentError> {
        match self.store.confirm_exclusive(request.id, request.version).await? {
            ConfirmOutcome::Confirmed(confirmation) => {
                info!(
                    "Request {} now holds {}; {} competing requests rejected",
                    confirmation.confirmed.id,
                    confirmation.confirmed.tuple(),
                    confirmation.cascaded.len()
                );
                Ok(confirmation)
            }
            ConfirmOutcome::SlotTaken { blocking } => {
                warn!(
                    "Request {} lost {} to request {}",
                    request.id,
                    request.tuple(),
                    blocking.id
                );
                Err(AppointmentError::SlotTaken {
                    blocking_request_id: blocking.id,
                    blocking_patient_id: blocking.patient_id,
                })
            }
            ConfirmOutcome::Stale { current } if current.status != RequestStatus::Pending => {
                Err(AppointmentError::InvalidTransition {
                    current: current.status,
                    attempted: RequestStatus::Confirmed,
                })
            }
            ConfirmOutcome::Stale { current } => Err(AppointmentError::Conflict(format!(
                "appointment request {} changed (version {} -> {})",
                request.id, request.version, current.version
            ))),
        }
    }

    /// Snapshot of who holds or wants a tuple.
    pub async fn check_conflicts(&self, tuple: SlotTuple) -> Result<ConflictCheckResponse, AppointmentError> {
        let requests = self.store.find_by_tuple(&tuple).await?;

        let confirmed = requests
            .iter()
            .find(|r| r.status == RequestStatus::Confirmed)
            .cloned();
        let pending: Vec<AppointmentRequest> = requests
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect();

        Ok(ConflictCheckResponse {
            tuple,
            has_conflict: confirmed.is_some(),
            confirmed,
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConsultationType, PatientGender};
    use crate::store::InMemoryAppointmentStore;
    use assert_matches::assert_matches;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn tuple() -> SlotTuple {
        SlotTuple {
            doctor_id: Uuid::from_u128(9),
            appointment_date: NaiveDate::from_ymd_opt(2031, 8, 20).unwrap(),
            time_slot_id: 5,
        }
    }

    fn pending(tuple: SlotTuple) -> AppointmentRequest {
        let now = Utc::now();
        AppointmentRequest {
            id: Uuid::new_v4(),
            doctor_id: tuple.doctor_id,
            patient_id: Uuid::new_v4(),
            time_slot_id: tuple.time_slot_id,
            appointment_date: tuple.appointment_date,
            consultation_type: ConsultationType::Offline,
            patient_age: 61,
            patient_gender: PatientGender::Female,
            health_info: Some("follow-up".to_string()),
            status: RequestStatus::Pending,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn racing_confirmations_have_one_winner() {
        let store: Arc<dyn AppointmentStore> = Arc::new(InMemoryAppointmentStore::new());
        let a = store.insert(pending(tuple())).await.unwrap();
        let b = store.insert(pending(tuple())).await.unwrap();
        let resolver = Arc::new(ConflictResolutionService::new(store.clone()));

        let (ra, rb) = tokio::join!(
            {
                let resolver = resolver.clone();
                let a = a.clone();
                tokio::spawn(async move { resolver.try_confirm(&a).await })
            },
            {
                let resolver = resolver.clone();
                let b = b.clone();
                tokio::spawn(async move { resolver.try_confirm(&b).await })
            }
        );
        let results = [ra.unwrap(), rb.unwrap()];

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        let winner = &winners[0].confirmed;

        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_matches!(
            loser,
            AppointmentError::SlotTaken { blocking_request_id, blocking_patient_id }
                if *blocking_request_id == winner.id && *blocking_patient_id == winner.patient_id
        );

        let check = resolver.check_conflicts(tuple()).await.unwrap();
        assert!(check.has_conflict);
        assert_eq!(check.confirmed.map(|r| r.id), Some(winner.id));
        assert!(check.pending.is_empty());
    }

    #[tokio::test]
    async fn stale_snapshot_of_a_rejected_request_is_an_invalid_transition() {
        let store: Arc<dyn AppointmentStore> = Arc::new(InMemoryAppointmentStore::new());
        let request = store.insert(pending(tuple())).await.unwrap();
        store
            .update_status(request.id, request.version, RequestStatus::Declined)
            .await
            .unwrap();

        let resolver = ConflictResolutionService::new(store);
        assert_matches!(
            resolver.try_confirm(&request).await,
            Err(AppointmentError::InvalidTransition {
                current: RequestStatus::Declined,
                attempted: RequestStatus::Confirmed
            })
        );
    }
}
