// libs/appointment-cell/src/services/lifecycle.rs
use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{AppointmentError, AppointmentRequest, RequestStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: RequestStatus,
        new_status: RequestStatus,
    ) -> Result<(), AppointmentError> {
        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                current: current_status,
                attempted: new_status,
            });
        }

        debug!("Status transition validated: {} -> {}", current_status, new_status);
        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: RequestStatus) -> &'static [RequestStatus] {
        match current_status {
            RequestStatus::Pending => &[
                RequestStatus::Confirmed,
                RequestStatus::Rejected,
                RequestStatus::Declined,
                RequestStatus::Cancelled,
            ],
            RequestStatus::Confirmed => &[RequestStatus::Completed, RequestStatus::Cancelled],
            // Terminal states
            RequestStatus::Rejected
            | RequestStatus::Declined
            | RequestStatus::Completed
            | RequestStatus::Cancelled => &[],
        }
    }

    /// A confirmed request may be completed once its date has arrived, unless the check is disabled.
    pub fn validate_completion(
        &self,
        request: &AppointmentRequest,
        today: NaiveDate,
        requires_occurred: bool,
    ) -> Result<(), AppointmentError> {
        self.validate_status_transition(request.status, RequestStatus::Completed)?;

        if requires_occurred && request.appointment_date > today {
            return Err(AppointmentError::validation(format!(
                "Appointment on {} has not taken place yet",
                request.appointment_date
            )));
        }

        Ok(())
    }

    pub fn is_review_eligible(&self, request: &AppointmentRequest, patient_id: Uuid) -> bool {
        request.is_owned_by(patient_id) && request.status == RequestStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConsultationType, PatientGender};
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn request(status: RequestStatus, date: NaiveDate) -> AppointmentRequest {
        let now = Utc::now();
        AppointmentRequest {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::from_u128(42),
            time_slot_id: 1,
            appointment_date: date,
            consultation_type: ConsultationType::Online,
            patient_age: 25,
            patient_gender: PatientGender::Male,
            health_info: None,
            status,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn terminal_states_admit_nothing() {
        let lifecycle = AppointmentLifecycleService::new();
        for status in RequestStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for target in RequestStatus::ALL {
                assert_matches!(
                    lifecycle.validate_status_transition(*status, target),
                    Err(AppointmentError::InvalidTransition { .. })
                );
            }
        }
    }

    #[test]
    fn pending_cannot_complete_and_confirmed_cannot_reject() {
        let lifecycle = AppointmentLifecycleService::new();
        assert!(lifecycle
            .validate_status_transition(RequestStatus::Pending, RequestStatus::Completed)
            .is_err());
        assert!(lifecycle
            .validate_status_transition(RequestStatus::Confirmed, RequestStatus::Rejected)
            .is_err());
        assert!(lifecycle
            .validate_status_transition(RequestStatus::Confirmed, RequestStatus::Cancelled)
            .is_ok());
    }

    #[test]
    fn completion_waits_for_the_appointment_date() {
        let lifecycle = AppointmentLifecycleService::new();
        let today = NaiveDate::from_ymd_opt(2030, 5, 5).unwrap();
        let tomorrow = request(RequestStatus::Confirmed, today.succ_opt().unwrap());

        assert_matches!(
            lifecycle.validate_completion(&tomorrow, today, true),
            Err(AppointmentError::ValidationFailed(_))
        );
        assert!(lifecycle.validate_completion(&tomorrow, today, false).is_ok());
        assert!(lifecycle
            .validate_completion(&request(RequestStatus::Confirmed, today), today, true)
            .is_ok());
    }

    #[test]
    fn review_eligibility_requires_completed_and_owner() {
        let lifecycle = AppointmentLifecycleService::new();
        let day = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let owner = Uuid::from_u128(42);

        assert!(lifecycle.is_review_eligible(&request(RequestStatus::Completed, day), owner));
        assert!(!lifecycle.is_review_eligible(&request(RequestStatus::Confirmed, day), owner));
        assert!(!lifecycle.is_review_eligible(&request(RequestStatus::Completed, day), Uuid::new_v4()));
    }
}
