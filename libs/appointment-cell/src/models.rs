// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use shared_database::supabase::DatabaseError;
use shared_models::error::AppError;

pub type TimeSlotId = i32;

// ==============================================================================
// SLOT CATALOG
// ==============================================================================

/// A reusable time-of-day interval shared by every doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: TimeSlotId,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl TimeSlot {
    pub fn new(id: TimeSlotId, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self { id, start_time, end_time }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start_time < end && start < self.end_time
    }

    /// Half-hour slots from 09:00 to 12:00 and 14:00 to 17:00.
    pub fn default_catalog() -> Vec<TimeSlot> {
        let mut slots = Vec::new();
        let mut id = 1;
        for (from, to) in [(9, 12), (14, 17)] {
            for hour in from..to {
                for minute in [0, 30] {
                    let start = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
                    let end = start + chrono::Duration::minutes(30);
                    slots.push(TimeSlot::new(id, start, end));
                    id += 1;
                }
            }
        }
        slots
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTimeSlotRequest {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

// ==============================================================================
// APPOINTMENT REQUEST
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    /// Shown to users as "approved"; at most one per (doctor, date, slot).
    #[serde(alias = "approved")]
    Confirmed,
    Rejected,
    Declined,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Pending,
        RequestStatus::Confirmed,
        RequestStatus::Rejected,
        RequestStatus::Declined,
        RequestStatus::Completed,
        RequestStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Confirmed => "confirmed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Declined => "declined",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn user_label(&self) -> &'static str {
        match self {
            RequestStatus::Confirmed => "approved",
            other => other.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending | RequestStatus::Confirmed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = AppointmentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "confirmed" | "approved" => Ok(RequestStatus::Confirmed),
            "rejected" => Ok(RequestStatus::Rejected),
            "declined" => Ok(RequestStatus::Declined),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" | "canceled" => Ok(RequestStatus::Cancelled),
            other => Err(AppointmentError::ValidationFailed(format!(
                "Unknown status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationType {
    Online,
    Offline,
}

impl FromStr for ConsultationType {
    type Err = AppointmentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(ConsultationType::Online),
            "offline" => Ok(ConsultationType::Offline),
            _ => Err(AppointmentError::ValidationFailed(
                "Consultation type must be online or offline".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientGender {
    Male,
    Female,
    Other,
}

impl FromStr for PatientGender {
    type Err = AppointmentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(PatientGender::Male),
            "female" => Ok(PatientGender::Female),
            "other" => Ok(PatientGender::Other),
            _ => Err(AppointmentError::ValidationFailed(
                "Patient gender must be male, female, or other".to_string(),
            )),
        }
    }
}

/// The (doctor, date, slot) triple that may hold at most one confirmed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotTuple {
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub time_slot_id: TimeSlotId,
}

impl fmt::Display for SlotTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "doctor {} on {} slot {}",
            self.doctor_id, self.appointment_date, self.time_slot_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub time_slot_id: TimeSlotId,
    pub appointment_date: NaiveDate,
    pub consultation_type: ConsultationType,
    pub patient_age: i32,
    pub patient_gender: PatientGender,
    pub health_info: Option<String>,
    pub status: RequestStatus,
    /// Bumped on every transition; writers compare-and-swap on it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentRequest {
    pub fn tuple(&self) -> SlotTuple {
        SlotTuple {
            doctor_id: self.doctor_id,
            appointment_date: self.appointment_date,
            time_slot_id: self.time_slot_id,
        }
    }

    pub fn is_owned_by(&self, patient_id: Uuid) -> bool {
        self.patient_id == patient_id
    }

    /// Copy of this request moved to `status` at `at`, with the version bumped.
    pub fn transitioned(&self, status: RequestStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            version: self.version + 1,
            updated_at: at,
            ..self.clone()
        }
    }
}

/// Doctor reference owned by the profile subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub specialty: Option<String>,
    pub consultation_fee: Option<f64>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

/// Raw creation payload. Enumerations and the date stay textual so that
/// validation happens in a fixed order instead of at deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    pub appointment_date: String,
    pub time_slot_id: TimeSlotId,
    pub consultation_type: String,
    pub patient_age: i32,
    pub patient_gender: String,
    pub health_info: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[serde(alias = "approved")]
    Approve,
    #[serde(alias = "rejected")]
    Reject,
    #[serde(alias = "declined")]
    Decline,
}

impl Decision {
    pub fn target_status(&self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Confirmed,
            Decision::Reject => RequestStatus::Rejected,
            Decision::Decline => RequestStatus::Declined,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
}

/// Result of an admin decision; `cascaded_rejections` lists requests rejected by an approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub request: AppointmentRequest,
    pub cascaded_rejections: Vec<AppointmentRequest>,
}

/// A confirmed request plus the pending competitors it knocked out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmation {
    pub confirmed: AppointmentRequest,
    pub cascaded: Vec<AppointmentRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub tuple: SlotTuple,
    pub has_conflict: bool,
    pub confirmed: Option<AppointmentRequest>,
    pub pending: Vec<AppointmentRequest>,
}

// ==============================================================================
// LISTING AND STATISTICS MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientHistoryQuery {
    pub status: Option<RequestStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorScheduleQuery {
    pub date: Option<NaiveDate>,
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub pages: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentStats {
    pub pending_count: u64,
    pub confirmed_count: u64,
    pub rejected_count: u64,
    pub declined_count: u64,
    pub completed_count: u64,
    pub cancelled_count: u64,
    pub upcoming_count: u64,
    pub past_count: u64,
}

impl AppointmentStats {
    pub fn total(&self) -> u64 {
        self.pending_count
            + self.confirmed_count
            + self.rejected_count
            + self.declined_count
            + self.completed_count
            + self.cancelled_count
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cannot move appointment request from '{current}' to '{attempted}'")]
    InvalidTransition {
        current: RequestStatus,
        attempted: RequestStatus,
    },

    #[error("Time slot already booked by request {blocking_request_id} for patient {blocking_patient_id}")]
    SlotTaken {
        blocking_request_id: Uuid,
        blocking_patient_id: Uuid,
    },

    #[error("Appointment request was modified concurrently: {0}")]
    Conflict(String),

    #[error("Storage temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Storage failure: {0}")]
    Internal(String),
}

impl AppointmentError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        AppointmentError::NotFound { entity, id: id.to_string() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppointmentError::Forbidden(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppointmentError::ValidationFailed(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppointmentError::Unavailable(_) | AppointmentError::Conflict(_))
    }
}

impl From<DatabaseError> for AppointmentError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Unavailable(msg) => AppointmentError::Unavailable(msg),
            DatabaseError::Conflict(msg) => AppointmentError::Conflict(msg),
            DatabaseError::NotFound(msg) => AppointmentError::not_found("resource", msg),
            other => AppointmentError::Internal(other.to_string()),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        let message = e.to_string();
        match e {
            AppointmentError::NotFound { .. } => AppError::NotFound(message),
            AppointmentError::ValidationFailed(_) => AppError::ValidationError(message),
            AppointmentError::Forbidden(_) => AppError::Forbidden(message),
            AppointmentError::InvalidTransition { .. } | AppointmentError::Conflict(_) => {
                AppError::Conflict(message)
            }
            AppointmentError::SlotTaken { .. } => AppError::SlotTaken(message),
            AppointmentError::Unavailable(_) => AppError::Unavailable(message),
            AppointmentError::Internal(_) => AppError::Internal(message),
        }
    }
}

// ==============================================================================
// VALIDATION MODELS
// ==============================================================================

pub use shared_config::SlotExclusivityPolicy;

#[derive(Debug, Clone)]
pub struct AppointmentValidationRules {
    pub slot_exclusivity_policy: SlotExclusivityPolicy,
    pub completion_requires_occurred: bool,
    pub max_patient_age: i32,
    pub max_health_info_chars: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for AppointmentValidationRules {
    fn default() -> Self {
        Self {
            slot_exclusivity_policy: SlotExclusivityPolicy::ResolveAtConfirmation,
            completion_requires_occurred: true,
            max_patient_age: 150,
            max_health_info_chars: 2000,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

impl AppointmentValidationRules {
    pub fn from_config(config: &shared_config::AppConfig) -> Self {
        Self {
            slot_exclusivity_policy: config.slot_exclusivity_policy,
            completion_requires_occurred: config.completion_requires_occurred,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_is_an_alias_for_confirmed() {
        let status: RequestStatus = serde_json::from_str("\"approved\"").unwrap();
        assert_eq!(status, RequestStatus::Confirmed);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"confirmed\"");
        assert_eq!(status.user_label(), "approved");
        assert_eq!("Approved".parse::<RequestStatus>().unwrap(), RequestStatus::Confirmed);
    }

    #[test]
    fn only_pending_and_confirmed_are_live() {
        let live: Vec<_> = RequestStatus::ALL.iter().filter(|s| !s.is_terminal()).collect();
        assert_eq!(live, vec![&RequestStatus::Pending, &RequestStatus::Confirmed]);
    }

    #[test]
    fn default_catalog_is_ordered_and_disjoint() {
        let catalog = TimeSlot::default_catalog();
        assert_eq!(catalog.len(), 12);
        for pair in catalog.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
        }
        assert!(catalog.iter().all(|slot| slot.duration_minutes() == 30));
    }

    #[test]
    fn enumerations_reject_unknown_values() {
        assert!("in_person".parse::<ConsultationType>().is_err());
        assert_eq!("OFFLINE".parse::<ConsultationType>().unwrap(), ConsultationType::Offline);
        assert!("unknown".parse::<PatientGender>().is_err());
    }

    #[test]
    fn slot_taken_names_the_blocking_booking() {
        let blocking_request_id = Uuid::new_v4();
        let blocking_patient_id = Uuid::new_v4();
        let message = AppointmentError::SlotTaken {
            blocking_request_id,
            blocking_patient_id,
        }
        .to_string();
        assert!(message.contains(&blocking_request_id.to_string()));
        assert!(message.contains(&blocking_patient_id.to_string()));
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let message = AppointmentError::InvalidTransition {
            current: RequestStatus::Rejected,
            attempted: RequestStatus::Confirmed,
        }
        .to_string();
        assert!(message.contains("rejected") && message.contains("confirmed"));
    }
}
