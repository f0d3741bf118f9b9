// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Actor, Role, User};
use shared_models::error::AppError;

use crate::models::{
    AddTimeSlotRequest, CreateAppointmentRequest, DecisionRequest,
    DoctorScheduleQuery, PageQuery, PatientHistoryQuery, SlotTuple, TimeSlotId,
};
use crate::services::booking::parse_appointment_date;
use crate::state::AppointmentState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckQuery {
    pub doctor_id: Uuid,
    pub date: String,
    pub time_slot_id: TimeSlotId,
}

#[derive(Debug, Deserialize)]
pub struct ReviewEligibilityQuery {
    pub patient_id: Option<Uuid>,
}

// ==============================================================================
// PUBLIC SLOT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_time_slots(
    State(state): State<Arc<AppointmentState>>,
) -> Result<Json<Value>, AppError> {
    let slots = state.booking.list_slots().await?;

    Ok(Json(json!({
        "success": true,
        "slots": slots,
        "total": slots.len()
    })))
}

/// Slots still open for a doctor on a date. Pending requests do not hide a slot.
#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppointmentState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let raw_date = query
        .date
        .ok_or_else(|| AppError::ValidationError("Date is required".to_string()))?;
    let date = parse_appointment_date(&raw_date)?;

    let slots = state.booking.available_slots(doctor_id, date).await?;

    Ok(Json(json!({
        "success": true,
        "doctor_id": doctor_id,
        "date": date,
        "available_slots": slots
    })))
}

// ==============================================================================
// APPOINTMENT REQUEST HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment_request(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let actor = Actor::from_user(&user)?;
    let created = state.booking.create(&actor, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment_request": created,
            "message": "Appointment request submitted and awaiting approval"
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_appointment_request(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let request = state.booking.get(&actor, request_id).await?;

    Ok(Json(json!({
        "success": true,
        "status_label": request.status.user_label(),
        "appointment_request": request
    })))
}

#[axum::debug_handler]
pub async fn decide_appointment_request(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let outcome = state
        .booking
        .decide(&actor, request_id, body.decision)
        .await?;

    let cascaded: Vec<Uuid> = outcome.cascaded_rejections.iter().map(|r| r.id).collect();

    Ok(Json(json!({
        "success": true,
        "appointment_request": outcome.request,
        "cascaded_rejections": cascaded,
        "message": format!("Appointment request {}", outcome.request.status.user_label())
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment_request(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let cancelled = state.booking.cancel(&actor, request_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment_request": cancelled,
        "message": "Appointment request cancelled"
    })))
}

#[axum::debug_handler]
pub async fn decline_appointment_request(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let declined = state.booking.decline(&actor, request_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment_request": declined,
        "message": "Appointment request declined"
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment_request(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let completed = state.booking.complete(&actor, request_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment_request": completed,
        "message": "Appointment marked as completed"
    })))
}

/// Patients ask about themselves; admins may name a patient.
#[axum::debug_handler]
pub async fn get_review_eligibility(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Query(query): Query<ReviewEligibilityQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let patient_id = match (actor.role, query.patient_id) {
        (Role::Patient, None) => actor.id,
        (Role::Patient, Some(id)) if id == actor.id => actor.id,
        (Role::Admin, Some(id)) => id,
        (Role::Admin, None) => {
            return Err(AppError::ValidationError("patient_id is required".to_string()))
        }
        _ => {
            return Err(AppError::Forbidden(
                "Not authorized to check review eligibility for this patient".to_string(),
            ))
        }
    };

    let eligible = state
        .booking
        .is_review_eligible(request_id, patient_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment_request_id": request_id,
        "patient_id": patient_id,
        "eligible": eligible
    })))
}

// ==============================================================================
// LISTING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_pending_requests(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let page = state.booking.list_pending(&actor, query).await?;

    Ok(Json(json!({
        "success": true,
        "appointment_requests": page.items,
        "pagination": page.pagination
    })))
}

#[axum::debug_handler]
pub async fn get_my_requests(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Query(query): Query<PatientHistoryQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let page = state.booking.list_for_patient(&actor, query).await?;

    Ok(Json(json!({
        "success": true,
        "appointment_requests": page.items,
        "pagination": page.pagination
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_schedule(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DoctorScheduleQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let requests = state
        .booking
        .list_for_doctor(&actor, doctor_id, query)
        .await?;

    Ok(Json(json!({
        "success": true,
        "doctor_id": doctor_id,
        "appointment_requests": requests,
        "total": requests.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment_stats(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let stats = state.booking.stats(&actor).await?;

    Ok(Json(json!({
        "success": true,
        "total": stats.total(),
        "stats": stats
    })))
}

// ==============================================================================
// ADMIN UTILITY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn check_slot_conflicts(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user)?;
    let tuple = SlotTuple {
        doctor_id: query.doctor_id,
        appointment_date: parse_appointment_date(&query.date)?,
        time_slot_id: query.time_slot_id,
    };

    let report = state.booking.check_conflicts(&actor, tuple).await?;

    Ok(Json(json!({
        "success": true,
        "conflict_check": report
    })))
}

#[axum::debug_handler]
pub async fn add_time_slot(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Json(request): Json<AddTimeSlotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let actor = Actor::from_user(&user)?;
    let slot = state
        .booking
        .add_slot(&actor, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "slot": slot
        })),
    ))
}
