// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::AppointmentState;

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    // Slot browsing is open to anonymous visitors
    let public_routes = Router::new()
        .route("/slots", get(handlers::list_time_slots))
        .route("/available-slots/{doctor_id}", get(handlers::get_available_slots));

    let protected_routes = Router::new()
        // Request lifecycle
        .route("/", post(handlers::create_appointment_request))
        .route("/{request_id}", get(handlers::get_appointment_request))
        .route("/{request_id}/decision", patch(handlers::decide_appointment_request)) // Admin only
        .route("/{request_id}/cancel", post(handlers::cancel_appointment_request))
        .route("/{request_id}/decline", post(handlers::decline_appointment_request))
        .route("/{request_id}/complete", post(handlers::complete_appointment_request))
        .route("/{request_id}/review-eligibility", get(handlers::get_review_eligibility))

        // Listings
        .route("/pending", get(handlers::get_pending_requests)) // Admin only
        .route("/mine", get(handlers::get_my_requests))
        .route("/doctors/{doctor_id}", get(handlers::get_doctor_schedule))
        .route("/stats", get(handlers::get_appointment_stats)) // Admin only

        // Admin utilities
        .route("/conflicts/check", get(handlers::check_slot_conflicts))
        .route("/admin/slots", post(handlers::add_time_slot))

        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
