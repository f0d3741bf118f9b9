// libs/appointment-cell/src/services/booking.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_models::auth::{Actor, Role};

use crate::clock::{Clock, SystemClock};
use crate::models::{
    AddTimeSlotRequest, AppointmentError, AppointmentRequest, AppointmentStats,
    AppointmentValidationRules, ConflictCheckResponse, ConsultationType, CreateAppointmentRequest,
    Decision, DecisionOutcome, DoctorScheduleQuery, Page, PageQuery, Pagination, PatientGender,
    PatientHistoryQuery, RequestStatus, SlotExclusivityPolicy, SlotTuple, TimeSlot, TimeSlotId,
};
use crate::services::availability::AvailabilityService;
use crate::services::catalog::SlotCatalogService;
use crate::services::conflict::ConflictResolutionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notification::{NotificationEvent, NotificationService};
use crate::store::{AppointmentStore, DoctorDirectory, RequestFilter};

/// Owns the request lifecycle: creation, admin decisions, patient and doctor
/// transitions, and the listings built on top of them.
pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    doctors: Arc<dyn DoctorDirectory>,
    catalog: Arc<SlotCatalogService>,
    availability_service: AvailabilityService,
    conflict_service: ConflictResolutionService,
    lifecycle_service: AppointmentLifecycleService,
    notification_service: NotificationService,
    clock: Arc<dyn Clock>,
    rules: AppointmentValidationRules,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        doctors: Arc<dyn DoctorDirectory>,
        catalog: Arc<SlotCatalogService>,
        notification_service: NotificationService,
    ) -> Self {
        Self {
            availability_service: AvailabilityService::new(
                Arc::clone(&store),
                Arc::clone(&doctors),
                Arc::clone(&catalog),
            ),
            conflict_service: ConflictResolutionService::new(Arc::clone(&store)),
            lifecycle_service: AppointmentLifecycleService::new(),
            store,
            doctors,
            catalog,
            notification_service,
            clock: Arc::new(SystemClock),
            rules: AppointmentValidationRules::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_validation_rules(mut self, rules: AppointmentValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn catalog(&self) -> &Arc<SlotCatalogService> {
        &self.catalog
    }

    // ==============================================================================
    // CREATION
    // ==============================================================================

    /// File a pending request on behalf of the calling patient.
    ///
    /// Checks run in order: doctor, date, slot, then the remaining fields.
    pub async fn create(
        &self,
        actor: &Actor,
        request: CreateAppointmentRequest,
    ) -> Result<AppointmentRequest, AppointmentError> {
        if actor.role != Role::Patient {
            return Err(AppointmentError::forbidden("Only patients can request appointments"));
        }

        if self.doctors.find_doctor(request.doctor_id).await?.is_none() {
            return Err(AppointmentError::not_found("doctor", request.doctor_id));
        }

        let appointment_date = parse_appointment_date(&request.appointment_date)?;
        let today = self.clock.today();
        if appointment_date < today {
            return Err(AppointmentError::validation(format!(
                "Appointment date {} is in the past",
                appointment_date
            )));
        }

        if self.catalog.get_slot(request.time_slot_id).await?.is_none() {
            return Err(AppointmentError::not_found("time slot", request.time_slot_id));
        }

        let consultation_type: ConsultationType = request.consultation_type.parse()?;
        let patient_gender: PatientGender = request.patient_gender.parse()?;

        if !(0..=self.rules.max_patient_age).contains(&request.patient_age) {
            return Err(AppointmentError::validation(format!(
                "Patient age must be between 0 and {}",
                self.rules.max_patient_age
            )));
        }

        let health_info = request
            .health_info
            .as_deref()
            .map(str::trim)
            .filter(|info| !info.is_empty())
            .map(str::to_string);
        if let Some(info) = &health_info {
            if info.chars().count() > self.rules.max_health_info_chars {
                return Err(AppointmentError::validation(format!(
                    "Health information is limited to {} characters",
                    self.rules.max_health_info_chars
                )));
            }
        }

        let tuple = SlotTuple {
            doctor_id: request.doctor_id,
            appointment_date,
            time_slot_id: request.time_slot_id,
        };

        if self.rules.slot_exclusivity_policy == SlotExclusivityPolicy::RejectWhenConfirmed {
            if let Some(holder) = self
                .store
                .find_by_tuple(&tuple)
                .await?
                .into_iter()
                .find(|r| r.status == RequestStatus::Confirmed)
            {
                return Err(AppointmentError::SlotTaken {
                    blocking_request_id: holder.id,
                    blocking_patient_id: holder.patient_id,
                });
            }
        }

        let now = self.clock.now();
        let created = self
            .store
            .insert(AppointmentRequest {
                id: Uuid::new_v4(),
                doctor_id: tuple.doctor_id,
                patient_id: actor.id,
                time_slot_id: tuple.time_slot_id,
                appointment_date: tuple.appointment_date,
                consultation_type,
                patient_age: request.patient_age,
                patient_gender,
                health_info,
                status: RequestStatus::Pending,
                version: 1,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!("Patient {} requested {} ({})", actor.id, tuple, created.id);
        self.notification_service
            .fire(NotificationEvent::RequestCreated { request: created.clone() });

        Ok(created)
    }

    // ==============================================================================
    // TRANSITIONS
    // ==============================================================================

    /// Admin decision on a pending request. Approval goes through the resolver
    /// and rejects every other pending request on the same tuple.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn decide(
        &self,
        actor: &Actor,
        request_id: Uuid,
        decision: Decision,
    ) -> Result<DecisionOutcome, AppointmentError> {
        if !actor.is_admin() {
            return Err(AppointmentError::forbidden("Only admins can decide on appointment requests"));
        }

        let current = self.load(request_id).await?;
        let target = decision.target_status();
        self.lifecycle_service
            .validate_status_transition(current.status, target)?;

        let outcome = match decision {
            Decision::Approve => {
                let confirmation = self.conflict_service.try_confirm(&current).await?;
                DecisionOutcome {
                    request: confirmation.confirmed,
                    cascaded_rejections: confirmation.cascaded,
                }
            }
            Decision::Reject | Decision::Decline => DecisionOutcome {
                request: self
                    .store
                    .update_status(current.id, current.version, target)
                    .await?,
                cascaded_rejections: Vec::new(),
            },
        };

        info!(
            "Admin {} moved request {} to {}",
            actor.id, request_id, outcome.request.status
        );
        self.notification_service
            .fire(NotificationEvent::status_changed(&outcome.request, current.status));
        for rejected in &outcome.cascaded_rejections {
            self.notification_service
                .fire(NotificationEvent::status_changed(rejected, RequestStatus::Pending));
        }

        Ok(outcome)
    }

    /// The owning patient withdraws a pending or confirmed request. A confirmed
    /// cancellation frees the slot.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn cancel(
        &self,
        actor: &Actor,
        request_id: Uuid,
    ) -> Result<AppointmentRequest, AppointmentError> {
        if actor.role != Role::Patient {
            return Err(AppointmentError::forbidden("Only the requesting patient can cancel"));
        }

        let current = self.load(request_id).await?;
        if !current.is_owned_by(actor.id) {
            return Err(AppointmentError::forbidden("You can only cancel your own appointment requests"));
        }

        self.transition(&current, RequestStatus::Cancelled).await
    }

    /// The owning patient or the assigned doctor turns down a pending request.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn decline(
        &self,
        actor: &Actor,
        request_id: Uuid,
    ) -> Result<AppointmentRequest, AppointmentError> {
        let current = self.load(request_id).await?;

        let allowed = match actor.role {
            Role::Patient => current.is_owned_by(actor.id),
            Role::Doctor => self.is_assigned_doctor(actor, current.doctor_id).await?,
            Role::Admin => false,
        };
        if !allowed {
            return Err(AppointmentError::forbidden(
                "Only the requesting patient or the assigned doctor can decline",
            ));
        }

        self.transition(&current, RequestStatus::Declined).await
    }

    /// The assigned doctor or an admin closes a confirmed appointment.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn complete(
        &self,
        actor: &Actor,
        request_id: Uuid,
    ) -> Result<AppointmentRequest, AppointmentError> {
        let current = self.load(request_id).await?;

        let allowed = actor.is_admin()
            || (actor.role == Role::Doctor && self.is_assigned_doctor(actor, current.doctor_id).await?);
        if !allowed {
            return Err(AppointmentError::forbidden(
                "Only the assigned doctor or an admin can complete an appointment",
            ));
        }

        self.lifecycle_service.validate_completion(
            &current,
            self.clock.today(),
            self.rules.completion_requires_occurred,
        )?;

        self.transition(&current, RequestStatus::Completed).await
    }

    async fn transition(
        &self,
        current: &AppointmentRequest,
        target: RequestStatus,
    ) -> Result<AppointmentRequest, AppointmentError> {
        self.lifecycle_service
            .validate_status_transition(current.status, target)?;

        let updated = self
            .store
            .update_status(current.id, current.version, target)
            .await?;

        debug!("Request {} moved {} -> {}", updated.id, current.status, updated.status);
        self.notification_service
            .fire(NotificationEvent::status_changed(&updated, current.status));

        Ok(updated)
    }

    // ==============================================================================
    // QUERIES
    // ==============================================================================

    /// Visible to the owning patient, the assigned doctor, and admins.
    pub async fn get(&self, actor: &Actor, request_id: Uuid) -> Result<AppointmentRequest, AppointmentError> {
        let request = self.load(request_id).await?;

        let visible = match actor.role {
            Role::Admin => true,
            Role::Patient => request.is_owned_by(actor.id),
            Role::Doctor => self.is_assigned_doctor(actor, request.doctor_id).await?,
        };
        if !visible {
            return Err(AppointmentError::forbidden("You cannot view this appointment request"));
        }

        Ok(request)
    }

    pub async fn available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, AppointmentError> {
        self.availability_service.available_slots(doctor_id, date).await
    }

    /// Admin queue of pending requests, soonest first.
    pub async fn list_pending(
        &self,
        actor: &Actor,
        query: PageQuery,
    ) -> Result<Page<AppointmentRequest>, AppointmentError> {
        if !actor.is_admin() {
            return Err(AppointmentError::forbidden("Only admins can view the pending queue"));
        }

        let mut requests = self
            .store
            .search(&RequestFilter::with_status(RequestStatus::Pending))
            .await?;
        self.sort_by_schedule(&mut requests, false).await?;

        Ok(self.paginate(requests, query.page, query.limit))
    }

    /// A doctor's requests, optionally narrowed to one date or status.
    pub async fn list_for_doctor(
        &self,
        actor: &Actor,
        doctor_id: Uuid,
        query: DoctorScheduleQuery,
    ) -> Result<Vec<AppointmentRequest>, AppointmentError> {
        let doctor = self.doctors.find_doctor(doctor_id).await?;

        // Authorize before revealing whether the doctor exists
        let allowed = actor.is_admin()
            || (actor.role == Role::Doctor && doctor.as_ref().map_or(false, |d| d.user_id == actor.id));
        if !allowed {
            return Err(AppointmentError::forbidden("You can only view your own schedule"));
        }
        if doctor.is_none() {
            return Err(AppointmentError::not_found("doctor", doctor_id));
        }

        let mut requests = self
            .store
            .search(&RequestFilter {
                doctor_id: Some(doctor_id),
                status: query.status,
                appointment_date: query.date,
                ..RequestFilter::default()
            })
            .await?;
        self.sort_by_schedule(&mut requests, false).await?;

        Ok(requests)
    }

    /// The calling patient's own requests, most recent first.
    pub async fn list_for_patient(
        &self,
        actor: &Actor,
        query: PatientHistoryQuery,
    ) -> Result<Page<AppointmentRequest>, AppointmentError> {
        if actor.role != Role::Patient {
            return Err(AppointmentError::forbidden("Only patients have appointment history"));
        }

        let mut requests = self
            .store
            .search(&RequestFilter {
                patient_id: Some(actor.id),
                status: query.status,
                ..RequestFilter::default()
            })
            .await?;
        self.sort_by_schedule(&mut requests, true).await?;

        Ok(self.paginate(requests, query.page, query.limit))
    }

    pub async fn stats(&self, actor: &Actor) -> Result<AppointmentStats, AppointmentError> {
        if !actor.is_admin() {
            return Err(AppointmentError::forbidden("Only admins can view appointment statistics"));
        }

        let today = self.clock.today();
        let mut filters: Vec<RequestFilter> = RequestStatus::ALL
            .iter()
            .map(|status| RequestFilter::with_status(*status))
            .collect();
        filters.push(RequestFilter {
            date_from: Some(today),
            ..RequestFilter::default()
        });
        filters.push(RequestFilter {
            date_before: Some(today),
            ..RequestFilter::default()
        });

        let counts = try_join_all(filters.iter().map(|filter| self.store.count(filter))).await?;
        let count_at = |i: usize| counts.get(i).copied().unwrap_or(0);

        Ok(AppointmentStats {
            pending_count: count_at(0),
            confirmed_count: count_at(1),
            rejected_count: count_at(2),
            declined_count: count_at(3),
            completed_count: count_at(4),
            cancelled_count: count_at(5),
            upcoming_count: count_at(6),
            past_count: count_at(7),
        })
    }

    /// Whether `patient_id` may review the appointment: it must be theirs and completed.
    pub async fn is_review_eligible(
        &self,
        request_id: Uuid,
        patient_id: Uuid,
    ) -> Result<bool, AppointmentError> {
        Ok(self
            .store
            .get(request_id)
            .await?
            .map_or(false, |request| {
                self.lifecycle_service.is_review_eligible(&request, patient_id)
            }))
    }

    /// Admin view of who holds or wants a tuple.
    pub async fn check_conflicts(
        &self,
        actor: &Actor,
        tuple: SlotTuple,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        if !actor.is_admin() {
            return Err(AppointmentError::forbidden("Only admins can inspect slot conflicts"));
        }
        self.conflict_service.check_conflicts(tuple).await
    }

    pub async fn list_slots(&self) -> Result<Vec<TimeSlot>, AppointmentError> {
        Ok(self.catalog.slots().await?.as_ref().clone())
    }

    pub async fn add_slot(
        &self,
        actor: &Actor,
        request: AddTimeSlotRequest,
    ) -> Result<TimeSlot, AppointmentError> {
        self.catalog.add_slot(actor, request).await
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    async fn load(&self, request_id: Uuid) -> Result<AppointmentRequest, AppointmentError> {
        self.store
            .get(request_id)
            .await?
            .ok_or_else(|| AppointmentError::not_found("appointment request", request_id))
    }

    /// Doctor actors carry their user id, never the doctor profile id.
    async fn is_assigned_doctor(&self, actor: &Actor, doctor_id: Uuid) -> Result<bool, AppointmentError> {
        if actor.role != Role::Doctor {
            return Ok(false);
        }
        Ok(self
            .doctors
            .find_doctor(doctor_id)
            .await?
            .map_or(false, |doctor| doctor.user_id == actor.id))
    }

    async fn sort_by_schedule(
        &self,
        requests: &mut [AppointmentRequest],
        newest_first: bool,
    ) -> Result<(), AppointmentError> {
        let slots = self.catalog.slots().await?;
        let starts: HashMap<TimeSlotId, NaiveTime> =
            slots.iter().map(|slot| (slot.id, slot.start_time)).collect();

        requests.sort_by_key(|r| {
            (
                r.appointment_date,
                starts.get(&r.time_slot_id).copied().unwrap_or(NaiveTime::MIN),
                r.created_at,
            )
        });
        if newest_first {
            requests.reverse();
        }
        Ok(())
    }

    fn paginate(
        &self,
        requests: Vec<AppointmentRequest>,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Page<AppointmentRequest> {
        let limit = limit
            .unwrap_or(self.rules.default_page_size)
            .clamp(1, self.rules.max_page_size);
        let page = page.unwrap_or(1).max(1);
        let total = requests.len() as u64;
        let pages = total.div_ceil(u64::from(limit)) as u32;

        let items = requests
            .into_iter()
            .skip(((page - 1) as usize).saturating_mul(limit as usize))
            .take(limit as usize)
            .collect();

        Page {
            items,
            pagination: Pagination {
                total,
                page,
                pages,
                limit,
            },
        }
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp, whose UTC date is used.
pub fn parse_appointment_date(value: &str) -> Result<NaiveDate, AppointmentError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| {
            DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc).date_naive())
        })
        .map_err(|_| {
            warn!("Rejected unparseable appointment date '{}'", value);
            AppointmentError::validation(format!(
                "Invalid appointment date '{}', expected YYYY-MM-DD",
                value
            ))
        })
}
