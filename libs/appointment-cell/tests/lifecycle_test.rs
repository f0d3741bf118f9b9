use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use uuid::Uuid;

use appointment_cell::clock::FixedClock;
use appointment_cell::models::*;
use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::catalog::SlotCatalogService;
use appointment_cell::services::notification::NotificationService;
use appointment_cell::store::{
    AppointmentStore, InMemoryAppointmentStore, InMemoryDoctorDirectory, InMemorySlotCatalog,
};
use shared_models::auth::Actor;

const DOCTOR_ID: Uuid = Uuid::from_u128(0xD1);
const DOCTOR_USER_ID: Uuid = Uuid::from_u128(0xD1_00);
const OTHER_DOCTOR_ID: Uuid = Uuid::from_u128(0xD2);

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 20).unwrap()
}

fn appointment_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

struct Harness {
    service: AppointmentBookingService,
    store: Arc<InMemoryAppointmentStore>,
    admin: Actor,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryAppointmentStore::new());
    let doctors = InMemoryDoctorDirectory::new([
        Doctor {
            id: DOCTOR_ID,
            user_id: DOCTOR_USER_ID,
            specialty: Some("Dermatology".to_string()),
            consultation_fee: Some(80.0),
        },
        Doctor {
            id: OTHER_DOCTOR_ID,
            user_id: Uuid::from_u128(0xD2_00),
            specialty: None,
            consultation_fee: None,
        },
    ]);
    let catalog = Arc::new(SlotCatalogService::new(
        Arc::new(InMemorySlotCatalog::default()),
        Duration::from_secs(300),
    ));

    let service = AppointmentBookingService::new(
        store.clone(),
        Arc::new(doctors),
        catalog,
        NotificationService::default(),
    )
    .with_clock(Arc::new(FixedClock::on(today())));

    Harness {
        service,
        store,
        admin: Actor::admin(Uuid::new_v4()),
    }
}

fn request_for(doctor_id: Uuid, date: NaiveDate, slot: TimeSlotId) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        doctor_id,
        appointment_date: date.to_string(),
        time_slot_id: slot,
        consultation_type: "offline".to_string(),
        patient_age: 47,
        patient_gender: "male".to_string(),
        health_info: None,
    }
}

async fn confirmed_count(store: &InMemoryAppointmentStore, tuple: SlotTuple) -> usize {
    store
        .find_by_tuple(&tuple)
        .await
        .unwrap()
        .iter()
        .filter(|r| r.status == RequestStatus::Confirmed)
        .count()
}

#[tokio::test]
async fn approval_cascades_and_blocks_a_second_approval() {
    let h = harness();
    let patient_a = Actor::patient(Uuid::new_v4());
    let patient_b = Actor::patient(Uuid::new_v4());

    let a = h
        .service
        .create(&patient_a, request_for(DOCTOR_ID, appointment_day(), 1))
        .await
        .unwrap();
    let b = h
        .service
        .create(&patient_b, request_for(DOCTOR_ID, appointment_day(), 1))
        .await
        .unwrap();
    assert_eq!(a.status, RequestStatus::Pending);
    assert_eq!(b.status, RequestStatus::Pending);

    let outcome = h.service.decide(&h.admin, a.id, Decision::Approve).await.unwrap();
    assert_eq!(outcome.request.status, RequestStatus::Confirmed);
    assert_eq!(
        outcome.cascaded_rejections.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![b.id]
    );

    let b_now = h.service.get(&patient_b, b.id).await.unwrap();
    assert_eq!(b_now.status, RequestStatus::Rejected);

    assert_matches!(
        h.service.decide(&h.admin, b.id, Decision::Approve).await,
        Err(AppointmentError::InvalidTransition {
            current: RequestStatus::Rejected,
            attempted: RequestStatus::Confirmed
        })
    );
}

#[tokio::test]
async fn many_pending_requests_coexist_on_one_tuple() {
    let h = harness();
    for _ in 0..5 {
        h.service
            .create(
                &Actor::patient(Uuid::new_v4()),
                request_for(DOCTOR_ID, appointment_day(), 2),
            )
            .await
            .unwrap();
    }

    let report = h
        .service
        .check_conflicts(
            &h.admin,
            SlotTuple {
                doctor_id: DOCTOR_ID,
                appointment_date: appointment_day(),
                time_slot_id: 2,
            },
        )
        .await
        .unwrap();
    assert!(!report.has_conflict);
    assert_eq!(report.pending.len(), 5);
}

#[tokio::test]
async fn cascade_leaves_other_tuples_alone() {
    let h = harness();
    let day = appointment_day();
    let next_day = day.succ_opt().unwrap();

    let winner = h
        .service
        .create(&Actor::patient(Uuid::new_v4()), request_for(DOCTOR_ID, day, 3))
        .await
        .unwrap();
    let other_slot = h
        .service
        .create(&Actor::patient(Uuid::new_v4()), request_for(DOCTOR_ID, day, 4))
        .await
        .unwrap();
    let other_date = h
        .service
        .create(&Actor::patient(Uuid::new_v4()), request_for(DOCTOR_ID, next_day, 3))
        .await
        .unwrap();
    let other_doctor = h
        .service
        .create(&Actor::patient(Uuid::new_v4()), request_for(OTHER_DOCTOR_ID, day, 3))
        .await
        .unwrap();

    let outcome = h.service.decide(&h.admin, winner.id, Decision::Approve).await.unwrap();
    assert!(outcome.cascaded_rejections.is_empty());

    for id in [other_slot.id, other_date.id, other_doctor.id] {
        let untouched = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(untouched.status, RequestStatus::Pending);
        assert_eq!(untouched.version, 1);
    }
}

#[tokio::test]
async fn availability_hides_only_confirmed_slots() {
    let h = harness();
    let day = appointment_day();
    let patient = Actor::patient(Uuid::new_v4());

    let confirmed = h
        .service
        .create(&patient, request_for(DOCTOR_ID, day, 1))
        .await
        .unwrap();
    h.service
        .create(&patient, request_for(DOCTOR_ID, day, 2))
        .await
        .unwrap();
    let rejected = h
        .service
        .create(&patient, request_for(DOCTOR_ID, day, 3))
        .await
        .unwrap();
    let declined = h
        .service
        .create(&patient, request_for(DOCTOR_ID, day, 4))
        .await
        .unwrap();

    h.service.decide(&h.admin, confirmed.id, Decision::Approve).await.unwrap();
    h.service.decide(&h.admin, rejected.id, Decision::Reject).await.unwrap();
    h.service.decline(&patient, declined.id).await.unwrap();

    let open: Vec<TimeSlotId> = h
        .service
        .available_slots(DOCTOR_ID, day)
        .await
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect();

    assert!(!open.contains(&1));
    assert!(open.contains(&2) && open.contains(&3) && open.contains(&4));
    assert_eq!(open.len(), 11);

    // Another doctor on the same date is unaffected
    assert_eq!(h.service.available_slots(OTHER_DOCTOR_ID, day).await.unwrap().len(), 12);
}

#[tokio::test]
async fn cancelling_a_confirmed_request_frees_the_slot() {
    let h = harness();
    let patient = Actor::patient(Uuid::new_v4());
    let day = appointment_day();

    let request = h
        .service
        .create(&patient, request_for(DOCTOR_ID, day, 5))
        .await
        .unwrap();
    h.service.decide(&h.admin, request.id, Decision::Approve).await.unwrap();
    assert!(!h
        .service
        .available_slots(DOCTOR_ID, day)
        .await
        .unwrap()
        .iter()
        .any(|s| s.id == 5));

    let cancelled = h.service.cancel(&patient, request.id).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert!(h
        .service
        .available_slots(DOCTOR_ID, day)
        .await
        .unwrap()
        .iter()
        .any(|s| s.id == 5));

    // The freed tuple can be confirmed again
    let again = h
        .service
        .create(&Actor::patient(Uuid::new_v4()), request_for(DOCTOR_ID, day, 5))
        .await
        .unwrap();
    h.service.decide(&h.admin, again.id, Decision::Approve).await.unwrap();
}

#[tokio::test]
async fn role_and_ownership_gates() {
    let h = harness();
    let owner = Actor::patient(Uuid::new_v4());
    let stranger = Actor::patient(Uuid::new_v4());
    let doctor = Actor::doctor(DOCTOR_USER_ID);

    let request = h
        .service
        .create(&owner, request_for(DOCTOR_ID, appointment_day(), 6))
        .await
        .unwrap();

    assert_matches!(h.service.cancel(&stranger, request.id).await, Err(AppointmentError::Forbidden(_)));
    assert_matches!(
        h.service.decide(&owner, request.id, Decision::Approve).await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(
        h.service.decide(&doctor, request.id, Decision::Approve).await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(h.service.get(&stranger, request.id).await, Err(AppointmentError::Forbidden(_)));

    // The assigned doctor may read it
    assert_eq!(h.service.get(&doctor, request.id).await.unwrap().id, request.id);

    // Nothing moved
    let unchanged = h.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, RequestStatus::Pending);
}

#[tokio::test]
async fn past_dated_request_fails_validation() {
    let h = harness();
    let yesterday = today().pred_opt().unwrap();

    assert_matches!(
        h.service
            .create(&Actor::patient(Uuid::new_v4()), request_for(DOCTOR_ID, yesterday, 1))
            .await,
        Err(AppointmentError::ValidationFailed(_))
    );

    // Today is still bookable
    h.service
        .create(&Actor::patient(Uuid::new_v4()), request_for(DOCTOR_ID, today(), 1))
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let h = harness();
    assert_matches!(
        h.service.decide(&h.admin, Uuid::new_v4(), Decision::Reject).await,
        Err(AppointmentError::NotFound { entity: "appointment request", .. })
    );
}

#[tokio::test]
async fn concurrent_approvals_have_exactly_one_winner() {
    let h = Arc::new(harness());
    let day = appointment_day();

    let mut pending = Vec::new();
    for _ in 0..8 {
        pending.push(
            h.service
                .create(&Actor::patient(Uuid::new_v4()), request_for(DOCTOR_ID, day, 7))
                .await
                .unwrap(),
        );
    }

    let tasks = pending.iter().map(|request| {
        let h = Arc::clone(&h);
        let id = request.id;
        tokio::spawn(async move { h.service.decide(&h.admin, id, Decision::Approve).await })
    });
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let winner_id = winners[0].request.id;

    for loser in results.iter().filter_map(|r| r.as_ref().err()) {
        match loser {
            AppointmentError::SlotTaken { blocking_request_id, .. } => {
                assert_eq!(*blocking_request_id, winner_id)
            }
            // Lost the read race: the cascade rejected it before it was loaded
            AppointmentError::InvalidTransition { current, .. } => {
                assert_eq!(*current, RequestStatus::Rejected)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    let tuple = SlotTuple {
        doctor_id: DOCTOR_ID,
        appointment_date: day,
        time_slot_id: 7,
    };
    assert_eq!(confirmed_count(&h.store, tuple).await, 1);
}

#[tokio::test]
async fn stale_version_surfaces_as_conflict() {
    let h = harness();
    let patient = Actor::patient(Uuid::new_v4());
    let request = h
        .service
        .create(&patient, request_for(DOCTOR_ID, appointment_day(), 8))
        .await
        .unwrap();

    // Someone else moves the row first
    h.store
        .update_status(request.id, request.version, RequestStatus::Pending)
        .await
        .unwrap();
    assert_matches!(
        h.store
            .update_status(request.id, request.version, RequestStatus::Cancelled)
            .await,
        Err(AppointmentError::Conflict(_))
    );

    // The service reloads and succeeds with the current version
    let cancelled = h.service.cancel(&patient, request.id).await.unwrap();
    assert_eq!(cancelled.version, 3);
}

#[tokio::test]
async fn completion_and_review_eligibility() {
    let h = harness();
    let patient = Actor::patient(Uuid::new_v4());
    let doctor = Actor::doctor(DOCTOR_USER_ID);

    let future_visit = h
        .service
        .create(&patient, request_for(DOCTOR_ID, appointment_day(), 9))
        .await
        .unwrap();
    h.service.decide(&h.admin, future_visit.id, Decision::Approve).await.unwrap();
    assert_matches!(
        h.service.complete(&doctor, future_visit.id).await,
        Err(AppointmentError::ValidationFailed(_))
    );
    assert!(!h.service.is_review_eligible(future_visit.id, patient.id).await.unwrap());

    let todays_visit = h
        .service
        .create(&patient, request_for(DOCTOR_ID, today(), 9))
        .await
        .unwrap();
    h.service.decide(&h.admin, todays_visit.id, Decision::Approve).await.unwrap();
    h.service.complete(&doctor, todays_visit.id).await.unwrap();

    assert!(h.service.is_review_eligible(todays_visit.id, patient.id).await.unwrap());
    assert!(!h.service.is_review_eligible(todays_visit.id, Uuid::new_v4()).await.unwrap());
    assert!(!h.service.is_review_eligible(Uuid::new_v4(), patient.id).await.unwrap());
}

#[tokio::test]
async fn listings_and_stats() {
    let h = harness();
    let patient = Actor::patient(Uuid::new_v4());
    let doctor = Actor::doctor(DOCTOR_USER_ID);
    let day = appointment_day();

    let early = h.service.create(&patient, request_for(DOCTOR_ID, day, 1)).await.unwrap();
    let late = h
        .service
        .create(&patient, request_for(DOCTOR_ID, day.succ_opt().unwrap(), 1))
        .await
        .unwrap();
    h.service
        .create(&Actor::patient(Uuid::new_v4()), request_for(OTHER_DOCTOR_ID, day, 1))
        .await
        .unwrap();
    h.service.decide(&h.admin, early.id, Decision::Approve).await.unwrap();

    let history = h
        .service
        .list_for_patient(&patient, PatientHistoryQuery::default())
        .await
        .unwrap();
    assert_eq!(
        history.items.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![late.id, early.id]
    );

    let confirmed_only = h
        .service
        .list_for_patient(
            &patient,
            PatientHistoryQuery {
                status: Some(RequestStatus::Confirmed),
                ..PatientHistoryQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(confirmed_only.pagination.total, 1);

    let schedule = h
        .service
        .list_for_doctor(
            &doctor,
            DOCTOR_ID,
            DoctorScheduleQuery {
                date: Some(day),
                status: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(schedule.len(), 1);
    assert_matches!(
        h.service
            .list_for_doctor(&doctor, OTHER_DOCTOR_ID, DoctorScheduleQuery::default())
            .await,
        Err(AppointmentError::Forbidden(_))
    );

    let pending = h.service.list_pending(&h.admin, PageQuery::default()).await.unwrap();
    assert_eq!(pending.pagination.total, 2);
    assert_eq!(pending.pagination.limit, 10);

    // A visit that already happened, written straight to the table
    let visited = today().pred_opt().unwrap();
    h.store
        .insert(AppointmentRequest {
            id: Uuid::new_v4(),
            doctor_id: DOCTOR_ID,
            patient_id: patient.id,
            time_slot_id: 2,
            appointment_date: visited,
            consultation_type: ConsultationType::Offline,
            patient_age: 47,
            patient_gender: PatientGender::Male,
            health_info: None,
            status: RequestStatus::Completed,
            version: 3,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let stats = h.service.stats(&h.admin).await.unwrap();
    assert_eq!(stats.pending_count, 2);
    assert_eq!(stats.confirmed_count, 1);
    assert_eq!(stats.completed_count, 1);
    assert_eq!(stats.upcoming_count, 3);
    assert_eq!(stats.past_count, 1);
    assert_eq!(stats.total(), 4);
    assert_eq!(stats.upcoming_count + stats.past_count, stats.total());

    assert_matches!(h.service.stats(&patient).await, Err(AppointmentError::Forbidden(_)));
}
