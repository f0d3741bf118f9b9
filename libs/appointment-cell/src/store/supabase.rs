// libs/appointment-cell/src/store/supabase.rs
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    AppointmentError, AppointmentRequest, Confirmation, Doctor, RequestStatus, SlotTuple,
    TimeSlot, TimeSlotId,
};
use crate::store::{AppointmentStore, ConfirmOutcome, DoctorDirectory, RequestFilter, TimeSlotSource};

const REQUESTS_TABLE: &str = "/rest/v1/appointment_requests";
const TIME_SLOTS_TABLE: &str = "/rest/v1/time_slots";
const DOCTORS_TABLE: &str = "/rest/v1/doctors";
const CONFIRM_FUNCTION: &str = "confirm_appointment_request";

fn filter_params(filter: &RequestFilter) -> Vec<String> {
    let mut params = Vec::new();
    if let Some(doctor_id) = filter.doctor_id {
        params.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(patient_id) = filter.patient_id {
        params.push(format!("patient_id=eq.{}", patient_id));
    }
    if let Some(status) = filter.status {
        params.push(format!("status=eq.{}", status));
    }
    if let Some(date) = filter.appointment_date {
        params.push(format!("appointment_date=eq.{}", date));
    }
    if let Some(date) = filter.date_from {
        params.push(format!("appointment_date=gte.{}", date));
    }
    if let Some(date) = filter.date_before {
        params.push(format!("appointment_date=lt.{}", date));
    }
    params
}

/// Appointment requests persisted in Postgres behind PostgREST.
///
/// Status changes are conditional PATCHes on `version`; confirmation runs the
/// `confirm_appointment_request` function, which locks the tuple's rows and
/// applies the cascade in one transaction.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, path: &str) -> Result<Vec<AppointmentRequest>, AppointmentError> {
        let rows: Vec<AppointmentRequest> = self
            .supabase
            .request(Method::GET, path, None, None)
            .await?;
        Ok(rows)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RpcOutcome {
    Confirmed,
    SlotTaken,
    Stale,
    NotFound,
}

#[derive(Debug, Deserialize)]
struct ConfirmRpcResult {
    outcome: RpcOutcome,
    request: Option<AppointmentRequest>,
    blocking: Option<AppointmentRequest>,
    #[serde(default)]
    cascaded: Vec<AppointmentRequest>,
}

#[derive(Debug, Deserialize)]
struct SlotIdRow {
    time_slot_id: TimeSlotId,
}

fn missing_row(outcome: &str) -> AppointmentError {
    AppointmentError::Internal(format!("{} result without a request row", outcome))
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, request: AppointmentRequest) -> Result<AppointmentRequest, AppointmentError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| AppointmentError::Internal(format!("Failed to encode request: {}", e)))?;

        let rows: Vec<AppointmentRequest> = self
            .supabase
            .request_with_headers(
                Method::POST,
                REQUESTS_TABLE,
                None,
                Some(body),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Internal("Insert returned no rows".to_string()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<AppointmentRequest>, AppointmentError> {
        let path = format!("{}?id=eq.{}", REQUESTS_TABLE, id);
        Ok(self.select(&path).await?.into_iter().next())
    }

    async fn find_by_tuple(&self, tuple: &SlotTuple) -> Result<Vec<AppointmentRequest>, AppointmentError> {
        let path = format!(
            "{}?doctor_id=eq.{}&appointment_date=eq.{}&time_slot_id=eq.{}&order=created_at.asc",
            REQUESTS_TABLE, tuple.doctor_id, tuple.appointment_date, tuple.time_slot_id
        );
        self.select(&path).await
    }

    async fn confirmed_slot_ids(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<HashSet<TimeSlotId>, AppointmentError> {
        let path = format!(
            "{}?doctor_id=eq.{}&appointment_date=eq.{}&status=eq.confirmed&select=time_slot_id",
            REQUESTS_TABLE, doctor_id, date
        );
        let rows: Vec<SlotIdRow> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await?;
        Ok(rows.into_iter().map(|row| row.time_slot_id).collect())
    }

    async fn search(&self, filter: &RequestFilter) -> Result<Vec<AppointmentRequest>, AppointmentError> {
        let mut params = filter_params(filter);
        params.push("order=appointment_date.asc,created_at.asc".to_string());
        let path = format!("{}?{}", REQUESTS_TABLE, params.join("&"));
        self.select(&path).await
    }

    async fn count(&self, filter: &RequestFilter) -> Result<u64, AppointmentError> {
        let mut params = filter_params(filter);
        params.push("select=id".to_string());
        params.push("limit=1".to_string());
        let path = format!("{}?{}", REQUESTS_TABLE, params.join("&"));

        let (_, total): (Vec<Value>, u64) = self.supabase.select_counted(&path, None).await?;
        Ok(total)
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: RequestStatus,
    ) -> Result<AppointmentRequest, AppointmentError> {
        let path = format!("{}?id=eq.{}&version=eq.{}", REQUESTS_TABLE, id, expected_version);
        let body = json!({
            "status": status,
            "version": expected_version + 1,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows: Vec<AppointmentRequest> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(body),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        rows.into_iter().next().ok_or_else(|| {
            warn!("Conditional update of request {} matched no row at version {}", id, expected_version);
            AppointmentError::Conflict(format!(
                "appointment request {} is no longer at version {}",
                id, expected_version
            ))
        })
    }

    async fn confirm_exclusive(
        &self,
        id: Uuid,
        expected_version: i64,
    ) -> Result<ConfirmOutcome, AppointmentError> {
        let params = json!({
            "p_request_id": id,
            "p_expected_version": expected_version,
        });

        let result: ConfirmRpcResult = self.supabase.rpc(CONFIRM_FUNCTION, params, None).await?;
        debug!("confirm_appointment_request({}) -> {:?}", id, result.outcome);

        match result.outcome {
            RpcOutcome::Confirmed => {
                let confirmed = result.request.ok_or_else(|| missing_row("confirmed"))?;
                Ok(ConfirmOutcome::Confirmed(Confirmation {
                    confirmed,
                    cascaded: result.cascaded,
                }))
            }
            RpcOutcome::SlotTaken => {
                let blocking = result.blocking.ok_or_else(|| missing_row("slot_taken"))?;
                Ok(ConfirmOutcome::SlotTaken { blocking })
            }
            RpcOutcome::Stale => {
                let current = result.request.ok_or_else(|| missing_row("stale"))?;
                Ok(ConfirmOutcome::Stale { current })
            }
            RpcOutcome::NotFound => Err(AppointmentError::not_found("appointment request", id)),
        }
    }
}

pub struct SupabaseSlotCatalog {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSlotCatalog {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl TimeSlotSource for SupabaseSlotCatalog {
    async fn load_slots(&self) -> Result<Vec<TimeSlot>, AppointmentError> {
        let path = format!("{}?select=id,start_time,end_time&order=start_time.asc", TIME_SLOTS_TABLE);
        let slots: Vec<TimeSlot> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await?;
        Ok(slots)
    }

    async fn insert_slot(&self, start_time: NaiveTime, end_time: NaiveTime) -> Result<TimeSlot, AppointmentError> {
        let body = json!({
            "start_time": start_time.format("%H:%M:%S").to_string(),
            "end_time": end_time.format("%H:%M:%S").to_string(),
        });

        let rows: Vec<TimeSlot> = self
            .supabase
            .request_with_headers(
                Method::POST,
                TIME_SLOTS_TABLE,
                None,
                Some(body),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Internal("Slot insert returned no rows".to_string()))
    }
}

pub struct SupabaseDoctorDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseDoctorDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl DoctorDirectory for SupabaseDoctorDirectory {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError> {
        let path = format!(
            "{}?id=eq.{}&select=id,user_id,specialty,consultation_fee",
            DOCTORS_TABLE, doctor_id
        );
        let rows: Vec<Doctor> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await?;
        Ok(rows.into_iter().next())
    }
}
