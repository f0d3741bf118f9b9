// libs/appointment-cell/src/services/notification.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use shared_config::AppConfig;

use crate::models::{AppointmentRequest, RequestStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    RequestCreated {
        request: AppointmentRequest,
    },
    RequestStatusChanged {
        request: AppointmentRequest,
        old_status: RequestStatus,
        new_status: RequestStatus,
    },
}

impl NotificationEvent {
    pub fn status_changed(request: &AppointmentRequest, old_status: RequestStatus) -> Self {
        NotificationEvent::RequestStatusChanged {
            request: request.clone(),
            old_status,
            new_status: request.status,
        }
    }

    pub fn request(&self) -> &AppointmentRequest {
        match self {
            NotificationEvent::RequestCreated { request }
            | NotificationEvent::RequestStatusChanged { request, .. } => request,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotificationError>;
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        match event {
            NotificationEvent::RequestCreated { request } => info!(
                request_id = %request.id,
                doctor_id = %request.doctor_id,
                patient_id = %request.patient_id,
                "appointment request created"
            ),
            NotificationEvent::RequestStatusChanged { request, old_status, new_status } => info!(
                request_id = %request.id,
                patient_id = %request.patient_id,
                from = %old_status,
                to = %new_status,
                "appointment request status changed"
            ),
        }
        Ok(())
    }
}

/// POSTs each event as JSON to a fixed URL.
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Delivery(format!(
                "webhook answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Fire-and-forget dispatch. Delivery failures are logged and never reach the caller.
#[derive(Clone)]
pub struct NotificationService {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationService {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match config.notification_webhook_url.as_deref() {
            Some(url) => Self::new(Arc::new(WebhookNotificationSink::new(
                url,
                Duration::from_secs(config.database_timeout_secs.max(1)),
            ))),
            None => Self::default(),
        }
    }

    pub fn fire(&self, event: NotificationEvent) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&event).await {
                warn!("Dropping notification for request {}: {}", event.request().id, e);
            }
        })
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new(Arc::new(TracingNotificationSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConsultationType, PatientGender};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> AppointmentRequest {
        let now = Utc::now();
        AppointmentRequest {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            time_slot_id: 2,
            appointment_date: NaiveDate::from_ymd_opt(2030, 9, 9).unwrap(),
            consultation_type: ConsultationType::Online,
            patient_age: 52,
            patient_gender: PatientGender::Male,
            health_info: None,
            status: RequestStatus::Confirmed,
            version: 2,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn webhook_receives_status_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/appointments"))
            .and(body_partial_json(serde_json::json!({
                "event": "request_status_changed",
                "old_status": "pending",
                "new_status": "confirmed"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let service = NotificationService::new(Arc::new(WebhookNotificationSink::new(
            format!("{}/hooks/appointments", server.uri()),
            Duration::from_secs(2),
        )));

        service
            .fire(NotificationEvent::status_changed(&request(), RequestStatus::Pending))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_delivery_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let service = NotificationService::new(Arc::new(WebhookNotificationSink::new(
            server.uri(),
            Duration::from_secs(2),
        )));

        // The spawned task completes normally even though the webhook failed.
        assert!(service
            .fire(NotificationEvent::RequestCreated { request: request() })
            .await
            .is_ok());
    }
}
