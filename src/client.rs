//! Remote Consultation Client
//!
//! Thin pass-through to the consultation backend. Responses arrive as JSON
//! envelopes (`{ "success", "data", "message" }`) and are unwrapped here.
//! The backend counts steps from 1; everything above this module counts
//! from 0, and this is the only place that translates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::session::{
    Appointment, CompleteOptions, CompletionReceipt, ConsultationSession, InitialSessionData,
    PatientSummary, SessionStatus,
};
use crate::steps::{Step, StepData, StepPayload};

/// HTTP client timeout for backend requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// The backend refused to start a consultation because the appointment
    /// has not been confirmed yet
    pub fn is_unconfirmed_appointment(&self) -> bool {
        let message = match self {
            ApiError::Rejected { message, .. } | ApiError::Forbidden(message) => message,
            _ => return false,
        };
        let message = message.to_lowercase();
        UNCONFIRMED_PHRASES
            .iter()
            .any(|phrase| message.contains(phrase))
    }
}

/// Backend wordings for "the appointment has to be confirmed first"
const UNCONFIRMED_PHRASES: &[&str] = &[
    "not confirmed",
    "not been confirmed",
    "not yet confirmed",
    "unconfirmed",
    "must be confirmed",
    "needs to be confirmed",
    "only confirmed appointments",
];

/// Operations the workflow needs from the backend
#[async_trait]
pub trait ConsultationApi: Send + Sync {
    async fn create_session(
        &self,
        appointment_id: &str,
        initial: &InitialSessionData,
    ) -> Result<ConsultationSession, ApiError>;

    /// `Ok(None)` when the appointment has no consultation yet
    async fn get_by_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Option<ConsultationSession>, ApiError>;

    async fn get_by_id(&self, session_id: &str) -> Result<ConsultationSession, ApiError>;

    async fn update_step(
        &self,
        session_id: &str,
        step: Step,
        payload: &StepPayload,
    ) -> Result<(), ApiError>;

    async fn complete(
        &self,
        session_id: &str,
        options: &CompleteOptions,
    ) -> Result<CompletionReceipt, ApiError>;

    async fn get_appointment(&self, appointment_id: &str) -> Result<Appointment, ApiError>;

    async fn confirm_appointment(&self, appointment_id: &str) -> Result<(), ApiError>;
}

/// Response envelope used by every backend endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn into_optional(self) -> Result<Option<T>, ApiError> {
        if self.success == Some(false) {
            return Err(ApiError::Rejected {
                status: StatusCode::OK.as_u16(),
                message: self
                    .message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            });
        }
        Ok(self.data)
    }

    fn into_data(self) -> Result<T, ApiError> {
        self.into_optional()?
            .ok_or_else(|| ApiError::InvalidResponse("response has no data".to_string()))
    }
}

fn first_wire_step() -> u8 {
    Step::first().wire_number()
}

fn default_status() -> SessionStatus {
    SessionStatus::InProgress
}

/// Consultation as the backend sends it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDto {
    #[serde(alias = "_id")]
    id: String,
    #[serde(default)]
    appointment_id: String,
    #[serde(default)]
    patient: Option<PatientSummary>,
    #[serde(default)]
    specialty: Option<String>,
    #[serde(default = "first_wire_step")]
    current_step: u8,
    #[serde(default = "default_status")]
    status: SessionStatus,
    #[serde(default)]
    step_data: StepData,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionDto> for ConsultationSession {
    type Error = ApiError;

    fn try_from(dto: SessionDto) -> Result<Self, Self::Error> {
        let current_step = Step::from_wire_number(dto.current_step).ok_or_else(|| {
            ApiError::InvalidResponse(format!("step {} out of range", dto.current_step))
        })?;
        Ok(ConsultationSession {
            id: dto.id,
            appointment_id: dto.appointment_id,
            patient: dto.patient,
            specialty: dto.specialty,
            current_step,
            status: dto.status,
            data: dto.step_data,
            updated_at: dto.updated_at,
        })
    }
}

/// Pull a human-readable message out of an error body
fn backend_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["message"]
        .as_str()
        .or_else(|| value["error"].as_str())
        .map(|s| s.to_string())
}

/// reqwest implementation of [`ConsultationApi`]
#[derive(Debug, Clone)]
pub struct HttpConsultationClient {
    http_client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpConsultationClient {
    /// Create a client with default timeouts
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self, ApiError> {
        Self::build(base_url, api_token, REQUEST_TIMEOUT, CONNECT_TIMEOUT)
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::build(
            &config.api_base_url,
            config.api_token.clone(),
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    fn build(
        base_url: &str,
        api_token: Option<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let cleaned_url = base_url.trim_end_matches('/');

        let parsed = url::Url::parse(cleaned_url)
            .map_err(|e| ApiError::Url(format!("Invalid URL '{}': {}", cleaned_url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::Url(format!(
                "URL must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(ApiError::Url("URL must not contain credentials".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;

        info!("HttpConsultationClient created for {}", cleaned_url);

        Ok(Self {
            http_client,
            base_url: cleaned_url.to_string(),
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(request_id = %request_id, "{} {}", method, url);

        let builder = self
            .http_client
            .request(method, &url)
            .header("X-Request-Id", request_id);
        match self.api_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Read a response into its envelope, mapping error statuses
    async fn read_envelope<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Envelope<T>, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Envelope {
                    success: None,
                    data: None,
                    message: None,
                });
            }
            return Ok(serde_json::from_str(&body)?);
        }

        let message = backend_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
        debug!(status = status.as_u16(), "Backend error: {}", message);

        Err(match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized(message),
            StatusCode::FORBIDDEN => ApiError::Forbidden(message),
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            _ => ApiError::Rejected {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl ConsultationApi for HttpConsultationClient {
    async fn create_session(
        &self,
        appointment_id: &str,
        initial: &InitialSessionData,
    ) -> Result<ConsultationSession, ApiError> {
        let mut body = serde_json::to_value(initial)?;
        body["appointmentId"] = serde_json::json!(appointment_id);

        let response = self
            .request(Method::POST, "/consultations/start")
            .json(&body)
            .send()
            .await?;

        let dto: SessionDto = self.read_envelope(response).await?.into_data()?;
        let session = ConsultationSession::try_from(dto)?;
        info!(
            session_id = %session.id,
            appointment_id = %appointment_id,
            "Consultation session created"
        );
        Ok(session)
    }

    async fn get_by_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Option<ConsultationSession>, ApiError> {
        let response = self
            .request(
                Method::GET,
                &format!(
                    "/consultations/appointment/{}",
                    urlencoding::encode(appointment_id)
                ),
            )
            .send()
            .await?;

        match self.read_envelope::<SessionDto>(response).await {
            Ok(envelope) => envelope
                .into_optional()?
                .map(ConsultationSession::try_from)
                .transpose(),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_by_id(&self, session_id: &str) -> Result<ConsultationSession, ApiError> {
        let response = self
            .request(
                Method::GET,
                &format!("/consultations/{}", urlencoding::encode(session_id)),
            )
            .send()
            .await?;

        let dto: SessionDto = self.read_envelope(response).await?.into_data()?;
        ConsultationSession::try_from(dto)
    }

    async fn update_step(
        &self,
        session_id: &str,
        step: Step,
        payload: &StepPayload,
    ) -> Result<(), ApiError> {
        let step_number = step.wire_number();
        let body = serde_json::json!({
            "stepNumber": step_number,
            "data": payload.data_value()?,
        });

        let response = self
            .request(
                Method::PUT,
                &format!(
                    "/consultations/{}/step/{}",
                    urlencoding::encode(session_id),
                    step_number
                ),
            )
            .json(&body)
            .send()
            .await?;

        self.read_envelope::<serde_json::Value>(response)
            .await?
            .into_optional()?;
        debug!(session_id = %session_id, step_number, "Step saved remotely");
        Ok(())
    }

    async fn complete(
        &self,
        session_id: &str,
        options: &CompleteOptions,
    ) -> Result<CompletionReceipt, ApiError> {
        let response = self
            .request(
                Method::POST,
                &format!("/consultations/{}/complete", urlencoding::encode(session_id)),
            )
            .json(options)
            .send()
            .await?;

        let mut receipt = self
            .read_envelope::<CompletionReceipt>(response)
            .await?
            .into_optional()?
            .unwrap_or(CompletionReceipt {
                session_id: String::new(),
                medical_record_id: None,
                completed_at: None,
            });
        if receipt.session_id.is_empty() {
            receipt.session_id = session_id.to_string();
        }
        info!(session_id = %session_id, "Consultation completed remotely");
        Ok(receipt)
    }

    async fn get_appointment(&self, appointment_id: &str) -> Result<Appointment, ApiError> {
        let response = self
            .request(
                Method::GET,
                &format!("/appointments/{}", urlencoding::encode(appointment_id)),
            )
            .send()
            .await?;

        self.read_envelope(response).await?.into_data()
    }

    async fn confirm_appointment(&self, appointment_id: &str) -> Result<(), ApiError> {
        let response = self
            .request(
                Method::PATCH,
                &format!("/appointments/{}/status", urlencoding::encode(appointment_id)),
            )
            .json(&serde_json::json!({ "status": "confirmed" }))
            .send()
            .await?;

        self.read_envelope::<serde_json::Value>(response)
            .await?
            .into_optional()?;
        info!(appointment_id = %appointment_id, "Appointment marked confirmed");
        Ok(())
    }
}
