//! Consultation session data model shared by the client, draft store and
//! workflow controller.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::steps::{IntakeData, Step, StepData};

/// Patient snapshot captured when the session starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatientSummary {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[serde(alias = "in-progress", alias = "active")]
    InProgress,
    Completed,
}

/// Backend-tracked consultation, as cached by the client
#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationSession {
    pub id: String,
    pub appointment_id: String,
    pub patient: Option<PatientSummary>,
    pub specialty: Option<String>,
    pub current_step: Step,
    pub status: SessionStatus,
    pub data: StepData,
    /// Server last-updated time
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConsultationSession {
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Client-side recovery snapshot of an in-progress consultation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDraft {
    pub session_id: String,
    pub step_index: usize,
    pub data: StepData,
    pub saved_at: DateTime<Utc>,
}

impl LocalDraft {
    pub fn step(&self) -> Option<Step> {
        Step::from_index(self.step_index)
    }

    /// True when the draft was saved strictly after the server's last update.
    /// A session without an update time is older than any draft.
    pub fn is_newer_than(&self, session: &ConsultationSession) -> bool {
        match session.updated_at {
            Some(updated_at) => self.saved_at > updated_at,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(alias = "_id")]
    pub id: String,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub patient: Option<PatientSummary>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default, alias = "reasonForVisit")]
    pub reason: Option<String>,
}

/// Data sent when a new session is created
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialSessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake: Option<IntakeData>,
}

impl InitialSessionData {
    /// Prefill from the appointment: patient snapshot, specialty and the
    /// booked reason as the intake reason for visit
    pub fn from_appointment(appointment: &Appointment) -> Self {
        let intake = appointment
            .reason
            .as_ref()
            .filter(|r| !r.trim().is_empty())
            .map(|reason| IntakeData {
                reason_for_visit: reason.clone(),
                ..Default::default()
            });
        Self {
            patient: appointment.patient.clone(),
            specialty: appointment.specialty.clone(),
            intake,
        }
    }
}

/// Options for finalizing a consultation into a medical record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompleteOptions {
    pub create_follow_up: bool,
    pub follow_up_date: Option<NaiveDate>,
    pub notify_patient: bool,
    pub notes: Option<String>,
}

/// Result of a successful completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReceipt {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub medical_record_id: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}
