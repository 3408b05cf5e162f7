//! Workflow Controller
//!
//! Drives the seven-step consultation as an explicit state machine. The
//! transition function is pure; the controller performs the remote and
//! local persistence around it and only commits a new state once the remote
//! side has accepted the change.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::client::{ApiError, ConsultationApi};
use crate::clinical::ClinicalSummary;
use crate::draft_store::{DraftStore, KeyValueStore};
use crate::reconcile::{self, DraftPrompt, HydrationSource};
use crate::session::{
    CompleteOptions, CompletionReceipt, ConsultationSession, InitialSessionData, SessionStatus,
};
use crate::steps::{Step, StepData, StepPayload, STEP_COUNT};

/// Wizard state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Step(Step),
    Completing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowEvent {
    Started(Step),
    Advanced,
    Retreated,
    CompleteRequested,
    Finalized,
    Failed,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Already at the first step")]
    AtFirstStep,

    #[error("Already at the last step")]
    AtLastStep,

    #[error("Consultation can only be completed from the last step, currently at {0}")]
    NotAtLastStep(Step),

    #[error("Consultation is already completed")]
    AlreadyCompleted,

    #[error("Invalid transition from {from:?} on {event:?}")]
    Invalid {
        from: WorkflowState,
        event: WorkflowEvent,
    },
}

/// Pure state transition
pub fn transition(
    state: WorkflowState,
    event: WorkflowEvent,
) -> Result<WorkflowState, TransitionError> {
    use WorkflowEvent as E;
    use WorkflowState as S;

    match (state, event) {
        (_, E::Exited) => Ok(S::Idle),
        (S::Completed, _) => Err(TransitionError::AlreadyCompleted),
        (S::Idle | S::Error, E::Started(step)) => Ok(S::Step(step)),
        (S::Idle | S::Error, E::Failed) => Ok(S::Error),
        (S::Step(step), E::Advanced) => step
            .next()
            .map(S::Step)
            .ok_or(TransitionError::AtLastStep),
        (S::Step(step), E::Retreated) => step
            .prev()
            .map(S::Step)
            .ok_or(TransitionError::AtFirstStep),
        (S::Step(step), E::CompleteRequested) if step.is_last() => Ok(S::Completing),
        (S::Step(step), E::CompleteRequested) => Err(TransitionError::NotAtLastStep(step)),
        (S::Completing, E::Finalized) => Ok(S::Completed),
        (S::Completing, E::Failed) => Ok(S::Step(Step::last())),
        (from, event) => Err(TransitionError::Invalid { from, event }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Missing required fields for {step}: {}", .missing.join(", "))]
    Validation {
        step: Step,
        missing: Vec<&'static str>,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Remote request failed: {0}")]
    Remote(#[from] ApiError),

    #[error("No active consultation session")]
    NoSession,

    #[error("Consultation {0} is already completed")]
    AlreadyCompleted(String),
}

/// How `start` obtained its session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Created {
        session_id: String,
    },
    Resumed {
        session_id: String,
        source: HydrationSource,
        prompted: bool,
    },
}

/// Snapshot for rendering
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub state: WorkflowState,
    pub step_index: Option<usize>,
    pub step_title: Option<&'static str>,
    pub step_count: usize,
    pub session_id: Option<String>,
    pub appointment_id: Option<String>,
    pub error_message: Option<String>,
    pub clinical: ClinicalSummary,
}

pub struct WorkflowController<A, S> {
    api: A,
    drafts: DraftStore<S>,
    state: WorkflowState,
    session: Option<ConsultationSession>,
    data: StepData,
    last_error: Option<String>,
}

impl<A: ConsultationApi, S: KeyValueStore> WorkflowController<A, S> {
    pub fn new(api: A, store: S) -> Self {
        Self {
            api,
            drafts: DraftStore::new(store),
            state: WorkflowState::Idle,
            session: None,
            data: StepData::default(),
            last_error: None,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn current_step(&self) -> Option<Step> {
        match self.state {
            WorkflowState::Step(step) => Some(step),
            WorkflowState::Completing => Some(Step::last()),
            _ => None,
        }
    }

    pub fn data(&self) -> &StepData {
        &self.data
    }

    pub fn session(&self) -> Option<&ConsultationSession> {
        self.session.as_ref()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn drafts(&self) -> &DraftStore<S> {
        &self.drafts
    }

    pub fn status(&self) -> WorkflowStatus {
        let step = self.current_step();
        WorkflowStatus {
            state: self.state,
            step_index: step.map(Step::index),
            step_title: step.map(Step::title),
            step_count: STEP_COUNT,
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            appointment_id: self.session.as_ref().map(|s| s.appointment_id.clone()),
            error_message: self.last_error.clone(),
            clinical: ClinicalSummary::from_data(&self.data, Utc::now().date_naive()),
        }
    }

    /// Open the consultation for an appointment, resuming an existing one
    pub async fn start(
        &mut self,
        appointment_id: &str,
        prompt: &mut dyn DraftPrompt,
    ) -> Result<StartOutcome, WorkflowError> {
        if !matches!(self.state, WorkflowState::Idle | WorkflowState::Error) {
            return Err(TransitionError::Invalid {
                from: self.state,
                event: WorkflowEvent::Started(Step::first()),
            }
            .into());
        }

        let existing = match self.api.get_by_appointment(appointment_id).await {
            Ok(existing) => existing,
            Err(e) => return Err(self.fail_start(e.into())),
        };

        if let Some(session) = existing {
            if session.is_completed() {
                if let Err(e) = self.drafts.clear(&session.id) {
                    warn!(session_id = %session.id, "Failed to clear draft of completed session: {}", e);
                }
                return Err(self.fail_start(WorkflowError::AlreadyCompleted(session.id)));
            }

            let resolution = reconcile::reconcile(&session, &self.drafts, prompt);
            let outcome = StartOutcome::Resumed {
                session_id: session.id.clone(),
                source: resolution.source,
                prompted: resolution.prompted,
            };
            self.hydrate(session, resolution.step, resolution.data)?;
            return Ok(outcome);
        }

        let initial = match self.api.get_appointment(appointment_id).await {
            Ok(appointment) => InitialSessionData::from_appointment(&appointment),
            Err(e) => {
                warn!(appointment_id = %appointment_id, "Appointment lookup failed, starting without prefill: {}", e);
                InitialSessionData::default()
            }
        };

        let session = match self.create_with_confirmation(appointment_id, &initial).await {
            Ok(session) => session,
            Err(e) => return Err(self.fail_start(e.into())),
        };

        let outcome = StartOutcome::Created {
            session_id: session.id.clone(),
        };
        let data = session.data.clone();
        self.hydrate(session, Step::first(), data)?;
        Ok(outcome)
    }

    /// Create the session; if the backend requires a confirmed appointment,
    /// confirm it and try exactly once more
    async fn create_with_confirmation(
        &self,
        appointment_id: &str,
        initial: &InitialSessionData,
    ) -> Result<ConsultationSession, ApiError> {
        match self.api.create_session(appointment_id, initial).await {
            Ok(session) => Ok(session),
            Err(e) if e.is_unconfirmed_appointment() => {
                warn!(appointment_id = %appointment_id, "Appointment not confirmed, confirming and retrying: {}", e);
                self.api.confirm_appointment(appointment_id).await?;
                self.api.create_session(appointment_id, initial).await
            }
            Err(e) => Err(e),
        }
    }

    fn hydrate(
        &mut self,
        session: ConsultationSession,
        step: Step,
        data: StepData,
    ) -> Result<(), WorkflowError> {
        self.state = transition(self.state, WorkflowEvent::Started(step))?;
        info!(
            session_id = %session.id,
            appointment_id = %session.appointment_id,
            step = step.index(),
            "Consultation workflow started"
        );
        self.session = Some(session);
        self.data = data.normalized();
        self.last_error = None;
        Ok(())
    }

    fn fail_start(&mut self, error: WorkflowError) -> WorkflowError {
        warn!("Consultation start failed: {}", error);
        if let Ok(next) = transition(self.state, WorkflowEvent::Failed) {
            self.state = next;
        }
        self.last_error = Some(error.to_string());
        error
    }

    fn record_error(&mut self, error: WorkflowError) -> WorkflowError {
        warn!("{}", error);
        self.last_error = Some(error.to_string());
        error
    }

    fn active(&self) -> Result<(Step, String), WorkflowError> {
        match self.state {
            WorkflowState::Completed => Err(TransitionError::AlreadyCompleted.into()),
            WorkflowState::Step(step) => self
                .session
                .as_ref()
                .map(|s| (step, s.id.clone()))
                .ok_or(WorkflowError::NoSession),
            _ => Err(WorkflowError::NoSession),
        }
    }

    fn save_draft(&self, session_id: &str, step: Step) {
        if let Err(e) = self.drafts.save(session_id, step, &self.data) {
            warn!(session_id = %session_id, "Failed to save local draft: {}", e);
        }
    }

    /// Record a local edit of any step's payload
    pub fn edit(&mut self, payload: StepPayload) -> Result<(), WorkflowError> {
        let (step, session_id) = self.active()?;
        self.data.set(payload.normalized());
        self.save_draft(&session_id, step);
        Ok(())
    }

    /// Validate the current step, persist it, and move forward one step
    pub async fn next(&mut self) -> Result<Step, WorkflowError> {
        let (step, session_id) = self.active()?;

        let payload = self.data.get(step).normalized();
        let missing = payload.missing_fields();
        if !missing.is_empty() {
            return Err(self.record_error(WorkflowError::Validation { step, missing }));
        }

        let advanced = match transition(self.state, WorkflowEvent::Advanced) {
            Ok(advanced) => advanced,
            Err(e) => return Err(self.record_error(e.into())),
        };

        if let Err(e) = self.api.update_step(&session_id, step, &payload).await {
            return Err(self.record_error(e.into()));
        }

        self.state = advanced;
        self.last_error = None;
        let next_step = self.current_step().unwrap_or(step);
        self.data.set(payload.clone());
        if let Some(session) = self.session.as_mut() {
            session.current_step = next_step;
            session.data.set(payload);
        }
        self.save_draft(&session_id, next_step);
        info!(session_id = %session_id, from = step.index(), to = next_step.index(), "Step advanced");
        Ok(next_step)
    }

    /// Go back one step without validating or persisting
    pub fn prev(&mut self) -> Result<Step, WorkflowError> {
        let (step, _) = self.active()?;
        self.state = transition(self.state, WorkflowEvent::Retreated)?;
        let prev_step = self.current_step().unwrap_or(step);
        info!(from = step.index(), to = prev_step.index(), "Step retreated");
        Ok(prev_step)
    }

    /// Persist the final step and finalize the consultation
    pub async fn complete(
        &mut self,
        options: &CompleteOptions,
    ) -> Result<CompletionReceipt, WorkflowError> {
        let (step, session_id) = self.active()?;

        let completing = match transition(self.state, WorkflowEvent::CompleteRequested) {
            Ok(completing) => completing,
            Err(e) => return Err(self.record_error(e.into())),
        };

        let payload = self.data.get(step).normalized();
        let missing = payload.missing_fields();
        if !missing.is_empty() {
            return Err(self.record_error(WorkflowError::Validation { step, missing }));
        }

        // State is committed only after both calls succeed, so an abandoned
        // future leaves the wizard on the last step
        let receipt = match self.finalize(&session_id, step, &payload, options).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.state = transition(completing, WorkflowEvent::Failed)?;
                return Err(self.record_error(e.into()));
            }
        };

        self.state = transition(completing, WorkflowEvent::Finalized)?;
        self.last_error = None;
        if let Some(session) = self.session.as_mut() {
            session.status = SessionStatus::Completed;
            session.data.set(payload);
        }
        if let Err(e) = self.drafts.clear(&session_id) {
            warn!(session_id = %session_id, "Failed to clear local draft after completion: {}", e);
        }
        info!(
            session_id = %session_id,
            medical_record_id = ?receipt.medical_record_id,
            "Consultation completed"
        );
        Ok(receipt)
    }

    async fn finalize(
        &self,
        session_id: &str,
        step: Step,
        payload: &StepPayload,
        options: &CompleteOptions,
    ) -> Result<CompletionReceipt, ApiError> {
        self.api.update_step(session_id, step, payload).await?;
        self.api.complete(session_id, options).await
    }

    /// Leave the wizard; the local draft stays for later recovery
    pub fn exit(&mut self) {
        info!("Consultation workflow exited");
        self.state =
            transition(self.state, WorkflowEvent::Exited).unwrap_or(WorkflowState::Idle);
        self.session = None;
        self.data = StepData::default();
        self.last_error = None;
    }
}
