//! Consultation workflow orchestrator.
//!
//! Drives a seven-step clinical consultation against a REST backend and
//! keeps a local draft for recovery.

pub mod client;
pub mod clinical;
pub mod config;
pub mod draft_store;
pub mod reconcile;
pub mod session;
pub mod steps;
pub mod workflow;

pub use client::{ApiError, ConsultationApi, HttpConsultationClient};
pub use config::Config;
pub use draft_store::{DraftStore, FileStore, KeyValueStore, MemoryStore, StoreError};
pub use reconcile::{DraftChoice, DraftPrompt};
pub use session::{ConsultationSession, LocalDraft};
pub use steps::{Step, StepData, StepPayload};
pub use workflow::{WorkflowController, WorkflowError, WorkflowState, WorkflowStatus};
