//! Reconciliation Policy
//!
//! Chooses whether a resumed workflow is hydrated from the server session or
//! from the local draft. `decide` is pure; `reconcile` loads the draft,
//! consults the user when needed and deletes a discarded draft.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::draft_store::{DraftStore, KeyValueStore};
use crate::session::{ConsultationSession, LocalDraft};
use crate::steps::{Step, StepData};

/// Answer to the "restore local draft?" prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftChoice {
    Restore,
    Discard,
    /// Prompt closed without an answer; handled as `Discard`
    Dismissed,
}

/// Asks the user whether a newer local draft should replace server state
pub trait DraftPrompt {
    fn choose(&mut self, session: &ConsultationSession, draft: &LocalDraft) -> DraftChoice;
}

impl<F> DraftPrompt for F
where
    F: FnMut(&ConsultationSession, &LocalDraft) -> DraftChoice,
{
    fn choose(&mut self, session: &ConsultationSession, draft: &LocalDraft) -> DraftChoice {
        self(session, draft)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No draft: hydrate from the server
    UseServer,
    /// Draft is stale: hydrate from the server, drop the draft silently
    DiscardStaleDraft,
    /// Draft is newer: the user decides
    AskUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HydrationSource {
    Server,
    Draft,
}

/// Outcome of reconciliation: what to hydrate the wizard with
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub source: HydrationSource,
    pub step: Step,
    pub data: StepData,
    pub prompted: bool,
    pub delete_draft: bool,
}

pub fn decide(session: &ConsultationSession, draft: Option<&LocalDraft>) -> Decision {
    match draft {
        None => Decision::UseServer,
        Some(d) if d.is_newer_than(session) => Decision::AskUser,
        Some(_) => Decision::DiscardStaleDraft,
    }
}

fn from_server(session: &ConsultationSession, prompted: bool, delete_draft: bool) -> Resolution {
    Resolution {
        source: HydrationSource::Server,
        step: session.current_step,
        data: session.data.clone(),
        prompted,
        delete_draft,
    }
}

/// Resolve without touching storage
pub fn resolve(
    session: &ConsultationSession,
    draft: Option<LocalDraft>,
    prompt: &mut dyn DraftPrompt,
) -> Resolution {
    match (decide(session, draft.as_ref()), draft) {
        (Decision::AskUser, Some(draft)) => match prompt.choose(session, &draft) {
            DraftChoice::Restore => Resolution {
                source: HydrationSource::Draft,
                // `DraftStore::load` only yields drafts with a valid step
                step: draft.step().unwrap_or(session.current_step),
                data: draft.data,
                prompted: true,
                delete_draft: false,
            },
            DraftChoice::Discard | DraftChoice::Dismissed => from_server(session, true, true),
        },
        (Decision::DiscardStaleDraft, _) => from_server(session, false, true),
        (Decision::UseServer | Decision::AskUser, _) => from_server(session, false, false),
    }
}

/// Load the session's draft, resolve, and delete the draft if it lost
pub fn reconcile<S: KeyValueStore>(
    session: &ConsultationSession,
    drafts: &DraftStore<S>,
    prompt: &mut dyn DraftPrompt,
) -> Resolution {
    // An unrestorable entry is removed here so it is not reported on every resume
    let draft = match drafts.load_or_discard(&session.id) {
        Ok(draft) => draft,
        Err(e) => {
            warn!(session_id = %session.id, "Could not read local draft: {}", e);
            None
        }
    };

    let resolution = resolve(session, draft, prompt);

    if resolution.delete_draft {
        if let Err(e) = drafts.clear(&session.id) {
            warn!(session_id = %session.id, "Failed to delete local draft: {}", e);
        }
    }

    info!(
        session_id = %session.id,
        source = ?resolution.source,
        step = resolution.step.index(),
        prompted = resolution.prompted,
        "Consultation reconciled"
    );
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft_store::MemoryStore;
    use crate::session::SessionStatus;
    use crate::steps::{IntakeData, StepPayload};
    use chrono::{DateTime, Duration, Utc};

    fn server_session(updated_at: DateTime<Utc>) -> ConsultationSession {
        let mut data = StepData::default();
        data.set(StepPayload::Intake(IntakeData {
            reason_for_visit: "server reason".to_string(),
            ..Default::default()
        }));
        ConsultationSession {
            id: "c-1".to_string(),
            appointment_id: "a-1".to_string(),
            patient: None,
            specialty: None,
            current_step: Step::Vitals,
            status: SessionStatus::InProgress,
            data,
            updated_at: Some(updated_at),
        }
    }

    fn draft_data() -> StepData {
        let mut data = StepData::default();
        data.set(StepPayload::Intake(IntakeData {
            reason_for_visit: "draft reason".to_string(),
            ..Default::default()
        }));
        data
    }

    fn never_prompt(_: &ConsultationSession, _: &LocalDraft) -> DraftChoice {
        panic!("prompt must not be shown")
    }

    #[test]
    fn test_decide() {
        let now = Utc::now();
        let session = server_session(now);
        let newer = LocalDraft {
            session_id: "c-1".to_string(),
            step_index: 3,
            data: StepData::default(),
            saved_at: now + Duration::seconds(5),
        };
        let equal = LocalDraft {
            saved_at: now,
            ..newer.clone()
        };

        assert_eq!(decide(&session, None), Decision::UseServer);
        assert_eq!(decide(&session, Some(&newer)), Decision::AskUser);
        assert_eq!(decide(&session, Some(&equal)), Decision::DiscardStaleDraft);
    }

    #[test]
    fn test_no_draft_hydrates_from_server() {
        let drafts = DraftStore::new(MemoryStore::new());
        let session = server_session(Utc::now());

        let resolution = reconcile(&session, &drafts, &mut never_prompt);
        assert_eq!(resolution.source, HydrationSource::Server);
        assert_eq!(resolution.step, Step::Vitals);
        assert_eq!(resolution.data, session.data);
        assert!(!resolution.prompted);
    }

    #[test]
    fn test_newer_draft_restore_keeps_draft() {
        let now = Utc::now();
        let drafts = DraftStore::new(MemoryStore::new());
        let session = server_session(now);
        drafts
            .save_at("c-1", Step::Soap, &draft_data(), now + Duration::minutes(2))
            .unwrap();

        let mut asked = 0;
        let mut prompt = |_: &ConsultationSession, _: &LocalDraft| {
            asked += 1;
            DraftChoice::Restore
        };
        let resolution = reconcile(&session, &drafts, &mut prompt);

        assert_eq!(asked, 1);
        assert_eq!(resolution.source, HydrationSource::Draft);
        assert_eq!(resolution.step, Step::Soap);
        assert_eq!(resolution.data.intake.reason_for_visit, "draft reason");
        assert!(drafts.load("c-1").unwrap().is_some());
    }

    #[test]
    fn test_newer_draft_discard_deletes_draft() {
        let now = Utc::now();
        let drafts = DraftStore::new(MemoryStore::new());
        let session = server_session(now);
        drafts
            .save_at("c-1", Step::Soap, &draft_data(), now + Duration::minutes(2))
            .unwrap();

        let resolution = reconcile(&session, &drafts, &mut |_: &ConsultationSession,
                                                           _: &LocalDraft| {
            DraftChoice::Discard
        });

        assert!(resolution.prompted);
        assert_eq!(resolution.source, HydrationSource::Server);
        assert_eq!(resolution.data.intake.reason_for_visit, "server reason");
        assert!(drafts.load("c-1").unwrap().is_none());
    }

    #[test]
    fn test_dismissed_prompt_discards() {
        let now = Utc::now();
        let drafts = DraftStore::new(MemoryStore::new());
        let session = server_session(now);
        drafts
            .save_at("c-1", Step::Soap, &draft_data(), now + Duration::seconds(1))
            .unwrap();

        let resolution = reconcile(&session, &drafts, &mut |_: &ConsultationSession,
                                                           _: &LocalDraft| {
            DraftChoice::Dismissed
        });

        assert_eq!(resolution.source, HydrationSource::Server);
        assert!(drafts.load("c-1").unwrap().is_none());
    }

    #[test]
    fn test_stale_draft_removed_without_prompt() {
        let now = Utc::now();
        let drafts = DraftStore::new(MemoryStore::new());
        let session = server_session(now);
        drafts
            .save_at("c-1", Step::Soap, &draft_data(), now - Duration::minutes(10))
            .unwrap();

        let resolution = reconcile(&session, &drafts, &mut never_prompt);
        assert_eq!(resolution.source, HydrationSource::Server);
        assert!(!resolution.prompted);
        assert!(drafts.load("c-1").unwrap().is_none());
    }

    #[test]
    fn test_equal_timestamps_favor_server() {
        let now = Utc::now();
        let drafts = DraftStore::new(MemoryStore::new());
        let session = server_session(now);
        drafts.save_at("c-1", Step::Soap, &draft_data(), now).unwrap();

        let resolution = reconcile(&session, &drafts, &mut never_prompt);
        assert_eq!(resolution.source, HydrationSource::Server);
        assert!(drafts.load("c-1").unwrap().is_none());
    }

    #[test]
    fn test_unreadable_draft_is_removed_without_prompt() {
        let store = MemoryStore::new();
        store
            .set(&DraftStore::<MemoryStore>::key("c-1"), "{\"session_id\": 3")
            .unwrap();
        let drafts = DraftStore::new(store);

        let resolution = reconcile(&server_session(Utc::now()), &drafts, &mut never_prompt);
        assert_eq!(resolution.source, HydrationSource::Server);
        assert!(!resolution.prompted);
        assert!(drafts.inner().get("consultation_draft_c-1").unwrap().is_none());
    }

    #[test]
    fn test_other_session_draft_untouched() {
        let now = Utc::now();
        let drafts = DraftStore::new(MemoryStore::new());
        drafts
            .save_at("c-2", Step::Soap, &draft_data(), now - Duration::minutes(10))
            .unwrap();

        reconcile(&server_session(now), &drafts, &mut never_prompt);
        assert!(drafts.load("c-2").unwrap().is_some());
    }
}
