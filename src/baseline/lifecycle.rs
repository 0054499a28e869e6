//! Baseline lifecycle: establish, archive, replace
//!
//! `establish` is the only way a baseline comes into existence: validation
//! first, then an atomic archive-then-install against the persistence
//! collaborator. Establishment is serialized per user — a concurrent attempt
//! for the same user is rejected synchronously, never queued — so two
//! racing establishments can never both archive the same active baseline or
//! leave two actives behind.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::validation::{BaselineValidationEngine, CheckFailure, ValidationOutcome};
use super::{
    ArchivedBaseline, PersonalizedThresholds, RecordingContext, ReplacementRecord,
    ValidationStatus, VocalBaseline,
};
use crate::biomarkers::demographics::VoiceDemographic;
use crate::biomarkers::VocalBiomarkers;
use crate::events::{EventSink, PipelineEvent};

/// Persistence collaborator failure.
#[derive(Debug, Clone, Error)]
#[error("baseline store failure: {0}")]
pub struct StoreError(pub String);

/// Durable store for baseline aggregates, queryable by user.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// The user's active baseline, if any.
    async fn active(&self, user_id: &str) -> Result<Option<VocalBaseline>, StoreError>;

    /// Install a new active baseline, archiving the prior in the same
    /// operation. Atomic: readers never observe the archive without the
    /// install or vice versa.
    async fn install(
        &self,
        baseline: VocalBaseline,
        archived: Option<ArchivedBaseline>,
    ) -> Result<(), StoreError>;

    /// Archived baselines for a user, most recent first.
    async fn history(&self, user_id: &str) -> Result<Vec<ArchivedBaseline>, StoreError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    active: HashMap<String, VocalBaseline>,
    /// Oldest first; reversed on read
    archived: HashMap<String, Vec<ArchivedBaseline>>,
}

/// In-memory reference implementation of [`BaselineStore`].
///
/// Applies archive and install under one lock, satisfying the atomicity
/// contract exactly.
#[derive(Default)]
pub struct InMemoryBaselineStore {
    inner: Mutex<MemoryStoreInner>,
}

impl InMemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStore for InMemoryBaselineStore {
    async fn active(&self, user_id: &str) -> Result<Option<VocalBaseline>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.active.get(user_id).cloned())
    }

    async fn install(
        &self,
        baseline: VocalBaseline,
        archived: Option<ArchivedBaseline>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(archived) = archived {
            inner
                .archived
                .entry(archived.baseline.user_id.clone())
                .or_default()
                .push(archived);
        }
        inner.active.insert(baseline.user_id.clone(), baseline);
        Ok(())
    }

    async fn history(&self, user_id: &str) -> Result<Vec<ArchivedBaseline>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = inner.archived.get(user_id).cloned().unwrap_or_default();
        records.reverse();
        Ok(records)
    }
}

/// Establishment failure (policy or persistence — never validation).
#[derive(Debug, Error)]
pub enum EstablishError {
    /// Another establish for this user is in flight; rejected synchronously
    #[error("baseline establishment already in progress for user {0}")]
    ConcurrentEstablish(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a completed establish call.
#[derive(Debug)]
pub enum EstablishOutcome {
    /// Validation passed; the baseline is now the user's active one
    Established(VocalBaseline),
    /// Validation failed; biomarkers preserved for display, failures as data
    Rejected {
        biomarkers: VocalBiomarkers,
        failures: Vec<CheckFailure>,
    },
}

/// Manages baseline establishment, archival and replacement per user.
pub struct BaselineLifecycleManager {
    store: Arc<dyn BaselineStore>,
    engine: BaselineValidationEngine,
    sink: Arc<dyn EventSink>,
    in_flight: Mutex<HashSet<String>>,
}

impl BaselineLifecycleManager {
    pub fn new(
        store: Arc<dyn BaselineStore>,
        engine: BaselineValidationEngine,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            engine,
            sink,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Validate biomarkers and, on acceptance, install them as the user's
    /// active baseline — archiving any prior active in the same atomic
    /// store operation.
    pub async fn establish(
        &self,
        user_id: &str,
        biomarkers: VocalBiomarkers,
        demographic: VoiceDemographic,
        context: RecordingContext,
    ) -> Result<EstablishOutcome, EstablishError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, user_id)?;

        let outcome = self.engine.validate(&biomarkers, demographic);
        let (accepted, confidence, failed_checks) = match &outcome {
            ValidationOutcome::Accepted { confidence } => (true, *confidence, Vec::new()),
            ValidationOutcome::Rejected { .. } => (false, 0.0, outcome.failed_checks()),
        };
        self.sink.emit(PipelineEvent::ValidationOutcome {
            user_id: user_id.to_string(),
            accepted,
            confidence,
            failed_checks,
        });

        let confidence = match outcome {
            ValidationOutcome::Rejected { failures } => {
                return Ok(EstablishOutcome::Rejected {
                    biomarkers,
                    failures,
                });
            }
            ValidationOutcome::Accepted { confidence } => confidence,
        };

        let prior = self.store.active(user_id).await?;
        let now = Utc::now();
        let id = Uuid::new_v4();

        let (archived, replacement_history) = match prior {
            Some(prior) => {
                let mut history = prior.replacement_history.clone();
                history.push(ReplacementRecord {
                    replaced_id: prior.id,
                    replaced_at: now,
                    context,
                });
                let archived = ArchivedBaseline {
                    archived_at: now,
                    superseded_by: id,
                    baseline: prior,
                };
                (Some(archived), history)
            }
            None => (None, Vec::new()),
        };

        let baseline = VocalBaseline {
            id,
            user_id: user_id.to_string(),
            established_at: now,
            biomarkers,
            demographic,
            recording_context: context,
            validation_status: ValidationStatus::Accepted { confidence },
            archived_baseline: archived.clone().map(Box::new),
            replacement_history,
        };

        self.store.install(baseline.clone(), archived).await?;
        info!(
            "Baseline {} established for user {} ({})",
            baseline.id,
            user_id,
            demographic.as_str()
        );
        Ok(EstablishOutcome::Established(baseline))
    }

    /// The user's active baseline, if any.
    pub async fn get_active(&self, user_id: &str) -> Result<Option<VocalBaseline>, EstablishError> {
        Ok(self.store.active(user_id).await?)
    }

    /// Archived baselines, most recent first.
    pub async fn history(&self, user_id: &str) -> Result<Vec<ArchivedBaseline>, EstablishError> {
        Ok(self.store.history(user_id).await?)
    }

    /// Pure derivation of per-user thresholds from a baseline.
    pub fn personalized_thresholds(&self, baseline: &VocalBaseline) -> PersonalizedThresholds {
        PersonalizedThresholds::from_baseline(baseline)
    }
}

/// Per-user establishment lock. Acquisition is synchronous and contention is
/// an error, not a wait.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    user_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, user_id: &str) -> Result<Self, EstablishError> {
        let mut in_flight = set.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(user_id.to_string()) {
            return Err(EstablishError::ConcurrentEstablish(user_id.to_string()));
        }
        Ok(Self {
            set,
            user_id: user_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.set.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biomarkers::{healthy_quality_measures, AnalysisMetadata, F0Analysis};
    use crate::events::TracingEventSink;

    fn passing_biomarkers() -> VocalBiomarkers {
        VocalBiomarkers::new(
            F0Analysis::new(200.0, 6.0, 90.0),
            healthy_quality_measures(),
            AnalysisMetadata {
                voiced_ratio: 0.85,
                recording_duration_seconds: 5.0,
                frame_count: 500,
                voiced_frame_count: 425,
            },
        )
    }

    fn manager() -> BaselineLifecycleManager {
        BaselineLifecycleManager::new(
            Arc::new(InMemoryBaselineStore::new()),
            BaselineValidationEngine::default(),
            Arc::new(TracingEventSink),
        )
    }

    #[tokio::test]
    async fn test_first_establish_installs_without_archiving() {
        let manager = manager();
        let outcome = manager
            .establish(
                "user-1",
                passing_biomarkers(),
                VoiceDemographic::AdultFemale,
                RecordingContext::Onboarding,
            )
            .await
            .unwrap();

        let baseline = match outcome {
            EstablishOutcome::Established(b) => b,
            other => panic!("expected establishment, got {:?}", other),
        };
        assert!(baseline.archived_baseline.is_none());
        assert!(baseline.replacement_history.is_empty());

        let active = manager.get_active("user-1").await.unwrap().unwrap();
        assert_eq!(active.id, baseline.id);
        assert!(manager.history("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_establish_archives_the_prior() {
        let manager = manager();
        let first = match manager
            .establish(
                "user-1",
                passing_biomarkers(),
                VoiceDemographic::AdultFemale,
                RecordingContext::Onboarding,
            )
            .await
            .unwrap()
        {
            EstablishOutcome::Established(b) => b,
            other => panic!("unexpected {:?}", other),
        };

        let second = match manager
            .establish(
                "user-1",
                passing_biomarkers(),
                VoiceDemographic::AdultFemale,
                RecordingContext::Recalibration,
            )
            .await
            .unwrap()
        {
            EstablishOutcome::Established(b) => b,
            other => panic!("unexpected {:?}", other),
        };

        // Exactly one active, exactly one newly archived
        let active = manager.get_active("user-1").await.unwrap().unwrap();
        assert_eq!(active.id, second.id);

        let history = manager.history("user-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].baseline.id, first.id);
        assert_eq!(history[0].superseded_by, second.id);

        // Lineage carried on the new aggregate
        assert_eq!(second.replacement_history.len(), 1);
        assert_eq!(second.replacement_history[0].replaced_id, first.id);
        assert_eq!(
            second.replacement_history[0].context,
            RecordingContext::Recalibration
        );
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first_and_monotonic() {
        let manager = manager();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let outcome = manager
                .establish(
                    "user-1",
                    passing_biomarkers(),
                    VoiceDemographic::AdultFemale,
                    RecordingContext::FollowUp,
                )
                .await
                .unwrap();
            if let EstablishOutcome::Established(b) = outcome {
                ids.push(b.id);
            }
        }

        let history = manager.history("user-1").await.unwrap();
        assert_eq!(history.len(), 2);
        // Most recent archived entry is the second baseline
        assert_eq!(history[0].baseline.id, ids[1]);
        assert_eq!(history[1].baseline.id, ids[0]);

        // Replacement history on the active grows monotonically
        let active = manager.get_active("user-1").await.unwrap().unwrap();
        assert_eq!(active.replacement_history.len(), 2);
    }

    #[tokio::test]
    async fn test_validation_rejection_preserves_biomarkers() {
        let manager = manager();
        let mut biomarkers = passing_biomarkers();
        biomarkers.metadata.recording_duration_seconds = 2.0;

        let outcome = manager
            .establish(
                "user-1",
                biomarkers,
                VoiceDemographic::AdultFemale,
                RecordingContext::Onboarding,
            )
            .await
            .unwrap();

        match outcome {
            EstablishOutcome::Rejected {
                biomarkers,
                failures,
            } => {
                // Biomarkers survive for display even though no baseline
                // was installed
                assert!((biomarkers.f0.mean - 200.0).abs() < 0.01);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].check, "duration");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(manager.get_active("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_establish_rejected_synchronously() {
        /// Store whose `active` lookup never resolves, pinning the first
        /// establish inside its critical section
        struct StalledStore;

        #[async_trait]
        impl BaselineStore for StalledStore {
            async fn active(&self, _: &str) -> Result<Option<VocalBaseline>, StoreError> {
                std::future::pending().await
            }
            async fn install(
                &self,
                _: VocalBaseline,
                _: Option<ArchivedBaseline>,
            ) -> Result<(), StoreError> {
                Ok(())
            }
            async fn history(&self, _: &str) -> Result<Vec<ArchivedBaseline>, StoreError> {
                Ok(Vec::new())
            }
        }

        let manager = BaselineLifecycleManager::new(
            Arc::new(StalledStore),
            BaselineValidationEngine::default(),
            Arc::new(TracingEventSink),
        );

        let first = manager.establish(
            "user-1",
            passing_biomarkers(),
            VoiceDemographic::AdultFemale,
            RecordingContext::Onboarding,
        );
        tokio::pin!(first);
        // Drive the first call to its suspension point inside the store
        assert!(futures_util::poll!(first.as_mut()).is_pending());

        let second = manager
            .establish(
                "user-1",
                passing_biomarkers(),
                VoiceDemographic::AdultFemale,
                RecordingContext::Onboarding,
            )
            .await;
        assert!(matches!(
            second,
            Err(EstablishError::ConcurrentEstablish(user)) if user == "user-1"
        ));
    }

    #[tokio::test]
    async fn test_establish_for_different_users_is_independent() {
        let manager = manager();
        for user in ["user-a", "user-b"] {
            let outcome = manager
                .establish(
                    user,
                    passing_biomarkers(),
                    VoiceDemographic::AdultFemale,
                    RecordingContext::Onboarding,
                )
                .await
                .unwrap();
            assert!(matches!(outcome, EstablishOutcome::Established(_)));
        }
        assert!(manager.get_active("user-a").await.unwrap().is_some());
        assert!(manager.get_active("user-b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_guard_released_after_establish_completes() {
        let manager = manager();
        for _ in 0..2 {
            // Sequential establishes for the same user must both succeed
            let outcome = manager
                .establish(
                    "user-1",
                    passing_biomarkers(),
                    VoiceDemographic::AdultFemale,
                    RecordingContext::FollowUp,
                )
                .await
                .unwrap();
            assert!(matches!(outcome, EstablishOutcome::Established(_)));
        }
    }

    #[tokio::test]
    async fn test_personalized_thresholds_from_established_baseline() {
        let manager = manager();
        let baseline = match manager
            .establish(
                "user-1",
                passing_biomarkers(),
                VoiceDemographic::AdultFemale,
                RecordingContext::Onboarding,
            )
            .await
            .unwrap()
        {
            EstablishOutcome::Established(b) => b,
            other => panic!("unexpected {:?}", other),
        };

        let thresholds = manager.personalized_thresholds(&baseline);
        assert!((thresholds.f0_range.min - 160.0).abs() < 0.01);
        assert!((thresholds.f0_range.max - 240.0).abs() < 0.01);
    }
}
