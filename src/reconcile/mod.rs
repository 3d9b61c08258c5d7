//! Profile reconciliation.
//!
//! [`Reconciler::reconcile`] makes sure exactly one profile exists for a
//! candidate-like identity. It walks a fixed chain of strategies: existence
//! check, privileged procedure (with one repair-and-retry), then direct insert
//! (with one repair-and-retry). The store's unique key on `identity_ref` is the
//! only arbiter between concurrent callers; a unique violation on any write
//! path means another caller already finished.

pub mod batch;

use crate::core::{
    Identity, IdentityRecord, NewProfile, ProcedureCall, ProfileId, StoreError,
};
use crate::storage::ProfileStore;
use chrono::Utc;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub use batch::{BatchReport, BatchSummary, DEFAULT_BATCH_CONCURRENCY};

/// Extra privileged-procedure attempts after a successful prerequisite repair
pub const MAX_PROCEDURE_RETRIES: usize = 1;

/// Extra direct-insert attempts after the first one fails
pub const MAX_DIRECT_INSERT_RETRIES: usize = 1;

const TOKEN_IDENTIFIER_COLUMN: &str = "token_identifier";

/// Strategy that produced a new profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreationMethod {
    ServiceProcedure,
    DirectInsert,
}

impl fmt::Display for CreationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreationMethod::ServiceProcedure => f.write_str("service-procedure"),
            CreationMethod::DirectInsert => f.write_str("direct-insert"),
        }
    }
}

/// Result of one reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A profile was already present. The id is `None` when a concurrent
    /// caller won the insert race.
    AlreadyExists { profile_id: Option<ProfileId> },
    Created {
        profile_id: ProfileId,
        method: CreationMethod,
    },
    /// The role does not need a profile
    NotApplicable,
    Failed {
        error: StoreError,
        requires_manual_setup: bool,
    },
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::AlreadyExists { .. } => "already_exists",
            Outcome::Created { .. } => "created",
            Outcome::NotApplicable => "not_applicable",
            Outcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    /// True once a profile is known to exist
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Outcome::AlreadyExists { .. } | Outcome::Created { .. })
    }

    pub fn profile_id(&self) -> Option<ProfileId> {
        match self {
            Outcome::AlreadyExists { profile_id } => *profile_id,
            Outcome::Created { profile_id, .. } => Some(*profile_id),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum OutcomeWire {
    AlreadyExists {
        profile_id: Option<ProfileId>,
    },
    Created {
        profile_id: ProfileId,
        method: CreationMethod,
    },
    NotApplicable,
    Failed {
        code: &'static str,
        error: String,
        requires_manual_setup: bool,
    },
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Outcome::AlreadyExists { profile_id } => OutcomeWire::AlreadyExists {
                profile_id: *profile_id,
            },
            Outcome::Created { profile_id, method } => OutcomeWire::Created {
                profile_id: *profile_id,
                method: *method,
            },
            Outcome::NotApplicable => OutcomeWire::NotApplicable,
            Outcome::Failed {
                error,
                requires_manual_setup,
            } => OutcomeWire::Failed {
                code: error.code(),
                error: error.to_string(),
                requires_manual_setup: *requires_manual_setup,
            },
        };
        wire.serialize(serializer)
    }
}

/// What the procedure step learned, carried into the direct insert step.
#[derive(Debug, Default, Clone, Copy)]
struct Attempts {
    /// Registry upsert already tried during this reconcile
    registry: bool,
    procedure_missing: bool,
}

/// Guarantees one profile per candidate-like identity.
///
/// Holds no state besides the store handle, so it is cheap to clone and safe
/// to share across request handlers.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ProfileStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Ensure a profile exists for `identity`.
    ///
    /// Never panics and never returns an error type: every path ends in an
    /// [`Outcome`]. Safe to call concurrently and repeatedly for the same
    /// identity.
    #[instrument(name = "reconcile", skip_all, fields(identity = %identity.id(), role = %identity.role()))]
    pub async fn reconcile(&self, identity: &Identity) -> Outcome {
        if !identity.role().requires_profile() {
            debug!("role does not require a profile");
            return Outcome::NotApplicable;
        }

        match self.store.find_profile_by_identity(identity.id()).await {
            Ok(Some(profile)) => {
                debug!(profile_id = %profile.id, "profile already present");
                return Outcome::AlreadyExists {
                    profile_id: Some(profile.id),
                };
            }
            Ok(None) => {}
            // Every later write is idempotent, so a failed read is not fatal
            Err(error) => warn!(error = %error, "existence check failed"),
        }

        let mut attempts = Attempts::default();
        match self.via_procedure(identity, &mut attempts).await {
            Ok(outcome) => outcome,
            Err(error) => {
                debug!(error = %error, "falling back to direct insert");
                self.via_direct_insert(identity, attempts).await
            }
        }
    }

    /// Steps 2 and 3: privileged procedure plus one repair-and-retry.
    async fn via_procedure(
        &self,
        identity: &Identity,
        attempts: &mut Attempts,
    ) -> Result<Outcome, StoreError> {
        let call = ProcedureCall::for_identity(identity);
        let mut retries = 0;

        loop {
            let error = match self.store.call_privileged_create_profile(&call).await {
                Ok(profile_id) => {
                    info!(%profile_id, method = %CreationMethod::ServiceProcedure, "profile created");
                    return Ok(Outcome::Created {
                        profile_id,
                        method: CreationMethod::ServiceProcedure,
                    });
                }
                Err(StoreError::UniqueViolation(_)) => {
                    info!("profile created by a concurrent caller");
                    return Ok(Outcome::AlreadyExists { profile_id: None });
                }
                Err(error) => error,
            };

            if matches!(error, StoreError::ProcedureNotFound(_)) {
                warn!("privileged procedure not installed");
                attempts.procedure_missing = true;
            }

            if retries >= MAX_PROCEDURE_RETRIES {
                return Err(error);
            }

            let repaired = match &error {
                StoreError::ForeignKeyViolation(_) => {
                    attempts.registry = true;
                    self.upsert_identity_record(identity).await
                }
                StoreError::NotNullViolation { column, .. } if column == TOKEN_IDENTIFIER_COLUMN => {
                    self.repair_token_identifier(identity).await
                }
                _ => false,
            };

            if !repaired {
                return Err(error);
            }
            retries += 1;
        }
    }

    /// Step 4: direct insert keyed on `identity_ref`, retried once.
    async fn via_direct_insert(&self, identity: &Identity, mut attempts: Attempts) -> Outcome {
        let profile = NewProfile::for_identity(identity);
        let mut retries = 0;

        loop {
            let error = match self.store.insert_profile(&profile).await {
                Ok(profile_id) => {
                    info!(%profile_id, method = %CreationMethod::DirectInsert, "profile created");
                    return Outcome::Created {
                        profile_id,
                        method: CreationMethod::DirectInsert,
                    };
                }
                Err(StoreError::UniqueViolation(_)) => {
                    info!("profile created by a concurrent caller");
                    return Outcome::AlreadyExists { profile_id: None };
                }
                Err(error) => error,
            };

            if retries >= MAX_DIRECT_INSERT_RETRIES {
                return Self::failed(error, attempts.procedure_missing);
            }

            if !attempts.registry {
                attempts.registry = true;
                self.upsert_identity_record(identity).await;
            }
            retries += 1;
        }
    }

    async fn upsert_identity_record(&self, identity: &Identity) -> bool {
        let record = IdentityRecord::for_identity(identity, Utc::now());
        match self.store.upsert_identity_record(&record).await {
            Ok(()) => {
                debug!("identity record upserted");
                true
            }
            Err(error) => {
                warn!(error = %error, "identity record upsert failed");
                false
            }
        }
    }

    async fn repair_token_identifier(&self, identity: &Identity) -> bool {
        match self
            .store
            .update_token_identifier(identity.id(), identity.id())
            .await
        {
            Ok(()) => {
                debug!("token identifier repaired");
                true
            }
            Err(error) => {
                warn!(error = %error, "token identifier repair failed");
                false
            }
        }
    }

    /// Without the procedure, a rejected direct insert only clears once an
    /// operator installs it or grants the insert, unless the rejection was transient.
    fn failed(error: StoreError, procedure_missing: bool) -> Outcome {
        let requires_manual_setup =
            error.requires_manual_setup() || (procedure_missing && !error.is_transient());
        if requires_manual_setup {
            error!(error = %error, code = error.code(), "profile store needs manual setup");
        } else {
            warn!(error = %error, code = error.code(), "profile reconciliation failed");
        }
        Outcome::Failed {
            error,
            requires_manual_setup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;
    use crate::storage::{MemoryStore, StoreOp};

    fn worker(id: &str) -> Identity {
        Identity::new(id, format!("{id}@example.ma"), "Hamza", Role::Worker).unwrap()
    }

    fn reconciler(store: &Arc<MemoryStore>) -> Reconciler {
        Reconciler::new(store.clone())
    }

    #[tokio::test]
    async fn test_unknown_procedure_error_goes_straight_to_insert() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreOp::CallProcedure, StoreError::Unknown("boom".into()));

        let outcome = reconciler(&store).reconcile(&worker("a1")).await;

        assert!(matches!(
            outcome,
            Outcome::Created { method: CreationMethod::DirectInsert, .. }
        ));
        assert_eq!(store.call_count(StoreOp::CallProcedure), 1);
    }

    #[tokio::test]
    async fn test_failed_existence_check_still_creates() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreOp::FindProfile, StoreError::Transient("reset".into()));

        let outcome = reconciler(&store).reconcile(&worker("a2")).await;

        assert!(outcome.is_satisfied());
        assert_eq!(store.profile_count().await, 1);
    }

    #[tokio::test]
    async fn test_procedure_retry_is_bounded() {
        let store = Arc::new(MemoryStore::new().without_procedure());
        store.fail_next(
            StoreOp::CallProcedure,
            StoreError::ForeignKeyViolation("missing".into()),
        );
        store.fail_next(
            StoreOp::CallProcedure,
            StoreError::ForeignKeyViolation("still missing".into()),
        );

        let outcome = reconciler(&store).reconcile(&worker("a3")).await;

        // FK, repair, FK again, then direct insert without another registry upsert
        assert_eq!(store.call_count(StoreOp::CallProcedure), 2);
        assert_eq!(store.call_count(StoreOp::UpsertIdentityRecord), 1);
        assert!(matches!(
            outcome,
            Outcome::Created { method: CreationMethod::DirectInsert, .. }
        ));
    }

    #[tokio::test]
    async fn test_transient_failure_is_not_manual_setup() {
        let store = Arc::new(MemoryStore::new().without_procedure());
        store.fail_next(StoreOp::InsertProfile, StoreError::Transient("timeout".into()));
        store.fail_next(StoreOp::InsertProfile, StoreError::Transient("timeout".into()));

        let outcome = reconciler(&store).reconcile(&worker("a4")).await;

        match outcome {
            Outcome::Failed {
                error,
                requires_manual_setup,
            } => {
                assert!(error.is_transient());
                assert!(!requires_manual_setup);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(store.call_count(StoreOp::InsertProfile), 2);
    }

    #[test]
    fn test_outcome_serialization() {
        let created = Outcome::Created {
            profile_id: uuid::Uuid::nil(),
            method: CreationMethod::DirectInsert,
        };
        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["outcome"], "created");
        assert_eq!(json["method"], "direct-insert");

        let failed = Outcome::Failed {
            error: StoreError::ProcedureNotFound("create_profile_for_user".into()),
            requires_manual_setup: true,
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["code"], "procedure_not_found");
        assert_eq!(json["requires_manual_setup"], true);

        let json = serde_json::to_value(Outcome::NotApplicable).unwrap();
        assert_eq!(json["outcome"], "not_applicable");
    }
}
