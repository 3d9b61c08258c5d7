// ============================================================================
// Staffing Profiles Library
// ============================================================================

//! Worker-profile provisioning for the staffing marketplace.
//!
//! Every candidate-like identity (`candidate`, `worker`, `staff`) needs
//! exactly one profile row. [`Reconciler`] guarantees that against any
//! [`ProfileStore`], tolerating concurrent callers and partially configured
//! deployments.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use staffing_profiles::{Identity, MemoryStore, Outcome, Reconciler, Role};
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let reconciler = Reconciler::new(store.clone());
//!
//! let amina = Identity::new("4f1c", "amina@example.ma", "Amina", Role::Worker).unwrap();
//! let outcome = reconciler.reconcile(&amina).await;
//! assert!(matches!(outcome, Outcome::Created { .. }));
//!
//! // Calling again is harmless
//! let again = reconciler.reconcile(&amina).await;
//! assert!(matches!(again, Outcome::AlreadyExists { .. }));
//! assert_eq!(store.profile_count().await, 1);
//! # });
//! ```

pub mod core;
pub mod storage;
pub mod connection;
pub mod reconcile;
pub mod web;

// Re-export main types for convenience
pub use crate::core::{
    ConfigError, Identity, IdentityError, IdentityRecord, NewProfile, ProcedureCall, Profile,
    ProfileId, Result, Role, StoreError,
};
pub use crate::storage::{MemoryStore, ProfileStore, RestStore, StoreOp};
pub use crate::connection::{HookConfig, StoreConfig, connect};
pub use crate::reconcile::{
    BatchReport, BatchSummary, CreationMethod, DEFAULT_BATCH_CONCURRENCY,
    MAX_DIRECT_INSERT_RETRIES, MAX_PROCEDURE_RETRIES, Outcome, Reconciler,
};
pub use crate::web::build_router;
