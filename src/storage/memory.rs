use super::ProfileStore;
use crate::core::{
    IdentityRecord, NewProfile, ProcedureCall, Profile, ProfileId, Result, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_PROCEDURE_NAME: &str = "create_profile_for_user";

/// Store operations, used for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FindProfile,
    CallProcedure,
    UpsertIdentityRecord,
    InsertProfile,
    UpdateTokenIdentifier,
}

#[derive(Debug, Default)]
struct Tables {
    /// Registry rows keyed by identity id
    identity_records: HashMap<String, IdentityRecord>,
    /// Profiles keyed by identity_ref (the unique key)
    profiles: HashMap<String, Profile>,
}

/// In-process store enforcing the same constraints as the hosted database.
///
/// Every operation yields to the runtime before touching the tables, so
/// concurrent reconcilers interleave the way separate network round trips
/// would. Constraint checks and writes happen under one write lock.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    procedure_installed: bool,
    strict_token_identifier: bool,
    schema_missing: bool,
    injected: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
    calls: Mutex<Vec<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            procedure_installed: true,
            strict_token_identifier: false,
            schema_missing: false,
            injected: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Behave like a deployment where the privileged procedure was never installed
    pub fn without_procedure(mut self) -> Self {
        self.procedure_installed = false;
        self
    }

    /// Reject registry rows whose `token_identifier` is NULL
    pub fn with_strict_token_identifier(mut self) -> Self {
        self.strict_token_identifier = true;
        self
    }

    /// Fail every operation as if the tables had never been migrated
    pub fn with_missing_schema(mut self) -> Self {
        self.schema_missing = true;
        self
    }

    /// Queue an error returned by the next call to `op`, ahead of normal handling.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        lock(&self.injected).entry(op).or_default().push_back(error);
    }

    /// Insert a registry row directly, bypassing constraint checks.
    pub async fn seed_identity_record(&self, record: IdentityRecord) {
        self.tables
            .write()
            .await
            .identity_records
            .insert(record.id.clone(), record);
    }

    pub async fn profile_count(&self) -> usize {
        self.tables.read().await.profiles.len()
    }

    pub async fn profile(&self, identity_id: &str) -> Option<Profile> {
        self.tables.read().await.profiles.get(identity_id).cloned()
    }

    pub async fn identity_record(&self, identity_id: &str) -> Option<IdentityRecord> {
        self.tables
            .read()
            .await
            .identity_records
            .get(identity_id)
            .cloned()
    }

    /// Operations in the order they were invoked
    pub fn calls(&self) -> Vec<StoreOp> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, op: StoreOp) -> usize {
        self.calls().into_iter().filter(|c| *c == op).count()
    }

    pub fn write_count(&self) -> usize {
        self.calls()
            .into_iter()
            .filter(|op| *op != StoreOp::FindProfile)
            .count()
    }

    async fn enter(&self, op: StoreOp) -> Result<()> {
        lock(&self.calls).push(op);

        // Simulated network suspension point
        tokio::task::yield_now().await;

        let injected = lock(&self.injected)
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        if let Some(error) = injected {
            return Err(error);
        }

        if self.schema_missing {
            return Err(StoreError::SchemaMissing(
                "relation \"public.profiles\" does not exist".to_string(),
            ));
        }

        Ok(())
    }

    fn check_token_identifier(&self, record: &IdentityRecord) -> Result<()> {
        if self.strict_token_identifier && record.token_identifier.is_none() {
            return Err(StoreError::not_null(
                "token_identifier",
                format!(
                    "null value in column \"token_identifier\" of relation \"users\" (id {})",
                    record.id
                ),
            ));
        }
        Ok(())
    }

    /// Shared write path of the procedure and the direct insert.
    fn insert_locked(&self, tables: &mut Tables, profile: &NewProfile) -> Result<ProfileId> {
        if tables.profiles.contains_key(&profile.identity_ref) {
            return Err(StoreError::UniqueViolation(format!(
                "duplicate key value violates unique constraint \"profiles_user_id_key\" ({})",
                profile.identity_ref
            )));
        }

        let record = tables
            .identity_records
            .get(&profile.identity_ref)
            .ok_or_else(|| {
                StoreError::ForeignKeyViolation(format!(
                    "Key (user_id)=({}) is not present in table \"users\"",
                    profile.identity_ref
                ))
            })?;
        // Strict deployments reject any reference to a row with a NULL token
        self.check_token_identifier(record)?;

        let now = Utc::now();
        let stored = Profile {
            id: Uuid::new_v4(),
            identity_ref: profile.identity_ref.clone(),
            full_name: profile.full_name.clone(),
            email: profile.email.clone(),
            is_available: profile.is_available,
            skills: profile.skills.clone(),
            rating: profile.rating,
            created_at: now,
            updated_at: now,
        };
        let id = stored.id;
        tables.profiles.insert(stored.identity_ref.clone(), stored);
        Ok(id)
    }
}

/// Bookkeeping stays usable after a panicking test thread poisons it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_profile_by_identity(&self, identity_id: &str) -> Result<Option<Profile>> {
        self.enter(StoreOp::FindProfile).await?;
        Ok(self.tables.read().await.profiles.get(identity_id).cloned())
    }

    async fn call_privileged_create_profile(&self, call: &ProcedureCall) -> Result<ProfileId> {
        self.enter(StoreOp::CallProcedure).await?;

        if !self.procedure_installed {
            return Err(StoreError::ProcedureNotFound(format!(
                "public.{}(p_email, p_full_name, p_user_id)",
                DEFAULT_PROCEDURE_NAME
            )));
        }

        let mut tables = self.tables.write().await;
        let profile = NewProfile {
            identity_ref: call.identity_ref.clone(),
            full_name: call.full_name.clone(),
            email: call.email.clone(),
            is_available: true,
            skills: Vec::new(),
            rating: 0.0,
        };
        self.insert_locked(&mut tables, &profile)
    }

    async fn upsert_identity_record(&self, record: &IdentityRecord) -> Result<()> {
        self.enter(StoreOp::UpsertIdentityRecord).await?;
        self.check_token_identifier(record)?;

        let mut tables = self.tables.write().await;
        match tables.identity_records.get_mut(&record.id) {
            Some(existing) => {
                existing.user_id = record.user_id.clone();
                existing.email = record.email.clone();
                existing.name = record.name.clone();
                existing.token_identifier = record.token_identifier.clone();
                existing.updated_at = record.updated_at;
            }
            None => {
                tables
                    .identity_records
                    .insert(record.id.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileId> {
        self.enter(StoreOp::InsertProfile).await?;
        let mut tables = self.tables.write().await;
        self.insert_locked(&mut tables, profile)
    }

    async fn update_token_identifier(&self, identity_id: &str, token: &str) -> Result<()> {
        self.enter(StoreOp::UpdateTokenIdentifier).await?;

        // UPDATE on a missing row is a no-op, like PATCH with no match
        if let Some(record) = self
            .tables
            .write()
            .await
            .identity_records
            .get_mut(identity_id)
        {
            record.token_identifier = Some(token.to_string());
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}
