use crate::core::{IdentityRecord, NewProfile, ProcedureCall, Profile, ProfileId, Result};
use async_trait::async_trait;

/// Store contract the reconciler runs against.
///
/// Implementations map every backend failure into a [`StoreError`](crate::core::StoreError)
/// category; the reconciler never inspects raw codes.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Look up the profile whose `identity_ref` equals `identity_id`.
    async fn find_profile_by_identity(&self, identity_id: &str) -> Result<Option<Profile>>;

    /// Create the profile atomically through the privileged procedure.
    ///
    /// A duplicate `identity_ref` must surface as `UniqueViolation`, a
    /// missing registry row as `ForeignKeyViolation`, and an uninstalled
    /// procedure as `ProcedureNotFound`.
    async fn call_privileged_create_profile(&self, call: &ProcedureCall) -> Result<ProfileId>;

    /// Insert-or-update the registry row keyed on its `id`.
    async fn upsert_identity_record(&self, record: &IdentityRecord) -> Result<()>;

    /// Insert a profile keyed on the unique `identity_ref`.
    ///
    /// A conflicting row surfaces as `UniqueViolation`.
    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileId>;

    /// Set `token_identifier` on an existing registry row.
    async fn update_token_identifier(&self, identity_id: &str, token: &str) -> Result<()>;
}
