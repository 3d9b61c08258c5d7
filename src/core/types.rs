use super::IdentityError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type ProfileId = Uuid;

/// Role claim issued by the auth provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Candidate,
    Worker,
    Staff,
    Company,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Candidate,
        Role::Worker,
        Role::Staff,
        Role::Company,
        Role::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Candidate => "candidate",
            Role::Worker => "worker",
            Role::Staff => "staff",
            Role::Company => "company",
            Role::Admin => "admin",
        }
    }

    /// Candidate-like roles are the ones that need a staffing profile.
    pub fn requires_profile(&self) -> bool {
        matches!(self, Role::Candidate | Role::Worker | Role::Staff)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| IdentityError::UnknownRole(s.to_string()))
    }
}

impl TryFrom<String> for Role {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// An authenticated principal. The id is guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct Identity {
    id: String,
    email: String,
    #[serde(default)]
    full_name: String,
    role: Role,
}

#[derive(Deserialize)]
struct RawIdentity {
    id: String,
    email: String,
    #[serde(default, alias = "fullName")]
    full_name: Option<String>,
    role: Role,
}

impl TryFrom<RawIdentity> for Identity {
    type Error = IdentityError;

    fn try_from(raw: RawIdentity) -> Result<Self, Self::Error> {
        Identity::new(raw.id, raw.email, raw.full_name.unwrap_or_default(), raw.role)
    }
}

impl Identity {
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        full_name: impl Into<String>,
        role: Role,
    ) -> Result<Self, IdentityError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(IdentityError::EmptyId);
        }

        Ok(Self {
            id,
            email: email.into().trim().to_string(),
            full_name: full_name.into().trim().to_string(),
            role,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Name written into new records; blank names fall back to the email.
    pub fn display_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.email
        } else {
            &self.full_name
        }
    }
}

/// A worker's staffing profile as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    #[serde(rename = "user_id")]
    pub identity_ref: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_available")]
    pub is_available: bool,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a profile; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProfile {
    #[serde(rename = "user_id")]
    pub identity_ref: String,
    pub full_name: String,
    pub email: String,
    pub is_available: bool,
    pub skills: Vec<String>,
    pub rating: f64,
}

impl NewProfile {
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            identity_ref: identity.id().to_string(),
            full_name: identity.display_name().to_string(),
            email: identity.email().to_string(),
            is_available: default_available(),
            skills: Vec::new(),
            rating: 0.0,
        }
    }
}

/// The registry row a profile's foreign key points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub token_identifier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn for_identity(identity: &Identity, now: DateTime<Utc>) -> Self {
        Self {
            id: identity.id().to_string(),
            user_id: identity.id().to_string(),
            email: identity.email().to_string(),
            name: identity.display_name().to_string(),
            token_identifier: Some(identity.id().to_string()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Arguments of the privileged create-profile procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcedureCall {
    #[serde(rename = "p_user_id")]
    pub identity_ref: String,
    #[serde(rename = "p_full_name")]
    pub full_name: String,
    #[serde(rename = "p_email")]
    pub email: String,
}

impl ProcedureCall {
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            identity_ref: identity.id().to_string(),
            full_name: identity.display_name().to_string(),
            email: identity.email().to_string(),
        }
    }
}

fn default_available() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_is_case_insensitive() {
        assert_eq!("Worker".parse::<Role>().unwrap(), Role::Worker);
        assert_eq!(" STAFF ".parse::<Role>().unwrap(), Role::Staff);
        assert!(matches!(
            "recruiter".parse::<Role>(),
            Err(IdentityError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_only_candidate_like_roles_require_profile() {
        let requiring: Vec<Role> = Role::ALL
            .into_iter()
            .filter(Role::requires_profile)
            .collect();
        assert_eq!(requiring, vec![Role::Candidate, Role::Worker, Role::Staff]);
    }

    #[test]
    fn test_identity_rejects_blank_id() {
        assert_eq!(
            Identity::new("  ", "a@b.ma", "A", Role::Candidate),
            Err(IdentityError::EmptyId)
        );
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let identity = Identity::new("u1", "amina@example.ma", "   ", Role::Worker).unwrap();
        assert_eq!(identity.display_name(), "amina@example.ma");

        let procedure = ProcedureCall::for_identity(&identity);
        assert_eq!(procedure.full_name, "amina@example.ma");
    }

    #[test]
    fn test_identity_deserializes_camel_case_name_and_validates() {
        let identity: Identity = serde_json::from_str(
            r#"{"id":"u2","email":"y@example.ma","fullName":"Youssef","role":"Candidate"}"#,
        )
        .unwrap();
        assert_eq!(identity.full_name(), "Youssef");
        assert_eq!(identity.role(), Role::Candidate);

        let empty = serde_json::from_str::<Identity>(r#"{"id":"","email":"x","role":"worker"}"#);
        assert!(empty.is_err());
    }

    #[test]
    fn test_new_profile_defaults() {
        let identity = Identity::new("u3", "k@example.ma", "Karim", Role::Staff).unwrap();
        let profile = NewProfile::for_identity(&identity);

        assert!(profile.is_available);
        assert!(profile.skills.is_empty());
        assert_eq!(profile.rating, 0.0);

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["user_id"], "u3");
    }

    #[test]
    fn test_registry_record_carries_token_identifier() {
        let identity = Identity::new("u4", "s@example.ma", "Sara", Role::Candidate).unwrap();
        let record = IdentityRecord::for_identity(&identity, Utc::now());
        assert_eq!(record.token_identifier.as_deref(), Some("u4"));
        assert_eq!(record.user_id, "u4");
    }
}
