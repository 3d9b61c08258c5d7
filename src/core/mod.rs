pub mod error;
pub mod types;

pub use error::{ConfigError, IdentityError, Result, StoreError};
pub use types::{Identity, IdentityRecord, NewProfile, ProcedureCall, Profile, ProfileId, Role};
