use thiserror::Error;

/// Failure categories a store adapter maps backend errors into.
///
/// The reconciler only ever branches on these variants; wire-level codes
/// (SQLSTATE, PostgREST codes, HTTP statuses) stay inside the adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Column '{column}' cannot be NULL: {message}")]
    NotNullViolation { column: String, message: String },

    #[error("Procedure '{0}' not found")]
    ProcedureNotFound(String),

    #[error("Schema object missing: {0}")]
    SchemaMissing(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Store error: {0}")]
    Unknown(String),
}

impl StoreError {
    pub fn not_null(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotNullViolation {
            column: column.into(),
            message: message.into(),
        }
    }

    /// True when retrying cannot help until the deployment itself is fixed.
    pub fn requires_manual_setup(&self) -> bool {
        matches!(self, Self::ProcedureNotFound(_) | Self::SchemaMissing(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stable snake_case code used in logs and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UniqueViolation(_) => "unique_violation",
            Self::ForeignKeyViolation(_) => "foreign_key_violation",
            Self::NotNullViolation { .. } => "not_null_violation",
            Self::ProcedureNotFound(_) => "procedure_not_found",
            Self::SchemaMissing(_) => "schema_missing",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Transient(_) => "transient",
            Self::Unknown(_) => "unknown",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Rejected identity input, raised before any store call happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity id cannot be empty")]
    EmptyId,

    #[error("Unknown role '{0}'")]
    UnknownRole(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
