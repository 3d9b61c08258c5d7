use crate::core::ConfigError;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

lazy_static::lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern");
}

pub const ENV_STORE_URL: &str = "STAFFING_STORE_URL";
pub const ENV_SERVICE_KEY: &str = "STAFFING_SERVICE_KEY";
pub const ENV_SCHEMA: &str = "STAFFING_DB_SCHEMA";
pub const ENV_PROFILES_TABLE: &str = "STAFFING_PROFILES_TABLE";
pub const ENV_USERS_TABLE: &str = "STAFFING_USERS_TABLE";
pub const ENV_PROCEDURE: &str = "STAFFING_PROFILE_PROCEDURE";
pub const ENV_REQUEST_TIMEOUT: &str = "STAFFING_REQUEST_TIMEOUT_SECS";
pub const ENV_HOOK_BIND: &str = "STAFFING_HOOK_BIND";
pub const ENV_HOOK_SECRET: &str = "STAFFING_HOOK_SECRET";

/// Hosted store connection configuration
///
/// Points at a PostgREST-style API (`{base_url}/rest/v1`) and carries the
/// service key used for both the `apikey` and bearer headers.
#[derive(Clone)]
pub struct StoreConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`
    pub base_url: String,

    /// Service-role key
    pub service_key: String,

    /// Database schema exposed by the API
    pub schema: String,

    /// Table holding worker profiles
    pub profiles_table: String,

    /// Identity-registry table the profile foreign key points at
    pub users_table: String,

    /// Privileged create-profile procedure
    pub procedure: String,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// TCP connect timeout
    pub connect_timeout: Duration,
}

impl StoreConfig {
    pub fn new(base_url: &str, service_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            schema: "public".to_string(),
            profiles_table: "profiles".to_string(),
            users_table: "users".to_string(),
            procedure: "create_profile_for_user".to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn profiles_table(mut self, table: &str) -> Self {
        self.profiles_table = table.to_string();
        self
    }

    pub fn users_table(mut self, table: &str) -> Self {
        self.users_table = table.to_string();
        self
    }

    pub fn procedure(mut self, procedure: &str) -> Self {
        self.procedure = procedure.to_string();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Load from `STAFFING_*` environment variables, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a `.env`-style file only, ignoring the process environment
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let vars = dotenvy::from_path_iter(path)
            .and_then(|iter| iter.collect::<Result<HashMap<String, String>, _>>())
            .map_err(|e| ConfigError::Invalid {
                key: "env_file",
                reason: format!("{}: {e}", path.display()),
            })?;
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Load from an arbitrary key lookup; unset optional keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = get(ENV_STORE_URL).ok_or(ConfigError::Missing(ENV_STORE_URL))?;
        let service_key = get(ENV_SERVICE_KEY).ok_or(ConfigError::Missing(ENV_SERVICE_KEY))?;

        let mut config = Self::new(&base_url, &service_key);

        if let Some(schema) = get(ENV_SCHEMA) {
            config = config.schema(&schema);
        }
        if let Some(table) = get(ENV_PROFILES_TABLE) {
            config = config.profiles_table(&table);
        }
        if let Some(table) = get(ENV_USERS_TABLE) {
            config = config.users_table(&table);
        }
        if let Some(procedure) = get(ENV_PROCEDURE) {
            config = config.procedure(&procedure);
        }
        if let Some(raw) = get(ENV_REQUEST_TIMEOUT) {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: ENV_REQUEST_TIMEOUT,
                reason: format!("'{raw}' is not a whole number of seconds"),
            })?;
            config = config.request_timeout(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    /// `{base_url}/rest/v1`
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.base_url)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: ENV_STORE_URL,
                reason: "must start with http:// or https://".to_string(),
            });
        }

        if self.service_key.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_SERVICE_KEY));
        }

        for (key, value) in [
            (ENV_SCHEMA, &self.schema),
            (ENV_PROFILES_TABLE, &self.profiles_table),
            (ENV_USERS_TABLE, &self.users_table),
            (ENV_PROCEDURE, &self.procedure),
        ] {
            if !IDENTIFIER.is_match(value) {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("'{value}' is not a plain SQL identifier"),
                });
            }
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: ENV_REQUEST_TIMEOUT,
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

// Never print the service key
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &"***")
            .field("schema", &self.schema)
            .field("profiles_table", &self.profiles_table)
            .field("users_table", &self.users_table)
            .field("procedure", &self.procedure)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (schema {}, key ***)", self.rest_url(), self.schema)
    }
}

/// Provisioning hook service settings
#[derive(Clone)]
pub struct HookConfig {
    pub bind: String,
    /// Shared secret expected in `x-hook-secret`; `None` disables the check
    pub secret: Option<String>,
}

impl HookConfig {
    pub fn new(bind: &str) -> Self {
        Self {
            bind: bind.to_string(),
            secret: None,
        }
    }

    pub fn secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(bind) = lookup(ENV_HOOK_BIND).filter(|v| !v.trim().is_empty()) {
            config.bind = bind;
        }
        config.secret = lookup(ENV_HOOK_SECRET).filter(|v| !v.is_empty());
        config
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self::new("127.0.0.1:8787")
    }
}

impl fmt::Debug for HookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookConfig")
            .field("bind", &self.bind)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}
