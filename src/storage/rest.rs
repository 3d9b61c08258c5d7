//! PostgREST-style HTTP adapter.
//!
//! Talks to `{base_url}/rest/v1` with the service key and maps SQLSTATE and
//! PostgREST error codes into [`StoreError`] categories.

use super::ProfileStore;
use crate::connection::StoreConfig;
use crate::core::{
    IdentityRecord, NewProfile, ProcedureCall, Profile, ProfileId, Result, StoreError,
};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

/// Column on the profiles table referencing the identity registry
const IDENTITY_COLUMN: &str = "user_id";

lazy_static::lazy_static! {
    static ref NOT_NULL_COLUMN: Regex =
        Regex::new(r#"column "([^"]+)""#).expect("valid not-null column pattern");
    static ref MISSING_FUNCTION: Regex =
        Regex::new(r"(?i)could not find the function|function .+ does not exist").expect("valid function pattern");
    static ref MISSING_RELATION: Regex =
        Regex::new(r#"(?i)(relation|column|table) .+ does not exist|could not find the .+ (column|table)"#)
            .expect("valid relation pattern");
}

/// Error body returned by PostgREST
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

pub struct RestStore {
    client: Client,
    config: StoreConfig,
}

impl RestStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StoreError::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.config.rest_url(), path))
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
            .header("Accept-Profile", &self.config.schema)
            .header("Content-Profile", &self.config.schema)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_response(status, &body);
        debug!(status = status.as_u16(), code = error.code(), "store request rejected");
        Err(error)
    }

    async fn json_body(response: Response) -> Result<Value> {
        let text = response.text().await.map_err(|e| classify_transport(&e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| StoreError::Unknown(format!("malformed store response: {e}")))
    }
}

#[async_trait]
impl ProfileStore for RestStore {
    async fn find_profile_by_identity(&self, identity_id: &str) -> Result<Option<Profile>> {
        let filter = format!("eq.{identity_id}");
        let request = self
            .request(Method::GET, &self.config.profiles_table)
            .query(&[("select", "*"), (IDENTITY_COLUMN, filter.as_str()), ("limit", "1")]);

        let body = Self::json_body(self.send(request).await?).await?;
        let rows: Vec<Profile> = serde_json::from_value(body)
            .map_err(|e| StoreError::Unknown(format!("unexpected profile row shape: {e}")))?;
        Ok(rows.into_iter().next())
    }

    async fn call_privileged_create_profile(&self, call: &ProcedureCall) -> Result<ProfileId> {
        let request = self
            .request(Method::POST, &format!("rpc/{}", self.config.procedure))
            .json(call);

        let body = Self::json_body(self.send(request).await?).await?;
        if let Some(id) = profile_id_from(&body)? {
            return Ok(id);
        }

        // Procedures declared as `returns void` give no id back
        self.find_profile_by_identity(&call.identity_ref)
            .await?
            .map(|profile| profile.id)
            .ok_or_else(|| {
                StoreError::Unknown(format!(
                    "procedure {} returned no profile for {}",
                    self.config.procedure, call.identity_ref
                ))
            })
    }

    async fn upsert_identity_record(&self, record: &IdentityRecord) -> Result<()> {
        let request = self
            .request(Method::POST, &self.config.users_table)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record);

        self.send(request).await?;
        Ok(())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileId> {
        let request = self
            .request(Method::POST, &self.config.profiles_table)
            .header("Prefer", "return=representation")
            .json(profile);

        let body = Self::json_body(self.send(request).await?).await?;
        profile_id_from(&body)?.ok_or_else(|| {
            StoreError::Unknown(format!(
                "insert into {} returned no row",
                self.config.profiles_table
            ))
        })
    }

    async fn update_token_identifier(&self, identity_id: &str, token: &str) -> Result<()> {
        let filter = format!("eq.{identity_id}");
        let request = self
            .request(Method::PATCH, &self.config.users_table)
            .query(&[("id", filter.as_str())])
            .header("Prefer", "return=minimal")
            .json(&json!({
                "token_identifier": token,
                "updated_at": chrono::Utc::now(),
            }));

        self.send(request).await?;
        Ok(())
    }
}

/// Extract a profile id from a UUID string, an object with `id`, or an array of those.
fn profile_id_from(value: &Value) -> Result<Option<ProfileId>> {
    match value {
        Value::Null => Ok(None),
        Value::String(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|e| StoreError::Unknown(format!("invalid profile id '{raw}': {e}"))),
        Value::Object(map) => match map.get("id") {
            Some(id) => profile_id_from(id),
            None => Ok(None),
        },
        Value::Array(items) => match items.first() {
            Some(first) => profile_id_from(first),
            None => Ok(None),
        },
        other => Err(StoreError::Unknown(format!(
            "unexpected profile id payload: {other}"
        ))),
    }
}

/// Map a rejected HTTP response onto a store error category.
pub fn classify_response(status: StatusCode, body: &str) -> StoreError {
    let api: ApiError = serde_json::from_str(body).unwrap_or_default();
    let message = match (&api.message, &api.details) {
        (Some(message), Some(details)) => format!("{message} ({details})"),
        (Some(message), None) => message.clone(),
        _ if body.trim().is_empty() => format!("HTTP {}", status.as_u16()),
        _ => body.trim().to_string(),
    };

    if let Some(code) = api.code.as_deref() {
        match code {
            "23505" => return StoreError::UniqueViolation(message),
            "23503" => return StoreError::ForeignKeyViolation(message),
            "23502" => {
                let column = NOT_NULL_COLUMN
                    .captures(&message)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                return StoreError::not_null(column, message);
            }
            "42883" | "PGRST202" => return StoreError::ProcedureNotFound(message),
            "42P01" | "42703" | "3F000" | "PGRST204" | "PGRST205" => {
                return StoreError::SchemaMissing(message);
            }
            "42501" => return StoreError::PermissionDenied(message),
            "40001" | "40P01" | "53300" | "57014" | "57P01" => {
                return StoreError::Transient(message);
            }
            c if c.starts_with("08") => return StoreError::Transient(message),
            _ => {}
        }
    }

    if MISSING_FUNCTION.is_match(&message) {
        return StoreError::ProcedureNotFound(message);
    }
    if MISSING_RELATION.is_match(&message) {
        return StoreError::SchemaMissing(message);
    }

    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => StoreError::Transient(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied(message),
        _ => StoreError::Unknown(message),
    }
}

fn classify_transport(err: &reqwest::Error) -> StoreError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: &str, message: &str) -> String {
        json!({ "code": code, "message": message, "details": null, "hint": null }).to_string()
    }

    #[test]
    fn test_constraint_codes() {
        let unique = classify_response(
            StatusCode::CONFLICT,
            &body("23505", "duplicate key value violates unique constraint \"profiles_user_id_key\""),
        );
        assert!(matches!(unique, StoreError::UniqueViolation(_)));

        let fk = classify_response(
            StatusCode::CONFLICT,
            &body("23503", "insert or update on table \"profiles\" violates foreign key constraint"),
        );
        assert!(matches!(fk, StoreError::ForeignKeyViolation(_)));
    }

    #[test]
    fn test_not_null_extracts_column() {
        let err = classify_response(
            StatusCode::BAD_REQUEST,
            &body(
                "23502",
                "null value in column \"token_identifier\" of relation \"users\" violates not-null constraint",
            ),
        );
        match err {
            StoreError::NotNullViolation { column, .. } => assert_eq!(column, "token_identifier"),
            other => panic!("expected not-null violation, got {other:?}"),
        }
    }

    #[test]
    fn test_schema_codes_require_manual_setup() {
        for code in ["PGRST202", "42883", "42P01", "42703", "PGRST204", "PGRST205"] {
            let err = classify_response(StatusCode::NOT_FOUND, &body(code, "missing"));
            assert!(err.requires_manual_setup(), "{code} should need manual setup");
        }
    }

    #[test]
    fn test_message_fallback_without_code() {
        let err = classify_response(
            StatusCode::NOT_FOUND,
            r#"{"message":"Could not find the function public.create_profile_for_user(p_email, p_full_name, p_user_id) in the schema cache"}"#,
        );
        assert!(matches!(err, StoreError::ProcedureNotFound(_)));

        let err = classify_response(
            StatusCode::BAD_REQUEST,
            r#"{"message":"relation \"public.profiles\" does not exist"}"#,
        );
        assert!(matches!(err, StoreError::SchemaMissing(_)));
    }

    #[test]
    fn test_status_fallback() {
        assert!(classify_response(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(classify_response(StatusCode::TOO_MANY_REQUESTS, "slow down").is_transient());
        assert!(matches!(
            classify_response(StatusCode::FORBIDDEN, r#"{"code":"42501","message":"new row violates row-level security policy"}"#),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_response(StatusCode::BAD_REQUEST, "<html>nope</html>"),
            StoreError::Unknown(_)
        ));
    }

    #[test]
    fn test_profile_id_shapes() {
        let id = Uuid::new_v4();
        assert_eq!(profile_id_from(&json!(id.to_string())).unwrap(), Some(id));
        assert_eq!(profile_id_from(&json!({ "id": id })).unwrap(), Some(id));
        assert_eq!(profile_id_from(&json!([{ "id": id }])).unwrap(), Some(id));
        assert_eq!(profile_id_from(&Value::Null).unwrap(), None);
        assert_eq!(profile_id_from(&json!([])).unwrap(), None);
        assert!(profile_id_from(&json!("not-a-uuid")).is_err());
        assert!(profile_id_from(&json!(42)).is_err());
    }
}
