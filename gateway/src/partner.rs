//! Partner configuration model.
//!
//! Two shapes exist for a partner:
//!
//! 1. [`PartnerRecord`] is the stored shape, as a repository persists it.
//!    Format and auth fields are plain strings so that any relational
//!    driver maps them to text columns, and the `api_key` column holds the
//!    encoded secret.
//! 2. [`Partner`] is the decrypted, parsed value type the cache hands to
//!    the broadcast path. Immutable per cache generation.

use chrono::{DateTime, Utc};
use hyper::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the outbound request authenticates against the partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    None,
    ApiKey,
    Bearer,
    Basic,
}

impl AuthenticationType {
    /// Lenient parse: unrecognized values mean no authentication, matching
    /// how the stored string column is interpreted everywhere else.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "API_KEY" => AuthenticationType::ApiKey,
            "BEARER" => AuthenticationType::Bearer,
            "BASIC" => AuthenticationType::Basic,
            "NONE" | "" => AuthenticationType::None,
            other => {
                tracing::warn!(
                    authentication_type = other,
                    "Unknown authentication type, sending without auth header"
                );
                AuthenticationType::None
            }
        }
    }
}

/// Body encoding for the outbound start-charging request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFormat {
    Json,
    Xml,
    FormData,
}

impl RequestFormat {
    /// Lenient parse: unknown values fall back to JSON.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "JSON" | "" => RequestFormat::Json,
            "XML" => RequestFormat::Xml,
            "FORM_DATA" => RequestFormat::FormData,
            other => {
                tracing::warn!(request_format = other, "Unknown request format, using JSON");
                RequestFormat::Json
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartnerStatus {
    #[default]
    Active,
    Inactive,
}

fn default_request_format() -> String {
    "JSON".to_string()
}

fn default_success_status_pattern() -> String {
    "success".to_string()
}

fn default_uid_field_name() -> String {
    "uid".to_string()
}

fn default_response_status_path() -> String {
    "status".to_string()
}

fn default_response_message_path() -> String {
    "message".to_string()
}

fn default_authentication_type() -> String {
    "NONE".to_string()
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_enabled() -> bool {
    true
}

/// Stored partner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PartnerRecord {
    pub partner_id: String,
    pub name: String,
    pub base_url: String,
    pub start_charging_endpoint: String,

    #[serde(default = "default_request_format")]
    pub request_format: String,
    #[serde(default = "default_success_status_pattern")]
    pub success_status_pattern: String,
    #[serde(default = "default_uid_field_name")]
    pub uid_field_name: String,
    #[serde(default = "default_response_status_path")]
    pub response_status_path: String,
    #[serde(default = "default_response_message_path")]
    pub response_message_path: String,

    #[serde(default = "default_authentication_type")]
    pub authentication_type: String,
    /// Encoded at rest; the cache decodes it before building a [`Partner`].
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub status: PartnerStatus,
    #[serde(default = "default_http_method")]
    pub http_method: String,

    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PartnerRecord {
    pub fn is_active(&self) -> bool {
        self.enabled && self.status == PartnerStatus::Active
    }

    /// Structural checks applied on the write path. The broadcast path
    /// never validates; it only ever sees records that passed here.
    pub fn validate(&self) -> Result<(), String> {
        if self.partner_id.trim().is_empty() {
            return Err("partner_id must not be empty".into());
        }
        if self.base_url.trim().is_empty() {
            return Err("base_url must not be empty".into());
        }
        if self.start_charging_endpoint.trim().is_empty() {
            return Err("start_charging_endpoint must not be empty".into());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".into());
        }
        if AuthenticationType::parse(&self.authentication_type) == AuthenticationType::Basic {
            let well_formed = self
                .api_key
                .as_deref()
                .is_some_and(|key| key.splitn(2, ':').count() == 2);
            if !well_formed {
                return Err("BASIC authentication requires api_key in user:password form".into());
            }
        }
        Ok(())
    }
}

/// Decrypted partner as the broadcast path consumes it.
#[derive(Debug, Clone)]
pub struct Partner {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub start_charging_endpoint: String,
    pub http_method: Method,
    pub authentication_type: AuthenticationType,
    /// Decrypted secret. Raw key for API_KEY, token for BEARER,
    /// `user:password` for BASIC.
    pub api_key: Option<String>,
    pub request_format: RequestFormat,
    pub uid_field_name: String,
    pub success_status_pattern: String,
    pub response_status_path: String,
    pub response_message_path: String,
    pub timeout_ms: u64,
    pub custom_headers: HashMap<String, String>,
}

impl Partner {
    /// Builds the cached value type from a stored record and its already
    /// decoded secret.
    pub fn from_record(record: &PartnerRecord, api_key: Option<String>) -> Self {
        let http_method = Method::try_from(record.http_method.trim().to_ascii_uppercase().as_str())
            .unwrap_or(Method::POST);

        Partner {
            id: record.partner_id.clone(),
            name: record.name.clone(),
            base_url: record.base_url.clone(),
            start_charging_endpoint: record.start_charging_endpoint.clone(),
            http_method,
            authentication_type: AuthenticationType::parse(&record.authentication_type),
            api_key,
            request_format: RequestFormat::parse(&record.request_format),
            uid_field_name: record.uid_field_name.clone(),
            success_status_pattern: record.success_status_pattern.clone(),
            response_status_path: record.response_status_path.clone(),
            response_message_path: record.response_message_path.clone(),
            timeout_ms: record.timeout_ms.max(1),
            custom_headers: record.custom_headers.clone(),
        }
    }

    /// Request URL is plain concatenation; no path normalization happens.
    pub fn request_url(&self) -> String {
        format!("{}{}", self.base_url, self.start_charging_endpoint)
    }
}

#[cfg(test)]
pub(crate) fn test_record(partner_id: &str, base_url: &str) -> PartnerRecord {
    PartnerRecord {
        partner_id: partner_id.to_string(),
        name: format!("Partner {partner_id}"),
        base_url: base_url.to_string(),
        start_charging_endpoint: "/start".to_string(),
        request_format: default_request_format(),
        success_status_pattern: default_success_status_pattern(),
        uid_field_name: default_uid_field_name(),
        response_status_path: default_response_status_path(),
        response_message_path: default_response_message_path(),
        authentication_type: default_authentication_type(),
        api_key: None,
        timeout_ms: default_timeout_ms(),
        enabled: true,
        status: PartnerStatus::Active,
        http_method: default_http_method(),
        custom_headers: HashMap::new(),
        created_at: None,
        updated_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_request_format_falls_back_to_json() {
        assert_eq!(RequestFormat::parse("PROTOBUF"), RequestFormat::Json);
        assert_eq!(RequestFormat::parse("form_data"), RequestFormat::FormData);
        assert_eq!(RequestFormat::parse("xml"), RequestFormat::Xml);
    }

    #[test]
    fn unknown_authentication_type_means_no_auth() {
        assert_eq!(AuthenticationType::parse("OAUTH2"), AuthenticationType::None);
        assert_eq!(AuthenticationType::parse("api_key"), AuthenticationType::ApiKey);
        assert_eq!(AuthenticationType::parse("Bearer"), AuthenticationType::Bearer);
    }

    #[test]
    fn record_defaults_apply_when_fields_are_omitted() {
        let yaml = r#"
            partner_id: cpo-a
            name: CPO A
            base_url: http://cpo-a.example.com
            start_charging_endpoint: /api/charge
        "#;
        let record: PartnerRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(record.request_format, "JSON");
        assert_eq!(record.success_status_pattern, "success");
        assert_eq!(record.uid_field_name, "uid");
        assert_eq!(record.response_status_path, "status");
        assert_eq!(record.response_message_path, "message");
        assert_eq!(record.timeout_ms, 5000);
        assert!(record.enabled);
        assert_eq!(record.status, PartnerStatus::Active);
        assert!(record.is_active());
    }

    #[test]
    fn conversion_clamps_timeout_to_at_least_one() {
        let mut record = test_record("a", "http://a.example.com");
        record.timeout_ms = 0;
        let partner = Partner::from_record(&record, None);
        assert_eq!(partner.timeout_ms, 1);
    }

    #[test]
    fn request_url_is_plain_concatenation() {
        let mut record = test_record("a", "http://a.example.com");
        record.start_charging_endpoint = "start".to_string();
        let partner = Partner::from_record(&record, None);
        assert_eq!(partner.request_url(), "http://a.example.comstart");
    }

    #[test]
    fn validate_rejects_basic_auth_without_separator() {
        let mut record = test_record("a", "http://a.example.com");
        record.authentication_type = "BASIC".to_string();
        record.api_key = Some("user-without-password".to_string());
        assert!(record.validate().is_err());

        record.api_key = Some("user:password".to_string());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_required_fields() {
        let mut record = test_record("a", "http://a.example.com");
        record.base_url = "  ".to_string();
        assert!(record.validate().is_err());

        let mut record = test_record("a", "http://a.example.com");
        record.timeout_ms = 0;
        assert!(record.validate().is_err());
    }

    #[test]
    fn disabled_or_inactive_records_are_not_active() {
        let mut record = test_record("a", "http://a.example.com");
        record.enabled = false;
        assert!(!record.is_active());

        let mut record = test_record("a", "http://a.example.com");
        record.status = PartnerStatus::Inactive;
        assert!(!record.is_active());
    }
}
