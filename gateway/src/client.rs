//! Per-partner HTTP client.
//!
//! Turns one `(partner, uid)` pair into one protected HTTP exchange. The
//! partner record alone decides body format, authentication, response field
//! paths and what counts as business success; nothing here is specific to
//! any single operator.

use crate::breaker::CircuitBreakerRegistry;
use crate::errors::SendError;
use crate::metrics_defs::{
    CIRCUIT_BREAKER_FAILURE, CIRCUIT_BREAKER_OPEN, CIRCUIT_BREAKER_SUCCESS, PARTNER_HTTP_DURATION,
    PARTNER_HTTP_ERRORS, PARTNER_HTTP_SUCCESS, PARTNER_HTTP_TIMEOUTS,
};
use crate::partner::{AuthenticationType, Partner, RequestFormat};
use crate::protocol::{
    PartnerResponse, STATUS_ERROR, VALUE_EXTRACTION_ERROR, VALUE_NOT_AVAILABLE,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{SecondsFormat, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uuid::Uuid;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

pub struct PartnerHttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl PartnerHttpClient {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        PartnerHttpClient { client, breakers }
    }

    /// Sends one start-charging request to `partner`, protected by its
    /// breaker. Never fails: every outcome is folded into the returned
    /// `PartnerResponse`.
    pub async fn send_start_charging(&self, partner: &Partner, uid: &str) -> PartnerResponse {
        if !self.breakers.acquire(&partner.id) {
            metrics::counter!(CIRCUIT_BREAKER_OPEN.name).increment(1);
            tracing::warn!(
                partner_id = %partner.id,
                "Circuit breaker open, returning immediate fallback"
            );
            return PartnerResponse::circuit_breaker_open(&partner.id);
        }

        tracing::debug!(
            partner_id = %partner.id,
            url = %partner.request_url(),
            uid = uid,
            "Sending request to partner"
        );

        let start = Instant::now();
        let result = self.exchange(partner, uid).await;
        let duration = start.elapsed();
        metrics::histogram!(PARTNER_HTTP_DURATION.name, "partner_id" => partner.id.clone())
            .record(duration.as_secs_f64());

        match result {
            Ok(body) => {
                self.breakers.record_success(&partner.id, duration);
                metrics::counter!(CIRCUIT_BREAKER_SUCCESS.name).increment(1);

                let response = interpret_response(partner, &body, duration);
                if response.success {
                    metrics::counter!(PARTNER_HTTP_SUCCESS.name).increment(1);
                    tracing::info!(
                        partner_id = %partner.id,
                        response_time_ms = response.response_time_ms,
                        "Partner request successful"
                    );
                } else {
                    metrics::counter!(PARTNER_HTTP_ERRORS.name).increment(1);
                    tracing::warn!(
                        partner_id = %partner.id,
                        status = %response.status,
                        response_time_ms = response.response_time_ms,
                        "Partner request business failure"
                    );
                }
                response
            }
            Err(e) => {
                let message = e.to_string();
                self.breakers.record_failure(&partner.id, duration, &message);
                metrics::counter!(CIRCUIT_BREAKER_FAILURE.name).increment(1);

                let is_timeout = SendError::is_timeout_text(&message);
                if is_timeout {
                    metrics::counter!(PARTNER_HTTP_TIMEOUTS.name).increment(1);
                    tracing::warn!(
                        partner_id = %partner.id,
                        response_time_ms = duration.as_millis() as u64,
                        "Partner request timeout"
                    );
                } else {
                    metrics::counter!(PARTNER_HTTP_ERRORS.name).increment(1);
                    tracing::warn!(
                        partner_id = %partner.id,
                        error = %message,
                        "Partner request technical error"
                    );
                }

                PartnerResponse {
                    partner_id: partner.id.clone(),
                    success: false,
                    status: STATUS_ERROR.to_string(),
                    message,
                    response_time_ms: duration.as_millis() as u64,
                    timeout: is_timeout,
                    circuit_breaker_open: false,
                }
            }
        }
    }

    /// One wire exchange under the partner's deadline; resolves to the
    /// response body parsed as a JSON object.
    async fn exchange(
        &self,
        partner: &Partner,
        uid: &str,
    ) -> Result<serde_json::Map<String, Value>, SendError> {
        let request = build_request(partner, uid)?;

        let attempt = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| SendError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SendError::Status(status));
            }

            let body = response
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .map_err(|e| SendError::Body(e.to_string()))?;

            match serde_json::from_slice::<Value>(&body) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(SendError::Body("expected a JSON object".to_string())),
                Err(e) => Err(SendError::Body(e.to_string())),
            }
        };

        timeout(Duration::from_millis(partner.timeout_ms), attempt)
            .await
            .map_err(|_| SendError::Timeout(partner.timeout_ms))?
    }
}

/// Assembles the outbound request: body per `request_format`, content type,
/// authentication, custom headers merged last, `Accept` set at dispatch.
fn build_request(partner: &Partner, uid: &str) -> Result<Request<Full<Bytes>>, SendError> {
    let (content_type, body) = render_body(partner, uid)?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    apply_auth(&mut headers, partner);
    merge_custom_headers(&mut headers, partner);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let mut request = Request::builder()
        .method(partner.http_method.clone())
        .uri(partner.request_url())
        .body(Full::new(body))
        .map_err(|e| SendError::BuildRequest(e.to_string()))?;
    *request.headers_mut() = headers;
    Ok(request)
}

fn render_body(partner: &Partner, uid: &str) -> Result<(&'static str, Bytes), SendError> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let request_id = Uuid::new_v4().to_string();

    match partner.request_format {
        RequestFormat::Json => {
            let mut body = serde_json::Map::new();
            body.insert(partner.uid_field_name.clone(), Value::String(uid.to_string()));
            body.insert("timestamp".to_string(), Value::String(timestamp));
            body.insert("requestId".to_string(), Value::String(request_id));
            let bytes = serde_json::to_vec(&Value::Object(body))
                .map_err(|e| SendError::BuildRequest(e.to_string()))?;
            Ok(("application/json", Bytes::from(bytes)))
        }
        RequestFormat::Xml => {
            let field = xml_escape(&partner.uid_field_name);
            let uid = xml_escape(uid);
            let body = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <StartChargingRequest>\
                 <{field}>{uid}</{field}>\
                 <timestamp>{timestamp}</timestamp>\
                 <requestId>{request_id}</requestId>\
                 </StartChargingRequest>"
            );
            Ok(("application/xml", Bytes::from(body)))
        }
        RequestFormat::FormData => {
            let body = url::form_urlencoded::Serializer::new(String::new())
                .append_pair(&partner.uid_field_name, uid)
                .append_pair("timestamp", &timestamp)
                .append_pair("requestId", &request_id)
                .finish();
            Ok(("application/x-www-form-urlencoded", Bytes::from(body)))
        }
    }
}

fn apply_auth(headers: &mut HeaderMap, partner: &Partner) {
    let Some(api_key) = partner.api_key.as_deref() else {
        if partner.authentication_type != AuthenticationType::None {
            tracing::warn!(
                partner_id = %partner.id,
                "Authentication configured but no api_key present, sending without auth"
            );
        }
        return;
    };

    match partner.authentication_type {
        AuthenticationType::None => {}
        AuthenticationType::ApiKey => {
            insert_header(headers, X_API_KEY, api_key, &partner.id);
        }
        AuthenticationType::Bearer => {
            insert_header(headers, AUTHORIZATION, &format!("Bearer {api_key}"), &partner.id);
        }
        AuthenticationType::Basic => match api_key.split_once(':') {
            Some((user, password)) => {
                let encoded = BASE64.encode(format!("{user}:{password}"));
                insert_header(headers, AUTHORIZATION, &format!("Basic {encoded}"), &partner.id);
            }
            None => {
                tracing::warn!(partner_id = %partner.id, "Invalid BASIC auth format, sending without auth");
            }
        },
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str, partner_id: &str) {
    match HeaderValue::from_str(value) {
        Ok(header_value) => {
            headers.insert(name, header_value);
        }
        Err(_) => {
            tracing::warn!(
                partner_id = partner_id,
                header = %name,
                "Header value not representable, skipping header"
            );
        }
    }
}

/// Custom headers win on conflict; overriding a gateway-set content-type or
/// auth header is allowed but logged.
fn merge_custom_headers(headers: &mut HeaderMap, partner: &Partner) {
    for (name, value) in &partner.custom_headers {
        let parsed = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        );
        match parsed {
            (Ok(header_name), Ok(header_value)) => {
                let shadows_gateway_header = (header_name == CONTENT_TYPE
                    || header_name == AUTHORIZATION
                    || header_name == X_API_KEY)
                    && headers.contains_key(&header_name);
                if shadows_gateway_header {
                    tracing::warn!(
                        partner_id = %partner.id,
                        header = %header_name,
                        "Custom header overrides a gateway-set header"
                    );
                }
                headers.insert(header_name, header_value);
            }
            _ => {
                tracing::warn!(
                    partner_id = %partner.id,
                    header = name,
                    "Custom header not representable, skipping"
                );
            }
        }
    }
}

fn xml_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn interpret_response(
    partner: &Partner,
    body: &serde_json::Map<String, Value>,
    duration: Duration,
) -> PartnerResponse {
    let status = extract_field(&partner.response_status_path, body);
    let message = extract_field(&partner.response_message_path, body);
    let success = matches_success_pattern(&partner.success_status_pattern, &status);

    tracing::debug!(
        partner_id = %partner.id,
        status = %status,
        expected = %partner.success_status_pattern,
        success = success,
        "Interpreted partner response"
    );

    PartnerResponse {
        partner_id: partner.id.clone(),
        success,
        status,
        message,
        response_time_ms: duration.as_millis() as u64,
        timeout: false,
        circuit_breaker_open: false,
    }
}

/// Walks a dot-separated path through nested JSON objects. A missing key,
/// a null, or a non-object intermediate resolves to the `N/A` sentinel.
fn extract_field(path: &str, body: &serde_json::Map<String, Value>) -> String {
    if path.trim().is_empty() {
        return VALUE_NOT_AVAILABLE.to_string();
    }

    let mut parts = path.split('.');
    let mut current = match parts.next().and_then(|first| body.get(first)) {
        Some(Value::Null) | None => return VALUE_NOT_AVAILABLE.to_string(),
        Some(value) => value,
    };
    for part in parts {
        match current {
            Value::Object(map) => match map.get(part) {
                Some(Value::Null) | None => return VALUE_NOT_AVAILABLE.to_string(),
                Some(next) => current = next,
            },
            _ => return VALUE_NOT_AVAILABLE.to_string(),
        }
    }

    match current {
        Value::String(s) => s.clone(),
        other => {
            serde_json::to_string(other).unwrap_or_else(|_| VALUE_EXTRACTION_ERROR.to_string())
        }
    }
}

/// Comma-separated pattern, each token trimmed, matched case-insensitively.
fn matches_success_pattern(pattern: &str, status: &str) -> bool {
    let status = status.trim();
    pattern
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case(status))
}
