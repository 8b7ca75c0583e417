//! Inventory Hub API gateway.
//!
//! Every call the console makes goes through [`ApiGateway::request`]: path
//! validation, query encoding, JSON bodies, error normalisation and the
//! diagnostics tap that records each request into the [`RequestLog`].

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

use crate::diagnostics::{ApiEvent, RequestLog};
use crate::error::ApiError;
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Query building
// ---------------------------------------------------------------------------

fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Append `key=value` pairs to `path`, skipping null and empty values.
pub fn build_query(path: &str, query: &[(&str, Option<String>)]) -> String {
    let pairs: Vec<String> = query
        .iter()
        .filter_map(|(k, v)| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| format!("{}={}", encode_component(k), encode_component(v)))
        })
        .collect();
    if pairs.is_empty() {
        return path.to_string();
    }
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{path}{sep}{}", pairs.join("&"))
}

/// Percent-encode a single path segment (supplier code, invoice number, ...).
pub fn segment(raw: &str) -> String {
    encode_component(raw.trim())
}

pub(crate) fn validate_api_path(path: &str) -> Result<(), ApiError> {
    if path.trim().is_empty() {
        return Err(ApiError::InvalidPath("missing API path".into()));
    }
    if path.contains("..") {
        return Err(ApiError::InvalidPath(path.to_string()));
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Err(ApiError::InvalidPath(
            "absolute URLs are not allowed".into(),
        ));
    }
    if !path.starts_with('/') {
        return Err(ApiError::InvalidPath(format!("{path} (missing leading slash)")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(base: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach Inventory Hub API at {base}");
    }
    if err.is_timeout() {
        return format!("Connection to {base} timed out");
    }
    if err.is_builder() {
        return format!("Invalid Inventory Hub API URL: {base}");
    }
    format!("Network error communicating with {base}: {err}")
}

fn http_error(status: StatusCode, body: String) -> ApiError {
    ApiError::Http {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        body,
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Shared HTTP gateway. Cloning is cheap and shares the connection pool and
/// the request log.
#[derive(Debug, Clone)]
pub struct ApiGateway {
    client: Client,
    base_url: String,
    requests: RequestLog,
    capture: bool,
}

impl ApiGateway {
    pub fn new(settings: &Settings, requests: RequestLog) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: crate::settings::normalize_api_base(&settings.api.base_url),
            requests,
            capture: settings.diagnostics.capture_requests,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_log(&self) -> &RequestLog {
        &self.requests
    }

    /// Perform a request against the Inventory Hub API.
    ///
    /// `path` must include the leading slash and may already carry a query
    /// string (see [`build_query`]). Empty 2xx bodies yield `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        validate_api_path(path)?;
        let full_url = format!("{}{}", self.base_url, path);
        let started = Instant::now();

        let mut req = self.client.request(method.clone(), &full_url);
        for (name, value) in headers {
            req = req.header(*name, value);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let (status, result) = self.send(req).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => debug!(method = %method, path, elapsed_ms = elapsed, "api request ok"),
            Err(e) => warn!(method = %method, path, elapsed_ms = elapsed, error = %e, "api request failed"),
        }

        if self.capture {
            self.requests.record(ApiEvent {
                seq: 0,
                at: chrono::Utc::now().to_rfc3339(),
                method: method.to_string(),
                path: path.to_string(),
                status,
                duration_ms: elapsed,
                ok: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
            });
        }

        result
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> (Option<u16>, Result<Value, ApiError>) {
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return (None, Err(ApiError::Network(friendly_error(&self.base_url, &e)))),
        };
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        let result = if !status.is_success() {
            Err(http_error(status, body_text))
        } else if body_text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(&body_text).map_err(|e| ApiError::Decode(e.to_string()))
        };
        (Some(status.as_u16()), result)
    }

    pub async fn get_value(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::GET, path, None, &[]).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        decode(self.get_value(path).await?)
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        self.send_json(Method::POST, path, body, &[]).await
    }

    /// POST without a request body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        decode(self.request(Method::POST, path, None, &[]).await?)
    }

    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(Method::PUT, path, Some(body), &[]).await
    }

    pub async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        headers: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        decode(self.request(method, path, body.as_ref(), headers).await?)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_query_skips_empty_values() {
        let path = build_query(
            "/logs/recent",
            &[
                ("limit", Some("50".into())),
                ("supplier", None),
                ("exts", Some("  ".into())),
            ],
        );
        assert_eq!(path, "/logs/recent?limit=50");
    }

    #[test]
    fn build_query_encodes_reserved_characters() {
        let path = build_query(
            "/files/preview",
            &[("relpath", Some("suppliers/paul-lange/invoices/csv/F 1&2.csv".into()))],
        );
        assert_eq!(
            path,
            "/files/preview?relpath=suppliers%2Fpaul-lange%2Finvoices%2Fcsv%2FF%201%262.csv"
        );
    }

    #[test]
    fn build_query_appends_to_existing_query() {
        assert_eq!(
            build_query("/a?x=1", &[("y", Some("2".into()))]),
            "/a?x=1&y=2"
        );
        assert_eq!(build_query("/a", &[]), "/a");
    }

    #[test]
    fn segment_keeps_invoice_ids_readable() {
        assert_eq!(segment("paul-lange:F2026010234"), "paul-lange:F2026010234");
        assert_eq!(segment(" F 1/2 "), "F%201%2F2");
    }

    #[test]
    fn validate_api_path_rejects_traversal_and_absolute_urls() {
        assert!(validate_api_path("/suppliers").is_ok());
        assert!(validate_api_path("").is_err());
        assert!(validate_api_path("/files/../etc").is_err());
        assert!(validate_api_path("https://evil.example/x").is_err());
        assert!(validate_api_path("suppliers").is_err());
    }

    #[test]
    fn http_error_uses_canonical_reason() {
        let err = http_error(StatusCode::NOT_FOUND, "Session not found".into());
        assert_eq!(err.to_string(), "404 Not Found: Session not found");
    }

    #[tokio::test]
    async fn unreachable_api_is_recorded_as_failed_event() {
        let mut settings = Settings::default();
        // Port 9 (discard) on localhost is expected to refuse connections.
        settings.api.base_url = "http://127.0.0.1:9".into();
        settings.api.timeout_secs = 2;
        let log = RequestLog::new(4);
        let gateway = ApiGateway::new(&settings, log.clone()).unwrap();

        let err = gateway.get_value("/health").await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));

        let events = log.snapshot();
        assert_eq!(events.len(), 1);
        assert!(!events[0].ok);
        assert_eq!(events[0].path, "/health");
        assert_eq!(events[0].status, None);
    }

    #[tokio::test]
    async fn invalid_path_is_rejected_before_sending() {
        let log = RequestLog::new(4);
        let gateway = ApiGateway::new(&Settings::default(), log.clone()).unwrap();
        let err = gateway.get_value("../secret").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidPath(_)));
        assert!(log.snapshot().is_empty());
    }
}
