//! Facility submission endpoint client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::config::normalize_endpoint;
use crate::models::RecordSubmission;
use crate::util::{sanitize_error, snippet};

/// How the endpoint accepted a submission. Both settle the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Created,
    AlreadyExisted,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Network trouble, timeouts and server-side failures; retried next pass
    #[error("Transient submission failure: {0}")]
    Transient(String),
    /// The endpoint refused the record and will keep refusing it
    #[error("Endpoint rejected record: {0}")]
    Rejected(String),
}

impl SubmitError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type SubmitResult = Result<Acceptance, SubmitError>;

/// Delivers one record to the facility endpoint.
#[async_trait]
pub trait RecordSubmitter: Send + Sync {
    async fn submit(&self, submission: &RecordSubmission) -> SubmitResult;
}

/// `POST {hub}/v1/records` over HTTPS.
#[derive(Clone)]
pub struct HttpRecordSubmitter {
    endpoint: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRecordSubmitter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRecordSubmitter")
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRecordSubmitter {
    pub fn new(
        hub_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let base = normalize_endpoint(hub_url.into())?;
        Ok(Self {
            endpoint: format!("{base}/v1/records"),
            api_token,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RecordSubmitter for HttpRecordSubmitter {
    async fn submit(&self, submission: &RecordSubmission) -> SubmitResult {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(submission);
        if let Some(token) = self.api_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| SubmitError::Transient(sanitize_error(&error)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_response(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponseBody {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Map an endpoint response onto the submission taxonomy.
fn classify_response(status: StatusCode, body: &str) -> SubmitResult {
    if status.is_success() {
        let already = serde_json::from_str::<SubmitResponseBody>(body)
            .ok()
            .and_then(|payload| payload.status)
            .is_some_and(|value| value == "already_exists");
        return Ok(if already {
            Acceptance::AlreadyExisted
        } else {
            Acceptance::Created
        });
    }

    let message = parse_api_error(status, body);
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::CONFLICT
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => Err(SubmitError::Rejected(message)),
        _ => Err(SubmitError::Transient(message)),
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = snippet(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn created_and_already_exists_both_accept() {
        assert_eq!(
            classify_response(StatusCode::CREATED, r#"{"status":"created"}"#),
            Ok(Acceptance::Created)
        );
        assert_eq!(
            classify_response(StatusCode::OK, r#"{"status":"already_exists"}"#),
            Ok(Acceptance::AlreadyExisted)
        );
        assert_eq!(classify_response(StatusCode::OK, ""), Ok(Acceptance::Created));
    }

    #[test]
    fn validation_failures_are_permanent() {
        let result = classify_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"record payload must name a destination room"}"#,
        );
        assert_eq!(
            result,
            Err(SubmitError::Rejected(
                "record payload must name a destination room (422)".to_string()
            ))
        );
        assert!(!classify_response(StatusCode::BAD_REQUEST, "")
            .unwrap_err()
            .is_transient());
    }

    #[test]
    fn server_and_auth_failures_are_transient() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::UNAUTHORIZED,
        ] {
            assert!(classify_response(status, "").unwrap_err().is_transient());
        }
    }

    #[test]
    fn parse_api_error_falls_back_to_status() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "   "),
            "HTTP 502".to_string()
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down (502)".to_string()
        );
    }

    #[test]
    fn submitter_requires_http_endpoint() {
        assert!(HttpRecordSubmitter::new("hub.local", None, Duration::from_secs(1)).is_err());
        let submitter = HttpRecordSubmitter::new(
            "https://hub.local/",
            Some("secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(submitter.endpoint(), "https://hub.local/v1/records");
        assert!(!format!("{submitter:?}").contains("secret"));
    }
}
