//! HTTP client construction and failure classification.

use std::time::Duration;

use autopress_core::CollaboratorError;
use autopress_shared::{AutopressError, FailureKind, Result};
use reqwest::{Client, StatusCode};

pub(crate) fn build_client(user_agent: &str, timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| AutopressError::Network(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success status to a failure kind.
pub(crate) fn classify_status(status: StatusCode) -> FailureKind {
    match status.as_u16() {
        401 | 403 => FailureKind::AuthRejected,
        408 => FailureKind::Timeout,
        429 => FailureKind::RateLimited,
        500..=599 => FailureKind::ServerError,
        _ => FailureKind::ValidationRejected,
    }
}

/// Map a transport-level error to a failure kind.
pub(crate) fn classify_transport(e: &reqwest::Error) -> FailureKind {
    if e.is_timeout() {
        FailureKind::Timeout
    } else if let Some(status) = e.status() {
        classify_status(status)
    } else {
        FailureKind::Network
    }
}

pub(crate) fn transport_error(context: &str, e: reqwest::Error) -> CollaboratorError {
    CollaboratorError::new(classify_transport(&e), format!("{context}: {e}"))
}

/// Turn a non-success response into an error, keeping a bounded slice of the
/// body for the log.
pub(crate) async fn status_error(context: &str, response: reqwest::Response) -> CollaboratorError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    CollaboratorError::new(
        classify_status(status),
        format!("{context}: HTTP {status}: {snippet}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_failure_kinds() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), FailureKind::AuthRejected);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), FailureKind::AuthRejected);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureKind::RateLimited);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FailureKind::ServerError);
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            FailureKind::ValidationRejected
        );
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST).is_transient());
    }
}
