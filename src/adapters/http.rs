use crate::utils::error::{LookupError, Result};
use crate::utils::throttle::Throttle;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = concat!("nh-rep-finder/", env!("CARGO_PKG_VERSION"));

/// Shared client with a mandatory request timeout.
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// 429 and 5xx are worth one more try.
pub fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub fn status_error(service: &str, status: StatusCode) -> LookupError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        LookupError::UpstreamRateLimited {
            service: service.to_string(),
        }
    } else {
        LookupError::UpstreamUnavailable {
            service: service.to_string(),
            message: format!("HTTP {}", status),
        }
    }
}

/// Timeouts and connection failures become `UpstreamUnavailable`; anything
/// else keeps the underlying reqwest error.
pub fn transport_error(service: &str, error: reqwest::Error) -> LookupError {
    if error.is_timeout() || error.is_connect() {
        LookupError::UpstreamUnavailable {
            service: service.to_string(),
            message: error.to_string(),
        }
    } else {
        LookupError::Http(error)
    }
}

/// How often and how patiently a request is re-sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        retries: 0,
        delay: Duration::ZERO,
    };

    pub fn once_after(delay: Duration) -> Self {
        Self { retries: 1, delay }
    }
}

/// Sends the request built by `build`, waiting on `throttle` before every
/// attempt. 429, 5xx, timeouts and connection failures are retried per
/// `policy`; anything else fails at once. Only 2xx responses are returned.
pub async fn send_with_retry<F>(
    service: &str,
    throttle: &Throttle,
    policy: RetryPolicy,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        throttle.wait().await;
        let (error, retryable) = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                (status_error(service, status), is_transient(status))
            }
            Err(e) => {
                let retryable = e.is_timeout() || e.is_connect();
                (transport_error(service, e), retryable)
            }
        };

        if !retryable || attempt >= policy.retries {
            return Err(error);
        }
        attempt += 1;
        tracing::warn!("{} request failed ({}), retrying in {:?}", service, error, policy.delay);
        tokio::time::sleep(policy.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient(StatusCode::NOT_FOUND));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_status_error_kinds() {
        assert!(matches!(
            status_error("openstates", StatusCode::TOO_MANY_REQUESTS),
            LookupError::UpstreamRateLimited { .. }
        ));
        match status_error("openstates", StatusCode::BAD_GATEWAY) {
            LookupError::UpstreamUnavailable { message, .. } => assert!(message.contains("502")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_with_retry_gives_up_after_policy() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/flaky");
                then.status(502);
            })
            .await;

        let client = Client::new();
        let url = server.url("/flaky");
        let throttle = Throttle::new(Duration::ZERO);
        let policy = RetryPolicy::once_after(Duration::from_millis(10));
        let err = send_with_retry("test", &throttle, policy, || client.get(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::UpstreamUnavailable { .. }));
        mock.assert_hits_async(2).await;

        let err = send_with_retry("test", &throttle, RetryPolicy::NONE, || client.get(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::UpstreamUnavailable { .. }));
        mock.assert_hits_async(3).await;
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://x/", "/people"), "http://x/people");
        assert_eq!(join_url("http://x", "people.geo"), "http://x/people.geo");
    }
}
