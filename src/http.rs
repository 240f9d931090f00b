//! Blocking JSON HTTP client with retry on transient failures.
//!
//! Requests run on a small private tokio runtime and are exposed synchronously,
//! so pipeline workers (plain OS threads) can call them directly:
//! - Transient statuses (429 and 5xx by default) and transport errors are
//!   retried with exponential backoff
//! - Any other non-2xx status fails immediately
//! - Bodies are decoded as JSON

use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::error::RequestFailure;

/// Retry policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    /// Default: 4
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for each further retry.
    /// Default: 500ms
    pub base_delay: Duration,

    /// Upper bound for a single backoff delay.
    /// Default: 8s
    pub max_delay: Duration,

    /// Statuses considered transient.
    /// Default: 429, 500, 502, 503, 504
    pub transient_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            transient_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    pub fn is_transient(&self, status: u16) -> bool {
        self.transient_statuses.contains(&status)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Configuration for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-attempt timeout.
    /// Default: 60s
    pub timeout: Duration,

    /// Sent with every request; Nominatim rejects anonymous clients.
    /// Default: `activity-mapper/<version>`
    pub user_agent: String,

    /// Worker threads of the private runtime.
    /// Default: 2
    pub runtime_threads: usize,

    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: concat!("activity-mapper/", env!("CARGO_PKG_VERSION")).to_string(),
            runtime_threads: 2,
            retry: RetryConfig::default(),
        }
    }
}

/// JSON client shared by every fetch worker and the geocoder.
pub struct HttpClient {
    client: Client,
    runtime: Runtime,
    retry: RetryConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self, RequestFailure> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RequestFailure::Transport(format!("failed to create HTTP client: {e}")))?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.runtime_threads.max(1))
            .thread_name("http-runtime")
            .enable_all()
            .build()
            .map_err(|e| RequestFailure::Transport(format!("failed to create runtime: {e}")))?;

        Ok(Self {
            client,
            runtime,
            retry: config.retry,
        })
    }

    /// GET `url` with query parameters and extra headers, decoding the JSON body.
    pub fn get(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<Value, RequestFailure> {
        self.execute("GET", url, || {
            headers
                .iter()
                .fold(self.client.get(url).query(params), |request, (name, value)| {
                    request.header(*name, value.as_str())
                })
        })
    }

    /// POST a urlencoded form to `url`, decoding the JSON body.
    pub fn post(&self, url: &str, form: &[(&str, String)]) -> Result<Value, RequestFailure> {
        self.execute("POST", url, || self.client.post(url).form(form))
    }

    fn execute<F>(&self, method: &str, url: &str, build: F) -> Result<Value, RequestFailure>
    where
        F: Fn() -> RequestBuilder,
    {
        self.runtime.block_on(async {
            let start = Instant::now();
            let mut attempt = 0;

            loop {
                attempt += 1;
                let last_attempt = attempt >= self.retry.max_attempts;

                match build().send().await {
                    Ok(response) => {
                        let status = response.status();

                        if status.is_success() {
                            let bytes = match response.bytes().await {
                                Ok(bytes) => bytes,
                                Err(e) => {
                                    return Err(RequestFailure::Transport(format!(
                                        "body download error: {e}"
                                    )))
                                }
                            };
                            debug!(
                                "[HttpClient] {} {} -> {} ({} bytes, {:?}, attempt {})",
                                method, url, status.as_u16(), bytes.len(), start.elapsed(), attempt
                            );
                            return serde_json::from_slice(&bytes)
                                .map_err(|e| RequestFailure::Malformed(e.to_string()));
                        }

                        if !self.retry.is_transient(status.as_u16()) {
                            return Err(RequestFailure::Rejected {
                                status: status.as_u16(),
                                reason: reason(status),
                            });
                        }

                        if last_attempt {
                            warn!(
                                "[HttpClient] {} {} -> {}, giving up after {} attempts",
                                method, url, status.as_u16(), attempt
                            );
                            return Err(RequestFailure::RetriesExhausted {
                                status: status.as_u16(),
                                reason: reason(status),
                                attempts: attempt,
                            });
                        }

                        let wait = self.retry.backoff(attempt);
                        warn!(
                            "[HttpClient] {} {} -> {}, retry {} after {:?}",
                            method, url, status.as_u16(), attempt, wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                    Err(e) => {
                        if last_attempt {
                            warn!(
                                "[HttpClient] {} {} failed: {}, giving up after {} attempts",
                                method, url, e, attempt
                            );
                            return Err(RequestFailure::Transport(e.to_string()));
                        }

                        let wait = self.retry.backoff(attempt);
                        warn!(
                            "[HttpClient] {} {} error: {}, retry {} after {:?}",
                            method, url, e, attempt, wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        })
    }
}

fn reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client() -> HttpClient {
        HttpClient::new(HttpConfig {
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                ..RetryConfig::default()
            },
            ..HttpConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_secs(1));
        assert_eq!(retry.backoff(3), Duration::from_secs(2));
        assert_eq!(retry.backoff(10), Duration::from_secs(8));
    }

    #[test]
    fn test_get_returns_json() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/athlete/activities")
                .query_param("page", "2")
                .header("Authorization", "Bearer token");
            then.status(200).json_body(json!([{"id": 1}]));
        });

        let body = client()
            .get(
                &server.url("/athlete/activities"),
                &[("page", "2".to_string())],
                &[("Authorization", "Bearer token".to_string())],
            )
            .unwrap();

        mock.assert();
        assert_eq!(body, json!([{"id": 1}]));
    }

    #[test]
    fn test_transient_status_is_retried_until_exhausted() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/busy");
            then.status(503);
        });

        let err = client().get(&server.url("/busy"), &[], &[]).unwrap_err();

        mock.assert_hits(4);
        assert_eq!(
            err,
            RequestFailure::RetriesExhausted {
                status: 503,
                reason: "Service Unavailable".to_string(),
                attempts: 4,
            }
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_transient_status_recovers_on_retry() {
        let server = MockServer::start();
        let mut busy = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503);
        });

        // Long enough backoff to swap the mock between attempts
        let client = HttpClient::new(HttpConfig {
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_millis(500),
                ..RetryConfig::default()
            },
            ..HttpConfig::default()
        })
        .unwrap();
        let url = server.url("/flaky");
        let request = std::thread::spawn(move || client.get(&url, &[], &[]));

        while busy.hits() == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        let busy_hits = busy.hits();
        busy.delete();
        let ok = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(200).json_body(json!({"ok": true}));
        });

        let body = request.join().unwrap().unwrap();

        assert_eq!(body, json!({"ok": true}));
        assert_eq!(busy_hits + ok.hits(), 2);
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        });

        let err = client().get(&server.url("/missing"), &[], &[]).unwrap_err();

        mock.assert_hits(1);
        assert_eq!(err.status(), Some(404));
        assert!(matches!(err, RequestFailure::Rejected { .. }));
    }

    #[test]
    fn test_non_json_body_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/html");
            then.status(200).body("<html></html>");
        });

        let err = client().get(&server.url("/html"), &[], &[]).unwrap_err();
        assert!(matches!(err, RequestFailure::Malformed(_)));
    }

    #[test]
    fn test_post_sends_form() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .x_www_form_urlencoded_tuple("grant_type", "refresh_token");
            then.status(200).json_body(json!({"access_token": "abc"}));
        });

        let body = client()
            .post(
                &server.url("/oauth/token"),
                &[("grant_type", "refresh_token".to_string())],
            )
            .unwrap();

        mock.assert();
        assert_eq!(body["access_token"], "abc");
    }
}
