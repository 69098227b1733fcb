use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, CONTENT_TYPE, LINK, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

/// Bodies are cut here; markers live in the head of a page.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// A response worth looking at: anything that is not a 429 or a 5xx.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: Url,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub link: Option<String>,
    pub body: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error (HTTP {0})")]
    Server(u16),
    #[error("request failed: {0}")]
    Request(String),
}

impl FetchFailure {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Request(_))
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(error_chain(&e))
        } else {
            Self::Request(error_chain(&e))
        }
    }
}

/// Outcome of one URL after the retry budget is spent or a page came back.
#[derive(Debug)]
pub struct Fetched {
    pub result: Result<Page, FetchFailure>,
    pub attempts: u32,
    pub rate_limited: bool,
}

pub async fn fetch_with_retry(client: &Client, url: &str, policy: &RetryPolicy) -> Fetched {
    let mut rate_limited = false;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let failure = match fetch_once(client, url, policy.timeout).await {
            Ok(page) => {
                return Fetched {
                    result: Ok(page),
                    attempts: attempt,
                    rate_limited,
                }
            }
            Err(f) => f,
        };

        let hint = match &failure {
            FetchFailure::RateLimited { retry_after } => {
                rate_limited = true;
                *retry_after
            }
            _ => None,
        };

        if !failure.is_retryable() || attempt >= policy.attempts() {
            debug!("Giving up on {} after {} attempt(s): {}", url, attempt, failure);
            return Fetched {
                result: Err(failure),
                attempts: attempt,
                rate_limited,
            };
        }

        let backoff = policy.backoff_with_hint(attempt - 1, hint);
        warn!(
            "{} on {} (attempt {}/{}), backing off {:.1}s",
            failure,
            url,
            attempt,
            policy.attempts(),
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
    }
}

async fn fetch_once(client: &Client, url: &str, timeout: Duration) -> Result<Page, FetchFailure> {
    let start = Instant::now();
    let mut response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(FetchFailure::from_reqwest)?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchFailure::RateLimited {
            retry_after: retry_after(response.headers()),
        });
    }
    if status.is_server_error() {
        return Err(FetchFailure::Server(status.as_u16()));
    }

    let final_url = response.url().clone();
    let headers = response.headers();
    let content_type = header_str(headers, CONTENT_TYPE);
    let link = header_str(headers, LINK);
    let body = read_capped(&mut response, MAX_BODY_BYTES).await?;

    Ok(Page {
        url: final_url,
        status,
        content_type,
        link,
        body,
        latency_ms: start.elapsed().as_millis() as u64,
    })
}

async fn read_capped(response: &mut reqwest::Response, limit: usize) -> Result<String, FetchFailure> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(FetchFailure::from_reqwest)? {
        let room = limit - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            debug!("Body of {} cut at {} bytes", response.url(), limit);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    let joined = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");
    (!joined.is_empty()).then_some(joined)
}

/// Only the delta-seconds form; HTTP dates are rare on 429s.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn retry_after_seconds() {
        let mut h = HeaderMap::new();
        assert_eq!(retry_after(&h), None);
        h.insert(RETRY_AFTER, HeaderValue::from_static(" 7 "));
        assert_eq!(retry_after(&h), Some(Duration::from_secs(7)));
        h.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&h), None);
    }

    #[tokio::test]
    async fn large_bodies_are_cut() {
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let mut body = "a".repeat(MAX_BODY_BYTES + 4096);
        body.push_str("/wp-content/");
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let client = Client::builder().no_proxy().build().unwrap();
        let fetched = fetch_with_retry(&client, &server.uri(), &policy).await;
        let page = fetched.result.unwrap();
        assert_eq!(page.body.len(), MAX_BODY_BYTES);
        assert!(!page.body.contains("wp-content"));
    }

    #[test]
    fn only_request_errors_are_final() {
        assert!(FetchFailure::Timeout.is_retryable());
        assert!(FetchFailure::Server(503).is_retryable());
        assert!(FetchFailure::RateLimited { retry_after: None }.is_retryable());
        assert!(!FetchFailure::Request("bad redirect".into()).is_retryable());
    }
}
