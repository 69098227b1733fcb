pub mod detect;
pub mod fetch;

use std::collections::HashSet;
use std::future::Future;
use std::net::Ipv4Addr;

use reqwest::redirect;
use reqwest::{Client, Url};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::domain::Candidate;
use crate::record::Detection;
use crate::retry::RetryPolicy;
use detect::Evidence;
use fetch::{fetch_with_retry, FetchFailure, Page};

/// Verdict for one candidate. `metadata` ends up in the result table as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub detection: Detection,
    pub metadata: Map<String, Value>,
    /// Some request for this candidate got an HTTP 429.
    pub rate_limited: bool,
}

impl Classification {
    pub fn unknown(reason: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("error".into(), Value::String(reason.into()));
        Self {
            detection: Detection::Unknown,
            metadata,
            rate_limited: false,
        }
    }
}

/// Decides whether a candidate runs WordPress. Must not fail: problems come
/// back as `Detection::Unknown`.
pub trait Classify {
    fn classify(&self, candidate: &Candidate) -> impl Future<Output = Classification>;
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub retry: RetryPolicy,
    pub user_agent: String,
    /// Tried in order; the next one only when the previous cannot connect.
    pub schemes: Vec<String>,
    /// Subdomains tried in order when the bare domain shows no WordPress.
    pub prefixes: Vec<String>,
    pub probe_rest_api: bool,
    /// REST endpoints probed in order when a homepage shows no marker.
    pub rest_paths: Vec<String>,
}

pub struct HttpClassifier {
    client: Client,
    settings: ClassifierSettings,
}

impl HttpClassifier {
    pub fn new(settings: ClassifierSettings) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.retry.timeout)
            .redirect(redirect::Policy::limited(10))
            .no_proxy()
            // many target sites serve expired or self-signed certificates
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client, settings })
    }

    /// Homepage of one host, falling back through the schemes. Also returns
    /// the host the page was finally served from.
    async fn classify_host(&self, host: &str, attempts: &mut u32) -> (Classification, Option<String>) {
        let mut host_attempts = 0;
        let mut rate_limited = false;
        let mut last_failure = None;

        for scheme in &self.settings.schemes {
            let url = format!("{}://{}/", scheme, host);
            let fetched = fetch_with_retry(&self.client, &url, &self.settings.retry).await;
            host_attempts += fetched.attempts;
            rate_limited |= fetched.rate_limited;

            match fetched.result {
                Ok(page) => {
                    *attempts += host_attempts;
                    let landed = authority(&page.url);
                    let mut c = self.judge(page, attempts).await;
                    c.rate_limited |= rate_limited;
                    return (c, landed);
                }
                Err(FetchFailure::Connect(e)) => {
                    debug!("Cannot connect to {}: {}", url, e);
                    last_failure = Some(FetchFailure::Connect(e));
                }
                Err(f) => {
                    last_failure = Some(f);
                    break;
                }
            }
        }

        *attempts += host_attempts;
        let reason = match last_failure {
            Some(f) => format!("{} after {} attempt(s)", f, host_attempts),
            None => "no URL scheme configured".to_string(),
        };
        let mut c = Classification::unknown(reason);
        c.rate_limited = rate_limited;
        (c, None)
    }

    async fn judge(&self, page: Page, attempts: &mut u32) -> Classification {
        let evidence = detect::inspect(&page.body, page.link.as_deref());
        let mut metadata = Map::new();
        metadata.insert("url".into(), json!(page.url.as_str()));
        metadata.insert("status".into(), json!(page.status.as_u16()));
        metadata.insert("latency_ms".into(), json!(page.latency_ms));

        let mut rate_limited = false;
        let mut detection = if evidence.is_wordpress() {
            Detection::Yes
        } else if page.status.is_success() {
            Detection::No
        } else {
            Detection::Unknown
        };

        if !evidence.is_wordpress() && self.settings.probe_rest_api {
            if let Some(path) = self.find_rest_api(&page.url, attempts, &mut rate_limited).await {
                detection = Detection::Yes;
                metadata.insert("rest_api".into(), json!(true));
                metadata.insert("rest_path".into(), json!(path));
            }
        }

        if detection == Detection::Unknown {
            metadata.insert("error".into(), json!(format!("HTTP {}", page.status.as_u16())));
        }
        add_evidence(&mut metadata, &evidence);

        Classification {
            detection,
            metadata,
            rate_limited,
        }
    }

    /// First REST path that answers like a WordPress API.
    async fn find_rest_api(&self, base: &Url, attempts: &mut u32, rate_limited: &mut bool) -> Option<&str> {
        for path in &self.settings.rest_paths {
            let Ok(api) = base.join(path) else {
                continue;
            };
            let answer = fetch_with_retry(&self.client, api.as_str(), &self.settings.retry).await;
            *attempts += answer.attempts;
            *rate_limited |= answer.rate_limited;
            if let Ok(p) = answer.result {
                if p.status.is_success() && detect::looks_like_rest_root(p.content_type.as_deref(), &p.body) {
                    return Some(path.as_str());
                }
            }
        }
        None
    }
}

fn add_evidence(metadata: &mut Map<String, Value>, evidence: &Evidence) {
    if !evidence.markers.is_empty() {
        metadata.insert("markers".into(), json!(evidence.markers));
    }
    if let Some(v) = &evidence.version {
        metadata.insert("version".into(), json!(v));
    }
    if let Some(t) = &evidence.theme {
        metadata.insert("theme".into(), json!(t));
    }
}

/// `host[:port]` of a URL, the way candidate keys spell it.
fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// The bare host first, then one variant per prefix. IP addresses and hosts
/// that already start with one of the prefixes are left alone.
fn expand_hosts(key: &str, prefixes: &[String]) -> Vec<String> {
    let mut hosts = vec![key.to_string()];
    let name = key.rsplit_once(':').map_or(key, |(h, _)| h);
    if key.starts_with('[')
        || name.parse::<Ipv4Addr>().is_ok()
        || prefixes.iter().any(|p| name.starts_with(p.as_str()))
    {
        return hosts;
    }
    hosts.extend(prefixes.iter().map(|p| format!("{}{}", p, key)));
    hosts
}

impl Classify for HttpClassifier {
    async fn classify(&self, candidate: &Candidate) -> Classification {
        if !candidate.is_valid() {
            return Classification::unknown("invalid domain");
        }

        let mut attempts = 0;
        let mut rate_limited = false;
        let mut visited = HashSet::new();
        let mut best: Option<Classification> = None;

        for host in expand_hosts(candidate.key(), &self.settings.prefixes) {
            if visited.contains(&host) {
                debug!("Already saw {} for {}", host, candidate);
                continue;
            }
            let (mut c, landed) = self.classify_host(&host, &mut attempts).await;
            rate_limited |= c.rate_limited;
            c.metadata.insert("host".into(), json!(host));
            visited.insert(host);
            visited.extend(landed);

            if c.detection == Detection::Yes {
                best = Some(c);
                break;
            }
            let keep_previous = best
                .as_ref()
                .is_some_and(|b| b.detection == Detection::No || c.detection == Detection::Unknown);
            if !keep_previous {
                best = Some(c);
            }
        }

        let mut c = best.unwrap_or_else(|| Classification::unknown("no host to check"));
        c.metadata.insert("attempts".into(), json!(attempts));
        c.rate_limited = rate_limited;
        c
    }
}
