//! Polite page fetching
//!
//! Every fetch goes through the same gate: URL validation, robots.txt,
//! per-host spacing, then either the render service or a direct GET.
//! Transport failures come back as `AppError::Fetch` (or `Timeout`); an
//! HTTP response with a non-success status is returned as a page with
//! `html: None` so callers can see the status.

mod politeness;
mod robots;

pub use politeness::{HostRateLimiter, UserAgentRotator};
pub use robots::{RobotsCache, RobotsRules};

use async_trait::async_trait;
use researchforge_common::config::FetcherConfig;
use researchforge_common::errors::{AppError, FetchErrorKind, Result};
use researchforge_common::metrics::record_fetch;
use researchforge_common::models::FetchedPage;
use serde::Serialize;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Fetches raw HTML for a URL
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedPage>;
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
}

/// reqwest-backed fetcher honouring robots.txt and per-host rate limits
pub struct HttpPageFetcher {
    client: reqwest::Client,
    robots: Option<RobotsCache>,
    limiter: HostRateLimiter,
    agents: UserAgentRotator,
    fallback_agent: String,
    render_endpoint: Option<String>,
    max_body_bytes: usize,
}

impl HttpPageFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let robots = config
            .respect_robots
            .then(|| RobotsCache::new(client.clone(), config.robots_agent.clone(), config.max_body_bytes));

        Ok(Self {
            robots,
            limiter: HostRateLimiter::new(config.per_host_rps),
            agents: UserAgentRotator::new(config.user_agents.clone()),
            fallback_agent: format!("{}/1.0", config.robots_agent),
            render_endpoint: config.render_endpoint.clone(),
            max_body_bytes: config.max_body_bytes,
            client,
        })
    }

    async fn get_direct(&self, url: &Url, agent: &str, timeout: Duration) -> Result<reqwest::Response> {
        self.client
            .get(url.as_str())
            .header(reqwest::header::USER_AGENT, agent)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(url.as_str(), e, timeout))
    }

    async fn get_rendered(
        &self,
        endpoint: &str,
        url: &Url,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(endpoint)
            .json(&RenderRequest { url: url.as_str() })
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(url.as_str(), e, timeout))?;

        if !response.status().is_success() {
            return Err(AppError::Fetch {
                url: url.to_string(),
                kind: FetchErrorKind::HttpStatus(response.status().as_u16()),
                message: "render service rejected the page".to_string(),
            });
        }
        Ok(response)
    }

    /// Read the body, stopping at `max_body_bytes`
    async fn read_body(&self, url: &str, mut response: reqwest::Response, timeout: Duration) -> Result<String> {
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| classify_error(url, e, timeout))?
        {
            let room = self.max_body_bytes.saturating_sub(body.len());
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                debug!(url, limit = self.max_body_bytes, "Response body truncated");
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedPage> {
        let start = Instant::now();
        let parsed = parse_http_url(url)?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        if let Some(robots) = &self.robots {
            if !robots.is_allowed(&parsed).await {
                record_fetch("robots_disallowed");
                info!(url, "Skipping URL disallowed by robots.txt");
                return Err(AppError::Fetch {
                    url: url.to_string(),
                    kind: FetchErrorKind::RobotsDisallowed,
                    message: "disallowed by robots.txt".to_string(),
                });
            }
        }

        self.limiter.until_ready(&host).await;
        let agent = self.agents.next_for(&host, &self.fallback_agent);

        let remaining = timeout.saturating_sub(start.elapsed());
        let response = match &self.render_endpoint {
            Some(endpoint) => match self.get_rendered(endpoint, &parsed, remaining).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    warn!(url, error = %e, "Render service failed, fetching directly");
                    let remaining = timeout.saturating_sub(start.elapsed());
                    self.get_direct(&parsed, agent, remaining).await
                }
            },
            None => self.get_direct(&parsed, agent, remaining).await,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                record_fetch(&fetch_outcome(&e));
                return Err(e);
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            record_fetch(&format!("http_{}", status));
            debug!(url, status, "Non-success status");
            return Ok(FetchedPage {
                url: url.to_string(),
                status: Some(status),
                html: None,
                duration: start.elapsed(),
                error: Some(format!("HTTP {}", status)),
            });
        }

        let html = self.read_body(url, response, timeout).await?;
        record_fetch("success");
        debug!(url, status, bytes = html.len(), "Fetched page");

        Ok(FetchedPage {
            url: url.to_string(),
            status: Some(status),
            html: Some(html),
            duration: start.elapsed(),
            error: None,
        })
    }
}

/// Accept only absolute http(s) URLs with a host
pub fn parse_http_url(url: &str) -> Result<Url> {
    let invalid = |message: String| AppError::Fetch {
        url: url.to_string(),
        kind: FetchErrorKind::InvalidUrl,
        message,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        "http" | "https" => Err(invalid("missing host".to_string())),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

fn fetch_outcome(err: &AppError) -> String {
    match err {
        AppError::Fetch { kind, .. } => kind.to_string(),
        AppError::Timeout { .. } => "timeout".to_string(),
        _ => "error".to_string(),
    }
}

/// Map a reqwest failure onto the fetch error taxonomy
fn classify_error(url: &str, err: reqwest::Error, timeout: Duration) -> AppError {
    if err.is_timeout() {
        return AppError::Timeout {
            operation: format!("fetch {}", url),
            timeout_ms: timeout.as_millis() as u64,
        };
    }

    let chain = error_chain(&err).to_ascii_lowercase();
    let kind = if chain.contains("dns") || chain.contains("failed to lookup address") {
        FetchErrorKind::Dns
    } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("handshake") {
        FetchErrorKind::Tls
    } else if err.is_builder() {
        FetchErrorKind::InvalidUrl
    } else {
        FetchErrorKind::Unreachable
    };

    AppError::Fetch {
        url: url.to_string(),
        kind,
        message: err.to_string(),
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}
