//! Configuration management for ResearchForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values
//!
//! Every section has defaults, so an empty environment yields a runnable
//! configuration backed by the in-memory cache.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::ResearchDepth;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web search provider configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// News provider configuration
    #[serde(default)]
    pub news: NewsConfig,

    /// Page fetcher configuration
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Research pipeline tuning
    #[serde(default)]
    pub research: ResearchConfig,

    /// Retry policy for external calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (must exceed the deep research deadline)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Request ID header name
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; when unset the in-memory cache is used
    pub url: Option<String>,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,

    /// Key prefix shared by every cache entry
    #[serde(default = "default_cache_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: openai or mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the chat completions endpoint
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Serper API keys, rotated round-robin
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Search endpoint
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Results requested per search
    #[serde(default = "default_search_results")]
    pub num_results: u32,

    /// Provider timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewsConfig {
    /// SerpApi key
    pub api_key: Option<String>,

    /// News endpoint
    #[serde(default = "default_news_endpoint")]
    pub endpoint: String,

    /// Country code passed as `gl`
    #[serde(default = "default_news_country")]
    pub country: String,

    /// Language passed as `hl`
    #[serde(default = "default_news_language")]
    pub language: String,

    /// Provider timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    /// Robots user-agent token checked against robots.txt groups
    #[serde(default = "default_robots_agent")]
    pub robots_agent: String,

    /// User-Agent strings rotated per host
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Per-host request rate
    #[serde(default = "default_per_host_rps")]
    pub per_host_rps: u32,

    /// Default fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Check robots.txt before fetching
    #[serde(default = "default_enabled")]
    pub respect_robots: bool,

    /// Optional JS rendering service; receives `{"url": ...}` and returns HTML
    pub render_endpoint: Option<String>,

    /// Maximum response body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResearchConfig {
    /// Concurrent fetch-and-extract tasks per request
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,

    /// Candidate queries generated by the strategy selector
    #[serde(default = "default_candidates")]
    pub candidate_queries: usize,

    /// Request-wide deadline per depth, in seconds
    #[serde(default = "default_quick_deadline")]
    pub quick_deadline_secs: u64,

    #[serde(default = "default_standard_deadline")]
    pub standard_deadline_secs: u64,

    #[serde(default = "default_deep_deadline")]
    pub deep_deadline_secs: u64,

    /// Retries for a content score before the neutral fallback
    #[serde(default = "default_score_retries")]
    pub score_retries: u32,

    /// Cache TTL for query analysis, in seconds
    #[serde(default = "default_analysis_ttl")]
    pub analysis_ttl_secs: u64,

    /// Cache TTL for content scores, in seconds
    #[serde(default = "default_score_ttl")]
    pub score_ttl_secs: u64,

    /// Approximate token budget per scrape summarization chunk
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,

    /// Token budget of a chat transcript before older turns are summarized
    #[serde(default = "default_chat_tokens")]
    pub chat_max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Randomization factor applied to each delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_request_id_header() -> String { "X-Request-ID".to_string() }
fn default_redis_ttl() -> u64 { 3600 }
fn default_cache_prefix() -> String { "researchforge".to_string() }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> u32 { 2048 }
fn default_llm_timeout() -> u64 { 60 }
fn default_search_endpoint() -> String { "https://google.serper.dev/search".to_string() }
fn default_search_results() -> u32 { 10 }
fn default_provider_timeout() -> u64 { 15 }
fn default_news_endpoint() -> String { "https://serpapi.com/search".to_string() }
fn default_news_country() -> String { "in".to_string() }
fn default_news_language() -> String { "en".to_string() }
fn default_robots_agent() -> String { "ResearchBot".to_string() }
fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
    ]
}
fn default_per_host_rps() -> u32 { 2 }
fn default_fetch_timeout() -> u64 { 15 }
fn default_max_body_bytes() -> usize { 5 * 1024 * 1024 }
fn default_fan_out() -> usize { 6 }
fn default_candidates() -> usize { 3 }
fn default_quick_deadline() -> u64 { 20 }
fn default_standard_deadline() -> u64 { 45 }
fn default_deep_deadline() -> u64 { 90 }
fn default_score_retries() -> u32 { 2 }
fn default_analysis_ttl() -> u64 { 3600 }
fn default_score_ttl() -> u64 { 6 * 3600 }
fn default_chunk_tokens() -> usize { 10_000 }
fn default_chat_tokens() -> usize { 4000 }
fn default_max_retries() -> u32 { 2 }
fn default_base_delay() -> u64 { 250 }
fn default_max_delay() -> u64 { 4000 }
fn default_jitter() -> f64 { 0.3 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "researchforge".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__LLM__API_KEY=sk-...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("search.api_keys")
                    .with_list_parse_key("fetcher.user_agents")
                    .try_parsing(true),
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Request-wide research deadline for a depth
    pub fn research_deadline(&self, depth: ResearchDepth) -> Duration {
        let secs = match depth {
            ResearchDepth::Quick => self.research.quick_deadline_secs,
            ResearchDepth::Standard => self.research.standard_deadline_secs,
            ResearchDepth::Deep => self.research.deep_deadline_secs,
        };
        Duration::from_secs(secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            request_id_header: default_request_id_header(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_ttl_secs: default_redis_ttl(),
            key_prefix: default_cache_prefix(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: default_llm_api_base(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            endpoint: default_search_endpoint(),
            num_results: default_search_results(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_news_endpoint(),
            country: default_news_country(),
            language: default_news_language(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            robots_agent: default_robots_agent(),
            user_agents: default_user_agents(),
            per_host_rps: default_per_host_rps(),
            timeout_secs: default_fetch_timeout(),
            respect_robots: default_enabled(),
            render_endpoint: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            fan_out: default_fan_out(),
            candidate_queries: default_candidates(),
            quick_deadline_secs: default_quick_deadline(),
            standard_deadline_secs: default_standard_deadline(),
            deep_deadline_secs: default_deep_deadline(),
            score_retries: default_score_retries(),
            analysis_ttl_secs: default_analysis_ttl(),
            score_ttl_secs: default_score_ttl(),
            chunk_tokens: default_chunk_tokens(),
            chat_max_tokens: default_chat_tokens(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.fetcher.robots_agent, "ResearchBot");
        assert_eq!(config.research.candidate_queries, 3);
        assert!(config.redis.url.is_none());
    }

    #[test]
    fn test_request_timeout_covers_deep_deadline() {
        let config = AppConfig::default();
        assert!(config.request_timeout() > Duration::from_secs(90));
    }

    #[test]
    fn test_research_deadlines_match_depth_defaults() {
        let config = AppConfig::default();
        for depth in [ResearchDepth::Quick, ResearchDepth::Standard, ResearchDepth::Deep] {
            assert_eq!(config.research_deadline(depth), depth.default_deadline());
        }
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("llm.model", "gpt-4o")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.retry.max_retries, 2);
    }
}
