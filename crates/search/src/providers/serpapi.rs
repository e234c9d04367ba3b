//! SerpApi Google News adapter

use super::{NewsBatch, NewsProvider, NewsQuery};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use regex_lite::Regex;
use researchforge_common::cache::{keys, Cache};
use researchforge_common::config::NewsConfig;
use researchforge_common::errors::{AppError, Result};
use researchforge_common::metrics::{record_cache, record_provider};
use researchforge_common::models::api::{NewsArticle, NewsMetadata};
use researchforge_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PROVIDER: &str = "serpapi_news";
const NEWS_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();

fn unsafe_chars() -> &'static Regex {
    UNSAFE_CHARS.get_or_init(|| Regex::new(r#"[^\w\s\-+'"]+"#).expect("valid regex"))
}

/// Strip characters the news engine chokes on; an empty query becomes "news"
pub fn sanitize_news_query(query: &str) -> String {
    let cleaned = unsafe_chars().replace_all(query, " ");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "news".to_string()
    } else {
        collapsed
    }
}

/// Parse the provider's `MM/DD/YYYY, HH:MM AM/PM, +zone` date, ignoring the zone
pub fn parse_news_date(raw: &str) -> Option<DateTime<Utc>> {
    let mut parts = raw.split(',');
    let day = parts.next()?.trim();
    let time = parts.next()?.trim();
    NaiveDateTime::parse_from_str(&format!("{}, {}", day, time), "%m/%d/%Y, %I:%M %p")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Default, Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    news_results: Vec<RawArticle>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawArticle {
    title: Option<String>,
    link: Option<String>,
    date: Option<String>,
    thumbnail: Option<String>,
    snippet: Option<String>,
    source: Option<RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: Option<String>,
    authors: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize)]
struct CachedBatch {
    articles: Vec<NewsArticle>,
    metadata: NewsMetadata,
}

/// Google News via SerpApi, with look-back filtering and result caching
pub struct SerpApiNewsProvider {
    client: reqwest::Client,
    config: NewsConfig,
    timeout: Duration,
    retry: RetryPolicy,
    cache: Cache,
}

impl SerpApiNewsProvider {
    pub fn new(config: &NewsConfig, retry: RetryPolicy, cache: Cache) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config: config.clone(),
            timeout,
            retry,
            cache,
        })
    }

    async fn request(&self, api_key: &str, query: &str) -> Result<SerpApiResponse> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("engine", "google_news"),
                ("q", query),
                ("gl", self.config.country.as_str()),
                ("hl", self.config.language.as_str()),
                ("api_key", api_key),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout {
                        operation: "news search".to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::provider(PROVIDER, format!("Request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::provider(
                PROVIDER,
                format!("API error {}: {}", status, body),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::provider(PROVIDER, format!("Failed to parse response: {}", e)))
    }
}

/// Keep articles within the look-back window, capped at `max_results`.
/// Articles whose date cannot be parsed are kept.
fn filter_articles(raw: Vec<RawArticle>, query: &NewsQuery, now: DateTime<Utc>) -> NewsBatch {
    let available = raw.len();
    let cutoff = now - ChronoDuration::days(i64::from(query.days_back));

    let mut articles = Vec::new();
    for article in raw {
        if articles.len() >= query.max_results {
            break;
        }

        if let Some(date) = article.date.as_deref() {
            match parse_news_date(date) {
                Some(published) if published < cutoff => continue,
                Some(_) => {}
                None => warn!(
                    title = article.title.as_deref().unwrap_or("Unknown"),
                    date,
                    "Could not parse article date"
                ),
            }
        }

        let (source, authors) = match article.source {
            Some(s) => (s.name, s.authors),
            None => (None, None),
        };

        articles.push(NewsArticle {
            title: article.title,
            thumbnail: article.thumbnail,
            source,
            date: article.date,
            authors,
            link: article.link,
            content: None,
            summary: article.snippet,
        });
    }

    let returned = articles.len();
    NewsBatch {
        articles,
        metadata: NewsMetadata {
            query: Some(query.query.clone()),
            total_results_available: Some(available),
            total_results_returned: Some(returned),
        },
    }
}

#[async_trait]
impl NewsProvider for SerpApiNewsProvider {
    async fn news(&self, query: &NewsQuery) -> Result<NewsBatch> {
        let cache_key = keys::news(&query.query, query.max_results, query.days_back);
        if let Some(cached) = self.cache.lookup::<CachedBatch>(&cache_key).await {
            record_cache(true, "news");
            return Ok(NewsBatch {
                articles: cached.articles,
                metadata: cached.metadata,
            });
        }
        record_cache(false, "news");

        let api_key = self.config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "news.api_key is not set".to_string(),
        })?;
        let sanitized = sanitize_news_query(&query.query);

        let start = Instant::now();
        let result = self
            .retry
            .run("news search", || self.request(&api_key, &sanitized))
            .await;
        record_provider(start.elapsed().as_secs_f64(), PROVIDER, result.is_ok());
        let raw = result?;

        if let Some(error) = raw.error {
            return Err(AppError::provider(PROVIDER, error));
        }
        if raw.news_results.is_empty() {
            return Err(AppError::provider(
                PROVIDER,
                format!("No news results found for query: {}", query.query),
            ));
        }

        let batch = filter_articles(raw.news_results, query, Utc::now());
        info!(
            query = %query.query,
            available = batch.metadata.total_results_available.unwrap_or(0),
            returned = batch.articles.len(),
            "News search completed"
        );

        self.cache
            .store(
                &cache_key,
                &CachedBatch {
                    articles: batch.articles.clone(),
                    metadata: batch.metadata.clone(),
                },
                NEWS_CACHE_TTL,
            )
            .await;

        Ok(batch)
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(title: &str, date: Option<&str>) -> RawArticle {
        RawArticle {
            title: Some(title.to_string()),
            link: Some(format!("https://news.example.com/{}", title)),
            date: date.map(str::to_string),
            thumbnail: None,
            snippet: None,
            source: Some(RawSource {
                name: Some("Example Times".into()),
                authors: Some(vec!["A. Writer".into()]),
            }),
        }
    }

    #[test]
    fn test_parse_news_date() {
        let parsed = parse_news_date("11/12/2024, 09:03 PM, +0200 EET").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 11, 12, 21, 3, 0).unwrap());
        assert!(parse_news_date("yesterday").is_none());
    }

    #[test]
    fn test_sanitize_news_query() {
        assert_eq!(sanitize_news_query("fusion <energy>!!  news"), "fusion energy news");
        assert_eq!(sanitize_news_query("  ;;; "), "news");
    }

    #[test]
    fn test_filter_drops_old_keeps_unparseable() {
        let now = Utc.with_ymd_and_hms(2024, 11, 15, 12, 0, 0).unwrap();
        let query = NewsQuery {
            query: "fusion".into(),
            days_back: 7,
            max_results: 10,
        };
        let batch = filter_articles(
            vec![
                raw("fresh", Some("11/14/2024, 08:00 AM, +0000 UTC")),
                raw("stale", Some("10/01/2024, 08:00 AM, +0000 UTC")),
                raw("undated", Some("2 hours ago")),
                raw("nodate", None),
            ],
            &query,
            now,
        );
        let titles: Vec<_> = batch.articles.iter().filter_map(|a| a.title.as_deref()).collect();
        assert_eq!(titles, vec!["fresh", "undated", "nodate"]);
        assert_eq!(batch.metadata.total_results_available, Some(4));
        assert_eq!(batch.metadata.total_results_returned, Some(3));
        assert_eq!(batch.articles[0].source.as_deref(), Some("Example Times"));
    }

    #[test]
    fn test_filter_caps_results() {
        let now = Utc::now();
        let query = NewsQuery {
            query: "fusion".into(),
            days_back: 30,
            max_results: 2,
        };
        let batch = filter_articles(
            vec![raw("a", None), raw("b", None), raw("c", None)],
            &query,
            now,
        );
        assert_eq!(batch.articles.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let provider =
            SerpApiNewsProvider::new(&NewsConfig::default(), RetryPolicy::none(), Cache::in_memory())
                .unwrap();
        let err = provider
            .news(&NewsQuery {
                query: "fusion".into(),
                days_back: 7,
                max_results: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
