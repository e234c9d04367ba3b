//! Serper web search adapter

use super::SearchProvider;
use async_trait::async_trait;
use researchforge_common::config::SearchConfig;
use researchforge_common::errors::{AppError, Result};
use researchforge_common::metrics::record_provider;
use researchforge_common::models::api::{
    ImageResult, RelatedSearch, SearchContext, SearchResponse, StoryResult,
};
use researchforge_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PROVIDER: &str = "serper";

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperResponse {
    knowledge_graph: Option<KnowledgeGraph>,
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    organic: Vec<Organic>,
    top_stories: Option<Vec<TopStory>>,
    related_searches: Option<Vec<Related>>,
    images: Option<Vec<Image>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeGraph {
    title: Option<String>,
    description_url: Option<String>,
    website: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    title: Option<String>,
    url: Option<String>,
    snippet: Option<String>,
    answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Organic {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopStory {
    title: Option<String>,
    link: Option<String>,
    source: Option<String>,
    date: Option<String>,
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Related {
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    image_url: Option<String>,
    title: Option<String>,
    link: Option<String>,
}

/// Serper search client with round-robin API keys
pub struct SerperSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_keys: Vec<String>,
    next_key: AtomicUsize,
    num_results: u32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SerperSearchProvider {
    pub fn new(config: &SearchConfig, retry: RetryPolicy) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_keys: config.api_keys.clone(),
            next_key: AtomicUsize::new(0),
            num_results: config.num_results,
            timeout,
            retry,
        })
    }

    fn next_api_key(&self) -> Result<&str> {
        if self.api_keys.is_empty() {
            return Err(AppError::Configuration {
                message: "search.api_keys is empty".to_string(),
            });
        }
        let idx = self.next_key.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        Ok(&self.api_keys[idx])
    }

    async fn request(&self, query: &str) -> Result<SerperResponse> {
        let api_key = self.next_api_key()?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(&SerperRequest {
                q: query,
                num: self.num_results,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout {
                        operation: "serper search".to_string(),
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

/// Fold a raw Serper payload into the public search shape
fn into_search_response(raw: SerperResponse) -> SearchResponse {
    let mut contexts = Vec::new();

    if let Some(kg) = raw.knowledge_graph {
        let url = kg.description_url.or(kg.website);
        if let (Some(url), Some(snippet)) = (url, kg.description) {
            contexts.push(SearchContext {
                name: Some(kg.title.unwrap_or_default()),
                url,
                snippet: Some(snippet),
                ..Default::default()
            });
        }
    }

    if let Some(ab) = raw.answer_box {
        let snippet = ab.snippet.or(ab.answer);
        if let (Some(url), Some(snippet)) = (ab.url, snippet) {
            contexts.push(SearchContext {
                name: Some(ab.title.unwrap_or_default()),
                url,
                snippet: Some(snippet),
                ..Default::default()
            });
        }
    }

    contexts.extend(raw.organic.into_iter().filter_map(|o| {
        Some(SearchContext {
            name: o.title,
            url: o.link?,
            snippet: Some(o.snippet.unwrap_or_default()),
            ..Default::default()
        })
    }));

    let stories = raw.top_stories.map(|stories| {
        stories
            .into_iter()
            .filter_map(|s| {
                Some(StoryResult {
                    title: s.title,
                    image_url: s.image_url,
                    source: s.source,
                    date: s.date,
                    link: s.link?,
                })
            })
            .collect()
    });

    let related_searches = raw.related_searches.map(|related| {
        related
            .into_iter()
            .filter_map(|r| r.query.map(|query| RelatedSearch { query }))
            .collect()
    });

    let images = raw.images.map(|images| {
        images
            .into_iter()
            .filter_map(|i| {
                Some(ImageResult {
                    image_url: i.image_url?,
                    title: i.title,
                    link: i.link,
                })
            })
            .collect()
    });

    SearchResponse {
        status: None,
        message: None,
        contexts: Some(contexts),
        images,
        stories,
        related_searches,
    }
}

#[async_trait]
impl SearchProvider for SerperSearchProvider {
    async fn search(&self, query: &str) -> Result<SearchResponse> {
        let start = Instant::now();
        let result = self.retry.run("serper search", || self.request(query)).await;
        record_provider(start.elapsed().as_secs_f64(), PROVIDER, result.is_ok());

        let response = into_search_response(result?);
        info!(
            query = %query,
            contexts = response.contexts.as_ref().map_or(0, Vec::len),
            latency_ms = start.elapsed().as_millis() as u64,
            "Web search completed"
        );
        debug!(stories = response.stories.as_ref().map_or(0, Vec::len), "Search extras");
        Ok(response)
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_knowledge_graph_and_answer_box_first() {
        let raw: SerperResponse = serde_json::from_value(serde_json::json!({
            "knowledgeGraph": {
                "title": "Tokamak",
                "website": "https://en.wikipedia.org/wiki/Tokamak",
                "description": "A device using magnetic fields to confine plasma."
            },
            "answerBox": {
                "title": "ITER",
                "url": "https://www.iter.org",
                "answer": "2035"
            },
            "organic": [
                {"title": "Fusion energy", "link": "https://example.com/fusion", "snippet": "Fusion..."},
                {"title": "No link"}
            ],
            "relatedSearches": [{"query": "fusion reactor"}],
            "images": [{"imageUrl": "https://img.example.com/t.png", "title": "Tokamak"}]
        }))
        .unwrap();

        let response = into_search_response(raw);
        let contexts = response.contexts.unwrap();
        assert_eq!(contexts.len(), 3);
        assert_eq!(contexts[0].url, "https://en.wikipedia.org/wiki/Tokamak");
        assert_eq!(contexts[1].snippet.as_deref(), Some("2035"));
        assert_eq!(contexts[2].name.as_deref(), Some("Fusion energy"));
        assert_eq!(response.related_searches.unwrap()[0].query, "fusion reactor");
        assert_eq!(response.images.unwrap().len(), 1);
        assert!(response.stories.is_none());
    }

    #[test]
    fn test_keys_rotate_round_robin() {
        let config = SearchConfig {
            api_keys: vec!["a".into(), "b".into()],
            ..SearchConfig::default()
        };
        let provider = SerperSearchProvider::new(&config, RetryPolicy::none()).unwrap();
        let keys: Vec<String> = (0..3)
            .map(|_| provider.next_api_key().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_missing_keys_is_configuration_error() {
        let provider = SerperSearchProvider::new(&SearchConfig::default(), RetryPolicy::none()).unwrap();
        let err = provider.search("rust").await.unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
