//! External search and news providers
//!
//! Provides:
//! - `SearchProvider` / `NewsProvider` seams consumed by the pipeline
//! - Serper web search adapter
//! - SerpApi Google News adapter
//! - Conversion of provider payloads into ranked `SearchResult`s

mod serpapi;
mod serper;

pub use serpapi::{parse_news_date, sanitize_news_query, SerpApiNewsProvider};
pub use serper::SerperSearchProvider;

use async_trait::async_trait;
use researchforge_common::errors::Result;
use researchforge_common::models::api::{NewsArticle, NewsMetadata, SearchResponse};
use researchforge_common::models::{SearchResult, SourceType};

/// Web search capability
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one search; provider failures surface as `AppError::Provider`
    async fn search(&self, query: &str) -> Result<SearchResponse>;

    /// Provider name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Parameters of a news lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewsQuery {
    pub query: String,
    /// Maximum article age in days
    pub days_back: u32,
    pub max_results: usize,
}

/// Articles kept after filtering, plus counts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsBatch {
    pub articles: Vec<NewsArticle>,
    pub metadata: NewsMetadata,
}

/// News search capability
#[async_trait]
pub trait NewsProvider: Send + Sync {
    /// Fetch recent articles; an empty result set is an `AppError::Provider`
    async fn news(&self, query: &NewsQuery) -> Result<NewsBatch>;

    /// Provider name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Flatten a search response into ranked web results
pub fn web_results(response: &SearchResponse) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = response
        .contexts
        .iter()
        .flatten()
        .filter(|c| !c.url.is_empty())
        .map(|c| SearchResult {
            url: c.url.clone(),
            title: c.name.clone().unwrap_or_default(),
            snippet: c.snippet.clone().unwrap_or_default(),
            source_type: SourceType::Web,
            rank: 0,
            published_date: None,
        })
        .collect();

    let stories = response.stories.iter().flatten().map(|s| SearchResult {
        url: s.link.clone(),
        title: s.title.clone().unwrap_or_default(),
        snippet: s.source.clone().unwrap_or_default(),
        source_type: SourceType::Story,
        rank: 0,
        published_date: None,
    });
    results.extend(stories);

    dedup_by_url(&mut results);
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    results
}

/// Convert news articles into ranked news results; articles without a link are dropped
pub fn news_results(articles: &[NewsArticle]) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = articles
        .iter()
        .filter_map(|a| {
            let url = a.link.clone()?;
            Some(SearchResult {
                url,
                title: a.title.clone().unwrap_or_default(),
                snippet: a
                    .summary
                    .clone()
                    .or_else(|| a.source.clone())
                    .unwrap_or_default(),
                source_type: SourceType::News,
                rank: 0,
                published_date: a.date.as_deref().and_then(parse_news_date),
            })
        })
        .collect();

    dedup_by_url(&mut results);
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    results
}

fn dedup_by_url(results: &mut Vec<SearchResult>) {
    let mut seen = std::collections::HashSet::new();
    results.retain(|r| seen.insert(r.url.trim_end_matches('/').to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use researchforge_common::models::api::{SearchContext, StoryResult};

    #[test]
    fn test_web_results_ranked_and_deduped() {
        let response = SearchResponse {
            contexts: Some(vec![
                SearchContext {
                    name: Some("Rust".into()),
                    url: "https://www.rust-lang.org/".into(),
                    snippet: Some("A language empowering everyone".into()),
                    ..Default::default()
                },
                SearchContext {
                    name: Some("Rust again".into()),
                    url: "https://www.rust-lang.org".into(),
                    ..Default::default()
                },
            ]),
            stories: Some(vec![StoryResult {
                title: Some("Rust 2.0?".into()),
                link: "https://news.example.com/rust".into(),
                source: Some("Example News".into()),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let results = web_results(&response);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].source_type, SourceType::Story);
        assert_eq!(results[1].rank, 2);
    }

    #[test]
    fn test_news_results_skip_missing_links() {
        let articles = vec![
            NewsArticle {
                title: Some("Fusion record".into()),
                link: Some("https://news.example.com/fusion".into()),
                date: Some("11/12/2024, 09:03 AM, +0200 EET".into()),
                ..Default::default()
            },
            NewsArticle {
                title: Some("No link".into()),
                ..Default::default()
            },
        ];
        let results = news_results(&articles);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_type, SourceType::News);
        assert!(results[0].published_date.is_some());
    }
}
