//! Deterministic providers and fetchers for tests
//!
//! Every double counts its calls and can be told to fail or to stall, so
//! pipeline tests never touch the network.

use crate::fetcher::PageFetcher;
use crate::providers::{NewsBatch, NewsProvider, NewsQuery, SearchProvider};
use async_trait::async_trait;
use researchforge_common::errors::{AppError, FetchErrorKind, Result};
use researchforge_common::models::api::{NewsArticle, NewsMetadata, SearchContext, SearchResponse};
use researchforge_common::models::FetchedPage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted web search
#[derive(Default)]
pub struct MockSearchProvider {
    responses: HashMap<String, SearchResponse>,
    default_response: Option<SearchResponse>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every query with organic hits at the given URLs
    pub fn with_results<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_response = Some(response_for(urls));
        self
    }

    /// Answer `query` (exact match) with `response`
    pub fn with_response(mut self, query: impl Into<String>, response: SearchResponse) -> Self {
        self.responses.insert(query.into(), response);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries received, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

/// Organic-only search response for `urls`, titled "Result N"
pub fn response_for<I, S>(urls: I) -> SearchResponse
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let contexts = urls
        .into_iter()
        .enumerate()
        .map(|(i, url)| SearchContext {
            name: Some(format!("Result {}", i + 1)),
            url: url.into(),
            snippet: Some(format!("Snippet for result {}", i + 1)),
            ..Default::default()
        })
        .collect();

    SearchResponse {
        contexts: Some(contexts),
        ..Default::default()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str) -> Result<SearchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AppError::provider("mock_search", "scripted failure"));
        }

        Ok(self
            .responses
            .get(query)
            .or(self.default_response.as_ref())
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "mock_search"
    }
}

/// Scripted news search
#[derive(Default)]
pub struct MockNewsProvider {
    articles: Vec<NewsArticle>,
    fail: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<NewsQuery>>,
}

impl MockNewsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(mut self, articles: Vec<NewsArticle>) -> Self {
        self.articles = articles;
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, in order
    pub fn requests(&self) -> Vec<NewsQuery> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NewsProvider for MockNewsProvider {
    async fn news(&self, query: &NewsQuery) -> Result<NewsBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(query.clone());
        }
        if self.fail {
            return Err(AppError::provider("mock_news", "scripted failure"));
        }
        if self.articles.is_empty() {
            return Err(AppError::provider(
                "mock_news",
                format!("No news results found for query: {}", query.query),
            ));
        }

        let articles: Vec<NewsArticle> =
            self.articles.iter().take(query.max_results).cloned().collect();
        Ok(NewsBatch {
            metadata: NewsMetadata {
                query: Some(query.query.clone()),
                total_results_available: Some(self.articles.len()),
                total_results_returned: Some(articles.len()),
            },
            articles,
        })
    }

    fn name(&self) -> &'static str {
        "mock_news"
    }
}

#[derive(Clone)]
enum PageReply {
    Html(String),
    Status(u16),
    Fail(FetchErrorKind),
}

/// Scripted page fetcher; unknown URLs fail as unreachable
#[derive(Default)]
pub struct MockPageFetcher {
    pages: HashMap<String, PageReply>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), PageReply::Html(html.into()));
        self
    }

    pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
        self.pages.insert(url.into(), PageReply::Status(status));
        self
    }

    pub fn with_failure(mut self, url: impl Into<String>, kind: FetchErrorKind) -> Self {
        self.pages.insert(url.into(), PageReply::Fail(kind));
        self
    }

    /// Stall every fetch by `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs requested, in order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PageFetcher for MockPageFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(url.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .pages
            .get(url)
            .cloned()
            .unwrap_or(PageReply::Fail(FetchErrorKind::Unreachable));

        match reply {
            PageReply::Html(html) => Ok(FetchedPage {
                url: url.to_string(),
                status: Some(200),
                html: Some(html),
                duration: self.delay.unwrap_or_default(),
                error: None,
            }),
            PageReply::Status(status) => Ok(FetchedPage {
                url: url.to_string(),
                status: Some(status),
                html: None,
                duration: self.delay.unwrap_or_default(),
                error: Some(format!("HTTP {}", status)),
            }),
            PageReply::Fail(kind) => Err(AppError::Fetch {
                url: url.to_string(),
                message: format!("scripted {}", kind),
                kind,
            }),
        }
    }
}
