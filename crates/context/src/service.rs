//! Research Service - The five public operations behind one facade
//!
//! Every operation returns its response envelope. Failures become
//! `status: "error"` with a message; nothing is raised across the boundary.

use crate::chat::{ChatEngine, ChatTools};
use crate::orchestrator::{PipelineSettings, ResearchOrchestrator};
use async_trait::async_trait;
use researchforge_common::cache::{keys, Cache};
use researchforge_common::errors::Result;
use researchforge_common::llm::LanguageModel;
use researchforge_common::metrics::record_cache;
use researchforge_common::models::api::{
    ChatResponse, NewsResponse, PageMetadata, ResearchResponse, ResponseStatus, ScrapeResponse,
    SearchResponse,
};
use researchforge_common::models::{Query, ResearchDepth};
use researchforge_search::{
    ContentExtractor, NewsProvider, NewsQuery, PageFetcher, ScrapeSummarizer, SearchProvider,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Lifetime of a cached scrape
pub const PAGE_TTL: Duration = Duration::from_secs(3600);

/// Lifetime of an idle chat session
pub const CHAT_TTL: Duration = Duration::from_secs(24 * 3600);

const EMPTY_QUERY: &str = "Query cannot be empty";

/// Entry point shared by the HTTP gateway and the chat engine
pub struct ResearchService {
    orchestrator: ResearchOrchestrator,
    search: Arc<dyn SearchProvider>,
    news: Arc<dyn NewsProvider>,
    extractor: ContentExtractor,
    summarizer: ScrapeSummarizer,
    chat: ChatEngine,
    cache: Cache,
}

impl ResearchService {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        news: Arc<dyn NewsProvider>,
        fetcher: Arc<dyn PageFetcher>,
        cache: Cache,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            summarizer: ScrapeSummarizer::new(llm.clone(), settings.chunk_tokens),
            chat: ChatEngine::new(llm.clone(), cache.clone(), settings.chat_max_tokens, CHAT_TTL),
            extractor: ContentExtractor::new(fetcher.clone()),
            orchestrator: ResearchOrchestrator::new(
                llm,
                search.clone(),
                news.clone(),
                fetcher,
                cache.clone(),
                settings,
            ),
            search,
            news,
            cache,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Full research run
    pub async fn research(&self, query: &str, depth: ResearchDepth, user_id: &str) -> ResearchResponse {
        let result = match Query::new(query, user_id, depth) {
            Ok(query) => self.orchestrator.run(query).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(result) => ResearchResponse::success(result),
            Err(e) => {
                warn!(user_id, error = %e, "Research request rejected");
                ResearchResponse::error(e.to_string())
            }
        }
    }

    /// Raw web search. An empty query never reaches the provider.
    pub async fn search(&self, query: &str, user_id: &str) -> SearchResponse {
        let query = query.trim();
        if query.is_empty() {
            return SearchResponse::error(EMPTY_QUERY);
        }

        match self.search.search(query).await {
            Ok(mut response) => {
                info!(
                    user_id,
                    provider = self.search.name(),
                    results = response.contexts.as_ref().map_or(0, Vec::len),
                    "Search completed"
                );
                response.status.get_or_insert(ResponseStatus::Success);
                response
            }
            Err(e) => {
                warn!(user_id, provider = self.search.name(), error = %e, "Search failed");
                SearchResponse::error(e.to_string())
            }
        }
    }

    /// Recent news articles. `days_back` is held to 1-30 and `max_results`
    /// to 5-50.
    pub async fn news(&self, query: &str, days_back: u32, max_results: usize, user_id: &str) -> NewsResponse {
        let query = query.trim();
        if query.is_empty() {
            return NewsResponse::error(EMPTY_QUERY);
        }

        let request = NewsQuery {
            query: query.to_string(),
            days_back: days_back.clamp(1, 30),
            max_results: max_results.clamp(5, 50),
        };
        match self.news.news(&request).await {
            Ok(batch) => {
                info!(
                    user_id,
                    provider = self.news.name(),
                    articles = batch.articles.len(),
                    "News completed"
                );
                NewsResponse {
                    status: ResponseStatus::Success,
                    articles: batch.articles,
                    metadata: Some(batch.metadata),
                    message: None,
                }
            }
            Err(e) => {
                warn!(user_id, provider = self.news.name(), error = %e, "News failed");
                NewsResponse::error(e.to_string())
            }
        }
    }

    /// Fetch, extract and summarize one page
    pub async fn scrape(
        &self,
        url: &str,
        user_id: &str,
        selector_query: Option<&str>,
        timeout_secs: u64,
    ) -> ScrapeResponse {
        let url = url.trim();
        if url.is_empty() {
            return ScrapeResponse::error("URL cannot be empty");
        }
        let selector_query = selector_query.map(str::trim).filter(|s| !s.is_empty());

        // Focused summaries depend on the selector, so only plain scrapes are cached
        let key = keys::page(url);
        if selector_query.is_none() {
            if let Some(cached) = self.cache.lookup::<ScrapeResponse>(&key).await {
                record_cache(true, "page");
                return cached;
            }
            record_cache(false, "page");
        }

        match self.try_scrape(url, selector_query, timeout_secs).await {
            Ok(response) => {
                info!(user_id, url, "Scrape completed");
                if selector_query.is_none() {
                    self.cache.store(&key, &response, PAGE_TTL).await;
                }
                response
            }
            Err(e) => {
                warn!(user_id, url, error = %e, "Scrape failed");
                ScrapeResponse::error(format!("Failed to scrape {}: {}", url, e))
            }
        }
    }

    async fn try_scrape(&self, url: &str, selector_query: Option<&str>, timeout_secs: u64) -> Result<ScrapeResponse> {
        let content = self
            .extractor
            .fetch_and_extract(url, selector_query, timeout_secs)
            .await?;

        let summary = match self
            .summarizer
            .summarize(url, &content.markdown, selector_query)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(url, error = %e, "Summarization failed, returning extracted text");
                content.main_text.clone()
            }
        };

        Ok(ScrapeResponse {
            status: ResponseStatus::Success,
            metadata: Some(PageMetadata {
                title: content.title,
                url: Some(content.url),
                description: content.description,
            }),
            summarized_content: Some(summary),
            raw_content: Some(content.markdown),
            message: None,
        })
    }

    /// One conversational turn
    pub async fn chat(&self, message: &str, user_id: &str, session_id: Option<&str>) -> ChatResponse {
        self.chat.respond(self, message, user_id, session_id).await
    }
}

#[async_trait]
impl ChatTools for ResearchService {
    async fn research_tool(&self, query: &str, depth: ResearchDepth, user_id: &str) -> ResearchResponse {
        self.research(query, depth, user_id).await
    }

    async fn news_tool(&self, query: &str, days_back: u32, max_results: usize, user_id: &str) -> NewsResponse {
        self.news(query, days_back, max_results, user_id).await
    }

    async fn search_tool(&self, query: &str, user_id: &str) -> SearchResponse {
        self.search(query, user_id).await
    }

    async fn scrape_tool(&self, url: &str, user_id: &str) -> ScrapeResponse {
        self.scrape(url, user_id, None, 15).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use researchforge_common::llm::MockLanguageModel;
    use researchforge_common::models::api::NewsArticle;
    use researchforge_common::RetryPolicy;
    use researchforge_search::mock::{MockNewsProvider, MockPageFetcher, MockSearchProvider};

    const PAGE: &str = "<html><head><title>Fusion Milestone</title>\
        <meta name=\"description\" content=\"Ignition results\"></head>\
        <body><article><h1>Ignition</h1><p>The laboratory reported net energy gain in its latest shot.</p>\
        </article></body></html>";

    struct Harness {
        llm: Arc<MockLanguageModel>,
        search: Arc<MockSearchProvider>,
        news: Arc<MockNewsProvider>,
        fetcher: Arc<MockPageFetcher>,
    }

    impl Harness {
        fn new(llm: MockLanguageModel, search: MockSearchProvider, news: MockNewsProvider, fetcher: MockPageFetcher) -> Self {
            Self {
                llm: Arc::new(llm),
                search: Arc::new(search),
                news: Arc::new(news),
                fetcher: Arc::new(fetcher),
            }
        }

        fn service(&self) -> ResearchService {
            ResearchService::new(
                self.llm.clone(),
                self.search.clone(),
                self.news.clone(),
                self.fetcher.clone(),
                Cache::in_memory(),
                PipelineSettings::default(),
            )
        }
    }

    #[tokio::test]
    async fn test_blank_search_skips_provider() {
        let h = Harness::new(
            MockLanguageModel::new(),
            MockSearchProvider::new().with_results(["https://a.example"]),
            MockNewsProvider::new(),
            MockPageFetcher::new(),
        );
        let response = h.service().search("   ", "u1").await;
        assert!(response.is_error());
        assert_eq!(h.search.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_failure_is_an_envelope() {
        let h = Harness::new(
            MockLanguageModel::new(),
            MockSearchProvider::failing(),
            MockNewsProvider::new(),
            MockPageFetcher::new(),
        );
        let response = h.service().search("rust async", "u1").await;
        assert!(response.is_error());
        assert!(response.message.is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn test_news_limits_are_clamped() {
        let article = NewsArticle {
            title: Some("Fusion record".into()),
            link: Some("https://news.example/fusion".into()),
            ..Default::default()
        };
        let h = Harness::new(
            MockLanguageModel::new(),
            MockSearchProvider::new(),
            MockNewsProvider::new().with_articles(vec![article]),
            MockPageFetcher::new(),
        );
        let response = h.service().news("fusion", 90, 1, "u1").await;
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.articles.len(), 1);

        let request = &h.news.requests()[0];
        assert_eq!(request.days_back, 30);
        assert_eq!(request.max_results, 5);
    }

    #[tokio::test]
    async fn test_scrape_falls_back_to_extracted_text() {
        let h = Harness::new(
            MockLanguageModel::unavailable(),
            MockSearchProvider::new(),
            MockNewsProvider::new(),
            MockPageFetcher::new().with_page("https://lab.example/ignition", PAGE),
        );
        let service = h.service();
        let response = service.scrape("https://lab.example/ignition", "u1", None, 10).await;

        assert_eq!(response.status, ResponseStatus::Success);
        let metadata = response.metadata.clone().unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Fusion Milestone"));
        assert_eq!(metadata.description.as_deref(), Some("Ignition results"));
        assert!(response
            .summarized_content
            .as_deref()
            .unwrap()
            .contains("net energy gain"));

        // Second plain scrape is served from the page cache
        let again = service.scrape("https://lab.example/ignition", "u1", None, 10).await;
        assert_eq!(again, response);
        assert_eq!(h.fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scrape_uses_summary() {
        let h = Harness::new(
            MockLanguageModel::new().with_default("A lab achieved ignition."),
            MockSearchProvider::new(),
            MockNewsProvider::new(),
            MockPageFetcher::new().with_page("https://lab.example/ignition", PAGE),
        );
        let response = h
            .service()
            .scrape("https://lab.example/ignition", "u1", Some("ignition"), 10)
            .await;
        assert_eq!(response.summarized_content.as_deref(), Some("A lab achieved ignition."));
        assert!(h.llm.prompts()[0].contains("Focus on the following aspect: ignition."));
    }

    #[tokio::test]
    async fn test_blank_research_is_rejected() {
        let h = Harness::new(
            MockLanguageModel::new(),
            MockSearchProvider::new(),
            MockNewsProvider::new(),
            MockPageFetcher::new(),
        );
        let response = h.service().research("", ResearchDepth::Quick, "u1").await;
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.result.is_none());
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_chat_routes_through_tools() {
        let h = Harness::new(
            MockLanguageModel::new().with_default("Rust was created at Mozilla."),
            MockSearchProvider::new().with_results(["https://history.example/rust"]),
            MockNewsProvider::new(),
            MockPageFetcher::new(),
        );
        let reply = h.service().chat("who created rust", "u1", None).await;
        assert_eq!(reply.response, "Rust was created at Mozilla.");
        assert_eq!(h.search.queries(), vec!["who created rust"]);
        assert!(h.llm.prompts()[0].contains("SEARCH RESULTS:"));
    }

    #[tokio::test]
    async fn test_research_runs_on_spawned_task() {
        let h = Harness::new(
            MockLanguageModel::unavailable(),
            MockSearchProvider::new().with_results(["https://a.example/one", "https://b.example/two"]),
            MockNewsProvider::new(),
            MockPageFetcher::new(),
        );
        let service = Arc::new(ResearchService::new(
            h.llm.clone(),
            h.search.clone(),
            h.news.clone(),
            h.fetcher.clone(),
            Cache::in_memory(),
            PipelineSettings {
                retry: RetryPolicy::none(),
                score_retries: 0,
                ..PipelineSettings::default()
            },
        ));

        let task = tokio::spawn({
            let service = service.clone();
            async move { service.research("plasma confinement", ResearchDepth::Quick, "u1").await }
        });
        let response = task.await.unwrap();
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.result.map(|r| r.sources.len()), Some(2));

        let tools: Arc<dyn ChatTools> = service;
        let reply = tokio::spawn(async move { tools.research_tool("plasma confinement", ResearchDepth::Quick, "u2").await })
            .await
            .unwrap();
        assert_eq!(reply.status, ResponseStatus::Success);
    }
}
