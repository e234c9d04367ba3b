//! Research Orchestrator - Drives one research run end to end
//!
//! States: Received → Analyzing → StrategySelected → Gathering →
//! AnalyzingContent → Synthesizing → Done, with Failed reserved for input
//! errors. Every other failure degrades the result and is listed in
//! `additional_info.limitations`.

use crate::content_analyzer::ContentAnalyzer;
use crate::query_analyzer::QueryAnalyzer;
use crate::strategy::{SearchStrategySelector, StrategyConfig};
use crate::synthesis::{rank_sources, SynthesisEngine};
use futures::stream::{self, StreamExt};
use researchforge_common::cache::{keys, Cache};
use researchforge_common::config::AppConfig;
use researchforge_common::errors::{AppError, Result};
use researchforge_common::llm::LanguageModel;
use researchforge_common::metrics::{record_cache, record_research};
use researchforge_common::models::{
    AdditionalInfo, ExtractedContent, Intent, Query, QueryAnalysis, ResearchDepth, ResearchResult,
    SearchResult, Source, SourceType,
};
use researchforge_common::RetryPolicy;
use researchforge_search::providers::{news_results, web_results};
use researchforge_search::{ContentExtractor, NewsProvider, NewsQuery, PageFetcher, SearchProvider};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tuning shared by every pipeline component
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Candidate queries per request
    pub candidates: usize,
    /// Concurrent fetch and score tasks per request
    pub fan_out: usize,
    pub quick_deadline: Duration,
    pub standard_deadline: Duration,
    pub deep_deadline: Duration,
    /// Per-page fetch and extract budget
    pub fetch_timeout_secs: u64,
    /// Policy for model calls
    pub retry: RetryPolicy,
    /// Retries for one content score
    pub score_retries: u32,
    pub analysis_ttl: Duration,
    pub score_ttl: Duration,
    pub chunk_tokens: usize,
    pub chat_max_tokens: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            candidates: config.research.candidate_queries.max(1),
            fan_out: config.research.fan_out.max(1),
            quick_deadline: config.research_deadline(ResearchDepth::Quick),
            standard_deadline: config.research_deadline(ResearchDepth::Standard),
            deep_deadline: config.research_deadline(ResearchDepth::Deep),
            fetch_timeout_secs: config.fetcher.timeout_secs,
            retry: RetryPolicy::from_config(&config.retry),
            score_retries: config.research.score_retries,
            analysis_ttl: Duration::from_secs(config.research.analysis_ttl_secs),
            score_ttl: Duration::from_secs(config.research.score_ttl_secs),
            chunk_tokens: config.research.chunk_tokens,
            chat_max_tokens: config.research.chat_max_tokens,
        }
    }

    /// Request-wide deadline for a depth
    pub fn deadline(&self, depth: ResearchDepth) -> Duration {
        match depth {
            ResearchDepth::Quick => self.quick_deadline,
            ResearchDepth::Standard => self.standard_deadline,
            ResearchDepth::Deep => self.deep_deadline,
        }
    }
}

/// Pipeline state, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchState {
    Received,
    Analyzing,
    StrategySelected,
    Gathering,
    AnalyzingContent,
    Synthesizing,
    Done,
    Failed,
}

impl fmt::Display for ResearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResearchState::Received => "received",
            ResearchState::Analyzing => "analyzing",
            ResearchState::StrategySelected => "strategy_selected",
            ResearchState::Gathering => "gathering",
            ResearchState::AnalyzingContent => "analyzing_content",
            ResearchState::Synthesizing => "synthesizing",
            ResearchState::Done => "done",
            ResearchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-run bookkeeping
struct Run<'a> {
    id: Uuid,
    query: &'a str,
    depth: ResearchDepth,
    budget: Duration,
    deadline: Instant,
    limitations: Vec<String>,
}

impl Run<'_> {
    fn enter(&self, state: ResearchState) {
        info!(
            run_id = %self.id,
            query = %self.query,
            depth = %self.depth,
            state = %state,
            "Research state transition"
        );
    }

    fn note(&mut self, limitation: impl Into<String>) {
        let limitation = limitation.into();
        warn!(run_id = %self.id, limitation = %limitation, "Research degraded");
        self.limitations.push(limitation);
    }
}

/// Top-level research pipeline
pub struct ResearchOrchestrator {
    analyzer: QueryAnalyzer,
    strategy: SearchStrategySelector,
    search: Arc<dyn SearchProvider>,
    news: Arc<dyn NewsProvider>,
    extractor: ContentExtractor,
    content: ContentAnalyzer,
    synthesis: SynthesisEngine,
    cache: Cache,
    settings: PipelineSettings,
}

impl ResearchOrchestrator {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        news: Arc<dyn NewsProvider>,
        fetcher: Arc<dyn PageFetcher>,
        cache: Cache,
        settings: PipelineSettings,
    ) -> Self {
        let retry = settings.retry.clone();
        Self {
            analyzer: QueryAnalyzer::new(llm.clone(), cache.clone(), retry.clone(), settings.analysis_ttl),
            strategy: SearchStrategySelector::new(
                llm.clone(),
                retry.clone(),
                StrategyConfig {
                    candidates: settings.candidates,
                },
            ),
            search,
            news,
            extractor: ContentExtractor::new(fetcher),
            content: ContentAnalyzer::new(
                llm.clone(),
                cache.clone(),
                retry.clone().with_retries(settings.score_retries),
                settings.score_ttl,
            ),
            synthesis: SynthesisEngine::new(llm, cache.clone(), retry, settings.score_ttl),
            cache,
            settings,
        }
    }

    /// Run the pipeline. Only input errors are returned as `Err`.
    pub async fn run(&self, query: Query) -> Result<ResearchResult> {
        let started = std::time::Instant::now();
        let depth = query.depth();
        let budget = self.settings.deadline(depth);
        let mut run = Run {
            id: Uuid::now_v7(),
            query: query.text(),
            depth,
            budget,
            deadline: Instant::now() + budget,
            limitations: Vec::new(),
        };
        run.enter(ResearchState::Received);

        // A deserialized Query can bypass `Query::new`
        if query.text().trim().is_empty() {
            run.enter(ResearchState::Failed);
            record_research(started.elapsed().as_secs_f64(), depth.as_str(), 0, false);
            return Err(AppError::Validation {
                message: "Query cannot be empty".to_string(),
                field: Some("query".to_string()),
            });
        }

        let key = keys::research(query.text(), depth.as_str());
        if let Some(cached) = self.cache.lookup::<ResearchResult>(&key).await {
            record_cache(true, "research");
            run.enter(ResearchState::Done);
            record_research(started.elapsed().as_secs_f64(), depth.as_str(), cached.sources.len(), true);
            return Ok(cached);
        }
        record_cache(false, "research");

        run.enter(ResearchState::Analyzing);
        let analysis = self.analyzer.analyze_or_degraded(query.text()).await;
        if analysis.degraded {
            run.note("Query analysis was unavailable; intent and components are missing");
        }

        let final_query = self.strategy.select(query.text(), &analysis).await;
        run.enter(ResearchState::StrategySelected);

        run.enter(ResearchState::Gathering);
        let hits = self.gather(&mut run, &final_query.text, &analysis).await;
        let extracted = self.extract_all(&mut run, &hits).await;
        let mut sources: Vec<Source> = hits
            .iter()
            .zip(&extracted)
            .map(|(hit, content)| match content {
                Some(content) => Source::from_result(hit).with_content(content),
                None => Source::from_result(hit),
            })
            .collect();

        run.enter(ResearchState::AnalyzingContent);
        self.score_all(&mut run, &mut sources, &extracted).await;

        run.enter(ResearchState::Synthesizing);
        let synthesis = self.synthesis.synthesize(query.text(), &sources).await;
        if synthesis.degraded {
            run.note("Answer synthesis was unavailable; the answer lists key points from each source");
        }
        let sources = rank_sources(&sources);

        let news_sources = sources.iter().filter(|s| s.source_type == SourceType::News).count();
        let result = ResearchResult {
            query: query.text().to_string(),
            timestamp: chrono::Utc::now(),
            answer: synthesis.answer,
            additional_info: AdditionalInfo {
                web_sources: sources.len() - news_sources,
                news_sources,
                contradictions: synthesis.contradictions,
                additional_research_suggestions: synthesis.suggestions,
                limitations: std::mem::take(&mut run.limitations),
            },
            sources,
            query_analysis: analysis,
            research_depth: depth,
        };

        // Empty runs are usually transient provider outages
        if !result.sources.is_empty() {
            self.cache.store(&key, &result, depth.cache_ttl()).await;
        }
        run.enter(ResearchState::Done);
        info!(
            run_id = %run.id,
            sources = result.sources.len(),
            news_sources = result.additional_info.news_sources,
            latency_ms = started.elapsed().as_millis() as u64,
            "Research complete"
        );
        record_research(started.elapsed().as_secs_f64(), depth.as_str(), result.sources.len(), true);
        Ok(result)
    }

    async fn web_search(&self, text: &str, deadline: Instant, budget: Duration) -> Result<Vec<SearchResult>> {
        match timeout_at(deadline, self.search.search(text)).await {
            Ok(Ok(response)) if response.is_error() => Err(AppError::provider(
                self.search.name(),
                response.message.unwrap_or_else(|| "search failed".to_string()),
            )),
            Ok(Ok(response)) => Ok(web_results(&response)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Timeout {
                operation: format!("{} search", self.search.name()),
                timeout_ms: budget.as_millis() as u64,
            }),
        }
    }

    async fn news_search(&self, request: &NewsQuery, deadline: Instant, budget: Duration) -> Result<Vec<SearchResult>> {
        match timeout_at(deadline, self.news.news(request)).await {
            Ok(Ok(batch)) => Ok(news_results(&batch.articles)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Timeout {
                operation: format!("{} news", self.news.name()),
                timeout_ms: budget.as_millis() as u64,
            }),
        }
    }

    /// Query the providers the analysis routes to and keep at most
    /// `max_sources` distinct hits
    async fn gather(&self, run: &mut Run<'_>, text: &str, analysis: &QueryAnalysis) -> Vec<SearchResult> {
        let (depth, deadline, budget) = (run.depth, run.deadline, run.budget);
        let route_news = analysis.intent == Intent::News;
        let want_news = route_news || depth == ResearchDepth::Deep;
        let want_web = !route_news || depth == ResearchDepth::Deep;
        let news_request = NewsQuery {
            query: text.to_string(),
            days_back: depth.news_days_back(),
            max_results: (depth.max_sources() * 2).max(5),
        };

        let (web, news) = tokio::join!(
            async {
                if want_web {
                    Some(self.web_search(text, deadline, budget).await)
                } else {
                    None
                }
            },
            async {
                if want_news {
                    Some(self.news_search(&news_request, deadline, budget).await)
                } else {
                    None
                }
            }
        );

        let news_hits = match news {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => {
                run.note(format!("News search failed: {}", e));
                Vec::new()
            }
            None => Vec::new(),
        };
        let mut web_hits = match web {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => {
                run.note(format!("Web search failed: {}", e));
                Vec::new()
            }
            None => Vec::new(),
        };

        if route_news && news_hits.is_empty() && !want_web {
            run.note("No news coverage was found; web results were used instead");
            match self.web_search(text, deadline, budget).await {
                Ok(hits) => web_hits = hits,
                Err(e) => run.note(format!("Web search failed: {}", e)),
            }
        }

        let ordered = if route_news {
            news_hits.into_iter().chain(web_hits)
        } else {
            web_hits.into_iter().chain(news_hits)
        };
        let mut seen = HashSet::new();
        let hits: Vec<SearchResult> = ordered
            .filter(|hit| seen.insert(hit.url.trim_end_matches('/').to_string()))
            .take(depth.max_sources())
            .collect();

        debug!(run_id = %run.id, hits = hits.len(), route_news, "Gathered search hits");
        hits
    }

    /// Fetch and extract every hit with bounded concurrency until the
    /// deadline; unfinished fetches are dropped
    async fn extract_all(&self, run: &mut Run<'_>, hits: &[SearchResult]) -> Vec<Option<ExtractedContent>> {
        let mut extracted: Vec<Option<ExtractedContent>> = vec![None; hits.len()];
        let timeout_secs = self.settings.fetch_timeout_secs;

        let extractor = &self.extractor;
        let jobs: Vec<_> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let url = hit.url.clone();
                async move { (i, extractor.fetch_and_extract(&url, None, timeout_secs).await) }
            })
            .collect();
        let mut pending = stream::iter(jobs).buffer_unordered(self.settings.fan_out);

        let mut failed = 0;
        let mut finished = 0;
        loop {
            match timeout_at(run.deadline, pending.next()).await {
                Ok(Some((i, Ok(content)))) => extracted[i] = Some(content),
                Ok(Some((i, Err(e)))) => {
                    debug!(run_id = %run.id, url = %hits[i].url, error = %e, "Falling back to snippet");
                    failed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    run.note(format!(
                        "Research deadline reached while fetching; {} of {} pages were not retrieved",
                        hits.len() - finished,
                        hits.len()
                    ));
                    break;
                }
            }
            finished += 1;
        }
        drop(pending);

        if failed > 0 {
            run.note(format!(
                "{} of {} pages could not be fetched or extracted; their snippets were used",
                failed,
                hits.len()
            ));
        }
        extracted
    }

    /// Score every extracted source with bounded concurrency until the
    /// deadline; sources not reached stay unscored
    async fn score_all(&self, run: &mut Run<'_>, sources: &mut [Source], extracted: &[Option<ExtractedContent>]) {
        let analyzer = &self.content;
        let jobs: Vec<_> = extracted
            .iter()
            .enumerate()
            .filter_map(|(i, content)| content.clone().map(|c| (i, c)))
            .map(|(i, content)| {
                let query_context = run.query.to_string();
                async move { (i, analyzer.score(&content, &query_context).await) }
            })
            .collect();
        let mut pending = stream::iter(jobs).buffer_unordered(self.settings.fan_out);

        let mut neutral = 0;
        loop {
            match timeout_at(run.deadline, pending.next()).await {
                Ok(Some((i, score))) => {
                    if score.degraded {
                        neutral += 1;
                    }
                    sources[i].score = Some(score);
                }
                Ok(None) => break,
                Err(_) => {
                    run.note("Research deadline reached while scoring; some sources are unscored");
                    break;
                }
            }
        }
        drop(pending);

        if neutral > 0 {
            run.note(format!(
                "{} source(s) could not be assessed and received neutral scores",
                neutral
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use researchforge_common::llm::MockLanguageModel;
    use researchforge_search::mock::{MockNewsProvider, MockPageFetcher, MockSearchProvider};

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            retry: RetryPolicy::none(),
            score_retries: 0,
            ..PipelineSettings::default()
        }
    }

    fn orchestrator(
        llm: MockLanguageModel,
        search: MockSearchProvider,
        fetcher: MockPageFetcher,
        settings: PipelineSettings,
    ) -> ResearchOrchestrator {
        ResearchOrchestrator::new(
            Arc::new(llm),
            Arc::new(search),
            Arc::new(MockNewsProvider::new()),
            Arc::new(fetcher),
            Cache::in_memory(),
            settings,
        )
    }

    #[tokio::test]
    async fn test_everything_down_still_succeeds() {
        let urls: Vec<String> = (1..=5).map(|i| format!("https://site{}.example/a", i)).collect();
        let orchestrator = orchestrator(
            MockLanguageModel::unavailable(),
            MockSearchProvider::new().with_results(urls),
            MockPageFetcher::new(),
            fast_settings(),
        );

        let query = Query::new("rust borrow checker", "u1", ResearchDepth::Quick).unwrap();
        let result = orchestrator.run(query).await.unwrap();

        assert_eq!(result.sources.len(), 3);
        assert!(result.sources.iter().all(|s| s.summarized_content.is_none()));
        assert!(result.query_analysis.degraded);
        assert!(!result.additional_info.limitations.is_empty());
        assert!(result.answer.contains("[Source 1]"));
    }

    #[tokio::test]
    async fn test_deadline_keeps_partial_results() {
        let settings = PipelineSettings {
            quick_deadline: Duration::from_millis(200),
            ..fast_settings()
        };
        let orchestrator = orchestrator(
            MockLanguageModel::unavailable(),
            MockSearchProvider::new().with_results(["https://slow.example/a"]),
            MockPageFetcher::new()
                .with_page("https://slow.example/a", "<html><body><p>slow</p></body></html>")
                .with_delay(Duration::from_secs(5)),
            settings,
        );

        let query = Query::new("slow pages", "u1", ResearchDepth::Quick).unwrap();
        let result = orchestrator.run(query).await.unwrap();

        assert_eq!(result.sources.len(), 1);
        assert!(result.sources[0].summarized_content.is_none());
        assert!(result
            .additional_info
            .limitations
            .iter()
            .any(|l| l.contains("deadline")));
    }

    #[tokio::test]
    async fn test_no_hits_is_not_cached() {
        let search = Arc::new(MockSearchProvider::new());
        let orchestrator = ResearchOrchestrator::new(
            Arc::new(MockLanguageModel::unavailable()),
            search.clone(),
            Arc::new(MockNewsProvider::new()),
            Arc::new(MockPageFetcher::new()),
            Cache::in_memory(),
            fast_settings(),
        );

        for _ in 0..2 {
            let query = Query::new("nothing matches", "u1", ResearchDepth::Standard).unwrap();
            let result = orchestrator.run(query).await.unwrap();
            assert!(result.sources.is_empty());
            assert!(result.answer.contains("No information was found"));
        }
        assert_eq!(search.call_count(), 2);
    }

    #[tokio::test]
    async fn test_deserialized_empty_query_fails() {
        let orchestrator = orchestrator(
            MockLanguageModel::unavailable(),
            MockSearchProvider::new(),
            MockPageFetcher::new(),
            fast_settings(),
        );
        let query: Query =
            serde_json::from_str(r#"{"text": "  ", "user_id": "u1", "depth": "quick"}"#).unwrap();
        let err = orchestrator.run(query).await.unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_settings_follow_config() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.candidates, 3);
        assert_eq!(settings.deadline(ResearchDepth::Deep), Duration::from_secs(90));
    }
}
