//! Query Analyzer - Classifies intent and decomposes research queries
//!
//! Provides:
//! - LLM-backed intent classification and decomposition
//! - Time-sensitivity detection
//! - Cached, idempotent analysis keyed by normalized query text
//! - Degraded fallback when the model is unavailable

use chrono::{Datelike, Utc};
use researchforge_common::cache::{keys, Cache};
use researchforge_common::errors::{AppError, Result};
use researchforge_common::llm::{extract_json_object, CompletionRequest, LanguageModel};
use researchforge_common::metrics::record_cache;
use researchforge_common::models::{Intent, QueryAnalysis};
use researchforge_common::RetryPolicy;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a query analysis expert. When provided with a research query, analyze it and \
respond with a single JSON object with these fields:\n\
- \"intent\": one of \"factual\", \"temporal\", \"analytical\", \"news\", \"other\"\n\
- \"components\": the key components that make up the query, most important first\n\
- \"time_sensitive\": true when the answer depends on recent events\n\
- \"ambiguities\": potential ambiguities or clarifications needed\n\
- \"source_types\": the types of sources that would be most relevant\n\
- \"search_queries\": exactly 3 ready-to-use search queries\n\
Respond with JSON only.";

/// Words that mark a query or intent label as news-seeking
const NEWS_KEYWORDS: &[&str] = &[
    "latest",
    "recent",
    "breaking",
    "news",
    "today",
    "this week",
    "this month",
    "current",
    "update",
    "live",
    "newest",
    "headline",
    "ongoing",
];

/// True when `text` mentions any news keyword or the current year
pub fn mentions_news(text: &str) -> bool {
    let lower = text.to_lowercase();
    let year = Utc::now().year().to_string();
    NEWS_KEYWORDS.iter().any(|k| lower.contains(k)) || lower.contains(&year)
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    time_sensitive: bool,
    #[serde(default)]
    ambiguities: Vec<String>,
    #[serde(default)]
    source_types: Vec<String>,
    #[serde(default)]
    search_queries: Vec<String>,
}

/// Query analyzer backed by a language model and the result cache
pub struct QueryAnalyzer {
    llm: Arc<dyn LanguageModel>,
    cache: Cache,
    retry: RetryPolicy,
    ttl: Duration,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn LanguageModel>, cache: Cache, retry: RetryPolicy, ttl: Duration) -> Self {
        Self { llm, cache, retry, ttl }
    }

    /// Analyze a query. A warm cache returns the stored analysis without
    /// touching the model.
    pub async fn analyze(&self, query: &str) -> Result<QueryAnalysis> {
        let key = keys::analysis(query);
        if let Some(cached) = self.cache.lookup::<QueryAnalysis>(&key).await {
            record_cache(true, "analysis");
            debug!(query = %query, "Query analysis served from cache");
            return Ok(cached);
        }
        record_cache(false, "analysis");

        let request = CompletionRequest::prompt(SYSTEM_PROMPT, format!("Analyze this research query: {}", query))
            .with_temperature(0.2);
        let request = &request;
        let analysis = self
            .retry
            .run("query analysis", || async move {
                let reply = self.llm.complete(request).await?;
                parse_analysis(&reply, query)
            })
            .await?;

        info!(
            query = %query,
            intent = ?analysis.intent,
            components = analysis.components.len(),
            time_sensitive = analysis.time_sensitive,
            "Query analyzed"
        );
        self.cache.store(&key, &analysis, self.ttl).await;
        Ok(analysis)
    }

    /// Analyze, falling back to a degraded analysis on any failure
    pub async fn analyze_or_degraded(&self, query: &str) -> QueryAnalysis {
        match self.analyze(query).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(query = %query, error = %e, "Query analysis failed, continuing degraded");
                QueryAnalysis {
                    time_sensitive: mentions_news(query),
                    ..QueryAnalysis::degraded()
                }
            }
        }
    }
}

/// Parse the model reply into a [`QueryAnalysis`]
fn parse_analysis(reply: &str, query: &str) -> Result<QueryAnalysis> {
    let json = extract_json_object(reply)
        .ok_or_else(|| AppError::analysis("query analysis reply contained no JSON object"))?;
    let raw: RawAnalysis = serde_json::from_str(json)
        .map_err(|e| AppError::analysis(format!("malformed query analysis: {}", e)))?;

    // A free-text label such as "recent news" still counts as news
    let mut intent = Intent::from_label(&raw.intent);
    if intent == Intent::Other && mentions_news(&raw.intent) {
        intent = Intent::News;
    }

    let clean = |items: Vec<String>| -> Vec<String> {
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    Ok(QueryAnalysis {
        time_sensitive: raw.time_sensitive || intent == Intent::News || mentions_news(query),
        intent,
        components: clean(raw.components),
        ambiguities: clean(raw.ambiguities),
        source_types: clean(raw.source_types),
        suggested_queries: clean(raw.search_queries),
        degraded: false,
    })
}
