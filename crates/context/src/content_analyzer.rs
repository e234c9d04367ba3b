//! Content Analyzer - Scores extracted pages on five quality dimensions
//!
//! Provides:
//! - A single LLM evaluation per page (relevance, reliability, bias,
//!   factuality, recency, plus rationale)
//! - Bounds clamping for out-of-range model output
//! - Retries with backoff, then a neutral degraded score
//! - Scores cached by (query context, content digest)

use researchforge_common::cache::{keys, Cache};
use researchforge_common::errors::{AppError, Result};
use researchforge_common::llm::{extract_json_object, CompletionRequest, LanguageModel};
use researchforge_common::metrics::record_cache;
use researchforge_common::models::{ContentScore, ExtractedContent};
use researchforge_common::RetryPolicy;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Characters of page text shown to the model
pub const MAX_CONTENT_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You are a content analysis expert. Evaluate the provided content against the \
research context on five criteria, each scored from 0.0 to 1.0:\n\
1. relevance: how directly the content addresses the research context\n\
2. reliability: credibility of the publisher and the evidence offered\n\
3. bias: how one-sided or promotional the content is (1.0 = heavily biased)\n\
4. factuality: proportion of verifiable factual statements versus opinion\n\
5. recency: how current the information is for the context\n\
Respond with a JSON object with the keys relevance, reliability, bias, factuality, recency and rationale \
(one or two sentences).";

const DIMENSIONS: [&str; 5] = ["relevance", "reliability", "bias", "factuality", "recency"];

/// Content scorer backed by a language model
pub struct ContentAnalyzer {
    llm: Arc<dyn LanguageModel>,
    cache: Cache,
    retry: RetryPolicy,
    ttl: Duration,
}

impl ContentAnalyzer {
    pub fn new(llm: Arc<dyn LanguageModel>, cache: Cache, retry: RetryPolicy, ttl: Duration) -> Self {
        Self { llm, cache, retry, ttl }
    }

    /// Score `content`, returning a neutral degraded score when the model
    /// cannot produce one
    pub async fn score(&self, content: &ExtractedContent, query_context: &str) -> ContentScore {
        match self.try_score(content, query_context).await {
            Ok(score) => score,
            Err(e) => {
                warn!(url = %content.url, error = %e, "Content scoring failed, using neutral score");
                ContentScore::neutral(format!("Automatic assessment unavailable: {}", e))
            }
        }
    }

    /// Score `content` or fail with the last analysis error
    pub async fn try_score(&self, content: &ExtractedContent, query_context: &str) -> Result<ContentScore> {
        let key = keys::content_score(query_context, &content.main_text);
        if let Some(cached) = self.cache.lookup::<ContentScore>(&key).await {
            record_cache(true, "content_score");
            return Ok(cached);
        }
        record_cache(false, "content_score");

        let excerpt: String = content.main_text.chars().take(MAX_CONTENT_CHARS).collect();
        let prompt = format!(
            "Research context: {}\n\nSource URL: {}\nTitle: {}\n\nContent:\n{}",
            query_context,
            content.url,
            content.title.as_deref().unwrap_or("(untitled)"),
            excerpt
        );
        let request = CompletionRequest::prompt(SYSTEM_PROMPT, prompt).with_temperature(0.2);
        let request = &request;

        let score = self
            .retry
            .run("content scoring", || async move {
                let reply = self.llm.complete(request).await?;
                parse_score(&reply)
            })
            .await?;

        debug!(
            url = %content.url,
            relevance = score.relevance,
            reliability = score.reliability,
            "Content scored"
        );
        self.cache.store(&key, &score, self.ttl).await;
        Ok(score)
    }
}

/// Numbers, or strings holding numbers, are accepted for each dimension
fn dimension(object: &serde_json::Map<String, Value>, name: &str) -> Option<f64> {
    match object.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_score(reply: &str) -> Result<ContentScore> {
    let json = extract_json_object(reply)
        .ok_or_else(|| AppError::analysis("content score reply contained no JSON object"))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| AppError::analysis(format!("malformed content score: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| AppError::analysis("content score is not an object"))?;

    if DIMENSIONS.iter().all(|d| dimension(object, d).is_none()) {
        return Err(AppError::analysis("content score has no dimensions"));
    }
    let get = |name: &str| dimension(object, name).unwrap_or(0.5);

    Ok(ContentScore {
        relevance: get("relevance"),
        reliability: get("reliability"),
        bias: get("bias"),
        factuality: get("factuality"),
        recency: get("recency"),
        rationale: object
            .get("rationale")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
        degraded: false,
    }
    .clamped())
}

#[cfg(test)]
mod tests {
    use super::*;
    use researchforge_common::llm::MockLanguageModel;

    fn page(text: &str) -> ExtractedContent {
        ExtractedContent {
            url: "https://example.com/fusion".into(),
            title: Some("Fusion".into()),
            main_text: text.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_out_of_range_values_are_clamped() {
        let llm = MockLanguageModel::new().on(
            "content analysis expert",
            r#"{"relevance": 1.4, "reliability": "0.8", "bias": -0.3, "factuality": 0.7, "recency": 0.9, "rationale": "Peer reviewed."}"#,
        );
        let analyzer = ContentAnalyzer::new(
            Arc::new(llm),
            Cache::in_memory(),
            RetryPolicy::none(),
            Duration::from_secs(60),
        );

        let score = analyzer.score(&page("Fusion gain exceeded one."), "fusion").await;
        assert_eq!(score.relevance, 1.0);
        assert_eq!(score.reliability, 0.8);
        assert_eq!(score.bias, 0.0);
        assert_eq!(score.rationale, "Peer reviewed.");
        assert!(!score.degraded);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_neutral() {
        let llm = Arc::new(MockLanguageModel::new().with_default("I cannot rate this."));
        let analyzer = ContentAnalyzer::new(
            llm.clone(),
            Cache::in_memory(),
            RetryPolicy::none().with_retries(2),
            Duration::from_secs(60),
        );

        let score = analyzer.score(&page("text"), "fusion").await;
        assert!(score.degraded);
        assert_eq!(score.relevance, 0.5);
        assert_eq!(score.recency, 0.5);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scores_are_cached() {
        let llm = Arc::new(MockLanguageModel::new().with_default(
            r#"{"relevance": 0.9, "reliability": 0.9, "bias": 0.1, "factuality": 0.9, "recency": 0.5}"#,
        ));
        let analyzer = ContentAnalyzer::new(
            llm.clone(),
            Cache::in_memory(),
            RetryPolicy::none(),
            Duration::from_secs(60),
        );

        let first = analyzer.try_score(&page("same text"), "fusion").await.unwrap();
        let second = analyzer.try_score(&page("same text"), "Fusion").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn test_missing_dimensions_default() {
        let score = parse_score(r#"{"relevance": 0.2}"#).unwrap();
        assert_eq!(score.relevance, 0.2);
        assert_eq!(score.factuality, 0.5);
        assert!(parse_score(r#"{"verdict": "good"}"#).is_err());
    }
}
