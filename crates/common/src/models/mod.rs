//! Research pipeline data model
//!
//! Provides the types that flow between pipeline stages:
//! - `Query` and `ResearchDepth` (request input)
//! - `QueryAnalysis`, `CandidateQuery`, `FinalQuery` (planning)
//! - `SearchResult`, `FetchedPage`, `ExtractedContent` (retrieval)
//! - `ContentScore`, `Source`, `ResearchResult` (scoring and output)
//!
//! Wire envelopes for the five public operations live in [`api`].

pub mod api;

use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Coarse knob controlling source count, deadline and cache TTL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchDepth {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl ResearchDepth {
    /// Upper bound on sources in a result
    pub fn max_sources(&self) -> usize {
        match self {
            ResearchDepth::Quick => 3,
            ResearchDepth::Standard => 6,
            ResearchDepth::Deep => 12,
        }
    }

    /// Request-wide deadline when none is configured
    pub fn default_deadline(&self) -> Duration {
        match self {
            ResearchDepth::Quick => Duration::from_secs(20),
            ResearchDepth::Standard => Duration::from_secs(45),
            ResearchDepth::Deep => Duration::from_secs(90),
        }
    }

    /// How long a finished result stays cached
    pub fn cache_ttl(&self) -> Duration {
        match self {
            ResearchDepth::Quick => Duration::from_secs(3600),
            ResearchDepth::Standard => Duration::from_secs(6 * 3600),
            ResearchDepth::Deep => Duration::from_secs(24 * 3600),
        }
    }

    /// News look-back window in days
    pub fn news_days_back(&self) -> u32 {
        match self {
            ResearchDepth::Quick => 3,
            ResearchDepth::Standard => 7,
            ResearchDepth::Deep => 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchDepth::Quick => "quick",
            ResearchDepth::Standard => "standard",
            ResearchDepth::Deep => "deep",
        }
    }
}

impl fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A research request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    text: String,
    user_id: String,
    depth: ResearchDepth,
}

impl Query {
    /// Build a query, rejecting empty text
    pub fn new(text: impl Into<String>, user_id: impl Into<String>, depth: ResearchDepth) -> Result<Self> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(AppError::Validation {
                message: "Query cannot be empty".to_string(),
                field: Some("query".to_string()),
            });
        }
        Ok(Self {
            text,
            user_id: user_id.into(),
            depth,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn depth(&self) -> ResearchDepth {
        self.depth
    }
}

/// Classified purpose of a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Factual,
    Temporal,
    Analytical,
    News,
    #[default]
    Other,
}

impl Intent {
    /// Lenient parse of a model label
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "factual" | "fact" | "definition" => Intent::Factual,
            "temporal" | "time" | "historical" => Intent::Temporal,
            "analytical" | "analysis" | "comparison" | "research" => Intent::Analytical,
            "news" | "current_events" | "current events" => Intent::News,
            _ => Intent::Other,
        }
    }
}

/// Planning output for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub intent: Intent,
    /// Sub-questions or key concepts, in order
    pub components: Vec<String>,
    pub time_sensitive: bool,
    pub ambiguities: Vec<String>,
    pub source_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_queries: Vec<String>,
    /// Produced without the language model
    #[serde(default)]
    pub degraded: bool,
}

impl QueryAnalysis {
    /// Analysis used when the model is unavailable
    pub fn degraded() -> Self {
        Self {
            intent: Intent::Other,
            degraded: true,
            ..Default::default()
        }
    }
}

/// Which generator produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOrigin {
    Llm,
    Heuristic,
}

/// A generated search query with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub text: String,
    pub origin: CandidateOrigin,
    pub score: f64,
}

/// The selected candidate plus the field it was chosen from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalQuery {
    pub text: String,
    pub origin: CandidateOrigin,
    pub score: f64,
    pub candidates: Vec<CandidateQuery>,
}

/// Kind of external hit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Web,
    News,
    Image,
    Story,
}

/// One ranked hit from a search or news provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source_type: SourceType,
    /// 1-based provider rank
    pub rank: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
}

/// Raw outcome of one page fetch
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: Option<u16>,
    pub html: Option<String>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        self.html.is_some() && self.error.is_none()
    }
}

/// Structured text derived from a fetched page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Main text, narrowed to the selector query when one was given
    pub main_text: String,
    pub headings: Vec<String>,
    pub tables: Vec<Vec<Vec<String>>>,
    pub links: Vec<String>,
    pub markdown: String,
}

/// Five-dimension quality assessment of one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentScore {
    pub relevance: f64,
    pub reliability: f64,
    /// Higher means more biased
    pub bias: f64,
    pub factuality: f64,
    pub recency: f64,
    pub rationale: String,
    #[serde(default)]
    pub degraded: bool,
}

impl ContentScore {
    /// Neutral score used when the analyzer cannot reach a verdict
    pub fn neutral(rationale: impl Into<String>) -> Self {
        Self {
            relevance: 0.5,
            reliability: 0.5,
            bias: 0.5,
            factuality: 0.5,
            recency: 0.5,
            rationale: rationale.into(),
            degraded: true,
        }
    }

    /// Force every dimension into [0, 1]; NaN becomes 0.5
    pub fn clamped(mut self) -> Self {
        fn clamp(v: f64) -> f64 {
            if v.is_nan() {
                0.5
            } else {
                v.clamp(0.0, 1.0)
            }
        }
        self.relevance = clamp(self.relevance);
        self.reliability = clamp(self.reliability);
        self.bias = clamp(self.bias);
        self.factuality = clamp(self.factuality);
        self.recency = clamp(self.recency);
        self
    }

    /// Ordering weight used by synthesis
    pub fn weight(&self) -> f64 {
        self.reliability * self.relevance
    }
}

/// User-facing unit of evidence. `url` is always present; `summarized_content`
/// is present only when extraction succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarized_content: Option<String>,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ContentScore>,
}

impl Source {
    /// Snippet-only source built from a provider hit
    pub fn from_result(result: &SearchResult) -> Self {
        let name = if result.title.trim().is_empty() {
            host_of(&result.url).unwrap_or_else(|| result.url.clone())
        } else {
            result.title.clone()
        };
        Self {
            name,
            url: result.url.clone(),
            snippet: result.snippet.clone(),
            summarized_content: None,
            source_type: result.source_type,
            published_date: result.published_date,
            score: None,
        }
    }

    /// Attach successfully extracted content
    pub fn with_content(mut self, content: &ExtractedContent) -> Self {
        if self.name.trim().is_empty() || self.name == self.url {
            if let Some(title) = &content.title {
                self.name = title.clone();
            }
        }
        self.summarized_content = Some(content.main_text.clone());
        self
    }

    /// Best text available for claims: extracted content, else snippet
    pub fn evidence(&self) -> &str {
        self.summarized_content.as_deref().unwrap_or(&self.snippet)
    }
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let host = rest.split(['/', '?', '#']).next()?;
    (!host.is_empty()).then(|| host.to_string())
}

/// Aggregate counts and notes attached to a result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    pub web_sources: usize,
    pub news_sources: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradictions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_research_suggestions: Option<String>,
    /// Degraded steps that reduced completeness
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limitations: Vec<String>,
}

/// Terminal, cacheable artifact of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub answer: String,
    pub sources: Vec<Source>,
    pub query_analysis: QueryAnalysis,
    pub additional_info: AdditionalInfo,
    pub research_depth: ResearchDepth,
}
