//! Synthesis Engine - Merges scored sources into a cited answer
//!
//! Provides:
//! - Source ordering by reliability × relevance, ties broken by recency
//! - Claim-level contradiction detection (see [`contradiction`])
//! - LLM answer composition citing sources by index
//! - Citation sanitizing so the answer never points at a missing source
//! - An extractive fallback when the model is unavailable
//! - Results cached by (query, ordered source URLs)

pub mod contradiction;

use regex_lite::{Captures, Regex};
use researchforge_common::cache::{keys, Cache};
use researchforge_common::llm::{CompletionRequest, LanguageModel};
use researchforge_common::metrics::record_cache;
use researchforge_common::models::Source;
use researchforge_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

/// Ordering weight for sources that were never scored
pub const UNSCORED_WEIGHT: f64 = 0.25;

/// Reliability below which content needs a caveat
pub const LOW_RELIABILITY: f64 = 0.4;

/// Characters of evidence per source shown to the model
const MAX_SOURCE_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "You are an expert research assistant that synthesizes information from multiple \
sources to provide comprehensive, accurate answers. Your task is to:\n\
1. Identify key information relevant to the query\n\
2. Point out contradictions between sources instead of silently choosing one\n\
3. Organize information in a logical structure\n\
4. Generate a comprehensive answer that directly addresses the query\n\
5. Cite sources appropriately (Source 1, Source 2, etc.) and only use the sources provided\n\
6. Give more weight to higher-reliability sources; mention low-reliability content only with an explicit caveat\n\
After the answer, add a line starting with \"CONTRADICTIONS:\" describing conflicting claims (or \"none\"), \
then a line starting with \"ADDITIONAL RESEARCH:\" suggesting follow-up research (or \"none\").";

/// Output of one synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub answer: String,
    pub contradictions: Option<String>,
    pub suggestions: Option<String>,
    /// Produced by the extractive fallback
    #[serde(default)]
    pub degraded: bool,
}

/// Ordering weight of one source
pub fn source_weight(source: &Source) -> f64 {
    source.score.as_ref().map_or(UNSCORED_WEIGHT, |s| s.weight())
}

/// Sources ordered by weight, then recency score, then publication date.
/// The sort is stable, so provider order breaks any remaining tie.
pub fn rank_sources(sources: &[Source]) -> Vec<Source> {
    let recency = |s: &Source| s.score.as_ref().map_or(0.0, |score| score.recency);
    let mut ranked = sources.to_vec();
    ranked.sort_by(|a, b| {
        source_weight(b)
            .total_cmp(&source_weight(a))
            .then_with(|| recency(b).total_cmp(&recency(a)))
            .then_with(|| match (a.published_date, b.published_date) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    });
    ranked
}

/// Answer composer backed by a language model
pub struct SynthesisEngine {
    llm: Arc<dyn LanguageModel>,
    cache: Cache,
    retry: RetryPolicy,
    ttl: Duration,
}

impl SynthesisEngine {
    pub fn new(llm: Arc<dyn LanguageModel>, cache: Cache, retry: RetryPolicy, ttl: Duration) -> Self {
        Self { llm, cache, retry, ttl }
    }

    /// Synthesize an answer. Citations index the sources in
    /// [`rank_sources`] order. Never fails.
    pub async fn synthesize(&self, query: &str, sources: &[Source]) -> Synthesis {
        if sources.is_empty() {
            return Synthesis {
                answer: format!(
                    "No information was found for \"{}\". Try rephrasing the query or using a deeper research depth.",
                    query.trim()
                ),
                contradictions: None,
                suggestions: None,
                degraded: false,
            };
        }

        let ranked = rank_sources(sources);
        let urls: Vec<&str> = ranked.iter().map(|s| s.url.as_str()).collect();
        let key = keys::synthesis(query, &urls);
        if let Some(cached) = self.cache.lookup::<Synthesis>(&key).await {
            record_cache(true, "synthesis");
            return cached;
        }
        record_cache(false, "synthesis");

        let conflicts = contradiction::detect(&ranked);
        let detected = contradiction::describe(&conflicts, &ranked);

        let request = CompletionRequest::prompt(SYSTEM_PROMPT, build_prompt(query, &ranked, detected.as_deref()))
            .with_temperature(0.3);
        let request = &request;
        let reply = self
            .retry
            .run("synthesis", || async move { self.llm.complete(request).await })
            .await;

        let synthesis = match reply {
            Ok(text) => {
                let sections = split_sections(&text);
                let answer = sanitize_citations(&sections.answer, ranked.len());
                Synthesis {
                    answer,
                    contradictions: merge_notes(detected, sections.contradictions),
                    suggestions: sections.additional_research,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(query = %query, error = %e, "Synthesis failed, composing extractive answer");
                Synthesis {
                    answer: extractive_answer(&ranked),
                    contradictions: detected,
                    suggestions: None,
                    degraded: true,
                }
            }
        };

        info!(
            query = %query,
            sources = ranked.len(),
            contradictions = synthesis.contradictions.is_some(),
            degraded = synthesis.degraded,
            "Synthesis complete"
        );
        if !synthesis.degraded {
            self.cache.store(&key, &synthesis, self.ttl).await;
        }
        synthesis
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if out.len() < text.len() {
        out.push_str("...");
    }
    out
}

fn build_prompt(query: &str, ranked: &[Source], detected: Option<&str>) -> String {
    let mut prompt = format!("QUERY: {}\n\nSOURCES:\n", query);
    for (i, source) in ranked.iter().enumerate() {
        let assessment = match &source.score {
            Some(score) if score.reliability < LOW_RELIABILITY => format!(
                "RELIABILITY: {:.2} RELEVANCE: {:.2} (LOW RELIABILITY: include only with a caveat)",
                score.reliability, score.relevance
            ),
            Some(score) => format!("RELIABILITY: {:.2} RELEVANCE: {:.2}", score.reliability, score.relevance),
            None => "RELIABILITY: unassessed".to_string(),
        };
        prompt.push_str(&format!(
            "SOURCE {}: {}\nURL: {}\n{}\nCONTENT: {}\n\n",
            i + 1,
            source.name,
            source.url,
            assessment,
            truncate(source.evidence(), MAX_SOURCE_CHARS)
        ));
    }
    if let Some(conflicts) = detected {
        prompt.push_str("KNOWN CONFLICTS (present both sides):\n");
        prompt.push_str(conflicts);
        prompt.push('\n');
    }
    prompt
}

struct Sections {
    answer: String,
    contradictions: Option<String>,
    additional_research: Option<String>,
}

static HEADER: OnceLock<Regex> = OnceLock::new();
static CITATION: OnceLock<Regex> = OnceLock::new();

fn header() -> &'static Regex {
    HEADER.get_or_init(|| {
        Regex::new(r"(?i)^[\s#*_]*(contradictions|additional research)[\s*_]*:[\s*_]*(.*)$").expect("valid regex")
    })
}

fn citation() -> &'static Regex {
    CITATION.get_or_init(|| Regex::new(r"(?i)\[?\(?source\s+(\d+)\)?\]?").expect("valid regex"))
}

/// Treat "none" style notes as absent
fn meaningful(note: String) -> Option<String> {
    let trimmed = note.trim();
    let lower = trimmed.trim_end_matches('.').to_lowercase();
    let empty = trimmed.is_empty()
        || lower == "none"
        || lower == "n/a"
        || lower.starts_with("none ")
        || lower.starts_with("no contradictions")
        || lower.starts_with("no additional");
    (!empty).then(|| trimmed.to_string())
}

/// Split the model reply into answer body and trailing sections
fn split_sections(reply: &str) -> Sections {
    let mut answer = Vec::new();
    let mut contradictions = Vec::new();
    let mut research = Vec::new();
    let mut current: Option<bool> = None; // Some(true) = contradictions

    for line in reply.lines() {
        if let Some(caps) = header().captures(line) {
            let is_contradictions = caps[1].to_lowercase().starts_with("contradiction");
            current = Some(is_contradictions);
            let rest = caps[2].trim();
            if !rest.is_empty() {
                if is_contradictions {
                    contradictions.push(rest.to_string());
                } else {
                    research.push(rest.to_string());
                }
            }
            continue;
        }
        match current {
            None => answer.push(line),
            Some(true) => contradictions.push(line.to_string()),
            Some(false) => research.push(line.to_string()),
        }
    }

    Sections {
        answer: answer.join("\n").trim().to_string(),
        contradictions: meaningful(contradictions.join("\n")),
        additional_research: meaningful(research.join("\n")),
    }
}

/// Drop citations that name a source index outside `1..=count`
fn sanitize_citations(answer: &str, count: usize) -> String {
    citation()
        .replace_all(answer, |caps: &Captures| {
            let valid = caps[1].parse::<usize>().is_ok_and(|n| n >= 1 && n <= count);
            if valid {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn merge_notes(detected: Option<String>, reported: Option<String>) -> Option<String> {
    match (detected, reported) {
        (Some(d), Some(r)) => Some(format!("{}\n{}", d, r)),
        (d, r) => d.or(r),
    }
}

/// Leading sentence of `text`, capped
fn lead(text: &str) -> String {
    let text = text.trim();
    let end = text
        .char_indices()
        .find(|&(i, c)| matches!(c, '.' | '!' | '?') && text[i + c.len_utf8()..].starts_with(' '))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(text.len());
    truncate(&text[..end], 300)
}

/// Answer assembled only from source text
fn extractive_answer(ranked: &[Source]) -> String {
    let mut answer = String::from("Automatic synthesis was unavailable; key points from the sources:\n");
    for (i, source) in ranked.iter().enumerate() {
        let point = lead(source.evidence());
        if point.is_empty() {
            continue;
        }
        let low = source
            .score
            .as_ref()
            .is_some_and(|s| !s.degraded && s.reliability < LOW_RELIABILITY);
        let caveat = if low { " (low reliability, treat with caution)" } else { "" };
        answer.push_str(&format!("- {}{} [Source {}]\n", point, caveat, i + 1));
    }
    answer.trim_end().to_string()
}
