//! Search Strategy Selector - Picks the query sent to the search provider
//!
//! Provides:
//! - LLM candidate generation (seeded by the analyzer's suggested queries)
//! - Regex/heuristic candidate extraction that never needs the model
//! - Near-duplicate removal
//! - BM25-style scoring and a deterministic pick

pub mod bm25;

use bm25::{is_generic, tokenize, Bm25Scorer};
use chrono::{Datelike, Utc};
use regex_lite::Regex;
use researchforge_common::llm::{CompletionRequest, LanguageModel};
use researchforge_common::models::{CandidateOrigin, CandidateQuery, FinalQuery, QueryAnalysis};
use researchforge_common::RetryPolicy;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a search strategist. Rewrite research questions into short, \
specific web search engine queries. Respond with a JSON array of strings only.";

/// Strategy configuration
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// Number of candidates generated per query
    pub candidates: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self { candidates: 3 }
    }
}

static QUOTED: OnceLock<Regex> = OnceLock::new();
static PROPER: OnceLock<Regex> = OnceLock::new();
static NUMBERING: OnceLock<Regex> = OnceLock::new();

fn quoted() -> &'static Regex {
    QUOTED.get_or_init(|| Regex::new(r#""([^"]{2,})""#).expect("valid regex"))
}

fn proper_nouns() -> &'static Regex {
    PROPER.get_or_init(|| Regex::new(r"\b[A-Z][\w-]*(?:\s+[A-Z][\w-]*)+").expect("valid regex"))
}

fn numbering() -> &'static Regex {
    NUMBERING.get_or_init(|| Regex::new(r#"^\s*(?:\d+[.)]|[-*•])\s*"#).expect("valid regex"))
}

/// Generates, scores and selects candidate search queries
pub struct SearchStrategySelector {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    config: StrategyConfig,
}

impl SearchStrategySelector {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy, config: StrategyConfig) -> Self {
        Self { llm, retry, config }
    }

    /// Pick the final query. Never fails: without the model, heuristic
    /// candidates fill every slot.
    pub async fn select(&self, query: &str, analysis: &QueryAnalysis) -> FinalQuery {
        let wanted = self.config.candidates.max(1);

        let llm_candidates = match self.llm_candidates(query, analysis, wanted).await {
            Ok(list) => list,
            Err(e) => {
                warn!(query = %query, error = %e, "Candidate generation failed, using heuristics only");
                Vec::new()
            }
        };
        let heuristic = heuristic_candidates(query, analysis);

        let texts = merge_candidates(llm_candidates, heuristic, query, wanted);
        let scorer = Bm25Scorer::new(
            query,
            &texts.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
            analysis.time_sensitive,
        );

        let candidates: Vec<CandidateQuery> = texts
            .into_iter()
            .map(|(text, origin)| CandidateQuery {
                score: scorer.score(&text),
                text,
                origin,
            })
            .collect();

        // Strictly greater keeps the earliest candidate on ties
        let mut best = 0;
        for (i, candidate) in candidates.iter().enumerate() {
            if candidate.score > candidates[best].score {
                best = i;
            }
        }
        let chosen = &candidates[best];

        info!(
            query = %query,
            selected = %chosen.text,
            origin = ?chosen.origin,
            score = chosen.score,
            "Search strategy selected"
        );

        FinalQuery {
            text: chosen.text.clone(),
            origin: chosen.origin,
            score: chosen.score,
            candidates,
        }
    }

    async fn llm_candidates(
        &self,
        query: &str,
        analysis: &QueryAnalysis,
        wanted: usize,
    ) -> researchforge_common::Result<Vec<String>> {
        if !analysis.suggested_queries.is_empty() {
            debug!(query = %query, "Seeding candidates from analysis");
            return Ok(analysis.suggested_queries.clone());
        }

        let mut prompt = format!(
            "Generate {} different search engine queries for the research question: {}",
            wanted, query
        );
        if !analysis.components.is_empty() {
            prompt.push_str(&format!("\nKey components: {}", analysis.components.join(", ")));
        }
        if analysis.time_sensitive {
            prompt.push_str("\nThe question is time-sensitive; prefer recent coverage.");
        }

        let request = CompletionRequest::prompt(SYSTEM_PROMPT, prompt).with_temperature(0.4);
        let request = &request;
        self.retry
            .run("candidate generation", || async move {
                let reply = self.llm.complete(request).await?;
                let parsed = parse_candidate_list(&reply);
                if parsed.is_empty() {
                    Err(researchforge_common::AppError::analysis("no candidates in model reply"))
                } else {
                    Ok(parsed)
                }
            })
            .await
    }
}

/// Accept either a JSON array or one query per line
fn parse_candidate_list(reply: &str) -> Vec<String> {
    if let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) {
        if end > start {
            if let Ok(list) = serde_json::from_str::<Vec<String>>(&reply[start..=end]) {
                return list
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
    }

    reply
        .lines()
        .map(|line| numbering().replace(line, "").trim().trim_matches('"').trim().to_string())
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .collect()
}

/// Candidates derived from the query text and analysis alone
fn heuristic_candidates(query: &str, analysis: &QueryAnalysis) -> Vec<String> {
    let mut out = Vec::new();
    let terms: Vec<String> = tokenize(query).into_iter().filter(|t| !is_generic(t)).collect();
    let core = terms.join(" ");

    if let Some(phrase) = quoted().captures(query).and_then(|c| c.get(1)) {
        let rest: Vec<&str> = terms
            .iter()
            .map(String::as_str)
            .filter(|t| !phrase.as_str().to_lowercase().contains(*t))
            .collect();
        out.push(format!("\"{}\" {}", phrase.as_str(), rest.join(" ")).trim().to_string());
    }

    for entity in proper_nouns().find_iter(query) {
        out.push(format!("\"{}\" {}", entity.as_str(), core).trim().to_string());
    }

    if !core.is_empty() {
        if analysis.time_sensitive {
            out.push(format!("{} latest", core));
        }
        out.push(core.clone());
    }

    if let Some(component) = analysis.components.first() {
        if !core.contains(&component.to_lowercase()) {
            out.push(format!("{} {}", component, core).trim().to_string());
        }
    }

    out
}

/// Key used to spot near-identical candidates
fn dedup_key(text: &str) -> String {
    let mut terms: Vec<String> = tokenize(text).into_iter().filter(|t| !is_generic(t)).collect();
    if terms.is_empty() {
        terms = tokenize(text);
    }
    if terms.is_empty() {
        return text.trim().to_lowercase();
    }
    terms.sort();
    terms.dedup();
    terms.join(" ")
}

/// Keep LLM candidates first, reserve room for the heuristic generator, and
/// pad with query variants until exactly `wanted` distinct entries exist
fn merge_candidates(
    llm: Vec<String>,
    heuristic: Vec<String>,
    query: &str,
    wanted: usize,
) -> Vec<(String, CandidateOrigin)> {
    let mut seen = HashSet::new();
    let mut out: Vec<(String, CandidateOrigin)> = Vec::with_capacity(wanted);
    let llm_slots = if heuristic.is_empty() || wanted == 1 { wanted } else { wanted - 1 };

    let mut push = |text: String, origin: CandidateOrigin, limit: usize, out: &mut Vec<_>| {
        if out.len() < limit && seen.insert(dedup_key(&text)) {
            out.push((text, origin));
        }
    };

    for text in llm {
        push(text, CandidateOrigin::Llm, llm_slots, &mut out);
    }
    for text in heuristic {
        push(text, CandidateOrigin::Heuristic, wanted, &mut out);
    }

    let year = Utc::now().year();
    let fillers = [
        query.trim().to_string(),
        format!("{} {}", query.trim(), year),
        format!("{} explained", query.trim()),
        format!("{} analysis", query.trim()),
        format!("{} research", query.trim()),
        format!("{} sources", query.trim()),
    ];
    for text in fillers {
        push(text, CandidateOrigin::Heuristic, wanted, &mut out);
    }

    // Queries already made of filler words collapse above; numbered
    // variants always carry a fresh term
    let mut n = 2;
    while out.len() < wanted {
        push(format!("{} {}", query.trim(), n), CandidateOrigin::Heuristic, wanted, &mut out);
        n += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use researchforge_common::llm::MockLanguageModel;
    use researchforge_common::models::Intent;

    fn selector(llm: MockLanguageModel) -> SearchStrategySelector {
        SearchStrategySelector::new(Arc::new(llm), RetryPolicy::none(), StrategyConfig::default())
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_heuristics() {
        let selector = selector(MockLanguageModel::unavailable());
        let final_query = selector
            .select("rust async runtime comparison", &QueryAnalysis::degraded())
            .await;

        assert_eq!(final_query.candidates.len(), 3);
        assert!(final_query
            .candidates
            .iter()
            .all(|c| c.origin == CandidateOrigin::Heuristic));
        assert!(!final_query.text.is_empty());
    }

    #[tokio::test]
    async fn test_filler_word_query_still_gets_three_candidates() {
        let selector = selector(MockLanguageModel::unavailable());
        let final_query = selector
            .select("research analysis explained sources", &QueryAnalysis::degraded())
            .await;

        assert_eq!(final_query.candidates.len(), 3);
        let keys: HashSet<String> = final_query.candidates.iter().map(|c| dedup_key(&c.text)).collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_merge_pads_past_colliding_fillers() {
        let merged = merge_candidates(Vec::new(), Vec::new(), "analysis", 5);
        assert_eq!(merged.len(), 5);
    }

    #[tokio::test]
    async fn test_exactly_three_candidates_with_llm() {
        let llm = MockLanguageModel::new().on(
            "search engine queries",
            r#"["tokio vs async-std benchmarks", "Tokio vs async-std benchmarks", "rust async runtimes 2024"]"#,
        );
        let final_query = selector(llm)
            .select("compare rust async runtimes", &QueryAnalysis::degraded())
            .await;

        assert_eq!(final_query.candidates.len(), 3);
        let keys: HashSet<String> = final_query.candidates.iter().map(|c| dedup_key(&c.text)).collect();
        assert_eq!(keys.len(), 3);
        assert!(final_query
            .candidates
            .iter()
            .any(|c| c.origin == CandidateOrigin::Heuristic));
    }

    #[tokio::test]
    async fn test_suggested_queries_skip_model() {
        let llm = Arc::new(MockLanguageModel::unavailable());
        let selector = SearchStrategySelector::new(llm.clone(), RetryPolicy::none(), StrategyConfig::default());
        let analysis = QueryAnalysis {
            intent: Intent::News,
            time_sensitive: true,
            suggested_queries: vec!["fusion energy breakthrough latest news".into()],
            ..Default::default()
        };

        let final_query = selector.select("fusion energy breakthroughs", &analysis).await;
        assert_eq!(llm.call_count(), 0);
        assert_eq!(final_query.origin, CandidateOrigin::Llm);
        assert_eq!(final_query.text, "fusion energy breakthrough latest news");
    }

    #[test]
    fn test_merge_drops_near_duplicates() {
        let merged = merge_candidates(
            vec!["fusion energy".into()],
            vec!["energy fusion".into(), "fusion power plants".into()],
            "fusion energy",
            3,
        );
        assert_eq!(merged[0].1, CandidateOrigin::Llm);
        // "energy fusion" is a near-duplicate of the LLM candidate
        assert!(merged.iter().all(|(t, _)| t != "energy fusion"));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_parse_numbered_lines() {
        let parsed = parse_candidate_list("Here are queries:\n1. \"rust ownership\"\n2) borrow checker rules\n- lifetimes");
        assert_eq!(parsed, vec!["rust ownership", "borrow checker rules", "lifetimes"]);
    }

    #[test]
    fn test_heuristics_keep_quoted_phrase() {
        let out = heuristic_candidates("history of \"Rust language\" adoption", &QueryAnalysis::degraded());
        assert!(out[0].starts_with("\"Rust language\""));
        assert!(out[0].contains("adoption"));
    }
}
