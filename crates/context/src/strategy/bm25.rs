//! BM25-style candidate scoring
//!
//! Each candidate is treated as a tiny document scored against the terms of
//! the original query. There is no IDF: every candidate answers the same
//! query, so only term frequency and length normalization matter.

/// Term frequency saturation
pub const K1: f64 = 1.2;
/// Length normalization
pub const B: f64 = 0.75;

/// Tokens that signal the candidate targets fresh content
pub const TIME_INDICATORS: &[&str] = &["latest", "recent", "current", "today", "updates", "news"];

/// Words too generic to carry a search on their own
const GENERIC: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "of", "in", "on", "at", "to", "for",
    "and", "or", "with", "by", "about", "what", "who", "how", "why", "when", "where", "which",
    "info", "information", "things", "stuff", "thing", "details", "overview", "it", "this", "that",
];

/// Lowercase alphanumeric terms
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// True for words that carry no search intent
pub fn is_generic(term: &str) -> bool {
    GENERIC.contains(&term)
}

/// Scores candidates against one original query
#[derive(Debug, Clone)]
pub struct Bm25Scorer {
    query_terms: Vec<String>,
    avg_len: f64,
    recency_weight: f64,
}

impl Bm25Scorer {
    /// `candidates` fixes the average length; recency counts double for
    /// time-sensitive queries
    pub fn new<S: AsRef<str>>(query: &str, candidates: &[S], time_sensitive: bool) -> Self {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let total: usize = candidates.iter().map(|c| tokenize(c.as_ref()).len()).sum();
        let avg_len = if candidates.is_empty() {
            1.0
        } else {
            (total as f64 / candidates.len() as f64).max(1.0)
        };

        Self {
            query_terms,
            avg_len,
            recency_weight: if time_sensitive { 2.0 } else { 0.5 },
        }
    }

    /// Term overlap with the original query
    pub fn overlap(&self, candidate: &str) -> f64 {
        let terms = tokenize(candidate);
        let len = terms.len() as f64;
        let norm = 1.0 - B + B * (len / self.avg_len);

        self.query_terms
            .iter()
            .map(|term| {
                let tf = terms.iter().filter(|t| *t == term).count() as f64;
                if tf == 0.0 {
                    0.0
                } else {
                    (tf * (K1 + 1.0)) / (tf + K1 * norm)
                }
            })
            .sum()
    }

    /// Count of recency indicators present in the candidate
    pub fn recency(&self, candidate: &str) -> f64 {
        let terms = tokenize(candidate);
        TIME_INDICATORS
            .iter()
            .filter(|ind| terms.iter().any(|t| t == *ind))
            .count() as f64
    }

    /// Phrasing quality: quoted phrases earn a bonus; very short, very long
    /// or mostly generic candidates are penalized
    pub fn phrasing(&self, candidate: &str) -> f64 {
        let terms = tokenize(candidate);
        let specific = terms.iter().filter(|t| !is_generic(t)).count();
        let mut score = 0.0;

        if candidate.contains('"') {
            score += 2.0;
        }
        if specific == 0 {
            score -= 3.0;
        } else if terms.len() < 2 {
            score -= 1.5;
        } else if specific * 2 < terms.len() {
            score -= 1.0;
        }
        if terms.len() > 12 {
            score -= 0.5 * (terms.len() - 12) as f64;
        }
        score
    }

    /// Weighted total of the three signals
    pub fn score(&self, candidate: &str) -> f64 {
        self.overlap(candidate) + self.recency_weight * self.recency(candidate) + self.phrasing(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_rewards_shared_terms() {
        let candidates = ["rust async runtime", "cooking pasta recipes"];
        let scorer = Bm25Scorer::new("rust async runtime comparison", &candidates, false);
        assert!(scorer.overlap("rust async runtime") > scorer.overlap("cooking pasta recipes"));
        assert_eq!(scorer.overlap("cooking pasta recipes"), 0.0);
    }

    #[test]
    fn test_recency_weighted_up_when_time_sensitive() {
        let candidates = ["fusion latest news", "fusion energy overview"];
        let calm = Bm25Scorer::new("fusion energy", &candidates, false);
        let urgent = Bm25Scorer::new("fusion energy", &candidates, true);

        assert_eq!(calm.recency("fusion latest news"), 2.0);
        let gap_calm = calm.score("fusion latest news") - calm.overlap("fusion latest news");
        let gap_urgent = urgent.score("fusion latest news") - urgent.overlap("fusion latest news");
        assert!(gap_urgent > gap_calm);
    }

    #[test]
    fn test_phrasing_penalizes_short_and_generic() {
        let scorer = Bm25Scorer::new("tokamak plasma", &["x"], false);
        assert!(scorer.phrasing("tokamak") < scorer.phrasing("tokamak plasma stability"));
        assert!(scorer.phrasing("what is the information") < scorer.phrasing("tokamak plasma"));
        assert!(scorer.phrasing("\"tokamak plasma\" record") > scorer.phrasing("tokamak plasma record"));
    }

    #[test]
    fn test_repeated_query_terms_count_once() {
        let candidates = ["plasma in the tokamak"];
        let repeated = Bm25Scorer::new("the plasma and the tokamak", &candidates, false);
        let single = Bm25Scorer::new("the plasma and tokamak", &candidates, false);
        assert_eq!(repeated.overlap(candidates[0]), single.overlap(candidates[0]));
    }
}
