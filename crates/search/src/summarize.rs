//! Chunked page summarization for the scrape operation

use futures::future::join_all;
use researchforge_common::errors::{AppError, Result};
use researchforge_common::llm::{CompletionRequest, LanguageModel};
use researchforge_common::CHARS_PER_TOKEN;
use std::sync::Arc;
use tracing::{info, warn};

const SUMMARY_TEMPERATURE: f32 = 0.2;

/// Split markdown into chunks of roughly `chunk_tokens` tokens, preferring
/// paragraph boundaries. Whitespace-only input yields no chunks.
pub fn chunk_markdown(markdown: &str, chunk_tokens: usize) -> Vec<String> {
    let limit = chunk_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in markdown.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !current.is_empty() && current.chars().count() + paragraph.chars().count() + 2 > limit {
            chunks.push(std::mem::take(&mut current));
        }

        if paragraph.chars().count() > limit {
            // Oversized paragraph: hard split on character boundaries
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Summarizes a page chunk by chunk, then merges the chunk summaries
pub struct ScrapeSummarizer {
    llm: Arc<dyn LanguageModel>,
    chunk_tokens: usize,
}

impl ScrapeSummarizer {
    pub fn new(llm: Arc<dyn LanguageModel>, chunk_tokens: usize) -> Self {
        Self { llm, chunk_tokens }
    }

    /// Summary of `markdown`, focused on `selector_query` when given.
    /// Fails only when no chunk could be summarized.
    pub async fn summarize(&self, url: &str, markdown: &str, selector_query: Option<&str>) -> Result<String> {
        let chunks = chunk_markdown(markdown, self.chunk_tokens);
        if chunks.is_empty() {
            return Err(AppError::Extraction {
                url: url.to_string(),
                message: "no content to summarize".to_string(),
            });
        }

        let mut system = String::from(
            "You are a helpful assistant that extracts and summarizes the content provided in markdown format. \
             Summary should be of appropriate length to encompass most of the content.",
        );
        match selector_query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(focus) => system.push_str(&format!(" Focus on the following aspect: {}.", focus)),
            None => system.push_str(" Summarize the content comprehensively."),
        }

        let total = chunks.len();
        let requests = chunks.iter().enumerate().map(|(i, chunk)| {
            let request = CompletionRequest::prompt(
                system.clone(),
                format!("Content (chunk {} of {}): {}", i + 1, total, chunk),
            )
            .with_temperature(SUMMARY_TEMPERATURE);
            async move { self.llm.complete(&request).await }
        });

        let mut summaries = Vec::with_capacity(total);
        for (i, result) in join_all(requests).await.into_iter().enumerate() {
            match result {
                Ok(summary) if !summary.trim().is_empty() => summaries.push(summary.trim().to_string()),
                Ok(_) => warn!(url, chunk = i + 1, "Empty chunk summary"),
                Err(e) => warn!(url, chunk = i + 1, error = %e, "Chunk summarization failed"),
            }
        }

        match summaries.len() {
            0 => Err(AppError::analysis(format!("every chunk summary failed for {}", url))),
            1 => Ok(summaries.remove(0)),
            _ => Ok(self.aggregate(url, summaries).await),
        }
    }

    async fn aggregate(&self, url: &str, summaries: Vec<String>) -> String {
        let joined = summaries.join("\n\n");
        let request = CompletionRequest::prompt(
            "You are a helpful assistant that aggregates multiple summaries into a final concise summary.",
            format!("Summaries from {}: {}", url, joined),
        )
        .with_temperature(SUMMARY_TEMPERATURE);

        match self.llm.complete(&request).await {
            Ok(merged) if !merged.trim().is_empty() => {
                info!(url, parts = summaries.len(), "Aggregated chunk summaries");
                merged
            }
            Ok(_) => joined,
            Err(e) => {
                warn!(url, error = %e, "Aggregation failed, using joined summaries");
                joined
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use researchforge_common::llm::MockLanguageModel;

    #[test]
    fn test_chunking_respects_limit_and_paragraphs() {
        // 1 token = 4 chars, so a 5-token chunk holds 20 chars
        let markdown = "aaaaaaaa\n\nbbbbbbbb\n\ncccccccc";
        let chunks = chunk_markdown(markdown, 5);
        assert_eq!(chunks, vec!["aaaaaaaa\n\nbbbbbbbb", "cccccccc"]);
    }

    #[test]
    fn test_oversized_paragraph_is_split() {
        let markdown = "x".repeat(45);
        let chunks = chunk_markdown(&markdown, 5);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 20));
    }

    #[test]
    fn test_blank_markdown_has_no_chunks() {
        assert!(chunk_markdown(" \n\n \n", 10).is_empty());
    }

    #[tokio::test]
    async fn test_single_chunk_uses_focus() {
        let llm = Arc::new(MockLanguageModel::new().with_default("A short summary."));
        let summarizer = ScrapeSummarizer::new(llm.clone(), 10_000);

        let summary = summarizer
            .summarize("https://example.com", "Some page text.", Some("pricing"))
            .await
            .unwrap();
        assert_eq!(summary, "A short summary.");
        assert_eq!(llm.call_count(), 1);
        assert!(llm.prompts()[0].contains("Focus on the following aspect: pricing."));
    }

    #[tokio::test]
    async fn test_multi_chunk_aggregates() {
        let llm = Arc::new(
            MockLanguageModel::new()
                .on("aggregates multiple summaries", "Merged summary.")
                .with_default("Chunk summary."),
        );
        let summarizer = ScrapeSummarizer::new(llm.clone(), 5);

        let summary = summarizer
            .summarize("https://example.com", "aaaaaaaa\n\nbbbbbbbb\n\ncccccccc", None)
            .await
            .unwrap();
        assert_eq!(summary, "Merged summary.");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_aggregation_joins_summaries() {
        let llm = Arc::new(
            MockLanguageModel::new()
                .fail_on("aggregates multiple summaries")
                .with_default("Part."),
        );
        let summarizer = ScrapeSummarizer::new(llm, 5);

        let summary = summarizer
            .summarize("https://example.com", "aaaaaaaa\n\nbbbbbbbb\n\ncccccccc", None)
            .await
            .unwrap();
        assert_eq!(summary, "Part.\n\nPart.");
    }

    #[tokio::test]
    async fn test_all_chunks_failing_is_error() {
        let summarizer = ScrapeSummarizer::new(Arc::new(MockLanguageModel::unavailable()), 10_000);
        let err = summarizer
            .summarize("https://example.com", "text", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Analysis { .. }));
    }
}
