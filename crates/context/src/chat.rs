//! Chat Engine - Session-scoped conversation over the research tools
//!
//! Provides:
//! - Per-session history kept in the cache
//! - Wording-based tool routing (scrape, research, news, web search)
//! - Tool results folded into the model prompt
//! - History compaction: older turns are summarized once the transcript
//!   outgrows its token budget

use async_trait::async_trait;
use regex_lite::Regex;
use researchforge_common::cache::{keys, Cache};
use researchforge_common::llm::{ChatMessage, CompletionRequest, LanguageModel, Role};
use researchforge_common::models::api::{
    ChatResponse, NewsResponse, ResearchResponse, ResponseStatus, ScrapeResponse, SearchResponse,
};
use researchforge_common::models::ResearchDepth;
use researchforge_common::CHARS_PER_TOKEN;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Messages kept verbatim when older history is summarized
pub const RECENT_MESSAGES: usize = 6;

/// Reply used when the model cannot answer
pub const ERROR_REPLY: &str = "I encountered an error while processing your request. Please try again.";

const SYSTEM_PROMPT: &str = "You are an intelligent research assistant that helps users find information and answer questions.\n\
You have access to several tools:\n\
1. Web search to find current information\n\
2. News aggregation to find recent news articles\n\
3. Webpage scraping to extract detailed content from specific URLs\n\
4. Research capabilities to perform comprehensive investigation on topics\n\n\
Maintain continuity with previous exchanges. If the user refers to previous information, use it in your response.\n\
Be concise but thorough. Provide specific information rather than general statements when possible.\n\
When tool results are provided, summarize the key points and integrate them into your response naturally.\n\
If you used a tool to answer the query, mention which tool was used and briefly explain why it was chosen.";

const SUMMARY_PROMPT: &str =
    "Summarize the following conversation history concisely while preserving key information, questions, and conclusions:";

/// News look-back phrases, checked in order
const TIME_SCOPES: &[(&str, u32)] = &[
    ("today", 1),
    ("yesterday", 2),
    ("last 24 hours", 1),
    ("this week", 7),
    ("last week", 14),
    ("this month", 30),
    ("recent", 30),
];

/// Tool chosen for one chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRoute {
    Scrape { url: String },
    Research { depth: ResearchDepth },
    News { days_back: u32, max_results: usize },
    Search,
}

impl ChatRoute {
    pub fn tool_name(&self) -> &'static str {
        match self {
            ChatRoute::Scrape { .. } => "scrape_webpage",
            ChatRoute::Research { .. } => "research",
            ChatRoute::News { .. } => "news",
            ChatRoute::Search => "web_search",
        }
    }
}

static URL: OnceLock<Regex> = OnceLock::new();

fn url_pattern() -> &'static Regex {
    URL.get_or_init(|| Regex::new(r"https?://[^\s]+").expect("valid regex"))
}

fn mentions(lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| lower.contains(w))
}

/// Pick the tool for a message from its wording
pub fn route(message: &str) -> ChatRoute {
    let lower = message.to_lowercase();

    if let Some(found) = url_pattern().find(message) {
        if mentions(&lower, &["read", "extract", "scrape"]) {
            let url = found.as_str().trim_end_matches(['.', ',', ';', ')', '!', '?']);
            return ChatRoute::Scrape { url: url.to_string() };
        }
    }

    if mentions(&lower, &["research", "investigate", "comprehensive", "analyze", "study"]) {
        let depth = if mentions(&lower, &["detailed", "deep", "comprehensive", "thorough"]) {
            ResearchDepth::Deep
        } else if mentions(&lower, &["quick", "brief", "summary", "short"]) {
            ResearchDepth::Quick
        } else {
            ResearchDepth::Standard
        };
        return ChatRoute::Research { depth };
    }

    if mentions(&lower, &["news", "latest", "recent", "update"]) {
        let days_back = TIME_SCOPES
            .iter()
            .find(|(phrase, _)| lower.contains(phrase))
            .map_or(7, |(_, days)| *days);
        return ChatRoute::News {
            days_back,
            max_results: 10,
        };
    }

    ChatRoute::Search
}

/// Operations the chat engine can call
#[async_trait]
pub trait ChatTools: Send + Sync {
    async fn research_tool(&self, query: &str, depth: ResearchDepth, user_id: &str) -> ResearchResponse;

    async fn news_tool(&self, query: &str, days_back: u32, max_results: usize, user_id: &str) -> NewsResponse;

    async fn search_tool(&self, query: &str, user_id: &str) -> SearchResponse;

    async fn scrape_tool(&self, url: &str, user_id: &str) -> ScrapeResponse;
}

fn clip(text: &str, max_chars: usize) -> String {
    let clipped: String = text.chars().take(max_chars).collect();
    if clipped.len() < text.len() {
        format!("{}...", clipped)
    } else {
        clipped
    }
}

fn format_research(response: &ResearchResponse) -> String {
    let Some(result) = response.result.as_ref().filter(|_| response.status == ResponseStatus::Success) else {
        return format!(
            "RESEARCH RESULTS:\nThe research tool failed: {}",
            response.message.as_deref().unwrap_or("unknown error")
        );
    };
    let sources: Vec<String> = result
        .sources
        .iter()
        .take(5)
        .map(|s| format!("- {}: {}", s.name, s.url))
        .collect();
    format!(
        "RESEARCH RESULTS:\nAnswer: {}\n\nTop Sources:\n{}",
        result.answer,
        sources.join("\n")
    )
}

fn format_news(response: &NewsResponse) -> String {
    if response.status != ResponseStatus::Success {
        return format!(
            "NEWS RESULTS:\nNo articles: {}",
            response.message.as_deref().unwrap_or("unknown error")
        );
    }
    let articles: Vec<String> = response
        .articles
        .iter()
        .take(5)
        .map(|a| {
            format!(
                "- {}: {} ({})",
                a.title.as_deref().unwrap_or("Untitled"),
                a.source.as_deref().unwrap_or("Unknown Source"),
                a.date.as_deref().unwrap_or("No date")
            )
        })
        .collect();
    format!("NEWS RESULTS:\nTop Articles:\n{}", articles.join("\n"))
}

fn format_search(response: &SearchResponse) -> String {
    if response.is_error() {
        return format!(
            "SEARCH RESULTS:\nThe search failed: {}",
            response.message.as_deref().unwrap_or("unknown error")
        );
    }
    let results: Vec<String> = response
        .contexts
        .iter()
        .flatten()
        .take(5)
        .map(|c| {
            format!(
                "- {}: {}",
                c.name.as_deref().unwrap_or("Untitled"),
                clip(c.snippet.as_deref().unwrap_or("No snippet"), 150)
            )
        })
        .collect();
    format!("SEARCH RESULTS:\nTop Results:\n{}", results.join("\n"))
}

fn format_scrape(response: &ScrapeResponse) -> String {
    if response.status != ResponseStatus::Success {
        return format!(
            "WEBPAGE CONTENT:\nThe page could not be read: {}",
            response.message.as_deref().unwrap_or("unknown error")
        );
    }
    let metadata = response.metadata.clone().unwrap_or_default();
    format!(
        "WEBPAGE CONTENT:\nTitle: {}\nURL: {}\n\nSummary:\n{}",
        metadata.title.as_deref().unwrap_or("Untitled Page"),
        metadata.url.as_deref().unwrap_or("No URL"),
        clip(
            response.summarized_content.as_deref().unwrap_or("No content extracted."),
            500
        )
    )
}

/// Rough token count at [`CHARS_PER_TOKEN`] characters per token
pub fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.content.chars().count()).sum::<usize>() / CHARS_PER_TOKEN
}

/// Conversational front end over [`ChatTools`]
pub struct ChatEngine {
    llm: Arc<dyn LanguageModel>,
    cache: Cache,
    max_tokens: usize,
    history_ttl: Duration,
}

impl ChatEngine {
    pub fn new(llm: Arc<dyn LanguageModel>, cache: Cache, max_tokens: usize, history_ttl: Duration) -> Self {
        Self {
            llm,
            cache,
            max_tokens,
            history_ttl,
        }
    }

    /// Stored history for a session; empty when unknown
    pub async fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.cache
            .lookup(&keys::chat_history(session_id))
            .await
            .unwrap_or_default()
    }

    /// Answer one message. Never fails: model errors become [`ERROR_REPLY`].
    pub async fn respond(
        &self,
        tools: &dyn ChatTools,
        message: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> ChatResponse {
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let history = self.history(&session_id).await;

        let route = route(message);
        info!(session_id = %session_id, tool = route.tool_name(), "Chat tool selected");
        let tool_context = match &route {
            ChatRoute::Scrape { url } => format_scrape(&tools.scrape_tool(url, user_id).await),
            ChatRoute::Research { depth } => format_research(&tools.research_tool(message, *depth, user_id).await),
            ChatRoute::News {
                days_back,
                max_results,
            } => format_news(&tools.news_tool(message, *days_back, *max_results, user_id).await),
            ChatRoute::Search => format_search(&tools.search_tool(message, user_id).await),
        };

        let mut messages = vec![ChatMessage::system(format!(
            "{}\n\nFor the current query, the '{}' tool was used to gather information.",
            SYSTEM_PROMPT,
            route.tool_name()
        ))];
        if estimate_tokens(&history) <= self.max_tokens {
            messages.extend(history.iter().cloned());
        } else {
            let skip = history.len().saturating_sub(RECENT_MESSAGES);
            messages.extend(history[skip..].iter().cloned());
        }
        messages.push(ChatMessage::user(format!(
            "{}\n\n---\nTool Results:\n{}\n---",
            message, tool_context
        )));

        let request = CompletionRequest {
            messages,
            temperature: Some(0.7),
            max_tokens: Some(1500),
        };
        let reply = match self.llm.complete(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Chat completion failed");
                ERROR_REPLY.to_string()
            }
        };

        let mut history = history;
        history.push(ChatMessage::user(message));
        history.push(ChatMessage::assistant(reply.clone()));
        let history = self.compact(history).await;
        self.cache
            .store(&keys::chat_history(&session_id), &history, self.history_ttl)
            .await;

        ChatResponse {
            response: reply,
            session_id,
        }
    }

    /// Replace all but the most recent messages with one summary message
    /// once the history outgrows the token budget
    async fn compact(&self, history: Vec<ChatMessage>) -> Vec<ChatMessage> {
        if estimate_tokens(&history) <= self.max_tokens || history.len() <= RECENT_MESSAGES {
            return history;
        }

        let split = history.len() - RECENT_MESSAGES;
        let transcript: Vec<String> = history[..split]
            .iter()
            .map(|m| match m.role {
                Role::User => format!("User: {}", m.content),
                Role::Assistant => format!("Assistant: {}", m.content),
                Role::System => m.content.clone(),
            })
            .collect();

        let request = CompletionRequest::prompt(SUMMARY_PROMPT, transcript.join("\n"));
        let summary = match self.llm.complete(&request).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "History summarization failed");
                "User and assistant discussed various topics.".to_string()
            }
        };

        let mut compacted = Vec::with_capacity(RECENT_MESSAGES + 1);
        compacted.push(ChatMessage::system(format!("Previous conversation summary: {}", summary)));
        compacted.extend(history.into_iter().skip(split));
        compacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use researchforge_common::llm::MockLanguageModel;
    use researchforge_common::models::api::{PageMetadata, SearchContext};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingTools {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTools for RecordingTools {
        async fn research_tool(&self, _query: &str, depth: ResearchDepth, _user_id: &str) -> ResearchResponse {
            self.calls.lock().unwrap().push(format!("research:{}", depth));
            ResearchResponse::error("offline")
        }

        async fn news_tool(&self, _query: &str, days_back: u32, _max: usize, _user_id: &str) -> NewsResponse {
            self.calls.lock().unwrap().push(format!("news:{}", days_back));
            NewsResponse::error("offline")
        }

        async fn search_tool(&self, _query: &str, _user_id: &str) -> SearchResponse {
            self.calls.lock().unwrap().push("search".into());
            SearchResponse {
                contexts: Some(vec![SearchContext {
                    name: Some("Rust Book".into()),
                    url: "https://doc.rust-lang.org/book".into(),
                    snippet: Some("The Rust Programming Language".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }
        }

        async fn scrape_tool(&self, url: &str, _user_id: &str) -> ScrapeResponse {
            self.calls.lock().unwrap().push(format!("scrape:{}", url));
            ScrapeResponse {
                status: ResponseStatus::Success,
                metadata: Some(PageMetadata {
                    title: Some("Page".into()),
                    url: Some(url.into()),
                    description: None,
                }),
                summarized_content: Some("Summary".into()),
                raw_content: None,
                message: None,
            }
        }
    }

    #[test]
    fn test_routing_rules() {
        assert_eq!(
            route("Please read https://example.com/post."),
            ChatRoute::Scrape {
                url: "https://example.com/post".into()
            }
        );
        assert_eq!(
            route("Give me a comprehensive analysis of fusion"),
            ChatRoute::Research {
                depth: ResearchDepth::Deep
            }
        );
        assert_eq!(
            route("quick research on tokio"),
            ChatRoute::Research {
                depth: ResearchDepth::Quick
            }
        );
        assert_eq!(
            route("latest news from this week"),
            ChatRoute::News {
                days_back: 7,
                max_results: 10
            }
        );
        assert_eq!(
            route("what happened today in the news"),
            ChatRoute::News {
                days_back: 1,
                max_results: 10
            }
        );
        assert_eq!(route("who wrote the rust book"), ChatRoute::Search);
        // A URL without read wording is a plain search
        assert_eq!(route("https://example.com is it safe"), ChatRoute::Search);
    }

    #[tokio::test]
    async fn test_session_history_persists() {
        let llm = Arc::new(MockLanguageModel::new().with_default("Here is what I found."));
        let engine = ChatEngine::new(llm.clone(), Cache::in_memory(), 4000, Duration::from_secs(60));
        let tools = RecordingTools::default();

        let first = engine.respond(&tools, "who wrote the rust book", "u1", None).await;
        assert_eq!(first.response, "Here is what I found.");
        assert!(!first.session_id.is_empty());

        let second = engine
            .respond(&tools, "and when", "u1", Some(&first.session_id))
            .await;
        assert_eq!(second.session_id, first.session_id);

        let history = engine.history(&first.session_id).await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "who wrote the rust book");
        // The second prompt carries the first exchange
        assert!(llm.prompts()[1].contains("Here is what I found."));
        assert!(llm.prompts()[0].contains("SEARCH RESULTS:"));
        assert_eq!(tools.calls(), vec!["search", "search"]);
    }

    #[tokio::test]
    async fn test_model_failure_yields_apology() {
        let engine = ChatEngine::new(
            Arc::new(MockLanguageModel::unavailable()),
            Cache::in_memory(),
            4000,
            Duration::from_secs(60),
        );
        let tools = RecordingTools::default();
        let reply = engine.respond(&tools, "latest news today", "u1", Some("s1")).await;
        assert_eq!(reply.response, ERROR_REPLY);
        assert_eq!(reply.session_id, "s1");
        assert_eq!(tools.calls(), vec!["news:1"]);
    }

    #[tokio::test]
    async fn test_long_history_is_summarized() {
        let llm = Arc::new(
            MockLanguageModel::new()
                .on("Summarize the following conversation", "They discussed Rust.")
                .with_default("ok"),
        );
        let engine = ChatEngine::new(llm, Cache::in_memory(), 50, Duration::from_secs(60));
        let tools = RecordingTools::default();

        let long = "word ".repeat(40);
        for _ in 0..4 {
            engine.respond(&tools, &long, "u1", Some("s2")).await;
        }

        let history = engine.history("s2").await;
        assert_eq!(history.len(), RECENT_MESSAGES + 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, "Previous conversation summary: They discussed Rust.");
    }
}
