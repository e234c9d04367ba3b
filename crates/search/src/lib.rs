//! ResearchForge Retrieval
//!
//! Everything that talks to the outside web:
//! - Serper web search and SerpApi news providers
//! - Polite page fetching (robots.txt, per-host spacing, user-agent rotation)
//! - HTML extraction into structured text and markdown
//! - Chunked scrape summarization
//! - Test doubles for all of the above

pub mod extractor;
pub mod fetcher;
pub mod mock;
pub mod providers;
pub mod summarize;

pub use extractor::ContentExtractor;
pub use fetcher::{HttpPageFetcher, PageFetcher};
pub use providers::{
    NewsBatch, NewsProvider, NewsQuery, SearchProvider, SerpApiNewsProvider, SerperSearchProvider,
};
pub use summarize::ScrapeSummarizer;
