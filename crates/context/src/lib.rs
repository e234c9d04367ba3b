//! ResearchForge Research Engine
//!
//! Turns a natural-language question into a sourced answer:
//! - Query understanding (intent, components, ambiguities)
//! - Search strategy selection with BM25 candidate scoring
//! - Five-dimension content scoring
//! - Synthesis with contradiction detection
//! - Deadline-bounded orchestration and a conversational front end

pub mod chat;
pub mod content_analyzer;
pub mod orchestrator;
pub mod query_analyzer;
pub mod service;
pub mod strategy;
pub mod synthesis;

pub use chat::{ChatEngine, ChatRoute, ChatTools};
pub use content_analyzer::ContentAnalyzer;
pub use orchestrator::{PipelineSettings, ResearchOrchestrator, ResearchState};
pub use query_analyzer::QueryAnalyzer;
pub use service::ResearchService;
pub use strategy::SearchStrategySelector;
pub use synthesis::{Synthesis, SynthesisEngine};
