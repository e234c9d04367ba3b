//! ResearchForge Common Library
//!
//! Shared code for all ResearchForge crates including:
//! - Research pipeline data model and response envelopes
//! - Error types and handling
//! - Configuration management
//! - Result cache (Redis or in-memory)
//! - Retry policy for external calls
//! - Language model client abstraction
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod resilience;

// Re-export commonly used types
pub use cache::Cache;
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use llm::LanguageModel;
pub use resilience::RetryPolicy;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Approximate characters per token, used for budgeting prompts
pub const CHARS_PER_TOKEN: usize = 4;
