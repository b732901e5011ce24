//! Built-in intelligence providers
//!
//! Data providers pull observed facts from Yahoo Finance.
//! Inference providers ask the LLM for an opinion and score its answer.

use super::IntelligenceRegistry;
use crate::gemini::TextGenerator;
use crate::Result;
use std::sync::Arc;

pub mod llm;
pub mod yahoo;

pub use llm::{AnalystProfile, LlmProvider};
pub use yahoo::{EarningsProvider, NewsScraperProvider, YahooFinanceClient};

/// Names of every built-in provider, in default registration order
pub const BUILTIN_PROVIDERS: &[&str] = &[
    "earnings",
    "news_scraper",
    "sentiment",
    "macro",
    "sector",
    "technical",
    "news",
];

/// Providers that need no LLM
pub const DATA_PROVIDERS: &[&str] = &["earnings", "news_scraper"];

/// Registry holding every built-in provider.
///
/// The orchestrator narrows it to `enabled_providers` at construction.
pub fn default_registry(llm: Arc<dyn TextGenerator>) -> Result<IntelligenceRegistry> {
    let mut registry = IntelligenceRegistry::new();
    let yahoo = YahooFinanceClient::new();

    registry.register(Arc::new(EarningsProvider::new(yahoo.clone())))?;
    registry.register(Arc::new(NewsScraperProvider::new(yahoo, 10)))?;

    for profile in llm::ANALYST_PROFILES {
        registry.register(Arc::new(LlmProvider::new(profile.clone(), llm.clone())))?;
    }

    Ok(registry)
}

/// Balance of bullish over bearish keywords in `text`, in [-1, 1].
///
/// Each keyword counts once regardless of repetitions.
pub fn keyword_balance(text: &str, bullish: &[&str], bearish: &[&str]) -> f64 {
    let lowered = text.to_lowercase();

    let up = bullish.iter().filter(|w| lowered.contains(**w)).count() as f64;
    let down = bearish.iter().filter(|w| lowered.contains(**w)).count() as f64;

    let total = up + down;
    if total == 0.0 {
        return 0.0;
    }

    (up - down) / total
}

/// Truncate on a char boundary, appending an ellipsis when cut
pub(crate) fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
