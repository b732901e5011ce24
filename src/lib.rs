//! Trading Cycle Orchestrator
//!
//! Drives securities through a multi-stage decision pipeline:
//! - Fans out to independent intelligence providers under per-provider timeouts
//! - Folds their opinions into one confidence-weighted risk adjustment
//! - Runs thesis, quant, risk and order capabilities in sequence
//! - Retries from the thesis stage when risk rejects, with the reason fed back
//! - Archives every terminal cycle with an integrity hash
//!
//! CYCLE:
//! GATHER → THESIS → QUANT → RISK → (REJECT → THESIS)? → ORDER → COMPLETE

pub mod agent;
pub mod api;
pub mod audit;
pub mod capabilities;
pub mod config;
pub mod cycle;
pub mod error;
pub mod gemini;
pub mod intelligence;
pub mod market;
pub mod models;
pub mod risk;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use config::OrchestratorConfig;
pub use cycle::{CycleSnapshot, TradingCycle};
pub use intelligence::{IntelligenceAggregator, IntelligenceProvider, IntelligenceRegistry};
pub use market::{MarketDataSource, MarketSnapshot};
pub use models::*;
