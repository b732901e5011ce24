//! Orchestrator configuration
//!
//! Built once at startup and shared read-only with every cycle.

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::error::OrchestrationError;
use crate::models::{Security, TradingTask};
use crate::Result;
use std::collections::HashSet;
use std::env;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub securities: Vec<Security>,
    /// Risk rejections tolerated before a cycle ends REJECTED
    pub max_retries: u32,
    /// Providers to run, in order. `None` selects every registered provider.
    pub enabled_providers: Option<Vec<String>>,
    pub provider_timeout: Duration,
    pub task: TradingTask,
    pub llm_model: String,
    pub gemini_api_key: Option<String>,
    pub api_port: u16,
    /// Terminal cycles kept in the audit log before the oldest are dropped
    pub audit_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            securities: vec![Security::new("SPY")],
            max_retries: DEFAULT_MAX_RETRIES,
            enabled_providers: None,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            task: TradingTask::default(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            gemini_api_key: None,
            api_port: DEFAULT_API_PORT,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    /// Load from the process environment (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Used by `from_env` and tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("HEDGE_SECURITIES") {
            config.securities = split_list(&raw).iter().map(Security::new).collect();
        }

        if let Some(raw) = lookup("HEDGE_MAX_RETRIES") {
            config.max_retries = parse_max_retries(&raw)?;
        }

        if let Some(raw) = lookup("HEDGE_PROVIDERS") {
            let names = split_list(&raw);
            config.enabled_providers = if names.is_empty() { None } else { Some(names) };
        }

        if let Some(raw) = lookup("HEDGE_PROVIDER_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                OrchestrationError::Configuration(format!(
                    "HEDGE_PROVIDER_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                    raw
                ))
            })?;
            config.provider_timeout = Duration::from_secs(secs);
        }

        if let Some(task) = lookup("HEDGE_TASK").filter(|t| !t.trim().is_empty()) {
            config.task = TradingTask::new(task);
        }

        if let Some(model) = lookup("HEDGE_LLM_MODEL").filter(|m| !m.trim().is_empty()) {
            config.llm_model = model;
        }

        config.gemini_api_key = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty());

        if let Some(raw) = lookup("PORT").or_else(|| lookup("API_PORT")) {
            config.api_port = raw.trim().parse().map_err(|_| {
                OrchestrationError::Configuration(format!("Invalid port '{}'", raw))
            })?;
        }

        if let Some(raw) = lookup("HEDGE_AUDIT_CAPACITY") {
            config.audit_capacity = raw.trim().parse().map_err(|_| {
                OrchestrationError::Configuration(format!(
                    "HEDGE_AUDIT_CAPACITY must be a positive integer, got '{}'",
                    raw
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.securities.is_empty() {
            return Err(OrchestrationError::Configuration(
                "security list is empty".to_string(),
            ));
        }

        if self.securities.iter().any(|s| s.as_str().is_empty()) {
            return Err(OrchestrationError::Configuration(
                "security list contains a blank symbol".to_string(),
            ));
        }

        if self.provider_timeout.is_zero() {
            return Err(OrchestrationError::Configuration(
                "provider timeout must be positive".to_string(),
            ));
        }

        if self.audit_capacity == 0 {
            return Err(OrchestrationError::Configuration(
                "audit capacity must be positive".to_string(),
            ));
        }

        if let Some(names) = &self.enabled_providers {
            let mut seen = HashSet::with_capacity(names.len());
            for name in names {
                if !seen.insert(name.as_str()) {
                    return Err(OrchestrationError::Configuration(format!(
                        "provider '{}' listed more than once",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_max_retries(raw: &str) -> Result<u32> {
    let value: i64 = raw.trim().parse().map_err(|_| {
        OrchestrationError::Configuration(format!("HEDGE_MAX_RETRIES is not an integer: '{}'", raw))
    })?;

    u32::try_from(value).map_err(|_| {
        OrchestrationError::Configuration(format!(
            "HEDGE_MAX_RETRIES must be non-negative, got {}",
            value
        ))
    })
}
