//! Main orchestrator - drives trading cycles
//!
//! GATHER → THESIS → QUANT → RISK → (retry THESIS)? → ORDER → ARCHIVE

use crate::audit::AuditLog;
use crate::capabilities::{CapabilityResult, Capabilities};
use crate::config::OrchestratorConfig;
use crate::cycle::{CycleSnapshot, TradingCycle};
use crate::error::OrchestrationError;
use crate::gemini::{GeminiClient, TextGenerator};
use crate::intelligence::providers::{default_registry, DATA_PROVIDERS};
use crate::intelligence::providers::YahooFinanceClient;
use crate::intelligence::{
    IntelligenceAggregator, IntelligenceProvider, IntelligenceRegistry, SharedRegistry,
};
use crate::market::{MarketDataSource, MarketSnapshot};
use crate::models::{IntelligenceContext, Security, TradingCycleState};
use crate::risk::RuleBasedRiskAssessor;
use crate::Result;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Position the offline risk rules size from, in currency units
const DEFAULT_BASE_POSITION: f64 = 10_000.0;

/// Runs a capability call unless the cycle is cancelled first
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = CapabilityResult<T>>,
) -> Option<CapabilityResult<T>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = call => Some(outcome),
    }
}

fn missing(what: &str, cycle: &TradingCycle) -> OrchestrationError {
    OrchestrationError::InvalidTransition(format!(
        "{} missing in {} for {}",
        what,
        cycle.state(),
        cycle.security()
    ))
}

/// Main orchestrator that coordinates every cycle
pub struct Orchestrator {
    registry: SharedRegistry,
    aggregator: IntelligenceAggregator,
    capabilities: Capabilities,
    market: Option<Arc<dyn MarketDataSource>>,
    config: Arc<OrchestratorConfig>,
    audit_log: AuditLog,
}

impl Orchestrator {
    /// Validates the configuration and resolves `enabled_providers` up front,
    /// so configuration errors surface before any cycle starts.
    pub fn new(
        registry: IntelligenceRegistry,
        capabilities: Capabilities,
        config: OrchestratorConfig,
        audit_log: AuditLog,
    ) -> Result<Self> {
        config.validate()?;

        let selected = registry.select_registered(config.enabled_providers.as_deref())?;

        info!(
            providers = ?selected.iter().map(|p| p.name()).collect::<Vec<_>>(),
            max_retries = config.max_retries,
            provider_timeout_ms = config.provider_timeout.as_millis() as u64,
            "Orchestrator configured"
        );

        Ok(Self {
            registry: registry.into_shared(),
            aggregator: IntelligenceAggregator::new(config.provider_timeout),
            capabilities,
            market: None,
            config: Arc::new(config),
            audit_log,
        })
    }

    /// Built-in providers and capabilities for a loaded configuration.
    ///
    /// Without an API key the LLM stages are replaced by offline ones and only
    /// data providers run, unless `enabled_providers` says otherwise.
    pub fn from_config(mut config: OrchestratorConfig) -> Result<Self> {
        let (registry, capabilities) = match config.gemini_api_key.clone() {
            Some(key) => {
                let llm: Arc<dyn TextGenerator> =
                    Arc::new(GeminiClient::new(key, config.llm_model.clone()));
                (
                    default_registry(llm.clone())?,
                    Capabilities::gemini(llm, config.task.clone()),
                )
            }
            None => {
                warn!("GEMINI_API_KEY not set - running offline capabilities");

                let llm: Arc<dyn TextGenerator> =
                    Arc::new(GeminiClient::new(String::new(), config.llm_model.clone()));
                if config.enabled_providers.is_none() {
                    config.enabled_providers =
                        Some(DATA_PROVIDERS.iter().map(|s| s.to_string()).collect());
                }
                (
                    default_registry(llm)?,
                    Capabilities::mock().with_risk(Arc::new(
                        RuleBasedRiskAssessor::with_default_rules(DEFAULT_BASE_POSITION),
                    )),
                )
            }
        };

        let audit_log = AuditLog::with_capacity(config.audit_capacity);
        Ok(Self::new(registry, capabilities, config, audit_log)?
            .with_market_data(Arc::new(YahooFinanceClient::new())))
    }

    /// Price history source for the technical indicators fed to every stage
    pub fn with_market_data(mut self, source: Arc<dyn MarketDataSource>) -> Self {
        self.market = Some(source);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Registry handle; registration through it is serialized against selection
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    /// Missing or slow price history degrades to no market data
    async fn market_snapshot(
        &self,
        security: &Security,
        cancel: &CancellationToken,
    ) -> Option<MarketSnapshot> {
        let source = self.market.as_ref()?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            fetched = tokio::time::timeout(self.config.provider_timeout, source.snapshot(security)) => {
                match fetched {
                    Ok(Ok(snapshot)) => Some(snapshot),
                    Ok(Err(e)) => {
                        warn!(security = %security, error = %e, "Market data unavailable");
                        None
                    }
                    Err(_) => {
                        warn!(security = %security, "Market data timed out");
                        None
                    }
                }
            }
        }
    }

    async fn active_providers(&self) -> Result<Vec<Arc<dyn IntelligenceProvider>>> {
        let registry = self.registry.read().await;
        registry.select_registered(self.config.enabled_providers.as_deref())
    }

    /// Drive one security to a terminal state.
    ///
    /// Business outcomes (COMPLETED, REJECTED, FAILED) are all `Ok`; `Err` is
    /// reserved for setup problems and broken invariants.
    pub async fn run_cycle(
        &self,
        security: Security,
        cancel: CancellationToken,
    ) -> Result<CycleSnapshot> {
        let providers = self.active_providers().await?;
        let start_time = Instant::now();

        let mut cycle = TradingCycle::new(security.clone(), self.config.max_retries);

        info!(
            cycle_id = %cycle.id(),
            security = %security,
            providers = providers.len(),
            max_retries = self.config.max_retries,
            "Orchestrator: starting cycle"
        );

        cycle.start()?;

        // === GATHER ===
        let market = self.market_snapshot(&security, &cancel).await;
        let task_context = json!({
            "task": self.config.task.description,
            "market_data": market,
        });
        let context = self
            .aggregator
            .gather(&security, &providers, Some(&task_context), &cancel)
            .await
            .with_market_data(market);

        if context.partial || cancel.is_cancelled() {
            cycle.record_partial_intelligence(context);
            cycle.cancel("cancelled during intelligence gathering")?;
            return self.finish(cycle, start_time).await;
        }

        cycle.record_intelligence(context)?;

        while !cycle.is_terminal() {
            let context = cycle
                .intelligence()
                .cloned()
                .unwrap_or_else(|| IntelligenceContext::empty(security.clone()));

            match cycle.state() {
                // === THESIS ===
                TradingCycleState::Thesis => {
                    debug!(security = %security, attempt = cycle.attempt() + 1, "Generating thesis");

                    let outcome =
                        unless_cancelled(&cancel, self.capabilities.thesis.generate(&security, &context)).await;

                    match outcome {
                        Some(Ok(thesis)) => cycle.record_thesis(thesis)?,
                        Some(Err(e)) => cycle.fail(&e)?,
                        None => cycle.cancel("cancelled during thesis generation")?,
                    }
                }

                // === QUANT ===
                TradingCycleState::Quant => {
                    let thesis = cycle.thesis().cloned().ok_or_else(|| missing("thesis", &cycle))?;

                    let outcome = unless_cancelled(
                        &cancel,
                        self.capabilities.quant.analyze(&security, &thesis, &context),
                    )
                    .await;

                    match outcome {
                        Some(Ok(quant)) => cycle.record_quant(quant)?,
                        Some(Err(e)) => cycle.fail(&e)?,
                        None => cycle.cancel("cancelled during quantitative analysis")?,
                    }
                }

                // === RISK ===
                TradingCycleState::RiskAssessment => {
                    let quant = cycle.quant().cloned().ok_or_else(|| missing("quant result", &cycle))?;

                    let outcome = unless_cancelled(
                        &cancel,
                        self.capabilities.risk.assess(&security, &quant, &context),
                    )
                    .await;

                    match outcome {
                        Some(Ok(decision)) => cycle.record_risk_decision(decision)?,
                        Some(Err(e)) => cycle.fail(&e)?,
                        None => cycle.cancel("cancelled during risk assessment")?,
                    }
                }

                // === ORDER ===
                TradingCycleState::OrderGeneration => {
                    let decision = cycle
                        .last_risk_decision()
                        .cloned()
                        .ok_or_else(|| missing("risk decision", &cycle))?;
                    let quant = cycle.quant().cloned().ok_or_else(|| missing("quant result", &cycle))?;

                    let outcome = unless_cancelled(
                        &cancel,
                        self.capabilities.order.generate(&security, &decision, &quant),
                    )
                    .await;

                    match outcome {
                        Some(Ok(order)) => cycle.record_order(order)?,
                        Some(Err(e)) => cycle.fail(&e)?,
                        None => cycle.cancel("cancelled during order generation")?,
                    }
                }

                other => {
                    return Err(OrchestrationError::InvalidTransition(format!(
                        "cycle for {} stalled in {}",
                        security, other
                    )));
                }
            }
        }

        self.finish(cycle, start_time).await
    }

    async fn finish(&self, cycle: TradingCycle, start_time: Instant) -> Result<CycleSnapshot> {
        let snapshot = cycle.snapshot();
        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        let reason = snapshot.terminal_reason.as_deref().unwrap_or_default();

        match snapshot.state {
            TradingCycleState::Completed => info!(
                cycle_id = %snapshot.id,
                security = %snapshot.security,
                attempts = snapshot.attempt + 1,
                elapsed_ms,
                "Cycle completed - {}", reason
            ),
            TradingCycleState::Rejected => warn!(
                cycle_id = %snapshot.id,
                security = %snapshot.security,
                attempts = snapshot.attempt + 1,
                elapsed_ms,
                "Cycle rejected - {}", reason
            ),
            _ => error!(
                cycle_id = %snapshot.id,
                security = %snapshot.security,
                state = %snapshot.state,
                elapsed_ms,
                "Cycle failed - {}", reason
            ),
        }

        self.audit_log.record(snapshot.clone()).await?;
        Ok(snapshot)
    }

    /// One independent cycle per security, run concurrently.
    ///
    /// Results come back in input order. Each cycle gets a child token, so
    /// cancelling `cancel` stops the whole basket.
    pub async fn run_basket(
        self: &Arc<Self>,
        securities: Vec<Security>,
        cancel: &CancellationToken,
    ) -> Vec<Result<CycleSnapshot>> {
        info!(securities = securities.len(), "Orchestrator: starting basket");

        let handles: Vec<_> = securities
            .into_iter()
            .map(|security| {
                let orchestrator = Arc::clone(self);
                let token = cancel.child_token();
                tokio::spawn(async move { orchestrator.run_cycle(security, token).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(OrchestrationError::CycleTask(e.to_string())),
            });
        }
        results
    }

    /// Basket over the configured security list
    pub async fn run_configured(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<Result<CycleSnapshot>> {
        let securities = self.config.securities.clone();
        self.run_basket(securities, cancel).await
    }
}
