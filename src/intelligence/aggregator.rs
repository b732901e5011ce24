//! Concurrent fan-out over the active providers
//!
//! Every provider runs in its own task under its own timeout. A failure is
//! recorded and skipped; it never aborts the other providers or the gather.

use super::IntelligenceProvider;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::models::{IntelligenceContext, IntelligenceResult, Security};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Slot = Option<Result<IntelligenceResult, ProviderError>>;

/// Confidence-weighted mean of risk impacts, clamped to [-1, 1].
///
/// Zero when there are no results or every confidence is zero.
pub fn composite_risk_adjustment(results: &[IntelligenceResult]) -> f64 {
    let total_confidence: f64 = results.iter().map(|r| r.confidence).sum();
    if total_confidence <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = results.iter().map(|r| r.risk_impact * r.confidence).sum();
    (weighted / total_confidence).clamp(-1.0, 1.0)
}

pub struct IntelligenceAggregator {
    provider_timeout: Duration,
}

impl IntelligenceAggregator {
    pub fn new(provider_timeout: Duration) -> Self {
        Self { provider_timeout }
    }

    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    /// Run every provider and fold the survivors into one context.
    ///
    /// Waits for all providers to finish or time out. If `cancel` fires first,
    /// in-flight calls are aborted and the context holds whatever had already
    /// completed, flagged as partial.
    pub async fn gather(
        &self,
        security: &Security,
        providers: &[Arc<dyn IntelligenceProvider>],
        context: Option<&Value>,
        cancel: &CancellationToken,
    ) -> IntelligenceContext {
        let start = Instant::now();
        let mut slots: Vec<Slot> = vec![None; providers.len()];
        let mut tasks = JoinSet::new();

        for (i, provider) in providers.iter().enumerate() {
            if !provider.supports(security) {
                slots[i] = Some(Err(ProviderError::data_unavailable(
                    provider.name(),
                    format!("{} not supported", security),
                )));
                continue;
            }

            let provider = provider.clone();
            let security = security.clone();
            let context = context.cloned();
            let limit = self.provider_timeout;

            tasks.spawn(async move {
                let outcome =
                    match tokio::time::timeout(limit, provider.analyze(&security, context.as_ref()))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(ProviderError::timeout(
                            provider.name(),
                            format!("no response within {:?}", limit),
                        )),
                    };
                (i, outcome)
            });
        }

        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    cancelled = true;
                    tasks.abort_all();
                    // Tasks that finished before the abort still yield their outcome
                    while let Some(joined) = tasks.join_next().await {
                        if let Ok((i, outcome)) = joined {
                            slots[i] = Some(outcome);
                        }
                    }
                    break;
                }

                joined = tasks.join_next() => match joined {
                    Some(Ok((i, outcome))) => slots[i] = Some(outcome),
                    Some(Err(e)) => {
                        // The slot stays empty and is reported below
                        warn!(security = %security, error = %e, "Provider task aborted");
                    }
                    None => break,
                },
            }
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();

        for (provider, slot) in providers.iter().zip(slots) {
            let outcome = slot.unwrap_or_else(|| {
                let message = if cancelled {
                    "cancelled before completion"
                } else {
                    "provider task did not complete"
                };
                Err(ProviderError::new(
                    provider.name(),
                    ProviderErrorKind::Unknown,
                    message,
                ))
            });

            match outcome {
                Ok(result) => {
                    debug!(
                        provider = %provider.name(),
                        security = %security,
                        confidence = result.confidence,
                        risk_impact = result.risk_impact,
                        "Provider completed"
                    );
                    results.push(result);
                }
                Err(e) => {
                    warn!(
                        provider = %e.provider,
                        kind = %e.kind,
                        security = %security,
                        error = %e.message,
                        "Provider failed"
                    );
                    failures.push(e);
                }
            }
        }

        let composite = composite_risk_adjustment(&results);

        info!(
            security = %security,
            results = results.len(),
            failures = failures.len(),
            composite_risk_adjustment = composite,
            cancelled,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Intelligence gathered"
        );

        IntelligenceContext {
            security: security.clone(),
            results,
            failures,
            composite_risk_adjustment: composite,
            rejection_feedback: Vec::new(),
            partial: cancelled,
            market_data: None,
            gathered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::testing::ScriptedProvider;
    use crate::models::{IntelligenceType, ProviderCategory};
    use async_trait::async_trait;

    /// Fires the cycle's cancel token, then answers anyway
    struct CancelsThenAnswers {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl IntelligenceProvider for CancelsThenAnswers {
        fn name(&self) -> &str {
            "fast"
        }

        fn intelligence_type(&self) -> IntelligenceType {
            IntelligenceType::Custom
        }

        fn category(&self) -> ProviderCategory {
            ProviderCategory::Data
        }

        async fn analyze(
            &self,
            security: &Security,
            _context: Option<&Value>,
        ) -> Result<IntelligenceResult, ProviderError> {
            self.cancel.cancel();
            Ok(IntelligenceResult::new(
                "fast",
                IntelligenceType::Custom,
                security.clone(),
                "finished",
                0.7,
                0.2,
            ))
        }
    }

    /// Declines every security
    struct Declines;

    #[async_trait]
    impl IntelligenceProvider for Declines {
        fn name(&self) -> &str {
            "picky"
        }

        fn intelligence_type(&self) -> IntelligenceType {
            IntelligenceType::Custom
        }

        fn category(&self) -> ProviderCategory {
            ProviderCategory::Data
        }

        fn supports(&self, _security: &Security) -> bool {
            false
        }

        async fn analyze(
            &self,
            _security: &Security,
            _context: Option<&Value>,
        ) -> Result<IntelligenceResult, ProviderError> {
            unreachable!("unsupported securities are never analyzed")
        }
    }

    fn result(confidence: f64, risk_impact: f64) -> IntelligenceResult {
        IntelligenceResult::new(
            "p",
            IntelligenceType::Custom,
            Security::new("NVDA"),
            "",
            confidence,
            risk_impact,
        )
    }

    #[test]
    fn test_composite_nvda_scenario() {
        let composite = composite_risk_adjustment(&[result(0.9, 0.2), result(0.5, -0.4)]);
        let expected = (0.9 * 0.2 + 0.5 * -0.4) / 1.4;
        assert!((composite - expected).abs() < 1e-12);
        assert!((composite - -0.0143).abs() < 1e-3);
    }

    #[test]
    fn test_composite_zero_cases() {
        assert_eq!(composite_risk_adjustment(&[]), 0.0);
        assert_eq!(composite_risk_adjustment(&[result(0.0, 0.9), result(0.0, -0.7)]), 0.0);
    }

    #[test]
    fn test_composite_always_bounded() {
        let impacts = [-1.0, -0.6, -0.1, 0.0, 0.3, 1.0];
        let confidences = [0.0, 0.05, 0.5, 1.0];
        for &a in &impacts {
            for &b in &impacts {
                for &ca in &confidences {
                    for &cb in &confidences {
                        let c = composite_risk_adjustment(&[result(ca, a), result(cb, b)]);
                        assert!((-1.0..=1.0).contains(&c), "out of range: {}", c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_low_confidence_cannot_dominate() {
        let composite = composite_risk_adjustment(&[result(0.05, -1.0), result(0.95, 0.2)]);
        assert!(composite > 0.0);
    }

    #[tokio::test]
    async fn test_partial_failure_tolerated() {
        let aggregator = IntelligenceAggregator::new(Duration::from_millis(50));
        let providers = vec![
            ScriptedProvider::hanging("slow_a"),
            ScriptedProvider::ok("survivor", 0.8, -0.3),
            ScriptedProvider::hanging("slow_b"),
        ];

        let ctx = aggregator
            .gather(&Security::new("NVDA"), &providers, None, &CancellationToken::new())
            .await;

        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.results[0].provider_name, "survivor");
        assert_eq!(ctx.failures.len(), 2);
        assert!(ctx.failures.iter().all(|f| f.kind == ProviderErrorKind::Timeout));
        assert!((ctx.composite_risk_adjustment - -0.3).abs() < 1e-12);
        assert!(!ctx.partial);
    }

    #[tokio::test]
    async fn test_all_fail_returns_empty_context() {
        let aggregator = IntelligenceAggregator::new(Duration::from_millis(50));
        let providers = vec![
            ScriptedProvider::failing("a", ProviderErrorKind::RateLimited),
            ScriptedProvider::failing("b", ProviderErrorKind::DataUnavailable),
        ];

        let ctx = aggregator
            .gather(&Security::new("SPY"), &providers, None, &CancellationToken::new())
            .await;

        assert!(ctx.is_empty());
        assert_eq!(ctx.composite_risk_adjustment, 0.0);
        assert_eq!(ctx.failures[0].provider, "a");
        assert_eq!(ctx.failures[0].kind, ProviderErrorKind::RateLimited);
        assert_eq!(ctx.failures[1].kind, ProviderErrorKind::DataUnavailable);
    }

    #[tokio::test]
    async fn test_no_providers() {
        let aggregator = IntelligenceAggregator::new(Duration::from_millis(50));
        let ctx = aggregator
            .gather(&Security::new("SPY"), &[], None, &CancellationToken::new())
            .await;
        assert!(ctx.is_empty());
        assert!(ctx.failures.is_empty());
        assert_eq!(ctx.composite_risk_adjustment, 0.0);
    }

    #[tokio::test]
    async fn test_results_follow_registration_order() {
        let aggregator = IntelligenceAggregator::new(Duration::from_secs(2));
        let providers = vec![
            ScriptedProvider::delayed_ok("first", Duration::from_millis(80), 0.5, 0.1),
            ScriptedProvider::ok("second", 0.5, 0.2),
            ScriptedProvider::delayed_ok("third", Duration::from_millis(20), 0.5, 0.3),
        ];

        let ctx = aggregator
            .gather(&Security::new("SPY"), &providers, None, &CancellationToken::new())
            .await;

        let order: Vec<&str> = ctx.results.iter().map(|r| r.provider_name.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_cancel_keeps_completed_results() {
        let aggregator = IntelligenceAggregator::new(Duration::from_secs(60));
        let providers = vec![
            ScriptedProvider::ok("fast", 0.6, 0.4),
            ScriptedProvider::hanging("stuck"),
        ];
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let ctx = aggregator
            .gather(&Security::new("SPY"), &providers, None, &cancel)
            .await;

        assert!(ctx.partial);
        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.results[0].provider_name, "fast");
        assert_eq!(ctx.failures.len(), 1);
        assert_eq!(ctx.failures[0].provider, "stuck");
    }

    #[tokio::test]
    async fn test_result_finished_alongside_cancel_is_kept() {
        let aggregator = IntelligenceAggregator::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let providers: Vec<Arc<dyn IntelligenceProvider>> = vec![
            Arc::new(CancelsThenAnswers {
                cancel: cancel.clone(),
            }),
            ScriptedProvider::hanging("stuck"),
        ];

        let ctx = aggregator
            .gather(&Security::new("NVDA"), &providers, None, &cancel)
            .await;

        assert!(ctx.partial);
        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.results[0].provider_name, "fast");
        assert_eq!(ctx.failures.len(), 1);
        assert_eq!(ctx.failures[0].provider, "stuck");
    }

    #[tokio::test]
    async fn test_unsupported_security_recorded_as_unavailable() {
        let aggregator = IntelligenceAggregator::new(Duration::from_millis(50));
        let providers: Vec<Arc<dyn IntelligenceProvider>> =
            vec![Arc::new(Declines), ScriptedProvider::ok("survivor", 0.8, 0.1)];

        let ctx = aggregator
            .gather(&Security::new("XYZ"), &providers, None, &CancellationToken::new())
            .await;

        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.failures.len(), 1);
        assert_eq!(ctx.failures[0].provider, "picky");
        assert_eq!(ctx.failures[0].kind, ProviderErrorKind::DataUnavailable);
    }
}
