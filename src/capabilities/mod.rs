//! Pipeline stage capabilities
//!
//! The cycle state machine only sees these traits. Each stage consumes the
//! output of the stage before it and may fail with a `CapabilityError`.

use crate::error::CapabilityError;
use crate::gemini::TextGenerator;
use crate::models::{
    IntelligenceContext, Order, OrderSide, OrderType, PipelineStage, QuantResult, RiskDecision,
    Security, Thesis, TradingTask,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub mod gemini;
pub use gemini::{GeminiOrderDesk, GeminiQuantAnalyst, GeminiRiskManager, GeminiThesisWriter};

pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

#[async_trait]
pub trait ThesisCapability: Send + Sync {
    async fn generate(
        &self,
        security: &Security,
        context: &IntelligenceContext,
    ) -> CapabilityResult<Thesis>;
}

#[async_trait]
pub trait QuantCapability: Send + Sync {
    async fn analyze(
        &self,
        security: &Security,
        thesis: &Thesis,
        context: &IntelligenceContext,
    ) -> CapabilityResult<QuantResult>;
}

/// A REJECT verdict is a normal return value, not an error
#[async_trait]
pub trait RiskCapability: Send + Sync {
    async fn assess(
        &self,
        security: &Security,
        quant: &QuantResult,
        context: &IntelligenceContext,
    ) -> CapabilityResult<RiskDecision>;
}

#[async_trait]
pub trait OrderCapability: Send + Sync {
    async fn generate(
        &self,
        security: &Security,
        decision: &RiskDecision,
        quant: &QuantResult,
    ) -> CapabilityResult<Order>;
}

/// The four stage executors a cycle runs through
#[derive(Clone)]
pub struct Capabilities {
    pub thesis: Arc<dyn ThesisCapability>,
    pub quant: Arc<dyn QuantCapability>,
    pub risk: Arc<dyn RiskCapability>,
    pub order: Arc<dyn OrderCapability>,
}

impl Capabilities {
    /// Deterministic offline stages, used when no LLM is configured
    pub fn mock() -> Self {
        Self {
            thesis: Arc::new(MockThesisWriter),
            quant: Arc::new(MockQuantAnalyst),
            risk: Arc::new(MockRiskManager::approving()),
            order: Arc::new(MockOrderDesk),
        }
    }

    /// Every stage backed by the same LLM
    pub fn gemini(llm: Arc<dyn TextGenerator>, task: TradingTask) -> Self {
        Self {
            thesis: Arc::new(GeminiThesisWriter::new(llm.clone(), task)),
            quant: Arc::new(GeminiQuantAnalyst::new(llm.clone())),
            risk: Arc::new(GeminiRiskManager::new(llm.clone())),
            order: Arc::new(GeminiOrderDesk::new(llm)),
        }
    }

    pub fn with_risk(mut self, risk: Arc<dyn RiskCapability>) -> Self {
        self.risk = risk;
        self
    }
}

/// Mock thesis writer for development & testing
pub struct MockThesisWriter;

#[async_trait]
impl ThesisCapability for MockThesisWriter {
    async fn generate(
        &self,
        security: &Security,
        context: &IntelligenceContext,
    ) -> CapabilityResult<Thesis> {
        let stance = if context.composite_risk_adjustment >= 0.0 {
            "constructive"
        } else {
            "cautious"
        };

        let mut content = format!(
            "{} thesis for {} from {} intelligence results (composite {:.3}).",
            stance,
            security,
            context.results.len(),
            context.composite_risk_adjustment
        );

        if !context.rejection_feedback.is_empty() {
            content.push_str(&format!(
                " Revised after {} risk rejection(s).",
                context.rejection_feedback.len()
            ));
        }

        Ok(Thesis::new(content))
    }
}

/// Maps the composite adjustment onto a success probability
pub struct MockQuantAnalyst;

#[async_trait]
impl QuantCapability for MockQuantAnalyst {
    async fn analyze(
        &self,
        security: &Security,
        _thesis: &Thesis,
        context: &IntelligenceContext,
    ) -> CapabilityResult<QuantResult> {
        let probability = 0.5 + context.composite_risk_adjustment * 0.5;

        Ok(QuantResult::new(format!(
            "Quant view on {}: success probability {:.2}",
            security, probability
        ))
        .with_probability(probability))
    }
}

/// Rejects the first `rejections` assessments, then approves
pub struct MockRiskManager {
    rejections: usize,
    calls: AtomicUsize,
}

impl MockRiskManager {
    pub fn approving() -> Self {
        Self::rejecting_first(0)
    }

    pub fn rejecting_first(rejections: usize) -> Self {
        Self {
            rejections,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiskCapability for MockRiskManager {
    async fn assess(
        &self,
        security: &Security,
        _quant: &QuantResult,
        context: &IntelligenceContext,
    ) -> CapabilityResult<RiskDecision> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let risk_score = (0.5 - context.composite_risk_adjustment * 0.5).clamp(0.0, 1.0);

        if call < self.rejections {
            return Ok(RiskDecision::reject(
                format!("{} position too large for current volatility", security),
                risk_score,
            ));
        }

        let mut decision = RiskDecision::approve(format!("{} within risk limits", security), risk_score);
        decision.position_size = Some(10_000.0);
        Ok(decision)
    }
}

/// Market buy sized from the approved position
pub struct MockOrderDesk;

#[async_trait]
impl OrderCapability for MockOrderDesk {
    async fn generate(
        &self,
        security: &Security,
        decision: &RiskDecision,
        _quant: &QuantResult,
    ) -> CapabilityResult<Order> {
        if !decision.is_approved() {
            return Err(CapabilityError::new(
                PipelineStage::OrderGeneration,
                "cannot generate an order from a rejected decision",
            ));
        }

        Ok(Order {
            security: security.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: decision.position_size.unwrap_or(1.0),
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            time_in_force: "day".to_string(),
            rationale: decision.reason.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_risk_rejects_then_approves() {
        let risk = MockRiskManager::rejecting_first(2);
        let ctx = IntelligenceContext::empty(Security::new("NVDA"));
        let quant = QuantResult::new("q");

        let first = risk.assess(&ctx.security, &quant, &ctx).await.unwrap();
        let second = risk.assess(&ctx.security, &quant, &ctx).await.unwrap();
        let third = risk.assess(&ctx.security, &quant, &ctx).await.unwrap();

        assert!(!first.is_approved());
        assert!(!second.is_approved());
        assert!(third.is_approved());
        assert_eq!(risk.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_pipeline_produces_order() {
        let caps = Capabilities::mock();
        let security = Security::new("SPY");
        let ctx = IntelligenceContext::empty(security.clone());

        let thesis = caps.thesis.generate(&security, &ctx).await.unwrap();
        let quant = caps.quant.analyze(&security, &thesis, &ctx).await.unwrap();
        let decision = caps.risk.assess(&security, &quant, &ctx).await.unwrap();
        let order = caps.order.generate(&security, &decision, &quant).await.unwrap();

        assert_eq!(quant.probability_score, Some(0.5));
        assert_eq!(order.security, security);
        assert_eq!(order.quantity, 10_000.0);
        assert_eq!(order.side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn test_mock_order_refuses_rejection() {
        let decision = RiskDecision::reject("no", 0.9);
        let err = MockOrderDesk
            .generate(&Security::new("SPY"), &decision, &QuantResult::new("q"))
            .await
            .unwrap_err();
        assert_eq!(err.stage, PipelineStage::OrderGeneration);
    }
}
