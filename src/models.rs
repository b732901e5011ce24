//! Core data models for the trading cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProviderError;
use crate::market::MarketSnapshot;

//
// ================= Security =================
//

/// Ticker symbol. Normalised to upper case, immutable once a cycle starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Security(String);

impl Security {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Security {
    fn from(value: &str) -> Self {
        Security::new(value)
    }
}

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IntelligenceType {
    Earnings,
    Fundamental,
    News,
    Sentiment,
    Macro,
    Sector,
    Technical,
    Options,
    Insider,
    Institutional,
    Custom,
}

impl fmt::Display for IntelligenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntelligenceType::Earnings => "earnings",
            IntelligenceType::Fundamental => "fundamental",
            IntelligenceType::News => "news",
            IntelligenceType::Sentiment => "sentiment",
            IntelligenceType::Macro => "macro",
            IntelligenceType::Sector => "sector",
            IntelligenceType::Technical => "technical",
            IntelligenceType::Options => "options",
            IntelligenceType::Insider => "insider",
            IntelligenceType::Institutional => "institutional",
            IntelligenceType::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// Observed facts vs. model-generated opinions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCategory {
    Data,
    Inference,
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderCategory::Data => write!(f, "data"),
            ProviderCategory::Inference => write!(f, "inference"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    IntelligenceGathering,
    Thesis,
    Quant,
    RiskAssessment,
    OrderGeneration,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::IntelligenceGathering => "intelligence gathering",
            PipelineStage::Thesis => "thesis",
            PipelineStage::Quant => "quant",
            PipelineStage::RiskAssessment => "risk assessment",
            PipelineStage::OrderGeneration => "order generation",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingCycleState {
    Initialized,
    GatheringIntelligence,
    Thesis,
    Quant,
    RiskAssessment,
    OrderGeneration,
    Completed,
    Rejected,
    Failed,
}

impl TradingCycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradingCycleState::Completed | TradingCycleState::Rejected | TradingCycleState::Failed
        )
    }
}

impl fmt::Display for TradingCycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradingCycleState::Initialized => "INITIALIZED",
            TradingCycleState::GatheringIntelligence => "GATHERING_INTELLIGENCE",
            TradingCycleState::Thesis => "THESIS",
            TradingCycleState::Quant => "QUANT",
            TradingCycleState::RiskAssessment => "RISK_ASSESSMENT",
            TradingCycleState::OrderGeneration => "ORDER_GENERATION",
            TradingCycleState::Completed => "COMPLETED",
            TradingCycleState::Rejected => "REJECTED",
            TradingCycleState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Intelligence =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntelligenceResult {
    pub provider_name: String,
    pub intelligence_type: IntelligenceType,
    pub security: Security,
    pub summary: String,
    /// In [0, 1]. Zero is a valid low-trust signal.
    pub confidence: f64,
    /// In [-1, 1]. Negative means higher risk.
    pub risk_impact: f64,
    #[serde(default)]
    pub details: serde_json::Value,
    pub produced_at: DateTime<Utc>,
}

impl IntelligenceResult {
    /// Out-of-range inputs are clamped; non-finite values become 0.
    pub fn new(
        provider_name: impl Into<String>,
        intelligence_type: IntelligenceType,
        security: Security,
        summary: impl Into<String>,
        confidence: f64,
        risk_impact: f64,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            intelligence_type,
            security,
            summary: summary.into(),
            confidence: bounded(confidence, 0.0, 1.0),
            risk_impact: bounded(risk_impact, -1.0, 1.0),
            details: serde_json::Value::Null,
            produced_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn to_prompt_context(&self) -> String {
        format!(
            "[{}] ({})\nSummary: {}\nConfidence: {:.0}%\nRisk Impact: {:+.2}\n",
            self.provider_name,
            self.intelligence_type,
            self.summary,
            self.confidence * 100.0,
            self.risk_impact
        )
    }
}

fn bounded(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        0.0
    }
}

/// Intelligence gathered for one security, owned by one cycle.
///
/// Never mutated in place: retries derive a new context through
/// [`IntelligenceContext::with_rejection`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntelligenceContext {
    pub security: Security,
    /// Ordered by provider registration order
    pub results: Vec<IntelligenceResult>,
    pub failures: Vec<ProviderError>,
    pub composite_risk_adjustment: f64,
    pub rejection_feedback: Vec<String>,
    /// True when gathering was interrupted before every provider finished
    pub partial: bool,
    /// Price-derived indicators, when price history could be fetched
    #[serde(default)]
    pub market_data: Option<MarketSnapshot>,
    pub gathered_at: DateTime<Utc>,
}

impl IntelligenceContext {
    pub fn empty(security: Security) -> Self {
        Self {
            security,
            results: Vec::new(),
            failures: Vec::new(),
            composite_risk_adjustment: 0.0,
            rejection_feedback: Vec::new(),
            partial: false,
            market_data: None,
            gathered_at: Utc::now(),
        }
    }

    pub fn with_market_data(mut self, market_data: Option<MarketSnapshot>) -> Self {
        self.market_data = market_data;
        self
    }

    /// Market section for stage prompts
    pub fn market_prompt_context(&self) -> String {
        match &self.market_data {
            Some(snapshot) => snapshot.to_prompt_context(),
            None => format!("Limited market data for {}.\n", self.security),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Derive the context for the next attempt, carrying the rejection reason
    pub fn with_rejection(&self, reason: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.rejection_feedback.push(reason.into());
        next
    }

    pub fn to_prompt_context(&self) -> String {
        let mut out = String::new();

        if self.results.is_empty() {
            out.push_str("No additional market intelligence available.\n");
        } else {
            let rule = "=".repeat(50);
            out.push_str(&rule);
            out.push_str("\nADDITIONAL MARKET INTELLIGENCE\n");
            out.push_str(&rule);
            out.push('\n');
            for result in &self.results {
                out.push_str(&result.to_prompt_context());
                out.push('\n');
            }
            out.push_str(&format!(
                "Composite Risk Adjustment: {:+.3}\n",
                self.composite_risk_adjustment
            ));
            out.push_str(&rule);
            out.push('\n');
        }

        if !self.rejection_feedback.is_empty() {
            out.push_str("\nPREVIOUS RISK REJECTIONS (address these):\n");
            for (i, reason) in self.rejection_feedback.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, reason));
            }
        }

        out
    }
}

//
// ================= Pipeline Outputs =================
//

/// Free-form description of what the cycle is trying to achieve
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingTask {
    pub description: String,
}

impl TradingTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

impl Default for TradingTask {
    fn default() -> Self {
        Self::new("Evaluate the security for a balanced risk-reward position.")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thesis {
    pub content: String,
    pub generated_at: DateTime<Utc>,
}

impl Thesis {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuantResult {
    pub analysis: String,
    /// Probability of trade success in [0, 1], when the quant stage reports one
    pub probability_score: Option<f64>,
    pub technical_score: Option<f64>,
    pub produced_at: DateTime<Utc>,
}

impl QuantResult {
    pub fn new(analysis: impl Into<String>) -> Self {
        Self {
            analysis: analysis.into(),
            probability_score: None,
            technical_score: None,
            produced_at: Utc::now(),
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability_score = Some(probability.clamp(0.0, 1.0));
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskDecision {
    pub verdict: Verdict,
    pub reason: String,
    pub risk_score: f64,
    /// Position size recommended by the risk stage, in currency units
    #[serde(default)]
    pub position_size: Option<f64>,
}

impl RiskDecision {
    pub fn approve(reason: impl Into<String>, risk_score: f64) -> Self {
        Self {
            verdict: Verdict::Approve,
            reason: reason.into(),
            risk_score,
            position_size: None,
        }
    }

    pub fn reject(reason: impl Into<String>, risk_score: f64) -> Self {
        Self {
            verdict: Verdict::Reject,
            reason: reason.into(),
            risk_score,
            position_size: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approve
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub security: Security,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default = "default_time_in_force")]
    pub time_in_force: String,
    #[serde(default)]
    pub rationale: String,
}

fn default_time_in_force() -> String {
    "day".to_string()
}

//
// ================= Transition Log =================
//

/// What triggered a state transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CycleEvent {
    Started,
    IntelligenceGathered {
        results: usize,
        failures: usize,
        composite_risk_adjustment: f64,
    },
    ThesisGenerated,
    QuantCompleted,
    RiskApproved {
        risk_score: f64,
    },
    RiskRejected {
        reason: String,
        risk_score: f64,
    },
    OrderGenerated,
    CapabilityFailed {
        stage: PipelineStage,
        error: String,
    },
    Cancelled {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub from: TradingCycleState,
    pub to: TradingCycleState,
    pub event: CycleEvent,
    /// Retry counter at the moment of the transition
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ranges_clamped_without_coercing_zero() {
        let result = IntelligenceResult::new(
            "earnings",
            IntelligenceType::Earnings,
            Security::new("nvda"),
            "beat",
            0.0,
            3.0,
        );
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.risk_impact, 1.0);
        assert_eq!(result.security.as_str(), "NVDA");

        let nan = IntelligenceResult::new(
            "x",
            IntelligenceType::Custom,
            Security::new("SPY"),
            "",
            f64::NAN,
            f64::NEG_INFINITY,
        );
        assert_eq!(nan.confidence, 0.0);
        assert_eq!(nan.risk_impact, 0.0);
    }

    #[test]
    fn test_with_rejection_builds_new_context() {
        let base = IntelligenceContext::empty(Security::new("SPY"));
        let next = base.with_rejection("position too large");

        assert!(base.rejection_feedback.is_empty());
        assert_eq!(next.rejection_feedback, vec!["position too large".to_string()]);
        assert!(next.to_prompt_context().contains("position too large"));
    }

    #[test]
    fn test_empty_context_prompt() {
        let ctx = IntelligenceContext::empty(Security::new("SPY"));
        assert!(ctx.is_empty());
        assert!(ctx
            .to_prompt_context()
            .starts_with("No additional market intelligence available."));
    }

    #[test]
    fn test_terminal_states() {
        assert!(TradingCycleState::Completed.is_terminal());
        assert!(TradingCycleState::Rejected.is_terminal());
        assert!(TradingCycleState::Failed.is_terminal());
        assert!(!TradingCycleState::RiskAssessment.is_terminal());
    }

    #[test]
    fn test_state_serializes_screaming_snake() {
        let json = serde_json::to_string(&TradingCycleState::GatheringIntelligence).unwrap();
        assert_eq!(json, "\"GATHERING_INTELLIGENCE\"");
    }

    #[test]
    fn test_order_defaults_from_json() {
        let order: Order = serde_json::from_str(
            r#"{"security":"NVDA","side":"buy","order_type":"limit","quantity":10,"entry_price":120.5}"#,
        )
        .unwrap();
        assert_eq!(order.time_in_force, "day");
        assert_eq!(order.side, OrderSide::Buy);
        assert!(order.stop_loss.is_none());
    }
}
