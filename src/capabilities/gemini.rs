//! Gemini-backed stage capabilities
//!
//! Each stage is one LLM call with a fixed persona. Answers are parsed
//! leniently; only the order stage requires machine-readable output.

use super::{
    CapabilityResult, OrderCapability, QuantCapability, RiskCapability, ThesisCapability,
};
use crate::error::CapabilityError;
use crate::gemini::TextGenerator;
use crate::models::{
    IntelligenceContext, Order, OrderSide, OrderType, PipelineStage, QuantResult, RiskDecision,
    Security, Thesis, TradingTask, Verdict,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const DIRECTOR_PERSONA: &str = "You are a Trading Director. You analyze markets, weigh technical \
and fundamental factors, and write concise trading theses with entry and exit points, position \
sizing guidance and the main risks.";

const QUANT_PERSONA: &str = "You are a Quantitative Analyst. You evaluate technical indicators, \
statistical patterns and risk metrics such as volatility and value-at-risk, and you estimate the \
probability that a trade succeeds.";

const RISK_PERSONA: &str = "You are a Risk Manager. You size positions, estimate drawdowns, and \
assess volatility, liquidity and correlation risk. End every assessment with a single line that \
says APPROVED or REJECTED.";

const EXECUTION_PERSONA: &str = "You are a Trade Execution specialist. You turn approved trades \
into precise order parameters: side, order type, quantity, entry, stop loss, take profit and time \
in force.";

async fn ask(
    llm: &dyn TextGenerator,
    stage: PipelineStage,
    persona: &str,
    prompt: &str,
) -> CapabilityResult<String> {
    let (answer, confidence) = llm
        .generate(persona, prompt)
        .await
        .map_err(|e| CapabilityError::new(stage, e.to_string()))?;

    debug!(stage = %stage, confidence, "Stage answer received");

    if answer.trim().is_empty() {
        return Err(CapabilityError::new(stage, "empty answer from LLM"));
    }
    Ok(answer)
}

pub struct GeminiThesisWriter {
    llm: Arc<dyn TextGenerator>,
    task: TradingTask,
}

impl GeminiThesisWriter {
    pub fn new(llm: Arc<dyn TextGenerator>, task: TradingTask) -> Self {
        Self { llm, task }
    }
}

#[async_trait]
impl ThesisCapability for GeminiThesisWriter {
    async fn generate(
        &self,
        security: &Security,
        context: &IntelligenceContext,
    ) -> CapabilityResult<Thesis> {
        let prompt = format!(
            "Task: {}\n\nDevelop a trading thesis for {}.\n\n{}\n{}",
            self.task.description,
            security,
            context.market_prompt_context(),
            context.to_prompt_context()
        );

        let answer = ask(self.llm.as_ref(), PipelineStage::Thesis, DIRECTOR_PERSONA, &prompt).await?;
        Ok(Thesis::new(answer))
    }
}

pub struct GeminiQuantAnalyst {
    llm: Arc<dyn TextGenerator>,
}

impl GeminiQuantAnalyst {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl QuantCapability for GeminiQuantAnalyst {
    async fn analyze(
        &self,
        security: &Security,
        thesis: &Thesis,
        context: &IntelligenceContext,
    ) -> CapabilityResult<QuantResult> {
        let prompt = format!(
            "Run a quantitative analysis of {}.\n\nThesis:\n{}\n\n{}\n{}\n\
             Finish with the lines PROBABILITY: <0-1> and TECHNICAL_SCORE: <0-1>.",
            security,
            thesis.content,
            context.market_prompt_context(),
            context.to_prompt_context()
        );

        let answer = ask(self.llm.as_ref(), PipelineStage::Quant, QUANT_PERSONA, &prompt).await?;

        let probability = labeled_number(&answer, "probability");
        let technical = labeled_number(&answer, "technical_score");

        let mut result = QuantResult::new(answer);
        if let Some(p) = probability {
            result = result.with_probability(p);
        }
        result.technical_score = technical.map(|t| t.clamp(0.0, 1.0));
        Ok(result)
    }
}

pub struct GeminiRiskManager {
    llm: Arc<dyn TextGenerator>,
}

impl GeminiRiskManager {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl RiskCapability for GeminiRiskManager {
    async fn assess(
        &self,
        security: &Security,
        quant: &QuantResult,
        context: &IntelligenceContext,
    ) -> CapabilityResult<RiskDecision> {
        let prompt = format!(
            "Assess the risk of trading {}.\n\nQuant analysis:\n{}\n\n{}\n\n\
             Composite intelligence risk adjustment: {:.3}.\n\
             Include the lines RISK_SCORE: <0-1> and POSITION_SIZE: <dollars>.",
            security,
            quant.analysis,
            context.to_prompt_context(),
            context.composite_risk_adjustment
        );

        let answer = ask(self.llm.as_ref(), PipelineStage::RiskAssessment, RISK_PERSONA, &prompt).await?;
        Ok(parse_risk_decision(&answer))
    }
}

/// Any mention of rejection wins over approval
pub fn parse_risk_decision(answer: &str) -> RiskDecision {
    let verdict = if answer.to_lowercase().contains("reject") {
        Verdict::Reject
    } else {
        Verdict::Approve
    };

    RiskDecision {
        verdict,
        reason: answer.trim().to_string(),
        risk_score: labeled_number(answer, "risk_score")
            .map(|s| s.clamp(0.0, 1.0))
            .unwrap_or(0.5),
        position_size: labeled_number(answer, "position_size").filter(|s| *s > 0.0),
    }
}

pub struct GeminiOrderDesk {
    llm: Arc<dyn TextGenerator>,
}

impl GeminiOrderDesk {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Deserialize)]
struct OrderDraft {
    side: OrderSide,
    #[serde(default = "default_order_type")]
    order_type: OrderType,
    quantity: f64,
    #[serde(default)]
    entry_price: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
    #[serde(default)]
    time_in_force: Option<String>,
}

fn default_order_type() -> OrderType {
    OrderType::Market
}

#[async_trait]
impl OrderCapability for GeminiOrderDesk {
    async fn generate(
        &self,
        security: &Security,
        decision: &RiskDecision,
        quant: &QuantResult,
    ) -> CapabilityResult<Order> {
        let position = decision
            .position_size
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "not specified".to_string());

        let prompt = format!(
            "Generate an order for {}.\n\nRisk assessment:\n{}\n\nApproved position size: {}\n\n\
             Quant analysis:\n{}\n\n\
             Return ONLY a ```json fenced object with the keys side (buy|sell), order_type \
             (market|limit), quantity, entry_price, stop_loss, take_profit, time_in_force.",
            security, decision.reason, position, quant.analysis
        );

        let answer = ask(self.llm.as_ref(), PipelineStage::OrderGeneration, EXECUTION_PERSONA, &prompt).await?;
        parse_order(security, decision, &answer)
    }
}

fn parse_order(security: &Security, decision: &RiskDecision, answer: &str) -> CapabilityResult<Order> {
    let json = extract_json_block(answer);

    let draft: OrderDraft = serde_json::from_str(json).map_err(|e| {
        CapabilityError::new(
            PipelineStage::OrderGeneration,
            format!("unparseable order: {} | raw={}", e, answer),
        )
    })?;

    if !draft.quantity.is_finite() || draft.quantity <= 0.0 {
        return Err(CapabilityError::new(
            PipelineStage::OrderGeneration,
            format!("invalid order quantity {}", draft.quantity),
        ));
    }

    Ok(Order {
        security: security.clone(),
        side: draft.side,
        order_type: draft.order_type,
        quantity: draft.quantity,
        entry_price: draft.entry_price,
        stop_loss: draft.stop_loss,
        take_profit: draft.take_profit,
        time_in_force: draft.time_in_force.unwrap_or_else(|| "day".to_string()),
        rationale: decision.reason.clone(),
    })
}

/// Body of the first ```json fence, or the whole trimmed text
fn extract_json_block(text: &str) -> &str {
    let Some(start) = text.find("```json") else {
        return text
            .trim()
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
    };

    let after_fence = &text[start + 7..];
    match after_fence.find("```") {
        Some(end) => after_fence[..end].trim(),
        None => after_fence.trim(),
    }
}

/// Number after the first `label:` (case-insensitive), e.g. `RISK_SCORE: 0.42`.
///
/// Bare mentions of the label in prose are skipped.
fn labeled_number(text: &str, label: &str) -> Option<f64> {
    let lowered = text.to_lowercase();
    let label = label.to_lowercase();

    lowered.match_indices(&label).find_map(|(at, _)| {
        let value = lowered[at + label.len()..]
            .trim_start()
            .strip_prefix(':')?
            .trim_start()
            .trim_start_matches('$');

        let digits: String = value
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
            .filter(|c| *c != ',')
            .collect();

        digits.trim_end_matches('.').parse::<f64>().ok()
    })
}
