//! Rule-based risk assessment
//!
//! Deterministic alternative to the LLM risk manager. Every rule runs;
//! any failed rule turns the decision into a REJECT.

use crate::capabilities::{CapabilityResult, RiskCapability};
use crate::models::{IntelligenceContext, QuantResult, RiskDecision, Security};
use async_trait::async_trait;
use tracing::info;

/// Everything a rule may look at
pub struct RiskInput<'a> {
    pub security: &'a Security,
    pub quant: &'a QuantResult,
    pub context: &'a IntelligenceContext,
    pub proposed_position: f64,
}

pub trait RiskRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, input: &RiskInput<'_>) -> RiskCheckResult;
}

pub struct RiskCheckResult {
    pub passed: bool,
    pub details: String,
}

pub struct RuleBasedRiskAssessor {
    rules: Vec<Box<dyn RiskRule>>,
    base_position: f64,
}

impl RuleBasedRiskAssessor {
    /// Empty rule set; approves everything
    pub fn new(base_position: f64) -> Self {
        Self {
            rules: Vec::new(),
            base_position,
        }
    }

    pub fn with_default_rules(base_position: f64) -> Self {
        let mut assessor = Self::new(base_position);
        assessor.add_rule(Box::new(CompositeFloorRule { floor: -0.5 }));
        assessor.add_rule(Box::new(ProbabilityFloorRule { minimum: 0.4 }));
        assessor.add_rule(Box::new(PositionCapRule {
            max_position: base_position * 1.5,
        }));
        assessor
    }

    pub fn add_rule(&mut self, rule: Box<dyn RiskRule>) {
        self.rules.push(rule);
    }

    /// Base position scaled by the composite adjustment, never negative
    pub fn proposed_position(&self, context: &IntelligenceContext) -> f64 {
        (self.base_position * (1.0 + context.composite_risk_adjustment)).max(0.0)
    }
}

/// Blend of quant pessimism and intelligence pessimism, in [0, 1]
fn risk_score(quant: &QuantResult, context: &IntelligenceContext) -> f64 {
    let probability = quant.probability_score.unwrap_or(0.5);
    let intelligence = 0.5 - context.composite_risk_adjustment * 0.5;
    (((1.0 - probability) + intelligence) / 2.0).clamp(0.0, 1.0)
}

#[async_trait]
impl RiskCapability for RuleBasedRiskAssessor {
    async fn assess(
        &self,
        security: &Security,
        quant: &QuantResult,
        context: &IntelligenceContext,
    ) -> CapabilityResult<RiskDecision> {
        let input = RiskInput {
            security,
            quant,
            context,
            proposed_position: self.proposed_position(context),
        };

        let issues: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let result = rule.check(&input);
                (!result.passed).then(|| format!("{}: {}", rule.name(), result.details))
            })
            .collect();

        let score = risk_score(quant, context);

        info!(
            security = %security,
            rule_count = self.rules.len(),
            failed = issues.len(),
            risk_score = score,
            "Risk rules evaluated"
        );

        if !issues.is_empty() {
            return Ok(RiskDecision::reject(issues.join("; "), score));
        }

        let mut decision = RiskDecision::approve(
            format!("All {} risk checks passed for {}", self.rules.len(), security),
            score,
        );
        decision.position_size = Some(input.proposed_position);
        Ok(decision)
    }
}

/// Rule: Intelligence must not be too bearish overall
pub struct CompositeFloorRule {
    pub floor: f64,
}

impl RiskRule for CompositeFloorRule {
    fn name(&self) -> &'static str {
        "composite_floor"
    }

    fn check(&self, input: &RiskInput<'_>) -> RiskCheckResult {
        let composite = input.context.composite_risk_adjustment;
        RiskCheckResult {
            passed: composite >= self.floor,
            details: format!("composite {:.3} vs floor {:.3}", composite, self.floor),
        }
    }
}

/// Rule: Quant success probability, when reported, must clear a minimum
pub struct ProbabilityFloorRule {
    pub minimum: f64,
}

impl RiskRule for ProbabilityFloorRule {
    fn name(&self) -> &'static str {
        "probability_floor"
    }

    fn check(&self, input: &RiskInput<'_>) -> RiskCheckResult {
        match input.quant.probability_score {
            Some(p) => RiskCheckResult {
                passed: p >= self.minimum,
                details: format!("probability {:.2} vs minimum {:.2}", p, self.minimum),
            },
            None => RiskCheckResult {
                passed: true,
                details: "no probability reported".to_string(),
            },
        }
    }
}

pub struct PositionCapRule {
    pub max_position: f64,
}

impl RiskRule for PositionCapRule {
    fn name(&self) -> &'static str {
        "position_cap"
    }

    fn check(&self, input: &RiskInput<'_>) -> RiskCheckResult {
        RiskCheckResult {
            passed: input.proposed_position <= self.max_position,
            details: format!(
                "position {:.2} vs cap {:.2}",
                input.proposed_position, self.max_position
            ),
        }
    }
}
