//! Trading cycle aggregate and its state machine
//!
//! INITIALIZED → GATHERING_INTELLIGENCE → THESIS → QUANT → RISK_ASSESSMENT
//!   → ORDER_GENERATION → COMPLETED
//!
//! A risk rejection loops back to THESIS while retries remain, otherwise
//! ends in REJECTED. Any non-terminal state may move to FAILED.

use crate::error::{CapabilityError, OrchestrationError};
use crate::models::{
    CycleEvent, IntelligenceContext, Order, QuantResult, RiskDecision, Security, StateTransition,
    Thesis, TradingCycleState,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use TradingCycleState as State;

/// Whether `from → to` is an edge of the state machine
pub fn is_allowed(from: TradingCycleState, to: TradingCycleState) -> bool {
    if from.is_terminal() {
        return false;
    }

    matches!(
        (from, to),
        (State::Initialized, State::GatheringIntelligence)
            | (State::GatheringIntelligence, State::Thesis)
            | (State::Thesis, State::Quant)
            | (State::Quant, State::RiskAssessment)
            | (State::RiskAssessment, State::OrderGeneration)
            | (State::RiskAssessment, State::Thesis)
            | (State::RiskAssessment, State::Rejected)
            | (State::OrderGeneration, State::Completed)
            | (_, State::Failed)
    )
}

/// One security's run through the pipeline
pub struct TradingCycle {
    id: Uuid,
    security: Security,
    state: TradingCycleState,
    attempt: u32,
    max_retries: u32,
    context_history: Vec<IntelligenceContext>,
    thesis: Option<Thesis>,
    quant: Option<QuantResult>,
    last_risk_decision: Option<RiskDecision>,
    order: Option<Order>,
    transitions: Vec<StateTransition>,
    terminal_reason: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TradingCycle {
    pub fn new(security: Security, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            security,
            state: State::Initialized,
            attempt: 0,
            max_retries,
            context_history: Vec::new(),
            thesis: None,
            quant: None,
            last_risk_decision: None,
            order: None,
            transitions: Vec::new(),
            terminal_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn security(&self) -> &Security {
        &self.security
    }

    pub fn state(&self) -> TradingCycleState {
        self.state
    }

    /// Retries consumed so far, never above `max_retries`
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Context the next stage should read: the latest one built
    pub fn intelligence(&self) -> Option<&IntelligenceContext> {
        self.context_history.last()
    }

    pub fn thesis(&self) -> Option<&Thesis> {
        self.thesis.as_ref()
    }

    pub fn quant(&self) -> Option<&QuantResult> {
        self.quant.as_ref()
    }

    pub fn last_risk_decision(&self) -> Option<&RiskDecision> {
        self.last_risk_decision.as_ref()
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    fn transition_to(&mut self, to: TradingCycleState, event: CycleEvent) -> Result<()> {
        let from = self.state;

        if !is_allowed(from, to) {
            return Err(OrchestrationError::InvalidTransition(format!(
                "{} → {} for {}",
                from, to, self.security
            )));
        }

        info!(
            cycle_id = %self.id,
            security = %self.security,
            from = %from,
            to = %to,
            attempt = self.attempt + 1,
            "Cycle transition"
        );

        self.transitions.push(StateTransition {
            from,
            to,
            event,
            attempt: self.attempt,
            at: Utc::now(),
        });
        self.state = to;

        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    fn terminate(&mut self, to: TradingCycleState, event: CycleEvent, reason: String) -> Result<()> {
        self.transition_to(to, event)?;
        self.terminal_reason = Some(reason);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition_to(State::GatheringIntelligence, CycleEvent::Started)
    }

    /// Store gathered intelligence and move on to THESIS.
    ///
    /// Gathering never fails the cycle, even with an empty context.
    pub fn record_intelligence(&mut self, context: IntelligenceContext) -> Result<()> {
        let event = CycleEvent::IntelligenceGathered {
            results: context.results.len(),
            failures: context.failures.len(),
            composite_risk_adjustment: context.composite_risk_adjustment,
        };
        self.transition_to(State::Thesis, event)?;
        self.context_history.push(context);
        Ok(())
    }

    /// Keep whatever completed before a cancellation, without moving state
    pub fn record_partial_intelligence(&mut self, context: IntelligenceContext) {
        self.context_history.push(context);
    }

    pub fn record_thesis(&mut self, thesis: Thesis) -> Result<()> {
        self.transition_to(State::Quant, CycleEvent::ThesisGenerated)?;
        self.thesis = Some(thesis);
        Ok(())
    }

    pub fn record_quant(&mut self, quant: QuantResult) -> Result<()> {
        self.transition_to(State::RiskAssessment, CycleEvent::QuantCompleted)?;
        self.quant = Some(quant);
        Ok(())
    }

    /// Apply the retry policy to a risk decision.
    ///
    /// APPROVE moves to ORDER_GENERATION. REJECT moves back to THESIS with the
    /// reason appended to a fresh context while retries remain, else to REJECTED.
    pub fn record_risk_decision(&mut self, decision: RiskDecision) -> Result<()> {
        if self.state != State::RiskAssessment {
            return Err(OrchestrationError::InvalidTransition(format!(
                "risk decision received in {} for {}",
                self.state, self.security
            )));
        }

        if decision.is_approved() {
            self.transition_to(
                State::OrderGeneration,
                CycleEvent::RiskApproved {
                    risk_score: decision.risk_score,
                },
            )?;
            self.last_risk_decision = Some(decision);
            return Ok(());
        }

        let event = CycleEvent::RiskRejected {
            reason: decision.reason.clone(),
            risk_score: decision.risk_score,
        };

        if self.attempt < self.max_retries {
            let retried = self
                .intelligence()
                .map(|ctx| ctx.with_rejection(decision.reason.clone()))
                .unwrap_or_else(|| {
                    IntelligenceContext::empty(self.security.clone())
                        .with_rejection(decision.reason.clone())
                });

            self.attempt += 1;

            warn!(
                cycle_id = %self.id,
                security = %self.security,
                attempt = self.attempt + 1,
                max_retries = self.max_retries,
                reason = %decision.reason,
                "Risk rejected - retrying from thesis"
            );

            self.transition_to(State::Thesis, event)?;
            self.context_history.push(retried);
            self.last_risk_decision = Some(decision);
            return Ok(());
        }

        let reason = format!(
            "Risk rejected after {} attempt(s): {}",
            self.attempt + 1,
            decision.reason
        );
        self.terminate(State::Rejected, event, reason)?;
        self.last_risk_decision = Some(decision);
        Ok(())
    }

    pub fn record_order(&mut self, order: Order) -> Result<()> {
        let reason = format!(
            "Order generated: {:?} {} {}",
            order.side, order.quantity, order.security
        );
        self.terminate(State::Completed, CycleEvent::OrderGenerated, reason)?;
        self.order = Some(order);
        Ok(())
    }

    pub fn fail(&mut self, error: &CapabilityError) -> Result<()> {
        self.terminate(
            State::Failed,
            CycleEvent::CapabilityFailed {
                stage: error.stage,
                error: error.message.clone(),
            },
            error.to_string(),
        )
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.terminate(
            State::Failed,
            CycleEvent::Cancelled {
                reason: reason.clone(),
            },
            format!("Cancelled: {}", reason),
        )
    }

    /// Read-only view of the aggregate
    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            id: self.id,
            security: self.security.clone(),
            state: self.state,
            attempt: self.attempt,
            max_retries: self.max_retries,
            intelligence: self.intelligence().cloned(),
            context_history: self.context_history.clone(),
            thesis: self.thesis.clone(),
            quant: self.quant.clone(),
            last_risk_decision: self.last_risk_decision.clone(),
            order: self.order.clone(),
            transitions: self.transitions.clone(),
            terminal_reason: self.terminal_reason.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Serializable copy of a cycle, handed to callers once it is terminal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleSnapshot {
    pub id: Uuid,
    pub security: Security,
    pub state: TradingCycleState,
    pub attempt: u32,
    pub max_retries: u32,
    pub intelligence: Option<IntelligenceContext>,
    /// One context per attempt; later ones carry rejection feedback
    pub context_history: Vec<IntelligenceContext>,
    pub thesis: Option<Thesis>,
    pub quant: Option<QuantResult>,
    pub last_risk_decision: Option<RiskDecision>,
    pub order: Option<Order>,
    pub transitions: Vec<StateTransition>,
    pub terminal_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CycleSnapshot {
    /// How many times the cycle entered a given state
    pub fn visits(&self, state: TradingCycleState) -> usize {
        self.transitions.iter().filter(|t| t.to == state).count()
    }

    /// Every state the cycle passed through, starting at INITIALIZED
    pub fn state_path(&self) -> Vec<TradingCycleState> {
        let mut path = vec![State::Initialized];
        path.extend(self.transitions.iter().map(|t| t.to));
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderType, PipelineStage};
    use tokio_test::{assert_err, assert_ok};

    fn at_risk(max_retries: u32) -> TradingCycle {
        let mut cycle = TradingCycle::new(Security::new("NVDA"), max_retries);
        assert_ok!(cycle.start());
        assert_ok!(cycle.record_intelligence(IntelligenceContext::empty(Security::new("NVDA"))));
        assert_ok!(cycle.record_thesis(Thesis::new("t")));
        assert_ok!(cycle.record_quant(QuantResult::new("q")));
        cycle
    }

    fn back_to_risk(cycle: &mut TradingCycle) {
        cycle.record_thesis(Thesis::new("t")).unwrap();
        cycle.record_quant(QuantResult::new("q")).unwrap();
    }

    fn order() -> Order {
        Order {
            security: Security::new("NVDA"),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: 10.0,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            time_in_force: "day".to_string(),
            rationale: String::new(),
        }
    }

    #[test]
    fn test_transition_table() {
        assert!(is_allowed(State::Initialized, State::GatheringIntelligence));
        assert!(is_allowed(State::RiskAssessment, State::Thesis));
        assert!(is_allowed(State::Quant, State::Failed));
        assert!(is_allowed(State::GatheringIntelligence, State::Failed));
        assert!(!is_allowed(State::Initialized, State::Thesis));
        assert!(!is_allowed(State::Thesis, State::RiskAssessment));
        assert!(!is_allowed(State::Completed, State::Failed));
        assert!(!is_allowed(State::Rejected, State::Thesis));
        assert!(!is_allowed(State::Failed, State::Failed));
    }

    #[test]
    fn test_illegal_transition_is_error() {
        let mut cycle = TradingCycle::new(Security::new("SPY"), 1);
        let err = cycle.record_thesis(Thesis::new("early")).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition(_)));
        assert_eq!(cycle.state(), State::Initialized);
        assert!(cycle.transitions().is_empty());
    }

    #[test]
    fn test_happy_path() {
        let mut cycle = at_risk(2);
        cycle.record_risk_decision(RiskDecision::approve("ok", 0.2)).unwrap();
        cycle.record_order(order()).unwrap();

        let snapshot = cycle.snapshot();
        assert_eq!(snapshot.state, State::Completed);
        assert_eq!(
            snapshot.state_path(),
            vec![
                State::Initialized,
                State::GatheringIntelligence,
                State::Thesis,
                State::Quant,
                State::RiskAssessment,
                State::OrderGeneration,
                State::Completed
            ]
        );
        assert!(snapshot.terminal_reason.is_some());
        assert!(snapshot.finished_at.is_some());
        assert!(snapshot.order.is_some());
    }

    #[test]
    fn test_zero_retries_rejects_immediately() {
        let mut cycle = at_risk(0);
        cycle.record_risk_decision(RiskDecision::reject("too risky", 0.9)).unwrap();

        let snapshot = cycle.snapshot();
        assert_eq!(snapshot.state, State::Rejected);
        assert_eq!(snapshot.attempt, 0);
        assert_eq!(snapshot.visits(State::Thesis), 1);
        assert!(snapshot.terminal_reason.unwrap().contains("too risky"));
    }

    #[test]
    fn test_retries_bounded_by_max_retries() {
        for n in 0..4u32 {
            let mut cycle = at_risk(n);
            loop {
                cycle.record_risk_decision(RiskDecision::reject("no", 0.8)).unwrap();
                if cycle.is_terminal() {
                    break;
                }
                assert!(cycle.attempt() <= n);
                back_to_risk(&mut cycle);
            }

            let snapshot = cycle.snapshot();
            assert_eq!(snapshot.state, State::Rejected);
            assert_eq!(snapshot.attempt, n);
            assert_eq!(snapshot.visits(State::Thesis), n as usize + 1);
        }
    }

    #[test]
    fn test_rejection_builds_new_context() {
        let mut cycle = at_risk(2);
        cycle
            .record_risk_decision(RiskDecision::reject("position too large", 0.7))
            .unwrap();

        assert_eq!(cycle.state(), State::Thesis);
        assert_eq!(cycle.attempt(), 1);

        let snapshot = cycle.snapshot();
        assert_eq!(snapshot.context_history.len(), 2);
        assert!(snapshot.context_history[0].rejection_feedback.is_empty());
        assert_eq!(
            snapshot.intelligence.unwrap().rejection_feedback,
            vec!["position too large".to_string()]
        );
        assert_eq!(snapshot.transitions.last().unwrap().attempt, 1);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut cycle = at_risk(0);
        cycle.fail(&CapabilityError::new(PipelineStage::RiskAssessment, "boom")).unwrap();
        assert_eq!(cycle.state(), State::Failed);

        assert_err!(cycle.cancel("late"));
        assert_err!(cycle.record_order(order()));
        assert_eq!(cycle.transitions().len(), 5);
    }

    #[test]
    fn test_cancel_keeps_partial_intelligence() {
        let mut cycle = TradingCycle::new(Security::new("SPY"), 1);
        cycle.start().unwrap();

        let mut partial = IntelligenceContext::empty(Security::new("SPY"));
        partial.partial = true;
        cycle.record_partial_intelligence(partial);
        cycle.cancel("shutdown").unwrap();

        let snapshot = cycle.snapshot();
        assert_eq!(snapshot.state, State::Failed);
        assert!(snapshot.intelligence.unwrap().partial);
        assert_eq!(snapshot.terminal_reason.as_deref(), Some("Cancelled: shutdown"));
        assert!(matches!(
            snapshot.transitions.last().unwrap().event,
            CycleEvent::Cancelled { .. }
        ));
    }
}
