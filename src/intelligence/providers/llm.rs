//! LLM-backed analyst providers
//!
//! One struct, many profiles: each profile fixes the analyst persona, the
//! keywords used to score the answer, and how strongly the score moves risk.

use super::{keyword_balance, truncate_summary};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::gemini::TextGenerator;
use crate::intelligence::IntelligenceProvider;
use crate::market::MarketSnapshot;
use crate::models::{IntelligenceResult, IntelligenceType, ProviderCategory, Security};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AnalystProfile {
    pub name: &'static str,
    pub intelligence_type: IntelligenceType,
    pub description: &'static str,
    pub persona: &'static str,
    pub instructions: &'static str,
    pub bullish: &'static [&'static str],
    pub bearish: &'static [&'static str],
    /// Multiplier from keyword score to risk impact
    pub impact_weight: f64,
    pub confidence: f64,
    /// Whether the prompt carries the price-derived indicators
    pub reads_market_data: bool,
}

pub const SENTIMENT: AnalystProfile = AnalystProfile {
    name: "sentiment",
    intelligence_type: IntelligenceType::Sentiment,
    description: "Analyzes market sentiment from social media, analysts, and trading activity",
    persona: "You are a Market Sentiment Analyst. You gauge social media sentiment, analyst \
              ratings, institutional and retail positioning, and options flow.",
    instructions: "Provide an overall sentiment score (-1 to 1), a social media summary, the \
                   analyst consensus, key sentiment drivers, and the sentiment trend.",
    bullish: &["bullish", "positive", "optimistic", "strong", "buy"],
    bearish: &["bearish", "negative", "pessimistic", "weak", "sell"],
    impact_weight: 0.3,
    confidence: 0.7,
    reads_market_data: false,
};

pub const MACRO: AnalystProfile = AnalystProfile {
    name: "macro",
    intelligence_type: IntelligenceType::Macro,
    description: "Evaluates interest rates, inflation, cycle, currency and geopolitical exposure",
    persona: "You are a Macroeconomic Analyst. You evaluate how rates, inflation, the economic \
              cycle, currencies, commodities and geopolitics affect a company.",
    instructions: "Provide an overall macro risk score (-1 to 1), key macro risks, macro \
                   tailwinds, and economic cycle positioning.",
    bullish: &["tailwind", "favorable", "supportive", "benefit", "opportunity"],
    bearish: &["risk", "threat", "headwind", "concern", "challenge", "uncertain"],
    impact_weight: 0.4,
    confidence: 0.75,
    reads_market_data: false,
};

pub const SECTOR: AnalystProfile = AnalystProfile {
    name: "sector",
    intelligence_type: IntelligenceType::Sector,
    description: "Assesses sector trends, competitive position and rotation",
    persona: "You are a Sector Analyst. You assess industry growth, competitive positioning, \
              market share, regulation, and sector rotation.",
    instructions: "Provide the sector outlook, competitive position, regulatory factors, and \
                   whether the sector is in or out of favor.",
    bullish: &["leader", "dominant", "growing", "strong", "opportunity", "favorable"],
    bearish: &["declining", "competition", "threat", "challenging", "weak", "saturated"],
    impact_weight: 0.25,
    confidence: 0.7,
    reads_market_data: false,
};

pub const TECHNICAL: AnalystProfile = AnalystProfile {
    name: "technical",
    intelligence_type: IntelligenceType::Technical,
    description: "Reads chart structure, momentum and key levels",
    persona: "You are a Technical Analyst. You read trend, momentum, volume, support and \
              resistance, and chart patterns.",
    instructions: "Provide the trend direction, momentum readings, key support and resistance \
                   levels, notable patterns, and an overall technical outlook.",
    bullish: &["bullish", "uptrend", "breakout", "support", "accumulation", "buy"],
    bearish: &["bearish", "downtrend", "breakdown", "resistance", "distribution", "sell"],
    impact_weight: 0.2,
    confidence: 0.65,
    reads_market_data: true,
};

pub const NEWS: AnalystProfile = AnalystProfile {
    name: "news",
    intelligence_type: IntelligenceType::News,
    description: "Summarizes recent news, events and catalysts",
    persona: "You are a News and Events Analyst. You track earnings announcements, product \
              launches, management changes, litigation, and other catalysts.",
    instructions: "Provide the most relevant recent events, upcoming catalysts, and whether \
                   the news flow is positive or negative for the stock.",
    bullish: &["positive", "growth", "beat", "upgrade", "partnership", "expansion"],
    bearish: &["negative", "miss", "downgrade", "lawsuit", "investigation", "decline"],
    impact_weight: 0.35,
    confidence: 0.6,
    reads_market_data: false,
};

pub const ANALYST_PROFILES: &[AnalystProfile] = &[SENTIMENT, MACRO, SECTOR, TECHNICAL, NEWS];

pub struct LlmProvider {
    profile: AnalystProfile,
    llm: Arc<dyn TextGenerator>,
}

impl LlmProvider {
    pub fn new(profile: AnalystProfile, llm: Arc<dyn TextGenerator>) -> Self {
        Self { profile, llm }
    }

    /// Snapshot the orchestrator placed under `market_data`, if this analyst reads it
    fn market_data(&self, context: Option<&Value>) -> Option<MarketSnapshot> {
        if !self.profile.reads_market_data {
            return None;
        }
        let raw = context?.get("market_data")?;
        serde_json::from_value(raw.clone()).ok()
    }

    fn build_prompt(
        &self,
        security: &Security,
        context: Option<&Value>,
        market: Option<&MarketSnapshot>,
    ) -> String {
        let mut prompt = format!(
            "Analyze {} for {}.\n\n",
            self.profile.intelligence_type, security
        );

        if self.profile.reads_market_data {
            prompt.push_str("Current Technical Data:\n");
            match market {
                Some(snapshot) => prompt.push_str(&snapshot.to_prompt_context()),
                None => prompt.push_str("No historical data available.\n"),
            }
            prompt.push('\n');
        }

        let task = context
            .and_then(|c| c.get("task"))
            .and_then(Value::as_str)
            .unwrap_or("No additional context");

        prompt.push_str(self.profile.instructions);
        prompt.push_str("\n\nContext: ");
        prompt.push_str(task);
        prompt
    }
}

#[async_trait]
impl IntelligenceProvider for LlmProvider {
    fn name(&self) -> &str {
        self.profile.name
    }

    fn intelligence_type(&self) -> IntelligenceType {
        self.profile.intelligence_type
    }

    fn category(&self) -> ProviderCategory {
        ProviderCategory::Inference
    }

    fn description(&self) -> String {
        self.profile.description.to_string()
    }

    async fn analyze(
        &self,
        security: &Security,
        context: Option<&Value>,
    ) -> Result<IntelligenceResult, ProviderError> {
        let market = self.market_data(context);
        let prompt = self.build_prompt(security, context, market.as_ref());

        let (answer, llm_confidence) = self
            .llm
            .generate(self.profile.persona, &prompt)
            .await
            .map_err(|e| ProviderError::new(self.profile.name, ProviderErrorKind::Unknown, e.to_string()))?;

        if answer.trim().is_empty() {
            return Err(ProviderError::data_unavailable(
                self.profile.name,
                "LLM returned an empty analysis",
            ));
        }

        let outlook = keyword_balance(&answer, self.profile.bullish, self.profile.bearish);

        debug!(
            provider = self.profile.name,
            security = %security,
            outlook,
            "Analyst outlook scored"
        );

        Ok(IntelligenceResult::new(
            self.profile.name,
            self.profile.intelligence_type,
            security.clone(),
            truncate_summary(&answer, 500),
            self.profile.confidence,
            outlook * self.profile.impact_weight,
        )
        .with_details(json!({
            "raw_analysis": answer,
            "outlook_score": outlook,
            "llm_confidence": llm_confidence,
            "technical_data": market,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use std::sync::Mutex;

    struct CannedLlm {
        answer: crate::Result<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for CannedLlm {
        async fn generate(&self, _system: &str, prompt: &str) -> crate::Result<(String, f32)> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.answer {
                Ok(text) => Ok((text.clone(), 0.9)),
                Err(e) => Err(OrchestrationError::LlmError(e.to_string())),
            }
        }
    }

    fn canned(answer: crate::Result<String>) -> Arc<CannedLlm> {
        Arc::new(CannedLlm {
            answer,
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_macro_scores_tailwinds_against_headwinds() {
        let llm = canned(Ok("Rates are a headwind but AI demand is a tailwind and a clear opportunity.".into()));
        let provider = LlmProvider::new(MACRO, llm.clone());

        let result = provider
            .analyze(&Security::new("NVDA"), Some(&json!({"task": "growth"})))
            .await
            .unwrap();

        // tailwind + opportunity vs headwind
        let expected = (2.0 - 1.0) / 3.0 * 0.4;
        assert!((result.risk_impact - expected).abs() < 1e-12);
        assert_eq!(result.confidence, 0.75);
        assert_eq!(result.intelligence_type, IntelligenceType::Macro);
        assert!(llm.prompts.lock().unwrap()[0].contains("growth"));
    }

    #[tokio::test]
    async fn test_llm_failure_becomes_provider_error() {
        let provider = LlmProvider::new(SENTIMENT, canned(Err(OrchestrationError::LlmError("down".into()))));
        let err = provider.analyze(&Security::new("SPY"), None).await.unwrap_err();
        assert_eq!(err.provider, "sentiment");
        assert_eq!(err.kind, ProviderErrorKind::Unknown);
    }

    #[tokio::test]
    async fn test_empty_answer_is_data_unavailable() {
        let provider = LlmProvider::new(NEWS, canned(Ok("   ".into())));
        let err = provider.analyze(&Security::new("SPY"), None).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::DataUnavailable);
    }

    #[tokio::test]
    async fn test_every_profile_scores_its_own_keywords() {
        for profile in ANALYST_PROFILES {
            let bullish = LlmProvider::new(profile.clone(), canned(Ok(profile.bullish[0].to_string())));
            let bearish = LlmProvider::new(profile.clone(), canned(Ok(profile.bearish[0].to_string())));

            let up = bullish.analyze(&Security::new("NVDA"), None).await.unwrap();
            let down = bearish.analyze(&Security::new("NVDA"), None).await.unwrap();

            assert_eq!(up.risk_impact, profile.impact_weight, "{}", profile.name);
            assert_eq!(down.risk_impact, -profile.impact_weight, "{}", profile.name);
            assert_eq!(up.confidence, profile.confidence, "{}", profile.name);
        }
    }

    #[tokio::test]
    async fn test_sector_and_news_weights() {
        let sector = LlmProvider::new(
            SECTOR,
            canned(Ok("A dominant leader, though competition is rising.".into())),
        );
        let result = sector.analyze(&Security::new("NVDA"), None).await.unwrap();
        // dominant + leader vs competition
        assert!((result.risk_impact - (1.0 / 3.0) * 0.25).abs() < 1e-12);
        assert_eq!(result.confidence, 0.7);

        let news = LlmProvider::new(
            NEWS,
            canned(Ok("Earnings beat and a new partnership; no lawsuit news.".into())),
        );
        let result = news.analyze(&Security::new("NVDA"), None).await.unwrap();
        // beat + partnership vs lawsuit
        assert!((result.risk_impact - (1.0 / 3.0) * 0.35).abs() < 1e-12);
        assert_eq!(result.confidence, 0.6);
    }

    #[tokio::test]
    async fn test_technical_prompt_carries_market_data() {
        use crate::market::PriceBar;

        let bars: Vec<PriceBar> = (1..=30)
            .map(|i| PriceBar {
                close: f64::from(i),
                high: f64::from(i) + 0.5,
                low: f64::from(i) - 0.5,
                volume: 1_000.0,
            })
            .collect();
        let snapshot = MarketSnapshot::from_bars(Security::new("NVDA"), &bars).unwrap();
        let context = json!({ "task": "swing trade", "market_data": snapshot });

        let llm = canned(Ok("Clear uptrend with a breakout above resistance.".into()));
        let technical = LlmProvider::new(TECHNICAL, llm.clone());
        let result = technical
            .analyze(&Security::new("NVDA"), Some(&context))
            .await
            .unwrap();

        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Current Technical Data:"));
        assert!(prompt.contains("Market Data for NVDA:"));
        assert!(prompt.contains("swing trade"));
        assert_eq!(result.details["technical_data"]["current_price"], json!(30.0));

        let sentiment_llm = canned(Ok("Bullish".into()));
        let sentiment = LlmProvider::new(SENTIMENT, sentiment_llm.clone());
        let result = sentiment
            .analyze(&Security::new("NVDA"), Some(&context))
            .await
            .unwrap();
        assert!(!sentiment_llm.prompts.lock().unwrap()[0].contains("Current Technical Data"));
        assert!(result.details["technical_data"].is_null());
    }

    #[tokio::test]
    async fn test_technical_without_history_says_so() {
        let llm = canned(Ok("Sideways.".into()));
        let technical = LlmProvider::new(TECHNICAL, llm.clone());
        technical.analyze(&Security::new("NEW"), None).await.unwrap();
        assert!(llm.prompts.lock().unwrap()[0].contains("No historical data available."));
    }
}
