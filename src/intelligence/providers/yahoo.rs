//! Yahoo Finance data providers (no auth required)

use super::keyword_balance;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::intelligence::IntelligenceProvider;
use crate::market::{MarketDataSource, MarketSnapshot, PriceBar};
use crate::models::{IntelligenceResult, IntelligenceType, ProviderCategory, Security};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const QUOTE_SUMMARY_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";
const SEARCH_URL: &str = "https://query1.finance.yahoo.com/v1/finance/search";
const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Source name used when price history is missing
const MARKET_DATA: &str = "market_data";

/// Funds scored on fund metrics rather than company fundamentals
const KNOWN_ETFS: &[&str] = &[
    "SPY", "QQQ", "IWM", "DIA", "VTI", "VOO", "VEA", "VWO", "EEM", "EFA", "GLD", "SLV", "USO",
    "UNG", "TLT", "IEF", "SHY", "LQD", "HYG", "JNK", "XLF", "XLK", "XLE", "XLV", "XLI", "XLY",
    "XLP", "XLU", "XLB", "XLRE", "VNQ", "ARKK", "ARKG", "ARKW", "ARKF", "SOXL", "TQQQ", "SQQQ",
    "UPRO", "SPXL", "SPXS", "VGT", "VHT", "VFH", "VDE", "VCR", "VDC", "VIS", "VAW",
];

const QUOTE_MODULES: &str =
    "financialData,summaryDetail,defaultKeyStatistics,fundProfile,quoteType";

const POSITIVE_HEADLINE_WORDS: &[&str] = &[
    "surge", "soar", "jump", "gain", "rise", "beat", "exceed", "record", "upgrade", "buy",
    "bullish", "growth", "profit", "success", "breakthrough", "innovation", "strong", "positive",
    "outperform", "rally", "boom", "high",
];

const NEGATIVE_HEADLINE_WORDS: &[&str] = &[
    "fall", "drop", "decline", "plunge", "crash", "miss", "cut", "downgrade", "sell", "bearish",
    "loss", "fail", "concern", "warning", "weak", "negative", "underperform", "slump", "trouble",
    "risk", "lawsuit", "investigation", "low",
];

pub fn is_known_etf(security: &Security) -> bool {
    KNOWN_ETFS.contains(&security.as_str())
}

/// Thin Yahoo Finance HTTP client shared by the data providers
#[derive(Clone)]
pub struct YahooFinanceClient {
    client: reqwest::Client,
}

impl YahooFinanceClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                     AppleWebKit/537.36 (KHTML, like Gecko) \
                     Chrome/120.0.0.0 Safari/537.36",
                )
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        provider: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::new(provider, ProviderErrorKind::Unknown, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(provider, status));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::data_unavailable(provider, format!("unreadable response: {}", e)))
    }
}

impl YahooFinanceClient {
    /// Daily bars over `range` (e.g. "3mo"), oldest first
    pub async fn price_history(&self, security: &Security, range: &str) -> crate::Result<Vec<PriceBar>> {
        let url = format!("{}/{}", CHART_URL, security);

        let response: ChartResponse = self
            .client
            .get(&url)
            .query(&[("range", range), ("interval", "1d")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let chart = response
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| ProviderError::data_unavailable(MARKET_DATA, format!("no chart for {}", security)))?;

        Ok(chart.bars())
    }
}

#[async_trait]
impl MarketDataSource for YahooFinanceClient {
    async fn snapshot(&self, security: &Security) -> crate::Result<MarketSnapshot> {
        let bars = self.price_history(security, "3mo").await?;

        debug!(security = %security, bars = bars.len(), "Price history fetched");

        MarketSnapshot::from_bars(security.clone(), &bars).ok_or_else(|| {
            ProviderError::data_unavailable(MARKET_DATA, format!("no price history for {}", security)).into()
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartResult {
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

/// Parallel columns; Yahoo leaves nulls for halted sessions
#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResult {
    /// Bars without a close are dropped
    fn bars(&self) -> Vec<PriceBar> {
        let Some(quote) = self.indicators.quote.first() else {
            return Vec::new();
        };
        let at = |column: &[Option<f64>], i: usize| column.get(i).copied().flatten();

        quote
            .close
            .iter()
            .enumerate()
            .filter_map(|(i, close)| {
                let close = (*close)?;
                Some(PriceBar {
                    close,
                    high: at(&quote.high, i).unwrap_or(close),
                    low: at(&quote.low, i).unwrap_or(close),
                    volume: at(&quote.volume, i).unwrap_or(0.0),
                })
            })
            .collect()
    }
}

impl Default for YahooFinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResponse {
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    result: Option<Vec<QuoteModules>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteModules {
    #[serde(default)]
    financial_data: FinancialData,
    #[serde(default)]
    summary_detail: SummaryDetail,
    #[serde(default)]
    default_key_statistics: KeyStatistics,
    #[serde(default)]
    fund_profile: FundProfile,
    #[serde(default)]
    quote_type: QuoteTypeModule,
}

impl QuoteModules {
    fn is_fund(&self, security: &Security) -> bool {
        is_known_etf(security)
            || self
                .quote_type
                .quote_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("ETF"))
            || self.fund_profile.family.is_some()
    }

    fn fundamentals(&self) -> Fundamentals {
        Fundamentals {
            earnings_growth: raw(&self.financial_data.earnings_growth),
            revenue_growth: raw(&self.financial_data.revenue_growth),
            profit_margins: raw(&self.financial_data.profit_margins),
            trailing_pe: raw(&self.summary_detail.trailing_pe),
        }
    }

    fn fund_metrics(&self) -> FundMetrics {
        FundMetrics {
            beta: raw(&self.default_key_statistics.beta_3_year),
            expense_ratio: raw(&self.fund_profile.fees_expenses_investment.annual_report_expense_ratio),
            total_assets: raw(&self.default_key_statistics.total_assets)
                .or_else(|| raw(&self.summary_detail.total_assets)),
            ytd_return: raw(&self.default_key_statistics.ytd_return)
                .or_else(|| raw(&self.summary_detail.ytd_return)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialData {
    earnings_growth: Option<RawValue>,
    revenue_growth: Option<RawValue>,
    profit_margins: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDetail {
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<RawValue>,
    total_assets: Option<RawValue>,
    ytd_return: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatistics {
    #[serde(rename = "beta3Year")]
    beta_3_year: Option<RawValue>,
    total_assets: Option<RawValue>,
    ytd_return: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundProfile {
    family: Option<String>,
    category_name: Option<String>,
    #[serde(default)]
    fees_expenses_investment: FundFees,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundFees {
    annual_report_expense_ratio: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteTypeModule {
    quote_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}

fn raw(value: &Option<RawValue>) -> Option<f64> {
    value.as_ref().and_then(|v| v.raw).filter(|v| v.is_finite())
}

/// Fundamentals that feed the earnings score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fundamentals {
    pub earnings_growth: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub profit_margins: Option<f64>,
    pub trailing_pe: Option<f64>,
}

impl Fundamentals {
    /// Mean of the per-factor scores that are available, in [-1, 1].
    ///
    /// None when no scored factor is present.
    pub fn risk_impact(&self) -> Option<f64> {
        let mut factors = Vec::new();

        if let Some(growth) = self.earnings_growth {
            factors.push(if growth > 0.2 {
                0.3
            } else if growth > 0.0 {
                0.1
            } else if growth > -0.1 {
                -0.1
            } else {
                -0.3
            });
        }

        if let Some(margin) = self.profit_margins {
            factors.push(if margin > 0.2 {
                0.2
            } else if margin > 0.1 {
                0.1
            } else if margin > 0.0 {
                0.0
            } else {
                -0.2
            });
        }

        // A present P/E always counts, even when it scores neutral
        if let Some(pe) = self.trailing_pe {
            factors.push(if pe > 10.0 && pe < 30.0 {
                0.1
            } else if pe > 100.0 {
                -0.2
            } else {
                0.0
            });
        }

        if factors.is_empty() {
            return None;
        }

        let mean = factors.iter().sum::<f64>() / factors.len() as f64;
        Some(mean.clamp(-1.0, 1.0))
    }

    fn summary(&self, security: &Security) -> String {
        let pct = |v: Option<f64>| {
            v.map(|v| format!("{:.1}%", v * 100.0))
                .unwrap_or_else(|| "n/a".to_string())
        };
        let pe = self
            .trailing_pe
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "n/a".to_string());

        format!(
            "{} fundamentals: earnings growth {}, revenue growth {}, profit margin {}, trailing P/E {}",
            security,
            pct(self.earnings_growth),
            pct(self.revenue_growth),
            pct(self.profit_margins),
            pe
        )
    }
}

/// Fund-level metrics that feed the ETF score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FundMetrics {
    pub beta: Option<f64>,
    pub expense_ratio: Option<f64>,
    pub total_assets: Option<f64>,
    pub ytd_return: Option<f64>,
}

impl FundMetrics {
    /// Mean over the metrics present, in [-1, 1]. Low beta, low fees, large
    /// funds and a strong year lower the risk.
    pub fn risk_impact(&self) -> Option<f64> {
        let mut factors = Vec::new();

        if let Some(beta) = self.beta {
            factors.push(if beta < 0.8 {
                0.2
            } else if beta < 1.2 {
                0.1
            } else {
                -0.1
            });
        }

        if let Some(expense) = self.expense_ratio {
            factors.push(if expense < 0.002 {
                0.1
            } else if expense > 0.01 {
                -0.1
            } else {
                0.0
            });
        }

        if let Some(assets) = self.total_assets {
            factors.push(if assets > 10e9 {
                0.1
            } else if assets < 100e6 {
                -0.1
            } else {
                0.0
            });
        }

        if let Some(ytd) = self.ytd_return {
            factors.push(if ytd > 0.1 {
                0.1
            } else if ytd < -0.1 {
                -0.1
            } else {
                0.0
            });
        }

        if factors.is_empty() {
            return None;
        }

        let mean = factors.iter().sum::<f64>() / factors.len() as f64;
        Some(mean.clamp(-1.0, 1.0))
    }

    fn summary(&self, security: &Security, family: Option<&str>, category: Option<&str>) -> String {
        let pct = |v: Option<f64>, digits: usize| {
            v.map(|v| format!("{:.*}%", digits, v * 100.0))
                .unwrap_or_else(|| "n/a".to_string())
        };
        let assets = self
            .total_assets
            .map(|v| format!("${:.2}B", v / 1e9))
            .unwrap_or_else(|| "n/a".to_string());
        let beta = self
            .beta
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "n/a".to_string());

        format!(
            "{} fund ({}, {}): total assets {}, expense ratio {}, 3y beta {}, YTD return {}",
            security,
            family.unwrap_or("n/a"),
            category.unwrap_or("n/a"),
            assets,
            pct(self.expense_ratio, 2),
            beta,
            pct(self.ytd_return, 1)
        )
    }
}

/// Company fundamentals from the quote summary endpoint
pub struct EarningsProvider {
    yahoo: YahooFinanceClient,
}

impl EarningsProvider {
    pub fn new(yahoo: YahooFinanceClient) -> Self {
        Self { yahoo }
    }
}

#[async_trait]
impl IntelligenceProvider for EarningsProvider {
    fn name(&self) -> &str {
        "earnings"
    }

    fn intelligence_type(&self) -> IntelligenceType {
        IntelligenceType::Earnings
    }

    fn category(&self) -> ProviderCategory {
        ProviderCategory::Data
    }

    fn description(&self) -> String {
        "Earnings, margins and valuation for stocks; fund metrics for ETFs".to_string()
    }

    async fn analyze(
        &self,
        security: &Security,
        _context: Option<&Value>,
    ) -> Result<IntelligenceResult, ProviderError> {
        let url = format!("{}/{}", QUOTE_SUMMARY_URL, security);
        let response: QuoteSummaryResponse = self
            .yahoo
            .get_json(self.name(), &url, &[("modules", QUOTE_MODULES.to_string())])
            .await?;

        let modules = response
            .quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| ProviderError::data_unavailable(self.name(), format!("no quote summary for {}", security)))?;

        if modules.is_fund(security) {
            return self.score_fund(security, &modules);
        }

        let fundamentals = modules.fundamentals();

        let risk_impact = fundamentals.risk_impact().ok_or_else(|| {
            ProviderError::data_unavailable(self.name(), format!("no fundamentals for {}", security))
        })?;

        debug!(security = %security, risk_impact, "Fundamentals scored");

        Ok(IntelligenceResult::new(
            self.name(),
            IntelligenceType::Earnings,
            security.clone(),
            fundamentals.summary(security),
            0.85,
            risk_impact,
        )
        .with_details(json!({
            "is_etf": false,
            "earnings_growth": fundamentals.earnings_growth,
            "revenue_growth": fundamentals.revenue_growth,
            "profit_margins": fundamentals.profit_margins,
            "trailing_pe": fundamentals.trailing_pe,
        })))
    }
}

impl EarningsProvider {
    fn score_fund(
        &self,
        security: &Security,
        modules: &QuoteModules,
    ) -> Result<IntelligenceResult, ProviderError> {
        let metrics = modules.fund_metrics();
        let family = modules.fund_profile.family.as_deref();
        let category = modules.fund_profile.category_name.as_deref();

        let risk_impact = metrics.risk_impact().ok_or_else(|| {
            ProviderError::data_unavailable(self.name(), format!("no fund metrics for {}", security))
        })?;

        debug!(security = %security, risk_impact, "Fund metrics scored");

        Ok(IntelligenceResult::new(
            self.name(),
            IntelligenceType::Earnings,
            security.clone(),
            metrics.summary(security, family, category),
            0.85,
            risk_impact,
        )
        .with_details(json!({
            "is_etf": true,
            "fund_family": family,
            "category": category,
            "beta": metrics.beta,
            "expense_ratio": metrics.expense_ratio,
            "total_assets": metrics.total_assets,
            "ytd_return": metrics.ytd_return,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    title: String,
    #[serde(default)]
    publisher: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadlineTally {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl HeadlineTally {
    /// (positive - negative) / total, zero without headlines
    pub fn score(&self) -> f64 {
        let total = self.positive + self.negative + self.neutral;
        if total == 0 {
            return 0.0;
        }
        (self.positive as f64 - self.negative as f64) / total as f64
    }
}

/// Classify each headline by its keyword balance
pub fn tally_headlines<S: AsRef<str>>(headlines: &[S]) -> HeadlineTally {
    let mut tally = HeadlineTally {
        positive: 0,
        negative: 0,
        neutral: 0,
    };

    for headline in headlines {
        let balance = keyword_balance(headline.as_ref(), POSITIVE_HEADLINE_WORDS, NEGATIVE_HEADLINE_WORDS);
        if balance > 0.0 {
            tally.positive += 1;
        } else if balance < 0.0 {
            tally.negative += 1;
        } else {
            tally.neutral += 1;
        }
    }

    tally
}

/// Headline sentiment from the Yahoo Finance news search
pub struct NewsScraperProvider {
    yahoo: YahooFinanceClient,
    max_headlines: usize,
}

impl NewsScraperProvider {
    pub fn new(yahoo: YahooFinanceClient, max_headlines: usize) -> Self {
        Self {
            yahoo,
            max_headlines,
        }
    }
}

#[async_trait]
impl IntelligenceProvider for NewsScraperProvider {
    fn name(&self) -> &str {
        "news_scraper"
    }

    fn intelligence_type(&self) -> IntelligenceType {
        IntelligenceType::News
    }

    fn category(&self) -> ProviderCategory {
        ProviderCategory::Data
    }

    fn description(&self) -> String {
        "Recent headline sentiment from Yahoo Finance news".to_string()
    }

    async fn analyze(
        &self,
        security: &Security,
        _context: Option<&Value>,
    ) -> Result<IntelligenceResult, ProviderError> {
        let response: SearchResponse = self
            .yahoo
            .get_json(
                self.name(),
                SEARCH_URL,
                &[
                    ("q", security.to_string()),
                    ("quotesCount", "0".to_string()),
                    ("newsCount", self.max_headlines.to_string()),
                ],
            )
            .await?;

        let headlines: Vec<&NewsItem> = response.news.iter().take(self.max_headlines).collect();

        if headlines.is_empty() {
            return Ok(IntelligenceResult::new(
                self.name(),
                IntelligenceType::News,
                security.clone(),
                format!("No recent news found for {}", security),
                0.75,
                0.0,
            ));
        }

        let titles: Vec<&str> = headlines.iter().map(|n| n.title.as_str()).collect();
        let tally = tally_headlines(&titles);
        let score = tally.score();

        debug!(
            security = %security,
            headlines = titles.len(),
            score,
            "Headlines scored"
        );

        let top: Vec<String> = headlines
            .iter()
            .take(3)
            .map(|n| match &n.publisher {
                Some(publisher) => format!("- {} ({})", n.title, publisher),
                None => format!("- {}", n.title),
            })
            .collect();

        let summary = format!(
            "{} recent headlines for {}: {} positive, {} negative, {} neutral.\n{}",
            titles.len(),
            security,
            tally.positive,
            tally.negative,
            tally.neutral,
            top.join("\n")
        );

        Ok(IntelligenceResult::new(
            self.name(),
            IntelligenceType::News,
            security.clone(),
            summary,
            0.75,
            score * 0.35,
        )
        .with_details(json!({
            "headlines": titles,
            "sentiment_score": score,
            "positive": tally.positive,
            "negative": tally.negative,
            "neutral": tally.neutral,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fundamentals_scoring() {
        let strong = Fundamentals {
            earnings_growth: Some(0.5),
            revenue_growth: Some(0.3),
            profit_margins: Some(0.25),
            trailing_pe: Some(25.0),
        };
        assert!((strong.risk_impact().unwrap() - 0.2).abs() < 1e-12);

        let weak = Fundamentals {
            earnings_growth: Some(-0.4),
            revenue_growth: None,
            profit_margins: Some(-0.05),
            trailing_pe: Some(150.0),
        };
        let expected = (-0.3 - 0.2 - 0.2) / 3.0;
        assert!((weak.risk_impact().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_fundamentals_neutral_pe_dilutes_score() {
        let f = Fundamentals {
            earnings_growth: Some(0.1),
            trailing_pe: Some(50.0),
            ..Default::default()
        };
        assert!((f.risk_impact().unwrap() - 0.05).abs() < 1e-12);

        let cheap = Fundamentals {
            trailing_pe: Some(8.0),
            ..Default::default()
        };
        assert_eq!(cheap.risk_impact(), Some(0.0));
        assert_eq!(Fundamentals::default().risk_impact(), None);
    }

    #[test]
    fn test_quote_summary_parsing() {
        let body = r#"{"quoteSummary":{"result":[{
            "financialData":{"earningsGrowth":{"raw":0.25,"fmt":"25%"},"profitMargins":{"raw":0.15}},
            "summaryDetail":{"trailingPE":{"raw":40.2}}
        }],"error":null}}"#;

        let parsed: QuoteSummaryResponse = serde_json::from_str(body).unwrap();
        let result = parsed.quote_summary.result.unwrap();
        let modules = &result[0];
        assert_eq!(raw(&modules.financial_data.earnings_growth), Some(0.25));
        assert_eq!(raw(&modules.financial_data.revenue_growth), None);
        assert_eq!(raw(&modules.summary_detail.trailing_pe), Some(40.2));
    }

    #[test]
    fn test_chart_parsing_skips_missing_closes() {
        let body = r#"{"chart":{"result":[{
            "meta":{"symbol":"NVDA"},
            "timestamp":[1,2,3],
            "indicators":{"quote":[{
                "close":[100.0,null,102.5],
                "high":[101.0,null,null],
                "low":[99.0,null,101.0],
                "volume":[1000,null,1500]
            }]}
        }],"error":null}}"#;

        let parsed: ChartResponse = serde_json::from_str(body).unwrap();
        let chart = parsed.chart.result.unwrap().into_iter().next().unwrap();
        let bars = chart.bars();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].high, 101.0);
        assert_eq!(bars[1].close, 102.5);
        assert_eq!(bars[1].high, 102.5);
        assert_eq!(bars[1].volume, 1500.0);
        assert!(ChartResult::default().bars().is_empty());
    }

    #[test]
    fn test_headline_tally() {
        let tally = tally_headlines(&[
            "Nvidia shares surge after record quarter",
            "Chipmaker faces lawsuit over export rules",
            "Nvidia to present at conference",
            "Analysts upgrade Nvidia on strong demand",
        ]);
        assert_eq!(tally.positive, 2);
        assert_eq!(tally.negative, 1);
        assert_eq!(tally.neutral, 1);
        assert!((tally.score() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_fund_metrics_scoring() {
        // SPY-like: low beta band, cheap, huge, strong year
        let broad = FundMetrics {
            beta: Some(1.0),
            expense_ratio: Some(0.000945),
            total_assets: Some(500e9),
            ytd_return: Some(0.15),
        };
        assert!((broad.risk_impact().unwrap() - 0.1).abs() < 1e-12);

        let niche = FundMetrics {
            beta: Some(1.6),
            expense_ratio: Some(0.0095),
            total_assets: Some(50e6),
            ytd_return: Some(-0.2),
        };
        let expected = (-0.1 + 0.0 - 0.1 - 0.1) / 4.0;
        assert!((niche.risk_impact().unwrap() - expected).abs() < 1e-12);
        assert_eq!(FundMetrics::default().risk_impact(), None);
    }

    #[test]
    fn test_etf_quote_summary_scored_as_fund() {
        let body = r#"{"quoteSummary":{"result":[{
            "summaryDetail":{"totalAssets":{"raw":20000000000.0},"ytdReturn":{"raw":0.02}},
            "defaultKeyStatistics":{"beta3Year":{"raw":0.7}},
            "fundProfile":{"family":"Vanguard","categoryName":"Long Government",
                "feesExpensesInvestment":{"annualReportExpenseRatio":{"raw":0.0004}}},
            "quoteType":{"quoteType":"ETF"}
        }]}}"#;

        let parsed: QuoteSummaryResponse = serde_json::from_str(body).unwrap();
        let modules = parsed.quote_summary.result.unwrap().into_iter().next().unwrap();

        assert!(modules.is_fund(&Security::new("VGLT")));
        let metrics = modules.fund_metrics();
        assert_eq!(metrics.total_assets, Some(20e9));
        assert_eq!(metrics.ytd_return, Some(0.02));

        let provider = EarningsProvider::new(YahooFinanceClient::new());
        assert!(provider.supports(&Security::new("SPY")));

        let result = provider.score_fund(&Security::new("VGLT"), &modules).unwrap();
        // beta 0.2, fees 0.1, assets 0.1, ytd 0.0
        assert!((result.risk_impact - 0.1).abs() < 1e-12);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.details["is_etf"], json!(true));
        assert!(result.summary.contains("Vanguard"));
    }

    #[test]
    fn test_known_etf_without_fund_modules_is_still_a_fund() {
        let modules = QuoteModules::default();
        assert!(modules.is_fund(&Security::new("spy")));
        assert!(!modules.is_fund(&Security::new("NVDA")));
    }
}
