//! Price history and the indicators derived from it
//!
//! One snapshot is taken per cycle and shared by the technical analyst and
//! the thesis and quant stages.

use crate::models::Security;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trading days in roughly one calendar month
const MONTH_BARS: usize = 21;
const SHORT_WINDOW: usize = 20;
const LONG_WINDOW: usize = 50;
const RSI_PERIOD: usize = 14;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// One daily bar of price history
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBar {
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

/// Anything that can produce a market snapshot for a security
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn snapshot(&self, security: &Security) -> Result<MarketSnapshot>;
}

/// Indicators computed from recent daily bars
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub security: Security,
    pub current_price: f64,
    pub sma_20: f64,
    pub sma_50: Option<f64>,
    pub rsi_14: Option<f64>,
    /// Annualized, in percent
    pub volatility: Option<f64>,
    /// Percent change over the last month of bars
    pub variation_1m: Option<f64>,
    pub recent_high: f64,
    pub recent_low: f64,
    pub avg_volume: f64,
    pub volume_ratio: Option<f64>,
    pub price_vs_sma20: f64,
    pub bars: usize,
}

impl MarketSnapshot {
    /// None without any bar to read a price from
    pub fn from_bars(security: Security, bars: &[PriceBar]) -> Option<Self> {
        let last = bars.last()?;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let recent = tail(bars, SHORT_WINDOW);
        let volumes: Vec<f64> = recent.iter().map(|b| b.volume).collect();

        let sma_20 = mean(tail(&closes, SHORT_WINDOW));
        let avg_volume = mean(&volumes);

        Some(Self {
            security,
            current_price: last.close,
            sma_20,
            sma_50: sma(&closes, LONG_WINDOW),
            rsi_14: rsi(&closes, RSI_PERIOD),
            volatility: annualized_volatility(tail(&closes, MONTH_BARS)),
            variation_1m: variation(tail(&closes, MONTH_BARS)),
            recent_high: recent.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            recent_low: recent.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            avg_volume,
            volume_ratio: (avg_volume > 0.0).then(|| last.volume / avg_volume),
            price_vs_sma20: (last.close / sma_20 - 1.0) * 100.0,
            bars: bars.len(),
        })
    }

    pub fn to_prompt_context(&self) -> String {
        let price = |v: Option<f64>| {
            v.map(|v| format!("${:.2}", v))
                .unwrap_or_else(|| "N/A".to_string())
        };
        let number = |v: Option<f64>, suffix: &str| {
            v.map(|v| format!("{:.2}{}", v, suffix))
                .unwrap_or_else(|| "N/A".to_string())
        };

        format!(
            "Market Data for {}:\n\
             - Current Price: ${:.2}\n\
             - SMA 20 days: ${:.2} ({:+.2}% vs price)\n\
             - SMA 50 days: {}\n\
             - RSI 14: {}\n\
             - 20-day Range: ${:.2} - ${:.2}\n\
             - Annualized Volatility: {}\n\
             - 1 Month Change: {}\n\
             - Volume vs 20-day Average: {}\n",
            self.security,
            self.current_price,
            self.sma_20,
            self.price_vs_sma20,
            price(self.sma_50),
            number(self.rsi_14, ""),
            self.recent_low,
            self.recent_high,
            number(self.volatility, "%"),
            number(self.variation_1m, "%"),
            number(self.volume_ratio, "x"),
        )
    }
}

fn tail<T>(values: &[T], n: usize) -> &[T] {
    &values[values.len().saturating_sub(n)..]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean of the last `window` closes, None with fewer bars
pub fn sma(closes: &[f64], window: usize) -> Option<f64> {
    (window > 0 && closes.len() >= window).then(|| mean(tail(closes, window)))
}

/// Simple-average RSI over the last `period` price changes
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }

    let window = tail(closes, period + 1);
    let (gains, losses) = window.windows(2).fold((0.0, 0.0), |(g, l), pair| {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            (g + delta, l)
        } else {
            (g, l - delta)
        }
    });

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    Some(100.0 - 100.0 / (1.0 + avg_gain / avg_loss))
}

/// Sample standard deviation of daily returns, annualized, in percent
pub fn annualized_volatility(closes: &[f64]) -> Option<f64> {
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|pair| pair[0] != 0.0)
        .map(|pair| pair[1] / pair[0] - 1.0)
        .collect();

    if returns.len() < 2 {
        return None;
    }

    let avg = mean(&returns);
    let variance =
        returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;

    Some(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0)
}

/// Percent change from the first to the last close
pub fn variation(closes: &[f64]) -> Option<f64> {
    match (closes.first(), closes.last()) {
        (Some(&first), Some(&last)) if closes.len() > 1 && first != 0.0 => {
            Some((last / first - 1.0) * 100.0)
        }
        _ => None,
    }
}
