use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use signals_core::candle::Candle;
use signals_core::timeframe::Timeframe;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::{MarketDataProvider, Turnover};
use crate::rate_gate::{RateGate, WeightBudget};

const BINANCE_FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

/// Binance USDⓈ-M futures public market data.
pub struct BinanceProvider {
    client: Client,
    base_url: String,
    /// Paces bulk history downloads.
    bulk_gate: RateGate,
    /// Paces single-bar refreshes.
    update_gate: RateGate,
    budget: WeightBudget,
}

impl BinanceProvider {
    /// Create with an optional base URL override.
    pub fn new(base_url: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| BINANCE_FUTURES_BASE_URL.to_string()),
            bulk_gate: RateGate::new(5, Duration::from_millis(250)),
            update_gate: RateGate::new(10, Duration::from_millis(100)),
            budget: WeightBudget::default(),
        })
    }

    /// Create from the optional `BINANCE_FUTURES_URL` environment variable.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(std::env::var("BINANCE_FUTURES_URL").ok())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        self.budget.wait_for_capacity().await;
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?;
        let response = self.check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("failed to parse {path} response: {e}")))
    }

    async fn check(&self, response: Response) -> Result<Response, ProviderError> {
        if let Some(used) = header_u64(&response, USED_WEIGHT_HEADER) {
            self.budget.observe(used as u32);
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_secs = header_u64(&response, "retry-after").unwrap_or(60);
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(retry_after_secs, "Binance rate limit exceeded, pausing requests");
            self.budget.exhaust(Duration::from_secs(retry_after_secs));
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::IM_A_TEAPOT {
            warn!(retry_after_secs, "Binance reports an IP ban");
            self.budget.exhaust(Duration::from_secs(retry_after_secs));
            return Err(ProviderError::Banned { retry_after_secs });
        }

        let status = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Api {
            status,
            message: body,
        })
    }

    async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let (start, end) = timeframe.window(Utc::now(), limit);
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.interval().to_string()),
            ("limit", limit.to_string()),
            ("startTime", start.timestamp_millis().to_string()),
            // Exclusive of the bar still forming.
            ("endTime", (end.timestamp_millis() - 1).to_string()),
        ];
        let rows: Vec<KlineRow> = self.get("/fapi/v1/klines", &query).await?;
        debug!(symbol, %timeframe, rows = rows.len(), "Fetched klines");
        rows.iter()
            .enumerate()
            .map(|(i, row)| row.to_candle(i))
            .collect()
    }
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// One kline row:
/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades,
///   takerBuyBase, takerBuyQuote, ignore]`.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct KlineRow(
    i64,
    Decimal,
    Decimal,
    Decimal,
    Decimal,
    Decimal,
    i64,
    Decimal,
    u64,
    Decimal,
    Decimal,
    serde_json::Value,
);

impl KlineRow {
    fn to_candle(&self, index: usize) -> Result<Candle, ProviderError> {
        Ok(Candle {
            index,
            open_time: millis(self.0)?,
            close_time: millis(self.6)?,
            open: to_f64(self.1, "open")?,
            high: to_f64(self.2, "high")?,
            low: to_f64(self.3, "low")?,
            close: to_f64(self.4, "close")?,
            volume: to_f64(self.5, "volume")?,
            ..Default::default()
        })
    }
}

fn millis(ms: i64) -> Result<DateTime<Utc>, ProviderError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ProviderError::Parse(format!("invalid timestamp {ms}")))
}

fn to_f64(value: Decimal, field: &str) -> Result<f64, ProviderError> {
    value
        .to_f64()
        .ok_or_else(|| ProviderError::Parse(format!("{field} {value} does not fit f64")))
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    quote_asset: String,
    #[serde(default)]
    status: String,
}

impl SymbolInfo {
    fn is_tradable(&self) -> bool {
        self.contract_type == "PERPETUAL" && self.quote_asset == "USDT" && self.status == "TRADING"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    quote_volume: Decimal,
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let candles = self
            .bulk_gate
            .run(|| self.klines(symbol, timeframe, limit))
            .await?;
        if candles.is_empty() {
            return Err(ProviderError::NoData {
                symbol: symbol.to_string(),
                interval: timeframe.interval().to_string(),
            });
        }
        Ok(candles)
    }

    async fn fetch_last_completed_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Candle, ProviderError> {
        let candles = self
            .update_gate
            .run(|| self.klines(symbol, timeframe, 1))
            .await?;
        candles.into_iter().last().ok_or_else(|| ProviderError::NoData {
            symbol: symbol.to_string(),
            interval: timeframe.interval().to_string(),
        })
    }

    async fn fetch_tradable_symbols(&self) -> Result<Vec<String>, ProviderError> {
        let info: ExchangeInfo = self
            .bulk_gate
            .run(|| self.get("/fapi/v1/exchangeInfo", &[]))
            .await?;
        Ok(info
            .symbols
            .into_iter()
            .filter(SymbolInfo::is_tradable)
            .map(|s| s.symbol)
            .collect())
    }

    async fn fetch_turnover(&self) -> Result<Vec<Turnover>, ProviderError> {
        let tickers: Vec<Ticker24h> = self
            .bulk_gate
            .run(|| self.get("/fapi/v1/ticker/24hr", &[]))
            .await?;
        Ok(tickers
            .into_iter()
            .map(|t| Turnover {
                symbol: t.symbol,
                quote_volume: t.quote_volume,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_kline_rows() {
        let json = r#"[
            [1735689600000, "94000.10", "94500.00", "93800.50", "94250.70", "1523.456",
             1735703999999, "143567890.12", 51234, "760.1", "71600000.5", "0"],
            [1735704000000, "94250.70", "94300.00", "94000.00", "94100.00", "0.000",
             1735718399999, "0", 0, "0", "0", "0"]
        ]"#;
        let rows: Vec<KlineRow> = serde_json::from_str(json).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, dec!(94000.10));

        let candle = rows[0].to_candle(0).unwrap();
        assert_eq!(candle.index, 0);
        assert_eq!(
            candle.open_time,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
        assert!((candle.close - 94250.7).abs() < 1e-9);
        assert!((candle.volume - 1523.456).abs() < 1e-9);

        let second = rows[1].to_candle(1).unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.volume, 0.0);
        assert!(second.open_time > candle.close_time);
    }

    #[test]
    fn tradable_filter() {
        let json = r#"{"symbols": [
            {"symbol": "BTCUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "TRADING"},
            {"symbol": "BTCUSDT_250328", "contractType": "CURRENT_QUARTER", "quoteAsset": "USDT", "status": "TRADING"},
            {"symbol": "ETHBTC", "contractType": "PERPETUAL", "quoteAsset": "BTC", "status": "TRADING"},
            {"symbol": "OLDUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "SETTLING"},
            {"symbol": "INDEXUSDT"}
        ]}"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        let tradable: Vec<_> = info
            .symbols
            .iter()
            .filter(|s| s.is_tradable())
            .map(|s| s.symbol.as_str())
            .collect();
        assert_eq!(tradable, ["BTCUSDT"]);
    }

    #[test]
    fn parse_ticker() {
        let json = r#"[
            {"symbol": "BTCUSDT", "priceChange": "-94.99", "lastPrice": "94100.0", "quoteVolume": "15432109876.55", "volume": "163987.1"},
            {"symbol": "ETHUSDT", "quoteVolume": "7654321.00"}
        ]"#;
        let tickers: Vec<Ticker24h> = serde_json::from_str(json).unwrap();
        assert_eq!(tickers[0].quote_volume, dec!(15432109876.55));
        assert_eq!(tickers[1].symbol, "ETHUSDT");
    }
}
