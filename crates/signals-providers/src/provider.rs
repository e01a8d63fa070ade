use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use signals_core::candle::Candle;
use signals_core::timeframe::Timeframe;
use tracing::warn;

use crate::error::ProviderError;

/// Rolling 24h quote-asset turnover of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Turnover {
    pub symbol: String,
    pub quote_volume: Decimal,
}

/// Source of candle history and market-wide listings.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name (for logging/display).
    fn name(&self) -> &str;

    /// The last `limit` completed bars, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError>;

    /// The single most recently completed bar. One attempt; see
    /// [`fetch_last_completed_with_retry`].
    async fn fetch_last_completed_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Candle, ProviderError>;

    /// Symbols currently open for trading.
    async fn fetch_tradable_symbols(&self) -> Result<Vec<String>, ProviderError>;

    /// 24h turnover of every listed symbol.
    async fn fetch_turnover(&self) -> Result<Vec<Turnover>, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds, retrying transient failures up to `policy.attempts`
/// times. Between attempts waits the policy backoff, or the server's requested
/// delay when a rate-limit or ban rejection asks for longer.
pub async fn with_retry<T, F, Fut>(
    provider: &str,
    symbol: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut errors = Vec::new();
    let mut rejected = false;
    for attempt in 1..=policy.attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(provider, symbol, attempt, error = %e, "Request failed");
                errors.push(format!("attempt {attempt}: {e}"));
                rejected = e.is_rejection();
                if attempt < policy.attempts {
                    let wait = e
                        .retry_after()
                        .map_or(policy.backoff, |after| after.max(policy.backoff));
                    tokio::time::sleep(wait).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(ProviderError::RetriesExhausted {
        attempts: policy.attempts,
        errors,
        rejected,
    })
}

/// Fetch the last completed bar with [`with_retry`].
pub async fn fetch_last_completed_with_retry(
    provider: &dyn MarketDataProvider,
    symbol: &str,
    timeframe: Timeframe,
    policy: RetryPolicy,
) -> Result<Candle, ProviderError> {
    with_retry(provider.name(), symbol, policy, move || {
        provider.fetch_last_completed_candle(symbol, timeframe)
    })
    .await
}
