pub mod candle;
pub mod correlation;
pub mod error;
pub mod impulse;
pub mod indicators;
pub mod ladder;
pub mod liquidation;
pub mod series;
pub mod timeframe;
pub mod volume_profile;

/// Absolute percentage change from `from` to `to`.
pub fn abs_percentage_change(from: f64, to: f64) -> f64 {
    percentage_change(from, to).abs()
}

/// Signed percentage change from `from` to `to`.
pub fn percentage_change(from: f64, to: f64) -> f64 {
    (to - from) / from * 100.0
}

/// Number of significant decimals in a price, capped at 7.
pub fn price_precision(price: f64) -> usize {
    let text = format!("{price}");
    match text.split_once('.') {
        Some((_, fraction)) => fraction.trim_end_matches('0').len().min(7),
        None => 0,
    }
}
