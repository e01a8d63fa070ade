use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("Insufficient data: need {needed} candle(s), have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Missing POC for candle {index} (opened {open_time})")]
    MissingPoc {
        index: usize,
        open_time: DateTime<Utc>,
    },

    #[error("Last candle mismatch: reference opened {reference}, {symbol} opened {dependent}")]
    TimestampMismatch {
        symbol: String,
        reference: DateTime<Utc>,
        dependent: DateTime<Utc>,
    },

    #[error("Empty {what} range: {start} to {end}")]
    EmptyRange {
        what: &'static str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Inverted {what} range: {start} is after {end}")]
    InvertedRange {
        what: &'static str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Index {index} out of bounds for series of {len} candle(s)")]
    OutOfBounds { index: usize, len: usize },

    #[error("Zero price at candle {index}")]
    ZeroPrice { index: usize },

    #[error("Out-of-order candle: opened {open_time}, series closed {last_close}")]
    OutOfOrder {
        open_time: DateTime<Utc>,
        last_close: DateTime<Utc>,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),
}
