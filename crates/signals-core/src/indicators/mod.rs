//! Closed-form indicator functions over candle sequences.

pub mod lsma;
pub mod tmo;
pub mod zscore;

pub use lsma::{smooth, smooth_last};
pub use tmo::{TmoParams, TmoValues};
pub use zscore::ZScore;
