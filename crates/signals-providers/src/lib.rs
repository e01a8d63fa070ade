pub mod binance;
pub mod error;
pub mod notifier;
pub mod provider;
pub mod rate_gate;
pub mod telegram;

pub use error::{NotifyError, ProviderError};
pub use notifier::{LogNotifier, Notifier, Target};
pub use provider::{MarketDataProvider, Turnover};
pub use telegram::{TelegramChats, TelegramNotifier};
