//! Application configuration, loaded from a JSON file.
//!
//! Every field has a default, so `{}` is a valid configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;
use signals_core::timeframe::Timeframe;

use crate::error::EngineError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    /// User id → settings. Keys are Telegram user ids.
    pub users: HashMap<String, UserConfig>,
    pub engine: EngineConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Falls back to `TELEGRAM_BOT_TOKEN` when empty.
    pub bot_token: String,
    pub group_id: i64,
    pub second_group_id: i64,
    pub admin_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub is_admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reference_symbol: String,
    /// Symbols outside the top-N by 24h turnover are parked.
    pub top_n: usize,
    pub request_batch_size: usize,
    pub compute_batch_size: usize,
    pub poll_interval_secs: u64,
    pub reference_threshold: f64,
    /// IANA zone used for timestamps in messages.
    pub time_zone: String,
    pub preferences_dir: PathBuf,
    pub history: HistoryLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_symbol: "BTCUSDT".to_string(),
            top_n: 100,
            request_batch_size: 15,
            compute_batch_size: 30,
            poll_interval_secs: 3,
            reference_threshold: 7.0,
            time_zone: "UTC".to_string(),
            preferences_dir: PathBuf::from("preferences"),
            history: HistoryLimits::default(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn time_zone(&self) -> Result<Tz, EngineError> {
        self.time_zone
            .parse()
            .map_err(|_| EngineError::Config(format!("unknown time zone: {}", self.time_zone)))
    }
}

/// Bars fetched per timeframe on a full ingest.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct HistoryLimits {
    pub coarse: usize,
    pub medium: usize,
    pub fine: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            coarse: Timeframe::Coarse.default_limit(),
            medium: Timeframe::Medium.default_limit(),
            fine: Timeframe::Fine.default_limit(),
        }
    }
}

impl HistoryLimits {
    pub fn limit(&self, timeframe: Timeframe) -> usize {
        match timeframe {
            Timeframe::Coarse => self.coarse,
            Timeframe::Medium => self.medium,
            Timeframe::Fine => self.fine,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| EngineError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parsed user ids.
    pub fn user_ids(&self) -> Result<Vec<i64>, EngineError> {
        let mut ids = self
            .users
            .keys()
            .map(|id| {
                id.parse::<i64>()
                    .map_err(|_| EngineError::Config(format!("invalid user id: {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort_unstable();
        Ok(ids)
    }

    /// Explicit admin ids plus every user flagged `is_admin`.
    pub fn admin_ids(&self) -> Result<Vec<i64>, EngineError> {
        let mut ids = self.telegram.admin_ids.clone();
        for (id, user) in &self.users {
            if user.is_admin {
                ids.push(
                    id.parse()
                        .map_err(|_| EngineError::Config(format!("invalid user id: {id}")))?,
                );
            }
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_valid() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.engine.reference_symbol, "BTCUSDT");
        assert_eq!(config.engine.top_n, 100);
        assert_eq!(config.engine.request_batch_size, 15);
        assert_eq!(config.engine.compute_batch_size, 30);
        assert_eq!(config.engine.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.engine.history.limit(Timeframe::Medium), 1000);
        assert!(config.provider.base_url.is_none());
        assert_eq!(config.engine.time_zone().unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "telegram": {
                "bot_token": "123:abc",
                "group_id": -1001,
                "second_group_id": -1002,
                "admin_ids": [7]
            },
            "users": {
                "42": {"is_admin": true},
                "43": {}
            },
            "engine": {
                "top_n": 50,
                "time_zone": "Europe/Kyiv",
                "history": {"medium": 600}
            },
            "provider": {"base_url": "http://localhost:9000"}
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.telegram.group_id, -1001);
        assert_eq!(config.engine.top_n, 50);
        assert_eq!(config.engine.history.medium, 600);
        assert_eq!(config.engine.history.coarse, 500);
        assert_eq!(config.engine.time_zone().unwrap(), chrono_tz::Europe::Kyiv);
        assert_eq!(config.user_ids().unwrap(), vec![42, 43]);
        assert_eq!(config.admin_ids().unwrap(), vec![7, 42]);
        assert_eq!(
            config.provider.base_url.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn bad_time_zone_is_a_config_error() {
        let config = AppConfig::from_json(r#"{"engine": {"time_zone": "Mars/Olympus"}}"#).unwrap();
        assert!(matches!(
            config.engine.time_zone(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
