use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineError;

/// Per-user settings persisted between restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub disabled_symbols: BTreeSet<String>,
}

/// One JSON file per user: `{dir}/{user_id}.json`.
#[derive(Debug)]
pub struct PreferencesStore {
    dir: PathBuf,
    users: BTreeMap<i64, UserPreferences>,
}

impl PreferencesStore {
    /// Load preferences for `user_ids`. Users without a file start empty.
    pub fn load(dir: impl AsRef<Path>, user_ids: &[i64]) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        let mut users = BTreeMap::new();
        for &id in user_ids {
            let path = file_path(&dir, id);
            let prefs = if path.exists() {
                let text = std::fs::read_to_string(&path).map_err(|source| EngineError::Io {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&text).map_err(|source| EngineError::Json {
                    path: path.clone(),
                    source,
                })?
            } else {
                debug!(user_id = id, "No preferences file, starting empty");
                UserPreferences::default()
            };
            users.insert(id, prefs);
        }
        Ok(Self { dir, users })
    }

    pub fn save(&self) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| EngineError::Io {
            path: self.dir.clone(),
            source,
        })?;
        for (&id, prefs) in &self.users {
            let path = file_path(&self.dir, id);
            let json = serde_json::to_string_pretty(prefs).map_err(|source| EngineError::Json {
                path: path.clone(),
                source,
            })?;
            std::fs::write(&path, json).map_err(|source| EngineError::Io { path, source })?;
        }
        info!(users = self.users.len(), "Saved user preferences");
        Ok(())
    }

    /// A symbol any user has disabled is left out of the active set.
    pub fn is_disabled(&self, symbol: &str) -> bool {
        self.users
            .values()
            .any(|prefs| prefs.disabled_symbols.contains(symbol))
    }

    /// Flip a symbol for one user. Returns whether it is now disabled.
    pub fn toggle(&mut self, user_id: i64, symbol: &str) -> bool {
        let prefs = self.users.entry(user_id).or_default();
        if prefs.disabled_symbols.remove(symbol) {
            false
        } else {
            prefs.disabled_symbols.insert(symbol.to_string());
            true
        }
    }

    pub fn get(&self, user_id: i64) -> Option<&UserPreferences> {
        self.users.get(&user_id)
    }
}

fn file_path(dir: &Path, user_id: i64) -> PathBuf {
    dir.join(format!("{user_id}.json"))
}
