/// Setting schema: every recognized preference, its type, legal values,
/// default, and sync scope.

pub mod defaults;
pub mod validator;

pub use defaults::*;
pub use validator::*;

use crate::{
    error::{Error, Result},
    types::{SettingValue, ValueKind},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Whether a setting stays on this device or follows the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Device-local; survives account switches, never sent to the server
    LocalOnly,
    /// Per-account; pushed to and pulled from the remote preferences service
    Synced,
}

/// Value domain of a setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    Boolean,
    /// Ordered set of legal tags
    Enumerated { allowed: Vec<String> },
    /// Inclusive range with a step grid anchored at `min`
    Bounded { min: f64, max: f64, step: f64 },
    FreeText { max_len: usize },
    Date,
}

impl SettingKind {
    pub fn value_kind(&self) -> ValueKind {
        match self {
            SettingKind::Boolean => ValueKind::Bool,
            SettingKind::Enumerated { .. } | SettingKind::FreeText { .. } => ValueKind::Text,
            SettingKind::Bounded { .. } => ValueKind::Number,
            SettingKind::Date => ValueKind::Date,
        }
    }
}

/// A named, typed preference definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub kind: SettingKind,
    pub default: SettingValue,
    pub scope: Scope,
}

impl Setting {
    pub fn boolean(key: &str, default: bool, scope: Scope) -> Self {
        Self {
            key: key.to_string(),
            kind: SettingKind::Boolean,
            default: SettingValue::Bool(default),
            scope,
        }
    }

    pub fn enumerated(key: &str, allowed: &[&str], default: &str, scope: Scope) -> Self {
        Self {
            key: key.to_string(),
            kind: SettingKind::Enumerated {
                allowed: allowed.iter().map(|a| a.to_string()).collect(),
            },
            default: SettingValue::Text(default.to_string()),
            scope,
        }
    }

    pub fn bounded(key: &str, min: f64, max: f64, step: f64, default: f64, scope: Scope) -> Self {
        Self {
            key: key.to_string(),
            kind: SettingKind::Bounded { min, max, step },
            default: SettingValue::Number(default),
            scope,
        }
    }

    pub fn free_text(key: &str, max_len: usize, default: &str, scope: Scope) -> Self {
        Self {
            key: key.to_string(),
            kind: SettingKind::FreeText { max_len },
            default: SettingValue::Text(default.to_string()),
            scope,
        }
    }

    pub fn date(key: &str, default: DateTime<Utc>, scope: Scope) -> Self {
        Self {
            key: key.to_string(),
            kind: SettingKind::Date,
            default: SettingValue::Date(default),
            scope,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.scope == Scope::Synced
    }
}

/// The full set of recognized settings, in declaration order
#[derive(Debug, Clone)]
pub struct Schema {
    version: u32,
    settings: Vec<Setting>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema, checking that keys are unique and every default
    /// passes its own validator.
    pub fn new(version: u32, settings: Vec<Setting>) -> Result<Self> {
        let mut index = HashMap::with_capacity(settings.len());

        for (pos, setting) in settings.iter().enumerate() {
            if index.insert(setting.key.clone(), pos).is_some() {
                return Err(Error::Config(format!("Duplicate setting key: {}", setting.key)));
            }

            if let SettingKind::Bounded { min, max, step } = setting.kind {
                if !(min <= max) || step < 0.0 {
                    return Err(Error::Config(format!("Invalid range for {}", setting.key)));
                }
            }

            let checked = validate_setting(setting, setting.default.clone())
                .map_err(|reason| Error::Config(format!("Invalid default: {}", reason)))?;
            if checked != setting.default {
                return Err(Error::Config(format!(
                    "Default for {} is not on its step grid",
                    setting.key
                )));
            }
        }

        Ok(Self {
            version,
            settings,
            index,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&Setting> {
        self.index.get(key).map(|&pos| &self.settings[pos])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn settings(&self) -> impl Iterator<Item = &Setting> {
        self.settings.iter()
    }

    /// Settings in `scope`, or all settings when `scope` is `None`
    pub fn settings_in(&self, scope: Option<Scope>) -> impl Iterator<Item = &Setting> {
        self.settings
            .iter()
            .filter(move |s| scope.map_or(true, |wanted| s.scope == wanted))
    }

    pub fn scope_of(&self, key: &str) -> Option<Scope> {
        self.get(key).map(|s| s.scope)
    }

    /// Default value for every key
    pub fn defaults(&self) -> BTreeMap<String, SettingValue> {
        self.settings
            .iter()
            .map(|s| (s.key.clone(), s.default.clone()))
            .collect()
    }

    /// Validate a candidate value for `key`
    pub fn validate(&self, key: &str, candidate: SettingValue) -> std::result::Result<SettingValue, RejectionReason> {
        let setting = self
            .get(key)
            .ok_or_else(|| RejectionReason::UnknownKey(key.to_string()))?;
        validate_setting(setting, candidate)
    }
}
