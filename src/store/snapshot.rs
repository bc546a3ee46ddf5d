use crate::{schema::Schema, types::SettingValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable view of every setting at one revision.
///
/// Mutations never edit a snapshot in place; they build the next one with
/// [`PreferenceSnapshot::with_value`] and swap it in whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSnapshot {
    revision: u64,
    values: BTreeMap<String, SettingValue>,
}

impl PreferenceSnapshot {
    /// Revision 0 snapshot holding every schema default
    pub fn from_defaults(schema: &Schema) -> Self {
        Self {
            revision: 0,
            values: schema.defaults(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(SettingValue::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(SettingValue::as_str)
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(SettingValue::as_number)
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(SettingValue::as_date)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Next snapshot with `key` set to `value`
    pub fn with_value(&self, key: &str, value: SettingValue) -> Self {
        let mut values = self.values.clone();
        values.insert(key.to_string(), value);
        Self {
            revision: self.revision + 1,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::keys;

    #[test]
    fn test_with_value_leaves_original_untouched() {
        let base = PreferenceSnapshot::from_defaults(&Schema::builtin());
        let next = base.with_value(keys::THEME, "dark".into());

        assert_eq!(base.get_str(keys::THEME), Some("system"));
        assert_eq!(next.get_str(keys::THEME), Some("dark"));
        assert_eq!(next.revision(), base.revision() + 1);
        assert_eq!(next.len(), base.len());
    }
}
