//! Effective visibility of labeled content.
//!
//! Precedence: a preference for the label from a specific labeler, then
//! the user's global preference for the label, then [`Visibility::Warn`].
//! Adult labels are hidden outright while adult content is disabled, and
//! the `!hide`/`!warn` system labels cannot be configured.

use crate::{schema::keys, store::PreferenceSnapshot, types::AccountId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ADULT_LABELS: &[&str] = &["porn", "sexual", "nudity", "graphic-media"];
pub const SYSTEM_HIDE_LABEL: &str = "!hide";
pub const SYSTEM_WARN_LABEL: &str = "!warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Show,
    #[default]
    Warn,
    Hide,
}

/// Label preferences the user has configured
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelPreferences {
    global: HashMap<String, Visibility>,
    per_labeler: HashMap<AccountId, HashMap<String, Visibility>>,
}

impl LabelPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global(&mut self, label: &str, visibility: Visibility) {
        self.global.insert(label.to_string(), visibility);
    }

    pub fn set_for_labeler(&mut self, labeler: &AccountId, label: &str, visibility: Visibility) {
        self.per_labeler
            .entry(labeler.clone())
            .or_default()
            .insert(label.to_string(), visibility);
    }

    /// Drop every preference set for `labeler`, e.g. after unsubscribing
    pub fn remove_labeler(&mut self, labeler: &AccountId) -> bool {
        self.per_labeler.remove(labeler).is_some()
    }
}

pub fn is_adult_label(label: &str) -> bool {
    ADULT_LABELS.contains(&label)
}

/// How content carrying `label` (applied by `labeler`, if known) should be
/// shown
pub fn effective_visibility(
    snapshot: &PreferenceSnapshot,
    preferences: &LabelPreferences,
    label: &str,
    labeler: Option<&AccountId>,
) -> Visibility {
    match label {
        SYSTEM_HIDE_LABEL => return Visibility::Hide,
        SYSTEM_WARN_LABEL => return Visibility::Warn,
        _ => {}
    }

    let adult_enabled = snapshot.get_bool(keys::ADULT_CONTENT).unwrap_or(false);
    if is_adult_label(label) && !adult_enabled {
        return Visibility::Hide;
    }

    labeler
        .and_then(|l| preferences.per_labeler.get(l))
        .and_then(|labels| labels.get(label))
        .or_else(|| preferences.global.get(label))
        .copied()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn labeler() -> AccountId {
        AccountId::parse("did:plc:labeler").unwrap()
    }

    fn snapshot(adult: bool) -> PreferenceSnapshot {
        PreferenceSnapshot::from_defaults(&Schema::builtin()).with_value(keys::ADULT_CONTENT, adult.into())
    }

    #[test]
    fn test_precedence() {
        let mut prefs = LabelPreferences::new();
        let prefs_snapshot = snapshot(true);
        assert_eq!(effective_visibility(&prefs_snapshot, &prefs, "spam", None), Visibility::Warn);

        prefs.set_global("spam", Visibility::Hide);
        assert_eq!(effective_visibility(&prefs_snapshot, &prefs, "spam", Some(&labeler())), Visibility::Hide);

        prefs.set_for_labeler(&labeler(), "spam", Visibility::Show);
        assert_eq!(effective_visibility(&prefs_snapshot, &prefs, "spam", Some(&labeler())), Visibility::Show);
        assert_eq!(effective_visibility(&prefs_snapshot, &prefs, "spam", None), Visibility::Hide);

        assert!(prefs.remove_labeler(&labeler()));
        assert_eq!(effective_visibility(&prefs_snapshot, &prefs, "spam", Some(&labeler())), Visibility::Hide);
    }

    #[test]
    fn test_adult_labels_follow_adult_toggle() {
        let mut prefs = LabelPreferences::new();
        prefs.set_global("nudity", Visibility::Show);

        assert_eq!(effective_visibility(&snapshot(false), &prefs, "nudity", None), Visibility::Hide);
        assert_eq!(effective_visibility(&snapshot(true), &prefs, "nudity", None), Visibility::Show);
    }

    #[test]
    fn test_system_labels_are_fixed() {
        let mut prefs = LabelPreferences::new();
        prefs.set_global(SYSTEM_HIDE_LABEL, Visibility::Show);
        prefs.set_global(SYSTEM_WARN_LABEL, Visibility::Hide);

        let snap = snapshot(true);
        assert_eq!(effective_visibility(&snap, &prefs, SYSTEM_HIDE_LABEL, None), Visibility::Hide);
        assert_eq!(effective_visibility(&snap, &prefs, SYSTEM_WARN_LABEL, None), Visibility::Warn);
    }
}
