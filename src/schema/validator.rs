//! Validation of candidate values against a [`Setting`] definition.
//!
//! Validation is pure: it never touches store state and gives the same
//! answer for the same schema version. Bounded numbers outside their range
//! are rejected rather than clamped; values inside the range that fall off
//! the step grid are snapped to the nearest legal step.

use crate::{
    schema::{Setting, SettingKind},
    types::{SettingValue, ValueKind},
};
use thiserror::Error;

/// Why a candidate value was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectionReason {
    #[error("unknown setting key: {0}")]
    UnknownKey(String),

    #[error("{key} expects a {expected} value, got {found}")]
    WrongType {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("{value:?} is not an allowed value for {key} (allowed: {allowed:?})")]
    NotAllowed {
        key: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("{value} is outside the range [{min}, {max}] for {key}")]
    OutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{key} does not accept non-finite numbers")]
    NotFinite { key: String },

    #[error("{key} accepts at most {max} characters, got {len}")]
    TooLong { key: String, len: usize, max: usize },
}

/// Validate `candidate` for `setting`, returning the value to store.
pub fn validate_setting(setting: &Setting, candidate: SettingValue) -> Result<SettingValue, RejectionReason> {
    let expected = setting.kind.value_kind();
    if candidate.kind() != expected {
        return Err(RejectionReason::WrongType {
            key: setting.key.clone(),
            expected,
            found: candidate.kind(),
        });
    }

    match (&setting.kind, candidate) {
        (SettingKind::Boolean, value @ SettingValue::Bool(_)) => Ok(value),
        (SettingKind::Date, value @ SettingValue::Date(_)) => Ok(value),
        (SettingKind::Enumerated { allowed }, SettingValue::Text(tag)) => {
            if allowed.iter().any(|a| a == &tag) {
                Ok(SettingValue::Text(tag))
            } else {
                Err(RejectionReason::NotAllowed {
                    key: setting.key.clone(),
                    value: tag,
                    allowed: allowed.clone(),
                })
            }
        }
        (SettingKind::FreeText { max_len }, SettingValue::Text(text)) => {
            let len = text.chars().count();
            if len > *max_len {
                Err(RejectionReason::TooLong {
                    key: setting.key.clone(),
                    len,
                    max: *max_len,
                })
            } else {
                Ok(SettingValue::Text(text))
            }
        }
        (SettingKind::Bounded { min, max, step }, SettingValue::Number(n)) => {
            if !n.is_finite() {
                return Err(RejectionReason::NotFinite {
                    key: setting.key.clone(),
                });
            }
            if n < *min || n > *max {
                return Err(RejectionReason::OutOfRange {
                    key: setting.key.clone(),
                    value: n,
                    min: *min,
                    max: *max,
                });
            }
            Ok(SettingValue::Number(snap_to_step(n, *min, *max, *step)))
        }
        // Kind mismatch was handled above
        (_, other) => Err(RejectionReason::WrongType {
            key: setting.key.clone(),
            expected,
            found: other.kind(),
        }),
    }
}

/// Round `value` to the nearest `min + k * step` that stays within `[min, max]`.
fn snap_to_step(value: f64, min: f64, max: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }

    let steps = ((value - min) / step).round();
    let mut snapped = min + steps * step;
    if snapped > max {
        snapped -= step;
    }

    // Keep integral grids free of float noise
    if (snapped - snapped.round()).abs() < 1e-9 {
        snapped = snapped.round();
    }
    snapped
}
