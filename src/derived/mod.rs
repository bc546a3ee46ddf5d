/// Effective values computed from raw settings plus platform context.
///
/// Nothing here is stored; every function is pure over a snapshot and an
/// injected [`PlatformContext`].

pub mod appearance;
pub mod font;
pub mod moderation;

pub use appearance::*;
pub use font::*;
pub use moderation::*;

use serde::{Deserialize, Serialize};

/// Appearance the host OS currently reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemAppearance {
    #[default]
    Light,
    Dark,
}

/// Facts about the host the derived values depend on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformContext {
    pub system_appearance: SystemAppearance,
    /// OS accessibility text-size multiplier, when the user set one
    pub accessibility_text_scale: Option<f64>,
    /// Fixed factor for the platform (e.g. desktop renders text smaller)
    pub platform_multiplier: f64,
}

impl Default for PlatformContext {
    fn default() -> Self {
        Self {
            system_appearance: SystemAppearance::Light,
            accessibility_text_scale: None,
            platform_multiplier: 1.0,
        }
    }
}

impl PlatformContext {
    pub fn with_appearance(mut self, appearance: SystemAppearance) -> Self {
        self.system_appearance = appearance;
        self
    }

    pub fn with_text_scale(mut self, scale: f64) -> Self {
        self.accessibility_text_scale = Some(scale);
        self
    }

    pub fn with_platform_multiplier(mut self, multiplier: f64) -> Self {
        self.platform_multiplier = multiplier;
        self
    }
}
