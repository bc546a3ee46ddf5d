use crate::{
    derived::{PlatformContext, SystemAppearance},
    schema::keys,
    store::PreferenceSnapshot,
};
use serde::{Deserialize, Serialize};

/// Palette the UI should render with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorScheme {
    Light,
    Dark,
    /// Dark palette with raised, blue-grey surfaces
    Dim,
}

impl ColorScheme {
    pub fn is_dark(self) -> bool {
        !matches!(self, ColorScheme::Light)
    }
}

/// Resolve `display.theme` and `display.darkTheme` against the host
/// appearance
pub fn effective_color_scheme(snapshot: &PreferenceSnapshot, platform: &PlatformContext) -> ColorScheme {
    let wants_dark = match snapshot.get_str(keys::THEME) {
        Some("light") => false,
        Some("dark") => true,
        _ => platform.system_appearance == SystemAppearance::Dark,
    };

    if !wants_dark {
        return ColorScheme::Light;
    }
    match snapshot.get_str(keys::DARK_THEME) {
        Some("dark") => ColorScheme::Dark,
        _ => ColorScheme::Dim,
    }
}
