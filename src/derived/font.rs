use crate::{derived::PlatformContext, schema::keys, store::PreferenceSnapshot};

pub const MIN_FONT_SCALE: f64 = 0.5;
pub const MAX_FONT_SCALE: f64 = 3.0;

/// Base multiplier for a `display.fontSize` tag
pub fn font_size_multiplier(tag: &str) -> f64 {
    match tag {
        "small" => 0.875,
        "large" => 1.125,
        "extraLarge" => 1.25,
        _ => 1.0,
    }
}

/// Text scale the renderer should apply, clamped to
/// [`MIN_FONT_SCALE`, `MAX_FONT_SCALE`]
pub fn effective_font_scale(snapshot: &PreferenceSnapshot, platform: &PlatformContext) -> f64 {
    let base = font_size_multiplier(snapshot.get_str(keys::FONT_SIZE).unwrap_or("default"));

    let accessibility = platform
        .accessibility_text_scale
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(1.0);
    let platform_factor = if platform.platform_multiplier.is_finite() && platform.platform_multiplier > 0.0 {
        platform.platform_multiplier
    } else {
        1.0
    };

    (base * accessibility * platform_factor).clamp(MIN_FONT_SCALE, MAX_FONT_SCALE)
}
