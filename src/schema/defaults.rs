/// Built-in settings recognized by the client
use crate::schema::{Schema, Scope, Setting};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::{collections::HashMap, sync::Arc};

pub const BUILTIN_SCHEMA_VERSION: u32 = 1;

pub mod keys {
    pub const THEME: &str = "display.theme";
    pub const DARK_THEME: &str = "display.darkTheme";
    pub const FONT_SIZE: &str = "display.fontSize";
    pub const FONT_FAMILY: &str = "display.fontFamily";
    pub const REDUCE_MOTION: &str = "accessibility.reduceMotion";
    pub const REQUIRE_ALT_TEXT: &str = "accessibility.requireAltText";
    pub const LARGE_ALT_BADGE: &str = "accessibility.largeAltBadge";
    pub const AUTOPLAY: &str = "media.autoplay";
    pub const NOTIFY_MENTIONS: &str = "notifications.mentions";
    pub const NOTIFY_REPLIES: &str = "notifications.replies";
    pub const NOTIFY_LIKES: &str = "notifications.likes";
    pub const NOTIFY_REPOSTS: &str = "notifications.reposts";
    pub const NOTIFY_FOLLOWS: &str = "notifications.follows";
    pub const NOTIFY_QUOTES: &str = "notifications.quotes";
    pub const NOTIFY_PRIORITY_ONLY: &str = "notifications.priorityOnly";
    pub const NOTIFICATIONS_SEEN_AT: &str = "notifications.seenAt";
    pub const LOGGED_OUT_VISIBILITY: &str = "privacy.loggedOutVisibility";
    pub const ADULT_CONTENT: &str = "moderation.adultContentEnabled";
    pub const REPLY_LIKE_THRESHOLD: &str = "feed.replyLikeThreshold";
    pub const CHAT_ALLOW_INCOMING: &str = "chat.allowIncoming";
    pub const PRIMARY_LANGUAGE: &str = "language.primary";
    pub const VERBOSE_LOGGING: &str = "diagnostics.verboseLogging";
}

pub const THEMES: &[&str] = &["system", "light", "dark"];
pub const DARK_THEMES: &[&str] = &["dim", "dark"];
pub const FONT_SIZES: &[&str] = &["small", "default", "large", "extraLarge"];
pub const FONT_FAMILIES: &[&str] = &["system", "theme"];
pub const CHAT_POLICIES: &[&str] = &["all", "following", "none"];

static BUILTIN: Lazy<Arc<Schema>> = Lazy::new(|| {
    let settings = builtin_settings();
    let index = settings
        .iter()
        .enumerate()
        .map(|(pos, s)| (s.key.clone(), pos))
        .collect::<HashMap<_, _>>();
    Arc::new(Schema {
        version: BUILTIN_SCHEMA_VERSION,
        settings,
        index,
    })
});

impl Schema {
    /// Shared instance of the built-in schema
    pub fn builtin() -> Arc<Schema> {
        BUILTIN.clone()
    }
}

/// Settings recognized by the client, in the order the settings screens
/// present them
pub fn builtin_settings() -> Vec<Setting> {
    use keys::*;

    vec![
        Setting::enumerated(THEME, THEMES, "system", Scope::Synced),
        Setting::enumerated(DARK_THEME, DARK_THEMES, "dim", Scope::Synced),
        Setting::enumerated(FONT_SIZE, FONT_SIZES, "default", Scope::Synced),
        Setting::enumerated(FONT_FAMILY, FONT_FAMILIES, "theme", Scope::LocalOnly),
        Setting::boolean(REDUCE_MOTION, false, Scope::LocalOnly),
        Setting::boolean(REQUIRE_ALT_TEXT, false, Scope::Synced),
        Setting::boolean(LARGE_ALT_BADGE, false, Scope::Synced),
        Setting::boolean(AUTOPLAY, true, Scope::LocalOnly),
        Setting::boolean(NOTIFY_MENTIONS, true, Scope::Synced),
        Setting::boolean(NOTIFY_REPLIES, true, Scope::Synced),
        Setting::boolean(NOTIFY_LIKES, true, Scope::Synced),
        Setting::boolean(NOTIFY_REPOSTS, true, Scope::Synced),
        Setting::boolean(NOTIFY_FOLLOWS, true, Scope::Synced),
        Setting::boolean(NOTIFY_QUOTES, true, Scope::Synced),
        Setting::boolean(NOTIFY_PRIORITY_ONLY, false, Scope::Synced),
        Setting::date(NOTIFICATIONS_SEEN_AT, DateTime::<Utc>::UNIX_EPOCH, Scope::Synced),
        Setting::boolean(LOGGED_OUT_VISIBILITY, true, Scope::Synced),
        Setting::boolean(ADULT_CONTENT, false, Scope::Synced),
        Setting::bounded(REPLY_LIKE_THRESHOLD, 0.0, 25.0, 1.0, 0.0, Scope::Synced),
        Setting::enumerated(CHAT_ALLOW_INCOMING, CHAT_POLICIES, "following", Scope::Synced),
        Setting::free_text(PRIMARY_LANGUAGE, 16, "en", Scope::LocalOnly),
        Setting::boolean(VERBOSE_LOGGING, false, Scope::LocalOnly),
    ]
}
