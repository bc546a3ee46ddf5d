use prefsync::{
    derived::{effective_color_scheme, effective_font_scale, PlatformContext, SystemAppearance},
    keys,
    sync::MemoryRemote,
    AccountId, PreferencesConfig, PreferencesManager, SyncEvent,
};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => PreferencesConfig::from_file(path)?,
        None => PreferencesConfig {
            enable_background_sync: false,
            ..PreferencesConfig::default()
        },
    };

    let account = AccountId::parse("did:plc:demo")?;
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(&account, keys::FONT_SIZE, "large");

    // Device-local settings come from the on-disk cache, so the logging
    // level follows whatever was saved by the previous run.
    let manager = PreferencesManager::open(config, remote.clone()).await?;
    let verbose = manager.get(keys::VERBOSE_LOGGING)?.as_bool().unwrap_or(false);

    tracing_subscriber::fmt()
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!(
        "Starting prefsync {} (cache at {})",
        prefsync::VERSION,
        manager.config().database.database_url
    );

    manager.on_sync_event(|event| match event {
        SyncEvent::Committed { key, attempts, .. } => info!("Saved {} to server ({} attempt(s))", key, attempts),
        SyncEvent::Failed { key, error, .. } => warn!("Could not save {} to server: {}", key, error),
        _ => {}
    });

    let platform = PlatformContext::default().with_appearance(SystemAppearance::Dark);
    let _theme = manager.subscribe_fn([keys::THEME, keys::DARK_THEME], move |change, snapshot| {
        info!(
            "Theme engine: {} -> {} (scheme {:?})",
            change.key,
            change.new_value,
            effective_color_scheme(snapshot, &platform)
        );
        Ok(())
    });

    manager.start_session(account.clone()).await?;
    info!(
        "Font scale after sign-in: {:.3}",
        effective_font_scale(&manager.snapshot(), &PlatformContext::default())
    );

    manager.set(keys::THEME, "dark")?;
    if let Err(e) = manager.set(keys::FONT_SIZE, "ultra") {
        info!("Rejected as expected: {}", e);
    }
    manager.set(keys::NOTIFY_MENTIONS, true)?;
    manager.set(keys::NOTIFY_MENTIONS, false)?;

    let report = manager.flush_pending().await?;
    info!("Flushed: {} committed, {} failed", report.committed, report.failed);
    info!("Server now holds {} write(s)", remote.writes().len());

    manager.end_session().await?;
    manager.shutdown().await;
    Ok(())
}
