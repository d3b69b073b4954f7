use platform_dirs::AppDirs;
use std::sync::Arc;
use tokio::sync::Notify;

pub mod api;
pub mod config;
pub mod setup;
pub mod telemetry;

pub fn get_app_dirs() -> AppDirs {
    platform_dirs::AppDirs::new(Some("Tone"), false).expect("Couldn't find a home directory for config!")
}

/// A notifier to be able to shut down all systems appropriately, and in time.
pub fn get_quit_notifier() -> Arc<Notify> {
    Arc::new(Notify::new())
}
