use rill::app;
use rill::settings::SettingsStore;

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout carries only the transcript.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();
    tracing::info!(path = ?settings_store.config_path(), "settings loaded");
    if let Err(error) = settings_store.ensure_persisted() {
        tracing::warn!(error = %error, "failed to write default settings");
    }

    if let Err(error) = app::run(&settings_store.settings()).await {
        tracing::error!(error = %error, "chat session failed");
        eprintln!("rill: {error}");
        std::process::exit(1);
    }
}
