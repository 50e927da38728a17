//! # chorus
//!
//! Chorus server binary. Loads settings, wires the listener store, identity
//! directory and authenticator into the HTTP/WebSocket server and runs it
//! until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chorus_core::logging;
use chorus_server::config::ServerConfig;
use chorus_server::server::ChorusServer;
use chorus_server::JwtAuthenticator;
use chorus_settings::ChorusSettings;
use chorus_store::{MemoryIdentityDirectory, MemoryListenerStore};
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often expired listener records are purged.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Chorus listening-session server.
#[derive(Parser, Debug)]
#[command(name = "chorus", about = "Chorus listening-session server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default `~/.chorus/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// JSON file mapping usernames to display profiles.
    #[arg(long)]
    profiles: Option<PathBuf>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(chorus_settings::settings_path)
    }

    fn profiles_path(&self, settings: &ChorusSettings) -> Option<PathBuf> {
        self.profiles
            .clone()
            .or_else(|| settings.store.profiles_path.as_ref().map(PathBuf::from))
    }

    fn server_config(&self, settings: &ChorusSettings) -> ServerConfig {
        let mut config = ServerConfig::from(&settings.server);
        if let Some(ref host) = self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

fn load_identity(path: Option<&Path>) -> Result<MemoryIdentityDirectory> {
    let Some(path) = path else {
        return Ok(MemoryIdentityDirectory::new());
    };
    let directory = MemoryIdentityDirectory::from_path(path)
        .with_context(|| format!("Failed to load profiles from {}", path.display()))?;
    tracing::info!(path = %path.display(), profiles = directory.len(), "profiles loaded");
    Ok(directory)
}

/// Assemble the server and its listener store from settings.
fn build_server(cli: &Cli, settings: &ChorusSettings) -> Result<(ChorusServer, Arc<MemoryListenerStore>)> {
    let secret = settings
        .auth
        .jwt_secret
        .as_deref()
        .context("auth.jwtSecret (or CHORUS_JWT_SECRET) must be set")?;
    let auth = JwtAuthenticator::new(secret, settings.auth.issuer.clone());

    let store = Arc::new(MemoryListenerStore::new(Duration::from_secs(
        settings.store.listener_ttl_secs,
    )));
    let identity = load_identity(cli.profiles_path(settings).as_deref())?;

    let server = ChorusServer::new(
        cli.server_config(settings),
        store.clone(),
        Arc::new(identity),
        Arc::new(auth),
    );
    Ok((server, store))
}

/// Periodically drop expired listener records until `token` is cancelled.
fn spawn_purge_task(store: Arc<MemoryListenerStore>, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = store.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, remaining = store.len(), "purged expired listeners");
                    }
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings_path();
    let settings = chorus_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics_handle =
        chorus_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let (server, store) = build_server(&args, &settings)?;
    let server = server.with_metrics(metrics_handle);
    let shutdown = server.shutdown();
    shutdown.track(spawn_purge_task(store, shutdown.token()));

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    shutdown.track(handle);
    tracing::info!("Chorus listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !shutdown.drain(None).await {
        tracing::warn!("exiting with background tasks still running");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_secret() -> ChorusSettings {
        let mut settings = ChorusSettings::default();
        settings.auth.jwt_secret = Some("secret".into());
        settings
    }

    #[test]
    fn cli_defaults_to_settings() {
        let cli = Cli::parse_from(["chorus"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.settings_path().ends_with(".chorus/settings.json"));

        let config = cli.server_config(&ChorusSettings::default());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn cli_overrides_host_and_port() {
        let cli = Cli::parse_from(["chorus", "--host", "127.0.0.1", "--port", "9000"]);
        let config = cli.server_config(&ChorusSettings::default());
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["chorus", "--settings", "/etc/chorus.json"]);
        assert_eq!(cli.settings_path(), PathBuf::from("/etc/chorus.json"));
    }

    #[test]
    fn profiles_flag_wins_over_settings() {
        let mut settings = ChorusSettings::default();
        settings.store.profiles_path = Some("/srv/profiles.json".into());

        let cli = Cli::parse_from(["chorus"]);
        assert_eq!(cli.profiles_path(&settings), Some(PathBuf::from("/srv/profiles.json")));

        let cli = Cli::parse_from(["chorus", "--profiles", "/tmp/p.json"]);
        assert_eq!(cli.profiles_path(&settings), Some(PathBuf::from("/tmp/p.json")));
    }

    #[test]
    fn build_requires_secret() {
        let cli = Cli::parse_from(["chorus"]);
        let err = build_server(&cli, &ChorusSettings::default()).err().unwrap();
        assert!(err.to_string().contains("jwtSecret"));
    }

    #[test]
    fn build_with_profiles_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, r#"{"alice": {"name": "Alice"}}"#).unwrap();

        let cli = Cli::parse_from(["chorus", "--profiles", path.to_str().unwrap(), "--port", "0"]);
        let (server, store) = build_server(&cli, &settings_with_secret()).unwrap();
        assert_eq!(server.config().port, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn build_fails_on_missing_profiles_file() {
        let cli = Cli::parse_from(["chorus", "--profiles", "/nonexistent/profiles.json"]);
        assert!(build_server(&cli, &settings_with_secret()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_task_stops_on_cancel() {
        let store = Arc::new(MemoryListenerStore::default());
        let token = CancellationToken::new();
        let handle = spawn_purge_task(store, token.clone());
        token.cancel();
        handle.await.unwrap();
    }
}
