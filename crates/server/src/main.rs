//! Lattica KeyDir server binary.
//!
//! Launches the HTTP gateway over a directory registry, seeds directories
//! from the config file, and supervises per-directory sequencers.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (ephemeral in-memory state)
//! lattica-keydir --listen 127.0.0.1:8080
//!
//! # Start with a config file and file-based audit logging
//! KEYDIR_CONFIG=/etc/keydir.toml KEYDIR_AUDIT_DIR=/var/log/keydir lattica-keydir
//! ```

use std::sync::Arc;

use clap::Parser;
use lattica_keydir_core::audit::{AuditLogger, FileAuditLogger, MemoryAuditLogger};
use lattica_keydir_core::registry::{DirectoryRegistry, RegistryOptions};
use lattica_keydir_server::config::{Cli, FileConfig, LogFormat};
use lattica_keydir_server::{http, shutdown};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let audit = build_audit_logger(&cli, &file_config)?;
    let registry = Arc::new(DirectoryRegistry::new(audit, registry_options(&file_config)));

    for seed in &file_config.directories {
        registry
            .create_directory(&seed.id, Some(seed.settings.clone()), None)
            .await?;
        tracing::info!(directory_id = %seed.id, "seeded directory");
    }

    let app = http::router(Arc::clone(&registry));
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    tracing::info!(listen = %cli.listen, "lattica-keydir gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match shutdown::wait_for_shutdown().await {
                Ok(signal) => tracing::info!(signal, "shutdown requested"),
                Err(err) => {
                    tracing::error!(error = %err, "signal handler failed; stopping server")
                },
            }
        })
        .await?;

    // Let in-flight revisions reach the log before exiting
    registry.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lattica_keydir=debug"));
    match format {
        LogFormat::Text => {
            tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
        },
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
        },
    }
}

fn build_audit_logger(
    cli: &Cli,
    file_config: &FileConfig,
) -> Result<Arc<dyn AuditLogger>, Box<dyn std::error::Error>> {
    let audit_dir = cli.audit_dir.clone().or_else(|| file_config.audit.path.clone());
    match audit_dir {
        Some(dir) => {
            let mut config = file_config.audit.clone();
            config.validate()?;
            config.path = Some(dir.clone());
            Ok(Arc::new(FileAuditLogger::create(&dir, config)?))
        },
        None => Ok(Arc::new(MemoryAuditLogger::new())),
    }
}

fn registry_options(file_config: &FileConfig) -> RegistryOptions {
    RegistryOptions::builder()
        .maybe_gc_grace(file_config.gc_grace)
        .maybe_retry(file_config.retry.clone())
        .build()
}
