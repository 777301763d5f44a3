use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use api::{ApiConfig, AppState, build_router};
use axum::http::HeaderValue;
use clap::Parser;
use services::{AppServices, Clock, ServicesConfig};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "learnsy=info,api=info,services=info,tower_http=info";

/// Learnsy learning-management backend.
#[derive(Parser, Debug)]
#[command(name = "learnsy", version, about)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 5000, env = "LEARNSY_PORT")]
    port: u16,

    /// SQLite database URL or file path
    #[arg(long = "db", default_value = "sqlite://learnsy.sqlite3?mode=rwc", env = "LEARNSY_DB_URL")]
    db_url: String,

    /// Secret used to sign access tokens
    #[arg(long, env = "LEARNSY_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Access token lifetime in hours
    #[arg(long, default_value_t = 24, env = "LEARNSY_JWT_TTL_HOURS")]
    jwt_ttl_hours: i64,

    /// Directory that receives uploaded material files
    #[arg(long, default_value = "uploads", env = "LEARNSY_UPLOAD_DIR")]
    upload_dir: PathBuf,

    /// Largest accepted request body, in MiB
    #[arg(long, default_value_t = 50, env = "LEARNSY_MAX_UPLOAD_MB")]
    max_upload_mb: usize,

    /// Simulated processing time of AI summaries, in milliseconds
    #[arg(long, default_value_t = 1500, env = "LEARNSY_AI_DELAY_MS")]
    ai_delay_ms: u64,

    /// Allowed CORS origin; any origin when unset
    #[arg(long, env = "LEARNSY_CORS_ORIGIN")]
    cors_origin: Option<String>,
}

impl Args {
    fn services_config(&self) -> Result<ServicesConfig> {
        if self.jwt_secret.trim().is_empty() {
            bail!("--jwt-secret must not be empty");
        }
        if self.jwt_ttl_hours <= 0 {
            bail!("--jwt-ttl-hours must be positive");
        }
        let mut config = ServicesConfig::new(self.jwt_secret.clone());
        config.token_ttl = chrono::Duration::hours(self.jwt_ttl_hours);
        config.upload_dir.clone_from(&self.upload_dir);
        config.ai_delay = Duration::from_millis(self.ai_delay_ms);
        Ok(config)
    }

    fn api_config(&self) -> Result<ApiConfig> {
        let cors_origin = self
            .cors_origin
            .as_deref()
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(HeaderValue::from_str)
            .transpose()
            .context("invalid --cors-origin")?;
        Ok(ApiConfig {
            max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
            cors_origin,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let services_config = args.services_config()?;
    let api_config = args.api_config()?;
    if api_config.cors_origin.is_none() {
        warn!("CORS allows any origin");
    }

    let db_url = normalize_sqlite_url(&args.db_url);
    prepare_sqlite_file(&db_url)?;
    info!(db = %db_url, upload_dir = %args.upload_dir.display(), "opening storage");

    let services = AppServices::new_sqlite(&db_url, Clock::default_clock(), &services_config)
        .await
        .context("failed to initialize services")?;
    let app = build_router(AppState::new(services), &api_config);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(%err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received terminate signal, shutting down"),
    }
}

/// Accepts `sqlite://...`, `sqlite:path` or a bare path; relative paths are
/// resolved against the working directory.
fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_owned();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}?mode=rwc", absolute.display())
}

/// Creates the parent directory of a file-backed database.
fn prepare_sqlite_file(db_url: &str) -> Result<()> {
    let Some(path) = db_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        bail!("invalid database url: {db_url}");
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["learnsy", "--jwt-secret", "s3cret"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let args = args(&[]);
        assert_eq!(args.port, 5000);
        assert_eq!(args.jwt_ttl_hours, 24);
        assert_eq!(args.max_upload_mb, 50);

        let api = args.api_config().unwrap();
        assert_eq!(api.max_upload_bytes, 50 * 1024 * 1024);
        assert!(api.cors_origin.is_none());

        let services = args.services_config().unwrap();
        assert_eq!(services.ai_delay, Duration::from_millis(1500));
        assert_eq!(services.token_ttl, chrono::Duration::hours(24));
    }

    #[test]
    fn rejects_non_positive_token_lifetime() {
        assert!(args(&["--jwt-ttl-hours", "0"]).services_config().is_err());
    }

    #[test]
    fn sqlite_urls_are_normalized() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:///tmp/a.db?mode=rwc"),
            "sqlite:///tmp/a.db?mode=rwc"
        );
        assert_eq!(normalize_sqlite_url("/tmp/a.db"), "sqlite:///tmp/a.db?mode=rwc");
        assert!(normalize_sqlite_url("data/a.db").ends_with("/data/a.db?mode=rwc"));
    }
}
