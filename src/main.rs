use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use result_store::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let cfg = ServerConfig::from_env()?;
    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "result_store starting: RUST_LOG='{}', bind={}, http_port={}, upload_dir={:?}, auth_modes={:?}, login_enabled={}",
        rust_log, cfg.bind, cfg.http_port, cfg.upload_dir, cfg.auth_modes, cfg.login_enabled()
    );

    result_store::server::run(cfg).await
}
