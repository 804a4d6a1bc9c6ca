//!
//! result_store server binary
//! ---------------------------
//! Command-line entry point for the submission store. Every setting comes from the
//! environment (see `config`); a few can be overridden with CLI flags.

use anyhow::Result;
use result_store::config::ServerConfig;

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            return args.get(i + 1).cloned();
        }
        if let Some(v) = args[i].strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
            return Some(v.to_string());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let args: Vec<String> = std::env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("result_store server\n\nUSAGE:\n  result_store_server [--http-port N] [--bind ADDR] [--upload-dir PATH]\n\nOPTIONS:\n  --http-port N       HTTP port (env: RESULTS_HTTP_PORT, default 8000)\n  --bind ADDR         Listen address (env: RESULTS_BIND, default 0.0.0.0)\n  --upload-dir PATH   Submission directory (env: RESULTS_UPLOAD_DIR, default uploads)\n\nAuthorization is configured through RESULTS_AUTH_MODES, RESULTS_SHARED_SECRET and AUTH0_*.\n");
        return Ok(());
    }

    let mut cfg = ServerConfig::from_env()?;

    // CLI arguments override environment
    if let Some(p) = arg_value(&args, "--http-port") {
        cfg.http_port = p.parse().map_err(|_| anyhow::anyhow!("invalid --http-port '{}'", p))?;
    }
    if let Some(b) = arg_value(&args, "--bind") {
        cfg.bind = b;
    }
    if let Some(d) = arg_value(&args, "--upload-dir") {
        cfg.upload_dir = d.into();
    }

    tracing::info!(
        target: "startup",
        "result_store starting: bind={}, http_port={}, upload_dir={:?}, auth_modes={:?}, open_mode={}, login_enabled={}",
        cfg.bind, cfg.http_port, cfg.upload_dir, cfg.auth_modes, cfg.is_open_mode(), cfg.login_enabled()
    );
    result_store::server::run(cfg).await
}
