//! mcp-proxy-gateway entry point: wire up policy, validator, recorder,
//! replay store and upstream client, then serve until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use mcp_proxy_gateway::config::{self, RecordPolicy};
use mcp_proxy_gateway::record::Recorder;
use mcp_proxy_gateway::redact::Redactor;
use mcp_proxy_gateway::replay::ReplayStore;
use mcp_proxy_gateway::server::{Gateway, GatewayOptions};
use mcp_proxy_gateway::upstream::UpstreamClient;
use mcp_proxy_gateway::validate::Validator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Policy-enforcing JSON-RPC gateway for an MCP server")]
struct Cli {
    /// Listen address
    #[arg(long, env = "MCP_GATEWAY_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Upstream MCP server URL
    #[arg(long, env = "MCP_GATEWAY_UPSTREAM")]
    upstream: Option<String>,

    /// Policy file (yaml/json)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Record file path (NDJSON)
    #[arg(long)]
    record: Option<PathBuf>,

    /// Record rotation size in bytes (0 disables, -1 uses policy)
    #[arg(long, default_value_t = -1)]
    record_max_bytes: i64,

    /// Record rotation backups to retain (0 keeps none, -1 uses policy/default)
    #[arg(long, default_value_t = -1)]
    record_max_files: i64,

    /// Replay file path (NDJSON)
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Error on replay miss instead of forwarding upstream
    #[arg(long)]
    replay_strict: bool,

    /// Max request/response body in bytes
    #[arg(long, default_value_t = 1 << 20)]
    max_body: usize,

    /// Upstream request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let policy = match &cli.policy {
        Some(path) => Some(config::load_policy(path)?),
        None => None,
    };

    let validator = Validator::new(policy.as_ref())?;

    let record_policy = policy
        .as_ref()
        .map(|p| p.record.clone())
        .unwrap_or_else(RecordPolicy::default);

    // Rotation precedence: CLI overrides policy unless left at the -1
    // sentinel. Bytes <= 0 disables rotation; an unset backup count
    // resolves to three.
    let mut rotate_bytes = record_policy.max_bytes.unwrap_or(0);
    let mut rotate_files = record_policy.max_files.unwrap_or(-1);
    if cli.record_max_bytes != -1 {
        rotate_bytes = cli.record_max_bytes;
    }
    if cli.record_max_files != -1 {
        rotate_files = cli.record_max_files;
    }
    if rotate_bytes < 0 || rotate_files < -1 {
        return Err(format!(
            "invalid record rotation values: max_bytes={rotate_bytes} max_files={rotate_files}"
        )
        .into());
    }
    let (rotate_bytes, rotate_files) = if rotate_bytes <= 0 {
        (0, 0)
    } else if rotate_files == -1 {
        (rotate_bytes as u64, 3)
    } else {
        (rotate_bytes as u64, rotate_files as u32)
    };

    let redactor = Redactor::new(&record_policy.redact_keys, &record_policy.redact_key_regex)?;
    let recorder = cli
        .record
        .as_ref()
        .map(|path| Recorder::new(path, redactor, rotate_bytes, rotate_files));

    let replay = match &cli.replay {
        Some(path) => {
            let match_mode = policy
                .as_ref()
                .map(|p| p.replay_match())
                .unwrap_or_default();
            Some(ReplayStore::load(path, match_mode)?)
        }
        None => None,
    };

    let upstream = match &cli.upstream {
        Some(url) => {
            let url: reqwest::Url = url
                .parse()
                .map_err(|err| format!("invalid upstream URL: {err}"))?;
            Some(UpstreamClient::new(url, Duration::from_secs(cli.timeout_secs))?)
        }
        None => None,
    };

    let upstream_configured = upstream.is_some();
    let gateway = Gateway::new(GatewayOptions {
        upstream,
        validator: Some(validator),
        recorder,
        replay,
        replay_strict: cli.replay_strict,
        origin_allowlist: policy
            .as_ref()
            .map(|p| p.http.origin_allowlist.clone())
            .unwrap_or_default(),
        forward_headers: policy
            .as_ref()
            .map(|p| p.forward_header_names())
            .unwrap_or_default(),
        prometheus_metrics: policy
            .as_ref()
            .map(|p| p.http.prometheus_metrics)
            .unwrap_or(false),
        max_body: cli.max_body,
    });

    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    info!(addr = %cli.listen, "listening");
    info!("endpoints: POST /rpc, GET /healthz, GET /metricsz");
    if upstream_configured {
        info!(upstream = %cli.upstream.as_deref().unwrap_or(""), "upstream configured");
    } else {
        info!("no upstream configured");
    }

    axum::serve(listener, gateway.into_router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
