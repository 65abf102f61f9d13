//! Guardrail gateway - entry point
//!
//! Serves the MCP tool catalog over SSE, backed by an in-memory or SQL storage
//! backend selected from `DATABASE_URL`.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use guardrail_gateway::audit::{AuditSink, StorageAuditSink, TracingAuditSink};
use guardrail_gateway::config::{AuditSinkKind, Config};
use guardrail_gateway::metrics::GatewayMetrics;
use guardrail_gateway::session::SessionManager;
use guardrail_gateway::storage::Storage;
use guardrail_gateway::tools::{register_all_tools, ToolContext};
use guardrail_gateway::transport;
use guardrail_gateway::validation::ValidationEngine;

#[derive(Parser, Debug)]
#[command(name = "guardrail-gateway")]
#[command(about = "MCP guardrail enforcement gateway for autonomous coding agents")]
#[command(version)]
struct Cli {
    /// Address to bind the HTTP server to, e.g. 0.0.0.0:8787.
    #[arg(long, env = "GUARDRAIL_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Tighten CORS to the configured base URL and enable other production-only checks.
    #[arg(long, env = "GUARDRAIL_PRODUCTION")]
    production: bool,

    /// Base URL used when announcing the message endpoint to SSE clients.
    #[arg(long, env = "GUARDRAIL_BASE_URL")]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "GUARDRAIL_JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::registry().with(filter);
    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let mut config = Config::from_env()?;
    if let Some(bind_address) = cli.bind_address {
        config.bind_address = bind_address;
    }
    if cli.production {
        config.production_mode = true;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        production = config.production_mode,
        "starting guardrail gateway"
    );

    let storage = Arc::new(match &config.database_url {
        Some(url) => {
            tracing::info!("connecting to storage backend");
            Storage::connect(url).await?
        }
        None => {
            tracing::warn!("no DATABASE_URL configured, running with in-memory storage");
            Storage::in_memory()
        }
    });

    let validation = Arc::new(ValidationEngine::new(storage.rules.clone(), config.rule_cache_ttl));
    let sessions = Arc::new(SessionManager::new(config.session_idle_ttl, guardrail_gateway::config::defaults::SESSION_QUEUE_CAPACITY));
    sessions.spawn_sweeper(config.session_sweep_interval);
    let metrics = Arc::new(GatewayMetrics::new());

    let audit: Arc<dyn AuditSink> = match config.audit_sink {
        AuditSinkKind::Storage => Arc::new(StorageAuditSink::new(storage.audit_log.clone())),
        AuditSinkKind::Tracing => Arc::new(TracingAuditSink),
    };

    let ctx = ToolContext::with_audit(storage, validation, Arc::clone(&sessions), metrics, audit, config.clone());
    let tools = register_all_tools();
    tracing::info!(tool_count = tools.len(), "registered tool catalog");

    let router = transport::build_router(tools, ctx, sessions, config.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
