//! Process entry point.
//!
//! `sift-server serve` runs the full stack in one process: the MCP
//! tool server on its SSE port, the agent orchestrator bridged to it
//! over MCP, and the user-facing HTTP API. `sift-server mcp-stdio`
//! runs only the tool server on stdin/stdout for pipe-based hosts.

mod auth;
mod bridge;
mod error;
mod routes;
mod state;

use anyhow::Context;
use bridge::AgentToolBridge;
use clap::{Parser, Subcommand};
use sift_acl::{AclEngine, PgStaffDirectory};
use sift_adapter_pg::ReadOnlyPg;
use sift_agent::{AgentOrchestrator, AnthropicClient};
use sift_core::{AclConfig, AppConfig};
use sift_mcp::{sse_router, McpClient, McpServer, RedashClient, SseServerState, ToolContext};
use sift_rules::RulesCatalog;
use sift_store::DocStore;
use state::AppContext;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "\
You are a data assistant for the sales funnel database. Answer \
questions by querying the database with the provided tools. Before \
writing funnel SQL, fetch the funnel context and follow its rules: \
shift timestamps into the reporting timezone, exclude test records, \
and count distinct entities. Prefer the catalog's query patterns over \
improvised SQL. Present results concisely and mention the filters you \
applied.";

#[derive(Parser)]
#[command(name = "sift-server", about = "LLM-to-database bridge over MCP", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API, the MCP SSE server and the agent loop.
    Serve,
    /// Run only the MCP tool server on stdin/stdout.
    McpStdio,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env().context("loading configuration from the environment")?;

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::McpStdio => mcp_stdio(cfg).await,
    }
}

async fn build_tool_context(cfg: &AppConfig, pg: ReadOnlyPg) -> anyhow::Result<(ToolContext, Arc<AclEngine>)> {
    let acl_config = AclConfig::from_file(&cfg.acl_config_path)
        .with_context(|| format!("loading ACL config from {}", cfg.acl_config_path))?;
    let acl = Arc::new(AclEngine::new(
        acl_config,
        Arc::new(PgStaffDirectory::new(pg.clone())),
    ));

    let context = ToolContext {
        pg: Some(pg),
        acl: acl.clone(),
        rules: RulesCatalog::builtin(),
        redash: RedashClient::new(cfg.redash_base_url.clone(), cfg.redash_api_key.clone()),
        fallback_email: cfg.fallback_user_email.clone(),
    };
    Ok((context, acl))
}

async fn serve(cfg: AppConfig) -> anyhow::Result<()> {
    let pg = ReadOnlyPg::connect(&cfg)
        .await
        .context("connecting to the primary database")?;
    let store = DocStore::connect(&cfg.docstore_url)
        .await
        .context("connecting to the document store")?;

    let (tool_context, acl) = build_tool_context(&cfg, pg.clone()).await?;

    // MCP tool server on its own SSE port.
    let mcp_server = McpServer::new(tool_context)?;
    let sse_state = SseServerState::new(mcp_server);
    let mcp_listener = tokio::net::TcpListener::bind(&cfg.mcp_bind)
        .await
        .with_context(|| format!("binding MCP transport to {}", cfg.mcp_bind))?;
    tracing::info!(addr = %cfg.mcp_bind, "MCP SSE server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(mcp_listener, sse_router(sse_state)).await {
            tracing::error!(error = %e, "MCP transport exited");
        }
    });

    // Client bridge into our own MCP server. The transport may need a
    // moment to accept connections.
    let client = Arc::new(McpClient::new(
        cfg.mcp_server_url.clone(),
        cfg.fallback_user_email.clone(),
    ));
    let mut attempts = 0;
    loop {
        match client.connect().await {
            Ok(()) => break,
            Err(e) if attempts < 5 => {
                attempts += 1;
                tracing::warn!(error = %e, attempt = attempts, "MCP bridge connect failed; retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e).context("connecting the MCP client bridge"),
        }
    }
    let tool_count = client.cached_tools().await.len();
    tracing::info!(tool_count, "MCP bridge connected");

    let llm = Arc::new(AnthropicClient::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        cfg.llm_model.clone(),
        cfg.llm_max_tokens,
    ));
    let orchestrator = AgentOrchestrator::new(
        llm,
        Arc::new(AgentToolBridge::new(client.clone())),
        store.clone(),
        SYSTEM_PROMPT,
        cfg.agent_max_rounds,
    );

    let ctx = Arc::new(AppContext {
        store: store.clone(),
        acl,
        orchestrator,
    });

    let listener = tokio::net::TcpListener::bind(&cfg.http_bind)
        .await
        .with_context(|| format!("binding HTTP API to {}", cfg.http_bind))?;
    tracing::info!(addr = %cfg.http_bind, "sift-server listening");

    axum::serve(listener, routes::router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    client.close().await;
    pg.close().await;
    store.close().await;
    Ok(())
}

async fn mcp_stdio(cfg: AppConfig) -> anyhow::Result<()> {
    let pg = ReadOnlyPg::connect(&cfg)
        .await
        .context("connecting to the primary database")?;
    let (tool_context, _acl) = build_tool_context(&cfg, pg.clone()).await?;

    let server = McpServer::new(tool_context)?;
    server.run_stdio().await?;

    pg.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
