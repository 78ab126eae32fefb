use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ak_domain::config::Config;
use ak_providers::router::LlmRouter;
use ak_sessions::{JwtHandler, PersistenceEngine, SessionManager, TokenStore, UserContextExtractor};
use ak_tools::router::ToolRouter;

mod cancel;
mod cli;
mod connection_registry;
mod lifecycle;
mod session_runtime;
mod state;
mod transport;
mod turn;

use cancel::CancelRegistry;
use cli::{Cli, Command};
use connection_registry::ConnectionRegistry;
use session_runtime::AgentSessionRuntimeFactory;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("agentkernel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ak_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("agentkernel starting");

    let llm = Arc::new(LlmRouter::from_config(&config.llm)?);

    let tools = Arc::new(ToolRouter::new(
        std::path::PathBuf::from(&config.tools.workspace_root),
        config.mcp.clone(),
        config.tools.disallowed_external_tool_names.clone(),
    ));
    tools.enter().await;

    let approval = Arc::new(config.approval.clone());

    let mut persistence_engine = PersistenceEngine::from_config(&config.persistence)?;
    persistence_engine.start().await;
    let persistence = Arc::new(tokio::sync::Mutex::new(persistence_engine));

    let jwt = Arc::new(JwtHandler::from_config(&config.auth));
    let tokens = Arc::new(TokenStore::from_config(&config.auth)?);
    let user_ctx = Arc::new(UserContextExtractor::new(jwt.clone(), tokens.clone()));

    let cancel_registry = Arc::new(CancelRegistry::new());
    let connections = Arc::new(ConnectionRegistry::new());

    let model_name = config
        .llm
        .roles
        .get(crate::turn::TURN_ROLE)
        .map(|r| r.model.clone())
        .unwrap_or_default();

    let factory = Arc::new(AgentSessionRuntimeFactory::new(
        llm.clone(),
        tools.clone(),
        approval,
        config.turn.max_iterations,
        model_name,
        config.context.clone(),
        persistence.clone(),
        cancel_registry.clone(),
    ));
    let sessions = Arc::new(SessionManager::new(factory));

    let state = AppState {
        config: config.clone(),
        llm,
        tools: tools.clone(),
        sessions,
        persistence,
        jwt,
        tokens,
        user_ctx,
        cancel_registry,
        connections,
    };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/v1/ws", get(transport::session_ws))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(lifecycle::wait_for_shutdown_signal())
        .await?;

    lifecycle::run_shutdown_sweep(&state).await;
    tools.exit().await;

    Ok(())
}
