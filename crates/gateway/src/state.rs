use std::sync::Arc;

use ak_domain::config::Config;
use ak_providers::router::LlmRouter;
use ak_sessions::{JwtHandler, PersistenceEngine, SessionManager, TokenStore, UserContextExtractor};
use ak_tools::router::ToolRouter;

use crate::cancel::CancelRegistry;
use crate::connection_registry::ConnectionRegistry;

/// Shared application state passed to every transport handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<LlmRouter>,
    pub tools: Arc<ToolRouter>,
    pub sessions: Arc<SessionManager>,
    pub persistence: Arc<tokio::sync::Mutex<PersistenceEngine>>,
    pub jwt: Arc<JwtHandler>,
    pub tokens: Arc<TokenStore>,
    pub user_ctx: Arc<UserContextExtractor>,
    pub cancel_registry: Arc<CancelRegistry>,
    pub connections: Arc<ConnectionRegistry>,
}
