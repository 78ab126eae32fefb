//! Session lifecycle, persistence, and auth for the agent orchestration
//! kernel: the Multi-Session Manager (§4.5), the two-layer Persistence
//! Engine (§4.6), and the Auth / Token Store (§4.7).

pub mod auth;
pub mod manager;
pub mod persistence;
pub mod session;
pub mod user_context;

pub use auth::{JwtHandler, TokenPayload, TokenStore, UserTokens};
pub use manager::{SessionInfo, SessionManager};
pub use persistence::{LayerA, LayerB, PersistenceEngine};
pub use session::{SessionRuntime, SessionRuntimeFactory};
pub use user_context::{AuthError, UserContextExtractor};
