//! The LLM provider abstraction: a small trait every chat backend
//! implements, a registry that instantiates backends from config, and a
//! capability-driven router that resolves roles to models with fallback.

pub mod memory;
pub mod openai_compat;
pub mod registry;
pub mod router;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

pub use memory::{InMemoryProvider, ScriptedTurn};
pub use openai_compat::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use router::LlmRouter;
pub use traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
