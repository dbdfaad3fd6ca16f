//! Narrow collaborator interfaces the orchestrator depends on but never
//! implements: session persistence and LLM-backed planning are deliberately
//! kept out of the core, which only defines the seam.

use async_trait::async_trait;

use crate::error::Result;

/// Opaque cookie/session persistence, called only by the agent
/// orchestrator. A real implementation might back this with an encrypted
/// file or the SQLite action-history store; the core never inspects the
/// session bytes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, agent_id: &str, session: &[u8]) -> Result<()>;
    async fn restore_session(&self, agent_id: &str) -> Result<Option<Vec<u8>>>;
    async fn is_logged_in(&self, agent_id: &str) -> Result<bool>;
}

/// The LLM-backed relevance scorer and content generator. Failures are
/// treated by the caller as a neutral score / skipped action, never
/// propagated as a hard error.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn score_relevance(&self, text: &str, topic_hints: &[String]) -> Result<u8>;
    async fn generate_reply(&self, context: &str, persona: &str) -> Result<String>;
    async fn generate_post(&self, kind: &str, persona: &str, inputs: &str) -> Result<Vec<String>>;
}
