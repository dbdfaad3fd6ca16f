//! The concrete [`ActivityExecutor`] that drives an agent's activities
//! through the Scraper Operation Dispatcher and Browser Pool.
//!
//! Grounded on the poller kernel's own acquire-dispatch-release shape: every
//! call brackets a single page lease around one dispatcher invocation, and
//! classifies the untyped JSON result into the agent loop's domain types.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::core::agent::{ActivityExecutor, Candidate};
use crate::core::dispatcher::OperationRegistry;
use crate::core::domain::{ActionKind, ActivityKind, ActivitySlot};
use crate::core::pool::BrowserPool;
use crate::error::{Error, Result};

/// Names of the scraper operations an agent dispatches per activity kind,
/// and per action kind when performing on a candidate.
#[derive(Debug, Clone)]
pub struct ActivityOperationNames {
    pub home_feed: String,
    pub search_engage: String,
    pub influencer_visit: String,
    pub create_content: String,
    pub engage_replies: String,
    pub explore: String,
    pub own_profile: String,
    pub search_people: String,
    pub like: String,
    pub follow: String,
    pub comment: String,
    pub post: String,
}

impl Default for ActivityOperationNames {
    fn default() -> Self {
        Self {
            home_feed: "browse-home-feed".into(),
            search_engage: "search-and-list".into(),
            influencer_visit: "visit-profile-timeline".into(),
            create_content: "compose-post".into(),
            engage_replies: "list-own-mentions".into(),
            explore: "browse-explore".into(),
            own_profile: "visit-own-profile".into(),
            search_people: "search-people".into(),
            like: "like-post".into(),
            follow: "follow-user".into(),
            comment: "reply-to-post".into(),
            post: "create-post".into(),
        }
    }
}

#[derive(Deserialize)]
struct CandidateItem {
    item_id: String,
    text: String,
    action: ActionKind,
}

#[derive(Deserialize)]
struct CandidateListResult {
    #[serde(default)]
    candidates: Vec<CandidateItem>,
}

/// Drives one agent's activities by dispatching the operation named for the
/// activity kind, then performing per-candidate actions. Content generation
/// activities (`CreateContent`) skip candidate gathering and post directly.
pub struct DispatcherActivityExecutor {
    pool: Arc<BrowserPool>,
    operations: Arc<OperationRegistry>,
    names: ActivityOperationNames,
    operation_timeout: Duration,
}

impl DispatcherActivityExecutor {
    #[must_use]
    pub fn new(pool: Arc<BrowserPool>, operations: Arc<OperationRegistry>, names: ActivityOperationNames, operation_timeout: Duration) -> Self {
        Self { pool, operations, names, operation_timeout }
    }

    fn operation_for(&self, kind: ActivityKind) -> Option<&str> {
        match kind {
            ActivityKind::Sleep => None,
            ActivityKind::HomeFeed => Some(&self.names.home_feed),
            ActivityKind::SearchEngage => Some(&self.names.search_engage),
            ActivityKind::InfluencerVisit => Some(&self.names.influencer_visit),
            ActivityKind::CreateContent => Some(&self.names.create_content),
            ActivityKind::EngageReplies => Some(&self.names.engage_replies),
            ActivityKind::Explore => Some(&self.names.explore),
            ActivityKind::OwnProfile => Some(&self.names.own_profile),
            ActivityKind::SearchPeople => Some(&self.names.search_people),
        }
    }

    fn action_operation(&self, action: ActionKind) -> &str {
        match action {
            ActionKind::Like => &self.names.like,
            ActionKind::Follow => &self.names.follow,
            ActionKind::Comment => &self.names.comment,
            ActionKind::Post => &self.names.post,
        }
    }
}

#[async_trait::async_trait]
impl ActivityExecutor for DispatcherActivityExecutor {
    async fn gather_candidates(&self, slot: &ActivitySlot) -> Result<Vec<Candidate>> {
        let Some(operation_name) = self.operation_for(slot.kind) else {
            return Ok(Vec::new());
        };

        if slot.kind == ActivityKind::CreateContent {
            let page = self.pool.acquire_page().await?;
            let args = json!({ "persona_argument": slot.argument });
            let outcome = self.operations.run_operation(operation_name, &page.page_id, args, self.operation_timeout).await;
            page.release().await;
            outcome?;
            return Ok(vec![Candidate { item_id: crate::core::domain::new_id("post"), text: String::new(), action: ActionKind::Post }]);
        }

        let page = self.pool.acquire_page().await?;
        let args = json!({ "argument": slot.argument });
        let outcome = self.operations.run_operation(operation_name, &page.page_id, args, self.operation_timeout).await;
        page.release().await;
        let value = outcome?;

        let parsed: CandidateListResult = serde_json::from_value(value)
            .map_err(|e| Error::ScraperMissing { operation: operation_name.to_string(), reason: e.to_string() })?;
        Ok(parsed
            .candidates
            .into_iter()
            .map(|c| Candidate { item_id: c.item_id, text: c.text, action: c.action })
            .collect())
    }

    async fn perform(&self, candidate: &Candidate) -> Result<()> {
        if candidate.text.is_empty() && candidate.action == ActionKind::Post {
            // Already created by `gather_candidates` for CreateContent; nothing left to do.
            return Ok(());
        }
        let page = self.pool.acquire_page().await?;
        let args = json!({ "item_id": candidate.item_id, "text": candidate.text });
        let outcome = self
            .operations
            .run_operation(self.action_operation(candidate.action), &page.page_id, args, self.operation_timeout)
            .await;
        page.release().await;
        outcome?;
        Ok(())
    }
}
