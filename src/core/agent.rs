//! Daily action quotas and the long-running agent orchestrator loop.
//!
//! The orchestrator drives wait → acquire → plan → act → record → recover
//! exactly as a single human-like thread of intent: one [`AgentOrchestrator`]
//! never runs two activities concurrently, though many orchestrators may
//! share the same [`BrowserPool`] and [`RateLimitRegistry`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::domain::{ActionKind, ActivityKind, ActivitySlot};
use crate::core::ports::{Planner, SessionStore};
use crate::core::rate::RateLimitRegistry;
use crate::core::schedule::{CircadianConfig, CircadianScheduler};
use crate::error::{Kind, Result};

/// Per-day caps on the four action kinds an agent may perform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyLimits {
    pub likes: u32,
    pub follows: u32,
    pub comments: u32,
    pub posts: u32,
}

impl Default for DailyLimits {
    fn default() -> Self {
        Self { likes: 50, follows: 20, comments: 10, posts: 3 }
    }
}

impl DailyLimits {
    fn limit_for(self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::Like => self.likes,
            ActionKind::Follow => self.follows,
            ActionKind::Comment => self.comments,
            ActionKind::Post => self.posts,
        }
    }
}

/// Per-agent counters, reset whenever the local date rolls over.
pub struct DailyQuota {
    timezone: Tz,
    limits: DailyLimits,
    date: Mutex<(NaiveDate, HashMap<ActionKind, u32>)>,
}

impl DailyQuota {
    #[must_use]
    pub fn new(timezone: Tz, limits: DailyLimits) -> Self {
        let today = Utc::now().with_timezone(&timezone).date_naive();
        Self { timezone, limits, date: Mutex::new((today, HashMap::new())) }
    }

    fn roll_if_needed(&self, counters: &mut (NaiveDate, HashMap<ActionKind, u32>)) {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        if counters.0 != today {
            counters.0 = today;
            counters.1.clear();
        }
    }

    /// Whether at least one action kind still has remaining quota today.
    #[must_use]
    pub fn has_any_remaining(&self) -> bool {
        let mut counters = self.date.lock();
        self.roll_if_needed(&mut counters);
        ActionKind::ALL.iter().any(|k| self.remaining_locked(&counters, *k) > 0)
    }

    #[must_use]
    pub fn remaining(&self, kind: ActionKind) -> u32 {
        let mut counters = self.date.lock();
        self.roll_if_needed(&mut counters);
        self.remaining_locked(&counters, kind)
    }

    fn remaining_locked(&self, counters: &(NaiveDate, HashMap<ActionKind, u32>), kind: ActionKind) -> u32 {
        let used = counters.1.get(&kind).copied().unwrap_or(0);
        self.limits.limit_for(kind).saturating_sub(used)
    }

    /// Returns `true` and records the action if quota remains, `false`
    /// (without recording) if the kind is already exhausted for today.
    pub fn try_record(&self, kind: ActionKind) -> bool {
        let mut counters = self.date.lock();
        self.roll_if_needed(&mut counters);
        if self.remaining_locked(&counters, kind) == 0 {
            return false;
        }
        *counters.1.entry(kind).or_insert(0) += 1;
        true
    }
}

/// One item the planner scored as worth acting on.
pub struct Candidate {
    pub item_id: String,
    pub text: String,
    pub action: ActionKind,
}

/// Result of invoking the planner/executor on a single activity slot. An
/// orchestrator implementation supplies this per `ActivityKind` by driving
/// the browser pool and scraper dispatcher; the core only sequences calls
/// and enforces quota/rate-limit bookkeeping around them.
#[async_trait::async_trait]
pub trait ActivityExecutor: Send + Sync {
    /// Navigate and extract a bounded list of candidates for the slot.
    async fn gather_candidates(&self, slot: &ActivitySlot) -> Result<Vec<Candidate>>;
    /// Perform one action against a candidate; called only when quota and
    /// rate-limit checks already passed.
    async fn perform(&self, candidate: &Candidate) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub circadian: CircadianConfig,
    pub daily_limits: DailyLimits,
    pub persona: String,
    pub rng_seed: u64,
    pub sleep_poll: Duration,
    pub quota_exhausted_wait: Duration,
    pub error_wait: Duration,
    pub rate_limited_wait: Duration,
}

/// Drives the circadian schedule, quota, and executor for one agent
/// identity. Construct via [`AgentOrchestrator::new`] and run with
/// [`AgentOrchestrator::run`]; `run` returns only on cancellation or a
/// non-retryable (auth) failure.
pub struct AgentOrchestrator<E: ActivityExecutor> {
    config: AgentConfig,
    scheduler: Mutex<CircadianScheduler>,
    rng: Mutex<StdRng>,
    quota: DailyQuota,
    rate: Arc<RateLimitRegistry>,
    executor: E,
    session: Option<Arc<dyn SessionStore>>,
    planner: Option<Arc<dyn Planner>>,
}

impl<E: ActivityExecutor> AgentOrchestrator<E> {
    #[must_use]
    pub fn new(
        config: AgentConfig,
        rate: Arc<RateLimitRegistry>,
        executor: E,
        session: Option<Arc<dyn SessionStore>>,
        planner: Option<Arc<dyn Planner>>,
    ) -> Self {
        let quota = DailyQuota::new(config.circadian.timezone, config.daily_limits);
        let scheduler = CircadianScheduler::new(config.circadian.clone());
        let rng = StdRng::seed_from_u64(config.rng_seed);
        Self {
            config,
            scheduler: Mutex::new(scheduler),
            rng: Mutex::new(rng),
            quota,
            rate,
            executor,
            session,
            planner,
        }
    }

    /// The long-running loop. Returns when `cancel` fires.
    #[instrument(skip_all, fields(agent_id = %self.config.agent_id))]
    pub async fn run(&self, mut cancel: CancelToken) {
        info!("agent orchestrator starting");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let slot = {
                let mut sched = self.scheduler.lock();
                let mut rng = self.rng.lock();
                sched.get_next_activity(Utc::now(), &mut *rng)
            };

            if slot.kind == ActivityKind::Sleep {
                info!(duration = ?slot.duration, "sleeping through circadian window");
                if !cancel.sleep(slot.duration.min(Duration::from_secs(8 * 3600))).await {
                    break;
                }
                continue;
            }

            let now = Utc::now();
            if slot.scheduled_for > now {
                let wait = (slot.scheduled_for - now).to_std().unwrap_or(Duration::ZERO);
                if !cancel.sleep(wait).await {
                    break;
                }
            }

            if !self.quota.has_any_remaining() {
                info!("daily quota exhausted for all action kinds, waiting");
                if !cancel.sleep(self.config.quota_exhausted_wait).await {
                    break;
                }
                continue;
            }

            match self.execute_slot(&slot).await {
                Ok(()) => {}
                Err(e) if matches!(e.kind(), Kind::AuthExpired | Kind::Unauthorized) => {
                    warn!(error = %e, "agent session invalid, stopping");
                    break;
                }
                Err(e) if e.kind() == Kind::RateLimited => {
                    warn!(error = %e, "rate limited, long wait");
                    if !cancel.sleep(self.config.rate_limited_wait).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "activity failed, short wait and continue");
                    if !cancel.sleep(self.config.error_wait).await {
                        break;
                    }
                }
            }

            if let Some(session) = &self.session {
                if let Err(e) = session.save_session(&self.config.agent_id, &[]).await {
                    warn!(error = %e, "failed to persist session");
                }
            }
        }
        info!("agent orchestrator stopped");
    }

    async fn execute_slot(&self, slot: &ActivitySlot) -> Result<()> {
        self.rate.throttle(slot.kind_label()).await;
        let candidates = self.executor.gather_candidates(slot).await?;
        for candidate in candidates {
            if self.quota.remaining(candidate.action) == 0 {
                continue;
            }
            let score = match &self.planner {
                Some(planner) => planner.score_relevance(&candidate.text, &[]).await.unwrap_or(50),
                None => 100,
            };
            if score < 40 {
                continue;
            }
            self.rate.throttle(candidate.action_label()).await;
            self.executor.perform(&candidate).await?;
            self.quota.try_record(candidate.action);
        }
        Ok(())
    }
}

impl ActivitySlot {
    fn kind_label(&self) -> &'static str {
        match self.kind {
            ActivityKind::Sleep => "sleep",
            ActivityKind::HomeFeed => "home_feed",
            ActivityKind::SearchEngage => "search_engage",
            ActivityKind::InfluencerVisit => "influencer_visit",
            ActivityKind::CreateContent => "create_content",
            ActivityKind::EngageReplies => "engage_replies",
            ActivityKind::Explore => "explore",
            ActivityKind::OwnProfile => "own_profile",
            ActivityKind::SearchPeople => "search_people",
        }
    }
}

impl Candidate {
    fn action_label(&self) -> &'static str {
        match self.action {
            ActionKind::Like => "action:like",
            ActionKind::Follow => "action:follow",
            ActionKind::Comment => "action:comment",
            ActionKind::Post => "action:post",
        }
    }
}
