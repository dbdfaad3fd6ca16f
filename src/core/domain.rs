//! Pure data types shared across the core: streams, events, activity slots,
//! and daily quotas. Nothing here performs I/O.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of source a stream subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Tweet,
    Follower,
    Mention,
}

impl StreamKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Tweet => "tweet",
            StreamKind::Follower => "follower",
            StreamKind::Mention => "mention",
        }
    }
}

/// Operator-visible lifecycle state. Never stored directly; always derived
/// from `enabled`, `stopped`, and `consecutive_errors` so persistence can
/// never drift from the logic that interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Running,
    Paused,
    Backoff,
    Stopped,
}

fn short_random() -> String {
    let mut rng = rand::thread_rng();
    let n: u32 = rng.gen_range(0..0xffff_ffff);
    format!("{n:08x}")
}

/// Builds a stream id of the shape `stream_<kind>_<target>_<short>`.
#[must_use]
pub fn stream_id(kind: StreamKind, target: &str) -> String {
    format!("stream_{}_{}_{}", kind.as_str(), target, short_random())
}

/// Persisted record for one stream. This is the unit the [`StateStore`]
/// durably holds at key `stream:<id>`.
///
/// [`StateStore`]: crate::core::state::StateStore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub kind: StreamKind,
    pub target: String,
    pub interval: Duration,
    pub paused: bool,
    pub stopped: bool,
    pub consecutive_errors: u32,
    pub backoff_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub owner: Option<String>,
}

impl Stream {
    #[must_use]
    pub fn new(kind: StreamKind, target: impl Into<String>, interval: Duration) -> Self {
        let target = target.into();
        Self {
            id: stream_id(kind, &target),
            kind,
            target,
            interval,
            paused: false,
            stopped: false,
            consecutive_errors: 0,
            backoff_until: None,
            created_at: Utc::now(),
            last_poll_at: None,
            owner: None,
        }
    }

    /// Derive the externally visible status from the stored fields. There is
    /// deliberately no `status` field on the struct itself.
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        if self.stopped {
            StreamStatus::Stopped
        } else if self.paused {
            StreamStatus::Paused
        } else if self.backoff_until.is_some_and(|t| t > Utc::now()) {
            StreamStatus::Backoff
        } else {
            StreamStatus::Running
        }
    }

    /// Compute the next backoff deadline given the configured base interval,
    /// cap, and a caller-supplied jitter source.
    #[must_use]
    pub fn next_backoff(&self, base: Duration, cap: Duration, jitter_s: u64) -> DateTime<Utc> {
        let scaled = base.saturating_mul(1u32.checked_shl(self.consecutive_errors).unwrap_or(u32::MAX));
        let capped = scaled.min(cap);
        Utc::now() + chrono::Duration::from_std(capped + Duration::from_secs(jitter_s)).unwrap_or_default()
    }
}

/// The bounded deduplication ring used by tweet/mention streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeenRing {
    capacity: usize,
    items: VecDeque<String>,
}

impl SeenRing {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, items: VecDeque::with_capacity(capacity.min(1024)) }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains(&id.to_string())
    }

    /// Insert, evicting the oldest entry once `capacity` is exceeded.
    pub fn push(&mut self, id: String) {
        if self.items.contains(&id) {
            return;
        }
        self.items.push_back(id);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A fan-out message recorded by the event bus and, for tweet/mention
/// streams, derived from a seen-ring diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub stream_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

/// One kind of agent action subject to a daily cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Like,
    Follow,
    Comment,
    Post,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] =
        [ActionKind::Like, ActionKind::Follow, ActionKind::Comment, ActionKind::Post];
}

/// What the circadian scheduler produces for the agent to execute next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Sleep,
    HomeFeed,
    SearchEngage,
    InfluencerVisit,
    CreateContent,
    EngageReplies,
    Explore,
    OwnProfile,
    SearchPeople,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySlot {
    pub kind: ActivityKind,
    pub scheduled_for: DateTime<Utc>,
    pub duration: Duration,
    pub intensity: f32,
    pub argument: Option<String>,
}

/// Epoch milliseconds, used for handle/lease age bookkeeping where a plain
/// monotonic integer is cheaper than a `DateTime`.
#[must_use]
pub fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis()
}

/// Unique handle/lease/agent identifiers.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_ring_caps_and_dedupes() {
        let mut ring = SeenRing::with_capacity(3);
        ring.push("a".into());
        ring.push("b".into());
        ring.push("a".into());
        assert_eq!(ring.len(), 2);
        ring.push("c".into());
        ring.push("d".into());
        assert_eq!(ring.len(), 3);
        assert!(!ring.contains("a"));
        assert!(ring.contains("d"));
    }

    #[test]
    fn status_derives_from_fields_not_stored() {
        let mut s = Stream::new(StreamKind::Tweet, "jack", Duration::from_secs(60));
        assert_eq!(s.status(), StreamStatus::Running);
        s.paused = true;
        assert_eq!(s.status(), StreamStatus::Paused);
        s.paused = false;
        s.backoff_until = Some(Utc::now() + chrono::Duration::seconds(60));
        assert_eq!(s.status(), StreamStatus::Backoff);
        s.stopped = true;
        assert_eq!(s.status(), StreamStatus::Stopped);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let mut s = Stream::new(StreamKind::Tweet, "jack", Duration::from_secs(60));
        s.consecutive_errors = 1;
        let base = Duration::from_secs(10);
        let cap = Duration::from_secs(40);
        let t1 = s.next_backoff(base, cap, 0);
        s.consecutive_errors = 10;
        let t2 = s.next_backoff(base, cap, 0);
        assert!(t2 - t1 <= chrono::Duration::seconds(31));
    }

    /// Scenario S4: interval 60s, two consecutive transient failures ⇒ next
    /// tick no sooner than `60 * 2^2 = 240s` from the attempt.
    #[test]
    fn backoff_after_two_errors_matches_spec_scenario_s4() {
        let mut s = Stream::new(StreamKind::Tweet, "jack", Duration::from_secs(60));
        s.consecutive_errors = 2;
        let before = Utc::now();
        let deadline = s.next_backoff(Duration::from_secs(60), Duration::from_secs(900), 0);
        assert!(deadline - before >= chrono::Duration::seconds(240));
    }
}
