//! Circadian activity scheduler.
//!
//! Generates a day's worth of [`ActivitySlot`]s from a small set of
//! archetype templates, jittered by a caller-supplied seeded RNG so the
//! whole day-plan is deterministic for a fixed seed. Grounded on the
//! strategy registry's table-of-archetypes shape: a static per-hour weight
//! table drives which activities are even candidates, and everything below
//! that is pure jitter math, no I/O.

use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::domain::ActivityKind;

pub use crate::core::domain::ActivitySlot;

const GRACE: chrono::Duration = chrono::Duration::minutes(15);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircadianConfig {
    pub timezone: Tz,
    /// `[start_hour, end_hour)` in local time; may wrap past midnight.
    pub sleep_hours: (u32, u32),
    pub search_queries: Vec<String>,
    pub influencer_usernames: Vec<String>,
    pub variance_minutes: u32,
    pub drop_probability: f32,
    pub binge_probability: f32,
}

impl Default for CircadianConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            sleep_hours: (1, 7),
            search_queries: Vec::new(),
            influencer_usernames: Vec::new(),
            variance_minutes: 20,
            drop_probability: 0.10,
            binge_probability: 0.05,
        }
    }
}

/// One hour's archetype template: the activities that may occur in that
/// hour and their base intensity.
struct HourArchetype {
    hour: u32,
    activities: &'static [(ActivityKind, f32, Duration)],
}

fn template() -> Vec<HourArchetype> {
    use ActivityKind::*;
    let minute = Duration::from_secs(60);
    vec![
        HourArchetype { hour: 7, activities: &[(HomeFeed, 0.5, Duration::from_secs(10 * 60))] },
        HourArchetype {
            hour: 8,
            activities: &[(HomeFeed, 0.6, Duration::from_secs(8 * 60)), (SearchPeople, 0.3, Duration::from_secs(5 * 60))],
        },
        HourArchetype { hour: 9, activities: &[(SearchEngage, 0.7, Duration::from_secs(15 * 60))] },
        HourArchetype {
            hour: 12,
            activities: &[(HomeFeed, 0.5, Duration::from_secs(12 * 60)), (Explore, 0.4, Duration::from_secs(10 * 60))],
        },
        HourArchetype { hour: 13, activities: &[(InfluencerVisit, 0.6, Duration::from_secs(8 * 60))] },
        HourArchetype { hour: 15, activities: &[(EngageReplies, 0.6, Duration::from_secs(10 * 60))] },
        HourArchetype { hour: 17, activities: &[(CreateContent, 0.8, Duration::from_secs(20 * 60))] },
        HourArchetype {
            hour: 19,
            activities: &[(HomeFeed, 0.7, Duration::from_secs(15 * 60)), (OwnProfile, 0.2, Duration::from_secs(3 * 60))],
        },
        HourArchetype { hour: 21, activities: &[(Explore, 0.5, Duration::from_secs(15 * 60))] },
        HourArchetype { hour: 22, activities: &[(EngageReplies, 0.4, minute.saturating_mul(10))] },
    ]
}

/// A generated, jittered day-plan. Built once per local calendar date and
/// reused by [`CircadianScheduler::get_next_activity`] until the date rolls
/// over.
#[derive(Debug, Clone)]
struct DayPlan {
    date: NaiveDate,
    slots: Vec<ActivitySlot>,
}

pub struct CircadianScheduler {
    config: CircadianConfig,
    plan: Option<DayPlan>,
}

impl CircadianScheduler {
    #[must_use]
    pub fn new(config: CircadianConfig) -> Self {
        Self { config, plan: None }
    }

    fn in_sleep_window(&self, local_hour: u32) -> bool {
        let (start, end) = self.config.sleep_hours;
        if start <= end {
            local_hour >= start && local_hour < end
        } else {
            local_hour >= start || local_hour < end
        }
    }

    /// Build (or rebuild, if the local date has rolled over) today's plan.
    fn ensure_plan(&mut self, now: DateTime<Utc>, rng: &mut impl Rng) {
        let local_now = now.with_timezone(&self.config.timezone);
        let today = local_now.date_naive();
        if self.plan.as_ref().is_some_and(|p| p.date == today) {
            return;
        }
        let is_weekend = matches!(local_now.weekday(), Weekday::Sat | Weekday::Sun);
        let mut slots = Vec::new();

        for hour in template() {
            if self.in_sleep_window(hour.hour) {
                continue;
            }
            for &(kind, intensity, base_duration) in hour.activities {
                if rng.gen_range(0.0..1.0) < self.config.drop_probability {
                    continue;
                }
                let mut local_hour = hour.hour;
                if is_weekend && local_hour < 10 {
                    local_hour += rng.gen_range(1..=3);
                }
                let Some(base_time) = self
                    .config
                    .timezone
                    .with_ymd_and_hms(today.year(), today.month(), today.day(), local_hour.min(23), rng.gen_range(0..60), 0)
                    .single()
                else {
                    continue;
                };

                let jitter_minutes = gaussian_jitter(rng, self.config.variance_minutes as f64).clamp(-30.0, 30.0);
                let scheduled_for =
                    (base_time + chrono::Duration::milliseconds((jitter_minutes * 60_000.0) as i64)).with_timezone(&Utc);

                let duration_factor = 1.0 + rng.gen_range(-0.2..0.2);
                let mut duration = base_duration.mul_f64(duration_factor.max(0.1) as f64);
                if rng.gen_range(0.0..1.0) < self.config.binge_probability {
                    duration *= 2u32;
                }

                let argument = match kind {
                    ActivityKind::SearchEngage | ActivityKind::SearchPeople => {
                        pick(rng, &self.config.search_queries)
                    }
                    ActivityKind::InfluencerVisit => pick(rng, &self.config.influencer_usernames),
                    _ => None,
                };

                slots.push(ActivitySlot { kind, scheduled_for, duration, intensity, argument });
            }
        }

        slots.sort_by_key(|s| s.scheduled_for);
        self.plan = Some(DayPlan { date: today, slots });
    }

    /// Returns the next activity to perform: a sleep slot if currently in
    /// the configured window, else the nearest future (or recently-due,
    /// within grace) slot, else a light fallback.
    pub fn get_next_activity(&mut self, now: DateTime<Utc>, rng: &mut impl Rng) -> ActivitySlot {
        let local_now = now.with_timezone(&self.config.timezone);
        if self.in_sleep_window(local_now.hour()) {
            return ActivitySlot {
                kind: ActivityKind::Sleep,
                scheduled_for: now,
                duration: self.time_until_wake(local_now),
                intensity: 0.0,
                argument: None,
            };
        }

        self.ensure_plan(now, rng);
        let plan = self.plan.as_ref().expect("ensure_plan always populates");

        if let Some(slot) = plan
            .slots
            .iter()
            .find(|s| s.scheduled_for + GRACE >= now)
            .cloned()
        {
            return slot;
        }

        ActivitySlot {
            kind: ActivityKind::HomeFeed,
            scheduled_for: now + chrono::Duration::minutes(rng.gen_range(1..10)),
            duration: Duration::from_secs(5 * 60),
            intensity: 0.3,
            argument: None,
        }
    }

    fn time_until_wake(&self, local_now: DateTime<Tz>) -> Duration {
        let (_, end) = self.config.sleep_hours;
        let mut wake_hour = end;
        let mut days_ahead = 0;
        if local_now.hour() >= end && self.config.sleep_hours.0 > self.config.sleep_hours.1 {
            // wrapped window, still "today" relative to the start side
        } else if local_now.hour() >= end {
            days_ahead = 1;
            wake_hour = end;
        }
        let wake_date = local_now.date_naive() + chrono::Duration::days(days_ahead);
        let Some(wake_at) = self
            .config
            .timezone
            .with_ymd_and_hms(wake_date.year(), wake_date.month(), wake_date.day(), wake_hour, 0, 0)
            .single()
        else {
            return Duration::from_secs(3600);
        };
        (wake_at - local_now).to_std().unwrap_or(Duration::from_secs(3600)).min(Duration::from_secs(8 * 3600))
    }
}

fn pick(rng: &mut impl Rng, pool: &[String]) -> Option<String> {
    if pool.is_empty() {
        return None;
    }
    Some(pool[rng.gen_range(0..pool.len())].clone())
}

/// Box-Muller transform producing a standard-normal sample scaled by
/// `std_dev_minutes`. Kept dependency-free (no `rand_distr`) since this is
/// the only place the scheduler needs a Gaussian.
fn gaussian_jitter(rng: &mut impl Rng, std_dev_minutes: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev_minutes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(42)
    }

    #[test]
    fn same_seed_produces_same_plan() {
        let mut a = CircadianScheduler::new(CircadianConfig::default());
        let mut b = CircadianScheduler::new(CircadianConfig::default());
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap();
        let mut ra = rng();
        let mut rb = rng();
        let slot_a = a.get_next_activity(now, &mut ra);
        let slot_b = b.get_next_activity(now, &mut rb);
        assert_eq!(slot_a.kind, slot_b.kind);
        assert_eq!(slot_a.scheduled_for, slot_b.scheduled_for);
    }

    #[test]
    fn sleep_window_returns_sleep_slot() {
        let mut sched = CircadianScheduler::new(CircadianConfig { sleep_hours: (1, 7), ..Default::default() });
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 3, 0, 0).unwrap();
        let slot = sched.get_next_activity(now, &mut rng());
        assert_eq!(slot.kind, ActivityKind::Sleep);
        assert!(slot.duration <= Duration::from_secs(8 * 3600));
    }

    #[test]
    fn slots_are_sorted_by_scheduled_for() {
        let mut sched = CircadianScheduler::new(CircadianConfig::default());
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 9, 0, 0).unwrap();
        let mut r = rng();
        sched.ensure_plan(now, &mut r);
        let plan = sched.plan.as_ref().unwrap();
        let mut sorted = plan.slots.clone();
        sorted.sort_by_key(|s| s.scheduled_for);
        assert_eq!(plan.slots.iter().map(|s| s.scheduled_for).collect::<Vec<_>>(),
                   sorted.iter().map(|s| s.scheduled_for).collect::<Vec<_>>());
    }
}
