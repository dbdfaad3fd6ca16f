//! xstreamd - stream polling, browser pooling, and autonomous agent
//! scheduling core.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/             # Reusable library components
//! │   ├── domain/       # Stream/event/quota/activity types
//! │   ├── pool/         # Browser handle + page lease pool
//! │   ├── dispatcher/   # Named scraper operation registry
//! │   ├── state/        # Durable key/value store trait + in-memory impl
//! │   ├── rate/         # Per-endpoint rate-limit registry
//! │   ├── poller/       # Per-stream poll-and-diff kernel
//! │   ├── streams/      # Stream Manager (lifecycle, restart replay)
//! │   ├── events/       # Event Bus (per-stream pub/sub)
//! │   ├── schedule/     # Circadian activity scheduler
//! │   └── agent/        # Agent orchestrator + daily quota
//! └── app/              # Application orchestration and configuration
//! ```
//!
//! # Features
//!
//! - `testkit` - expose in-memory fakes (browser driver, scraper
//!   operations, clock) for use from integration tests in downstream
//!   crates.

pub mod app;
pub mod cli;
pub mod core;
pub mod error;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
