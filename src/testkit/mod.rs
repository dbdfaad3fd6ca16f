//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests, for downstream crates that embed `xstreamd` as a
//! library).
//!
//! # Modules
//!
//! - [`browser`] — Fake [`BrowserDriver`](crate::core::pool::BrowserDriver)
//!   implementations: `FakeDriver` (always succeeds), `ScriptedDriver`
//!   (queued launch results, controllable handle health).
//! - [`operation`] — Fake [`ScraperOperation`](crate::core::dispatcher::ScraperOperation)
//!   implementations: `ScriptedOperation`, `EchoOperation`, `SlowOperation`.
//! - [`domain`] — Builders for domain primitives: streams, events, activity
//!   slots, so tests focus on assertions rather than construction
//!   boilerplate.

pub mod browser;
pub mod domain;
pub mod operation;
