//! Core library components: the stream polling, browser pooling, and
//! autonomous agent scheduling engine.

pub mod agent;
pub mod cancel;
pub mod dispatcher;
pub mod domain;
pub mod events;
pub mod executor;
pub mod poller;
pub mod pool;
pub mod ports;
pub mod rate;
pub mod schedule;
pub mod state;
pub mod streams;
