//! Command-line binding for the management interface.
//!
//! Each subcommand boots a fresh [`App`](crate::app::App) against the
//! configured state store and performs one call. `serve` is the only
//! subcommand that keeps the process running; the others are a thin CLI
//! binding over the library surface, not a client to a separate daemon —
//! wiring this to a long-lived out-of-process service is left to the
//! embedder, exactly as the transport is left unspecified.

pub mod paths;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::core::domain::StreamKind;
use crate::error::{Error, Result};

#[derive(Parser, Debug)]
#[command(name = "xstreamd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value_os_t = paths::default_config())]
    pub config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full engine in the foreground: replay persisted streams,
    /// autostart configured agents, and serve until interrupted.
    Serve,

    /// Create a new stream.
    CreateStream(CreateStreamArgs),
    /// List all armed streams.
    ListStreams,
    /// Show one stream's current record.
    GetStream(StreamIdArgs),
    /// Pause a stream's polling without losing its dedup state.
    PauseStream(StreamIdArgs),
    /// Resume a paused or backed-off stream.
    ResumeStream(StreamIdArgs),
    /// Change a stream's poll interval.
    UpdateStreamInterval(UpdateIntervalArgs),
    /// Stop and release a stream permanently.
    StopStream(StreamIdArgs),
    /// Stop every armed stream.
    StopAllStreams,
    /// Show recorded events for a stream.
    StreamHistory(StreamHistoryArgs),
    /// Show aggregate counts across all streams and the browser pool.
    GlobalStats,

    /// Start one configured agent profile by id.
    StartAgent(AgentIdArgs),
    /// Stop a running agent.
    StopAgent(AgentIdArgs),
    /// Show whether an agent is currently running.
    AgentStatus(AgentIdArgs),
    /// Check (or establish) an agent's logged-in session.
    AgentLogin(AgentIdArgs),
}

#[derive(Parser, Debug)]
pub struct CreateStreamArgs {
    /// tweet, follower, or mention.
    pub kind: String,
    /// Username or handle the stream tracks.
    pub target: String,
    /// Poll interval in seconds; defaults to the configured default.
    #[arg(long)]
    pub interval_secs: Option<u64>,
    /// Opaque owner label recorded on the stream.
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Parser, Debug)]
pub struct StreamIdArgs {
    pub id: String,
}

#[derive(Parser, Debug)]
pub struct UpdateIntervalArgs {
    pub id: String,
    pub interval_secs: u64,
}

#[derive(Parser, Debug)]
pub struct StreamHistoryArgs {
    pub id: String,
    #[arg(long, default_value = "50")]
    pub limit: usize,
    #[arg(long)]
    pub topic: Option<String>,
}

#[derive(Parser, Debug)]
pub struct AgentIdArgs {
    pub agent_id: String,
}

/// Parse a `tweet`/`follower`/`mention` CLI argument into a [`StreamKind`].
/// `StreamKind` intentionally has no `FromStr` of its own: the wire-level
/// string only exists at this CLI boundary.
pub fn parse_stream_kind(raw: &str) -> Result<StreamKind> {
    match raw {
        "tweet" => Ok(StreamKind::Tweet),
        "follower" => Ok(StreamKind::Follower),
        "mention" => Ok(StreamKind::Mention),
        other => Err(Error::Validation { field: "kind", reason: format!("unrecognized stream kind: {other}") }),
    }
}

impl CreateStreamArgs {
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}
