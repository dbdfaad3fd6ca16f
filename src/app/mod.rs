//! Application layer: wires the core engine together from [`Config`] and
//! exposes the management surface the CLI binds to.

pub mod config;

pub use config::{AgentProfileConfig, Config, LoggingConfig};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::agent::AgentOrchestrator;
use crate::core::cancel::{self, CancelSource};
use crate::core::dispatcher::OperationRegistry;
use crate::core::domain::{Event, Stream, StreamKind};
use crate::core::events::EventBus;
use crate::core::executor::{ActivityOperationNames, DispatcherActivityExecutor};
use crate::core::pool::{BrowserDriver, BrowserHandleRef, BrowserPool};
use crate::core::ports::{Planner, SessionStore};
use crate::core::rate::RateLimitRegistry;
use crate::core::state::{MemoryStateStore, StateStore};
use crate::core::streams::{CreateOptions, GlobalStats, StreamManager};
use crate::error::{Error, Result};

/// Placeholder [`BrowserDriver`] used when no concrete automation backend is
/// supplied. Reimplementing a headless browser is out of scope for this
/// crate; a real deployment supplies its own `BrowserDriver` (and scraper
/// operations) to [`App::new`]. Launch attempts against this driver fail
/// fast with a clear, non-retryable error rather than hanging.
pub struct UnconfiguredBrowserDriver;

#[async_trait::async_trait]
impl BrowserDriver for UnconfiguredBrowserDriver {
    async fn launch(&self) -> Result<Box<dyn BrowserHandleRef>> {
        Err(Error::Fatal(
            "no BrowserDriver configured; supply a concrete automation backend to App::new before arming streams or agents".into(),
        ))
    }
}

struct AgentHandle {
    persona: String,
    cancel: CancelSource,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub agent_id: String,
    pub persona: String,
    pub running: bool,
}

/// Assembled application: one [`StreamManager`] and zero or more running
/// agent orchestrators sharing a [`BrowserPool`] and [`RateLimitRegistry`].
pub struct App {
    config: Config,
    store: Arc<dyn StateStore>,
    pool: Arc<BrowserPool>,
    operations: Arc<OperationRegistry>,
    rate: Arc<RateLimitRegistry>,
    streams: Arc<StreamManager>,
    session: Option<Arc<dyn SessionStore>>,
    planner: Option<Arc<dyn Planner>>,
    agents: Mutex<HashMap<String, AgentHandle>>,
}

impl App {
    /// Assemble the engine from `config`. `driver` and `operations` are the
    /// pluggable seams this crate deliberately leaves to the caller (see
    /// [`UnconfiguredBrowserDriver`] for a stand-in); `session`/`planner` are
    /// optional collaborators used only by the agent orchestrator.
    #[must_use]
    pub fn new(
        config: Config,
        driver: Arc<dyn BrowserDriver>,
        operations: Arc<OperationRegistry>,
        session: Option<Arc<dyn SessionStore>>,
        planner: Option<Arc<dyn Planner>>,
    ) -> Arc<Self> {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let pool = BrowserPool::new(driver, (&config.browser).into());
        let rate = Arc::new(RateLimitRegistry::new(config.rate_limit.strategy.into(), Duration::from_secs(config.rate_limit.wait_cap_secs)));
        let bus = Arc::new(EventBus::new(256));
        let streams = StreamManager::new(config.streams.to_manager_config(), store.clone(), pool.clone(), operations.clone(), rate.clone(), bus);

        Arc::new(Self { config, store, pool, operations, rate, streams, session, planner, agents: Mutex::new(HashMap::new()) })
    }

    /// Replay persisted non-stopped streams, then enter the service loop
    /// until cancelled (by ctrl-c in `main`, or by a test harness). Starts
    /// every agent profile configured for autostart.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let replayed = self.streams.restart_replay().await?;
        info!(replayed, "stream restart replay complete");

        for profile in &self.config.agents.profiles {
            if let Err(e) = self.start_agent(profile) {
                warn!(agent_id = %profile.agent_id, error = %e, "failed to autostart agent");
            }
        }

        std::future::pending::<()>().await;
        Ok(())
    }

    /// Stop every armed stream and running agent, then release the browser
    /// pool. Called from `main`'s signal handler path.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.stop_all_agents();
        if let Err(e) = self.streams.stop_all().await {
            warn!(error = %e, "error stopping streams during shutdown");
        }
        self.pool.shutdown().await;
    }

    // --- Stream management surface (§6) ---

    pub async fn create_stream(self: &Arc<Self>, kind: StreamKind, target: String, interval: Option<Duration>, owner: Option<String>) -> Result<String> {
        let interval = interval.unwrap_or(self.config.streams.to_manager_config().default_interval);
        self.streams.create(kind, target, interval, CreateOptions { owner }).await
    }

    #[must_use]
    pub fn list_streams(&self) -> Vec<Stream> {
        self.streams.list()
    }

    #[must_use]
    pub fn get_stream(&self, id: &str) -> Option<Stream> {
        self.streams.status(id)
    }

    pub fn pause_stream(&self, id: &str) -> Result<()> {
        self.streams.pause(id)
    }

    pub fn resume_stream(&self, id: &str) -> Result<()> {
        self.streams.resume(id)
    }

    pub fn update_stream_interval(&self, id: &str, interval: Duration) -> Result<()> {
        self.streams.update_interval(id, interval)
    }

    pub async fn stop_stream(&self, id: &str) -> Result<()> {
        self.streams.stop(id).await
    }

    pub async fn stop_all_streams(&self) -> Result<()> {
        self.streams.stop_all().await
    }

    #[must_use]
    pub fn stream_history(&self, id: &str, limit: usize, topic: Option<&str>) -> Vec<Event> {
        self.streams.history(id, limit, topic)
    }

    #[must_use]
    pub fn global_stats(&self) -> GlobalStats {
        self.streams.global_stats()
    }

    // --- Agent management surface (§6) ---

    /// Start a new agent orchestrator from `profile`, spawned as an
    /// independent task sharing this app's pool and rate registry. Returns
    /// `Validation` if an agent with the same id is already running.
    pub fn start_agent(self: &Arc<Self>, profile: &AgentProfileConfig) -> Result<()> {
        let mut agents = self.agents.lock();
        if agents.contains_key(&profile.agent_id) {
            return Err(Error::Validation { field: "agent_id", reason: format!("agent {} is already running", profile.agent_id) });
        }
        let agent_config = profile.to_agent_config()?;
        let names = ActivityOperationNames::from(&self.config.agents.operations);
        let executor = DispatcherActivityExecutor::new(
            self.pool.clone(),
            self.operations.clone(),
            names,
            Duration::from_secs(self.config.agents.operation_timeout_secs),
        );
        let orchestrator = Arc::new(AgentOrchestrator::new(agent_config, self.rate.clone(), executor, self.session.clone(), self.planner.clone()));
        let (source, token) = cancel::pair();
        let handle = tokio::spawn(async move { orchestrator.run(token).await });
        agents.insert(profile.agent_id.clone(), AgentHandle { persona: profile.persona.clone(), cancel: source, handle });
        info!(agent_id = %profile.agent_id, "agent started");
        Ok(())
    }

    /// Signal `id`'s orchestrator to stop and wait briefly for it to unwind.
    /// A second `stop_agent` on an already-stopped id is a no-op.
    pub async fn stop_agent(&self, id: &str) -> Result<()> {
        let entry = self.agents.lock().remove(id);
        let Some(entry) = entry else {
            return Ok(());
        };
        entry.cancel.cancel();
        if tokio::time::timeout(Duration::from_secs(10), entry.handle).await.is_err() {
            warn!(agent_id = id, "agent did not unwind within grace period");
        }
        info!(agent_id = id, "agent stopped");
        Ok(())
    }

    fn stop_all_agents(&self) {
        let mut agents = self.agents.lock();
        for (id, entry) in agents.drain() {
            entry.cancel.cancel();
            entry.handle.abort();
            info!(agent_id = %id, "agent cancelled during shutdown");
        }
    }

    #[must_use]
    pub fn agent_status(&self, id: &str) -> Option<AgentStatus> {
        let agents = self.agents.lock();
        let entry = agents.get(id)?;
        Some(AgentStatus { agent_id: id.to_string(), persona: entry.persona.clone(), running: !entry.handle.is_finished() })
    }

    #[must_use]
    pub fn list_agents(&self) -> Vec<AgentStatus> {
        self.agents
            .lock()
            .iter()
            .map(|(id, entry)| AgentStatus { agent_id: id.clone(), persona: entry.persona.clone(), running: !entry.handle.is_finished() })
            .collect()
    }

    /// Delegate to the configured session collaborator, if any. Returns
    /// `NotFound` when no session store is wired up (session persistence is
    /// one of this crate's external collaborators, not an implementation).
    pub async fn agent_login(&self, id: &str) -> Result<bool> {
        let Some(session) = &self.session else {
            return Err(Error::NotFound("no session collaborator configured".into()));
        };
        session.is_logged_in(id).await
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }
}
