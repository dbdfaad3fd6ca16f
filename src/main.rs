use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use xstreamd::app::{App, Config};
use xstreamd::cli::{self, Cli, Commands};
use xstreamd::core::dispatcher::OperationRegistry;
use xstreamd::core::pool::BrowserDriver;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.init();

    info!("xstreamd starting");

    if let Err(e) = dispatch(config, cli.command).await {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

/// No concrete automation backend ships with this binary; reimplementing a
/// headless browser is out of scope for the crate. Real deployments embed
/// `xstreamd` as a library and supply their own `BrowserDriver` and scraper
/// operations to [`App::new`].
fn driver() -> Arc<dyn BrowserDriver> {
    Arc::new(xstreamd::app::UnconfiguredBrowserDriver)
}

async fn dispatch(config: Config, command: Commands) -> xstreamd::error::Result<()> {
    let app = App::new(config, driver(), Arc::new(OperationRegistry::new()), None, None);

    match command {
        Commands::Serve => {
            tokio::select! {
                result = app.run() => result?,
                _ = signal::ctrl_c() => {
                    info!("received shutdown signal");
                }
            }
            app.shutdown().await;
        }
        Commands::CreateStream(args) => {
            let kind = cli::parse_stream_kind(&args.kind)?;
            let id = app.create_stream(kind, args.target.clone(), args.interval(), args.owner.clone()).await?;
            println!("{id}");
        }
        Commands::ListStreams => {
            print_json(&app.list_streams())?;
        }
        Commands::GetStream(args) => {
            let stream = app.get_stream(&args.id).ok_or_else(|| xstreamd::error::Error::NotFound(args.id.clone()))?;
            print_json(&stream)?;
        }
        Commands::PauseStream(args) => {
            app.pause_stream(&args.id)?;
        }
        Commands::ResumeStream(args) => {
            app.resume_stream(&args.id)?;
        }
        Commands::UpdateStreamInterval(args) => {
            app.update_stream_interval(&args.id, std::time::Duration::from_secs(args.interval_secs))?;
        }
        Commands::StopStream(args) => {
            app.stop_stream(&args.id).await?;
        }
        Commands::StopAllStreams => {
            app.stop_all_streams().await?;
        }
        Commands::StreamHistory(args) => {
            let history = app.stream_history(&args.id, args.limit, args.topic.as_deref());
            print_json(&history)?;
        }
        Commands::GlobalStats => {
            let stats = app.global_stats();
            println!(
                "streams={} running={} paused={} backoff={} stopped={} pool_handles={} pool_pages_open={}",
                stats.stream_count, stats.running, stats.paused, stats.backoff, stats.stopped, stats.pool_handles, stats.pool_pages_open
            );
        }
        Commands::StartAgent(args) => {
            let profile = app
                .config()
                .agents
                .profiles
                .iter()
                .find(|p| p.agent_id == args.agent_id)
                .ok_or_else(|| xstreamd::error::Error::NotFound(format!("no configured agent profile named {}", args.agent_id)))?
                .clone();
            app.start_agent(&profile)?;
        }
        Commands::StopAgent(args) => {
            app.stop_agent(&args.agent_id).await?;
        }
        Commands::AgentStatus(args) => {
            let status = app.agent_status(&args.agent_id);
            print_json(&status)?;
        }
        Commands::AgentLogin(args) => {
            let logged_in = app.agent_login(&args.agent_id).await?;
            println!("{logged_in}");
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> xstreamd::error::Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| xstreamd::error::Error::Fatal(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}
