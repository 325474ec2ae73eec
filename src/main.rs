mod cli;
mod config;
mod console;
mod engine;
mod error;
mod executor;
mod gateway;
mod model;
mod parse;
mod reconciler;
mod sessions;
mod settings;
mod store;
mod surface;
mod switcher;
mod terminal;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use cli::CliArgs;
use config::TrayConfig;
use console::{console_channel, run_console};
use engine::{Collaborators, Engine, EngineConfig};
use executor::KubectlExecutor;
use reconciler::WatcherConfig;
use settings::FileSettings;
use std::sync::Arc;
use terminal::XtermLauncher;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = TrayConfig::load(&args)?;
    init_tracing(&config.log_filter)?;
    if let Some(source) = &config.source {
        info!("loaded config from {}", source.display());
    }

    let settings = Arc::new(FileSettings::open(&config.settings_path).with_context(|| {
        format!(
            "failed to open settings {}",
            config.settings_path.display()
        )
    })?);
    info!("settings stored in {}", settings.path().display());
    let (surface, notifier, events) = console_channel();
    let collaborators = Collaborators {
        executor: Arc::new(KubectlExecutor::new(
            config.kubectl.clone(),
            config.command_timeout,
        )),
        notifier: Arc::new(notifier),
        surface: Arc::new(surface),
        settings: settings.clone(),
        launcher: Arc::new(XtermLauncher::new(
            config.terminal.clone(),
            config.kubectl.clone(),
            settings,
        )),
    };
    let engine = Arc::new(Engine::new(
        collaborators,
        EngineConfig {
            watcher: WatcherConfig {
                interval: config.refresh,
                grace: config.grace,
            },
            startup_delay: config.startup_delay,
        },
    ));

    if !engine.bootstrap().await {
        warn!("cluster not reachable, use 'refresh' once it is");
    }
    run_console(engine, events).await
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}
