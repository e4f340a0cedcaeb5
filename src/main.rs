// ABOUTME: Entry point for the lookout CLI application.
// ABOUTME: Initializes tracing, loads configuration and dispatches subcommands.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, LogFormat, OverrideArgs};
use lookout::agent::{self, Agent};
use lookout::api;
use lookout::config::{self, Config};
use lookout::error::{Error, Result};
use lookout::runtime;
use lookout::runtime::traits::RuntimeInfo;
use lookout::update::Trigger;
use std::env;
use std::path::Path;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let cwd = env::current_dir()?;
    match cli.command {
        Commands::Init { force } => {
            config::init_config(&cwd, force)?;
            println!("Wrote {}", cwd.join(config::CONFIG_FILENAME).display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { overrides } => {
            let config = load(cli.config.as_deref(), &cwd, overrides)?;
            check(&config).await
        }
        Commands::Once { overrides } => {
            let config = load(cli.config.as_deref(), &cwd, overrides)?;
            once(&config).await
        }
        Commands::Run { overrides } => {
            let config = load(cli.config.as_deref(), &cwd, overrides)?;
            serve(config).await.map(|()| ExitCode::SUCCESS)
        }
    }
}

fn load(path: Option<&Path>, cwd: &Path, overrides: OverrideArgs) -> Result<Config> {
    let mut config = Config::resolve(path, cwd)?;
    config.apply_env()?;
    config.apply_overrides(&overrides.into());
    config.validate()?;
    Ok(config)
}

/// Ping every provider and print what answered.
async fn check(config: &Config) -> Result<ExitCode> {
    println!("Configuration OK ({} provider(s))", config.providers.len());
    let mut healthy = true;
    for provider in config.providers.iter() {
        let runtime = match runtime::connect(provider).await {
            Ok(runtime) => runtime,
            Err(e) => {
                println!("  ✗ {}: {e}", provider.id);
                healthy = false;
                continue;
            }
        };
        match runtime.info().await {
            Ok(info) => println!(
                "  ✓ {}: {} {} (API {}, {})",
                provider.id,
                info.name,
                info.version,
                info.api_version,
                runtime.mode()
            ),
            Err(e) => {
                println!("  ✗ {}: {e}", provider.id);
                healthy = false;
            }
        }
    }
    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// One blocking session per provider, then exit.
async fn once(config: &Config) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let agent = Agent::connect(config, cancel.clone()).await?;
    let shutdown = tokio::spawn(cancel_on_ctrl_c(cancel));

    let results = agent.run_all(Trigger::Manual, true).await;
    shutdown.abort();

    let mut failed = false;
    for result in &results {
        println!(
            "{}: {} (updated {}, failed {}, skipped {}, up to date {})",
            result.provider,
            result.status,
            result.counts.updated,
            result.counts.failed,
            result.counts.skipped,
            result.counts.up_to_date
        );
        failed |= result.is_failure();
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        cancel.cancel();
    }
}

/// The long-running agent.
async fn serve(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let agent = Agent::connect(&config, cancel.clone()).await?;

    let signals = tokio::spawn(agent::watch_signals(agent.clone()));
    let server = if config.api.enabled {
        let token = config.api.resolved_token()?;
        if token.is_none() {
            tracing::warn!("HTTP API enabled without a token");
        }
        let agent = agent.clone();
        let listen = config.api.listen;
        Some(tokio::spawn(async move {
            let served = api::serve(agent.clone(), listen, token).await;
            if let Err(e) = &served {
                tracing::error!(%listen, error = %e, "HTTP API stopped, shutting down");
                agent.cancel_token().cancel();
            }
            served
        }))
    } else {
        None
    };

    agent
        .schedule(config.update.poll_interval, config.update.run_on_start)
        .await;

    agent.drain().await;
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(e) => tracing::error!(error = %e, "HTTP API task failed"),
        }
    }
    match signals.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "signal handler failed"),
        Err(e) => tracing::error!(error = %e, "signal task failed"),
    }
    tracing::info!("lookout stopped");
    Ok(())
}
