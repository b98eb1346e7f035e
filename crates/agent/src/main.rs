//! `autodroid` — device-side automation agent.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ad_domain::config::AgentConfig;

#[derive(Parser)]
#[command(name = "autodroid", version, about = "Device-side automation agent")]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(long, default_value = "autodroid.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent (the default).
    Serve,
    /// Validate the configuration and exit.
    CheckConfig,
}

fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("loading {}: {e}", cli.config.display()))?;
    init_tracing(&config.log_filter);

    match cli.command.unwrap_or(Command::Serve) {
        Command::CheckConfig => {
            let issues = config.validate();
            if issues.is_empty() {
                println!("configuration ok");
                return Ok(());
            }
            for issue in &issues {
                println!("{issue}");
            }
            if AgentConfig::has_errors(&issues) {
                anyhow::bail!("configuration has errors");
            }
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: AgentConfig) -> anyhow::Result<()> {
    let engine = ad_agent::build_engine(config).await?;
    engine.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
        _ = engine.wait_for_shutdown() => {
            tracing::info!("shutdown requested remotely");
        }
    }

    engine.stop().await;
    Ok(())
}
