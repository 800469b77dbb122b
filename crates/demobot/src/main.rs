use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use demobot_core::config::{Config, RunMode};

/// Democratic moderation bot: lets a group vote members out.
#[derive(Debug, Parser)]
#[command(name = "demobot", version)]
struct Cli {
    /// Read devconfig.json instead of config.json.
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    demobot_core::logging::init("demobot")?;

    let mode = if cli.dev {
        RunMode::Development
    } else {
        RunMode::Production
    };
    let cfg = Arc::new(Config::load(mode).context("loading configuration")?);
    tracing::info!(mode = ?mode, bot = %cfg.bot_username, "configuration loaded");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    cancel.cancel();
                }
                Err(e) => tracing::warn!("cannot listen for Ctrl-C: {e}"),
            }
        });
    }

    demobot_telegram::router::run(cfg, cancel)
        .await
        .context("bot failed")?;
    Ok(())
}
