use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use storypilot::api::ClaudeCli;
use storypilot::config::Config;
use storypilot::output::{spawn_observer, ChannelPrinter, ConsolePrinter, Theme};
use storypilot::runtime::{QueueOrchestrator, Runner, StatusFile, EXIT_CANCELLED};
use storypilot::state::Router;

/// Drive stories through status-routed assistant workflows.
#[derive(Parser, Debug)]
#[command(name = "storypilot", version)]
struct Cli {
    /// Keep running routed workflows on each story until it reaches a terminal status.
    #[arg(long, conflicts_with = "full_cycle")]
    lifecycle: bool,

    /// Run every configured cycle step for each story in order.
    #[arg(long)]
    full_cycle: bool,

    /// Story keys, processed in the order given.
    #[arg(value_name = "STORY_KEY", required = true)]
    keys: Vec<String>,
}

enum Mode {
    Queue,
    Lifecycle,
    FullCycle,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.lifecycle {
            Mode::Lifecycle
        } else if self.full_cycle {
            Mode::FullCycle
        } else {
            Mode::Queue
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    storypilot::logging::init();

    let config = Config::load()?;
    config.validate()?;
    let router = Router::default();
    config.validate_router(&router)?;
    let mode = cli.mode();
    let keys = cli.keys;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            ctrl_c.cancel();
        }
    });

    let config = Arc::new(config);
    let executor = Arc::new(ClaudeCli::new(&config));
    let status = StatusFile::new(config.status_file.clone());
    let (printer, updates) = ChannelPrinter::channel();
    let observer = spawn_observer(updates, ConsolePrinter::new(Theme::detect()));

    let runner = Runner::new(executor, Box::new(printer), Arc::clone(&config), cancel.clone());
    let mut orchestrator = QueueOrchestrator::new(runner, status, router);

    let mut exit_code = 0;
    match mode {
        Mode::Queue => exit_code = orchestrator.run_queue(&keys).await.exit_code,
        Mode::Lifecycle => {
            for key in &keys {
                let result = orchestrator.run_lifecycle(key).await;
                if !result.success {
                    exit_code = result.exit_code;
                    break;
                }
            }
        }
        Mode::FullCycle => {
            for key in &keys {
                let report = orchestrator.runner_mut().run_full_cycle(key).await;
                if !report.success() {
                    exit_code = report.exit_code;
                    break;
                }
            }
        }
    }
    if cancel.is_cancelled() && exit_code == 0 {
        exit_code = EXIT_CANCELLED;
    }

    // Dropping the orchestrator closes the update channel so the observer can drain.
    drop(orchestrator);
    let _ = observer.await;

    std::process::exit(exit_code);
}
