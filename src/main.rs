use std::sync::Arc;

use anyhow::Context;
use cvm_decision::{
    app::App, cli::parse_args, clock::SystemClock, config::Config, logging::init_tracing,
};

fn main() -> anyhow::Result<()> {
    // Must run while the process is still single-threaded.
    let clock = SystemClock::local();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(run(clock))
}

async fn run(clock: SystemClock) -> anyhow::Result<()> {
    let args = parse_args()?;
    let config = Config::load(&args.config_path)
        .with_context(|| format!("failed to load config from {}", args.config_path.display()))?;
    let _logging_guard = init_tracing(&config.logging)?;
    tracing::debug!(target: "decision", utc_offset = ?clock.offset(), "clock_selected");

    let app = App::build_with_clock(&config, Arc::new(clock)).await?;
    let results = app.batch.run(&args.customer_ids, &args.mode()).await;
    for result in &results {
        println!(
            "{}",
            serde_json::to_string(result).context("failed to serialize decision result")?
        );
    }

    if args.print_ledger {
        let snapshot = app.ledger.snapshot();
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("failed to serialize ledger")?
        );
    }

    let failed = results.iter().filter(|result| !result.is_success()).count();
    tracing::info!(
        target: "batch",
        decisions = results.len(),
        failed = failed,
        "run_finished"
    );
    Ok(())
}
