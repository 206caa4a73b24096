use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use zimage_core::Pipeline;
use zimage_server::{batch, config::WorkerArgs, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    telemetry::init_stderr();

    let pipeline = Pipeline::new(args.model.loader());

    if let Some(test_input) = args.test_input {
        let event: Value =
            serde_json::from_str(&test_input).context("--test-input is not valid JSON")?;
        let output = batch::handle(&pipeline, event).await;
        println!("{output}");
        return Ok(());
    }

    tracing::info!("waiting for events on stdin");
    let answered = batch::process_lines(&pipeline, tokio::io::stdin(), tokio::io::stdout()).await?;
    tracing::info!(answered, "stdin closed");
    Ok(())
}
