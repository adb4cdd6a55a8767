mod cli;
mod error;
mod live;
mod screen;
mod streamer;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use cli::Cli;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use live::gemini::GeminiTransport;
use screen::dump::prepare_dump_dir;
use screen::source::create_frame_source;
use streamer::output::StdoutSink;
use streamer::{SessionDriver, StreamOutcome, StreamerOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Diagnostics on stderr; stdout carries only model text.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let spec = cli.capture_spec().context("Invalid capture settings")?;
    let session_config = cli.session_config().context("Invalid session settings")?;
    if cli.api_key.is_none() {
        warn!("no API key given (--api-key or GOOGLE_API_KEY); the endpoint will likely refuse the session");
    }

    let source = create_frame_source(&spec).context("Failed to set up frame capture")?;
    if let Some(dir) = &cli.dump_dir {
        prepare_dump_dir(dir, cli.clean_dump_dir)
            .with_context(|| format!("Failed to prepare dump directory {}", dir.display()))?;
    }
    info!(source = %source.describe(), fps = spec.fps, "capture configured");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("interrupted; shutting down (press Ctrl-C again to exit immediately)");
        on_signal.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted again; exiting without cleanup");
            std::process::exit(130);
        }
    });

    let mut driver = SessionDriver::new(StreamerOptions {
        transport: Arc::new(GeminiTransport::new(cli.endpoint.clone(), cli.api_key.clone())),
        protocol: cli.protocol,
        model: cli.model.clone(),
        session_config,
        instruction: cli.prompt.clone(),
        dump_dir: cli.dump_dir.clone(),
    });

    let result = driver.stream(source, &mut StdoutSink::new(), &cancel).await;
    debug!(state = ?driver.state(), "driver finished");
    let outcome = result.context("Streaming session failed")?;

    match outcome {
        StreamOutcome::SourceExhausted => info!("no more frames"),
        StreamOutcome::SessionEnded => info!("session closed by the server"),
        StreamOutcome::Cancelled => info!("stopped"),
    }
    Ok(())
}
