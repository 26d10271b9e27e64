//! wl-output-mirror - show the output a window is on inside that window
//!
//! Negotiates DMA-BUF formats through linux-dmabuf surface feedback, then
//! captures the output with wlr-screencopy (client-allocated buffers) or
//! wlr-export-dmabuf (compositor-exported planes) and presents each frame.

use anyhow::{Context, Result};
use clap::Parser;
use outputmirror::{Args, CaptureClient};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();

    info!(
        protocol = ?args.protocol,
        buffer_kind = args.buffer_kind.name(),
        continuous = args.continuous,
        "wl-output-mirror starting"
    );

    let mut client = CaptureClient::connect(args).context("failed to set up mirror window")?;
    client.run()?;

    info!("shutting down");
    Ok(())
}
