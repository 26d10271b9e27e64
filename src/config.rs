//! Command-line configuration.

use clap::{Parser, ValueEnum};

use crate::capture::BufferKind;

/// Which capture protocol drives the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CaptureProtocol {
    /// zwlr_screencopy_manager_v1: the client supplies the buffer and asks
    /// the compositor to copy into it.
    Screencopy,
    /// zwlr_export_dmabuf_manager_v1: the compositor hands out its own
    /// DMA-BUF planes.
    ExportDmabuf,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "wl-output-mirror")]
#[command(about = "Mirror the output a window is shown on into that window")]
pub struct Args {
    /// Wayland display to connect to (socket name or absolute path)
    #[arg(short, long, env = "WAYLAND_DISPLAY")]
    pub display: Option<String>,

    /// Capture protocol
    #[arg(long, value_enum, default_value = "screencopy")]
    pub protocol: CaptureProtocol,

    /// Buffer kind accepted from screencopy; the other kind is ignored
    #[arg(long, value_enum, default_value = "dmabuf")]
    pub buffer_kind: BufferKind,

    /// Width used when the compositor leaves the window size up to us
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u32).range(1..))]
    pub fallback_width: u32,

    /// Height used when the compositor leaves the window size up to us
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u32).range(1..))]
    pub fallback_height: u32,

    /// Composite the cursor into captured frames
    #[arg(long)]
    pub overlay_cursor: bool,

    /// Capture again after every presented frame instead of once per output
    #[arg(long)]
    pub continuous: bool,

    /// Toplevel title
    #[arg(long, default_value = "output mirror")]
    pub title: String,

    /// Toplevel app id
    #[arg(long, default_value = "wl-output-mirror")]
    pub app_id: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn fallback_size(&self) -> (u32, u32) {
        (self.fallback_width, self.fallback_height)
    }
}
