//! Output mirror: a Wayland client that negotiates DMA-BUF formats for its
//! surface and shows the output it is on, captured with wlr-screencopy or
//! wlr-export-dmabuf.

pub mod buffer;
pub mod capture;
pub mod client;
pub mod config;
pub mod configure;
pub mod dmabuf;
pub mod error;
pub mod registry;

pub use client::CaptureClient;
pub use config::Args;
pub use error::{Error, Result};
