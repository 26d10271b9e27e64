//! DMA-BUF format negotiation: the mapped format table, render devices and
//! the feedback accumulator built on top of them.

pub mod device;
pub mod feedback;
pub mod table;

pub use device::{DmabufAllocate, DrmRenderDevices, GpuDevice, RenderDevices};
pub use feedback::{FeedbackEvent, FeedbackNegotiator, FormatModifierMap};
pub use table::FormatTable;
