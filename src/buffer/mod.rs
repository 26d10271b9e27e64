//! Presentation and capture buffers: the shm store, GPU allocations, the
//! import description shared by both DMA-BUF paths, and the attach slot.

pub mod gpu;
pub mod import;
pub mod shm;
pub mod slot;

pub use gpu::allocate_for_capture;
pub use import::{ImportPlane, ImportRequest};
pub use shm::{ShmLayout, ShmPlacement, ShmStore};
pub use slot::{PresentationSlot, PresentedBuffer};

/// `wl_shm` code for XRGB8888.
pub const SHM_XRGB8888: u32 = 1;
pub const SHM_BYTES_PER_PIXEL: u32 = 4;

/// Grey used for the 1x1 placeholder shown before the first frame.
pub const FALLBACK_GREY: u8 = 0xcc;
