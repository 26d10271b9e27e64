//! Copy-request capture: the client supplies a buffer and the compositor
//! copies the output into it.

use tracing::{debug, warn};

use crate::capture::BufferKind;
use crate::dmabuf::feedback::fourcc_name;
use crate::error::SessionFailure;

/// `zwlr_screencopy_frame_v1` flag bit.
pub const FLAG_Y_INVERT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyEvent {
    Buffer {
        format: u32,
        width: u32,
        height: u32,
        stride: u32,
    },
    LinuxDmabuf {
        format: u32,
        width: u32,
        height: u32,
    },
    BufferDone,
    Flags(u32),
    Damage {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Ready,
    Failed,
}

/// A buffer shape the compositor can copy into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOffer {
    Shm {
        /// `wl_shm` format code.
        format: u32,
        width: u32,
        height: u32,
        stride: u32,
    },
    Dmabuf {
        /// DRM fourcc.
        format: u32,
        width: u32,
        height: u32,
    },
}

impl BufferOffer {
    pub fn kind(&self) -> BufferKind {
        match self {
            BufferOffer::Shm { .. } => BufferKind::Shm,
            BufferOffer::Dmabuf { .. } => BufferKind::Dmabuf,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match *self {
            BufferOffer::Shm { width, height, .. } | BufferOffer::Dmabuf { width, height, .. } => {
                (width, height)
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CopyOutcome<B> {
    Nothing,
    /// Allocate a buffer for this offer and hand it back with
    /// [`CopyRequest::copy_into`].
    Allocate(BufferOffer),
    Present { width: u32, height: u32, target: B },
    Failed(SessionFailure),
}

/// One copy request. Accepts offers of exactly one buffer kind.
#[derive(Debug)]
pub struct CopyRequest<B> {
    wanted: BufferKind,
    offer: Option<BufferOffer>,
    ignored: Option<BufferKind>,
    target: Option<B>,
    flags: u32,
}

impl<B> CopyRequest<B> {
    pub fn new(wanted: BufferKind) -> Self {
        Self {
            wanted,
            offer: None,
            ignored: None,
            target: None,
            flags: 0,
        }
    }

    pub fn handle(&mut self, event: CopyEvent) -> CopyOutcome<B> {
        match event {
            CopyEvent::Buffer {
                format,
                width,
                height,
                stride,
            } => {
                debug!(format, width, height, stride, "screencopy: shm buffer offered");
                self.offer(BufferOffer::Shm {
                    format,
                    width,
                    height,
                    stride,
                });
                CopyOutcome::Nothing
            }
            CopyEvent::LinuxDmabuf {
                format,
                width,
                height,
            } => {
                debug!(format = %fourcc_name(format), width, height, "screencopy: dmabuf offered");
                self.offer(BufferOffer::Dmabuf {
                    format,
                    width,
                    height,
                });
                CopyOutcome::Nothing
            }
            CopyEvent::BufferDone => match self.offer {
                Some(offer) => CopyOutcome::Allocate(offer),
                None => {
                    let offered = self.ignored.map_or("no buffer", BufferKind::name);
                    warn!(offered, wanted = self.wanted.name(), "no usable buffer offered");
                    CopyOutcome::Failed(SessionFailure::UnsupportedBufferKind {
                        offered,
                        wanted: self.wanted.name(),
                    })
                }
            },
            CopyEvent::Flags(flags) => {
                debug!(y_invert = flags & FLAG_Y_INVERT != 0, "screencopy: flags");
                self.flags = flags;
                CopyOutcome::Nothing
            }
            CopyEvent::Damage {
                x,
                y,
                width,
                height,
            } => {
                debug!(x, y, width, height, "screencopy: damage");
                CopyOutcome::Nothing
            }
            CopyEvent::Ready => match (self.offer, self.target.take()) {
                (Some(offer), Some(target)) => {
                    let (width, height) = offer.size();
                    CopyOutcome::Present {
                        width,
                        height,
                        target,
                    }
                }
                _ => CopyOutcome::Failed(SessionFailure::Import(
                    "copy ready without a target buffer".into(),
                )),
            },
            CopyEvent::Failed => {
                self.target = None;
                CopyOutcome::Failed(SessionFailure::CopyFailed)
            }
        }
    }

    fn offer(&mut self, offer: BufferOffer) {
        if offer.kind() == self.wanted {
            self.offer = Some(offer);
        } else {
            debug!(kind = offer.kind().name(), "ignoring buffer kind");
            self.ignored = Some(offer.kind());
        }
    }

    /// Stores the buffer the compositor is about to copy into.
    pub fn copy_into(&mut self, target: B) {
        self.target = Some(target);
    }

    pub fn y_invert(&self) -> bool {
        self.flags & FLAG_Y_INVERT != 0
    }
}
