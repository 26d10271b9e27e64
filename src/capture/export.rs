//! Direct-export capture: the compositor exports its own DMA-BUF planes.

use std::os::fd::OwnedFd;

use tracing::{debug, warn};

use crate::buffer::{ImportPlane, ImportRequest};
use crate::dmabuf::feedback::fourcc_name;
use crate::error::SessionFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// Passed through as `zwp_linux_buffer_params_v1` flags.
    pub buffer_flags: u32,
    /// Frame flags (transient).
    pub flags: u32,
    pub format: u32,
    pub modifier: u64,
    pub num_objects: u32,
}

#[derive(Debug)]
pub enum ExportEvent {
    Frame(FrameMeta),
    Object {
        index: u32,
        fd: OwnedFd,
        size: u32,
        offset: u32,
        stride: u32,
        plane_index: u32,
    },
    Ready,
    Cancel { reason: u32 },
}

#[derive(Debug)]
pub enum ExportOutcome {
    Pending,
    Present(ImportRequest),
    Failed(SessionFailure),
}

/// Accumulates the planes of one exported frame.
#[derive(Debug, Default)]
pub struct ExportFrame {
    meta: Option<FrameMeta>,
    planes: Vec<ImportPlane>,
}

impl ExportFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: ExportEvent) -> ExportOutcome {
        match event {
            ExportEvent::Frame(meta) => {
                debug!(
                    width = meta.width,
                    height = meta.height,
                    format = %fourcc_name(meta.format),
                    modifier = format_args!("{:#x}", meta.modifier),
                    objects = meta.num_objects,
                    "export frame"
                );
                if !self.planes.is_empty() {
                    debug!(stale = self.planes.len(), "discarding planes of previous frame");
                }
                self.planes.clear();
                self.meta = Some(meta);
                ExportOutcome::Pending
            }
            ExportEvent::Object {
                index,
                fd,
                size,
                offset,
                stride,
                plane_index,
            } => {
                debug!(index, size, offset, stride, plane_index, "export object");
                if self.meta.is_none() {
                    warn!(index, "object before frame metadata, dropping");
                    return ExportOutcome::Pending;
                }
                self.planes.push(ImportPlane {
                    fd,
                    plane_index,
                    offset,
                    stride,
                });
                ExportOutcome::Pending
            }
            ExportEvent::Ready => self.finish(),
            ExportEvent::Cancel { reason } => {
                debug!(reason, "export frame cancelled");
                self.meta = None;
                self.planes.clear();
                ExportOutcome::Failed(SessionFailure::Cancelled { reason })
            }
        }
    }

    fn finish(&mut self) -> ExportOutcome {
        let planes = std::mem::take(&mut self.planes);
        let Some(meta) = self.meta.take() else {
            return ExportOutcome::Failed(SessionFailure::Import(
                "frame ready without metadata".into(),
            ));
        };
        if planes.len() != meta.num_objects as usize {
            warn!(
                expected = meta.num_objects,
                got = planes.len(),
                "object count mismatch"
            );
        }

        match ImportRequest::from_planes(
            meta.width,
            meta.height,
            meta.format,
            meta.modifier,
            meta.buffer_flags,
            planes,
        ) {
            Ok(request) => ExportOutcome::Present(request),
            Err(e) => ExportOutcome::Failed(e),
        }
    }
}
