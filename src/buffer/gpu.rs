//! GPU buffers for copy-request captures.

use smithay::backend::allocator::{Fourcc, Modifier};
use tracing::debug;

use crate::buffer::import::ImportRequest;
use crate::dmabuf::{DmabufAllocate, FeedbackNegotiator, RenderDevices};
use crate::error::SessionFailure;

/// Allocates a `width`x`height` buffer of `fourcc` on the negotiated main
/// device, restricted to the modifiers the compositor accepts for it, and
/// describes its planes for import.
///
/// While a resent feedback round is still arriving, a format or device the
/// round has not settled yet is reported as
/// [`SessionFailure::NegotiationPending`] instead of a fatal failure.
pub fn allocate_for_capture<D>(
    negotiator: &mut FeedbackNegotiator<D>,
    fourcc: Fourcc,
    width: u32,
    height: u32,
) -> Result<ImportRequest, SessionFailure>
where
    D: RenderDevices,
    D::Device: DmabufAllocate,
{
    let settling = !negotiator.is_stable();
    let modifiers: Vec<Modifier> = match negotiator.negotiated().modifiers(fourcc as u32) {
        Some(modifiers) => modifiers.iter().map(|&m| Modifier::from(m)).collect(),
        None if settling => return Err(SessionFailure::NegotiationPending { format: fourcc }),
        None => return Err(SessionFailure::UnresolvedFormat { format: fourcc }),
    };

    let node = negotiator.main_node().map(|n| format!("{n:?}"));
    let device = match negotiator.device_mut() {
        Some(device) => device,
        None if settling => return Err(SessionFailure::NegotiationPending { format: fourcc }),
        None => return Err(SessionFailure::NoRenderDevice),
    };
    let dmabuf = device
        .allocate(width, height, fourcc, &modifiers)
        .map_err(SessionFailure::Allocation)?;

    let request = ImportRequest::from_dmabuf(&dmabuf)?;
    debug!(
        format = ?fourcc,
        node = node.as_deref().unwrap_or("unknown"),
        width,
        height,
        modifier = format_args!("{:#x}", request.modifier),
        planes = request.planes.len(),
        "allocated capture buffer"
    );
    for plane in &request.planes {
        debug!(
            plane = plane.plane_index,
            offset = plane.offset,
            stride = plane.stride,
            "capture buffer plane"
        );
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmabuf::feedback::tests::{dev, indices, table, FakeDevice, FakeDevices, XRGB8888};
    use crate::dmabuf::FeedbackEvent;
    use crate::error::Error;
    use smithay::backend::allocator::dmabuf::{Dmabuf, DmabufFlags};
    use std::os::fd::OwnedFd;
    use test_log::test;

    impl DmabufAllocate for FakeDevice {
        fn allocate(
            &mut self,
            width: u32,
            height: u32,
            fourcc: Fourcc,
            modifiers: &[Modifier],
        ) -> Result<Dmabuf, String> {
            // Pick the last offered modifier so the test can tell it was honored.
            let modifier = *modifiers.last().ok_or("no modifiers")?;
            let size = (width as i32, height as i32);
            let mut builder = Dmabuf::builder(size, fourcc, modifier, DmabufFlags::empty());
            let stride = width * 4;
            for idx in 0..2u32 {
                let fd = OwnedFd::from(tempfile::tempfile().map_err(|e| e.to_string())?);
                builder.add_plane(fd, idx, idx * stride * height, stride);
            }
            builder.build().ok_or_else(|| "incomplete dmabuf".to_string())
        }
    }

    fn negotiated(modifiers: &[u64]) -> FeedbackNegotiator<FakeDevices> {
        let mut neg = FeedbackNegotiator::new(FakeDevices::default());
        let entries: Vec<_> = modifiers.iter().map(|&m| (XRGB8888, m)).collect();
        let idx: Vec<u16> = (0..entries.len() as u16).collect();
        neg.handle(FeedbackEvent::MainDevice(dev(7))).unwrap();
        neg.handle(table(&entries)).unwrap();
        neg.handle(FeedbackEvent::TrancheTargetDevice(dev(7))).unwrap();
        neg.handle(FeedbackEvent::TrancheFormats(indices(&idx))).unwrap();
        neg.handle(FeedbackEvent::TrancheDone).unwrap();
        neg.handle(FeedbackEvent::Done).unwrap();
        neg
    }

    #[test]
    fn test_allocation_mirrors_planes() {
        let mut neg = negotiated(&[0, 0x0100_0000_0000_0002]);
        let req = allocate_for_capture(&mut neg, Fourcc::Xrgb8888, 64, 32).unwrap();
        assert_eq!((req.width, req.height), (64, 32));
        assert_eq!(req.format, XRGB8888);
        assert_eq!(req.modifier, 0x0100_0000_0000_0002);
        let layout: Vec<_> = req
            .planes
            .iter()
            .map(|p| (p.plane_index, p.offset, p.stride))
            .collect();
        assert_eq!(layout, vec![(0, 0, 256), (1, 256 * 32, 256)]);
    }

    #[test]
    fn test_unresolved_format_is_fatal() {
        let mut neg = negotiated(&[0]);
        let err = allocate_for_capture(&mut neg, Fourcc::Argb8888, 64, 32).unwrap_err();
        assert_eq!(
            err,
            SessionFailure::UnresolvedFormat {
                format: Fourcc::Argb8888
            }
        );
        assert!(Error::from(err).is_fatal());
    }

    #[test]
    fn test_round_without_usable_device() {
        let mut neg = negotiated(&[0]);
        neg.handle(FeedbackEvent::MainDevice(dev(500))).unwrap();
        neg.handle(table(&[(XRGB8888, 0)])).unwrap();
        neg.handle(FeedbackEvent::TrancheTargetDevice(dev(500))).unwrap();
        neg.handle(FeedbackEvent::TrancheFormats(indices(&[0]))).unwrap();
        neg.handle(FeedbackEvent::TrancheDone).unwrap();
        neg.handle(FeedbackEvent::Done).unwrap();
        assert!(neg.negotiated().is_empty());

        let err = allocate_for_capture(&mut neg, Fourcc::Xrgb8888, 8, 8).unwrap_err();
        assert_eq!(
            err,
            SessionFailure::UnresolvedFormat {
                format: Fourcc::Xrgb8888
            }
        );
    }

    #[test]
    fn test_resent_feedback_keeps_negotiated_format() {
        let mut neg = negotiated(&[0]);
        neg.handle(FeedbackEvent::MainDevice(dev(7))).unwrap();
        assert!(!neg.is_stable());

        let req = allocate_for_capture(&mut neg, Fourcc::Xrgb8888, 16, 16).unwrap();
        assert_eq!(req.format, XRGB8888);
        assert_eq!(req.modifier, 0);
    }

    #[test]
    fn test_unsettled_round_is_retryable() {
        let mut neg = negotiated(&[0]);
        neg.handle(FeedbackEvent::MainDevice(dev(500))).unwrap();

        let err = allocate_for_capture(&mut neg, Fourcc::Xrgb8888, 16, 16).unwrap_err();
        assert_eq!(
            err,
            SessionFailure::NegotiationPending {
                format: Fourcc::Xrgb8888
            }
        );
        assert!(!Error::from(err.clone()).is_fatal());

        let err = allocate_for_capture(&mut neg, Fourcc::Argb8888, 16, 16).unwrap_err();
        assert!(matches!(err, SessionFailure::NegotiationPending { .. }));
    }
}
