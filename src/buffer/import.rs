//! Plane layout of a DMA-BUF about to be imported as a `wl_buffer`.

use std::os::fd::OwnedFd;

use smithay::backend::allocator::dmabuf::Dmabuf;
use smithay::backend::allocator::Buffer;

use crate::error::SessionFailure;

#[derive(Debug)]
pub struct ImportPlane {
    pub fd: OwnedFd,
    pub plane_index: u32,
    pub offset: u32,
    pub stride: u32,
}

/// Everything `zwp_linux_buffer_params_v1` needs for one buffer.
#[derive(Debug)]
pub struct ImportRequest {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub modifier: u64,
    /// `zwp_linux_buffer_params_v1` flags (y-invert, interlaced, bottom-first).
    pub flags: u32,
    pub planes: Vec<ImportPlane>,
}

impl ImportRequest {
    /// Mirrors the allocator's plane layout one plane at a time. Handles are
    /// duplicated so the request can outlive the buffer object.
    pub fn from_dmabuf(dmabuf: &Dmabuf) -> Result<Self, SessionFailure> {
        let format = dmabuf.format();
        let planes = dmabuf
            .handles()
            .zip(dmabuf.offsets())
            .zip(dmabuf.strides())
            .enumerate()
            .map(|(idx, ((fd, offset), stride))| {
                let fd = fd
                    .try_clone_to_owned()
                    .map_err(|e| SessionFailure::Import(format!("dup plane {idx}: {e}")))?;
                Ok(ImportPlane {
                    fd,
                    plane_index: idx as u32,
                    offset,
                    stride,
                })
            })
            .collect::<Result<Vec<_>, SessionFailure>>()?;

        if planes.is_empty() {
            return Err(SessionFailure::NoPlanes);
        }

        Ok(Self {
            width: dmabuf.width(),
            height: dmabuf.height(),
            format: format.code as u32,
            modifier: format.modifier.into(),
            flags: 0,
            planes,
        })
    }

    /// Builds a request from compositor-exported planes, which may arrive in
    /// any order.
    pub fn from_planes(
        width: u32,
        height: u32,
        format: u32,
        modifier: u64,
        flags: u32,
        mut planes: Vec<ImportPlane>,
    ) -> Result<Self, SessionFailure> {
        if planes.is_empty() {
            return Err(SessionFailure::NoPlanes);
        }
        planes.sort_by_key(|p| p.plane_index);

        Ok(Self {
            width,
            height,
            format,
            modifier,
            flags,
            planes,
        })
    }

    pub fn modifier_hi(&self) -> u32 {
        (self.modifier >> 32) as u32
    }

    pub fn modifier_lo(&self) -> u32 {
        (self.modifier & 0xffff_ffff) as u32
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use test_log::test;

    pub(crate) fn plane(plane_index: u32, offset: u32) -> ImportPlane {
        ImportPlane {
            fd: OwnedFd::from(tempfile::tempfile().unwrap()),
            plane_index,
            offset,
            stride: 256,
        }
    }

    #[test]
    fn test_planes_sorted_by_index() {
        let planes = vec![plane(2, 300), plane(0, 0), plane(1, 100)];
        let req = ImportRequest::from_planes(64, 64, 0x3231_564e, 0, 0, planes).unwrap();
        let order: Vec<_> = req.planes.iter().map(|p| (p.plane_index, p.offset)).collect();
        assert_eq!(order, vec![(0, 0), (1, 100), (2, 300)]);
    }

    #[test]
    fn test_no_planes() {
        let err = ImportRequest::from_planes(64, 64, 0, 0, 0, Vec::new()).unwrap_err();
        assert_eq!(err, SessionFailure::NoPlanes);
    }

    #[test]
    fn test_modifier_split() {
        let req = ImportRequest::from_planes(
            1,
            1,
            0,
            0x0100_0000_0000_0f01,
            0,
            vec![plane(0, 0)],
        )
        .unwrap();
        assert_eq!(req.modifier_hi(), 0x0100_0000);
        assert_eq!(req.modifier_lo(), 0x0000_0f01);
    }
}
