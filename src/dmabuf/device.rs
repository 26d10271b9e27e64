//! Render node resolution and GBM allocator devices.

use std::fmt;
use std::fs::File;
use std::os::fd::OwnedFd;

use smithay::backend::allocator::dmabuf::{Dmabuf, DmabufAllocator};
use smithay::backend::allocator::gbm::{GbmAllocator, GbmBufferFlags, GbmDevice};
use smithay::backend::allocator::{Allocator, Fourcc, Modifier};
use smithay::backend::drm::{CreateDrmNodeError, DrmNode, NodeType};
use smithay::utils::DeviceFd;
use tracing::info;

use crate::error::ProtocolViolation;

/// Kernel device number as carried by linux-dmabuf feedback arrays.
pub type DeviceId = libc::dev_t;

/// Width of a device id in a feedback array.
pub const DEVICE_ID_SIZE: usize = std::mem::size_of::<DeviceId>();

/// Decodes a `main_device` / `tranche_target_device` array.
pub fn parse_device_id(bytes: &[u8]) -> Result<DeviceId, ProtocolViolation> {
    let raw: [u8; DEVICE_ID_SIZE] =
        bytes
            .try_into()
            .map_err(|_| ProtocolViolation::DeviceIdSize {
                got: bytes.len(),
                expected: DEVICE_ID_SIZE,
            })?;
    Ok(DeviceId::from_ne_bytes(raw))
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no drm node for device {0:#x}: {1}")]
    Node(DeviceId, #[source] CreateDrmNodeError),

    #[error("device {0:#x} has no render node")]
    NoRenderNode(DeviceId),

    #[error("failed to open render node {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves compositor device ids and opens allocator handles on them.
///
/// The negotiator only compares nodes and holds on to devices, so tests can
/// substitute fake devices.
pub trait RenderDevices {
    type Node: PartialEq + fmt::Debug + Clone;
    type Device;

    fn resolve(&self, id: DeviceId) -> Result<Self::Node, DeviceError>;
    fn open(&self, node: &Self::Node) -> Result<Self::Device, DeviceError>;
}

/// Allocates GPU buffers with a choice of modifiers.
pub trait DmabufAllocate {
    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifiers: &[Modifier],
    ) -> Result<Dmabuf, String>;
}

/// Real devices: DRM render nodes with a GBM allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrmRenderDevices;

impl RenderDevices for DrmRenderDevices {
    type Node = DrmNode;
    type Device = GpuDevice;

    fn resolve(&self, id: DeviceId) -> Result<DrmNode, DeviceError> {
        let node = DrmNode::from_dev_id(id).map_err(|e| DeviceError::Node(id, e))?;
        match node.node_with_type(NodeType::Render) {
            Some(Ok(render)) => Ok(render),
            Some(Err(e)) => Err(DeviceError::Node(id, e)),
            None => Err(DeviceError::NoRenderNode(id)),
        }
    }

    fn open(&self, node: &DrmNode) -> Result<GpuDevice, DeviceError> {
        GpuDevice::open(node.clone())
    }
}

/// An open render node and the GBM allocator on top of it.
pub struct GpuDevice {
    node: DrmNode,
    allocator: DmabufAllocator<GbmAllocator<DeviceFd>>,
}

impl fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuDevice").field("node", &self.node).finish()
    }
}

impl GpuDevice {
    pub fn open(node: DrmNode) -> Result<Self, DeviceError> {
        let path = node.dev_path().ok_or(DeviceError::NoRenderNode(node.dev_id()))?;
        let open_err = |source| DeviceError::Open {
            path: path.display().to_string(),
            source,
        };

        let file = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(open_err)?;
        let fd = DeviceFd::from(OwnedFd::from(file));
        let gbm = GbmDevice::new(fd).map_err(open_err)?;
        info!(path = %path.display(), "using render node");

        let allocator = GbmAllocator::new(gbm, GbmBufferFlags::RENDERING);
        Ok(Self {
            node,
            allocator: DmabufAllocator(allocator),
        })
    }
}

impl DmabufAllocate for GpuDevice {
    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifiers: &[Modifier],
    ) -> Result<Dmabuf, String> {
        self.allocator
            .create_buffer(width, height, fourcc, modifiers)
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_parse_device_id() {
        let id: DeviceId = 0xe280;
        assert_eq!(parse_device_id(&id.to_ne_bytes()).unwrap(), id);
    }

    #[test]
    fn test_parse_device_id_wrong_width() {
        let err = parse_device_id(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::DeviceIdSize {
                got: 3,
                expected: DEVICE_ID_SIZE
            }
        );
    }

    #[test]
    fn test_resolve_missing_device() {
        // Major 0 is never a DRM device.
        let res = DrmRenderDevices.resolve(0);
        assert!(res.is_err());
    }
}
