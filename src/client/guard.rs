//! Protocol objects that send their destructor request when dropped.

use std::fmt;
use std::ops::Deref;

use wayland_client::backend::ObjectId;
use wayland_client::protocol::{
    wl_buffer::WlBuffer, wl_compositor::WlCompositor, wl_output::WlOutput, wl_shm::WlShm,
    wl_shm_pool::WlShmPool, wl_surface::WlSurface,
};
use wayland_client::Proxy;
use wayland_protocols::wp::linux_dmabuf::zv1::client::{
    zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1,
    zwp_linux_dmabuf_feedback_v1::ZwpLinuxDmabufFeedbackV1, zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1,
};
use wayland_protocols::wp::viewporter::client::{
    wp_viewport::WpViewport, wp_viewporter::WpViewporter,
};
use wayland_protocols::xdg::shell::client::{
    xdg_surface::XdgSurface, xdg_toplevel::XdgToplevel, xdg_wm_base::XdgWmBase,
};
use wayland_protocols_wlr::export_dmabuf::v1::client::{
    zwlr_export_dmabuf_frame_v1::ZwlrExportDmabufFrameV1,
    zwlr_export_dmabuf_manager_v1::ZwlrExportDmabufManagerV1,
};
use wayland_protocols_wlr::screencopy::v1::client::{
    zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1,
    zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1,
};

use crate::buffer::PresentedBuffer;

pub trait Destroy: Proxy {
    /// Sends the destructor request, if the interface has one at the bound
    /// version.
    fn destroy_proxy(&self);
}

macro_rules! destroy_request {
    ($($proxy:ty => $request:ident),* $(,)?) => {
        $(
            impl Destroy for $proxy {
                fn destroy_proxy(&self) {
                    self.$request();
                }
            }
        )*
    };
}

destroy_request! {
    WlSurface => destroy,
    WlShmPool => destroy,
    WlBuffer => destroy,
    WpViewporter => destroy,
    WpViewport => destroy,
    XdgWmBase => destroy,
    XdgSurface => destroy,
    XdgToplevel => destroy,
    ZwpLinuxDmabufV1 => destroy,
    ZwpLinuxDmabufFeedbackV1 => destroy,
    ZwpLinuxBufferParamsV1 => destroy,
    ZwlrScreencopyManagerV1 => destroy,
    ZwlrScreencopyFrameV1 => destroy,
    ZwlrExportDmabufManagerV1 => destroy,
    ZwlrExportDmabufFrameV1 => destroy,
}

impl Destroy for WlCompositor {
    fn destroy_proxy(&self) {}
}

impl Destroy for WlShm {
    fn destroy_proxy(&self) {
        if self.version() >= 2 {
            self.release();
        }
    }
}

impl Destroy for WlOutput {
    fn destroy_proxy(&self) {
        if self.version() >= 3 {
            self.release();
        }
    }
}

/// Owns a proxy and destroys it on drop.
pub struct ProxyGuard<P: Destroy>(P);

impl<P: Destroy> ProxyGuard<P> {
    pub fn new(proxy: P) -> Self {
        Self(proxy)
    }
}

impl<P: Destroy> Deref for ProxyGuard<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.0
    }
}

impl<P: Destroy> Drop for ProxyGuard<P> {
    fn drop(&mut self) {
        tracing::trace!(object = %self.0.id(), "destroying");
        self.0.destroy_proxy();
    }
}

impl<P: Destroy> fmt::Debug for ProxyGuard<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyGuard({})", self.0.id())
    }
}

impl PresentedBuffer for ProxyGuard<WlBuffer> {
    type Key = ObjectId;

    fn key(&self) -> ObjectId {
        self.0.id()
    }
}
