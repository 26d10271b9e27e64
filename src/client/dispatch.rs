//! `Dispatch` implementations: each protocol event becomes a component event.

use tracing::{debug, info, warn};
use wayland_client::protocol::{
    wl_buffer, wl_compositor, wl_output, wl_registry, wl_shm, wl_shm_pool, wl_surface,
};
use wayland_client::{event_created_child, Connection, Dispatch, Proxy, QueueHandle, WEnum};
use wayland_protocols::wp::linux_dmabuf::zv1::client::{
    zwp_linux_buffer_params_v1, zwp_linux_dmabuf_feedback_v1, zwp_linux_dmabuf_v1,
};
use wayland_protocols::wp::viewporter::client::{wp_viewport, wp_viewporter};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland_protocols_wlr::export_dmabuf::v1::client::{
    zwlr_export_dmabuf_frame_v1, zwlr_export_dmabuf_manager_v1,
};
use wayland_protocols_wlr::screencopy::v1::client::{
    zwlr_screencopy_frame_v1, zwlr_screencopy_manager_v1,
};

use super::ClientState;
use crate::capture::{CopyEvent, ExportEvent, FrameMeta};
use crate::configure::describe_states;
use crate::dmabuf::FeedbackEvent;

fn raw<T: Into<u32>>(value: WEnum<T>) -> u32 {
    match value {
        WEnum::Value(v) => v.into(),
        WEnum::Unknown(raw) => raw,
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for ClientState {
    fn event(
        state: &mut Self,
        _: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if state.is_failed() {
            return;
        }
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => state.on_global(name, &interface, version, qh),
            wl_registry::Event::GlobalRemove { name } => state.on_global_remove(name),
            _ => {}
        }
    }
}

impl Dispatch<wl_output::WlOutput, u32> for ClientState {
    fn event(
        state: &mut Self,
        _: &wl_output::WlOutput,
        event: wl_output::Event,
        global: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(output) = state.registry.output_mut(*global) else {
            return;
        };
        match event {
            wl_output::Event::Name { name } => {
                info!(global, name = %name, "output name");
                output.name = Some(name);
            }
            wl_output::Event::Scale { factor } => {
                debug!(output = %output.label(), factor, "output scale");
                output.scale = factor;
            }
            wl_output::Event::Mode { width, height, refresh, .. } => {
                debug!(output = %output.label(), width, height, refresh, "output mode");
            }
            wl_output::Event::Description { description } => {
                debug!(output = %output.label(), description = %description, "output description");
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_compositor::WlCompositor, ()> for ClientState {
    fn event(_: &mut Self, _: &wl_compositor::WlCompositor, _: wl_compositor::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {}
}

impl Dispatch<wl_shm::WlShm, ()> for ClientState {
    fn event(
        _: &mut Self,
        _: &wl_shm::WlShm,
        event: wl_shm::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            debug!(format = raw(format), "wl_shm format");
        }
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, ()> for ClientState {
    fn event(_: &mut Self, _: &wl_shm_pool::WlShmPool, _: wl_shm_pool::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {}
}

impl Dispatch<wl_buffer::WlBuffer, ()> for ClientState {
    fn event(
        state: &mut Self,
        buffer: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            state.on_buffer_release(buffer);
        }
    }
}

impl Dispatch<wl_surface::WlSurface, ()> for ClientState {
    fn event(
        state: &mut Self,
        _: &wl_surface::WlSurface,
        event: wl_surface::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if state.is_failed() {
            return;
        }
        match event {
            wl_surface::Event::Enter { output } => match output.data::<u32>() {
                Some(&global) => state.on_output_enter(global, qh),
                None => warn!("entered an output that was never bound"),
            },
            wl_surface::Event::Leave { output } => {
                if let Some(&global) = output.data::<u32>() {
                    state.on_output_leave(global);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<wp_viewporter::WpViewporter, ()> for ClientState {
    fn event(_: &mut Self, _: &wp_viewporter::WpViewporter, _: wp_viewporter::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {}
}

impl Dispatch<wp_viewport::WpViewport, ()> for ClientState {
    fn event(_: &mut Self, _: &wp_viewport::WpViewport, _: wp_viewport::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {}
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for ClientState {
    fn event(
        _: &mut Self,
        wm_base: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            debug!(serial, "ping");
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ()> for ClientState {
    fn event(
        state: &mut Self,
        _: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if state.is_failed() {
            return;
        }
        if let xdg_surface::Event::Configure { serial } = event {
            state.on_surface_configure(serial);
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, ()> for ClientState {
    fn event(
        state: &mut Self,
        _: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if state.is_failed() {
            return;
        }
        match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => {
                debug!(width, height, states = ?describe_states(&states), "xdg_toplevel configure");
                state.on_toplevel_configure(width, height, qh);
            }
            xdg_toplevel::Event::Close => {
                info!("close requested");
                state.configure.on_close();
            }
            _ => {}
        }
    }
}

impl Dispatch<zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1, ()> for ClientState {
    fn event(_: &mut Self, _: &zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1, _: zwp_linux_dmabuf_v1::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {}
}

impl Dispatch<zwp_linux_dmabuf_feedback_v1::ZwpLinuxDmabufFeedbackV1, ()> for ClientState {
    fn event(
        state: &mut Self,
        _: &zwp_linux_dmabuf_feedback_v1::ZwpLinuxDmabufFeedbackV1,
        event: zwp_linux_dmabuf_feedback_v1::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use zwp_linux_dmabuf_feedback_v1::Event;

        if state.is_failed() {
            return;
        }
        let event = match event {
            Event::MainDevice { device } => FeedbackEvent::MainDevice(device),
            Event::FormatTable { fd, size } => FeedbackEvent::FormatTable { fd, size },
            Event::TrancheTargetDevice { device } => FeedbackEvent::TrancheTargetDevice(device),
            Event::TrancheFlags { flags } => FeedbackEvent::TrancheFlags(raw(flags)),
            Event::TrancheFormats { indices } => FeedbackEvent::TrancheFormats(indices),
            Event::TrancheDone => FeedbackEvent::TrancheDone,
            Event::Done => FeedbackEvent::Done,
            _ => return,
        };
        state.on_feedback(event, qh);
    }
}

impl Dispatch<zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1, ()> for ClientState {
    fn event(
        _: &mut Self,
        _: &zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1,
        event: zwp_linux_buffer_params_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let zwp_linux_buffer_params_v1::Event::Failed = event {
            warn!("compositor rejected dmabuf import");
        }
    }

    event_created_child!(ClientState, zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1, [
        zwp_linux_buffer_params_v1::EVT_CREATED_OPCODE => (wl_buffer::WlBuffer, ()),
    ]);
}

impl Dispatch<zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1, ()> for ClientState {
    fn event(_: &mut Self, _: &zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1, _: zwlr_screencopy_manager_v1::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {}
}

impl Dispatch<zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1, ()> for ClientState {
    fn event(
        state: &mut Self,
        frame: &zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1,
        event: zwlr_screencopy_frame_v1::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use zwlr_screencopy_frame_v1::Event;

        if state.is_failed() {
            return;
        }
        let event = match event {
            Event::Buffer {
                format,
                width,
                height,
                stride,
            } => CopyEvent::Buffer {
                format: raw(format),
                width,
                height,
                stride,
            },
            Event::LinuxDmabuf {
                format,
                width,
                height,
            } => CopyEvent::LinuxDmabuf {
                format,
                width,
                height,
            },
            Event::BufferDone => CopyEvent::BufferDone,
            Event::Flags { flags } => CopyEvent::Flags(raw(flags)),
            Event::Damage {
                x,
                y,
                width,
                height,
            } => CopyEvent::Damage {
                x,
                y,
                width,
                height,
            },
            Event::Ready { .. } => CopyEvent::Ready,
            Event::Failed => CopyEvent::Failed,
            _ => return,
        };
        state.on_copy_event(frame, event, qh);
    }
}

impl Dispatch<zwlr_export_dmabuf_manager_v1::ZwlrExportDmabufManagerV1, ()> for ClientState {
    fn event(_: &mut Self, _: &zwlr_export_dmabuf_manager_v1::ZwlrExportDmabufManagerV1, _: zwlr_export_dmabuf_manager_v1::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {}
}

impl Dispatch<zwlr_export_dmabuf_frame_v1::ZwlrExportDmabufFrameV1, ()> for ClientState {
    fn event(
        state: &mut Self,
        frame: &zwlr_export_dmabuf_frame_v1::ZwlrExportDmabufFrameV1,
        event: zwlr_export_dmabuf_frame_v1::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use zwlr_export_dmabuf_frame_v1::Event;

        if state.is_failed() {
            return;
        }
        let event = match event {
            Event::Frame {
                width,
                height,
                offset_x,
                offset_y,
                buffer_flags,
                flags,
                format,
                mod_high,
                mod_low,
                num_objects,
            } => ExportEvent::Frame(FrameMeta {
                width,
                height,
                offset_x,
                offset_y,
                buffer_flags,
                flags: raw(flags),
                format,
                modifier: (u64::from(mod_high) << 32) | u64::from(mod_low),
                num_objects,
            }),
            Event::Object {
                index,
                fd,
                size,
                offset,
                stride,
                plane_index,
            } => ExportEvent::Object {
                index,
                fd,
                size,
                offset,
                stride,
                plane_index,
            },
            Event::Ready { .. } => ExportEvent::Ready,
            Event::Cancel { reason } => ExportEvent::Cancel {
                reason: raw(reason),
            },
            _ => return,
        };
        state.on_export_event(frame, event, qh);
    }
}
