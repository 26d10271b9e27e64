//! Wayland client: one xdg toplevel that mirrors the output it is shown on.
//!
//! Protocol events are translated into the component event types in
//! [`dispatch`] and handled here. Handlers cannot return errors to
//! `wayland-client`, so the first fatal error is latched in [`ClientState`]
//! and the main loop returns it.

mod dispatch;
pub mod guard;

use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use smithay::backend::allocator::Fourcc;
use tracing::{debug, info, warn};
use wayland_client::backend::ObjectId;
use wayland_client::protocol::{
    wl_buffer::WlBuffer, wl_compositor::WlCompositor, wl_output, wl_output::WlOutput,
    wl_registry::WlRegistry, wl_shm, wl_shm::WlShm, wl_shm_pool::WlShmPool, wl_surface::WlSurface,
};
use wayland_client::{Connection, EventQueue, Proxy, QueueHandle};
use wayland_protocols::wp::linux_dmabuf::zv1::client::{
    zwp_linux_buffer_params_v1, zwp_linux_dmabuf_feedback_v1::ZwpLinuxDmabufFeedbackV1,
    zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1,
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

use crate::buffer::{
    allocate_for_capture, ImportRequest, PresentationSlot, ShmLayout, ShmPlacement, ShmStore,
    FALLBACK_GREY, SHM_BYTES_PER_PIXEL, SHM_XRGB8888,
};
use crate::capture::{
    BufferKind, BufferOffer, CaptureSession, CopyEvent, CopyOutcome, CopyRequest, ExportEvent,
    ExportFrame, ExportOutcome, SessionFrame, SessionKind, SessionSlot,
};
use crate::config::{Args, CaptureProtocol};
use crate::configure::{ConfigureState, Finish};
use crate::dmabuf::{DrmRenderDevices, FeedbackEvent, FeedbackNegotiator};
use crate::error::{Error, FatalLatch, Result, SessionFailure};
use crate::registry::{GlobalAction, GlobalRegistry, Singleton};
use guard::ProxyGuard;

type Buffer = ProxyGuard<WlBuffer>;

/// Capture buffers in the shm pool start after the fallback pixel.
const SHM_CAPTURE_OFFSET: usize = SHM_BYTES_PER_PIXEL as usize;

/// The frame object of a capture session.
#[derive(Debug)]
pub enum CaptureFrame {
    Copy(ProxyGuard<ZwlrScreencopyFrameV1>),
    Export(ProxyGuard<ZwlrExportDmabufFrameV1>),
}

impl SessionFrame for CaptureFrame {
    type Id = ObjectId;

    fn id(&self) -> ObjectId {
        match self {
            CaptureFrame::Copy(frame) => frame.id(),
            CaptureFrame::Export(frame) => frame.id(),
        }
    }
}

/// Bound singletons, in bind order.
#[derive(Debug, Default)]
struct Globals {
    compositor: Option<ProxyGuard<WlCompositor>>,
    shm: Option<ProxyGuard<WlShm>>,
    viewporter: Option<ProxyGuard<WpViewporter>>,
    wm_base: Option<ProxyGuard<XdgWmBase>>,
    linux_dmabuf: Option<ProxyGuard<ZwpLinuxDmabufV1>>,
    screencopy: Option<ProxyGuard<ZwlrScreencopyManagerV1>>,
    export_dmabuf: Option<ProxyGuard<ZwlrExportDmabufManagerV1>>,
}

impl Globals {
    fn teardown(&mut self) {
        self.export_dmabuf = None;
        self.screencopy = None;
        self.linux_dmabuf = None;
        self.wm_base = None;
        self.viewporter = None;
        self.shm = None;
        self.compositor = None;
    }
}

/// Surface objects created after the capability check, in creation order.
#[derive(Debug, Default)]
struct SurfaceObjects {
    shm_store: Option<ShmStore>,
    shm_pool: Option<ProxyGuard<WlShmPool>>,
    surface: Option<ProxyGuard<WlSurface>>,
    feedback: Option<ProxyGuard<ZwpLinuxDmabufFeedbackV1>>,
    viewport: Option<ProxyGuard<WpViewport>>,
    xdg_surface: Option<ProxyGuard<XdgSurface>>,
    toplevel: Option<ProxyGuard<XdgToplevel>>,
}

pub struct ClientState {
    args: Args,
    latch: FatalLatch,
    wl_registry: WlRegistry,
    registry: GlobalRegistry<ProxyGuard<WlOutput>>,
    globals: Globals,
    objects: SurfaceObjects,
    negotiator: FeedbackNegotiator<DrmRenderDevices>,
    configure: ConfigureState,
    slot: PresentationSlot<Buffer>,
    shm_placement: ShmPlacement<ObjectId>,
    sessions: SessionSlot<CaptureFrame, Buffer>,
    current_output: Option<u32>,
    /// A capture waiting for the feedback round in progress to finish.
    capture_deferred: bool,
}

impl ClientState {
    fn new(args: Args, wl_registry: WlRegistry) -> Self {
        let wanted = wanted_singletons(&args);
        let configure = ConfigureState::new(args.fallback_size());
        Self {
            args,
            latch: FatalLatch::default(),
            wl_registry,
            registry: GlobalRegistry::new(&wanted),
            globals: Globals::default(),
            objects: SurfaceObjects::default(),
            negotiator: FeedbackNegotiator::new(DrmRenderDevices),
            configure,
            slot: PresentationSlot::new(),
            shm_placement: ShmPlacement::new(SHM_CAPTURE_OFFSET),
            sessions: SessionSlot::new(),
            current_output: None,
            capture_deferred: false,
        }
    }

    fn is_failed(&self) -> bool {
        self.latch.is_set()
    }

    /// Latches fatal errors; logs recoverable ones and drops the session.
    fn report(&mut self, result: Result<()>) {
        let Err(e) = result else {
            return;
        };
        let Some(e) = self.latch.latch(e) else {
            return;
        };
        self.sessions.end();
        if let Error::Session(SessionFailure::NegotiationPending { .. }) = e {
            info!("{e}; capturing again once it is done");
            self.capture_deferred = true;
        } else {
            warn!("{e}; waiting for the next output enter");
        }
    }

    fn take_fatal(&mut self) -> Result<()> {
        self.latch.take()
    }

    fn on_global(&mut self, name: u32, interface: &str, version: u32, qh: &QueueHandle<Self>) {
        let action = self
            .registry
            .on_global_latched(&mut self.latch, name, interface, version);

        let registry = &self.wl_registry;
        let globals = &mut self.globals;
        match action {
            GlobalAction::Ignore => {}
            GlobalAction::BindOutput { version } => {
                let output: WlOutput = registry.bind(name, version, qh, name);
                self.registry.add_output(name, ProxyGuard::new(output));
                info!(name, version, "bound wl_output");
            }
            GlobalAction::Bind { singleton, version } => {
                match singleton {
                    Singleton::Compositor => {
                        let proxy: WlCompositor = registry.bind(name, version, qh, ());
                        globals.compositor = Some(ProxyGuard::new(proxy));
                    }
                    Singleton::Shm => {
                        let proxy: WlShm = registry.bind(name, version, qh, ());
                        globals.shm = Some(ProxyGuard::new(proxy));
                    }
                    Singleton::Viewporter => {
                        let proxy: WpViewporter = registry.bind(name, version, qh, ());
                        globals.viewporter = Some(ProxyGuard::new(proxy));
                    }
                    Singleton::WmBase => {
                        let proxy: XdgWmBase = registry.bind(name, version, qh, ());
                        globals.wm_base = Some(ProxyGuard::new(proxy));
                    }
                    Singleton::LinuxDmabuf => {
                        let proxy: ZwpLinuxDmabufV1 = registry.bind(name, version, qh, ());
                        globals.linux_dmabuf = Some(ProxyGuard::new(proxy));
                    }
                    Singleton::ScreencopyManager => {
                        let proxy: ZwlrScreencopyManagerV1 = registry.bind(name, version, qh, ());
                        globals.screencopy = Some(ProxyGuard::new(proxy));
                    }
                    Singleton::ExportDmabufManager => {
                        let proxy: ZwlrExportDmabufManagerV1 = registry.bind(name, version, qh, ());
                        globals.export_dmabuf = Some(ProxyGuard::new(proxy));
                    }
                }
                info!(name, version, "bound {}", singleton.interface());
            }
        }
    }

    fn on_global_remove(&mut self, name: u32) {
        match self.registry.on_global_remove(name) {
            Ok(Some(output)) => {
                if self.sessions.end_for_output(name).is_some() {
                    info!(output = %output.label(), "capture session ended with its output");
                }
                if self.current_output == Some(name) {
                    self.current_output = None;
                }
            }
            Ok(None) => {}
            Err(e) => self.report(Err(e)),
        }
    }

    fn on_feedback(&mut self, event: FeedbackEvent, qh: &QueueHandle<Self>) {
        let result = self.negotiator.handle(event);
        self.report(result);
        if self.is_failed() || !self.negotiator.is_stable() {
            return;
        }
        if !std::mem::take(&mut self.capture_deferred) {
            return;
        }
        if let (Some(output), false) = (self.current_output, self.sessions.is_active()) {
            debug!(generation = self.negotiator.generation(), "feedback settled, capturing");
            let result = self.start_capture(output, qh);
            self.report(result);
        }
    }

    fn on_surface_configure(&mut self, serial: u32) {
        if let Some(finish) = self.configure.on_surface_configure(serial) {
            self.finish_configure(finish);
        }
    }

    fn on_toplevel_configure(&mut self, width: i32, height: i32, qh: &QueueHandle<Self>) {
        let outcome = self.configure.on_toplevel_configure(width, height);
        if let Some((width, height)) = outcome.resize {
            let result = self.resize(width, height, qh);
            self.report(result);
        }
        if let Some(finish) = outcome.finish {
            self.finish_configure(finish);
        }
    }

    /// Acknowledges and commits in one step.
    fn finish_configure(&mut self, finish: Finish) {
        let (Some(xdg_surface), Some(surface)) = (&self.objects.xdg_surface, &self.objects.surface)
        else {
            return;
        };
        debug!(serial = finish.serial, "acknowledging configure");
        xdg_surface.ack_configure(finish.serial);
        surface.commit();
        self.slot.committed();
    }

    /// Applies a new window size: the placeholder pixel is attached the
    /// first time, and the destination viewport follows the window.
    fn resize(&mut self, width: u32, height: u32, qh: &QueueHandle<Self>) -> Result<()> {
        info!(width, height, "window resized");
        if self.slot.attached().is_none() {
            self.attach_fallback(qh)?;
        }
        if let Some(viewport) = &self.objects.viewport {
            viewport.set_destination(width as i32, height as i32);
        }
        Ok(())
    }

    fn attach_fallback(&mut self, qh: &QueueHandle<Self>) -> Result<()> {
        let layout = ShmLayout::packed(SHM_XRGB8888, SHM_BYTES_PER_PIXEL, 1, 1);
        let buffer = self.shm_buffer(0, layout, qh)?;
        if let Some(store) = &mut self.objects.shm_store {
            store.pixels_mut(layout.size()).fill(FALLBACK_GREY);
        }

        let (Some(surface), Some(viewport)) = (&self.objects.surface, &self.objects.viewport) else {
            return Ok(());
        };
        debug!("attaching placeholder pixel");
        surface.attach(Some(&*buffer), 0, 0);
        viewport.set_source(0.0, 0.0, 1.0, 1.0);
        self.slot.attach(buffer);
        Ok(())
    }

    /// Creates a buffer at `offset` in the shm pool, growing the pool first
    /// if it is too small.
    fn shm_buffer(
        &mut self,
        offset: usize,
        layout: ShmLayout,
        qh: &QueueHandle<Self>,
    ) -> Result<Buffer> {
        let (Some(store), Some(pool)) = (&mut self.objects.shm_store, &self.objects.shm_pool) else {
            return Err(SessionFailure::Import("no shm pool".into()).into());
        };
        if let Some(capacity) = store.ensure_capacity(offset + layout.size())? {
            pool.resize(capacity as i32);
        }

        let format = wl_shm::Format::try_from(layout.format).map_err(|_| {
            SessionFailure::Import(format!("unknown wl_shm format {:#x}", layout.format))
        })?;
        let buffer = pool.create_buffer(
            offset as i32,
            layout.width as i32,
            layout.height as i32,
            layout.stride as i32,
            format,
            qh,
            (),
        );
        Ok(ProxyGuard::new(buffer))
    }

    /// Builds a `wl_buffer` from DMA-BUF planes.
    fn import(&self, request: ImportRequest, qh: &QueueHandle<Self>) -> Result<Buffer> {
        let Some(linux_dmabuf) = &self.globals.linux_dmabuf else {
            return Err(SessionFailure::Import("linux-dmabuf not bound".into()).into());
        };

        let params = ProxyGuard::new(linux_dmabuf.create_params(qh, ()));
        for plane in &request.planes {
            params.add(
                plane.fd.as_fd(),
                plane.plane_index,
                plane.offset,
                plane.stride,
                request.modifier_hi(),
                request.modifier_lo(),
            );
        }
        let buffer = params.create_immed(
            request.width as i32,
            request.height as i32,
            request.format,
            zwp_linux_buffer_params_v1::Flags::from_bits_truncate(request.flags),
            qh,
            (),
        );
        debug!(buffer = %buffer.id(), planes = request.planes.len(), "imported dmabuf");
        Ok(ProxyGuard::new(buffer))
    }

    fn on_output_enter(&mut self, output: u32, qh: &QueueHandle<Self>) {
        let label = self
            .registry
            .output(output)
            .map(|o| o.label())
            .unwrap_or_else(|| format!("output#{output}"));
        info!(output = %label, "surface entered output");
        self.current_output = Some(output);
        let result = self.start_capture(output, qh);
        self.report(result);
    }

    fn on_output_leave(&mut self, output: u32) {
        debug!(output, "surface left output");
    }

    /// Starts a capture of `output`, superseding any live session.
    fn start_capture(&mut self, output: u32, qh: &QueueHandle<Self>) -> Result<()> {
        let Some(handle) = self.registry.output(output) else {
            warn!(output, "cannot capture unknown output");
            return Ok(());
        };
        let overlay_cursor = i32::from(self.args.overlay_cursor);

        let (frame, kind) = match self.args.protocol {
            CaptureProtocol::Screencopy => {
                let Some(manager) = &self.globals.screencopy else {
                    return Ok(());
                };
                let frame = manager.capture_output(overlay_cursor, &handle.proxy, qh, ());
                (
                    CaptureFrame::Copy(ProxyGuard::new(frame)),
                    SessionKind::Copy(CopyRequest::new(self.args.buffer_kind)),
                )
            }
            CaptureProtocol::ExportDmabuf => {
                let Some(manager) = &self.globals.export_dmabuf else {
                    return Ok(());
                };
                let frame = manager.capture_output(overlay_cursor, &handle.proxy, qh, ());
                (
                    CaptureFrame::Export(ProxyGuard::new(frame)),
                    SessionKind::Export(ExportFrame::new()),
                )
            }
        };

        let label = handle.label();
        let frame_id = frame.id();
        self.capture_deferred = false;
        self.sessions.begin(CaptureSession {
            output,
            frame,
            kind,
        });
        debug!(
            output = %label,
            frame = %frame_id,
            session = self.sessions.started(),
            "capture requested"
        );
        Ok(())
    }

    fn on_copy_event(
        &mut self,
        frame: &ZwlrScreencopyFrameV1,
        event: CopyEvent,
        qh: &QueueHandle<Self>,
    ) {
        let id = frame.id();
        let (outcome, y_invert) = match self.sessions.current_for(&id) {
            Some(CaptureSession {
                kind: SessionKind::Copy(request),
                ..
            }) => (request.handle(event), request.y_invert()),
            _ => {
                debug!(frame = %id, "event for stale frame");
                return;
            }
        };

        let result = match outcome {
            CopyOutcome::Nothing => Ok(()),
            CopyOutcome::Allocate(offer) => self.copy_target(offer, qh).map(|buffer| {
                frame.copy(&buffer);
                if let Some(CaptureSession {
                    kind: SessionKind::Copy(request),
                    ..
                }) = self.sessions.current_for(&id)
                {
                    request.copy_into(buffer);
                }
            }),
            CopyOutcome::Present {
                width,
                height,
                target,
            } => {
                self.sessions.end();
                self.present(target, width, height, y_invert);
                self.rearm(qh)
            }
            CopyOutcome::Failed(failure) => Err(failure.into()),
        };
        self.report(result);
    }

    /// Provides the buffer the compositor copies into.
    fn copy_target(&mut self, offer: BufferOffer, qh: &QueueHandle<Self>) -> Result<Buffer> {
        match offer {
            BufferOffer::Shm {
                format,
                width,
                height,
                stride,
            } => {
                let layout = ShmLayout {
                    format,
                    width,
                    height,
                    stride,
                };
                let busy = self.slot.busy_keys();
                let offset = self.shm_placement.place(layout.size(), &busy);
                let buffer = self.shm_buffer(offset, layout, qh)?;
                self.shm_placement.lease(buffer.id(), offset, layout.size());
                Ok(buffer)
            }
            BufferOffer::Dmabuf {
                format,
                width,
                height,
            } => {
                let fourcc = Fourcc::try_from(format).map_err(|_| {
                    SessionFailure::Import(format!("unknown drm format {format:#x}"))
                })?;
                let request = allocate_for_capture(&mut self.negotiator, fourcc, width, height)?;
                self.import(request, qh)
            }
        }
    }

    fn on_export_event(
        &mut self,
        frame: &ZwlrExportDmabufFrameV1,
        event: ExportEvent,
        qh: &QueueHandle<Self>,
    ) {
        let id = frame.id();
        let outcome = match self.sessions.current_for(&id) {
            Some(CaptureSession {
                kind: SessionKind::Export(accumulator),
                ..
            }) => accumulator.handle(event),
            _ => {
                debug!(frame = %id, "event for stale frame");
                return;
            }
        };

        let result = match outcome {
            ExportOutcome::Pending => Ok(()),
            ExportOutcome::Present(request) => {
                self.sessions.end();
                let (width, height) = (request.width, request.height);
                self.import(request, qh).and_then(|buffer| {
                    self.present(buffer, width, height, false);
                    self.rearm(qh)
                })
            }
            ExportOutcome::Failed(failure) => Err(failure.into()),
        };
        self.report(result);
    }

    /// Attaches a captured frame, crops the source to it and commits.
    /// Y-inverted copies are flipped back with the buffer transform.
    fn present(&mut self, buffer: Buffer, width: u32, height: u32, y_invert: bool) {
        let (Some(surface), Some(viewport)) = (&self.objects.surface, &self.objects.viewport) else {
            return;
        };
        debug!(buffer = %buffer.id(), width, height, y_invert, "presenting frame");
        surface.attach(Some(&*buffer), 0, 0);
        if surface.version() >= 2 {
            let transform = if y_invert {
                wl_output::Transform::Flipped180
            } else {
                wl_output::Transform::Normal
            };
            surface.set_buffer_transform(transform);
        }
        if surface.version() >= 4 {
            surface.damage_buffer(0, 0, i32::MAX, i32::MAX);
        } else {
            surface.damage(0, 0, i32::MAX, i32::MAX);
        }
        viewport.set_source(0.0, 0.0, width as f64, height as f64);
        surface.commit();
        self.slot.attach(buffer);
        self.slot.committed();
        debug!(retired = self.slot.retired_len(), "buffers awaiting release");
    }

    fn rearm(&mut self, qh: &QueueHandle<Self>) -> Result<()> {
        match (self.args.continuous, self.current_output) {
            (true, Some(output)) => self.start_capture(output, qh),
            _ => Ok(()),
        }
    }

    fn on_buffer_release(&mut self, buffer: &WlBuffer) {
        self.slot.released(&buffer.id());
    }

    /// Releases everything in reverse acquisition order.
    fn teardown(&mut self) {
        self.sessions.end();
        let objects = &mut self.objects;
        objects.toplevel = None;
        objects.xdg_surface = None;
        objects.viewport = None;
        objects.feedback = None;
        self.slot.clear();
        objects.surface = None;
        objects.shm_pool = None;
        objects.shm_store = None;
        self.negotiator.reset();
        self.registry.clear_outputs();
        self.globals.teardown();
    }
}

fn wanted_singletons(args: &Args) -> Vec<Singleton> {
    let mut wanted = vec![
        Singleton::Compositor,
        Singleton::Shm,
        Singleton::Viewporter,
        Singleton::WmBase,
    ];
    match (args.protocol, args.buffer_kind) {
        (CaptureProtocol::Screencopy, BufferKind::Shm) => {}
        _ => wanted.push(Singleton::LinuxDmabuf),
    }
    wanted.push(match args.protocol {
        CaptureProtocol::Screencopy => Singleton::ScreencopyManager,
        CaptureProtocol::ExportDmabuf => Singleton::ExportDmabufManager,
    });
    wanted
}

fn connect(display: Option<&str>) -> Result<Connection> {
    let Some(display) = display else {
        return Ok(Connection::connect_to_env()?);
    };

    let path = if display.starts_with('/') {
        PathBuf::from(display)
    } else {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").ok_or_else(|| {
            Error::resource(
                "locate wayland socket",
                std::io::Error::new(std::io::ErrorKind::NotFound, "XDG_RUNTIME_DIR is not set"),
            )
        })?;
        PathBuf::from(runtime_dir).join(display)
    };
    info!(path = %path.display(), "connecting to wayland display");
    let stream =
        UnixStream::connect(&path).map_err(|e| Error::resource("connect to wayland socket", e))?;
    Ok(Connection::from_socket(stream)?)
}

/// A connected, configured mirror window.
pub struct CaptureClient {
    conn: Connection,
    queue: EventQueue<ClientState>,
    state: ClientState,
}

impl CaptureClient {
    /// Connects, binds globals, creates the window and waits for its first
    /// configure.
    pub fn connect(args: Args) -> Result<Self> {
        let conn = connect(args.display.as_deref())?;
        let queue = conn.new_event_queue();
        let qh = queue.handle();
        let wl_registry = conn.display().get_registry(&qh, ());

        let mut client = Self {
            conn,
            queue,
            state: ClientState::new(args, wl_registry),
        };
        client.queue.roundtrip(&mut client.state)?;
        client.state.take_fatal()?;
        client.state.registry.check_capabilities()?;
        info!(outputs = client.state.registry.outputs().len(), "globals bound");

        client.create_window(&qh)?;
        client.queue.roundtrip(&mut client.state)?;
        while !client.state.configure.is_configured() {
            client.state.take_fatal()?;
            client.queue.blocking_dispatch(&mut client.state)?;
        }
        client.state.take_fatal()?;
        info!("window configured");
        Ok(client)
    }

    fn create_window(&mut self, qh: &QueueHandle<ClientState>) -> Result<()> {
        let state = &mut self.state;
        let (Some(compositor), Some(shm), Some(viewporter), Some(wm_base)) = (
            &state.globals.compositor,
            &state.globals.shm,
            &state.globals.viewporter,
            &state.globals.wm_base,
        ) else {
            return Err(Error::MissingGlobal {
                interface: Singleton::Compositor.interface(),
                min_version: 1,
            });
        };
        let objects = &mut state.objects;

        let store = ShmStore::new()?;
        let pool = shm.create_pool(store.fd(), store.capacity() as i32, qh, ());
        objects.shm_store = Some(store);
        objects.shm_pool = Some(ProxyGuard::new(pool));

        let surface = compositor.create_surface(qh, ());
        if let Some(linux_dmabuf) = &state.globals.linux_dmabuf {
            let feedback = linux_dmabuf.get_surface_feedback(&surface, qh, ());
            objects.feedback = Some(ProxyGuard::new(feedback));
        }
        let viewport = viewporter.get_viewport(&surface, qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&surface, qh, ());
        let toplevel = xdg_surface.get_toplevel(qh, ());
        toplevel.set_title(state.args.title.clone());
        toplevel.set_app_id(state.args.app_id.clone());
        surface.commit();

        objects.surface = Some(ProxyGuard::new(surface));
        objects.viewport = Some(ProxyGuard::new(viewport));
        objects.xdg_surface = Some(ProxyGuard::new(xdg_surface));
        objects.toplevel = Some(ProxyGuard::new(toplevel));
        Ok(())
    }

    /// Dispatches events until the window is closed or a fatal error occurs.
    pub fn run(&mut self) -> Result<()> {
        while !self.state.configure.is_closing() {
            self.state.take_fatal()?;
            self.queue.blocking_dispatch(&mut self.state)?;
        }
        self.state.take_fatal()?;
        info!("window closed");
        Ok(())
    }
}

impl Drop for CaptureClient {
    fn drop(&mut self) {
        self.state.teardown();
        if let Err(e) = self.conn.flush() {
            warn!("failed to flush wayland connection: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use test_log::test;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["wl-output-mirror"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_screencopy_dmabuf_needs_linux_dmabuf() {
        let wanted = wanted_singletons(&args(&[]));
        assert!(wanted.contains(&Singleton::LinuxDmabuf));
        assert!(wanted.contains(&Singleton::ScreencopyManager));
        assert!(!wanted.contains(&Singleton::ExportDmabufManager));
    }

    #[test]
    fn test_screencopy_shm_skips_linux_dmabuf() {
        let wanted = wanted_singletons(&args(&["--buffer-kind", "shm"]));
        assert!(!wanted.contains(&Singleton::LinuxDmabuf));
        assert!(wanted.contains(&Singleton::Shm));
    }

    #[test]
    fn test_export_needs_linux_dmabuf() {
        let argv = ["--protocol", "export-dmabuf", "--buffer-kind", "shm"];
        let wanted = wanted_singletons(&args(&argv));
        assert!(wanted.contains(&Singleton::LinuxDmabuf));
        assert!(wanted.contains(&Singleton::ExportDmabufManager));
    }

    #[test]
    fn test_connect_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wayland-missing");
        let err = connect(path.to_str()).unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }
}
