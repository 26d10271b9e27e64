//! Global registry resolver.
//!
//! Decides which advertised globals get bound, rejects a second advertisement
//! of any singleton, and treats removal of a bound singleton as fatal. Outputs
//! are the only multi-instance global; removing one drops only its handle.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{Error, FatalLatch, ProtocolViolation, Result};

/// Protocol singletons the client can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Singleton {
    Compositor,
    Shm,
    Viewporter,
    WmBase,
    LinuxDmabuf,
    ScreencopyManager,
    ExportDmabufManager,
}

impl Singleton {
    pub const ALL: [Singleton; 7] = [
        Singleton::Compositor,
        Singleton::Shm,
        Singleton::Viewporter,
        Singleton::WmBase,
        Singleton::LinuxDmabuf,
        Singleton::ScreencopyManager,
        Singleton::ExportDmabufManager,
    ];

    pub fn from_interface(interface: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.interface() == interface)
    }

    pub fn interface(self) -> &'static str {
        match self {
            Singleton::Compositor => "wl_compositor",
            Singleton::Shm => "wl_shm",
            Singleton::Viewporter => "wp_viewporter",
            Singleton::WmBase => "xdg_wm_base",
            Singleton::LinuxDmabuf => "zwp_linux_dmabuf_v1",
            Singleton::ScreencopyManager => "zwlr_screencopy_manager_v1",
            Singleton::ExportDmabufManager => "zwlr_export_dmabuf_manager_v1",
        }
    }

    /// Highest version this client speaks.
    pub fn max_version(self) -> u32 {
        match self {
            Singleton::Compositor => 4,
            Singleton::Shm => 1,
            Singleton::Viewporter => 1,
            Singleton::WmBase => 2,
            Singleton::LinuxDmabuf => 4,
            Singleton::ScreencopyManager => 3,
            Singleton::ExportDmabufManager => 1,
        }
    }

    /// Lowest version the client can work with. Surface feedback needs
    /// linux-dmabuf v4 and buffer_done needs screencopy v3.
    pub fn min_version(self) -> u32 {
        match self {
            Singleton::LinuxDmabuf => 4,
            Singleton::ScreencopyManager => 3,
            _ => 1,
        }
    }
}

pub const OUTPUT_INTERFACE: &str = "wl_output";
pub const OUTPUT_MAX_VERSION: u32 = 4;

/// What the caller should do with an advertised global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalAction {
    Bind { singleton: Singleton, version: u32 },
    BindOutput { version: u32 },
    Ignore,
}

/// A bound output. `proxy` is whatever owns the protocol object; dropping the
/// handle drops it.
#[derive(Debug)]
pub struct OutputHandle<O> {
    pub global: u32,
    pub proxy: O,
    pub name: Option<String>,
    pub scale: i32,
}

impl<O> OutputHandle<O> {
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("output#{}", self.global),
        }
    }
}

#[derive(Debug)]
pub struct GlobalRegistry<O> {
    wanted: Vec<Singleton>,
    bound: HashMap<Singleton, Bound>,
    outputs: Vec<OutputHandle<O>>,
}

#[derive(Debug, Clone, Copy)]
struct Bound {
    global: u32,
    version: u32,
}

impl<O> GlobalRegistry<O> {
    /// Only singletons in `wanted` are bound; everything else is ignored.
    pub fn new(wanted: &[Singleton]) -> Self {
        Self {
            wanted: wanted.to_vec(),
            bound: HashMap::new(),
            outputs: Vec::new(),
        }
    }

    pub fn on_global(&mut self, name: u32, interface: &str, version: u32) -> Result<GlobalAction> {
        debug!(name, interface, version, "registry: global added");

        if interface == OUTPUT_INTERFACE {
            return Ok(GlobalAction::BindOutput {
                version: version.min(OUTPUT_MAX_VERSION),
            });
        }

        let Some(singleton) = Singleton::from_interface(interface) else {
            return Ok(GlobalAction::Ignore);
        };
        if !self.wanted.contains(&singleton) {
            return Ok(GlobalAction::Ignore);
        }
        if self.bound.contains_key(&singleton) {
            return Err(ProtocolViolation::DuplicateGlobal {
                interface: singleton.interface(),
            }
            .into());
        }

        let version = version.min(singleton.max_version());
        self.bound.insert(singleton, Bound { global: name, version });
        Ok(GlobalAction::Bind { singleton, version })
    }

    /// [`on_global`](Self::on_global) for a live connection: nothing is
    /// bound once `latch` holds a fatal error, and the error a duplicate
    /// announcement raises is latched.
    pub fn on_global_latched(
        &mut self,
        latch: &mut FatalLatch,
        name: u32,
        interface: &str,
        version: u32,
    ) -> GlobalAction {
        if latch.is_set() {
            debug!(name, interface, "registry: ignoring global after fatal error");
            return GlobalAction::Ignore;
        }
        match self.on_global(name, interface, version) {
            Ok(action) => action,
            Err(e) => {
                if let Some(e) = latch.latch(e) {
                    debug!("registry: {e}");
                }
                GlobalAction::Ignore
            }
        }
    }

    /// Handles `global_remove`. A removed output is returned so the caller
    /// can drop it; removal of a bound singleton is a protocol violation.
    pub fn on_global_remove(&mut self, name: u32) -> Result<Option<OutputHandle<O>>> {
        debug!(name, "registry: global removed");

        if let Some((singleton, _)) = self.bound.iter().find(|(_, b)| b.global == name) {
            return Err(ProtocolViolation::GlobalRemoved {
                interface: singleton.interface(),
            }
            .into());
        }

        match self.outputs.iter().position(|o| o.global == name) {
            Some(idx) => {
                let output = self.outputs.remove(idx);
                info!(output = %output.label(), "output removed");
                Ok(Some(output))
            }
            None => Ok(None),
        }
    }

    pub fn add_output(&mut self, global: u32, proxy: O) {
        self.outputs.push(OutputHandle {
            global,
            proxy,
            name: None,
            scale: 1,
        });
    }

    pub fn output_mut(&mut self, global: u32) -> Option<&mut OutputHandle<O>> {
        self.outputs.iter_mut().find(|o| o.global == global)
    }

    pub fn output(&self, global: u32) -> Option<&OutputHandle<O>> {
        self.outputs.iter().find(|o| o.global == global)
    }

    pub fn outputs(&self) -> &[OutputHandle<O>] {
        &self.outputs
    }

    /// Capability gate run after the initial roundtrip: every wanted
    /// singleton must be bound at a usable version.
    pub fn check_capabilities(&self) -> Result<()> {
        for singleton in &self.wanted {
            match self.bound.get(singleton) {
                Some(b) if b.version >= singleton.min_version() => {}
                _ => {
                    return Err(Error::MissingGlobal {
                        interface: singleton.interface(),
                        min_version: singleton.min_version(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Drops every output handle. Called during teardown after the surface
    /// and buffers are gone.
    pub fn clear_outputs(&mut self) {
        self.outputs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use test_log::test;

    const SCREENCOPY_SET: [Singleton; 6] = [
        Singleton::Compositor,
        Singleton::Shm,
        Singleton::Viewporter,
        Singleton::WmBase,
        Singleton::LinuxDmabuf,
        Singleton::ScreencopyManager,
    ];

    #[derive(Debug)]
    struct DropCounter(Rc<Cell<u32>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn announce_all(reg: &mut GlobalRegistry<DropCounter>) {
        let globals = [
            (1, "wl_compositor", 6),
            (2, "wl_shm", 2),
            (3, "wp_viewporter", 1),
            (4, "xdg_wm_base", 6),
            (5, "zwp_linux_dmabuf_v1", 5),
            (6, "zwlr_screencopy_manager_v1", 3),
        ];
        for (name, interface, version) in globals {
            reg.on_global(name, interface, version).unwrap();
        }
    }

    #[test]
    fn test_binds_at_clamped_version() {
        let mut reg = GlobalRegistry::<DropCounter>::new(&SCREENCOPY_SET);
        let action = reg.on_global(1, "wl_compositor", 6).unwrap();
        assert_eq!(
            action,
            GlobalAction::Bind {
                singleton: Singleton::Compositor,
                version: 4
            }
        );
    }

    #[test]
    fn test_duplicate_compositor_is_violation() {
        let mut reg = GlobalRegistry::<DropCounter>::new(&SCREENCOPY_SET);
        reg.on_global(1, "wl_compositor", 4).unwrap();
        let err = reg.on_global(9, "wl_compositor", 4).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            Error::ProtocolViolation(ProtocolViolation::DuplicateGlobal {
                interface: "wl_compositor"
            })
        ));
    }

    #[test]
    fn test_duplicate_compositor_stops_registry_processing() {
        let mut latch = FatalLatch::default();
        let mut reg = GlobalRegistry::<DropCounter>::new(&SCREENCOPY_SET);
        assert_eq!(
            reg.on_global_latched(&mut latch, 1, "wl_compositor", 4),
            GlobalAction::Bind {
                singleton: Singleton::Compositor,
                version: 4
            }
        );
        assert_eq!(
            reg.on_global_latched(&mut latch, 2, "wl_compositor", 4),
            GlobalAction::Ignore
        );
        assert!(latch.is_set());

        // Later globals are neither bound nor recorded.
        assert_eq!(
            reg.on_global_latched(&mut latch, 3, "wl_shm", 1),
            GlobalAction::Ignore
        );
        assert_eq!(
            reg.on_global_latched(&mut latch, 4, "wl_output", 4),
            GlobalAction::Ignore
        );
        assert!(matches!(
            reg.check_capabilities(),
            Err(Error::MissingGlobal {
                interface: "wl_shm",
                ..
            })
        ));

        assert!(matches!(
            latch.take(),
            Err(Error::ProtocolViolation(ProtocolViolation::DuplicateGlobal {
                interface: "wl_compositor"
            }))
        ));
    }

    #[test]
    fn test_unwanted_singleton_ignored() {
        let mut reg = GlobalRegistry::<DropCounter>::new(&SCREENCOPY_SET);
        let action = reg.on_global(7, "zwlr_export_dmabuf_manager_v1", 1).unwrap();
        assert_eq!(action, GlobalAction::Ignore);
        // A second one is not a duplicate either since neither is bound.
        let action = reg.on_global(8, "zwlr_export_dmabuf_manager_v1", 1).unwrap();
        assert_eq!(action, GlobalAction::Ignore);
    }

    #[test]
    fn test_singleton_removal_is_violation() {
        let mut reg = GlobalRegistry::<DropCounter>::new(&SCREENCOPY_SET);
        announce_all(&mut reg);
        let err = reg.on_global_remove(2).unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolViolation(ProtocolViolation::GlobalRemoved { interface: "wl_shm" })
        ));
    }

    #[test]
    fn test_output_removal_drops_only_that_output() {
        let drops = Rc::new(Cell::new(0));
        let mut reg = GlobalRegistry::new(&SCREENCOPY_SET);
        announce_all(&mut reg);
        assert_eq!(
            reg.on_global(20, "wl_output", 4).unwrap(),
            GlobalAction::BindOutput { version: 4 }
        );
        reg.add_output(20, DropCounter(drops.clone()));
        reg.add_output(21, DropCounter(drops.clone()));

        let removed = reg.on_global_remove(20).unwrap();
        assert!(removed.is_some());
        drop(removed);
        assert_eq!(drops.get(), 1);
        assert_eq!(reg.outputs().len(), 1);
        assert_eq!(reg.outputs()[0].global, 21);

        // Unknown names are ignored.
        assert!(reg.on_global_remove(99).unwrap().is_none());
    }

    #[test]
    fn test_capability_check() {
        let mut reg = GlobalRegistry::<DropCounter>::new(&SCREENCOPY_SET);
        reg.on_global(1, "wl_compositor", 4).unwrap();
        let err = reg.check_capabilities().unwrap_err();
        assert!(matches!(err, Error::MissingGlobal { interface: "wl_shm", .. }));

        let mut reg = GlobalRegistry::<DropCounter>::new(&SCREENCOPY_SET);
        announce_all(&mut reg);
        reg.check_capabilities().unwrap();
    }

    #[test]
    fn test_old_linux_dmabuf_fails_capability_check() {
        let mut reg = GlobalRegistry::<DropCounter>::new(&[Singleton::LinuxDmabuf]);
        reg.on_global(5, "zwp_linux_dmabuf_v1", 3).unwrap();
        let err = reg.check_capabilities().unwrap_err();
        assert!(matches!(
            err,
            Error::MissingGlobal {
                interface: "zwp_linux_dmabuf_v1",
                min_version: 4
            }
        ));
    }

    #[test]
    fn test_output_label() {
        let mut reg = GlobalRegistry::<()>::new(&[]);
        reg.add_output(30, ());
        assert_eq!(reg.output(30).unwrap().label(), "output#30");
        reg.output_mut(30).unwrap().name = Some("DP-1".into());
        assert_eq!(reg.output(30).unwrap().label(), "DP-1");
    }
}
