//! Surface configure handshake.
//!
//! An xdg surface may only present content after acknowledging a configure.
//! The compositor sends `xdg_toplevel.configure` followed by
//! `xdg_surface.configure`, but the two are tracked independently and the
//! acknowledgement is sent once both have been seen in the same cycle.

use tracing::debug;

/// Acknowledge `serial` and commit the surface, with nothing in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finish {
    pub serial: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ToplevelOutcome {
    /// New window size to apply before the commit, if it changed.
    pub resize: Option<(u32, u32)>,
    pub finish: Option<Finish>,
}

#[derive(Debug, Clone)]
pub struct ConfigureState {
    fallback: (u32, u32),
    last_serial: Option<u32>,
    surface_acked: bool,
    toplevel_acked: bool,
    size: Option<(u32, u32)>,
    configured: bool,
    closing: bool,
}

impl ConfigureState {
    /// `fallback` replaces any zero dimension the compositor leaves to us.
    pub fn new(fallback: (u32, u32)) -> Self {
        Self {
            fallback,
            last_serial: None,
            surface_acked: false,
            toplevel_acked: false,
            size: None,
            configured: false,
            closing: false,
        }
    }

    pub fn on_surface_configure(&mut self, serial: u32) -> Option<Finish> {
        debug!(serial, "xdg_surface configure");
        self.last_serial = Some(serial);
        self.surface_acked = true;
        self.try_finish()
    }

    pub fn on_toplevel_configure(&mut self, width: i32, height: i32) -> ToplevelOutcome {
        let width = match u32::try_from(width) {
            Ok(w) if w > 0 => w,
            _ => self.fallback.0,
        };
        let height = match u32::try_from(height) {
            Ok(h) if h > 0 => h,
            _ => self.fallback.1,
        };

        let resize = if self.size != Some((width, height)) {
            self.size = Some((width, height));
            Some((width, height))
        } else {
            None
        };

        self.toplevel_acked = true;
        ToplevelOutcome {
            resize,
            finish: self.try_finish(),
        }
    }

    pub fn on_close(&mut self) {
        self.closing = true;
    }

    fn try_finish(&mut self) -> Option<Finish> {
        if !(self.surface_acked && self.toplevel_acked) {
            return None;
        }
        let serial = self.last_serial?;
        self.surface_acked = false;
        self.toplevel_acked = false;
        self.configured = true;
        Some(Finish { serial })
    }

    /// Whether at least one configure cycle has been acknowledged.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }
}

/// Names of the toplevel states in a configure event's state array.
pub fn describe_states(states: &[u8]) -> Vec<String> {
    states
        .chunks_exact(4)
        .map(|c| match u32::from_ne_bytes([c[0], c[1], c[2], c[3]]) {
            1 => "maximized".to_string(),
            2 => "fullscreen".to_string(),
            3 => "resizing".to_string(),
            4 => "activated".to_string(),
            5 => "tiled-left".to_string(),
            6 => "tiled-right".to_string(),
            7 => "tiled-top".to_string(),
            8 => "tiled-bottom".to_string(),
            9 => "suspended".to_string(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    const FALLBACK: (u32, u32) = (100, 100);

    #[test]
    fn test_zero_size_after_surface_configure() {
        let mut state = ConfigureState::new(FALLBACK);
        assert_eq!(state.on_surface_configure(42), None);

        let outcome = state.on_toplevel_configure(0, 0);
        assert_eq!(outcome.resize, Some(FALLBACK));
        assert_eq!(outcome.finish, Some(Finish { serial: 42 }));
        assert!(state.is_configured());
    }

    #[test]
    fn test_toplevel_first_then_surface() {
        let mut state = ConfigureState::new(FALLBACK);
        let outcome = state.on_toplevel_configure(640, 480);
        assert_eq!(outcome.resize, Some((640, 480)));
        assert_eq!(outcome.finish, None);
        assert!(!state.is_configured());

        assert_eq!(state.on_surface_configure(7), Some(Finish { serial: 7 }));
    }

    #[test]
    fn test_finish_once_per_cycle() {
        let mut state = ConfigureState::new(FALLBACK);
        state.on_toplevel_configure(640, 480);
        assert!(state.on_surface_configure(1).is_some());
        // A lone surface configure does not complete the next cycle.
        assert_eq!(state.on_surface_configure(2), None);
        assert_eq!(state.on_surface_configure(3), None);

        let outcome = state.on_toplevel_configure(640, 480);
        assert_eq!(outcome.finish, Some(Finish { serial: 3 }));
        assert_eq!(outcome.resize, None);
    }

    #[test]
    fn test_resize_only_on_change() {
        let mut state = ConfigureState::new(FALLBACK);
        assert_eq!(state.on_toplevel_configure(0, 300).resize, Some((100, 300)));
        assert_eq!(state.on_toplevel_configure(100, 300).resize, None);
        assert_eq!(state.on_toplevel_configure(800, 0).resize, Some((800, 100)));
        assert_eq!(state.size(), Some((800, 100)));
    }

    #[test]
    fn test_negative_size_uses_fallback() {
        let mut state = ConfigureState::new((64, 48));
        assert_eq!(state.on_toplevel_configure(-5, -1).resize, Some((64, 48)));
    }

    #[test]
    fn test_close() {
        let mut state = ConfigureState::new(FALLBACK);
        assert!(!state.is_closing());
        state.on_close();
        assert!(state.is_closing());
    }

    #[test]
    fn test_describe_states() {
        let states: Vec<u8> = [4u32, 1, 42].iter().flat_map(|s| s.to_ne_bytes()).collect();
        assert_eq!(describe_states(&states), vec!["activated", "maximized", "42"]);
    }
}
