//! Frame capture sessions.
//!
//! A session is tied to the output the surface currently shows on. Entering a
//! new output starts a new session; the previous one, and its frame object,
//! is dropped first.

pub mod copy;
pub mod export;

use clap::ValueEnum;
use tracing::debug;

pub use copy::{BufferOffer, CopyEvent, CopyOutcome, CopyRequest};
pub use export::{ExportEvent, ExportFrame, ExportOutcome, FrameMeta};

/// Buffer kind a copy request is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BufferKind {
    /// GPU buffer allocated with the negotiated modifiers.
    Dmabuf,
    /// Shared-memory buffer from the client's pool.
    Shm,
}

impl BufferKind {
    pub fn name(self) -> &'static str {
        match self {
            BufferKind::Dmabuf => "dmabuf",
            BufferKind::Shm => "shm",
        }
    }
}

/// Identifies the protocol frame object of a session.
pub trait SessionFrame {
    type Id: PartialEq + std::fmt::Debug;

    fn id(&self) -> Self::Id;
}

#[derive(Debug)]
pub enum SessionKind<B> {
    Export(ExportFrame),
    Copy(CopyRequest<B>),
}

#[derive(Debug)]
pub struct CaptureSession<F, B> {
    /// Registry name of the captured output.
    pub output: u32,
    pub frame: F,
    pub kind: SessionKind<B>,
}

/// Holds at most one live session.
#[derive(Debug)]
pub struct SessionSlot<F: SessionFrame, B> {
    current: Option<CaptureSession<F, B>>,
    started: u64,
}

impl<F: SessionFrame, B> Default for SessionSlot<F, B> {
    fn default() -> Self {
        Self {
            current: None,
            started: 0,
        }
    }
}

impl<F: SessionFrame, B> SessionSlot<F, B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the current session, then installs `session`.
    pub fn begin(&mut self, session: CaptureSession<F, B>) {
        if let Some(previous) = self.current.take() {
            let frame = previous.frame.id();
            debug!(output = previous.output, ?frame, "superseding capture session");
        }
        self.started += 1;
        self.current = Some(session);
    }

    /// Removes the current session, whatever its state.
    pub fn end(&mut self) -> Option<CaptureSession<F, B>> {
        self.current.take()
    }

    /// Ends the session if it captures `output`.
    pub fn end_for_output(&mut self, output: u32) -> Option<CaptureSession<F, B>> {
        match &self.current {
            Some(s) if s.output == output => self.current.take(),
            _ => None,
        }
    }

    /// The live session, if `frame` belongs to it.
    pub fn current_for(&mut self, frame: &F::Id) -> Option<&mut CaptureSession<F, B>> {
        self.current.as_mut().filter(|s| &s.frame.id() == frame)
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Sessions started so far.
    pub fn started(&self) -> u64 {
        self.started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use test_log::test;

    struct FakeFrame {
        id: u32,
        live: Rc<RefCell<Vec<u32>>>,
    }

    impl FakeFrame {
        fn new(id: u32, live: &Rc<RefCell<Vec<u32>>>) -> Self {
            live.borrow_mut().push(id);
            Self {
                id,
                live: live.clone(),
            }
        }
    }

    impl Drop for FakeFrame {
        fn drop(&mut self) {
            self.live.borrow_mut().retain(|&i| i != self.id);
        }
    }

    impl SessionFrame for FakeFrame {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }
    }

    fn session(output: u32, frame: FakeFrame) -> CaptureSession<FakeFrame, ()> {
        CaptureSession {
            output,
            frame,
            kind: SessionKind::Export(ExportFrame::new()),
        }
    }

    #[test]
    fn test_at_most_one_session() {
        let live = Rc::new(RefCell::new(Vec::new()));
        let mut slot = SessionSlot::new();
        slot.begin(session(10, FakeFrame::new(1, &live)));
        slot.begin(session(11, FakeFrame::new(2, &live)));
        slot.begin(session(10, FakeFrame::new(3, &live)));
        assert_eq!(*live.borrow(), vec![3]);
        assert_eq!(slot.started(), 3);
        assert!(slot.current_for(&3).is_some());
        assert_eq!(slot.end().map(|s| s.output), Some(10));
    }

    #[test]
    fn test_stale_frame_not_current() {
        let live = Rc::new(RefCell::new(Vec::new()));
        let mut slot = SessionSlot::new();
        slot.begin(session(10, FakeFrame::new(1, &live)));
        slot.begin(session(10, FakeFrame::new(2, &live)));
        assert!(slot.current_for(&1).is_none());
        assert!(slot.current_for(&2).is_some());
    }

    #[test]
    fn test_end_for_output() {
        let live = Rc::new(RefCell::new(Vec::new()));
        let mut slot = SessionSlot::new();
        slot.begin(session(10, FakeFrame::new(1, &live)));
        assert!(slot.end_for_output(11).is_none());
        assert!(slot.is_active());
        drop(slot.end_for_output(10));
        assert!(!slot.is_active());
        assert!(live.borrow().is_empty());
    }

    #[test]
    fn test_buffer_kind_names() {
        assert_eq!(BufferKind::Dmabuf.name(), "dmabuf");
        assert_eq!(BufferKind::Shm.name(), "shm");
    }
}
