//! The buffer attached to the surface and the ones it replaced.
//!
//! A buffer replaced before it was ever committed was never seen by the
//! compositor and is dropped at once. A buffer that was committed is kept
//! until the compositor releases it. Dropping a buffer destroys it.
//!
//! `wl_buffer.release` is sent once per attach and commit. Committing the
//! surface again without a new attach does not put a released buffer back in
//! use.

use tracing::debug;

/// A buffer that can be attached to a surface.
pub trait PresentedBuffer {
    type Key: PartialEq + std::fmt::Debug;

    fn key(&self) -> Self::Key;
}

#[derive(Debug)]
struct Entry<B> {
    buffer: B,
    committed: bool,
    released: bool,
}

#[derive(Debug)]
pub struct PresentationSlot<B: PresentedBuffer> {
    attached: Option<Entry<B>>,
    retired: Vec<B>,
}

impl<B: PresentedBuffer> Default for PresentationSlot<B> {
    fn default() -> Self {
        Self {
            attached: None,
            retired: Vec::new(),
        }
    }
}

impl<B: PresentedBuffer> PresentationSlot<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `buffer` as attached, retiring whatever was attached before.
    pub fn attach(&mut self, buffer: B) {
        let entry = Entry {
            buffer,
            committed: false,
            released: false,
        };
        let Some(previous) = self.attached.replace(entry) else {
            return;
        };

        if previous.committed && !previous.released {
            debug!(buffer = ?previous.buffer.key(), "waiting for release of replaced buffer");
            self.retired.push(previous.buffer);
        } else {
            debug!(buffer = ?previous.buffer.key(), "destroying replaced buffer");
        }
    }

    /// Records a surface commit. Only the first commit after an attach
    /// hands the buffer to the compositor.
    pub fn committed(&mut self) {
        if let Some(entry) = &mut self.attached {
            entry.committed = true;
        }
    }

    /// Handles the compositor's `release` for the buffer with `key`.
    pub fn released(&mut self, key: &B::Key) {
        if let Some(idx) = self.retired.iter().position(|b| &b.key() == key) {
            let buffer = self.retired.swap_remove(idx);
            debug!(buffer = ?buffer.key(), "released buffer destroyed");
            return;
        }
        if let Some(entry) = &mut self.attached {
            if &entry.buffer.key() == key && entry.committed {
                entry.released = true;
            }
        }
    }

    /// Keys of the buffers the compositor may still read: the attached one
    /// until it is released, and every retired one.
    pub fn busy_keys(&self) -> Vec<B::Key> {
        let attached = self
            .attached
            .iter()
            .filter(|e| !e.released)
            .map(|e| e.buffer.key());
        attached.chain(self.retired.iter().map(|b| b.key())).collect()
    }

    pub fn attached(&self) -> Option<&B> {
        self.attached.as_ref().map(|e| &e.buffer)
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Drops every buffer, attached or retired.
    pub fn clear(&mut self) {
        self.attached = None;
        self.retired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use test_log::test;

    #[derive(Debug)]
    struct FakeBuffer {
        id: u32,
        destroyed: Rc<RefCell<Vec<u32>>>,
    }

    impl PresentedBuffer for FakeBuffer {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }
    }

    impl Drop for FakeBuffer {
        fn drop(&mut self) {
            self.destroyed.borrow_mut().push(self.id);
        }
    }

    type Destroyed = Rc<RefCell<Vec<u32>>>;

    fn setup() -> (PresentationSlot<FakeBuffer>, impl Fn(u32) -> FakeBuffer, Destroyed) {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let log = destroyed.clone();
        let make = move |id| FakeBuffer {
            id,
            destroyed: log.clone(),
        };
        (PresentationSlot::new(), make, destroyed)
    }

    #[test]
    fn test_uncommitted_replacement_destroyed_at_once() {
        let (mut slot, make, destroyed) = setup();
        slot.attach(make(1));
        slot.attach(make(2));
        assert_eq!(*destroyed.borrow(), vec![1]);
        assert_eq!(slot.attached().map(|b| b.id), Some(2));
    }

    #[test]
    fn test_committed_buffer_waits_for_release() {
        let (mut slot, make, destroyed) = setup();
        slot.attach(make(1));
        slot.committed();
        slot.attach(make(2));
        assert!(destroyed.borrow().is_empty());
        assert_eq!(slot.retired_len(), 1);

        slot.committed();
        slot.released(&1);
        assert_eq!(*destroyed.borrow(), vec![1]);
        assert_eq!(slot.retired_len(), 0);
    }

    #[test]
    fn test_released_before_replacement() {
        let (mut slot, make, destroyed) = setup();
        slot.attach(make(1));
        slot.committed();
        slot.released(&1);
        assert!(destroyed.borrow().is_empty());

        slot.attach(make(2));
        assert_eq!(*destroyed.borrow(), vec![1]);
        assert_eq!(slot.retired_len(), 0);
    }

    #[test]
    fn test_recommit_without_attach_keeps_release() {
        let (mut slot, make, destroyed) = setup();
        slot.attach(make(1));
        slot.committed();
        slot.released(&1);
        // A configure commit with no new attach.
        slot.committed();
        slot.attach(make(2));
        assert_eq!(*destroyed.borrow(), vec![1]);
        assert_eq!(slot.retired_len(), 0);
    }

    #[test]
    fn test_configure_commits_do_not_grow_retired() {
        let (mut slot, make, destroyed) = setup();
        for id in 0..5 {
            slot.attach(make(id));
            slot.committed();
            slot.released(&id);
            slot.committed();
            assert_eq!(slot.retired_len(), 0);
        }
        assert_eq!(*destroyed.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_busy_keys_follow_release() {
        let (mut slot, make, _destroyed) = setup();
        slot.attach(make(1));
        slot.committed();
        assert_eq!(slot.busy_keys(), vec![1]);

        slot.attach(make(2));
        slot.committed();
        assert_eq!(slot.busy_keys(), vec![2, 1]);

        slot.released(&1);
        slot.released(&2);
        assert!(slot.busy_keys().is_empty());
    }

    #[test]
    fn test_unknown_release_ignored() {
        let (mut slot, make, destroyed) = setup();
        slot.attach(make(1));
        slot.released(&9);
        slot.released(&1);
        assert!(destroyed.borrow().is_empty());
    }

    #[test]
    fn test_clear_drops_everything() {
        let (mut slot, make, destroyed) = setup();
        slot.attach(make(1));
        slot.committed();
        slot.attach(make(2));
        slot.committed();
        slot.clear();
        let mut gone = destroyed.borrow().clone();
        gone.sort();
        assert_eq!(gone, vec![1, 2]);
        assert!(slot.attached().is_none());
    }
}
