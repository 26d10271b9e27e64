//! Sealed memfd backing store for `wl_shm` buffers.
//!
//! The store starts one byte long and only ever grows. Growth extends the
//! file and remaps it; the caller resizes the matching `wl_shm_pool` to the
//! returned capacity.
//!
//! Capture buffers are placed by [`ShmPlacement`] so a new copy never lands on
//! memory the compositor may still be reading.

use std::ops::Range;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use memmap2::{MmapMut, MmapOptions, RemapOptions};
use nix::fcntl::{fcntl, FcntlArg, SealFlag};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::unistd::ftruncate;
use tracing::debug;

use crate::error::{Error, Result};

/// Geometry of one buffer carved out of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmLayout {
    /// `wl_shm` format code.
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

impl ShmLayout {
    /// Tightly packed rows: stride is `bytes_per_pixel * width`.
    pub fn packed(format: u32, bytes_per_pixel: u32, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            stride: bytes_per_pixel * width,
        }
    }

    pub fn size(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

pub struct ShmStore {
    fd: OwnedFd,
    map: MmapMut,
    capacity: usize,
}

impl std::fmt::Debug for ShmStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmStore")
            .field("fd", &self.fd.as_raw_fd())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl ShmStore {
    pub fn new() -> Result<Self> {
        let fd = memfd_create(
            c"wl-output-mirror",
            MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
        )
        .map_err(|e| Error::resource("create memfd", e.into()))?;
        fcntl(fd.as_raw_fd(), FcntlArg::F_ADD_SEALS(SealFlag::F_SEAL_SHRINK))
            .map_err(|e| Error::resource("seal memfd", e.into()))?;

        let capacity = 1;
        ftruncate(&fd, capacity as libc::off_t)
            .map_err(|e| Error::resource("size memfd", e.into()))?;

        // SAFETY: the memfd is private to this process and the compositor;
        // it is sealed against shrinking so the mapping stays backed.
        let map = unsafe { MmapOptions::new().len(capacity).map_mut(&fd) }
            .map_err(|e| Error::resource("map shm store", e))?;

        Ok(Self { fd, map, capacity })
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grows the store to hold `size` bytes. Returns the new capacity when it
    /// grew, `None` when it was already large enough.
    pub fn ensure_capacity(&mut self, size: usize) -> Result<Option<usize>> {
        if size <= self.capacity {
            return Ok(None);
        }

        ftruncate(&self.fd, size as libc::off_t)
            .map_err(|e| Error::resource("grow memfd", e.into()))?;
        // SAFETY: the file was just extended to `size`; nothing borrows the
        // old mapping across this call.
        unsafe { self.map.remap(size, RemapOptions::new().may_move(true)) }
            .map_err(|e| Error::resource("remap shm store", e))?;

        debug!(from = self.capacity, to = size, "grew shm store");
        self.capacity = size;
        Ok(Some(size))
    }

    /// The first `len` bytes of the store.
    pub fn pixels_mut(&mut self, len: usize) -> &mut [u8] {
        let len = len.min(self.capacity);
        &mut self.map[..len]
    }
}

/// Offsets of the capture buffers carved out of the store.
///
/// A buffer keeps its bytes while it is busy (not yet released by the
/// compositor). New buffers go into the first gap after `base` that no busy
/// buffer overlaps, so two regions are enough for steady continuous capture.
#[derive(Debug)]
pub struct ShmPlacement<K> {
    base: usize,
    leases: Vec<(K, Range<usize>)>,
}

impl<K: PartialEq + std::fmt::Debug> ShmPlacement<K> {
    pub fn new(base: usize) -> Self {
        Self {
            base,
            leases: Vec::new(),
        }
    }

    /// Finds an offset for `size` bytes. Leases whose key is not in `busy`
    /// are forgotten first.
    pub fn place(&mut self, size: usize, busy: &[K]) -> usize {
        self.leases.retain(|(key, _)| busy.contains(key));

        let mut taken: Vec<&Range<usize>> = self.leases.iter().map(|(_, r)| r).collect();
        taken.sort_by_key(|r| r.start);

        let mut offset = self.base;
        for range in taken {
            if offset + size <= range.start {
                break;
            }
            offset = offset.max(range.end);
        }
        offset
    }

    /// Records that the buffer `key` occupies `size` bytes at `offset`.
    pub fn lease(&mut self, key: K, offset: usize, size: usize) {
        debug!(buffer = ?key, offset, size, "placed shm capture buffer");
        self.leases.push((key, offset..offset + size));
    }
}
