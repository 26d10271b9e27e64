//! Read-only view of the compositor's format/modifier table.

use std::os::fd::OwnedFd;

use memmap2::{Mmap, MmapOptions};

use crate::error::{Error, ProtocolViolation, Result};

/// Size of one table record: `u32 format, u32 padding, u64 modifier`.
pub const RECORD_SIZE: usize = 16;

/// One (format, modifier) pair from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatModifier {
    pub format: u32,
    pub modifier: u64,
}

/// The mapped table. Dropping it unmaps the memory.
#[derive(Debug)]
pub struct FormatTable {
    map: Option<Mmap>,
    len: usize,
}

impl FormatTable {
    /// Maps `size` bytes of `fd` privately and read-only. The descriptor is
    /// closed once mapped.
    pub fn map(fd: OwnedFd, size: u32) -> Result<Self> {
        if size as usize % RECORD_SIZE != 0 {
            return Err(ProtocolViolation::FormatTableSize {
                size,
                record: RECORD_SIZE,
            }
            .into());
        }

        let len = size as usize / RECORD_SIZE;
        if len == 0 {
            return Ok(Self { map: None, len: 0 });
        }

        // SAFETY: the compositor never truncates a table it has sent, and the
        // mapping is private so later writes on its side are not observed.
        let map = unsafe {
            MmapOptions::new()
                .len(size as usize)
                .map_copy_read_only(&fd)
        }
        .map_err(|e| Error::resource("map dmabuf format table", e))?;

        Ok(Self { map: Some(map), len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Looks up `index`, rejecting anything past the end of the table.
    pub fn get(&self, index: u16) -> Result<FormatModifier, ProtocolViolation> {
        let idx = index as usize;
        let out_of_bounds = ProtocolViolation::IndexOutOfBounds {
            index,
            len: self.len,
        };
        if idx >= self.len {
            return Err(out_of_bounds);
        }
        let Some(map) = &self.map else {
            return Err(out_of_bounds);
        };

        let record = &map[idx * RECORD_SIZE..(idx + 1) * RECORD_SIZE];
        let mut format = [0u8; 4];
        let mut modifier = [0u8; 8];
        format.copy_from_slice(&record[0..4]);
        modifier.copy_from_slice(&record[8..16]);

        Ok(FormatModifier {
            format: u32::from_ne_bytes(format),
            modifier: u64::from_ne_bytes(modifier),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use test_log::test;

    /// Writes `entries` in table layout to an unlinked temp file.
    pub(crate) fn table_fd(entries: &[(u32, u64)]) -> (OwnedFd, u32) {
        let mut file = tempfile::tempfile().unwrap();
        for (format, modifier) in entries {
            file.write_all(&format.to_ne_bytes()).unwrap();
            file.write_all(&0u32.to_ne_bytes()).unwrap();
            file.write_all(&modifier.to_ne_bytes()).unwrap();
        }
        file.flush().unwrap();
        let size = (entries.len() * RECORD_SIZE) as u32;
        (OwnedFd::from(file), size)
    }

    #[test]
    fn test_map_and_lookup() {
        let entries = [(0x3432_5258, 0), (0x3432_5241, 0x0100_0000_0000_0001)];
        let (fd, size) = table_fd(&entries);
        let table = FormatTable::map(fd, size).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(1).unwrap(),
            FormatModifier {
                format: 0x3432_5241,
                modifier: 0x0100_0000_0000_0001
            }
        );
    }

    #[test]
    fn test_length_is_size_over_record() {
        let entries: Vec<(u32, u64)> = (0..7).map(|i| (i, i as u64)).collect();
        let (fd, size) = table_fd(&entries);
        let table = FormatTable::map(fd, size).unwrap();
        assert_eq!(table.len(), size as usize / RECORD_SIZE);
        for i in 0..7u16 {
            assert_eq!(table.get(i).unwrap().format, i as u32);
        }
        assert_eq!(
            table.get(7).unwrap_err(),
            ProtocolViolation::IndexOutOfBounds { index: 7, len: 7 }
        );
    }

    #[test]
    fn test_partial_record_rejected() {
        let (fd, _) = table_fd(&[(1, 1)]);
        let err = FormatTable::map(fd, 20).unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolViolation(ProtocolViolation::FormatTableSize { size: 20, .. })
        ));
    }

    #[test]
    fn test_empty_table() {
        let (fd, size) = table_fd(&[]);
        let table = FormatTable::map(fd, size).unwrap();
        assert!(table.is_empty());
        assert!(table.get(0).is_err());
    }
}
