//! linux-dmabuf surface feedback negotiation.
//!
//! Feedback arrives as `main_device`, `format_table`, then one or more
//! tranches (`tranche_target_device`, `tranche_flags`, `tranche_formats`,
//! `tranche_done`) and finally `done`. Only tranches that target the main
//! device contribute modifiers, since that is the device buffers are
//! allocated on.

use std::collections::HashMap;
use std::os::fd::OwnedFd;

use tracing::{debug, info, warn};

use crate::dmabuf::device::{parse_device_id, DeviceId, RenderDevices};
use crate::dmabuf::table::FormatTable;
use crate::error::{ProtocolViolation, Result};

/// A feedback event, detached from the protocol object it arrived on.
#[derive(Debug)]
pub enum FeedbackEvent {
    MainDevice(Vec<u8>),
    FormatTable { fd: OwnedFd, size: u32 },
    TrancheTargetDevice(Vec<u8>),
    TrancheFlags(u32),
    TrancheFormats(Vec<u8>),
    TrancheDone,
    Done,
}

/// Progress through one feedback round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedbackPhase {
    Idle,
    MainDeviceSet,
    TableSet,
    Tranche,
    Done,
}

pub const TRANCHE_FLAG_SCANOUT: u32 = 1;

/// Format → compatible modifiers, in the order the compositor listed them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormatModifierMap {
    entries: HashMap<u32, Vec<u64>>,
}

impl FormatModifierMap {
    pub fn modifiers(&self, format: u32) -> Option<&[u64]> {
        self.entries
            .get(&format)
            .filter(|m| !m.is_empty())
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, format: u32, modifier: u64) {
        let modifiers = self.entries.entry(format).or_default();
        if !modifiers.contains(&modifier) {
            modifiers.push(modifier);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

struct MainDevice<D: RenderDevices> {
    node: D::Node,
    device: D::Device,
}

pub struct FeedbackNegotiator<D: RenderDevices> {
    devices: D,
    main: Option<MainDevice<D>>,
    table: Option<FormatTable>,
    tranche_is_main_device: bool,
    map: FormatModifierMap,
    negotiated: Option<FormatModifierMap>,
    phase: FeedbackPhase,
    generation: u32,
}

impl<D: RenderDevices> FeedbackNegotiator<D> {
    pub fn new(devices: D) -> Self {
        Self {
            devices,
            main: None,
            table: None,
            tranche_is_main_device: false,
            map: FormatModifierMap::default(),
            negotiated: None,
            phase: FeedbackPhase::Idle,
            generation: 0,
        }
    }

    /// Feeds one event. Malformed arrays and out-of-range indices are
    /// protocol violations; a device that cannot be resolved only costs the
    /// affected tranche its contribution.
    pub fn handle(&mut self, event: FeedbackEvent) -> Result<()> {
        if self.phase == FeedbackPhase::Done && !matches!(event, FeedbackEvent::Done) {
            debug!("dmabuf feedback: new round, rebuilding format map");
            self.map.clear();
            self.phase = FeedbackPhase::Idle;
        }

        match event {
            FeedbackEvent::MainDevice(bytes) => self.main_device(&bytes),
            FeedbackEvent::FormatTable { fd, size } => self.format_table(fd, size),
            FeedbackEvent::TrancheTargetDevice(bytes) => self.tranche_target_device(&bytes),
            FeedbackEvent::TrancheFlags(flags) => {
                debug!(
                    scanout = flags & TRANCHE_FLAG_SCANOUT != 0,
                    "dmabuf feedback: tranche flags"
                );
                Ok(())
            }
            FeedbackEvent::TrancheFormats(indices) => self.tranche_formats(&indices),
            FeedbackEvent::TrancheDone => {
                debug!("dmabuf feedback: tranche done");
                self.tranche_is_main_device = false;
                Ok(())
            }
            FeedbackEvent::Done => {
                self.phase = FeedbackPhase::Done;
                self.generation += 1;
                self.negotiated = Some(self.map.clone());
                info!(
                    formats = self.map.len(),
                    generation = self.generation,
                    "dmabuf feedback done"
                );
                Ok(())
            }
        }
    }

    fn main_device(&mut self, bytes: &[u8]) -> Result<()> {
        let id = parse_device_id(bytes)?;
        debug!(device = format_args!("{id:#x}"), "dmabuf feedback: main device");

        // The previous handle is closed even if the new one cannot be opened.
        self.main = None;
        self.main = self.open_device(id);
        self.phase = FeedbackPhase::MainDeviceSet;
        Ok(())
    }

    fn format_table(&mut self, fd: OwnedFd, size: u32) -> Result<()> {
        debug!(size, "dmabuf feedback: format table");
        self.table = None;
        let table = FormatTable::map(fd, size)?;
        debug!(entries = table.len(), "mapped format table");
        self.table = Some(table);
        self.phase = FeedbackPhase::TableSet;
        Ok(())
    }

    fn tranche_target_device(&mut self, bytes: &[u8]) -> Result<()> {
        let id = parse_device_id(bytes)?;
        debug!(device = format_args!("{id:#x}"), "dmabuf feedback: tranche target device");
        self.phase = FeedbackPhase::Tranche;

        self.tranche_is_main_device = match &self.main {
            Some(main) => match self.devices.resolve(id) {
                Ok(node) => {
                    let same = node == main.node;
                    if !same {
                        debug!(?node, main = ?main.node, "tranche targets another device");
                    }
                    same
                }
                Err(e) => {
                    warn!("cannot resolve tranche device, skipping tranche: {e}");
                    false
                }
            },
            None => {
                info!("no main device, using tranche device");
                self.main = self.open_device(id);
                self.main.is_some()
            }
        };
        Ok(())
    }

    fn tranche_formats(&mut self, indices: &[u8]) -> Result<()> {
        if indices.len() % 2 != 0 {
            return Err(ProtocolViolation::IndexArraySize { len: indices.len() }.into());
        }
        self.phase = FeedbackPhase::Tranche;

        let Some(table) = &self.table else {
            warn!("tranche formats without a format table, skipping");
            return Ok(());
        };

        for chunk in indices.chunks_exact(2) {
            let index = u16::from_ne_bytes([chunk[0], chunk[1]]);
            let pair = table.get(index)?;
            if !self.tranche_is_main_device {
                continue;
            }
            debug!(
                format = %fourcc_name(pair.format),
                modifier = format_args!("{:#x}", pair.modifier),
                "format modifier pair"
            );
            self.map.push(pair.format, pair.modifier);
        }
        Ok(())
    }

    fn open_device(&self, id: DeviceId) -> Option<MainDevice<D>> {
        let node = match self.devices.resolve(id) {
            Ok(node) => node,
            Err(e) => {
                warn!("failed to resolve drm device: {e}");
                return None;
            }
        };
        match self.devices.open(&node) {
            Ok(device) => Some(MainDevice { node, device }),
            Err(e) => {
                warn!("failed to open allocator device: {e}");
                None
            }
        }
    }

    /// The map of the round in progress, or of the last round if it is done.
    pub fn map(&self) -> &FormatModifierMap {
        &self.map
    }

    /// The map allocations should use: the last completed round's, so a
    /// resent feedback does not hide formats until its `done`. Before the
    /// first `done` this is the map being built.
    pub fn negotiated(&self) -> &FormatModifierMap {
        self.negotiated.as_ref().unwrap_or(&self.map)
    }

    /// True once `done` has been received for the current round.
    pub fn is_stable(&self) -> bool {
        self.phase == FeedbackPhase::Done
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn main_node(&self) -> Option<&D::Node> {
        self.main.as_ref().map(|m| &m.node)
    }

    pub fn device_mut(&mut self) -> Option<&mut D::Device> {
        self.main.as_mut().map(|m| &mut m.device)
    }

    /// Unmaps the table and closes the allocator device.
    pub fn reset(&mut self) {
        self.table = None;
        self.main = None;
        self.map.clear();
        self.negotiated = None;
        self.tranche_is_main_device = false;
        self.phase = FeedbackPhase::Idle;
    }
}

/// Renders a fourcc as its four characters, falling back to hex.
pub fn fourcc_name(format: u32) -> String {
    let bytes = format.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        format!("{format:#010x}")
    }
}
