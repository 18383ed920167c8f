//! Emulated tag slots
//!
//! The portal has exactly two bays. Each bay owns a fixed 1 KiB image that
//! is allocated once and never resized; `size` records how much of it holds
//! real tag data. Presence is controlled only by the companion loader, never
//! by protocol commands.

use protocol::{BLOCK_SIZE, MAX_SLOTS, ProtocolError, import_dump};
use std::ops::Range;
use tracing::{debug, info};

/// Capacity of one tag image in bytes
pub const TAG_CAPACITY: usize = 1024;

/// One emulated tag bay
#[derive(Clone)]
pub struct Slot {
    data: [u8; TAG_CAPACITY],
    size: usize,
    present: bool,
    loaded: bool,
}

impl Slot {
    fn new() -> Self {
        Self {
            data: [0u8; TAG_CAPACITY],
            size: 0,
            present: false,
            loaded: false,
        }
    }

    /// Tag image bytes (full capacity, including unpopulated tail)
    pub fn data(&self) -> &[u8; TAG_CAPACITY] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("size", &self.size)
            .field("present", &self.present)
            .field("loaded", &self.loaded)
            .finish()
    }
}

/// Snapshot of one slot for logging and status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSummary {
    pub index: usize,
    pub present: bool,
    pub loaded: bool,
    pub size: usize,
}

impl std::fmt::Display for SlotSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "slot {}: {} {} {} bytes",
            self.index,
            if self.present { "present" } else { "absent" },
            if self.loaded { "loaded" } else { "empty" },
            self.size
        )
    }
}

/// Byte range of `block` within an image of `size` bytes
///
/// Returns `None` when any part of the block lies beyond `size`.
pub fn block_range(block: u8, size: usize) -> Option<Range<usize>> {
    let start = block as usize * BLOCK_SIZE;
    let end = start + BLOCK_SIZE;
    (end <= size).then_some(start..end)
}

/// The two tag slots
#[derive(Debug, Clone)]
pub struct SlotStore {
    slots: [Slot; MAX_SLOTS],
}

impl Default for SlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore {
    /// Two empty, absent slots
    pub fn new() -> Self {
        Self {
            slots: [Slot::new(), Slot::new()],
        }
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot, ProtocolError> {
        self.slots.get_mut(index).ok_or(ProtocolError::InvalidSlot {
            index,
            max: MAX_SLOTS,
        })
    }

    /// Read one block from a present slot
    ///
    /// `None` means the slot does not exist or holds no tag. A block beyond
    /// the populated size reads as zeros.
    pub fn read_block(&self, slot: usize, block: u8) -> Option<[u8; BLOCK_SIZE]> {
        let s = self.slots.get(slot).filter(|s| s.present)?;

        let mut out = [0u8; BLOCK_SIZE];
        if let Some(range) = block_range(block, s.size) {
            out.copy_from_slice(&s.data[range]);
        }
        Some(out)
    }

    /// Write one block into a present slot
    ///
    /// Returns `true` if the write landed. Absent slots and out-of-range
    /// blocks are silently ignored.
    pub fn write_block(&mut self, slot: usize, block: u8, data: &[u8; BLOCK_SIZE]) -> bool {
        let Some(s) = self.slots.get_mut(slot).filter(|s| s.present) else {
            return false;
        };
        let Some(range) = block_range(block, s.size) else {
            return false;
        };
        s.data[range].copy_from_slice(data);
        true
    }

    /// Replace a slot's image, truncated to [`TAG_CAPACITY`]
    ///
    /// Marks the content loaded but leaves presence unchanged. Returns the
    /// number of bytes stored.
    pub fn set_content(&mut self, slot: usize, bytes: &[u8]) -> Result<usize, ProtocolError> {
        let s = self.slot_mut(slot)?;
        let stored = import_dump(bytes, &mut s.data);
        s.size = stored;
        s.loaded = true;

        info!(slot, bytes = stored, "Tag image loaded");
        if stored < bytes.len() {
            debug!(
                slot,
                dropped = bytes.len() - stored,
                "Tag image truncated to capacity"
            );
        }
        Ok(stored)
    }

    /// Insert the tag into its bay
    pub fn mark_present(&mut self, slot: usize) -> Result<(), ProtocolError> {
        let s = self.slot_mut(slot)?;
        s.present = true;
        info!(slot, "Tag placed on portal");
        Ok(())
    }

    /// Remove the tag; the image bytes are kept
    pub fn mark_absent(&mut self, slot: usize) -> Result<(), ProtocolError> {
        let s = self.slot_mut(slot)?;
        s.present = false;
        s.loaded = false;
        info!(slot, "Tag removed from portal");
        Ok(())
    }

    /// Bit `i` set when slot `i` is present
    pub fn presence_mask(&self) -> u32 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.present)
            .fold(0u32, |mask, (i, _)| mask | (1 << i))
    }

    pub fn summary(&self) -> Vec<SlotSummary> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, s)| SlotSummary {
                index,
                present: s.present,
                loaded: s.loaded,
                size: s.size,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_tag(slot: usize, size: usize) -> SlotStore {
        let mut store = SlotStore::new();
        let image: Vec<u8> = (0..size).map(|i| i as u8).collect();
        store.set_content(slot, &image).unwrap();
        store.mark_present(slot).unwrap();
        store
    }

    #[test]
    fn test_block_range() {
        assert_eq!(block_range(0, 16), Some(0..16));
        assert_eq!(block_range(1, 32), Some(16..32));
        assert_eq!(block_range(2, 32), None);
        assert_eq!(block_range(0, 15), None);
        assert_eq!(block_range(63, TAG_CAPACITY), Some(1008..1024));
        assert_eq!(block_range(64, TAG_CAPACITY), None);
        assert_eq!(block_range(255, TAG_CAPACITY), None);
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = SlotStore::new();
        assert_eq!(store.presence_mask(), 0);
        for summary in store.summary() {
            assert!(!summary.present);
            assert!(!summary.loaded);
            assert_eq!(summary.size, 0);
        }
        assert!(store.slot(0).unwrap().data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_absent_slot() {
        let store = SlotStore::new();
        assert_eq!(store.read_block(0, 0), None);
        assert_eq!(store.read_block(2, 0), None);
    }

    #[test]
    fn test_read_loaded_but_absent() {
        let mut store = SlotStore::new();
        store.set_content(0, &[0xAA; 64]).unwrap();
        assert_eq!(store.read_block(0, 0), None);
    }

    #[test]
    fn test_read_out_of_range_block_is_zero() {
        let store = store_with_tag(1, 32);
        assert_eq!(store.read_block(1, 2), Some([0u8; BLOCK_SIZE]));
    }

    #[test]
    fn test_read_block_contents() {
        let store = store_with_tag(0, 64);
        let block = store.read_block(0, 1).unwrap();
        assert_eq!(block[0], 16);
        assert_eq!(block[15], 31);
    }

    #[test]
    fn test_write_then_read() {
        let mut store = store_with_tag(0, 64);
        let data = [0x5Au8; BLOCK_SIZE];
        assert!(store.write_block(0, 3, &data));
        assert_eq!(store.read_block(0, 3), Some(data));
    }

    #[test]
    fn test_write_rejected_cases() {
        let mut store = store_with_tag(0, 32);
        let data = [0xEEu8; BLOCK_SIZE];

        assert!(!store.write_block(0, 2, &data));
        assert!(!store.write_block(1, 0, &data));
        assert!(!store.write_block(5, 0, &data));
        assert_eq!(store.slot(0).unwrap().data()[32], 0);
    }

    #[test]
    fn test_set_content_truncates() {
        let mut store = SlotStore::new();
        assert_eq!(store.set_content(0, &vec![1u8; 4096]).unwrap(), TAG_CAPACITY);
        assert_eq!(store.slot(0).unwrap().size(), TAG_CAPACITY);
        assert!(store.slot(0).unwrap().is_loaded());
        assert!(!store.slot(0).unwrap().is_present());
    }

    #[test]
    fn test_invalid_slot_errors() {
        let mut store = SlotStore::new();
        assert_eq!(
            store.set_content(2, &[0]),
            Err(ProtocolError::InvalidSlot { index: 2, max: 2 })
        );
        assert!(store.mark_present(9).is_err());
        assert!(store.mark_absent(2).is_err());
    }

    #[test]
    fn test_mark_absent_keeps_buffer() {
        let mut store = store_with_tag(1, 48);
        store.mark_absent(1).unwrap();

        let slot = store.slot(1).unwrap();
        assert!(!slot.is_present());
        assert!(!slot.is_loaded());
        assert_eq!(slot.size(), 48);
        assert_eq!(slot.data()[47], 47);
    }

    #[test]
    fn test_presence_mask() {
        let mut store = SlotStore::new();
        store.mark_present(1).unwrap();
        assert_eq!(store.presence_mask(), 0b10);
        store.mark_present(0).unwrap();
        assert_eq!(store.presence_mask(), 0b11);
        store.mark_absent(1).unwrap();
        assert_eq!(store.presence_mask(), 0b01);
    }

    #[test]
    fn test_summary_display() {
        let store = store_with_tag(0, 1024);
        let summary = store.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].to_string(), "slot 0: present loaded 1024 bytes");
        assert_eq!(summary[1].to_string(), "slot 1: absent empty 0 bytes");
    }
}
