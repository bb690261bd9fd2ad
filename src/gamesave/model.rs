//! Save payloads.
//!
//! Both types are `#[repr(C)]` [`Pod`] structs: their persisted form is their
//! raw byte image, so field order and sizes are part of the save format.
//! Bump the `*_VERSION` constant whenever a layout changes.

use bytemuck::{Pod, Zeroable};

pub const BOARD_VERSION: u32 = 1;
pub const INDEX_VERSION: u32 = 1;

pub const BOARD_WIDTH: usize = 8;
pub const BOARD_HEIGHT: usize = 8;
pub const BOARD_TILES: usize = BOARD_WIDTH * BOARD_HEIGHT;

/// One word-game board: an 8x8 letter grid plus progress counters.
///
/// A tile value of 0 is an empty cell; otherwise it is an ASCII uppercase letter.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct BoardData {
    pub version: u32,
    pub update_count: u32,
    pub score: u32,
    pub words_found: u32,
    pub tiles: [u8; BOARD_TILES],
}

impl Default for BoardData {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl BoardData {
    pub fn tile(&self, x: usize, y: usize) -> Option<char> {
        if x >= BOARD_WIDTH || y >= BOARD_HEIGHT {
            return None;
        }
        match self.tiles[y * BOARD_WIDTH + x] {
            0 => None,
            b => Some(b as char),
        }
    }

    /// Fill tiles row by row from `letters`, uppercasing ASCII letters.
    ///
    /// Non-letters become empty cells; anything past the last tile is ignored
    /// and unused tiles are cleared.
    pub fn set_tiles(&mut self, letters: &str) {
        self.tiles = [0; BOARD_TILES];
        for (slot, ch) in self.tiles.iter_mut().zip(letters.chars()) {
            *slot = if ch.is_ascii_alphabetic() {
                ch.to_ascii_uppercase() as u8
            } else {
                0
            };
        }
    }

    pub fn rows(&self) -> Vec<String> {
        self.tiles
            .chunks(BOARD_WIDTH)
            .map(|row| {
                row.iter()
                    .map(|&b| if b == 0 { '.' } else { b as char })
                    .collect()
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.iter().all(|&b| b == 0)
    }
}

/// Pre-save hook for boards: stamp the layout version and count the save.
pub fn stamp_board(board: &mut BoardData) {
    board.version = BOARD_VERSION;
    board.update_count = board.update_count.wrapping_add(1);
}

/// Records which board slot is active. `active_slot` is 1-based; 0 means none.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndexRecord {
    pub version: u32,
    pub update_counter: u32,
    pub active_slot: u32,
}

impl IndexRecord {
    /// The index written when none exists yet.
    pub fn fresh() -> Self {
        Self {
            version: INDEX_VERSION,
            update_counter: 0,
            active_slot: 1,
        }
    }
}

/// Pre-save hook for the index.
pub fn stamp_index(index: &mut IndexRecord) {
    index.version = INDEX_VERSION;
}
