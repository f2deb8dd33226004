//! Row block buffers (spec §3 "Row block", §9 "Block-buffer growth").
//!
//! A block has two representations while a stripe is open: the working
//! buffer (`ColumnBlockData`, a flat `exists` vector plus a growable value
//! buffer, both cheap to mutate per-row) and the frozen buffer
//! (`ColumnBlockBuffers`, produced once at block boundary by packing the
//! bitmap and running the block through the compressor).

use crate::compression::CompressionKind;

/// Working state for one column's current (not yet full) block.
pub struct ColumnBlockData {
    /// One flag per row in the block, fixed size `R`. Kept separate from
    /// the packed bitmap so mid-block writes are O(1) per cell; packed only
    /// at block freeze.
    pub exists: Vec<bool>,
    /// Concatenation of serialized non-null values, in row order, each
    /// padded to the column's alignment. Grows amortized O(1) via the
    /// standard `Vec` doubling strategy.
    pub value_buffer: Vec<u8>,
}

impl ColumnBlockData {
    pub fn new(block_row_count: usize) -> Self {
        ColumnBlockData {
            exists: vec![false; block_row_count],
            value_buffer: Vec::new(),
        }
    }

    /// Resets for the next block without shrinking the already-warm
    /// `value_buffer` allocation.
    pub fn reset(&mut self) {
        for slot in self.exists.iter_mut() {
            *slot = false;
        }
        self.value_buffer.clear();
    }
}

/// Frozen output of one column's block, ready to be written to the data
/// fork (spec §4.5 step 5, "serialize_block").
#[derive(Clone, Debug, Default)]
pub struct ColumnBlockBuffers {
    pub exists_bytes: Vec<u8>,
    pub value_bytes: Vec<u8>,
    pub value_compression: CompressionKind,
}
