//! Stripe assembly: the live, in-memory state of one open stripe (spec §3
//! "Stripe", §4.2 "write_row", §9 "Block-buffer growth").
//!
//! A stripe is a fixed-capacity run of blocks per column. Rows are appended
//! directly into each column's current block; when that block fills
//! ([`StripeState::write_row`] notices it crossed `block_row_count`) it is
//! frozen into a [`ColumnBlockBuffers`] plus a completed
//! [`ColumnBlockSkipNode`], and a fresh working block takes its place. The
//! caller (the table writer) is responsible for noticing when the stripe
//! itself is full and handing it to the flusher.

use std::borrow::Cow;

use crate::block::{ColumnBlockBuffers, ColumnBlockData};
use crate::compression::{compress_block, Codec};
use crate::datum::{serialize_datum, serialize_bool_array, Datum};
use crate::error::{WriteError, WriteResult};
use crate::schema::{ColumnLength, ColumnSchema};
use crate::skipnode::{update_min_max, ColumnBlockSkipNode};

/// Extracts the unpadded comparison bytes for a datum, the way
/// `DatumGetPointer`/`DatumGetInt32` et al. hand a comparator raw value
/// bytes rather than the column's serialized-and-aligned representation.
fn datum_compare_bytes<'a>(datum: &'a Datum<'a>, schema: &ColumnSchema) -> Cow<'a, [u8]> {
    match datum {
        Datum::Inline(v) => {
            let len = match schema.length {
                ColumnLength::Fixed(len) => len as usize,
                _ => 8,
            };
            Cow::Owned(v.to_le_bytes()[..len].to_vec())
        }
        Datum::Fixed(v) => Cow::Owned(v.to_vec()),
        Datum::Variable(v) => Cow::Borrowed(*v),
    }
}

struct ColumnSlot {
    current: ColumnBlockData,
    pending_skip: ColumnBlockSkipNode,
    blocks: Vec<ColumnBlockBuffers>,
    skip_nodes: Vec<ColumnBlockSkipNode>,
}

impl ColumnSlot {
    fn new(block_row_count: usize) -> Self {
        ColumnSlot {
            current: ColumnBlockData::new(block_row_count),
            pending_skip: ColumnBlockSkipNode::default(),
            blocks: Vec::new(),
            skip_nodes: Vec::new(),
        }
    }
}

/// One open stripe's per-column block buffers and skip nodes.
pub struct StripeState {
    block_row_count: u32,
    rows_in_current_block: u32,
    row_count: u32,
    columns: Vec<ColumnSlot>,
}

impl StripeState {
    pub fn new(schemas: &[ColumnSchema], block_row_count: u32) -> Self {
        StripeState {
            block_row_count,
            rows_in_current_block: 0,
            row_count: 0,
            columns: schemas
                .iter()
                .map(|_| ColumnSlot::new(block_row_count as usize))
                .collect(),
        }
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Appends one row. `values[i] == None` means column `i` is null for
    /// this row; dropped columns' entries are ignored regardless of value.
    pub fn write_row(
        &mut self,
        schemas: &[ColumnSchema],
        values: &[Option<Datum<'_>>],
        codec: &dyn Codec,
        scratch: &mut Vec<u8>,
    ) -> WriteResult<()> {
        if values.len() != schemas.len() {
            return Err(WriteError::SchemaMismatch(format!(
                "row has {} values but schema has {} columns",
                values.len(),
                schemas.len()
            )));
        }

        let slot_index = self.rows_in_current_block as usize;
        for ((schema, slot), value) in schemas.iter().zip(self.columns.iter_mut()).zip(values) {
            if schema.dropped {
                continue;
            }
            slot.current.exists[slot_index] = value.is_some();
            if let Some(datum) = value {
                serialize_datum(&mut slot.current.value_buffer, datum, schema)?;
                let compare_bytes = datum_compare_bytes(datum, schema);
                update_min_max(&mut slot.pending_skip, &compare_bytes, schema);
            }
        }

        self.rows_in_current_block += 1;
        self.row_count += 1;

        if self.rows_in_current_block == self.block_row_count {
            self.freeze_current_block(codec, scratch);
        }

        Ok(())
    }

    /// Freezes whatever rows remain in the current (necessarily partial)
    /// block. A no-op if the stripe ended exactly on a block boundary.
    pub fn finish_partial_block(&mut self, codec: &dyn Codec, scratch: &mut Vec<u8>) {
        if self.rows_in_current_block > 0 {
            self.freeze_current_block(codec, scratch);
        }
    }

    fn freeze_current_block(&mut self, codec: &dyn Codec, scratch: &mut Vec<u8>) {
        let row_count = self.rows_in_current_block;

        for slot in self.columns.iter_mut() {
            let exists_bytes = serialize_bool_array(&slot.current.exists[..row_count as usize]);
            let value_compression =
                compress_block(codec, &slot.current.value_buffer, scratch);
            let value_bytes = if value_compression == crate::compression::CompressionKind::None {
                slot.current.value_buffer.clone()
            } else {
                scratch.clone()
            };

            slot.blocks.push(ColumnBlockBuffers {
                exists_bytes,
                value_bytes,
                value_compression,
            });

            let mut finished_skip = std::mem::take(&mut slot.pending_skip);
            finished_skip.row_count = row_count;
            finished_skip.value_compression = value_compression;
            slot.skip_nodes.push(finished_skip);

            slot.current.reset();
        }

        self.rows_in_current_block = 0;
    }

    /// Column-major access to each column's frozen blocks, for the flusher.
    pub fn column_blocks(&self) -> impl Iterator<Item = &[ColumnBlockBuffers]> {
        self.columns.iter().map(|slot| slot.blocks.as_slice())
    }

    /// Column-major access to each column's completed skip nodes.
    pub fn column_skip_nodes(&self) -> impl Iterator<Item = &[ColumnBlockSkipNode]> {
        self.columns.iter().map(|slot| slot.skip_nodes.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::NoneCodec;
    use crate::schema::Alignment;

    fn two_column_schema() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::fixed(4, true, Alignment::Four),
            ColumnSchema::variable(Alignment::Four),
        ]
    }

    #[test]
    fn partial_block_has_no_frozen_blocks_until_finished() {
        let schemas = two_column_schema();
        let mut stripe = StripeState::new(&schemas, 4);
        let mut scratch = Vec::new();
        let codec = NoneCodec;

        stripe
            .write_row(
                &schemas,
                &[Some(Datum::Inline(1)), Some(Datum::Variable(b"a"))],
                &codec,
                &mut scratch,
            )
            .unwrap();

        assert_eq!(stripe.row_count(), 1);
        assert_eq!(stripe.column_blocks().next().unwrap().len(), 0);

        stripe.finish_partial_block(&codec, &mut scratch);
        assert_eq!(stripe.column_blocks().next().unwrap().len(), 1);
    }

    #[test]
    fn full_block_freezes_automatically() {
        let schemas = two_column_schema();
        let mut stripe = StripeState::new(&schemas, 2);
        let mut scratch = Vec::new();
        let codec = NoneCodec;

        for i in 0..2 {
            stripe
                .write_row(
                    &schemas,
                    &[Some(Datum::Inline(i)), Some(Datum::Variable(b"x"))],
                    &codec,
                    &mut scratch,
                )
                .unwrap();
        }

        let blocks: Vec<_> = stripe.column_blocks().collect();
        assert_eq!(blocks[0].len(), 1);
        let skip_nodes: Vec<_> = stripe.column_skip_nodes().collect();
        assert_eq!(skip_nodes[0][0].row_count, 2);
    }

    #[test]
    fn null_values_are_tracked_in_the_bitmap_and_excluded_from_stats() {
        let schemas = vec![
            ColumnSchema::fixed(4, true, Alignment::Four)
                .with_compare(crate::schema::compare_i32_le, 0),
        ];
        let mut stripe = StripeState::new(&schemas, 3);
        let mut scratch = Vec::new();
        let codec = NoneCodec;

        stripe
            .write_row(&schemas, &[Some(Datum::Inline(5))], &codec, &mut scratch)
            .unwrap();
        stripe
            .write_row(&schemas, &[None], &codec, &mut scratch)
            .unwrap();
        stripe
            .write_row(&schemas, &[Some(Datum::Inline(1))], &codec, &mut scratch)
            .unwrap();

        let skip_nodes: Vec<_> = stripe.column_skip_nodes().collect();
        let node = &skip_nodes[0][0];
        assert_eq!(
            i32::from_le_bytes(node.min_value.clone().unwrap().try_into().unwrap()),
            1
        );
        assert_eq!(
            i32::from_le_bytes(node.max_value.clone().unwrap().try_into().unwrap()),
            5
        );

        let blocks: Vec<_> = stripe.column_blocks().collect();
        let exists = crate::datum::deserialize_bool_array(&blocks[0][0].exists_bytes, 3);
        assert_eq!(exists, vec![true, false, true]);
    }

    #[test]
    fn mismatched_row_width_is_a_schema_mismatch() {
        let schemas = two_column_schema();
        let mut stripe = StripeState::new(&schemas, 4);
        let mut scratch = Vec::new();
        let codec = NoneCodec;

        let err = stripe
            .write_row(&schemas, &[Some(Datum::Inline(1))], &codec, &mut scratch)
            .unwrap_err();
        assert!(matches!(err, WriteError::SchemaMismatch(_)));
    }
}
