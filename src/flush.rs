//! The stripe flusher (spec §4.5): turns one finished [`StripeState`] into
//! bytes on the data fork, in the fixed region order skip-lists, then
//! per-column exists+value data, then the stripe footer.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::block::ColumnBlockBuffers;
use crate::compression::Codec;
use crate::footer::StripeMetadata;
use crate::page::DataForkAppender;
use crate::schema::ColumnSchema;
use crate::skipnode::{serialize_column_skip_list, ColumnBlockSkipNode};
use crate::stripe::StripeState;

/// Per-column aggregate lengths, written once at the end of a stripe. A
/// reader locates block N's value region by adding up the column's
/// `exists_size` (spec §4.6 step 5.2), so `exists_size` and `value_size`
/// must stay separate rather than a combined per-column total.
pub struct StripeFooter {
    pub skip_list_size: Vec<u64>,
    pub exists_size: Vec<u64>,
    pub value_size: Vec<u64>,
}

pub fn serialize_stripe_footer(footer: &StripeFooter) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(footer.skip_list_size.len() as u32)
        .unwrap();
    for i in 0..footer.skip_list_size.len() {
        buf.write_u64::<LittleEndian>(footer.skip_list_size[i]).unwrap();
        buf.write_u64::<LittleEndian>(footer.exists_size[i]).unwrap();
        buf.write_u64::<LittleEndian>(footer.value_size[i]).unwrap();
    }
    buf
}

/// One column's laid-out data region, plus its skip list with offsets
/// filled in and the aggregate sizes the stripe footer needs.
struct ColumnRegion {
    skip_nodes: Vec<ColumnBlockSkipNode>,
    bytes: Vec<u8>,
    exists_size: u64,
    value_size: u64,
}

/// Lays out one column's data region as all blocks' exists buffers in block
/// order, then all blocks' value buffers in block order (spec §4.6 step
/// 5.2; `cstore_writer.c:708-731` writes every `existsBuffer` in one loop
/// and every `valueBuffer` in a second loop). `value_offset` is counted
/// from a cursor that starts at 0 for this column, independent of the
/// column's exists region size (`cstore_writer.c:658-678`).
fn lay_out_column(skip_nodes: &[ColumnBlockSkipNode], blocks: &[ColumnBlockBuffers]) -> ColumnRegion {
    let mut nodes = skip_nodes.to_vec();

    let mut exists_bytes = Vec::new();
    let mut exists_offset: u64 = 0;
    for (node, block) in nodes.iter_mut().zip(blocks) {
        node.exists_offset = exists_offset;
        node.exists_length = block.exists_bytes.len() as u64;
        exists_bytes.extend_from_slice(&block.exists_bytes);
        exists_offset += node.exists_length;
    }

    let mut value_bytes = Vec::new();
    let mut value_offset: u64 = 0;
    for (node, block) in nodes.iter_mut().zip(blocks) {
        node.value_offset = value_offset;
        node.value_length = block.value_bytes.len() as u64;
        value_bytes.extend_from_slice(&block.value_bytes);
        value_offset += node.value_length;
    }

    let mut bytes = exists_bytes;
    let exists_size = bytes.len() as u64;
    bytes.extend_from_slice(&value_bytes);
    let value_size = value_offset;

    ColumnRegion {
        skip_nodes: nodes,
        bytes,
        exists_size,
        value_size,
    }
}

/// Freezes any trailing partial block, serializes every region, writes them
/// to `appender` in order, and returns the stripe's entry for the table
/// footer. `file_offset` is the stripe's absolute starting offset in the
/// data fork (spec invariant I2: `file_offset` of stripe N+1 equals stripe
/// N's `file_offset + total_length()`).
pub fn flush_stripe(
    _schemas: &[ColumnSchema],
    stripe: &mut StripeState,
    codec: &dyn Codec,
    appender: &mut DataForkAppender<'_>,
    file_offset: u64,
) -> crate::error::WriteResult<StripeMetadata> {
    let mut scratch = Vec::new();
    stripe.finish_partial_block(codec, &mut scratch);

    let regions: Vec<ColumnRegion> = stripe
        .column_skip_nodes()
        .zip(stripe.column_blocks())
        .map(|(skip_nodes, blocks)| lay_out_column(skip_nodes, blocks))
        .collect();

    let skip_list_chunks: Vec<Vec<u8>> = regions
        .iter()
        .map(|region| serialize_column_skip_list(&region.skip_nodes))
        .collect();

    let skip_list_length: u64 = skip_list_chunks.iter().map(|b| b.len() as u64).sum();
    for chunk in &skip_list_chunks {
        appender.append_bytes(chunk)?;
    }

    let data_length: u64 = regions.iter().map(|region| region.bytes.len() as u64).sum();
    for region in &regions {
        appender.append_bytes(&region.bytes)?;
    }

    let stripe_footer = StripeFooter {
        skip_list_size: skip_list_chunks.iter().map(|b| b.len() as u64).collect(),
        exists_size: regions.iter().map(|region| region.exists_size).collect(),
        value_size: regions.iter().map(|region| region.value_size).collect(),
    };
    let footer_bytes = serialize_stripe_footer(&stripe_footer);
    let footer_length = footer_bytes.len() as u64;
    appender.append_bytes(&footer_bytes)?;

    Ok(StripeMetadata {
        file_offset,
        skip_list_length,
        data_length,
        footer_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::NoneCodec;
    use crate::datum::Datum;
    use crate::page::{ForkId, InMemoryPageStore, NoopWalSink, PageStore};
    use crate::schema::Alignment;

    #[test]
    fn flush_writes_three_regions_and_returns_consistent_lengths() {
        let schemas = vec![ColumnSchema::fixed(4, true, Alignment::Four)];
        let mut stripe = StripeState::new(&schemas, 2);
        let codec = NoneCodec;
        let mut scratch = Vec::new();

        for v in [1i64, 2, 3] {
            stripe
                .write_row(&schemas, &[Some(Datum::Inline(v as u64))], &codec, &mut scratch)
                .unwrap();
        }

        let store = InMemoryPageStore::new();
        let wal = NoopWalSink;
        let mut appender = DataForkAppender::new(&store, &wal, false, 0);

        let metadata =
            flush_stripe(&schemas, &mut stripe, &codec, &mut appender, 0).unwrap();

        assert_eq!(metadata.file_offset, 0);
        assert!(metadata.skip_list_length > 0);
        assert!(metadata.data_length > 0);
        assert!(metadata.footer_length > 0);
        assert!(store.page_count(ForkId::Data).unwrap() >= 1);
    }

    #[test]
    fn column_region_groups_all_exists_before_all_values() {
        // Two one-row blocks: the region must read [exists0, exists1,
        // value0, value1], never [exists0, value0, exists1, value1].
        let schemas = vec![ColumnSchema::fixed(4, true, Alignment::Four)];
        let mut stripe = StripeState::new(&schemas, 1);
        let codec = NoneCodec;
        let mut scratch = Vec::new();

        for v in [10i64, 20] {
            stripe
                .write_row(&schemas, &[Some(Datum::Inline(v as u64))], &codec, &mut scratch)
                .unwrap();
        }
        stripe.finish_partial_block(&codec, &mut scratch);

        let skip_nodes: Vec<_> = stripe.column_skip_nodes().next().unwrap().to_vec();
        let blocks: Vec<_> = stripe.column_blocks().next().unwrap().to_vec();
        let region = lay_out_column(&skip_nodes, &blocks);

        let mut expected = Vec::new();
        for b in &blocks {
            expected.extend_from_slice(&b.exists_bytes);
        }
        for b in &blocks {
            expected.extend_from_slice(&b.value_bytes);
        }
        assert_eq!(region.bytes, expected);
    }

    #[test]
    fn value_offset_starts_at_zero_per_column_not_after_exists_region() {
        let schemas = vec![ColumnSchema::fixed(4, true, Alignment::Four)];
        let mut stripe = StripeState::new(&schemas, 1);
        let codec = NoneCodec;
        let mut scratch = Vec::new();

        for v in [1i64, 2] {
            stripe
                .write_row(&schemas, &[Some(Datum::Inline(v as u64))], &codec, &mut scratch)
                .unwrap();
        }
        stripe.finish_partial_block(&codec, &mut scratch);

        let skip_nodes: Vec<_> = stripe.column_skip_nodes().next().unwrap().to_vec();
        let blocks: Vec<_> = stripe.column_blocks().next().unwrap().to_vec();
        let region = lay_out_column(&skip_nodes, &blocks);

        // Both blocks' exists buffers are non-empty, so if value_offset were
        // continuous after the exists region (rather than its own
        // zero-based cursor) block 1's value_offset would equal the
        // column's exists_size plus block 0's value_length, not just block
        // 0's value_length.
        assert_eq!(region.skip_nodes[0].value_offset, 0);
        assert_eq!(
            region.skip_nodes[1].value_offset,
            region.skip_nodes[0].value_length
        );
        assert!(region.exists_size > 0);
    }
}
