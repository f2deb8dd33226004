//! The table footer, the footer header page, and the footer manager
//! (spec §3 "Table footer"/"Footer header", §4.7, §6).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use crate::error::{WriteError, WriteResult};
use crate::page::{ForkId, PageStore, WalSink, PAGE_DATA_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE};

/// `postscript_size` is written as a single byte (spec §4.7, §6), so it
/// must stay below 256.
const POSTSCRIPT_SIZE_MAX: usize = 256;

/// One flushed stripe's location and extent within the data fork.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripeMetadata {
    pub file_offset: u64,
    pub skip_list_length: u64,
    pub data_length: u64,
    pub footer_length: u64,
}

impl StripeMetadata {
    pub fn total_length(&self) -> u64 {
        self.skip_list_length + self.data_length + self.footer_length
    }
}

/// The whole-session footer: the configured block row count `R` plus every
/// stripe's metadata, ordered by `file_offset` (spec invariant P1).
#[derive(Clone, Debug, Default)]
pub struct TableFooter {
    pub block_row_count: u32,
    pub stripes: Vec<StripeMetadata>,
}

impl TableFooter {
    pub fn fresh(block_row_count: u32) -> Self {
        TableFooter {
            block_row_count,
            stripes: Vec::new(),
        }
    }

    pub fn append_stripe(&mut self, metadata: StripeMetadata) {
        self.stripes.push(metadata);
    }

    /// The absolute byte offset one past the last stripe, i.e. where the
    /// next stripe should begin (spec invariant I2).
    pub fn next_file_offset(&self) -> u64 {
        match self.stripes.last() {
            Some(last) => last.file_offset + last.total_length(),
            None => 0,
        }
    }
}

/// Serializes the footer into the byte stream shape defined by spec §4.7/§6:
/// `int32 data_length ‖ serialized_footer ‖ serialized_postscript ‖ uint8 postscript_size`.
pub fn serialize_footer_stream(footer: &TableFooter) -> WriteResult<Vec<u8>> {
    let mut table_footer_bytes = Vec::new();
    table_footer_bytes
        .write_u32::<LittleEndian>(footer.block_row_count)
        .unwrap();
    table_footer_bytes
        .write_u32::<LittleEndian>(footer.stripes.len() as u32)
        .unwrap();
    for stripe in &footer.stripes {
        table_footer_bytes
            .write_u64::<LittleEndian>(stripe.file_offset)
            .unwrap();
        table_footer_bytes
            .write_u64::<LittleEndian>(stripe.skip_list_length)
            .unwrap();
        table_footer_bytes
            .write_u64::<LittleEndian>(stripe.data_length)
            .unwrap();
        table_footer_bytes
            .write_u64::<LittleEndian>(stripe.footer_length)
            .unwrap();
    }

    let mut postscript_bytes = Vec::new();
    postscript_bytes
        .write_u32::<LittleEndian>(table_footer_bytes.len() as u32)
        .unwrap();

    if postscript_bytes.len() >= POSTSCRIPT_SIZE_MAX {
        return Err(WriteError::SerializationOverflow(format!(
            "postscript size {} does not fit in one byte",
            postscript_bytes.len()
        )));
    }
    let postscript_size = postscript_bytes.len() as u8;

    let mut stream = Vec::with_capacity(4 + table_footer_bytes.len() + postscript_bytes.len() + 1);
    stream.write_u32::<LittleEndian>(0).unwrap(); // data_length placeholder
    stream.extend_from_slice(&table_footer_bytes);
    stream.extend_from_slice(&postscript_bytes);
    stream.push(postscript_size);

    let data_length = stream.len() as u32;
    stream[0..4].copy_from_slice(&data_length.to_le_bytes());

    Ok(stream)
}

/// Parses a footer byte stream produced by [`serialize_footer_stream`]. The
/// reader walks backward from the last byte of the logical stream (the
/// `data_length`-bounded prefix of `raw`, which may itself carry trailing
/// page-rounding padding). Returns `Ok(None)` for anything that doesn't
/// parse as a well-formed stream.
pub fn deserialize_footer_stream(raw: &[u8]) -> WriteResult<Option<TableFooter>> {
    if raw.len() < 4 {
        return Ok(None);
    }
    let data_length = (&raw[0..4]).read_u32::<LittleEndian>().unwrap() as usize;
    if data_length < 9 || data_length > raw.len() {
        return Ok(None);
    }

    let stream = &raw[0..data_length];
    let postscript_size = stream[stream.len() - 1] as usize;
    if postscript_size == 0 || postscript_size + 5 > stream.len() {
        return Ok(None);
    }

    let postscript_start = stream.len() - 1 - postscript_size;
    let postscript = &stream[postscript_start..postscript_start + postscript_size];
    if postscript.len() < 4 {
        return Ok(None);
    }
    let footer_len = (&postscript[0..4]).read_u32::<LittleEndian>().unwrap() as usize;

    let footer_start = 4;
    if footer_start + footer_len != postscript_start {
        return Ok(None);
    }

    let footer_bytes = &stream[footer_start..footer_start + footer_len];
    let mut cursor = footer_bytes;
    if cursor.len() < 8 {
        return Ok(None);
    }
    let block_row_count = cursor.read_u32::<LittleEndian>().unwrap();
    let stripe_count = cursor.read_u32::<LittleEndian>().unwrap() as usize;

    if cursor.len() < stripe_count * 32 {
        return Ok(None);
    }

    let mut stripes = Vec::with_capacity(stripe_count);
    for _ in 0..stripe_count {
        stripes.push(StripeMetadata {
            file_offset: cursor.read_u64::<LittleEndian>().unwrap(),
            skip_list_length: cursor.read_u64::<LittleEndian>().unwrap(),
            data_length: cursor.read_u64::<LittleEndian>().unwrap(),
            footer_length: cursor.read_u64::<LittleEndian>().unwrap(),
        });
    }

    Ok(Some(TableFooter {
        block_row_count,
        stripes,
    }))
}

fn parse_header_payload(payload: &[u8]) -> Option<(u32, u32)> {
    if payload.len() < 8 {
        return None;
    }
    let mut cursor = payload;
    let starting_block = cursor.read_u32::<LittleEndian>().unwrap();
    let block_count = cursor.read_u32::<LittleEndian>().unwrap();
    Some((starting_block, block_count))
}

fn page_payload(page: &[u8]) -> &[u8] {
    let len = u32::from_le_bytes(page[0..4].try_into().unwrap()) as usize;
    &page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + len]
}

/// Reads the header page (block 0 of the footer fork) and, if it parses
/// and points at a non-zero starting block, returns `(starting_block,
/// block_count)`. Spec §4.1's "Open question" asks that an unparseable
/// header and an explicit zero starting block be treated identically: both
/// are folded into `None` here.
fn read_header(store: &dyn PageStore) -> WriteResult<Option<(u32, u32)>> {
    if store.page_count(ForkId::Footer)? == 0 {
        return Ok(None);
    }

    let header_page = store.read_page(ForkId::Footer, 0)?;
    let payload = page_payload(&header_page);

    match parse_header_payload(payload) {
        Some((starting_block, block_count)) if starting_block != 0 => {
            Ok(Some((starting_block, block_count)))
        }
        Some(_) => {
            warn!("footer header parsed but starting_block is 0; reclaiming from block 1");
            Ok(None)
        }
        None => {
            warn!("footer header page did not parse; reclaiming from block 1");
            Ok(None)
        }
    }
}

/// Reads the whole footer fork and deserializes the table footer it
/// currently points at, or `None` if there isn't one yet.
pub fn read_table_footer(store: &dyn PageStore) -> WriteResult<Option<TableFooter>> {
    let (starting_block, block_count) = match read_header(store)? {
        Some(range) => range,
        None => return Ok(None),
    };

    let mut raw = Vec::new();
    for i in 0..block_count {
        let page = store.read_page(ForkId::Footer, starting_block + i)?;
        raw.extend_from_slice(page_payload(&page));
    }

    deserialize_footer_stream(&raw)
}

/// Chooses where the next footer write should start (spec §4.1 "Footer
/// starting-block selection").
fn choose_starting_block(store: &dyn PageStore, new_block_count: u32) -> WriteResult<u32> {
    let (starting_block, block_count) = match read_header(store)? {
        None => return Ok(1),
        Some(range) => range,
    };

    if new_block_count < starting_block {
        Ok(1)
    } else {
        Ok(starting_block + block_count)
    }
}

fn make_page(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= PAGE_DATA_SIZE);
    let mut page = vec![0u8; PAGE_SIZE];
    page[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + payload.len()].copy_from_slice(payload);
    page
}

/// Writes `stream` into the footer fork at a freshly chosen range, then
/// swaps the header page to point at it. The header write is intentionally
/// the last step: it is the linearization point for the table's visible
/// stripe set (spec §5, §9 "Footer ping-pong").
pub fn write_footer_stream(
    store: &dyn PageStore,
    wal: &dyn WalSink,
    logging: bool,
    stream: &[u8],
) -> WriteResult<()> {
    let block_count = ((stream.len() + PAGE_DATA_SIZE - 1) / PAGE_DATA_SIZE).max(1) as u32;
    let starting_block = choose_starting_block(store, block_count)?;

    let mut offset = 0usize;
    for i in 0..block_count {
        let block = starting_block + i;
        let copy_len = (stream.len() - offset).min(PAGE_DATA_SIZE);
        let page = make_page(&stream[offset..offset + copy_len]);
        store.write_page(ForkId::Footer, block, &page)?;
        if logging {
            wal.log_new_page(ForkId::Footer, block, &page);
        }
        offset += copy_len;
    }

    let mut header_payload = Vec::with_capacity(8);
    header_payload
        .write_u32::<LittleEndian>(starting_block)
        .unwrap();
    header_payload
        .write_u32::<LittleEndian>(block_count)
        .unwrap();
    let header_page = make_page(&header_payload);

    store.write_page(ForkId::Footer, 0, &header_page)?;
    // Unconditional: recovery depends on this regardless of the session's
    // logging flag (spec §4.1, §9 "WAL gating").
    wal.log_new_page(ForkId::Footer, 0, &header_page);

    debug!(
        "footer header now points at blocks [{}, {})",
        starting_block,
        starting_block + block_count
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{InMemoryPageStore, NoopWalSink, RecordingWalSink};

    #[test]
    fn empty_fork_has_no_footer() {
        let store = InMemoryPageStore::new();
        assert!(read_table_footer(&store).unwrap().is_none());
    }

    #[test]
    fn header_page_is_logged_even_when_logging_is_off() {
        let store = InMemoryPageStore::new();
        let wal = RecordingWalSink::new();

        let footer = TableFooter::fresh(8);
        let stream = serialize_footer_stream(&footer).unwrap();
        write_footer_stream(&store, &wal, false, &stream).unwrap();

        assert_eq!(wal.records(), vec![(ForkId::Footer, 0)]);
    }

    #[test]
    fn footer_stream_roundtrips() {
        let mut footer = TableFooter::fresh(100);
        footer.append_stripe(StripeMetadata {
            file_offset: 0,
            skip_list_length: 10,
            data_length: 200,
            footer_length: 30,
        });
        footer.append_stripe(StripeMetadata {
            file_offset: 240,
            skip_list_length: 5,
            data_length: 50,
            footer_length: 12,
        });

        let stream = serialize_footer_stream(&footer).unwrap();
        let decoded = deserialize_footer_stream(&stream).unwrap().unwrap();

        assert_eq!(decoded.block_row_count, 100);
        assert_eq!(decoded.stripes, footer.stripes);
    }

    #[test]
    fn write_then_read_through_page_store() {
        let store = InMemoryPageStore::new();
        let wal = NoopWalSink;

        let mut footer = TableFooter::fresh(64);
        footer.append_stripe(StripeMetadata {
            file_offset: 0,
            skip_list_length: 4,
            data_length: 4000,
            footer_length: 20,
        });
        let stream = serialize_footer_stream(&footer).unwrap();
        write_footer_stream(&store, &wal, true, &stream).unwrap();

        let read_back = read_table_footer(&store).unwrap().unwrap();
        assert_eq!(read_back.stripes, footer.stripes);
    }

    #[test]
    fn third_write_reclaims_head_when_it_fits_before_current_range() {
        let store = InMemoryPageStore::new();
        let wal = NoopWalSink;

        // First write always starts at block 1 (the fork is empty), so the
        // reclaim path can only be exercised once the ping-pong has made
        // room for it: write a big footer, then a small one (which appends
        // after the big range since it doesn't yet fit before it), then a
        // small one again (which now fits before the big range and
        // reclaims block 1).
        let mut big = TableFooter::fresh(64);
        for i in 0..400 {
            big.append_stripe(StripeMetadata {
                file_offset: i,
                skip_list_length: 1,
                data_length: 1,
                footer_length: 1,
            });
        }
        let stream = serialize_footer_stream(&big).unwrap();
        write_footer_stream(&store, &wal, false, &stream).unwrap();
        let (first_start, first_count) = read_header(&store).unwrap().unwrap();
        assert_eq!(first_start, 1);
        assert!(first_count > 1);

        let small = TableFooter::fresh(64);
        let stream = serialize_footer_stream(&small).unwrap();
        write_footer_stream(&store, &wal, false, &stream).unwrap();
        let (second_start, _) = read_header(&store).unwrap().unwrap();
        assert_eq!(second_start, first_start + first_count);

        write_footer_stream(&store, &wal, false, &stream).unwrap();
        let (third_start, _) = read_header(&store).unwrap().unwrap();
        assert_eq!(third_start, 1);

        let read_back = read_table_footer(&store).unwrap().unwrap();
        assert!(read_back.stripes.is_empty());
    }

    #[test]
    fn unparseable_header_is_treated_as_absent() {
        let store = InMemoryPageStore::new();
        // Write garbage directly into block 0 as if a previous, incompatible
        // writer had used it.
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&4u32.to_le_bytes());
        page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4].copy_from_slice(&[0xFF; 4]);
        store.write_page(ForkId::Footer, 0, &page).unwrap();

        assert!(read_table_footer(&store).unwrap().is_none());

        let wal = NoopWalSink;
        let footer = TableFooter::fresh(8);
        let stream = serialize_footer_stream(&footer).unwrap();
        write_footer_stream(&store, &wal, false, &stream).unwrap();
        let (starting_block, _) = read_header(&store).unwrap().unwrap();
        assert_eq!(starting_block, 1);
    }
}
