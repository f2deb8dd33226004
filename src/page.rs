//! The dual-fork paged writer (spec §4.1, §6).
//!
//! The host's buffer manager — page-granular read/write with an exclusive
//! lock per page and write-ahead logging — is an external collaborator
//! (spec §1). [`PageStore`] is the narrow interface this crate needs from
//! it, with an in-memory implementation for tests and a file-backed one for
//! real use, both guarding their storage with a `parking_lot::Mutex` the
//! way the teacher crate guards its backing storage.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::error::WriteResult;

/// Total page size, header included.
pub const PAGE_SIZE: usize = 8192;
/// Fixed per-page header size (payload length plus reserved bytes, in the
/// spirit of a database page header carrying a low-water-mark).
pub const PAGE_HEADER_SIZE: usize = 24;
/// Payload capacity per page (`D` in spec §4.1).
pub const PAGE_DATA_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Which fork a page belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForkId {
    /// Append-mostly data fork: stripes.
    Data,
    /// Overwrite-safe, ping-pong footer fork: block 0 is the header page.
    Footer,
}

/// Write-ahead log collaborator: emits a new-page record for a page
/// modification. Data-fork pages are gated by the session's `logging` flag;
/// the footer-header page is always logged (spec §4.1, §5, §9).
pub trait WalSink {
    fn log_new_page(&self, fork: ForkId, block_number: u32, payload: &[u8]);
}

/// Does nothing; the default for sessions that don't need crash recovery
/// hooked up (e.g. a table created and loaded in the same transaction).
pub struct NoopWalSink;

impl WalSink for NoopWalSink {
    fn log_new_page(&self, _fork: ForkId, _block_number: u32, _payload: &[u8]) {}
}

/// Records every `log_new_page` call it receives, for asserting the gating
/// behavior in tests: data-fork pages should only show up here when the
/// session's `logging` flag is set, while the footer-header page should
/// show up unconditionally.
#[derive(Default)]
pub struct RecordingWalSink {
    records: Mutex<Vec<(ForkId, u32)>>,
}

impl RecordingWalSink {
    pub fn new() -> Self {
        RecordingWalSink::default()
    }

    pub fn records(&self) -> Vec<(ForkId, u32)> {
        self.records.lock().clone()
    }
}

impl WalSink for RecordingWalSink {
    fn log_new_page(&self, fork: ForkId, block_number: u32, _payload: &[u8]) {
        self.records.lock().push((fork, block_number));
    }
}

/// Page-granular storage for both forks of one relation. Mirrors the
/// buffer manager's `ReadBufferExtended` / `MarkBufferDirty` contract
/// closely enough for the writer core to be exercised without a real host.
pub trait PageStore {
    /// Number of pages currently allocated in `fork`.
    fn page_count(&self, fork: ForkId) -> WriteResult<u32>;

    /// Reads page `block` of `fork`, or a zero-filled page if it doesn't
    /// exist yet (this is what "allocates a new page" means at this layer:
    /// the page becomes real once it is written).
    fn read_page(&self, fork: ForkId, block: u32) -> WriteResult<Vec<u8>>;

    /// Writes `page` (exactly `PAGE_SIZE` bytes) to `block` of `fork`,
    /// extending the fork if `block` is beyond its current page count.
    fn write_page(&self, fork: ForkId, block: u32, page: &[u8]) -> WriteResult<()>;
}

#[inline]
fn payload_len(page: &[u8]) -> usize {
    u32::from_le_bytes(page[0..4].try_into().unwrap()) as usize
}

#[inline]
fn set_payload_len(page: &mut [u8], len: u32) {
    page[0..4].copy_from_slice(&len.to_le_bytes());
}

fn new_zero_page() -> Vec<u8> {
    vec![0u8; PAGE_SIZE]
}

/// Which block a fresh [`DataForkAppender`] should resume at: the last
/// existing page if it still has room, or one past it otherwise. Used when
/// resuming an append session against a fork that already has pages (spec
/// §8 scenario "Resumed append").
pub fn resume_append_block(store: &dyn PageStore, fork: ForkId) -> WriteResult<u32> {
    let count = store.page_count(fork)?;
    if count == 0 {
        return Ok(0);
    }
    let last = count - 1;
    let page = store.read_page(fork, last)?;
    if payload_len(&page) >= PAGE_DATA_SIZE {
        Ok(count)
    } else {
        Ok(last)
    }
}

/// In-memory page store, used by tests and by [`crate::page::InMemoryPageStore::new`]
/// callers that don't need real persistence.
pub struct InMemoryPageStore {
    data: Mutex<Vec<Vec<u8>>>,
    footer: Mutex<Vec<Vec<u8>>>,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        InMemoryPageStore {
            data: Mutex::new(Vec::new()),
            footer: Mutex::new(Vec::new()),
        }
    }

    fn fork_storage(&self, fork: ForkId) -> &Mutex<Vec<Vec<u8>>> {
        match fork {
            ForkId::Data => &self.data,
            ForkId::Footer => &self.footer,
        }
    }
}

impl Default for InMemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for InMemoryPageStore {
    fn page_count(&self, fork: ForkId) -> WriteResult<u32> {
        Ok(self.fork_storage(fork).lock().len() as u32)
    }

    fn read_page(&self, fork: ForkId, block: u32) -> WriteResult<Vec<u8>> {
        let pages = self.fork_storage(fork).lock();
        match pages.get(block as usize) {
            Some(page) => Ok(page.clone()),
            None => Ok(new_zero_page()),
        }
    }

    fn write_page(&self, fork: ForkId, block: u32, page: &[u8]) -> WriteResult<()> {
        assert_eq!(page.len(), PAGE_SIZE);
        let mut pages = self.fork_storage(fork).lock();
        let block = block as usize;
        if block >= pages.len() {
            pages.resize_with(block + 1, new_zero_page);
        }
        pages[block].copy_from_slice(page);
        Ok(())
    }
}

/// File-backed page store. The data and footer forks are modeled as two
/// separate files rather than two forks of one relation file, since this
/// crate has no host filesystem layer of its own.
pub struct FilePageStore {
    data: Mutex<File>,
    footer: Mutex<File>,
}

impl FilePageStore {
    pub fn create(data_path: &Path, footer_path: &Path) -> WriteResult<Self> {
        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(data_path)?;
        let footer = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(footer_path)?;

        debug!(
            "opened data fork {} and footer fork {}",
            data_path.display(),
            footer_path.display()
        );

        Ok(FilePageStore {
            data: Mutex::new(data),
            footer: Mutex::new(footer),
        })
    }

    fn file(&self, fork: ForkId) -> &Mutex<File> {
        match fork {
            ForkId::Data => &self.data,
            ForkId::Footer => &self.footer,
        }
    }
}

impl PageStore for FilePageStore {
    fn page_count(&self, fork: ForkId) -> WriteResult<u32> {
        let mut file = self.file(fork).lock();
        let len = file.seek(SeekFrom::End(0))?;
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    fn read_page(&self, fork: ForkId, block: u32) -> WriteResult<Vec<u8>> {
        let mut file = self.file(fork).lock();
        let offset = block as u64 * PAGE_SIZE as u64;
        let len = file.seek(SeekFrom::End(0))?;

        let mut page = new_zero_page();
        if offset < len {
            file.seek(SeekFrom::Start(offset))?;
            let available = (len - offset).min(PAGE_SIZE as u64) as usize;
            file.read_exact(&mut page[..available])?;
        }
        Ok(page)
    }

    fn write_page(&self, fork: ForkId, block: u32, page: &[u8]) -> WriteResult<()> {
        assert_eq!(page.len(), PAGE_SIZE);
        let mut file = self.file(fork).lock();
        let offset = block as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(page)?;
        file.flush()?;
        Ok(())
    }
}

/// Appends bytes to the data fork, spanning as many pages as needed. One
/// call to `append_bytes` may touch many pages, but only one page is ever
/// held (read-modify-write) at a time (spec §4.1, §5 "Exactly-one page is
/// pinned at any moment").
pub struct DataForkAppender<'a> {
    store: &'a dyn PageStore,
    wal: &'a dyn WalSink,
    logging: bool,
    active_block: u32,
}

impl<'a> DataForkAppender<'a> {
    pub fn new(
        store: &'a dyn PageStore,
        wal: &'a dyn WalSink,
        logging: bool,
        active_block: u32,
    ) -> Self {
        DataForkAppender {
            store,
            wal,
            logging,
            active_block,
        }
    }

    pub fn active_block(&self) -> u32 {
        self.active_block
    }

    pub fn append_bytes(&mut self, data: &[u8]) -> WriteResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut offset = 0usize;

        while offset < data.len() {
            let mut page = self.store.read_page(ForkId::Data, self.active_block)?;
            let used = payload_len(&page);
            let remaining = PAGE_DATA_SIZE - used;

            let copy_len = remaining.min(data.len() - offset);
            let dest_start = PAGE_HEADER_SIZE + used;
            page[dest_start..dest_start + copy_len]
                .copy_from_slice(&data[offset..offset + copy_len]);
            set_payload_len(&mut page, (used + copy_len) as u32);

            self.store.write_page(ForkId::Data, self.active_block, &page)?;
            if self.logging {
                self.wal
                    .log_new_page(ForkId::Data, self.active_block, &page);
            }
            trace!(
                "appended {} bytes to data fork block {}",
                copy_len, self.active_block
            );

            offset += copy_len;

            if used + copy_len >= PAGE_DATA_SIZE {
                self.active_block += 1;
            }
        }

        Ok(())
    }
}
