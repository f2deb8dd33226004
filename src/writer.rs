//! The public writer API (spec §5 "Lifecycle", §6): `begin_write` /
//! `write_row` / `end_write` over one table.

use log::info;

use crate::compression::{Codec, CompressionKind, DeflateCodec, NoneCodec};
use crate::datum::Datum;
use crate::error::WriteResult;
use crate::footer::{read_table_footer, serialize_footer_stream, write_footer_stream, TableFooter};
use crate::flush::flush_stripe;
use crate::page::{resume_append_block, DataForkAppender, ForkId, PageStore, WalSink};
use crate::schema::ColumnSchema;
use crate::stripe::StripeState;

/// Tunables that used to be GUCs on the host (`cstore.stripe_row_count`,
/// `cstore.block_row_count`, `cstore.compression`): defaults match cstore's.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub stripe_max_row_count: u32,
    pub block_row_count: u32,
    pub compression: CompressionKind,
    /// Whether data-fork pages and footer content pages get WAL records.
    /// The footer header page is always logged regardless of this flag
    /// (spec §4.1, §9 "WAL gating").
    pub logging: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            stripe_max_row_count: 150_000,
            block_row_count: 10_000,
            compression: CompressionKind::None,
            logging: true,
        }
    }
}

fn codec_for(kind: CompressionKind) -> Box<dyn Codec> {
    match kind {
        CompressionKind::None => Box::new(NoneCodec),
        CompressionKind::Lz => Box::new(DeflateCodec::default()),
    }
}

/// Owns one table's write session. Not `Sync`: a session is meant to be
/// driven by a single writer at a time (spec §5), mirroring the host's
/// single-backend-per-relation-extend assumption.
pub struct TableWriteState<'a> {
    schemas: Vec<ColumnSchema>,
    store: &'a dyn PageStore,
    wal: &'a dyn WalSink,
    config: WriterConfig,
    codec: Box<dyn Codec>,
    footer: TableFooter,
    current_stripe: Option<StripeState>,
    active_block: u32,
    scratch: Vec<u8>,
}

impl<'a> TableWriteState<'a> {
    /// Opens a write session. If the footer fork already has a footer, its
    /// stripe list and `block_row_count` are adopted so appends continue
    /// the existing table rather than starting a parallel one (spec §8
    /// scenario "Resumed append").
    pub fn begin_write(
        schemas: Vec<ColumnSchema>,
        store: &'a dyn PageStore,
        wal: &'a dyn WalSink,
        config: WriterConfig,
    ) -> WriteResult<Self> {
        let footer = match read_table_footer(store)? {
            Some(existing) => existing,
            None => TableFooter::fresh(config.block_row_count),
        };
        let active_block = resume_append_block(store, ForkId::Data)?;
        let codec = codec_for(config.compression);

        info!(
            "beginning write session: {} existing stripes, resuming at data block {}",
            footer.stripes.len(),
            active_block
        );

        Ok(TableWriteState {
            schemas,
            store,
            wal,
            config,
            codec,
            footer,
            current_stripe: None,
            active_block,
            scratch: Vec::new(),
        })
    }

    /// Appends one row. `values` must have exactly one entry per column,
    /// `None` meaning null.
    pub fn write_row(&mut self, values: &[Option<Datum<'_>>]) -> WriteResult<()> {
        if self.current_stripe.is_none() {
            self.current_stripe = Some(StripeState::new(&self.schemas, self.config.block_row_count));
        }

        let stripe = self.current_stripe.as_mut().unwrap();
        stripe.write_row(&self.schemas, values, self.codec.as_ref(), &mut self.scratch)?;

        if stripe.row_count() >= self.config.stripe_max_row_count {
            self.flush_current_stripe()?;
        }

        Ok(())
    }

    /// Flushes the open stripe (if any rows were written to it) and
    /// publishes the updated footer. Idempotent when called with zero rows
    /// pending (spec property P5).
    pub fn end_write(&mut self) -> WriteResult<()> {
        self.flush_current_stripe()?;

        let stream = serialize_footer_stream(&self.footer)?;
        write_footer_stream(self.store, self.wal, self.config.logging, &stream)?;

        info!(
            "write session closed: {} stripes, footer occupies {} bytes",
            self.footer.stripes.len(),
            stream.len()
        );

        Ok(())
    }

    fn flush_current_stripe(&mut self) -> WriteResult<()> {
        let mut stripe = match self.current_stripe.take() {
            Some(stripe) => stripe,
            None => return Ok(()),
        };

        if stripe.row_count() == 0 {
            return Ok(());
        }

        let file_offset = self.footer.next_file_offset();
        let mut appender =
            DataForkAppender::new(self.store, self.wal, self.config.logging, self.active_block);

        let metadata = flush_stripe(
            &self.schemas,
            &mut stripe,
            self.codec.as_ref(),
            &mut appender,
            file_offset,
        )?;

        self.active_block = appender.active_block();
        self.footer.append_stripe(metadata);

        Ok(())
    }
}
