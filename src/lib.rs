//! A writer for a columnar on-disk table format: rows are buffered into
//! fixed-size blocks, blocks accumulate into stripes, and stripes are
//! flushed to an append-only data fork with their locations recorded in a
//! footer fork that is rewritten atomically on every close.
//!
//! # Writing a table
//!
//! The entry point is [`writer::TableWriteState`]. Open a session with
//! [`writer::TableWriteState::begin_write`], append rows with
//! [`writer::TableWriteState::write_row`], and call
//! [`writer::TableWriteState::end_write`] to flush the last stripe and
//! publish the footer.
//!
//! Rows are supplied as [`datum::Datum`] values against a
//! [`schema::ColumnSchema`] per column; a `None` entry means the column is
//! null for that row.
//!
//! Storage itself — page-granular read/write and write-ahead logging — is
//! modeled as the [`page::PageStore`] and [`page::WalSink`] traits so the
//! writer core can be exercised without a real host. [`page::FilePageStore`]
//! backs both forks with plain files; [`page::InMemoryPageStore`] is for
//! tests.

#[macro_use]
extern crate log;

pub mod block;
pub mod compression;
pub mod datum;
pub mod error;
pub mod flush;
pub mod footer;
pub mod page;
pub mod schema;
pub mod skipnode;
pub mod stripe;
pub mod writer;

pub use crate::compression::{Codec, CompressionKind};
pub use crate::datum::Datum;
pub use crate::error::{WriteError, WriteResult};
pub use crate::page::{FilePageStore, InMemoryPageStore, PageStore, WalSink};
pub use crate::schema::{Alignment, ColumnLength, ColumnSchema};
pub use crate::writer::{TableWriteState, WriterConfig};
