//! Column schema and the type-system adapter interface.
//!
//! The real type-system adapter (length, by-value, alignment and comparison
//! metadata per column) lives in the host; this module models it as plain
//! data attached to each [`ColumnSchema`] so the writer core can be built
//! and tested without a host database.

use std::cmp::Ordering;

/// How a column's serialized length is determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnLength {
    /// Fixed-width, `L` bytes per value (`L >= 1`).
    Fixed(u16),
    /// Variable-width with an embedded length header (`L == -1` in spec.md).
    ShortHeader,
    /// Variable-width, NUL-terminated (`L == -2` in spec.md).
    CString,
}

/// Alignment of a column's serialized values, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Alignment {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
}

impl Alignment {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u8 as usize
    }
}

/// A comparison function over two serialized values of the same column,
/// given an opaque collation identifier. Mirrors the host's B-tree ordering
/// procedure; columns without one cannot have min/max statistics.
pub type CompareFn = fn(collation: u32, a: &[u8], b: &[u8]) -> Ordering;

/// Schema for a single column, as supplied by the type-system adapter.
#[derive(Clone, Copy, Debug)]
pub struct ColumnSchema {
    pub length: ColumnLength,
    pub by_value: bool,
    pub align: Alignment,
    pub collation: u32,
    pub compare: Option<CompareFn>,
    /// Dropped columns are present but inert: rows still carry a slot for
    /// them, but the writer never reads or writes their data.
    pub dropped: bool,
}

impl ColumnSchema {
    pub fn fixed(length: u16, by_value: bool, align: Alignment) -> Self {
        ColumnSchema {
            length: ColumnLength::Fixed(length),
            by_value,
            align,
            collation: 0,
            compare: None,
            dropped: false,
        }
    }

    pub fn variable(align: Alignment) -> Self {
        ColumnSchema {
            length: ColumnLength::ShortHeader,
            by_value: false,
            align,
            collation: 0,
            compare: None,
            dropped: false,
        }
    }

    pub fn with_compare(mut self, compare: CompareFn, collation: u32) -> Self {
        self.compare = Some(compare);
        self.collation = collation;
        self
    }

    pub fn dropped(align: Alignment) -> Self {
        ColumnSchema {
            length: ColumnLength::Fixed(1),
            by_value: true,
            align,
            collation: 0,
            compare: None,
            dropped: true,
        }
    }
}

/// Byte-wise comparison, the common case for text-like collations where
/// the collation identifier selects a locale but the encoded bytes are
/// already collation-ordered.
pub fn compare_bytes(_collation: u32, a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Comparison for little-endian fixed-width integers stored by-value.
pub fn compare_i32_le(_collation: u32, a: &[u8], b: &[u8]) -> Ordering {
    let a = i32::from_le_bytes(a[0..4].try_into().unwrap());
    let b = i32::from_le_bytes(b[0..4].try_into().unwrap());
    a.cmp(&b)
}
