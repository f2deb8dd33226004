//! Encoding a single typed value into a column's value buffer, and packing
//! presence flags into a bitmap (spec §4.2).

use smallvec::SmallVec;

use crate::error::{WriteError, WriteResult};
use crate::schema::{ColumnLength, ColumnSchema};

/// A single row's value for one column, already extracted from the host's
/// row representation. This is the target-language stand-in for the
/// source's generic machine-word datum (spec §9 "Typed value opacity").
#[derive(Clone, Debug)]
pub enum Datum<'a> {
    /// By-value, fits in a machine register.
    Inline(u64),
    /// By-reference, fixed width, small enough to avoid a heap allocation
    /// on the hot path.
    Fixed(SmallVec<[u8; 16]>),
    /// By-reference, variable width (short-header or cstring source data,
    /// already stripped of its own length header/terminator).
    Variable(&'a [u8]),
}

#[inline]
pub fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

/// Appends one value to `buf`, zero-padded to the column's alignment.
/// Mirrors `SerializeSingleDatum` in the source implementation. Returns
/// `WriteError::SchemaMismatch` rather than panicking when the datum variant
/// disagrees with the column's `(length, by_value)` (spec §7).
pub fn serialize_datum(buf: &mut Vec<u8>, datum: &Datum<'_>, schema: &ColumnSchema) -> WriteResult<()> {
    let align = schema.align.as_usize();

    match schema.length {
        ColumnLength::Fixed(len) => {
            let len = len as usize;
            let aligned = align_up(len, align);
            let start = buf.len();
            buf.resize(start + aligned, 0);

            if schema.by_value {
                let value = match datum {
                    Datum::Inline(v) => *v,
                    _ => {
                        return Err(WriteError::SchemaMismatch(
                            "fixed by-value column given a non-inline datum".to_string(),
                        ))
                    }
                };
                let bytes = value.to_le_bytes();
                buf[start..start + len].copy_from_slice(&bytes[..len]);
            } else {
                let bytes: &[u8] = match datum {
                    Datum::Fixed(v) => &v[..],
                    Datum::Variable(v) => v,
                    Datum::Inline(_) => {
                        return Err(WriteError::SchemaMismatch(
                            "fixed by-ref column given an inline datum".to_string(),
                        ))
                    }
                };
                buf[start..start + len].copy_from_slice(&bytes[..len]);
            }
        }
        ColumnLength::ShortHeader | ColumnLength::CString => {
            let bytes: &[u8] = match datum {
                Datum::Variable(v) => v,
                Datum::Fixed(v) => &v[..],
                Datum::Inline(_) => {
                    return Err(WriteError::SchemaMismatch(
                        "variable-length column given an inline datum".to_string(),
                    ))
                }
            };
            let aligned = align_up(bytes.len(), align);
            let start = buf.len();
            buf.resize(start + aligned, 0);
            buf[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }

    Ok(())
}

/// Packs `n` presence flags into `ceil(n/8)` bytes, LSB-first within a byte.
pub fn serialize_bool_array(exists: &[bool]) -> Vec<u8> {
    let byte_count = (exists.len() + 7) / 8;
    let mut packed = vec![0u8; byte_count];

    for (i, &present) in exists.iter().enumerate() {
        if present {
            packed[i / 8] |= 1 << (i % 8);
        }
    }

    packed
}

/// Unpacks a bitmap back into presence flags. Used only by tests here (the
/// read path is out of scope), but kept alongside the packer since P4
/// exercises both directions.
#[cfg(test)]
pub fn deserialize_bool_array(packed: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| packed[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}
