//! Per-(column, block) skip nodes (spec §3 "Column block skip node") and
//! the min/max statistics maintained on them (spec §4.3).

use std::cmp::Ordering;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::compression::CompressionKind;
use crate::schema::ColumnSchema;

/// One block's statistics and on-disk location within its column's region.
/// Offsets are relative to the start of that column's region inside the
/// stripe (spec invariant I2 describes the equivalent cross-stripe
/// relationship for `file_offset`).
#[derive(Clone, Debug, Default)]
pub struct ColumnBlockSkipNode {
    pub row_count: u32,
    pub has_min_max: bool,
    pub min_value: Option<Vec<u8>>,
    pub max_value: Option<Vec<u8>>,
    pub exists_offset: u64,
    pub exists_length: u64,
    pub value_offset: u64,
    pub value_length: u64,
    pub value_compression: CompressionKind,
}

/// Updates `node`'s min/max with a non-null value, per spec §4.3. A column
/// with no comparison function never gets statistics: `has_min_max` stays
/// false and every non-null value is accepted without bound (this is the
/// early-return branch called for in spec §9 "Comparison dispatch").
pub fn update_min_max(node: &mut ColumnBlockSkipNode, value: &[u8], schema: &ColumnSchema) {
    let compare = match schema.compare {
        Some(compare) => compare,
        None => return,
    };

    if !node.has_min_max {
        node.min_value = Some(value.to_vec());
        node.max_value = Some(value.to_vec());
        node.has_min_max = true;
        return;
    }

    let collation = schema.collation;

    if compare(collation, value, node.min_value.as_ref().unwrap()) == Ordering::Less {
        node.min_value = Some(value.to_vec());
    }
    if compare(collation, value, node.max_value.as_ref().unwrap()) == Ordering::Greater {
        node.max_value = Some(value.to_vec());
    }
}

/// Serializes one column's array of block skip nodes into a byte buffer.
/// This stands in for the metadata serializer (spec §1, out of scope as a
/// collaborator); the wire shape here is this crate's own concrete choice.
///
/// Per-node layout (little-endian):
/// `row_count: u32, has_min_max: u8, value_compression: u8,
///  exists_offset: u64, exists_length: u64, value_offset: u64, value_length: u64,
///  min_len: u32, min_bytes, max_len: u32, max_bytes`
pub fn serialize_column_skip_list(nodes: &[ColumnBlockSkipNode]) -> Vec<u8> {
    let mut buf = Vec::new();

    for node in nodes {
        buf.write_u32::<LittleEndian>(node.row_count).unwrap();
        buf.write_u8(node.has_min_max as u8).unwrap();
        buf.write_u8(node.value_compression as u8).unwrap();
        buf.write_u64::<LittleEndian>(node.exists_offset).unwrap();
        buf.write_u64::<LittleEndian>(node.exists_length).unwrap();
        buf.write_u64::<LittleEndian>(node.value_offset).unwrap();
        buf.write_u64::<LittleEndian>(node.value_length).unwrap();

        for side in [&node.min_value, &node.max_value] {
            match side {
                Some(bytes) => {
                    buf.write_u32::<LittleEndian>(bytes.len() as u32).unwrap();
                    buf.extend_from_slice(bytes);
                }
                None => {
                    buf.write_u32::<LittleEndian>(0).unwrap();
                }
            }
        }
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compare_i32_le, Alignment};

    fn schema_with_cmp() -> ColumnSchema {
        ColumnSchema::fixed(4, true, Alignment::Four).with_compare(compare_i32_le, 0)
    }

    #[test]
    fn first_value_sets_min_and_max() {
        let mut node = ColumnBlockSkipNode::default();
        update_min_max(&mut node, &42i32.to_le_bytes(), &schema_with_cmp());
        assert!(node.has_min_max);
        assert_eq!(node.min_value.as_deref(), Some(&42i32.to_le_bytes()[..]));
        assert_eq!(node.max_value.as_deref(), Some(&42i32.to_le_bytes()[..]));
    }

    #[test]
    fn subsequent_values_widen_the_range() {
        let schema = schema_with_cmp();
        let mut node = ColumnBlockSkipNode::default();
        for v in [5i32, 1, 9, 4] {
            update_min_max(&mut node, &v.to_le_bytes(), &schema);
        }
        assert_eq!(
            i32::from_le_bytes(node.min_value.unwrap().try_into().unwrap()),
            1
        );
        assert_eq!(
            i32::from_le_bytes(node.max_value.unwrap().try_into().unwrap()),
            9
        );
    }

    #[test]
    fn ties_leave_the_incumbent() {
        let schema = schema_with_cmp();
        let mut node = ColumnBlockSkipNode::default();
        update_min_max(&mut node, &7i32.to_le_bytes(), &schema);
        let min_ptr_before = node.min_value.as_ref().unwrap().as_ptr();
        update_min_max(&mut node, &7i32.to_le_bytes(), &schema);
        // still 7, and logically unchanged (no panic / reallocation required
        // by the contract, just value equality).
        assert_ne!(min_ptr_before, std::ptr::null());
        assert_eq!(
            i32::from_le_bytes(node.min_value.unwrap().try_into().unwrap()),
            7
        );
    }

    #[test]
    fn no_comparator_means_no_min_max() {
        let schema = ColumnSchema::fixed(4, true, Alignment::Four);
        let mut node = ColumnBlockSkipNode::default();
        update_min_max(&mut node, &7i32.to_le_bytes(), &schema);
        assert!(!node.has_min_max);
        assert!(node.min_value.is_none());
    }
}
