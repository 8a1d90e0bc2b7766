//! Positions a logical place in the leaf chain: a page, a cell index within
//! it, and whether the position is past the last cell of the whole table.
//! `search` descends from the root by binary search at every level;
//! `advance` follows `next_leaf` pointers to move forward without ever
//! re-entering an internal node.

use crate::error::DbResult;
use crate::storage::page::{self, NodeKind};
use crate::storage::pager::Pager;

#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub leaf_page: u32,
    pub cell_index: u32,
    pub at_end: bool,
}

/// Descends from `root` to the leaf that would hold `key`. Returns the
/// cursor and whether `key` is actually present there.
pub fn search(pager: &mut Pager, root: u32, key: u32) -> DbResult<(Cursor, bool)> {
    let mut page_num = root;
    loop {
        let buf = pager.get_page(page_num)?;
        match page::node_kind(buf) {
            NodeKind::Internal => {
                let count = page::internal_key_count(buf);
                let mut lo = 0u32;
                let mut hi = count;
                while lo < hi {
                    let mid = lo + (hi - lo) / 2;
                    if key <= page::internal_entry_key(buf, mid) {
                        hi = mid;
                    } else {
                        lo = mid + 1;
                    }
                }
                page_num = if lo < count {
                    page::internal_entry_child(buf, lo)
                } else {
                    page::internal_rightmost_child(buf)
                };
            }
            NodeKind::Leaf => {
                let count = page::leaf_cell_count(buf);
                let mut lo = 0u32;
                let mut hi = count;
                while lo < hi {
                    let mid = lo + (hi - lo) / 2;
                    if page::leaf_cell_key(buf, mid) < key {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                let found = lo < count && page::leaf_cell_key(buf, lo) == key;
                return Ok((
                    Cursor {
                        leaf_page: page_num,
                        cell_index: lo,
                        at_end: lo == count,
                    },
                    found,
                ));
            }
        }
    }
}

/// Positions a cursor at the first record of the whole table (the first
/// cell of the leftmost leaf), or `at_end` if the table is empty.
pub fn scan_start(pager: &mut Pager, root: u32) -> DbResult<Cursor> {
    let (mut cursor, _found) = search(pager, root, 0)?;
    let buf = pager.get_page(cursor.leaf_page)?;
    cursor.at_end = page::leaf_cell_count(buf) == 0;
    Ok(cursor)
}

/// Moves the cursor to the next record, crossing into the next leaf via its
/// `next_leaf` pointer when the current leaf is exhausted.
pub fn advance(pager: &mut Pager, cursor: &mut Cursor) -> DbResult<()> {
    cursor.cell_index += 1;
    let buf = pager.get_page(cursor.leaf_page)?;
    let count = page::leaf_cell_count(buf);
    if cursor.cell_index >= count {
        let next = page::leaf_next_leaf(buf);
        if next == 0 {
            cursor.at_end = true;
        } else {
            cursor.leaf_page = next;
            cursor.cell_index = 0;
        }
    }
    Ok(())
}

pub fn current_key(pager: &mut Pager, cursor: &Cursor) -> DbResult<u32> {
    let buf = pager.get_page(cursor.leaf_page)?;
    Ok(page::leaf_cell_key(buf, cursor.cell_index))
}
