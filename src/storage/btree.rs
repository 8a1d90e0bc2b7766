//! Leaf and internal node mutation: insert-with-split, delete-with-merge,
//! borrow/merge rebalancing, and root grow/collapse. Everything below
//! `Table` is a free function over `&mut Pager` rather than a method, so
//! the validator in `storage::validate` can reuse the same primitives
//! (`max_key_of` in particular) without going through the public API.
//!
//! `Table` is the owning handle applications use: it wraps a `Pager` and
//! exposes `insert`/`find`/`update`/`delete`/`scan`/`range`/`validate`.

use std::path::Path;

use log::{debug, trace, warn};

use crate::error::{DbError, DbResult};
use crate::storage::cursor::{self, Cursor};
use crate::storage::page::{
    self, MAX_INTERNAL_KEYS, MAX_LEAF_CELLS, MIN_INTERNAL_KEYS, MIN_LEAF_CELLS, RECORD_SIZE,
};
use crate::storage::pager::Pager;
use crate::storage::record::Record;
use crate::storage::validate;

fn read_record_bytes(buf: &page::PageBuf, index: u32) -> [u8; RECORD_SIZE] {
    let mut out = [0u8; RECORD_SIZE];
    out.copy_from_slice(page::leaf_cell_record(buf, index));
    out
}

fn write_record_bytes(buf: &mut page::PageBuf, index: u32, record: &[u8; RECORD_SIZE]) {
    page::leaf_cell_record_mut(buf, index).copy_from_slice(record);
}

/// Maximum key stored under `page_num`'s subtree: the last cell of a leaf,
/// or the max of the rightmost child, recursively, for an internal node.
pub(crate) fn max_key_of(pager: &mut Pager, page_num: u32) -> DbResult<u32> {
    let kind = {
        let buf = pager.get_page(page_num)?;
        page::node_kind(buf)
    };
    match kind {
        page::NodeKind::Leaf => {
            let buf = pager.get_page(page_num)?;
            let count = page::leaf_cell_count(buf);
            if count == 0 {
                return Err(DbError::Corrupt(format!("leaf {page_num} is empty")));
            }
            Ok(page::leaf_cell_key(buf, count - 1))
        }
        page::NodeKind::Internal => {
            let rightmost = {
                let buf = pager.get_page(page_num)?;
                page::internal_rightmost_child(buf)
            };
            if rightmost == 0 {
                return Err(DbError::Corrupt(format!(
                    "internal node {page_num} has no rightmost child"
                )));
            }
            max_key_of(pager, rightmost)
        }
    }
}

fn child_index_in_parent(pager: &mut Pager, parent_page: u32, child_page: u32) -> DbResult<u32> {
    let buf = pager.get_page(parent_page)?;
    let count = page::internal_key_count(buf);
    for i in 0..count {
        if page::internal_entry_child(buf, i) == child_page {
            return Ok(i);
        }
    }
    if page::internal_rightmost_child(buf) == child_page {
        return Ok(count);
    }
    Err(DbError::Corrupt(format!(
        "page {child_page} is not a child of parent {parent_page}"
    )))
}

fn child_at(pager: &mut Pager, parent_page: u32, index: u32) -> DbResult<u32> {
    let buf = pager.get_page(parent_page)?;
    let count = page::internal_key_count(buf);
    if index == count {
        Ok(page::internal_rightmost_child(buf))
    } else {
        Ok(page::internal_entry_child(buf, index))
    }
}

fn set_child_parent(pager: &mut Pager, child_page: u32, parent_page: u32) -> DbResult<()> {
    let buf = pager.get_page(child_page)?;
    page::set_parent(buf, parent_page);
    pager.mark_dirty(child_page);
    Ok(())
}

fn set_is_root_flag(pager: &mut Pager, page_num: u32, value: bool) -> DbResult<()> {
    let buf = pager.get_page(page_num)?;
    page::set_is_root(buf, value);
    pager.mark_dirty(page_num);
    Ok(())
}

/// Updates the separator bounding `child_page` in `parent_page` to
/// `new_key`. A no-op if `child_page` is the rightmost child: its bound is
/// implicit and nothing needs to change.
fn update_separator_for_child(
    pager: &mut Pager,
    parent_page: u32,
    child_page: u32,
    new_key: u32,
) -> DbResult<()> {
    let buf = pager.get_page(parent_page)?;
    let count = page::internal_key_count(buf);
    for i in 0..count {
        if page::internal_entry_child(buf, i) == child_page {
            page::set_internal_entry(buf, i, child_page, new_key);
            pager.mark_dirty(parent_page);
            return Ok(());
        }
    }
    Ok(())
}

fn remove_entry_for_child(pager: &mut Pager, parent_page: u32, child_page: u32) -> DbResult<()> {
    let idx = child_index_in_parent(pager, parent_page, child_page)?;
    let buf = pager.get_page(parent_page)?;
    let count = page::internal_key_count(buf);
    if idx == count {
        let last_child = page::internal_entry_child(buf, count - 1);
        page::set_internal_rightmost_child(buf, last_child);
        page::set_internal_key_count(buf, count - 1);
    } else {
        page::shift_internal_entries_left(buf, idx, count);
        page::set_internal_key_count(buf, count - 1);
    }
    pager.mark_dirty(parent_page);
    Ok(())
}

// ---- leaf insert -----------------------------------------------------

fn insert_into_leaf(pager: &mut Pager, cursor: Cursor, key: u32, record: &Record) -> DbResult<()> {
    let count = {
        let buf = pager.get_page(cursor.leaf_page)?;
        page::leaf_cell_count(buf)
    };
    if (count as usize) < MAX_LEAF_CELLS {
        let buf = pager.get_page(cursor.leaf_page)?;
        page::shift_leaf_cells_right(buf, cursor.cell_index, count);
        page::set_leaf_cell_key(buf, cursor.cell_index, key);
        record.serialize_into(page::leaf_cell_record_mut(buf, cursor.cell_index));
        page::set_leaf_cell_count(buf, count + 1);
        pager.mark_dirty(cursor.leaf_page);
        trace!(
            "inserted key {key} into leaf {} at index {}",
            cursor.leaf_page, cursor.cell_index
        );
        Ok(())
    } else {
        split_and_insert_leaf(pager, cursor, key, record)
    }
}

fn split_and_insert_leaf(
    pager: &mut Pager,
    cursor: Cursor,
    key: u32,
    record: &Record,
) -> DbResult<()> {
    let old_page = cursor.leaf_page;

    let mut cells: Vec<(u32, [u8; RECORD_SIZE])> = {
        let buf = pager.get_page(old_page)?;
        (0..MAX_LEAF_CELLS as u32)
            .map(|i| (page::leaf_cell_key(buf, i), read_record_bytes(buf, i)))
            .collect()
    };
    let mut new_cell = [0u8; RECORD_SIZE];
    record.serialize_into(&mut new_cell);
    cells.insert(cursor.cell_index as usize, (key, new_cell));

    let (old_next_leaf, old_parent_page, was_root) = {
        let buf = pager.get_page(old_page)?;
        (page::leaf_next_leaf(buf), page::parent(buf), page::is_root(buf))
    };

    let split = (cells.len() + 1) / 2;
    let left = &cells[..split];
    let right = &cells[split..];

    let new_page = pager.get_unused_page_num()?;
    {
        let buf = pager.get_page(new_page)?;
        page::initialize_leaf(buf);
        page::set_parent(buf, old_parent_page);
        page::set_leaf_next_leaf(buf, old_next_leaf);
        for (i, (k, rec)) in right.iter().enumerate() {
            page::set_leaf_cell_key(buf, i as u32, *k);
            write_record_bytes(buf, i as u32, rec);
        }
        page::set_leaf_cell_count(buf, right.len() as u32);
        pager.mark_dirty(new_page);
    }
    {
        let buf = pager.get_page(old_page)?;
        for (i, (k, rec)) in left.iter().enumerate() {
            page::set_leaf_cell_key(buf, i as u32, *k);
            write_record_bytes(buf, i as u32, rec);
        }
        page::set_leaf_cell_count(buf, left.len() as u32);
        page::set_leaf_next_leaf(buf, new_page);
        pager.mark_dirty(old_page);
    }
    debug!("split leaf {old_page} into {old_page} (left) and {new_page} (right)");

    if was_root {
        grow_root(pager, old_page, new_page)
    } else {
        let new_left_max = left.last().unwrap().0;
        update_separator_for_child(pager, old_parent_page, old_page, new_left_max)?;
        internal_insert(pager, old_parent_page, new_page)
    }
}

// ---- internal insert ---------------------------------------------------

/// Computes the `(bounded entries, new rightmost child)` state `parent_page`
/// would have after `new_child_page` is logically inserted, without
/// actually writing anything back. Shared by the in-place insert path and
/// the split path.
fn post_insert_entries(
    pager: &mut Pager,
    parent_page: u32,
    new_child_page: u32,
) -> DbResult<(Vec<(u32, u32)>, u32)> {
    let new_child_max = max_key_of(pager, new_child_page)?;
    let mut entries: Vec<(u32, u32)> = {
        let buf = pager.get_page(parent_page)?;
        let count = page::internal_key_count(buf);
        (0..count)
            .map(|i| (page::internal_entry_child(buf, i), page::internal_entry_key(buf, i)))
            .collect()
    };
    let mut i = 0usize;
    while i < entries.len() && entries[i].1 < new_child_max {
        i += 1;
    }
    let rightmost = {
        let buf = pager.get_page(parent_page)?;
        page::internal_rightmost_child(buf)
    };
    let new_rightmost = if i == entries.len() {
        let old_rightmost_max = max_key_of(pager, rightmost)?;
        entries.push((rightmost, old_rightmost_max));
        new_child_page
    } else {
        entries.insert(i, (new_child_page, new_child_max));
        rightmost
    };
    Ok((entries, new_rightmost))
}

fn internal_insert(pager: &mut Pager, parent_page: u32, new_child_page: u32) -> DbResult<()> {
    let count = {
        let buf = pager.get_page(parent_page)?;
        page::internal_key_count(buf)
    };
    if (count as usize) < MAX_INTERNAL_KEYS {
        let (entries, new_rightmost) = post_insert_entries(pager, parent_page, new_child_page)?;
        {
            let buf = pager.get_page(parent_page)?;
            for (idx, (child, key)) in entries.iter().enumerate() {
                page::set_internal_entry(buf, idx as u32, *child, *key);
            }
            page::set_internal_key_count(buf, entries.len() as u32);
            page::set_internal_rightmost_child(buf, new_rightmost);
            pager.mark_dirty(parent_page);
        }
        set_child_parent(pager, new_child_page, parent_page)
    } else {
        internal_split_and_insert(pager, parent_page, new_child_page)
    }
}

fn internal_split_and_insert(
    pager: &mut Pager,
    parent_page: u32,
    new_child_page: u32,
) -> DbResult<()> {
    let (entries, new_rightmost) = post_insert_entries(pager, parent_page, new_child_page)?;
    let split = entries.len() / 2;
    let left_entries = &entries[..split];
    let left_rightmost = entries[split].0;
    let right_entries = &entries[split + 1..];
    let right_rightmost = new_rightmost;

    let (was_root, grandparent) = {
        let buf = pager.get_page(parent_page)?;
        (page::is_root(buf), page::parent(buf))
    };

    let new_internal_page = pager.get_unused_page_num()?;
    {
        let buf = pager.get_page(new_internal_page)?;
        page::initialize_internal(buf);
        for (idx, (child, key)) in right_entries.iter().enumerate() {
            page::set_internal_entry(buf, idx as u32, *child, *key);
        }
        page::set_internal_key_count(buf, right_entries.len() as u32);
        page::set_internal_rightmost_child(buf, right_rightmost);
        page::set_parent(buf, grandparent);
        pager.mark_dirty(new_internal_page);
    }
    for (child, _) in right_entries.iter() {
        set_child_parent(pager, *child, new_internal_page)?;
    }
    set_child_parent(pager, right_rightmost, new_internal_page)?;

    {
        let buf = pager.get_page(parent_page)?;
        for (idx, (child, key)) in left_entries.iter().enumerate() {
            page::set_internal_entry(buf, idx as u32, *child, *key);
        }
        page::set_internal_key_count(buf, left_entries.len() as u32);
        page::set_internal_rightmost_child(buf, left_rightmost);
        pager.mark_dirty(parent_page);
    }
    debug!(
        "split internal node {parent_page} into {parent_page} (left) and {new_internal_page} (right)"
    );

    if was_root {
        grow_root(pager, parent_page, new_internal_page)
    } else {
        let new_left_max = max_key_of(pager, parent_page)?;
        update_separator_for_child(pager, grandparent, parent_page, new_left_max)?;
        internal_insert(pager, grandparent, new_internal_page)
    }
}

fn grow_root(pager: &mut Pager, old_root_page: u32, new_sibling_page: u32) -> DbResult<()> {
    let old_root_max = max_key_of(pager, old_root_page)?;
    let new_root_page = pager.get_unused_page_num()?;
    {
        let buf = pager.get_page(new_root_page)?;
        page::initialize_internal(buf);
        page::set_is_root(buf, true);
        page::set_internal_entry(buf, 0, old_root_page, old_root_max);
        page::set_internal_rightmost_child(buf, new_sibling_page);
        page::set_internal_key_count(buf, 1);
        pager.mark_dirty(new_root_page);
    }
    set_is_root_flag(pager, old_root_page, false)?;
    set_is_root_flag(pager, new_sibling_page, false)?;
    set_child_parent(pager, old_root_page, new_root_page)?;
    set_child_parent(pager, new_sibling_page, new_root_page)?;
    pager.root_page = new_root_page;
    debug!("grew root: new root {new_root_page} over {old_root_page} and {new_sibling_page}");
    Ok(())
}

// ---- delete & underflow -------------------------------------------------

fn delete_from_leaf(pager: &mut Pager, cursor: &Cursor) -> DbResult<()> {
    let leaf_page = cursor.leaf_page;
    let (new_count, was_root) = {
        let buf = pager.get_page(leaf_page)?;
        let count = page::leaf_cell_count(buf);
        page::shift_leaf_cells_left(buf, cursor.cell_index, count);
        page::set_leaf_cell_count(buf, count - 1);
        (count - 1, page::is_root(buf))
    };
    pager.mark_dirty(leaf_page);
    if !was_root && (new_count as usize) < MIN_LEAF_CELLS {
        handle_leaf_underflow(pager, leaf_page)
    } else {
        Ok(())
    }
}

fn handle_leaf_underflow(pager: &mut Pager, leaf_page: u32) -> DbResult<()> {
    let parent_page = {
        let buf = pager.get_page(leaf_page)?;
        page::parent(buf)
    };
    let c = child_index_in_parent(pager, parent_page, leaf_page)?;
    let parent_count = {
        let buf = pager.get_page(parent_page)?;
        page::internal_key_count(buf)
    };

    if c < parent_count {
        let r = child_at(pager, parent_page, c + 1)?;
        let r_count = {
            let buf = pager.get_page(r)?;
            page::leaf_cell_count(buf)
        };
        if (r_count as usize) > MIN_LEAF_CELLS {
            debug!("borrowing from right leaf sibling {r} into {leaf_page}");
            return borrow_from_right_leaf(pager, leaf_page, r, parent_page);
        }
    }
    if c > 0 {
        let l = child_at(pager, parent_page, c - 1)?;
        let l_count = {
            let buf = pager.get_page(l)?;
            page::leaf_cell_count(buf)
        };
        if (l_count as usize) > MIN_LEAF_CELLS {
            debug!("borrowing from left leaf sibling {l} into {leaf_page}");
            return borrow_from_left_leaf(pager, leaf_page, l, parent_page);
        }
    }
    if c > 0 {
        let l = child_at(pager, parent_page, c - 1)?;
        debug!("merging leaf {leaf_page} into left sibling {l}");
        merge_leaves(pager, l, leaf_page, parent_page)?;
    } else if c < parent_count {
        let r = child_at(pager, parent_page, c + 1)?;
        debug!("merging right sibling {r} into leaf {leaf_page}");
        merge_leaves(pager, leaf_page, r, parent_page)?;
    } else {
        return Err(DbError::Corrupt(format!(
            "leaf {leaf_page} underflowed with no sibling"
        )));
    }
    after_merge_parent_fixup(pager, parent_page)
}

fn borrow_from_right_leaf(
    pager: &mut Pager,
    p_page: u32,
    r_page: u32,
    parent_page: u32,
) -> DbResult<()> {
    let (first_key, first_rec) = {
        let buf = pager.get_page(r_page)?;
        (page::leaf_cell_key(buf, 0), read_record_bytes(buf, 0))
    };
    {
        let buf = pager.get_page(p_page)?;
        let p_count = page::leaf_cell_count(buf);
        page::set_leaf_cell_key(buf, p_count, first_key);
        write_record_bytes(buf, p_count, &first_rec);
        page::set_leaf_cell_count(buf, p_count + 1);
        pager.mark_dirty(p_page);
    }
    {
        let buf = pager.get_page(r_page)?;
        let r_count = page::leaf_cell_count(buf);
        page::shift_leaf_cells_left(buf, 0, r_count);
        page::set_leaf_cell_count(buf, r_count - 1);
        pager.mark_dirty(r_page);
    }
    update_separator_for_child(pager, parent_page, p_page, first_key)
}

fn borrow_from_left_leaf(
    pager: &mut Pager,
    p_page: u32,
    l_page: u32,
    parent_page: u32,
) -> DbResult<()> {
    let (last_key, last_rec) = {
        let buf = pager.get_page(l_page)?;
        let l_count = page::leaf_cell_count(buf);
        (
            page::leaf_cell_key(buf, l_count - 1),
            read_record_bytes(buf, l_count - 1),
        )
    };
    {
        let buf = pager.get_page(p_page)?;
        let p_count = page::leaf_cell_count(buf);
        page::shift_leaf_cells_right(buf, 0, p_count);
        page::set_leaf_cell_key(buf, 0, last_key);
        write_record_bytes(buf, 0, &last_rec);
        page::set_leaf_cell_count(buf, p_count + 1);
        pager.mark_dirty(p_page);
    }
    let l_new_max = {
        let buf = pager.get_page(l_page)?;
        let l_count = page::leaf_cell_count(buf);
        page::set_leaf_cell_count(buf, l_count - 1);
        pager.mark_dirty(l_page);
        page::leaf_cell_key(buf, l_count - 2)
    };
    update_separator_for_child(pager, parent_page, l_page, l_new_max)
}

fn merge_leaves(pager: &mut Pager, left_page: u32, right_page: u32, parent_page: u32) -> DbResult<()> {
    let (right_count, right_next) = {
        let buf = pager.get_page(right_page)?;
        (page::leaf_cell_count(buf), page::leaf_next_leaf(buf))
    };
    let right_cells: Vec<(u32, [u8; RECORD_SIZE])> = {
        let buf = pager.get_page(right_page)?;
        (0..right_count)
            .map(|i| (page::leaf_cell_key(buf, i), read_record_bytes(buf, i)))
            .collect()
    };
    {
        let buf = pager.get_page(left_page)?;
        let left_count = page::leaf_cell_count(buf);
        for (offset, (k, rec)) in right_cells.iter().enumerate() {
            let idx = left_count + offset as u32;
            page::set_leaf_cell_key(buf, idx, *k);
            write_record_bytes(buf, idx, rec);
        }
        page::set_leaf_cell_count(buf, left_count + right_count);
        page::set_leaf_next_leaf(buf, right_next);
        pager.mark_dirty(left_page);
    }
    remove_entry_for_child(pager, parent_page, right_page)?;
    pager.free_page(right_page)
}

fn handle_internal_underflow(pager: &mut Pager, node_page: u32) -> DbResult<()> {
    let parent_page = {
        let buf = pager.get_page(node_page)?;
        page::parent(buf)
    };
    let c = child_index_in_parent(pager, parent_page, node_page)?;
    let parent_count = {
        let buf = pager.get_page(parent_page)?;
        page::internal_key_count(buf)
    };

    if c < parent_count {
        let r = child_at(pager, parent_page, c + 1)?;
        let r_count = {
            let buf = pager.get_page(r)?;
            page::internal_key_count(buf)
        };
        if (r_count as usize) > MIN_INTERNAL_KEYS {
            debug!("borrowing from right internal sibling {r} into {node_page}");
            return borrow_from_right_internal(pager, node_page, r, parent_page);
        }
    }
    if c > 0 {
        let l = child_at(pager, parent_page, c - 1)?;
        let l_count = {
            let buf = pager.get_page(l)?;
            page::internal_key_count(buf)
        };
        if (l_count as usize) > MIN_INTERNAL_KEYS {
            debug!("borrowing from left internal sibling {l} into {node_page}");
            return borrow_from_left_internal(pager, node_page, l, parent_page);
        }
    }
    if c > 0 {
        let l = child_at(pager, parent_page, c - 1)?;
        debug!("merging internal node {node_page} into left sibling {l}");
        merge_internals(pager, l, node_page, parent_page)?;
    } else if c < parent_count {
        let r = child_at(pager, parent_page, c + 1)?;
        debug!("merging right internal sibling {r} into {node_page}");
        merge_internals(pager, node_page, r, parent_page)?;
    } else {
        return Err(DbError::Corrupt(format!(
            "internal node {node_page} underflowed with no sibling"
        )));
    }
    after_merge_parent_fixup(pager, parent_page)
}

fn borrow_from_right_internal(
    pager: &mut Pager,
    p_page: u32,
    r_page: u32,
    parent_page: u32,
) -> DbResult<()> {
    let appended_key = max_key_of(pager, p_page)?;
    let old_p_rightmost = {
        let buf = pager.get_page(p_page)?;
        page::internal_rightmost_child(buf)
    };
    let moved_child = {
        let buf = pager.get_page(r_page)?;
        page::internal_entry_child(buf, 0)
    };

    {
        let buf = pager.get_page(p_page)?;
        let p_count = page::internal_key_count(buf);
        page::set_internal_entry(buf, p_count, old_p_rightmost, appended_key);
        page::set_internal_rightmost_child(buf, moved_child);
        page::set_internal_key_count(buf, p_count + 1);
        pager.mark_dirty(p_page);
    }
    set_child_parent(pager, moved_child, p_page)?;

    {
        let buf = pager.get_page(r_page)?;
        let r_count = page::internal_key_count(buf);
        page::shift_internal_entries_left(buf, 0, r_count);
        page::set_internal_key_count(buf, r_count - 1);
        pager.mark_dirty(r_page);
    }

    let new_p_max = max_key_of(pager, p_page)?;
    update_separator_for_child(pager, parent_page, p_page, new_p_max)
}

fn borrow_from_left_internal(
    pager: &mut Pager,
    p_page: u32,
    l_page: u32,
    parent_page: u32,
) -> DbResult<()> {
    let appended_key = max_key_of(pager, l_page)?;
    let moved_child = {
        let buf = pager.get_page(l_page)?;
        page::internal_rightmost_child(buf)
    };

    {
        let buf = pager.get_page(p_page)?;
        let p_count = page::internal_key_count(buf);
        page::shift_internal_entries_right(buf, 0, p_count);
        page::set_internal_entry(buf, 0, moved_child, appended_key);
        page::set_internal_key_count(buf, p_count + 1);
        pager.mark_dirty(p_page);
    }
    set_child_parent(pager, moved_child, p_page)?;

    {
        let buf = pager.get_page(l_page)?;
        let l_count = page::internal_key_count(buf);
        let new_rightmost = page::internal_entry_child(buf, l_count - 1);
        page::set_internal_rightmost_child(buf, new_rightmost);
        page::set_internal_key_count(buf, l_count - 1);
        pager.mark_dirty(l_page);
    }
    let new_l_max = max_key_of(pager, l_page)?;
    update_separator_for_child(pager, parent_page, l_page, new_l_max)
}

fn merge_internals(pager: &mut Pager, left_page: u32, right_page: u32, parent_page: u32) -> DbResult<()> {
    let old_l_max = max_key_of(pager, left_page)?;
    let l_rightmost = {
        let buf = pager.get_page(left_page)?;
        page::internal_rightmost_child(buf)
    };

    let (right_entries, right_rightmost): (Vec<(u32, u32)>, u32) = {
        let buf = pager.get_page(right_page)?;
        let count = page::internal_key_count(buf);
        let entries = (0..count)
            .map(|i| (page::internal_entry_child(buf, i), page::internal_entry_key(buf, i)))
            .collect();
        (entries, page::internal_rightmost_child(buf))
    };

    {
        let buf = pager.get_page(left_page)?;
        let mut idx = page::internal_key_count(buf);
        page::set_internal_entry(buf, idx, l_rightmost, old_l_max);
        idx += 1;
        for (child, key) in right_entries.iter() {
            page::set_internal_entry(buf, idx, *child, *key);
            idx += 1;
        }
        page::set_internal_rightmost_child(buf, right_rightmost);
        page::set_internal_key_count(buf, idx);
        pager.mark_dirty(left_page);
    }
    for (child, _) in right_entries.iter() {
        set_child_parent(pager, *child, left_page)?;
    }
    set_child_parent(pager, right_rightmost, left_page)?;

    remove_entry_for_child(pager, parent_page, right_page)?;
    pager.free_page(right_page)
}

fn after_merge_parent_fixup(pager: &mut Pager, parent_page: u32) -> DbResult<()> {
    let (count, was_root) = {
        let buf = pager.get_page(parent_page)?;
        (page::internal_key_count(buf), page::is_root(buf))
    };
    if was_root {
        if count == 0 {
            collapse_root(pager, parent_page)?;
        }
        Ok(())
    } else if (count as usize) < MIN_INTERNAL_KEYS {
        handle_internal_underflow(pager, parent_page)
    } else {
        Ok(())
    }
}

fn collapse_root(pager: &mut Pager, root_page: u32) -> DbResult<()> {
    let only_child = {
        let buf = pager.get_page(root_page)?;
        page::internal_rightmost_child(buf)
    };
    set_is_root_flag(pager, only_child, true)?;
    set_child_parent(pager, only_child, 0)?;
    pager.root_page = only_child;
    pager.free_page(root_page)?;
    debug!("collapsed root {root_page}, new root {only_child}");
    Ok(())
}

// ---- Table: the public handle -------------------------------------------

pub struct Table {
    pager: Pager,
    closed: bool,
}

impl Table {
    /// Opens (creating if necessary) the single-table file at `path`. A
    /// freshly created file gets page 0 initialized as an empty leaf root.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Table> {
        let mut pager = Pager::open(path)?;
        if pager.is_empty() {
            let buf = pager.get_page(0)?;
            page::initialize_leaf(buf);
            page::set_is_root(buf, true);
            pager.mark_dirty(0);
            pager.root_page = 0;
            pager.close()?;
        }
        debug!("opened table, root page {}", pager.root_page);
        Ok(Table { pager, closed: false })
    }

    /// Flushes dirty pages and persists the file header. Idempotent.
    pub fn close(&mut self) -> DbResult<()> {
        if self.closed {
            return Ok(());
        }
        self.pager.close()?;
        self.closed = true;
        Ok(())
    }

    fn locate(&mut self, key: u32) -> DbResult<(Cursor, bool)> {
        cursor::search(&mut self.pager, self.pager.root_page, key)
    }

    fn read_record_at(&mut self, cursor: &Cursor) -> DbResult<Record> {
        let buf = self.pager.get_page(cursor.leaf_page)?;
        Record::deserialize_from(page::leaf_cell_record(buf, cursor.cell_index))
    }

    pub fn insert(&mut self, record: Record) -> DbResult<()> {
        debug!("insert key {}", record.id);
        let (cursor, found) = self.locate(record.id)?;
        if found {
            return Err(DbError::DuplicateKey(record.id));
        }
        insert_into_leaf(&mut self.pager, cursor, record.id, &record)
    }

    pub fn find(&mut self, id: u32) -> DbResult<Option<Record>> {
        let (cursor, found) = self.locate(id)?;
        if !found {
            return Ok(None);
        }
        Ok(Some(self.read_record_at(&cursor)?))
    }

    pub fn update(&mut self, record: Record) -> DbResult<()> {
        debug!("update key {}", record.id);
        let (cursor, found) = self.locate(record.id)?;
        if !found {
            return Err(DbError::NotFound(record.id));
        }
        let buf = self.pager.get_page(cursor.leaf_page)?;
        record.serialize_into(page::leaf_cell_record_mut(buf, cursor.cell_index));
        self.pager.mark_dirty(cursor.leaf_page);
        Ok(())
    }

    pub fn delete(&mut self, id: u32) -> DbResult<()> {
        debug!("delete key {id}");
        let (cursor, found) = self.locate(id)?;
        if !found {
            return Err(DbError::NotFound(id));
        }
        delete_from_leaf(&mut self.pager, &cursor)
    }

    /// Iterates every record in ascending key order.
    pub fn scan(&mut self) -> DbResult<Scan<'_>> {
        let cursor = cursor::scan_start(&mut self.pager, self.pager.root_page)?;
        Ok(Scan { table: self, cursor })
    }

    /// Iterates records with `lo <= key <= hi`, stopping at the first key
    /// past `hi` without reading further leaves.
    pub fn range(&mut self, lo: u32, hi: u32) -> DbResult<Range<'_>> {
        if lo > hi {
            return Err(DbError::InvalidArgument(format!(
                "lo ({lo}) is greater than hi ({hi})"
            )));
        }
        let (cursor, _found) = cursor::search(&mut self.pager, self.pager.root_page, lo)?;
        Ok(Range { table: self, cursor, hi })
    }

    /// Recursive invariant check; returns the first violation found, if any.
    pub fn validate_verbose(&mut self) -> Result<(), String> {
        validate::validate(&mut self.pager)
    }

    pub fn validate(&mut self) -> bool {
        match self.validate_verbose() {
            Ok(()) => true,
            Err(reason) => {
                warn!("validate() failed: {reason}");
                false
            }
        }
    }

    /// Debug introspection: tree height (root leaf = 1) and number of leaf
    /// pages, read by walking the leftmost path and the `next_leaf` chain.
    pub fn stats(&mut self) -> DbResult<TreeStats> {
        let mut page_num = self.pager.root_page;
        let mut height = 1;
        loop {
            let buf = self.pager.get_page(page_num)?;
            match page::node_kind(buf) {
                page::NodeKind::Leaf => break,
                page::NodeKind::Internal => {
                    page_num = page::internal_entry_child(buf, 0);
                    height += 1;
                }
            }
        }
        let mut leaf_count = 0;
        let mut cursor = cursor::scan_start(&mut self.pager, self.pager.root_page)?;
        loop {
            leaf_count += 1;
            let buf = self.pager.get_page(cursor.leaf_page)?;
            let next = page::leaf_next_leaf(buf);
            if next == 0 {
                break;
            }
            cursor.leaf_page = next;
        }
        Ok(TreeStats {
            height,
            leaf_count,
            page_count: self.pager.num_pages(),
        })
    }
}

/// Returned by [`Table::stats`] for tests and operational debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub height: u32,
    pub leaf_count: u32,
    /// Highest page number allocated so far, plus one.
    pub page_count: u32,
}

impl Drop for Table {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub struct Scan<'a> {
    table: &'a mut Table,
    cursor: Cursor,
}

impl<'a> Iterator for Scan<'a> {
    type Item = DbResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.at_end {
            return None;
        }
        let record = match self.table.read_record_at(&self.cursor) {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = cursor::advance(&mut self.table.pager, &mut self.cursor) {
            return Some(Err(e));
        }
        Some(Ok(record))
    }
}

pub struct Range<'a> {
    table: &'a mut Table,
    cursor: Cursor,
    hi: u32,
}

impl<'a> Iterator for Range<'a> {
    type Item = DbResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.at_end {
            return None;
        }
        let key = match cursor::current_key(&mut self.table.pager, &self.cursor) {
            Ok(k) => k,
            Err(e) => return Some(Err(e)),
        };
        if key > self.hi {
            self.cursor.at_end = true;
            return None;
        }
        let record = match self.table.read_record_at(&self.cursor) {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = cursor::advance(&mut self.table.pager, &mut self.cursor) {
            return Some(Err(e));
        }
        Some(Ok(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> std::path::PathBuf {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        file.close().unwrap();
        path
    }

    #[test]
    fn insert_find_update_delete_round_trip() {
        let path = temp_path();
        let mut table = Table::open(&path).unwrap();
        table
            .insert(Record::new(1, "ada", "ada@example.com").unwrap())
            .unwrap();
        table
            .insert(Record::new(2, "grace", "grace@example.com").unwrap())
            .unwrap();
        assert_eq!(table.find(1).unwrap().unwrap().username(), "ada");
        assert!(
            table
                .insert(Record::new(1, "dup", "dup@example.com").unwrap())
                .is_err()
        );
        table
            .update(Record::new(1, "ada2", "ada2@example.com").unwrap())
            .unwrap();
        assert_eq!(table.find(1).unwrap().unwrap().username(), "ada2");
        table.delete(2).unwrap();
        assert!(table.find(2).unwrap().is_none());
        assert!(table.delete(2).is_err());
        assert!(table.validate());
    }

    #[test]
    fn inserting_past_leaf_capacity_splits_and_grows_root() {
        let path = temp_path();
        let mut table = Table::open(&path).unwrap();
        for i in 0..(MAX_LEAF_CELLS as u32 + 1) {
            table
                .insert(Record::new(i, format!("user{i}"), format!("user{i}@example.com")).unwrap())
                .unwrap();
        }
        assert!(table.validate());
        let scanned: Vec<u32> = table.scan().unwrap().map(|r| r.unwrap().id).collect();
        let expected: Vec<u32> = (0..(MAX_LEAF_CELLS as u32 + 1)).collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn deleting_down_to_one_leaf_collapses_root_back() {
        let path = temp_path();
        let mut table = Table::open(&path).unwrap();
        let n = MAX_LEAF_CELLS as u32 * 3;
        for i in 0..n {
            table
                .insert(Record::new(i, format!("u{i}"), format!("u{i}@x.com")).unwrap())
                .unwrap();
        }
        assert!(table.validate());
        for i in 0..n {
            table.delete(i).unwrap();
            assert!(table.validate(), "validate failed after deleting {i}");
        }
        assert_eq!(table.scan().unwrap().count(), 0);
    }

    #[test]
    fn range_query_is_inclusive_and_ordered() {
        let path = temp_path();
        let mut table = Table::open(&path).unwrap();
        for i in 0..50u32 {
            table
                .insert(Record::new(i, format!("u{i}"), "e@x.com").unwrap())
                .unwrap();
        }
        let got: Vec<u32> = table.range(10, 20).unwrap().map(|r| r.unwrap().id).collect();
        assert_eq!(got, (10..=20).collect::<Vec<_>>());
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        let path = temp_path();
        let mut table = Table::open(&path).unwrap();
        table.insert(Record::new(1, "a", "a@x.com").unwrap()).unwrap();
        assert!(table.range(5, 1).is_err());
    }

    #[test]
    fn persists_across_reopen() {
        let path = temp_path();
        {
            let mut table = Table::open(&path).unwrap();
            for i in 0..(MAX_LEAF_CELLS as u32 * 2) {
                table
                    .insert(Record::new(i, format!("u{i}"), "e@x.com").unwrap())
                    .unwrap();
            }
        }
        {
            let mut table = Table::open(&path).unwrap();
            assert!(table.validate());
            assert_eq!(table.find(5).unwrap().unwrap().username(), "u5");
            assert_eq!(table.scan().unwrap().count(), MAX_LEAF_CELLS * 2);
        }
    }
}
