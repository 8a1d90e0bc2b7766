//! Recursive invariant checker. Walks the tree once from the root, checking
//! at every node: parent pointers agree with the descent, cell/key counts
//! respect min/max occupancy (root exempt), keys are strictly ascending,
//! separators equal the max key of the child they bound, and every leaf is
//! at the same depth. Finishes with a freelist sanity pass.

use crate::storage::btree::max_key_of;
use crate::storage::page::{self, MAX_INTERNAL_KEYS, MAX_LEAF_CELLS, MIN_INTERNAL_KEYS, MIN_LEAF_CELLS};
use crate::storage::pager::Pager;

pub fn validate(pager: &mut Pager) -> Result<(), String> {
    let root = pager.root_page;
    let mut leaf_depth = None;
    validate_node(pager, root, 0, None, None, true, &mut leaf_depth)?;
    pager.validate_freelist()
}

fn page_of(pager: &mut Pager, page_num: u32) -> Result<&mut page::PageBuf, String> {
    pager
        .get_page(page_num)
        .map_err(|e| format!("reading page {page_num}: {e}"))
}

/// `lo`/`hi` bound the keys this subtree is allowed to contain (`None` =
/// unbounded on that side), inherited from the separators above it.
#[allow(clippy::too_many_arguments)]
fn validate_node(
    pager: &mut Pager,
    page_num: u32,
    depth: u32,
    lo: Option<u32>,
    hi: Option<u32>,
    is_root_position: bool,
    leaf_depth: &mut Option<u32>,
) -> Result<(), String> {
    let (kind, is_root_flag, parent) = {
        let buf = page_of(pager, page_num)?;
        (page::node_kind(buf), page::is_root(buf), page::parent(buf))
    };

    if is_root_position != is_root_flag {
        return Err(format!(
            "page {page_num} is_root flag is {is_root_flag}, expected {is_root_position}"
        ));
    }
    if !is_root_position && parent == 0 {
        return Err(format!("non-root page {page_num} has no parent"));
    }

    match kind {
        page::NodeKind::Leaf => {
            let count = {
                let buf = page_of(pager, page_num)?;
                page::leaf_cell_count(buf)
            };
            if !is_root_position && (count as usize) < MIN_LEAF_CELLS {
                return Err(format!(
                    "leaf {page_num} has {count} cells, below minimum {MIN_LEAF_CELLS}"
                ));
            }
            if (count as usize) > MAX_LEAF_CELLS {
                return Err(format!(
                    "leaf {page_num} has {count} cells, above maximum {MAX_LEAF_CELLS}"
                ));
            }
            let mut prev: Option<u32> = None;
            for i in 0..count {
                let key = {
                    let buf = page_of(pager, page_num)?;
                    page::leaf_cell_key(buf, i)
                };
                if let Some(p) = prev {
                    if key <= p {
                        return Err(format!(
                            "leaf {page_num} keys not strictly ascending at index {i}"
                        ));
                    }
                }
                if let Some(lo) = lo {
                    if key < lo {
                        return Err(format!("leaf {page_num} key {key} is below lower bound {lo}"));
                    }
                }
                if let Some(hi) = hi {
                    if key > hi {
                        return Err(format!("leaf {page_num} key {key} is above upper bound {hi}"));
                    }
                }
                prev = Some(key);
            }
            match leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if *expected != depth => {
                    return Err(format!(
                        "leaf {page_num} is at depth {depth}, expected {expected}"
                    ));
                }
                _ => {}
            }
            Ok(())
        }
        page::NodeKind::Internal => {
            let count = {
                let buf = page_of(pager, page_num)?;
                page::internal_key_count(buf)
            };
            if !is_root_position && (count as usize) < MIN_INTERNAL_KEYS {
                return Err(format!(
                    "internal node {page_num} has {count} keys, below minimum {MIN_INTERNAL_KEYS}"
                ));
            }
            if (count as usize) > MAX_INTERNAL_KEYS {
                return Err(format!(
                    "internal node {page_num} has {count} keys, above maximum {MAX_INTERNAL_KEYS}"
                ));
            }
            if is_root_position && count == 0 {
                return Err(format!("root {page_num} is internal but has no keys"));
            }

            let mut prev_key: Option<u32> = None;
            let mut prev_bound = lo;
            for i in 0..count {
                let (child, key) = {
                    let buf = page_of(pager, page_num)?;
                    (page::internal_entry_child(buf, i), page::internal_entry_key(buf, i))
                };
                if let Some(p) = prev_key {
                    if key <= p {
                        return Err(format!(
                            "internal node {page_num} separators not strictly ascending at index {i}"
                        ));
                    }
                }
                let child_parent = {
                    let buf = page_of(pager, child)?;
                    page::parent(buf)
                };
                if child_parent != page_num {
                    return Err(format!(
                        "child {child} of internal node {page_num} has parent {child_parent}"
                    ));
                }
                let child_max = max_key_of(pager, child).map_err(|e| e.to_string())?;
                if child_max != key {
                    return Err(format!(
                        "internal node {page_num} entry {i}: separator {key} does not match child {child}'s max key {child_max}"
                    ));
                }
                validate_node(pager, child, depth + 1, prev_bound, Some(key), false, leaf_depth)?;
                prev_key = Some(key);
                prev_bound = Some(key + 1);
            }

            let rightmost = {
                let buf = page_of(pager, page_num)?;
                page::internal_rightmost_child(buf)
            };
            if rightmost == 0 {
                return Err(format!("internal node {page_num} has no rightmost child"));
            }
            let rightmost_parent = {
                let buf = page_of(pager, rightmost)?;
                page::parent(buf)
            };
            if rightmost_parent != page_num {
                return Err(format!(
                    "rightmost child {rightmost} of internal node {page_num} has parent {rightmost_parent}"
                ));
            }
            validate_node(pager, rightmost, depth + 1, prev_bound, hi, false, leaf_depth)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::Table;
    use crate::storage::record::Record;
    use tempfile::NamedTempFile;

    fn temp_path() -> std::path::PathBuf {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        file.close().unwrap();
        path
    }

    #[test]
    fn empty_table_validates() {
        let path = temp_path();
        let mut table = Table::open(&path).unwrap();
        assert!(table.validate());
    }

    #[test]
    fn large_table_with_deletions_stays_valid() {
        let path = temp_path();
        let mut table = Table::open(&path).unwrap();
        for i in 0..500u32 {
            table
                .insert(Record::new(i, format!("u{i}"), "e@x.com").unwrap())
                .unwrap();
        }
        for i in (0..500u32).step_by(3) {
            table.delete(i).unwrap();
        }
        assert!(table.validate_verbose().is_ok());
    }
}
