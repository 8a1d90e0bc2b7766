//! S8: pages freed by a merge are handed back out by later allocations
//! instead of growing the file. Regression for a freelist never consulted
//! on allocation.

mod common;

use aerodb::storage::btree::Table;
use aerodb::storage::record::Record;

#[test]
fn freelist_reuse() {
    let path = common::temp_path();
    let mut table = Table::open(&path).unwrap();

    for id in 1..=50u32 {
        table.insert(Record::new(id, format!("u{id}"), "e@x").unwrap()).unwrap();
    }
    let max_pages = table.stats().unwrap().page_count;

    for id in (1..=40u32).step_by(2) {
        table.delete(id).unwrap();
    }
    assert!(table.validate());

    for id in 1000..1015u32 {
        table.insert(Record::new(id, format!("u{id}"), "e@x").unwrap()).unwrap();
    }

    let grown = table.stats().unwrap().page_count;
    assert!(
        grown <= max_pages + 1,
        "page count grew from {max_pages} to {grown}, freelist was not consulted"
    );
    assert!(table.validate());
}
