//! S5: deleting enough of the right leaf after a split forces a merge back
//! down to a single root leaf.

mod common;

use aerodb::storage::btree::Table;
use aerodb::storage::record::Record;

#[test]
fn merge_after_delete_collapses_root() {
    let path = common::temp_path();
    let mut table = Table::open(&path).unwrap();

    for id in 1..=15u32 {
        table.insert(Record::new(id, format!("u{id}"), "e@x").unwrap()).unwrap();
    }
    assert_eq!(table.stats().unwrap().height, 2);

    for id in [8u32, 9, 10, 11, 12] {
        table.delete(id).unwrap();
    }

    let stats = table.stats().unwrap();
    assert_eq!(stats.height, 1);
    assert_eq!(stats.leaf_count, 1);

    let ids: Vec<u32> = table.scan().unwrap().map(|r| r.unwrap().id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 13, 14, 15]);
    assert!(table.validate());
}
