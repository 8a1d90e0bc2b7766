//! S7: fifty sequential inserts, several splits deep, survive close/reopen.
//! Regression for forgetting to mark newly created pages dirty during a
//! split.

mod common;

use aerodb::storage::btree::Table;
use aerodb::storage::record::Record;

#[test]
fn persistence_after_rebalancing() {
    let path = common::temp_path();

    let mut table = Table::open(&path).unwrap();
    for id in 1..=50u32 {
        table.insert(Record::new(id, format!("u{id}"), "e@x").unwrap()).unwrap();
    }
    table.close().unwrap();

    let mut table = Table::open(&path).unwrap();
    let ids: Vec<u32> = table.scan().unwrap().map(|r| r.unwrap().id).collect();
    assert_eq!(ids, (1..=50).collect::<Vec<_>>());
    assert!(table.stats().unwrap().height >= 2);
    assert!(table.validate());
}
