//! S2: the 14th insert into a fresh file splits the root leaf in two.

mod common;

use aerodb::storage::btree::Table;
use aerodb::storage::record::Record;

#[test]
fn leaf_split_at_fourteen_inserts() {
    let path = common::temp_path();
    let mut table = Table::open(&path).unwrap();

    for id in 1..=14u32 {
        table.insert(Record::new(id, format!("u{id}"), "e@x").unwrap()).unwrap();
    }

    let stats = table.stats().unwrap();
    assert_eq!(stats.height, 2);
    assert_eq!(stats.leaf_count, 2);

    let ids: Vec<u32> = table.scan().unwrap().map(|r| r.unwrap().id).collect();
    assert_eq!(ids, (1..=14).collect::<Vec<_>>());
    assert!(table.validate());
}
