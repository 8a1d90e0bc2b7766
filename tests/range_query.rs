//! S6: a range query spanning several leaves returns exactly the bounded
//! subsequence in ascending order.

mod common;

use aerodb::storage::btree::Table;
use aerodb::storage::record::Record;

#[test]
fn range_query_across_leaves() {
    let path = common::temp_path();
    let mut table = Table::open(&path).unwrap();

    for id in 1..=30u32 {
        table.insert(Record::new(id, format!("u{id}"), "e@x").unwrap()).unwrap();
    }

    let ids: Vec<u32> = table.range(5, 20).unwrap().map(|r| r.unwrap().id).collect();
    assert_eq!(ids, (5..=20).collect::<Vec<_>>());
    assert_eq!(ids.len(), 16);
}
