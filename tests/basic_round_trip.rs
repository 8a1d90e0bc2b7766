//! S1: insert three records, close, reopen, scan in order.

mod common;

use aerodb::storage::btree::Table;
use aerodb::storage::record::Record;

#[test]
fn basic_round_trip() {
    let path = common::temp_path();

    let mut table = Table::open(&path).unwrap();
    table.insert(Record::new(1, "alice", "a@x").unwrap()).unwrap();
    table.insert(Record::new(2, "bob", "b@x").unwrap()).unwrap();
    table.insert(Record::new(3, "carol", "c@x").unwrap()).unwrap();
    table.close().unwrap();

    let mut table = Table::open(&path).unwrap();
    let rows: Vec<Record> = table.scan().unwrap().map(Result::unwrap).collect();
    assert_eq!(
        rows.iter().map(|r| (r.id, r.username(), r.email())).collect::<Vec<_>>(),
        vec![(1, "alice", "a@x"), (2, "bob", "b@x"), (3, "carol", "c@x")],
    );
    assert_eq!(table.stats().unwrap().height, 1);
}
