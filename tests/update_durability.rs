//! S3: an update survives close/reopen. Regression for forgetting to mark
//! the page dirty after an in-place overwrite.

mod common;

use aerodb::storage::btree::Table;
use aerodb::storage::record::Record;

#[test]
fn update_durability() {
    let path = common::temp_path();

    let mut table = Table::open(&path).unwrap();
    table.insert(Record::new(2, "bob", "b@x").unwrap()).unwrap();
    table.update(Record::new(2, "robert", "r@x").unwrap()).unwrap();
    table.close().unwrap();

    let mut table = Table::open(&path).unwrap();
    let found = table.find(2).unwrap().unwrap();
    assert_eq!(found.username(), "robert");
    assert_eq!(found.email(), "r@x");
}
