//! The fixed schema this engine stores: `{ id: u32, username: String, email:
//! String }`. A `Record` is always constructed through [`Record::new`],
//! which is the one place size limits are enforced, so a `Record` that
//! exists in memory is always valid to serialize.

use crate::error::{DbError, DbResult};
use crate::storage::page::{EMAIL_SIZE, RECORD_SIZE, USERNAME_SIZE};

/// `username` and `email` are private so [`Record::new`] stays the only way
/// to produce one: a `Record` that exists can always be serialized without
/// a bounds check at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: u32,
    username: String,
    email: String,
}

impl Record {
    pub fn new(id: u32, username: impl Into<String>, email: impl Into<String>) -> DbResult<Record> {
        let username = username.into();
        let email = email.into();
        if username.len() > USERNAME_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "username is {} bytes, limit is {USERNAME_SIZE}",
                username.len()
            )));
        }
        if email.len() > EMAIL_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "email is {} bytes, limit is {EMAIL_SIZE}",
                email.len()
            )));
        }
        Ok(Record { id, username, email })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Writes this record into a `RECORD_SIZE`-byte slot: id (4 bytes LE),
    /// then username and email each zero-padded to their fixed width.
    pub fn serialize_into(&self, slot: &mut [u8]) {
        debug_assert_eq!(slot.len(), RECORD_SIZE);
        slot.fill(0);
        slot[0..4].copy_from_slice(&self.id.to_le_bytes());
        let username_bytes = self.username.as_bytes();
        slot[4..4 + username_bytes.len()].copy_from_slice(username_bytes);
        let email_bytes = self.email.as_bytes();
        slot[4 + USERNAME_SIZE..4 + USERNAME_SIZE + email_bytes.len()].copy_from_slice(email_bytes);
    }

    /// Reads a record back out of a `RECORD_SIZE`-byte slot, trimming each
    /// string field at its first zero byte.
    pub fn deserialize_from(slot: &[u8]) -> DbResult<Record> {
        debug_assert_eq!(slot.len(), RECORD_SIZE);
        let id = u32::from_le_bytes(slot[0..4].try_into().unwrap());
        let username = trim_and_decode(&slot[4..4 + USERNAME_SIZE])?;
        let email = trim_and_decode(&slot[4 + USERNAME_SIZE..4 + USERNAME_SIZE + EMAIL_SIZE])?;
        Ok(Record { id, username, email })
    }
}

fn trim_and_decode(field: &[u8]) -> DbResult<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8(field[..end].to_vec())
        .map_err(|_| DbError::Corrupt("record field is not valid utf-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_slot() {
        let record = Record::new(42, "ada", "ada@example.com").unwrap();
        let mut slot = [0xffu8; RECORD_SIZE];
        record.serialize_into(&mut slot);
        let back = Record::deserialize_from(&slot).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn rejects_oversized_fields() {
        let long_username = "x".repeat(USERNAME_SIZE + 1);
        assert!(Record::new(1, long_username, "a@b.com").is_err());
        let long_email = "x".repeat(EMAIL_SIZE + 1);
        assert!(Record::new(1, "ada", long_email).is_err());
    }

    #[test]
    fn empty_fields_round_trip() {
        let record = Record::new(0, "", "").unwrap();
        let mut slot = [0u8; RECORD_SIZE];
        record.serialize_into(&mut slot);
        assert_eq!(Record::deserialize_from(&slot).unwrap(), record);
    }
}
