use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("duplicate key {0}")]
    DuplicateKey(u32),
    #[error("key {0} not found")]
    NotFound(u32),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupt database: {0}")]
    Corrupt(String),
    #[error("page {0} is out of bounds")]
    PageOutOfBounds(u32),
}

pub type DbResult<T> = Result<T, DbError>;
