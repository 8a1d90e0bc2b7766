use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Path to a file that doesn't exist yet but lives in a scratch directory,
/// so `Table::open` can create it fresh.
pub fn temp_path() -> PathBuf {
    let file = NamedTempFile::new().expect("create temp file");
    let path = file.path().to_path_buf();
    file.close().expect("close temp file");
    path
}
