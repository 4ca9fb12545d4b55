//! Durable indexes for the storage-sync replication engine: three
//! `redb`-backed tables, one per sibling file under a configured storage
//! root.

pub mod descriptors;
pub mod error;
pub mod headers;
pub mod keys;
pub mod parts;

pub use descriptors::{DescriptorRecord, DescriptorsTable};
pub use error::StorageError;
pub use headers::HeadersTable;
pub use parts::PartsTable;

use std::path::Path;

/// The three durable indexes opened under a common storage root, each in
/// its own sibling directory/file — `<root>/headers.redb`,
/// `<root>/descriptors.redb`, `<root>/parts.redb`.
pub struct Tables {
    pub headers: HeadersTable,
    pub descriptors: DescriptorsTable,
    pub parts: PartsTable,
}

impl Tables {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Tables {
            headers: HeadersTable::open(root.join("headers.redb"))?,
            descriptors: DescriptorsTable::open(root.join("descriptors.redb"))?,
            parts: PartsTable::open(root.join("parts.redb"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opens_three_sibling_files() {
        let dir = tempdir().unwrap();
        let _tables = Tables::open(dir.path()).unwrap();
        assert!(dir.path().join("headers.redb").exists());
        assert!(dir.path().join("descriptors.redb").exists());
        assert!(dir.path().join("parts.redb").exists());
    }
}
