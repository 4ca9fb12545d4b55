use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use storagesync_core::{decode, encode, Digest256, FileDescriptor};

use crate::error::StorageError;
use crate::keys::{descriptor_key, DescriptorKey};

const DESCRIPTORS_TABLE: TableDefinition<&DescriptorKey, &[u8]> = TableDefinition::new("descriptors");

/// Wraps a `FileDescriptor` with an explicit `complete` flag. In practice
/// a descriptor only ever enters this table already verified (the
/// `HEADER` handler inserts it with `complete=true` atomically with the
/// verification), but the flag is kept explicit rather than assuming
/// every row is complete.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub descriptor: FileDescriptor,
    pub complete: bool,
}

/// The descriptors index: `file_digest -> (FileDescriptor, complete)`.
/// Immutable once written — rows are never updated, only inserted or
/// erased wholesale by an admin purge.
pub struct DescriptorsTable {
    db: Arc<Database>,
}

impl DescriptorsTable {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DESCRIPTORS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(DescriptorsTable { db: Arc::new(db) })
    }

    pub fn put(&self, file_digest: Digest256, record: &DescriptorRecord) -> Result<(), StorageError> {
        let key = descriptor_key(file_digest);
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DESCRIPTORS_TABLE)?;
            table.insert(&key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, file_digest: Digest256) -> Result<Option<DescriptorRecord>, StorageError> {
        let key = descriptor_key(file_digest);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DESCRIPTORS_TABLE)?;
        match table.get(&key)? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, file_digest: Digest256) -> Result<bool, StorageError> {
        Ok(self.get(file_digest)?.is_some())
    }

    pub fn erase(&self, file_digest: Digest256) -> Result<(), StorageError> {
        let key = descriptor_key(file_digest);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DESCRIPTORS_TABLE)?;
            table.remove(&key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn iterate_from_start(&self) -> Result<Vec<(Digest256, DescriptorRecord)>, StorageError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DESCRIPTORS_TABLE)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (k, v) = row?;
            let file_digest = Digest256::from_bytes(*k.value());
            let record: DescriptorRecord = decode(v.value())?;
            out.push((file_digest, record));
        }
        Ok(out)
    }
}
