use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use storagesync_core::{decode, encode, Digest256, HeaderEntry};

use crate::error::StorageError;
use crate::keys::{header_key, split_header_key, HeaderKey};

const HEADERS_TABLE: TableDefinition<&HeaderKey, &[u8]> = TableDefinition::new("headers");

/// The headers index: `(head_digest, file_digest) -> HeaderEntry`.
///
/// One `redb::Database` file, its own sibling path under the storage
/// root, following a one-database-per-concern layout.
pub struct HeadersTable {
    db: Arc<Database>,
}

impl HeadersTable {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(HEADERS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(HeadersTable { db: Arc::new(db) })
    }

    pub fn put(
        &self,
        head_digest: Digest256,
        file_digest: Digest256,
        entry: &HeaderEntry,
    ) -> Result<(), StorageError> {
        let key = header_key(head_digest, file_digest);
        let bytes = encode(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(HEADERS_TABLE)?;
            table.insert(&key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(
        &self,
        head_digest: Digest256,
        file_digest: Digest256,
    ) -> Result<Option<HeaderEntry>, StorageError> {
        let key = header_key(head_digest, file_digest);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HEADERS_TABLE)?;
        match table.get(&key)? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, head_digest: Digest256, file_digest: Digest256) -> Result<bool, StorageError> {
        Ok(self.get(head_digest, file_digest)?.is_some())
    }

    pub fn erase(&self, head_digest: Digest256, file_digest: Digest256) -> Result<(), StorageError> {
        let key = header_key(head_digest, file_digest);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(HEADERS_TABLE)?;
            table.remove(&key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Point-in-time snapshot of every row, in key order, from the start.
    pub fn iterate_from_start(&self) -> Result<Vec<(Digest256, Digest256, HeaderEntry)>, StorageError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HEADERS_TABLE)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (k, v) = row?;
            let (head_digest, file_digest) = split_header_key(k.value());
            let entry: HeaderEntry = decode(v.value())?;
            out.push((head_digest, file_digest, entry));
        }
        Ok(out)
    }

    /// Scans from the beginning and returns up to `limit` *incomplete*
    /// entries, the load-on-startup policy for populating the working set.
    pub fn load_incomplete(&self, limit: usize) -> Result<Vec<(Digest256, Digest256, HeaderEntry)>, StorageError> {
        Ok(self
            .iterate_from_start()?
            .into_iter()
            .filter(|(_, _, entry)| !entry.complete)
            .take(limit)
            .collect())
    }
}
