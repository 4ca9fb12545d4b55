use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use storagesync_core::{decode, encode, Digest256, PartEntry};

use crate::error::StorageError;
use crate::keys::{part_key, split_part_key, PartKey};

const PARTS_TABLE: TableDefinition<&PartKey, &[u8]> = TableDefinition::new("parts");

/// The cumulative size counter lives in its own table in the same
/// database file as the parts rows, rather than a sentinel `PartKey`
/// value that could theoretically collide with a real digest pair.
const SIZE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("size_counter");
const SIZE_COUNTER_KEY: &str = "F.size";

/// The parts index: `(head_digest, file_digest, part_digest) -> PartEntry`,
/// plus the cumulative `SizeCounter`.
pub struct PartsTable {
    db: Arc<Database>,
}

impl PartsTable {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PARTS_TABLE)?;
            let mut size_table = write_txn.open_table(SIZE_TABLE)?;
            if size_table.get(SIZE_COUNTER_KEY)?.is_none() {
                size_table.insert(SIZE_COUNTER_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;
        Ok(PartsTable { db: Arc::new(db) })
    }

    pub fn put(
        &self,
        head_digest: Digest256,
        file_digest: Digest256,
        part_digest: Digest256,
        entry: &PartEntry,
    ) -> Result<(), StorageError> {
        let key = part_key(head_digest, file_digest, part_digest);
        let bytes = encode(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PARTS_TABLE)?;
            table.insert(&key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Writes the completed part and bumps the size counter atomically in
    /// the same `redb` write transaction: overwrites the row with
    /// `(bytes, complete=true)` and adds `bytes.len()` to the running total.
    pub fn complete_part(
        &self,
        head_digest: Digest256,
        file_digest: Digest256,
        part_digest: Digest256,
        data: Vec<u8>,
    ) -> Result<u64, StorageError> {
        let key = part_key(head_digest, file_digest, part_digest);
        let added = data.len() as u64;
        let entry = PartEntry {
            data,
            complete: true,
        };
        let bytes = encode(&entry)?;
        let write_txn = self.db.begin_write()?;
        let new_total;
        {
            let mut table = write_txn.open_table(PARTS_TABLE)?;
            table.insert(&key, bytes.as_slice())?;
            let mut size_table = write_txn.open_table(SIZE_TABLE)?;
            let current = size_table.get(SIZE_COUNTER_KEY)?.map(|v| v.value()).unwrap_or(0);
            new_total = current + added;
            size_table.insert(SIZE_COUNTER_KEY, new_total)?;
        }
        write_txn.commit()?;
        Ok(new_total)
    }

    pub fn get(
        &self,
        head_digest: Digest256,
        file_digest: Digest256,
        part_digest: Digest256,
    ) -> Result<Option<PartEntry>, StorageError> {
        let key = part_key(head_digest, file_digest, part_digest);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PARTS_TABLE)?;
        match table.get(&key)? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn exists(
        &self,
        head_digest: Digest256,
        file_digest: Digest256,
        part_digest: Digest256,
    ) -> Result<bool, StorageError> {
        Ok(self.get(head_digest, file_digest, part_digest)?.is_some())
    }

    pub fn erase(
        &self,
        head_digest: Digest256,
        file_digest: Digest256,
        part_digest: Digest256,
    ) -> Result<(), StorageError> {
        let key = part_key(head_digest, file_digest, part_digest);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PARTS_TABLE)?;
            table.remove(&key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn size_counter(&self) -> Result<u64, StorageError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIZE_TABLE)?;
        Ok(table.get(SIZE_COUNTER_KEY)?.map(|v| v.value()).unwrap_or(0))
    }

    pub fn iterate_from_start(
        &self,
    ) -> Result<Vec<(Digest256, Digest256, Digest256, PartEntry)>, StorageError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PARTS_TABLE)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (k, v) = row?;
            let (head_digest, file_digest, part_digest) = split_part_key(k.value());
            let entry: PartEntry = decode(v.value())?;
            out.push((head_digest, file_digest, part_digest, entry));
        }
        Ok(out)
    }

    /// Every row belonging to `(head_digest, file_digest)`, for the
    /// descriptor-driven placeholder seeding and for an admin purge.
    pub fn parts_for_file(
        &self,
        head_digest: Digest256,
        file_digest: Digest256,
    ) -> Result<Vec<(Digest256, PartEntry)>, StorageError> {
        Ok(self
            .iterate_from_start()?
            .into_iter()
            .filter(|(h, f, _, _)| *h == head_digest && *f == file_digest)
            .map(|(_, _, part_digest, entry)| (part_digest, entry))
            .collect())
    }

    pub fn load_incomplete(
        &self,
        limit: usize,
    ) -> Result<Vec<(Digest256, Digest256, Digest256, PartEntry)>, StorageError> {
        Ok(self
            .iterate_from_start()?
            .into_iter()
            .filter(|(_, _, _, entry)| !entry.complete)
            .take(limit)
            .collect())
    }
}
