use serde::{Deserialize, Serialize};

use crate::codec::{encode, CodecError};
use crate::digest::{digest, Digest256};

/// Names a header by the pair of digests that key it, plus the declared
/// total size of the file it announces.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct HeadRef {
    pub head_digest: Digest256,
    pub file_digest: Digest256,
    pub size: u32,
}

/// A file reference as embedded in an ingested transaction. One file may
/// be announced by more than one header (different peers, different
/// framing revisions); each is tracked independently.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub parts: Vec<HeadRef>,
}

/// Persisted row of the headers table, keyed by `(head_digest, file_digest)`.
/// Never mutated after `complete` flips to `true`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub head_ref: HeadRef,
    pub complete: bool,
}

/// One contiguous, non-overlapping byte range of a file.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PartRef {
    pub part_digest: Digest256,
    pub offset_begin: u32,
    pub offset_end: u32,
}

/// Persisted row of the descriptors table, keyed by `file_digest`.
/// Immutable once written.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub file_digest: Digest256,
    pub part_count: u32,
    pub parts: Vec<PartRef>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DescriptorValidationError {
    #[error("part_count {declared} does not match parts.len() {actual}")]
    CountMismatch { declared: u32, actual: usize },
    #[error("parts must be ordered by offset_begin and tile [0, size) without gap or overlap")]
    NotContiguous,
    #[error("descriptor has no parts")]
    Empty,
    #[error("descriptor digest mismatch: claimed {claimed}, computed {computed}")]
    DigestMismatch {
        claimed: Digest256,
        computed: Digest256,
    },
}

impl FileDescriptor {
    /// Checks that parts are ordered, contiguous, start at 0, and their
    /// count matches `part_count`.
    pub fn validate_tiling(&self) -> Result<(), DescriptorValidationError> {
        if self.parts.len() != self.part_count as usize {
            return Err(DescriptorValidationError::CountMismatch {
                declared: self.part_count,
                actual: self.parts.len(),
            });
        }
        let mut iter = self.parts.iter();
        let first = iter.next().ok_or(DescriptorValidationError::Empty)?;
        if first.offset_begin != 0 {
            return Err(DescriptorValidationError::NotContiguous);
        }
        let mut prev_end = first.offset_end;
        for part in iter {
            if part.offset_begin != prev_end || part.offset_end <= part.offset_begin {
                return Err(DescriptorValidationError::NotContiguous);
            }
            prev_end = part.offset_end;
        }
        Ok(())
    }

    /// Verifies `digest(encode(self)) == head_digest` — the content-addressing
    /// contract a `HEADER` message must satisfy before it is accepted.
    pub fn verify_digest(&self, claimed: Digest256) -> Result<(), DescriptorValidationError> {
        let computed = descriptor_digest(self)?;
        if computed != claimed {
            return Err(DescriptorValidationError::DigestMismatch { claimed, computed });
        }
        Ok(())
    }
}

/// `digest(encode(descriptor))`, the identity every peer agrees on for a
/// given descriptor's `head_digest`.
pub fn descriptor_digest(d: &FileDescriptor) -> Result<Digest256, DescriptorValidationError> {
    let bytes = encode(d).map_err(|_| DescriptorValidationError::NotContiguous)?;
    Ok(digest(&bytes))
}

impl From<CodecError> for DescriptorValidationError {
    fn from(_: CodecError) -> Self {
        DescriptorValidationError::NotContiguous
    }
}

/// Persisted row of the parts table, keyed by
/// `((head_digest, file_digest), part_digest)`. `complete=false` rows are
/// placeholders seeded when a descriptor lands; their `data` is empty.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PartEntry {
    pub data: Vec<u8>,
    pub complete: bool,
}

impl PartEntry {
    pub fn placeholder() -> Self {
        PartEntry {
            data: Vec::new(),
            complete: false,
        }
    }
}

/// The external ingest boundary: a parsed transaction carries nothing
/// more than the file references it announces. Chain validation,
/// signatures, and transaction semantics are entirely out of scope here.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StorageTransaction {
    pub storage_refs: Vec<FileRef>,
}
