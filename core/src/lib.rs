//! Digest, codec, and data-model primitives shared by the storage-sync
//! subsystem's persistence, networking, and engine crates.

pub mod codec;
pub mod digest;
pub mod model;

pub use codec::{decode, encode, CodecError};
pub use digest::{digest, Digest256, DigestParseError};
pub use model::{
    FileDescriptor, FileRef, HeadRef, HeaderEntry, PartEntry, PartRef, StorageTransaction,
};
