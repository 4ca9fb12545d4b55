use serde::{Deserialize, Serialize};
use storagesync_core::{Digest256, FileDescriptor};

/// The six wire message kinds of the replication protocol, keyed
/// throughout by `(head_digest, file_digest[, part_digest])`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Message {
    /// "Do you have this header?" — broadcast probe or inbound query.
    CheckHeader {
        head_digest: Digest256,
        file_digest: Digest256,
    },
    /// Reply to `CheckHeader`. `has_header = true` iff the descriptor is
    /// present and `complete = true` on the replying peer.
    HeaderStatus {
        head_digest: Digest256,
        file_digest: Digest256,
        has_header: bool,
    },
    /// "Send me the descriptor."
    GetHeader {
        head_digest: Digest256,
        file_digest: Digest256,
    },
    /// The descriptor itself, pushed in reply to `GetHeader`.
    Header {
        head_digest: Digest256,
        file_digest: Digest256,
        descriptor: FileDescriptor,
    },
    /// "Send me this part."
    GetPart {
        head_digest: Digest256,
        file_digest: Digest256,
        part_digest: Digest256,
        offset_begin: u32,
        offset_end: u32,
    },
    /// The part bytes, pushed in reply to `GetPart`.
    Part {
        head_digest: Digest256,
        file_digest: Digest256,
        part_digest: Digest256,
        offset_begin: u32,
        offset_end: u32,
        bytes: Vec<u8>,
    },
}

impl Message {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::CheckHeader { .. } => "CHECK-HEADER",
            Message::HeaderStatus { .. } => "HEADER-STATUS",
            Message::GetHeader { .. } => "GET-HEADER",
            Message::Header { .. } => "HEADER",
            Message::GetPart { .. } => "GET-PART",
            Message::Part { .. } => "PART",
        }
    }
}
