//! The protocol handler: inbound semantics for the six message kinds.
//! Every function here is careful not to hold the working-set mutex
//! across a `network.send`/`broadcast` await.

use storagesync_core::{digest, Digest256, PartEntry};
use storagesync_net::{Message, PeerId};
use storagesync_storage::DescriptorRecord;
use tracing::{debug, info, warn};

use crate::engine::Engine;

pub(crate) async fn dispatch(engine: &Engine, from: PeerId, msg: Message) {
    match msg {
        Message::CheckHeader {
            head_digest,
            file_digest,
        } => on_check_header(engine, from, head_digest, file_digest).await,
        Message::HeaderStatus {
            head_digest,
            file_digest,
            has_header,
        } => on_header_status(engine, from, head_digest, file_digest, has_header).await,
        Message::GetHeader {
            head_digest,
            file_digest,
        } => on_get_header(engine, from, head_digest, file_digest).await,
        Message::Header {
            head_digest,
            file_digest,
            descriptor,
        } => on_header(engine, head_digest, file_digest, descriptor).await,
        Message::GetPart {
            head_digest,
            file_digest,
            part_digest,
            ..
        } => on_get_part(engine, from, head_digest, file_digest, part_digest).await,
        Message::Part {
            head_digest,
            file_digest,
            part_digest,
            bytes,
            ..
        } => on_part(engine, head_digest, file_digest, part_digest, bytes).await,
    }
}

async fn on_check_header(engine: &Engine, from: PeerId, head_digest: Digest256, file_digest: Digest256) {
    let has_header = match engine.tables.headers.exists(head_digest, file_digest) {
        Ok(present) => {
            present
                && engine
                    .tables
                    .descriptors
                    .get(file_digest)
                    .ok()
                    .flatten()
                    .map(|r| r.complete)
                    .unwrap_or(false)
        }
        Err(e) => {
            tracing::error!(error = %e, "headers table read failed");
            false
        }
    };
    engine
        .network
        .send(
            from,
            Message::HeaderStatus {
                head_digest,
                file_digest,
                has_header,
            },
        )
        .await;
}

async fn on_header_status(
    engine: &Engine,
    from: PeerId,
    head_digest: Digest256,
    file_digest: Digest256,
    has_header: bool,
) {
    if !has_header {
        return;
    }
    engine
        .network
        .send(
            from,
            Message::GetHeader {
                head_digest,
                file_digest,
            },
        )
        .await;
}

async fn on_get_header(engine: &Engine, from: PeerId, head_digest: Digest256, file_digest: Digest256) {
    let record = match engine.tables.descriptors.get(file_digest) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "descriptors table read failed");
            return;
        }
    };
    let Some(record) = record else { return };
    if !record.complete {
        return;
    }
    engine
        .network
        .send(
            from,
            Message::Header {
                head_digest,
                file_digest,
                descriptor: record.descriptor,
            },
        )
        .await;
}

async fn on_header(
    engine: &Engine,
    head_digest: Digest256,
    file_digest: Digest256,
    descriptor: storagesync_core::FileDescriptor,
) {
    if descriptor.verify_digest(head_digest).is_err() {
        warn!(head_digest = %head_digest, "HEADER digest mismatch, dropping");
        return;
    }
    if descriptor.validate_tiling().is_err() {
        warn!(head_digest = %head_digest, "HEADER descriptor fails tiling invariant, dropping");
        return;
    }

    // Unknown key: we only fetch a header we already track as incomplete.
    let existing = match engine.tables.headers.get(head_digest, file_digest) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "headers table read failed");
            return;
        }
    };
    let Some(mut header_entry) = existing else {
        debug!(head_digest = %head_digest, "HEADER for unknown header entry, dropping");
        return;
    };

    let descriptor_size = descriptor.parts.last().map(|p| p.offset_end).unwrap_or(0);
    if descriptor_size != header_entry.head_ref.size {
        warn!(
            head_digest = %head_digest,
            declared_size = header_entry.head_ref.size,
            descriptor_size,
            "HEADER descriptor size does not match advertised HeadRef size, dropping"
        );
        return;
    }

    if let Err(e) = engine
        .tables
        .descriptors
        .put(file_digest, &DescriptorRecord {
            descriptor: descriptor.clone(),
            complete: true,
        })
    {
        tracing::error!(error = %e, "failed to persist descriptor");
        return;
    }

    header_entry.complete = true;
    if let Err(e) = engine.tables.headers.put(head_digest, file_digest, &header_entry) {
        tracing::error!(error = %e, "failed to persist header completion");
        return;
    }

    let mut new_placeholders = Vec::new();
    for part in &descriptor.parts {
        let already = match engine
            .tables
            .parts
            .exists(head_digest, file_digest, part.part_digest)
        {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "parts table read failed");
                continue;
            }
        };
        if already {
            continue;
        }
        if let Err(e) = engine.tables.parts.put(
            head_digest,
            file_digest,
            part.part_digest,
            &PartEntry::placeholder(),
        ) {
            tracing::error!(error = %e, "failed to seed part placeholder");
            continue;
        }
        new_placeholders.push(part.part_digest);
    }

    {
        let mut ws = engine.working_set.lock().await;
        ws.headers.try_insert((head_digest, file_digest), header_entry);
        ws.descriptors.try_insert(
            file_digest,
            DescriptorRecord {
                descriptor: descriptor.clone(),
                complete: true,
            },
        );
        for part_digest in new_placeholders {
            ws.parts
                .try_insert((head_digest, file_digest, part_digest), PartEntry::placeholder());
        }
    }

    info!(
        head_digest = %head_digest,
        file_digest = %file_digest,
        part_count = descriptor.part_count,
        "header-received"
    );
}

async fn on_get_part(
    engine: &Engine,
    from: PeerId,
    head_digest: Digest256,
    file_digest: Digest256,
    part_digest: Digest256,
) {
    let entry = match engine.tables.parts.get(head_digest, file_digest, part_digest) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "parts table read failed");
            return;
        }
    };
    let Some(entry) = entry else { return };
    if !entry.complete {
        return;
    }
    let descriptor = engine
        .tables
        .descriptors
        .get(file_digest)
        .ok()
        .flatten()
        .map(|r| r.descriptor);
    let (offset_begin, offset_end) = descriptor
        .as_ref()
        .and_then(|d| d.parts.iter().find(|p| p.part_digest == part_digest))
        .map(|p| (p.offset_begin, p.offset_end))
        .unwrap_or((0, entry.data.len() as u32));

    engine
        .network
        .send(
            from,
            Message::Part {
                head_digest,
                file_digest,
                part_digest,
                offset_begin,
                offset_end,
                bytes: entry.data,
            },
        )
        .await;
}

async fn on_part(
    engine: &Engine,
    head_digest: Digest256,
    file_digest: Digest256,
    part_digest: Digest256,
    bytes: Vec<u8>,
) {
    let existing = match engine.tables.parts.get(head_digest, file_digest, part_digest) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "parts table read failed");
            return;
        }
    };
    let Some(existing) = existing else {
        debug!(part_digest = %part_digest, "PART for unknown placeholder, dropping");
        return;
    };
    if existing.complete {
        return;
    }

    // Part bytes must hash to the claimed digest before being accepted.
    if digest(&bytes) != part_digest {
        warn!(part_digest = %part_digest, "PART digest mismatch, dropping");
        return;
    }

    if let Some(record) = engine.tables.descriptors.get(file_digest).ok().flatten() {
        if let Some(part_ref) = record
            .descriptor
            .parts
            .iter()
            .find(|p| p.part_digest == part_digest)
        {
            let expected_len = (part_ref.offset_end - part_ref.offset_begin) as usize;
            if bytes.len() != expected_len {
                warn!(part_digest = %part_digest, "PART length mismatch, dropping");
                return;
            }
        }
    }

    let total = match engine
        .tables
        .parts
        .complete_part(head_digest, file_digest, part_digest, bytes)
    {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to persist completed part");
            return;
        }
    };

    let completed_entry = match engine.tables.parts.get(head_digest, file_digest, part_digest) {
        Ok(Some(e)) => e,
        _ => return,
    };

    {
        let mut ws = engine.working_set.lock().await;
        ws.parts
            .try_insert((head_digest, file_digest, part_digest), completed_entry);
        ws.pending_part_requests
            .remove(&(head_digest, file_digest, part_digest));
    }

    info!(
        part_digest = %part_digest,
        file_digest = %file_digest,
        size_counter = total,
        "part-received"
    );

    if file_is_complete(engine, head_digest, file_digest) {
        info!(file_digest = %file_digest, head_digest = %head_digest, "file-complete");
    }
}

fn file_is_complete(engine: &Engine, head_digest: Digest256, file_digest: Digest256) -> bool {
    let Ok(Some(record)) = engine.tables.descriptors.get(file_digest) else {
        return false;
    };
    let Ok(rows) = engine.tables.parts.parts_for_file(head_digest, file_digest) else {
        return false;
    };
    rows.len() == record.descriptor.part_count as usize && rows.iter().all(|(_, e)| e.complete)
}

