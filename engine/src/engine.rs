use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use storagesync_core::{Digest256, HeaderEntry, StorageTransaction};
use storagesync_net::{Message, PeerId, PeerNetwork};
use storagesync_storage::Tables;

use crate::error::EngineError;
use crate::working_set::WorkingSet;

/// The single value this subsystem's state lives on — owns the three
/// table handles and the bounded in-memory caches, and is passed
/// explicitly to the ingest entry point and to every network callback
/// rather than living behind process-wide globals.
pub struct Engine {
    pub(crate) tables: Tables,
    pub(crate) working_set: Mutex<WorkingSet>,
    pub(crate) network: Arc<dyn PeerNetwork>,
}

impl Engine {
    /// Opens the three tables under `storage_root`, then loads up to 500
    /// incomplete entries from each into the working set.
    pub fn open<P: AsRef<Path>>(
        storage_root: P,
        network: Arc<dyn PeerNetwork>,
    ) -> Result<Self, EngineError> {
        let tables = Tables::open(storage_root)?;
        let mut working_set = WorkingSet::new();

        for (head_digest, file_digest, entry) in tables.headers.load_incomplete(crate::working_set::WORKING_SET_CAP)? {
            working_set.headers.try_insert((head_digest, file_digest), entry);
        }
        for (file_digest, record) in tables.descriptors.iterate_from_start()? {
            if working_set.descriptors.len() >= crate::working_set::WORKING_SET_CAP {
                break;
            }
            working_set.descriptors.try_insert(file_digest, record);
        }
        for (head_digest, file_digest, part_digest, entry) in
            tables.parts.load_incomplete(crate::working_set::WORKING_SET_CAP)?
        {
            working_set
                .parts
                .try_insert((head_digest, file_digest, part_digest), entry);
        }

        Ok(Engine {
            tables,
            working_set: Mutex::new(working_set),
            network,
        })
    }

    /// The external transaction-ingest boundary.
    /// Idempotent: a `HeadRef` already present in the Headers table is
    /// left untouched regardless of its completion state.
    ///
    /// A transient storage error on one `HeadRef` is logged and the next
    /// `HeadRef` in the transaction is still processed — handlers never
    /// throw outward; the only failures this subsystem surfaces are
    /// fatal KV errors at startup, from `Engine::open`.
    pub async fn ingest(&self, tx: StorageTransaction) -> Result<(), EngineError> {
        for file_ref in tx.storage_refs {
            for head_ref in file_ref.parts {
                let key = (head_ref.head_digest, head_ref.file_digest);
                let already_present = match self.tables.headers.exists(head_ref.head_digest, head_ref.file_digest) {
                    Ok(present) => present,
                    Err(e) => {
                        tracing::error!(error = %e, head_digest = %head_ref.head_digest, "headers table read failed during ingest");
                        continue;
                    }
                };
                if already_present {
                    continue;
                }
                let entry = HeaderEntry {
                    head_ref,
                    complete: false,
                };
                if let Err(e) = self
                    .tables
                    .headers
                    .put(head_ref.head_digest, head_ref.file_digest, &entry)
                {
                    tracing::error!(error = %e, head_digest = %head_ref.head_digest, "failed to persist ingested header");
                    continue;
                }
                {
                    let mut ws = self.working_set.lock().await;
                    ws.headers.try_insert(key, entry);
                }
                info!(
                    head_digest = %head_ref.head_digest,
                    file_digest = %head_ref.file_digest,
                    name = %file_ref.name,
                    size = head_ref.size,
                    "header-ingested"
                );
            }
        }
        Ok(())
    }

    /// Dispatches one inbound wire message to the protocol handler.
    pub async fn handle_inbound(&self, from: PeerId, msg: Message) {
        crate::handler::dispatch(self, from, msg).await;
    }

    /// Admin-triggered purge by `file_digest`, since there is otherwise no
    /// deletion path for replicated data. Removes the descriptor row,
    /// every part row under every header that
    /// announces this file, and those header rows themselves, from both
    /// disk and the in-memory caches. `SizeCounter` is not rewound.
    pub async fn purge_file(&self, file_digest: Digest256) -> Result<(), EngineError> {
        let heads: Vec<Digest256> = self
            .tables
            .headers
            .iterate_from_start()?
            .into_iter()
            .filter(|(_, f, _)| *f == file_digest)
            .map(|(h, _, _)| h)
            .collect();

        let mut ws = self.working_set.lock().await;
        for head_digest in &heads {
            for (part_digest, _) in self.tables.parts.parts_for_file(*head_digest, file_digest)? {
                self.tables.parts.erase(*head_digest, file_digest, part_digest)?;
                ws.parts.remove(&(*head_digest, file_digest, part_digest));
                ws.pending_part_requests
                    .remove(&(*head_digest, file_digest, part_digest));
            }
            self.tables.headers.erase(*head_digest, file_digest)?;
            ws.headers.remove(&(*head_digest, file_digest));
            ws.pending_header_probes.remove(&(*head_digest, file_digest));
        }
        self.tables.descriptors.erase(file_digest)?;
        ws.descriptors.remove(&file_digest);
        drop(ws);

        info!(file_digest = %file_digest, headers_purged = heads.len(), "file purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use storagesync_core::{digest, FileDescriptor, FileRef, HeadRef, PartRef};
    use storagesync_net::peer::test_support::RecordingNetwork;
    use storagesync_net::PeerId;
    use tempfile::tempdir;

    use super::*;

    fn peer() -> PeerId {
        PeerId::random()
    }

    fn single_part_file() -> (Digest256, Digest256, Digest256, FileDescriptor, Vec<u8>) {
        let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let file_digest = digest(b"file-1");
        let part_digest = digest(&bytes);
        let descriptor = FileDescriptor {
            file_digest,
            part_count: 1,
            parts: vec![PartRef {
                part_digest,
                offset_begin: 0,
                offset_end: 4,
            }],
        };
        let encoded = storagesync_core::encode(&descriptor).unwrap();
        let head_digest = digest(&encoded);
        (head_digest, file_digest, part_digest, descriptor, bytes)
    }

    #[tokio::test]
    async fn s1_single_part_file_fetch_cycle() {
        let dir = tempdir().unwrap();
        let network = Arc::new(RecordingNetwork::with_peers(vec![peer()]));
        let engine = Engine::open(dir.path(), network.clone()).unwrap();

        let (head_digest, file_digest, part_digest, descriptor, bytes) = single_part_file();

        engine
            .ingest(StorageTransaction {
                storage_refs: vec![FileRef {
                    name: "video.bin".to_string(),
                    parts: vec![HeadRef {
                        head_digest,
                        file_digest,
                        size: 4,
                    }],
                }],
            })
            .await
            .unwrap();

        let from = peer();
        engine
            .handle_inbound(
                from,
                storagesync_net::Message::HeaderStatus {
                    head_digest,
                    file_digest,
                    has_header: true,
                },
            )
            .await;
        assert_eq!(
            network.sent_to(&from),
            vec![storagesync_net::Message::GetHeader {
                head_digest,
                file_digest,
            }]
        );

        engine
            .handle_inbound(
                from,
                storagesync_net::Message::Header {
                    head_digest,
                    file_digest,
                    descriptor: descriptor.clone(),
                },
            )
            .await;

        let header = engine.tables.headers.get(head_digest, file_digest).unwrap().unwrap();
        assert!(header.complete);

        engine
            .handle_inbound(
                from,
                storagesync_net::Message::Part {
                    head_digest,
                    file_digest,
                    part_digest,
                    offset_begin: 0,
                    offset_end: 4,
                    bytes: bytes.clone(),
                },
            )
            .await;

        let part = engine
            .tables
            .parts
            .get(head_digest, file_digest, part_digest)
            .unwrap()
            .unwrap();
        assert!(part.complete);
        assert_eq!(part.data, bytes);
        assert_eq!(engine.tables.parts.size_counter().unwrap(), 4);
    }

    #[tokio::test]
    async fn s2_duplicate_header_leaves_one_placeholder() {
        let dir = tempdir().unwrap();
        let network = Arc::new(RecordingNetwork::with_peers(vec![]));
        let engine = Engine::open(dir.path(), network).unwrap();
        let (head_digest, file_digest, _part_digest, descriptor, _bytes) = single_part_file();

        engine
            .ingest(StorageTransaction {
                storage_refs: vec![FileRef {
                    name: "f".into(),
                    parts: vec![HeadRef {
                        head_digest,
                        file_digest,
                        size: 4,
                    }],
                }],
            })
            .await
            .unwrap();

        let from = peer();
        for _ in 0..2 {
            engine
                .handle_inbound(
                    from,
                    storagesync_net::Message::Header {
                        head_digest,
                        file_digest,
                        descriptor: descriptor.clone(),
                    },
                )
                .await;
        }

        let rows = engine.tables.parts.parts_for_file(head_digest, file_digest).unwrap();
        assert_eq!(rows.len(), 1);
        let header = engine.tables.headers.get(head_digest, file_digest).unwrap().unwrap();
        assert!(header.complete);
    }

    #[tokio::test]
    async fn on_header_rejects_size_mismatch_against_advertised_head_ref() {
        let dir = tempdir().unwrap();
        let network = Arc::new(RecordingNetwork::with_peers(vec![]));
        let engine = Engine::open(dir.path(), network).unwrap();
        let (head_digest, file_digest, _part_digest, descriptor, _bytes) = single_part_file();

        // The ingested HeadRef advertises size=999, but the descriptor's
        // parts only tile [0, 4) — internally consistent and digest-valid,
        // yet diverging from the size this header announced.
        engine
            .ingest(StorageTransaction {
                storage_refs: vec![FileRef {
                    name: "f".into(),
                    parts: vec![HeadRef {
                        head_digest,
                        file_digest,
                        size: 999,
                    }],
                }],
            })
            .await
            .unwrap();

        let from = peer();
        engine
            .handle_inbound(
                from,
                storagesync_net::Message::Header {
                    head_digest,
                    file_digest,
                    descriptor,
                },
            )
            .await;

        let header = engine.tables.headers.get(head_digest, file_digest).unwrap().unwrap();
        assert!(!header.complete);
        assert!(engine.tables.descriptors.get(file_digest).unwrap().is_none());
        assert!(engine
            .tables
            .parts
            .parts_for_file(head_digest, file_digest)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn s3_corrupted_part_is_dropped() {
        let dir = tempdir().unwrap();
        let network = Arc::new(RecordingNetwork::with_peers(vec![]));
        let engine = Engine::open(dir.path(), network).unwrap();
        let (head_digest, file_digest, part_digest, descriptor, _bytes) = single_part_file();

        engine
            .ingest(StorageTransaction {
                storage_refs: vec![FileRef {
                    name: "f".into(),
                    parts: vec![HeadRef {
                        head_digest,
                        file_digest,
                        size: 4,
                    }],
                }],
            })
            .await
            .unwrap();

        let from = peer();
        engine
            .handle_inbound(
                from,
                storagesync_net::Message::Header {
                    head_digest,
                    file_digest,
                    descriptor,
                },
            )
            .await;

        engine
            .handle_inbound(
                from,
                storagesync_net::Message::Part {
                    head_digest,
                    file_digest,
                    part_digest,
                    offset_begin: 0,
                    offset_end: 4,
                    bytes: vec![0x00, 0x00, 0x00, 0x00],
                },
            )
            .await;

        let part = engine
            .tables
            .parts
            .get(head_digest, file_digest, part_digest)
            .unwrap()
            .unwrap();
        assert!(!part.complete);
        assert_eq!(engine.tables.parts.size_counter().unwrap(), 0);
    }

    #[tokio::test]
    async fn s6_unsolicited_part_is_ignored() {
        let dir = tempdir().unwrap();
        let network = Arc::new(RecordingNetwork::with_peers(vec![]));
        let engine = Engine::open(dir.path(), network).unwrap();
        let (head_digest, file_digest, part_digest, _descriptor, bytes) = single_part_file();

        let from = peer();
        engine
            .handle_inbound(
                from,
                storagesync_net::Message::Part {
                    head_digest,
                    file_digest,
                    part_digest,
                    offset_begin: 0,
                    offset_end: 4,
                    bytes,
                },
            )
            .await;

        assert!(engine
            .tables
            .parts
            .get(head_digest, file_digest, part_digest)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ingest_is_idempotent() {
        let dir = tempdir().unwrap();
        let network = Arc::new(RecordingNetwork::with_peers(vec![]));
        let engine = Engine::open(dir.path(), network).unwrap();
        let (head_digest, file_digest, _, _, _) = single_part_file();
        let tx = StorageTransaction {
            storage_refs: vec![FileRef {
                name: "f".into(),
                parts: vec![HeadRef {
                    head_digest,
                    file_digest,
                    size: 4,
                }],
            }],
        };

        engine.ingest(tx.clone()).await.unwrap();
        engine.ingest(tx).await.unwrap();

        let rows = engine.tables.headers.iterate_from_start().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn purge_file_removes_every_row() {
        let dir = tempdir().unwrap();
        let network = Arc::new(RecordingNetwork::with_peers(vec![]));
        let engine = Engine::open(dir.path(), network).unwrap();
        let (head_digest, file_digest, part_digest, descriptor, bytes) = single_part_file();

        engine
            .ingest(StorageTransaction {
                storage_refs: vec![FileRef {
                    name: "f".into(),
                    parts: vec![HeadRef {
                        head_digest,
                        file_digest,
                        size: 4,
                    }],
                }],
            })
            .await
            .unwrap();
        let from = peer();
        engine
            .handle_inbound(
                from,
                storagesync_net::Message::Header {
                    head_digest,
                    file_digest,
                    descriptor,
                },
            )
            .await;
        engine
            .handle_inbound(
                from,
                storagesync_net::Message::Part {
                    head_digest,
                    file_digest,
                    part_digest,
                    offset_begin: 0,
                    offset_end: 4,
                    bytes,
                },
            )
            .await;

        engine.purge_file(file_digest).await.unwrap();

        assert!(!engine.tables.headers.exists(head_digest, file_digest).unwrap());
        assert!(!engine.tables.descriptors.exists(file_digest).unwrap());
        assert!(engine
            .tables
            .parts
            .parts_for_file(head_digest, file_digest)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn s4_working_set_stays_bounded_past_cap() {
        let dir = tempdir().unwrap();
        let network = Arc::new(RecordingNetwork::with_peers(vec![]));
        let engine = Engine::open(dir.path(), network).unwrap();

        let mut refs = Vec::new();
        for n in 0..600u32 {
            let head_digest = digest(&n.to_le_bytes());
            let file_digest = digest(&(n + 1_000_000).to_le_bytes());
            refs.push(HeadRef {
                head_digest,
                file_digest,
                size: 4,
            });
        }
        engine
            .ingest(StorageTransaction {
                storage_refs: vec![FileRef {
                    name: "many".into(),
                    parts: refs,
                }],
            })
            .await
            .unwrap();

        assert_eq!(engine.tables.headers.iterate_from_start().unwrap().len(), 600);
        let ws = engine.working_set.lock().await;
        assert_eq!(ws.headers.len(), crate::working_set::WORKING_SET_CAP);
    }

    #[tokio::test]
    async fn s5_reopen_reloads_incomplete_entries_from_disk() {
        let dir = tempdir().unwrap();
        let (head_digest, file_digest, part_digest, descriptor, bytes) = single_part_file();

        {
            let network = Arc::new(RecordingNetwork::with_peers(vec![]));
            let engine = Engine::open(dir.path(), network).unwrap();
            engine
                .ingest(StorageTransaction {
                    storage_refs: vec![FileRef {
                        name: "f".into(),
                        parts: vec![HeadRef {
                            head_digest,
                            file_digest,
                            size: 4,
                        }],
                    }],
                })
                .await
                .unwrap();
            let from = peer();
            engine
                .handle_inbound(
                    from,
                    storagesync_net::Message::Header {
                        head_digest,
                        file_digest,
                        descriptor,
                    },
                )
                .await;
            engine
                .handle_inbound(
                    from,
                    storagesync_net::Message::Part {
                        head_digest,
                        file_digest,
                        part_digest,
                        offset_begin: 0,
                        offset_end: 4,
                        bytes,
                    },
                )
                .await;
        }

        let network = Arc::new(RecordingNetwork::with_peers(vec![]));
        let reopened = Engine::open(dir.path(), network).unwrap();

        let part = reopened
            .tables
            .parts
            .get(head_digest, file_digest, part_digest)
            .unwrap()
            .unwrap();
        assert!(part.complete);
        assert_eq!(reopened.tables.parts.size_counter().unwrap(), 4);

        let ws = reopened.working_set.lock().await;
        assert!(ws.parts.is_empty());
        assert!(ws.headers.is_empty());
    }
}
