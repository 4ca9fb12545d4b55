//! The periodic scheduler: a fixed 1 s tick loop running three sub-passes
//! on staggered cadences so they don't phase-lock against each other,
//! expressed as a `tokio::spawn`ed task driven by `tokio::time::interval`
//! rather than a raw OS thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use storagesync_net::Message;

use crate::engine::Engine;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub header_probe_interval: Duration,
    pub part_fetch_interval: Duration,
    pub reconcile_interval: Duration,
    pub inter_send_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: Duration::from_secs(1),
            header_probe_interval: Duration::from_secs(60),
            part_fetch_interval: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(60),
            inter_send_delay: Duration::from_millis(100),
        }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Observed on the next second boundary: signals the tick loop to
    /// finish its current tick and exit. No in-flight request is awaited.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}

/// Spawns the tick loop as a background task.
pub fn start(engine: Arc<Engine>, config: SchedulerConfig) -> SchedulerHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.tick_interval);
        // Staggered so the 30 s and 60 s passes don't always land on the
        // same tick boundary and phase-lock against each other.
        let mut last_header_probe = Instant::now();
        let mut last_part_fetch = Instant::now()
            .checked_sub(Duration::from_secs(3))
            .unwrap_or_else(Instant::now);
        let mut last_reconcile = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown_rx => {
                    debug!("scheduler tick loop stopping");
                    return;
                }
            }

            let now = Instant::now();

            if now.duration_since(last_header_probe) >= config.header_probe_interval {
                header_probe_pass(&engine).await;
                last_header_probe = now;
            }

            if now.duration_since(last_part_fetch) >= config.part_fetch_interval {
                part_fetch_pass(&engine, config.inter_send_delay).await;
                last_part_fetch = now;
            }

            if now.duration_since(last_reconcile) >= config.reconcile_interval {
                reconcile_pass(&engine).await;
                last_reconcile = now;
            }
        }
    });

    SchedulerHandle {
        shutdown_tx: Some(shutdown_tx),
        join,
    }
}

/// For every incomplete `HeaderEntry` whose last probe is stale (or has
/// never been probed), broadcast `CHECK-HEADER` and stamp the probe time.
async fn header_probe_pass(engine: &Engine) {
    let due: Vec<(storagesync_core::Digest256, storagesync_core::Digest256)> = {
        let mut ws = engine.working_set.lock().await;
        let now = Instant::now();
        let stale_after = Duration::from_secs(60);
        let keys: Vec<_> = ws
            .headers
            .iter()
            .filter(|(_, entry)| !entry.complete)
            .map(|(k, _)| *k)
            .collect();
        let mut due = Vec::new();
        for key in keys {
            let is_due = match ws.pending_header_probes.get(&key) {
                Some(last) => now.duration_since(*last) >= stale_after,
                None => true,
            };
            if is_due {
                ws.pending_header_probes.insert(key, now);
                due.push(key);
            }
        }
        due
    };

    for (head_digest, file_digest) in due {
        engine
            .network
            .broadcast(Message::CheckHeader {
                head_digest,
                file_digest,
            })
            .await;
    }
}

/// For every incomplete `PartEntry` whose last request is stale, broadcast
/// `GET-PART`, sleeping `inter_send_delay` between sends to cap outbound
/// burstiness.
async fn part_fetch_pass(engine: &Engine, inter_send_delay: Duration) {
    let due = collect_due_parts(engine, Duration::from_secs(30)).await;

    for (head_digest, file_digest, part_digest, offset_begin, offset_end) in due {
        engine
            .network
            .broadcast(Message::GetPart {
                head_digest,
                file_digest,
                part_digest,
                offset_begin,
                offset_end,
            })
            .await;
        tokio::time::sleep(inter_send_delay).await;
    }
}

async fn collect_due_parts(
    engine: &Engine,
    stale_after: Duration,
) -> Vec<(
    storagesync_core::Digest256,
    storagesync_core::Digest256,
    storagesync_core::Digest256,
    u32,
    u32,
)> {
    let mut ws = engine.working_set.lock().await;
    let now = Instant::now();
    let keys: Vec<_> = ws
        .parts
        .iter()
        .filter(|(_, entry)| !entry.complete)
        .map(|(k, _)| *k)
        .collect();

    let mut due = Vec::new();
    for key @ (head_digest, file_digest, part_digest) in keys {
        let is_due = match ws.pending_part_requests.get(&key) {
            Some(pending) => now.duration_since(pending.last_request_time) >= stale_after,
            None => true,
        };
        if !is_due {
            continue;
        }
        ws.pending_part_requests.insert(
            key,
            crate::working_set::PendingPartRequest {
                last_request_time: now,
                in_flight: true,
            },
        );
        let range = descriptor_offsets(engine, file_digest, part_digest);
        due.push((head_digest, file_digest, part_digest, range.0, range.1));
    }
    due
}

fn descriptor_offsets(
    engine: &Engine,
    file_digest: storagesync_core::Digest256,
    part_digest: storagesync_core::Digest256,
) -> (u32, u32) {
    engine
        .tables
        .descriptors
        .get(file_digest)
        .ok()
        .flatten()
        .and_then(|record| {
            record
                .descriptor
                .parts
                .iter()
                .find(|p| p.part_digest == part_digest)
                .map(|p| (p.offset_begin, p.offset_end))
        })
        .unwrap_or((0, 0))
}

/// Reloads the caches from disk (bounded to 500 entries each), re-probes
/// still-incomplete headers, purges completed rows from the descriptor
/// and part caches, and re-requests descriptors for orphaned parts.
async fn reconcile_pass(engine: &Engine) {
    let reloaded_headers = engine
        .tables
        .headers
        .load_incomplete(crate::working_set::WORKING_SET_CAP)
        .unwrap_or_default();

    let orphans: Vec<(storagesync_core::Digest256, storagesync_core::Digest256)> = {
        let mut ws = engine.working_set.lock().await;

        ws.headers.clear();
        for (head_digest, file_digest, entry) in &reloaded_headers {
            ws.headers.try_insert((*head_digest, *file_digest), *entry);
        }

        let complete_descriptor_keys: Vec<_> = ws
            .descriptors
            .iter()
            .filter(|(_, record)| record.complete)
            .map(|(k, _)| *k)
            .collect();
        for key in complete_descriptor_keys {
            ws.descriptors.remove(&key);
        }

        let complete_part_keys: Vec<_> = ws
            .parts
            .iter()
            .filter(|(_, entry)| entry.complete)
            .map(|(k, _)| *k)
            .collect();
        for key in complete_part_keys {
            ws.retire_part(key);
        }

        let mut orphans = Vec::new();
        let incomplete_part_keys: Vec<_> = ws.parts.iter().map(|(k, _)| *k).collect();
        for (head_digest, file_digest, _) in incomplete_part_keys {
            let has_descriptor = engine
                .tables
                .descriptors
                .exists(file_digest)
                .unwrap_or(false);
            if !has_descriptor {
                orphans.push((head_digest, file_digest));
            }
        }
        orphans
    };

    for (head_digest, file_digest) in orphans {
        debug!(head_digest = %head_digest, file_digest = %file_digest, "orphaned part, re-requesting descriptor");
        engine
            .network
            .broadcast(Message::CheckHeader {
                head_digest,
                file_digest,
            })
            .await;
    }

    header_probe_pass(engine).await;
    info!("reconcile pass complete");
}
