//! Distributes piece work across peer workers, collects verified pieces, assembles the output.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Condvar, Mutex,
    },
    thread,
};

use rand::RngCore;

use crate::{
    peer::{PeerAddr, PeerSession},
    piece_downloader::{self, WorkItem},
    torrent::Metainfo,
};

/// A mutex-guarded FIFO plus a condition variable and a closed flag: a multi-producer
/// multi-consumer queue built from the primitives std provides, since `std::sync::mpsc`
/// is single-consumer only and can't itself be shared as a work-stealing structure.
struct WorkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

impl WorkQueue {
    fn new(items: Vec<WorkItem>) -> Self {
        Self {
            state: Mutex::new(QueueState { items: items.into(), closed: false }),
            not_empty: Condvar::new(),
        }
    }

    /// Blocks until an item is available or the queue is closed and drained.
    fn pop(&self) -> Option<WorkItem> {
        let mut state = self.state.lock().expect("work queue mutex poisoned");
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).expect("work queue mutex poisoned");
        }
    }

    /// Requeues a failed item. Capacity is unbounded, so this never blocks.
    fn push(&self, item: WorkItem) {
        let mut state = self.state.lock().expect("work queue mutex poisoned");
        state.items.push_back(item);
        self.not_empty.notify_one();
    }

    fn close(&self) {
        let mut state = self.state.lock().expect("work queue mutex poisoned");
        state.closed = true;
        self.not_empty.notify_all();
    }
}

/// The assembled output buffer, together with whether every piece was actually committed.
/// A `complete: false` result means the buffer has zero-filled gaps and must not be trusted.
pub struct DownloadResult {
    pub bytes: Vec<u8>,
    pub complete: bool,
}

/// Downloads every piece of `metainfo` from `peers`, returning the assembled file contents.
/// `complete` is `false` if every worker exited before every piece was committed.
pub fn download(metainfo: &Metainfo, own_peer_id: [u8; 20], peers: Vec<PeerAddr>) -> DownloadResult {
    let piece_count = metainfo.piece_hashes.len();
    let mut output = vec![0u8; metainfo.total_length as usize];

    let queue = Arc::new(WorkQueue::new(build_work_items(metainfo)));
    let (results_tx, results_rx) = mpsc::channel();
    let live_workers = Arc::new(AtomicUsize::new(peers.len()));

    let handles: Vec<_> = peers
        .into_iter()
        .map(|addr| {
            let queue = Arc::clone(&queue);
            let results_tx = results_tx.clone();
            let info_hash = metainfo.info_hash;
            let live_workers = Arc::clone(&live_workers);
            thread::spawn(move || {
                run_worker(addr, own_peer_id, info_hash, &queue, &results_tx);
                live_workers.fetch_sub(1, Ordering::Relaxed);
            })
        })
        .collect();
    drop(results_tx);

    let mut completed = 0usize;
    let mut complete = true;
    while completed < piece_count {
        let (index, bytes) = match results_rx.recv() {
            Ok(result) => result,
            Err(_) => {
                // Every worker has exited with no piece left to commit: no peer can finish
                // the download (see the liveness hazard noted in the design).
                log::error!(
                    "all peer workers exited with {}/{piece_count} pieces committed; \
                     no remaining peer can supply the rest",
                    completed
                );
                complete = false;
                break;
            }
        };
        let offset = index as u64 * metainfo.piece_length as u64;
        let end = offset + bytes.len() as u64;
        output[offset as usize..end as usize].copy_from_slice(&bytes);
        completed += 1;
        log::info!(
            "piece {index} complete ({completed}/{piece_count}, {:.1}%, {} workers live)",
            100.0 * completed as f64 / piece_count as f64,
            live_workers.load(Ordering::Relaxed)
        );
    }

    queue.close();
    for handle in handles {
        let _ = handle.join();
    }

    DownloadResult { bytes: output, complete }
}

fn build_work_items(metainfo: &Metainfo) -> Vec<WorkItem> {
    let piece_count = metainfo.piece_hashes.len();
    (0..piece_count)
        .map(|i| {
            let length = if i == piece_count - 1 {
                metainfo.total_length - (piece_count as u64 - 1) * metainfo.piece_length as u64
            } else {
                metainfo.piece_length as u64
            };
            WorkItem { index: i as u32, hash: metainfo.piece_hashes[i], length: length as u32 }
        })
        .collect()
}

pub fn random_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut id);
    id
}

fn run_worker(
    addr: PeerAddr,
    own_peer_id: [u8; 20],
    info_hash: [u8; 20],
    queue: &WorkQueue,
    results: &mpsc::Sender<(u32, Vec<u8>)>,
) {
    let mut session = match PeerSession::open(addr, own_peer_id, info_hash) {
        Ok(session) => session,
        Err(err) => {
            log::info!("{addr}: abandoning peer, failed to open session: {err}");
            return;
        }
    };

    if let Err(err) = session.send_unchoke().and_then(|_| session.send_interested()) {
        log::info!("{addr}: abandoning peer, failed to send greeting: {err}");
        return;
    }

    while let Some(item) = queue.pop() {
        if !session.peer_bitfield.has(item.index) {
            queue.push(item);
            continue;
        }

        let buffer = match piece_downloader::download_piece(&mut session, &item) {
            Ok(buffer) => buffer,
            Err(err) => {
                log::info!(
                    "{addr}: piece {} download failed, abandoning peer: {err}",
                    item.index
                );
                queue.push(item);
                break;
            }
        };

        if !piece_hash_matches(&buffer, &item.hash) {
            log::info!("{addr}: piece {} failed integrity check, keeping peer", item.index);
            queue.push(item);
            continue;
        }

        if let Err(err) = session.send_have(item.index) {
            log::info!("{addr}: failed to send Have for piece {}: {err}", item.index);
        }

        if results.send((item.index, buffer)).is_err() {
            break;
        }
    }

    session.close();
}

fn piece_hash_matches(buffer: &[u8], expected: &[u8; 20]) -> bool {
    let mut hasher = sha1_smol::Sha1::new();
    hasher.update(buffer);
    hasher.digest().bytes() == *expected
}
