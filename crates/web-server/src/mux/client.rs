//! Mux Client (§4.G): the central concurrency object of the relay, one per
//! live `/ws/mux` connection. All mutable scheduler state — accumulators,
//! the active-session hint, `needsResync` — lives inside a single actor
//! task that drains one event channel, which is what gives the resync
//! sequence (discard, per-session Resync, snapshot, drain) its atomicity
//! without a lock: nothing else can touch that state mid-sequence.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use mux_protocol::{MuxFrame, TokenBucket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::mux::queue::OutputQueue;
use crate::session_manager::SessionManager;

const ACCUMULATOR_FLUSH_BYTES: usize = 2 * 1024;
const ACCUMULATOR_FLUSH_AGE: Duration = Duration::from_secs(2);
const GZIP_BLOCKING_THRESHOLD: usize = 16 * 1024;
const BUFFER_REQUEST_BURST: u32 = 4;
const BUFFER_REQUEST_REFILL_PER_SEC: f64 = 1.0;
const TICK_INTERVAL: Duration = Duration::from_millis(250);

enum ClientEvent {
    Output { session_id: String, cols: u16, rows: u16, bytes: Vec<u8> },
    ActiveHint(Option<String>),
    BufferRequest(String),
    ForceResync,
    Tick,
}

struct Accumulator {
    bytes: Vec<u8>,
    first_pending: Option<Instant>,
    cols: u16,
    rows: u16,
}

pub struct MuxClient {
    pub viewer_id: String,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    queue: Arc<OutputQueue>,
    actor_task: JoinHandle<()>,
    ticker_task: JoinHandle<()>,
}

impl Drop for MuxClient {
    fn drop(&mut self) {
        // The ticker holds its own sender clone, so the actor's channel
        // never closes on its own; both tasks must be torn down explicitly.
        self.actor_task.abort();
        self.ticker_task.abort();
    }
}

impl MuxClient {
    pub fn new(viewer_id: String, session_manager: Arc<SessionManager>, queue_capacity: usize) -> Self {
        let queue = Arc::new(OutputQueue::new(queue_capacity));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor_task = tokio::spawn(run_actor(
            viewer_id.clone(),
            event_rx,
            Arc::clone(&queue),
            session_manager,
        ));

        let ticker_tx = event_tx.clone();
        let ticker_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                if ticker_tx.send(ClientEvent::Tick).is_err() {
                    break;
                }
            }
        });

        Self {
            viewer_id,
            event_tx,
            queue,
            actor_task,
            ticker_task,
        }
    }

    pub fn queue(&self) -> Arc<OutputQueue> {
        Arc::clone(&self.queue)
    }

    pub fn on_output(&self, session_id: String, cols: u16, rows: u16, bytes: Vec<u8>) {
        let _ = self.event_tx.send(ClientEvent::Output { session_id, cols, rows, bytes });
    }

    pub fn set_active_hint(&self, session_id: Option<String>) {
        let _ = self.event_tx.send(ClientEvent::ActiveHint(session_id));
    }

    pub fn request_buffer(&self, session_id: String) {
        let _ = self.event_tx.send(ClientEvent::BufferRequest(session_id));
    }

    /// Forces a full resync on the next tick, e.g. after the Host IPC Client
    /// reconnects to a pty-host and this viewer's scrollback may be stale.
    pub fn force_resync(&self) {
        let _ = self.event_tx.send(ClientEvent::ForceResync);
    }
}

async fn run_actor(
    viewer_id: String,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    queue: Arc<OutputQueue>,
    session_manager: Arc<SessionManager>,
) {
    let mut accumulators: HashMap<String, Accumulator> = HashMap::new();
    let mut active_hint: Option<String> = None;
    let mut needs_resync = false;
    let mut rate_limiters: HashMap<String, TokenBucket> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::ForceResync => needs_resync = true,
            ClientEvent::ActiveHint(sid) => active_hint = sid,
            ClientEvent::BufferRequest(sid) => {
                let bucket = rate_limiters
                    .entry(sid.clone())
                    .or_insert_with(|| TokenBucket::new(BUFFER_REQUEST_BURST, BUFFER_REQUEST_REFILL_PER_SEC));
                if !bucket.try_take() {
                    tracing::debug!(viewer_id, session_id = %sid, "buffer request dropped: rate limited");
                    continue;
                }
                if let (Ok(snapshot), Some(info)) = (
                    session_manager.get_buffer(&sid).await,
                    session_manager.get_session(&sid).await,
                ) {
                    enqueue_output(&queue, &mut needs_resync, &sid, info.cols, info.rows, snapshot);
                }
            }
            ClientEvent::Output { session_id, cols, rows, bytes } => {
                if needs_resync {
                    accumulate(&mut accumulators, session_id, cols, rows, bytes);
                    continue;
                }
                if active_hint.as_deref() == Some(session_id.as_str()) {
                    enqueue_output(&queue, &mut needs_resync, &session_id, cols, rows, bytes);
                } else {
                    accumulate(&mut accumulators, session_id.clone(), cols, rows, bytes);
                    if should_flush_by_size(&accumulators, &session_id) {
                        flush_one(&queue, &mut needs_resync, &mut accumulators, &session_id).await;
                    }
                }
            }
            ClientEvent::Tick => {
                if needs_resync {
                    run_resync(&queue, &mut needs_resync, &mut accumulators, &session_manager).await;
                    continue;
                }
                for sid in stale_accumulator_ids(&accumulators) {
                    flush_one(&queue, &mut needs_resync, &mut accumulators, &sid).await;
                }
            }
        }
    }
}

fn accumulate(accumulators: &mut HashMap<String, Accumulator>, session_id: String, cols: u16, rows: u16, bytes: Vec<u8>) {
    let acc = accumulators.entry(session_id).or_insert_with(|| Accumulator {
        bytes: Vec::new(),
        first_pending: None,
        cols,
        rows,
    });
    if acc.first_pending.is_none() {
        acc.first_pending = Some(Instant::now());
    }
    acc.cols = cols;
    acc.rows = rows;
    acc.bytes.extend_from_slice(&bytes);
}

fn should_flush_by_size(accumulators: &HashMap<String, Accumulator>, session_id: &str) -> bool {
    accumulators.get(session_id).is_some_and(|acc| acc.bytes.len() >= ACCUMULATOR_FLUSH_BYTES)
}

fn stale_accumulator_ids(accumulators: &HashMap<String, Accumulator>) -> Vec<String> {
    accumulators
        .iter()
        .filter(|(_, acc)| acc.first_pending.is_some_and(|t| t.elapsed() >= ACCUMULATOR_FLUSH_AGE))
        .map(|(sid, _)| sid.clone())
        .collect()
}

async fn flush_one(queue: &Arc<OutputQueue>, needs_resync: &mut bool, accumulators: &mut HashMap<String, Accumulator>, session_id: &str) {
    let Some(acc) = accumulators.remove(session_id) else { return };
    if acc.bytes.is_empty() {
        return;
    }
    let uncompressed_len = acc.bytes.len() as u32;
    let gzip = gzip_compress(acc.bytes).await;
    let frame = MuxFrame::CompressedOutput {
        session_id: session_id.to_string(),
        cols: acc.cols,
        rows: acc.rows,
        uncompressed_len,
        gzip,
    };
    if queue.push(frame.encode()) {
        *needs_resync = true;
    }
}

fn enqueue_output(queue: &Arc<OutputQueue>, needs_resync: &mut bool, session_id: &str, cols: u16, rows: u16, bytes: Vec<u8>) {
    let frame = MuxFrame::Output {
        session_id: session_id.to_string(),
        cols,
        rows,
        data: bytes,
    };
    if queue.push(frame.encode()) {
        *needs_resync = true;
    }
}

async fn gzip_compress(data: Vec<u8>) -> Vec<u8> {
    if data.len() > GZIP_BLOCKING_THRESHOLD {
        tokio::task::spawn_blocking(move || gzip_sync(&data))
            .await
            .unwrap_or_default()
    } else {
        gzip_sync(&data)
    }
}

fn gzip_sync(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

/// Resync (§4.G.2): discard the stale queue, tell the viewer to clear every
/// session it knows about, then replay a fresh snapshot per session before
/// draining whatever arrived while the snapshot was being fetched.
async fn run_resync(
    queue: &Arc<OutputQueue>,
    needs_resync: &mut bool,
    accumulators: &mut HashMap<String, Accumulator>,
    session_manager: &Arc<SessionManager>,
) {
    queue.clear();
    let session_ids = session_manager.list_sessions();

    for sid in &session_ids {
        queue.push(MuxFrame::Resync { session_id: sid.clone() }.encode());
    }
    for sid in &session_ids {
        let Some(info) = session_manager.get_session(sid).await else { continue };
        if let Ok(snapshot) = session_manager.get_buffer(sid).await {
            if !snapshot.is_empty() {
                if snapshot.len() > ACCUMULATOR_FLUSH_BYTES {
                    let uncompressed_len = snapshot.len() as u32;
                    let gzip = gzip_compress(snapshot).await;
                    queue.push(
                        MuxFrame::CompressedOutput {
                            session_id: sid.clone(),
                            cols: info.cols,
                            rows: info.rows,
                            uncompressed_len,
                            gzip,
                        }
                        .encode(),
                    );
                } else {
                    queue.push(
                        MuxFrame::Output {
                            session_id: sid.clone(),
                            cols: info.cols,
                            rows: info.rows,
                            data: snapshot,
                        }
                        .encode(),
                    );
                }
            }
        }
    }

    let pending: Vec<(String, Accumulator)> = accumulators.drain().collect();
    for (sid, acc) in pending {
        if acc.bytes.is_empty() {
            continue;
        }
        queue.push(
            MuxFrame::Output {
                session_id: sid,
                cols: acc.cols,
                rows: acc.rows,
                data: acc.bytes,
            }
            .encode(),
        );
    }

    *needs_resync = false;
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;
    use std::net::SocketAddr;

    use super::*;
    use crate::config::ServerConfig;
    use crate::mux::MuxBroadcaster;

    /// A `SessionManager` with zero live sessions: enough to drive
    /// `run_resync`'s queue/accumulator handling without spawning a real
    /// pty-host process, since the per-session fetch loops are no-ops when
    /// `list_sessions()` is empty.
    fn empty_session_manager() -> Arc<SessionManager> {
        let config = Arc::new(ServerConfig {
            bind_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            default_shell: "/bin/sh".to_string(),
            pty_host_path: None,
            scrollback_bytes: 1024,
            viewer_queue_capacity: 10,
            mux_endpoint_path: "/ws/mux".to_string(),
            state_endpoint_path: "/ws/state".to_string(),
        });
        let broadcaster = MuxBroadcaster::new(10);
        let manager = SessionManager::new(config, Arc::clone(&broadcaster));
        broadcaster.bind_session_manager(Arc::clone(&manager));
        manager
    }

    #[test]
    fn should_flush_by_size_triggers_at_threshold() {
        let mut accumulators = HashMap::new();
        accumulate(&mut accumulators, "s1".to_string(), 80, 24, vec![0u8; ACCUMULATOR_FLUSH_BYTES - 1]);
        assert!(!should_flush_by_size(&accumulators, "s1"));

        accumulate(&mut accumulators, "s1".to_string(), 80, 24, vec![0u8; 1]);
        assert!(should_flush_by_size(&accumulators, "s1"));
    }

    #[test]
    fn should_flush_by_size_false_for_unknown_session() {
        let accumulators = HashMap::new();
        assert!(!should_flush_by_size(&accumulators, "missing"));
    }

    #[test]
    fn stale_accumulator_ids_includes_only_aged_entries() {
        let mut accumulators = HashMap::new();
        accumulators.insert(
            "fresh".to_string(),
            Accumulator { bytes: vec![1], first_pending: Some(Instant::now()), cols: 80, rows: 24 },
        );
        accumulators.insert(
            "stale".to_string(),
            Accumulator {
                bytes: vec![2],
                first_pending: Instant::now().checked_sub(ACCUMULATOR_FLUSH_AGE + Duration::from_millis(1)),
                cols: 80,
                rows: 24,
            },
        );
        accumulators.insert(
            "untouched".to_string(),
            Accumulator { bytes: vec![], first_pending: None, cols: 80, rows: 24 },
        );

        assert_eq!(stale_accumulator_ids(&accumulators), vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn flush_one_gzip_compresses_and_clears_accumulator() {
        let queue = Arc::new(OutputQueue::new(10));
        let mut needs_resync = false;
        let mut accumulators = HashMap::new();
        accumulate(&mut accumulators, "s1".to_string(), 80, 24, b"hello world".to_vec());

        flush_one(&queue, &mut needs_resync, &mut accumulators, "s1").await;

        assert!(!accumulators.contains_key("s1"));
        let frame = MuxFrame::decode(&queue.pop().await).unwrap();
        match frame {
            MuxFrame::CompressedOutput { session_id, uncompressed_len, gzip, .. } => {
                assert_eq!(session_id, "s1");
                assert_eq!(uncompressed_len, 11);
                assert!(!gzip.is_empty());
            }
            other => panic!("expected CompressedOutput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn flush_one_is_a_noop_without_a_pending_accumulator() {
        let queue = Arc::new(OutputQueue::new(10));
        let mut needs_resync = false;
        let mut accumulators: HashMap<String, Accumulator> = HashMap::new();

        flush_one(&queue, &mut needs_resync, &mut accumulators, "missing").await;

        // Sentinel pushed after the call: if flush_one had queued anything
        // for "missing", it would come out first instead.
        queue.push(b"sentinel".to_vec());
        assert_eq!(queue.pop().await, b"sentinel".to_vec());
    }

    #[test]
    fn gzip_sync_produces_decodable_gzip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = gzip_sync(&data);

        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn buffer_request_rate_limiter_rejects_after_burst() {
        let mut bucket = TokenBucket::new(BUFFER_REQUEST_BURST, BUFFER_REQUEST_REFILL_PER_SEC);
        for _ in 0..BUFFER_REQUEST_BURST {
            assert!(bucket.try_take());
        }
        assert!(!bucket.try_take(), "a burst-sized run of requests should exhaust the bucket");
    }

    #[tokio::test]
    async fn run_resync_discards_stale_queue_drains_accumulator_and_clears_flag() {
        let session_manager = empty_session_manager();
        let queue = Arc::new(OutputQueue::new(10));
        queue.push(
            MuxFrame::Output { session_id: "stale".to_string(), cols: 80, rows: 24, data: b"old".to_vec() }.encode(),
        );

        let mut needs_resync = true;
        let mut accumulators = HashMap::new();
        accumulate(&mut accumulators, "s1".to_string(), 80, 24, b"pending".to_vec());

        run_resync(&queue, &mut needs_resync, &mut accumulators, &session_manager).await;

        assert!(!needs_resync);
        assert!(accumulators.is_empty());

        let frame = MuxFrame::decode(&queue.pop().await).unwrap();
        match frame {
            MuxFrame::Output { session_id, data, .. } => {
                assert_eq!(session_id, "s1");
                assert_eq!(data, b"pending");
            }
            other => panic!("expected the drained accumulator, not the pre-resync frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn active_session_output_is_immediate_background_output_is_accumulated() {
        let session_manager = empty_session_manager();
        let queue = Arc::new(OutputQueue::new(10));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let actor = tokio::spawn(run_actor("viewer".to_string(), event_rx, Arc::clone(&queue), session_manager));

        event_tx.send(ClientEvent::ActiveHint(Some("active-sid".to_string()))).unwrap();
        event_tx
            .send(ClientEvent::Output { session_id: "active-sid".to_string(), cols: 80, rows: 24, bytes: b"hi".to_vec() })
            .unwrap();
        event_tx
            .send(ClientEvent::Output { session_id: "background-sid".to_string(), cols: 80, rows: 24, bytes: b"bg".to_vec() })
            .unwrap();

        let frame = MuxFrame::decode(&queue.pop().await).unwrap();
        match frame {
            MuxFrame::Output { session_id, data, .. } => {
                assert_eq!(session_id, "active-sid");
                assert_eq!(data, b"hi");
            }
            other => panic!("expected immediate Output for the active session, got {other:?}"),
        }

        let second = tokio::time::timeout(Duration::from_millis(100), queue.pop()).await;
        assert!(second.is_err(), "background output below the flush threshold should stay accumulated");

        drop(event_tx);
        actor.abort();
    }
}
