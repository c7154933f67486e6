//! Mux Broadcaster (§4.G): the fan-out point between the Session Manager's
//! single output stream and every live `/ws/mux` viewer. Registers itself
//! as a state listener so session create/destroy also reaches viewers as
//! `SessionState` frames, independent of the `/ws/state` JSON endpoint.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use mux_protocol::{MuxFrame, SessionInfo};
use tokio::sync::{mpsc, OnceCell};

use crate::mux::client::MuxClient;
use crate::session_manager::SessionManager;

pub struct MuxBroadcaster {
    clients: DashMap<String, Arc<MuxClient>>,
    session_manager: OnceCell<Arc<SessionManager>>,
    queue_capacity: usize,
    known_sessions: Mutex<HashSet<String>>,
}

impl MuxBroadcaster {
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            session_manager: OnceCell::new(),
            queue_capacity,
            known_sessions: Mutex::new(HashSet::new()),
        })
    }

    /// `SessionManager` and `MuxBroadcaster` hold circular `Arc`s of one
    /// another; the manager is only available after its own construction,
    /// so it's injected here rather than through `new`.
    pub fn bind_session_manager(&self, session_manager: Arc<SessionManager>) {
        let _ = self.session_manager.set(session_manager);
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        Arc::clone(
            self.session_manager
                .get()
                .expect("MuxBroadcaster used before bind_session_manager"),
        )
    }

    pub fn register(&self, viewer_id: String) -> Arc<MuxClient> {
        let client = Arc::new(MuxClient::new(viewer_id.clone(), self.session_manager(), self.queue_capacity));
        self.clients.insert(viewer_id, Arc::clone(&client));
        client
    }

    pub fn unregister(&self, viewer_id: &str) {
        self.clients.remove(viewer_id);
    }

    /// Marks every live viewer as needing a full resync (§4.D "on reconnect,
    /// the Session Manager ... signals resync"): used when a Host IPC
    /// Client's connection to its pty-host is restored after an outage, so
    /// viewers replace whatever scrollback they have with a fresh snapshot.
    pub fn force_resync_all(&self) {
        for entry in self.clients.iter() {
            entry.value().force_resync();
        }
    }

    /// Looks up the session's current cols/rows and fans the bytes out to
    /// every registered viewer. A slow or stalled viewer never blocks this
    /// call: its bounded queue absorbs backpressure by dropping oldest.
    pub async fn publish_output(&self, session_id: &str, bytes: Vec<u8>) {
        let Some(info) = self.session_manager().get_session(session_id).await else {
            return;
        };
        for entry in self.clients.iter() {
            entry.value().on_output(session_id.to_string(), info.cols, info.rows, bytes.clone());
        }
    }

    /// Session list changed (§4.E listener contract): diff against the
    /// previously known roster and tell every viewer about sessions that
    /// appeared or disappeared as `SessionState` frames (type 0x04, one
    /// byte: 1 created, 0 destroyed) — not one frame per unrelated change
    /// like a resize or rename.
    pub fn publish_session_states(&self, sessions: &[SessionInfo]) {
        let current: HashSet<String> = sessions.iter().map(|s| s.id.clone()).collect();
        let mut known = self.known_sessions.lock().unwrap();

        let created: Vec<String> = current.difference(&known).cloned().collect();
        let destroyed: Vec<String> = known.difference(&current).cloned().collect();
        *known = current;
        drop(known);

        for session_id in created {
            self.push_session_state(session_id, true);
        }
        for session_id in destroyed {
            self.push_session_state(session_id, false);
        }
    }

    fn push_session_state(&self, session_id: String, created: bool) {
        let frame = MuxFrame::SessionState { session_id, created };
        let encoded = frame.encode();
        for entry in self.clients.iter() {
            entry.value().queue().push(encoded.clone());
        }
    }

    /// Runs the listener loop started by whoever owns the `SessionManager`;
    /// exists so callers don't need to reach into `MuxClient` internals to
    /// drive the state-listener channel themselves.
    pub fn spawn_state_listener(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<Vec<SessionInfo>>) {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(sessions) = rx.recv().await {
                broadcaster.publish_session_states(&sessions);
            }
        });
    }
}
