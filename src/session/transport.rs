//! Session transport
//!
//! Owns the private session channel for one matched pair. Local streams are
//! attached on join and re-sent directly to each peer that appears, so a
//! peer joining slightly late still receives them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::matchmaking::SessionChannelId;
use crate::transport::{MediaStream, RoomEvent, RoomEvents, RoomHandle, StreamId, Transport};

use super::state::SessionSnapshot;

/// A joined session channel
struct Active<R> {
    room: Arc<R>,
    local_streams: Arc<Mutex<Vec<MediaStream>>>,
    pump: JoinHandle<()>,
}

/// Media/data lifecycle for one matched pair
///
/// Public operations never fail; failures show up as
/// [`ConnectionState::Disconnected`](super::ConnectionState::Disconnected).
pub struct SessionTransport<T: Transport> {
    transport: T,
    state_tx: Arc<watch::Sender<SessionSnapshot>>,
    state: watch::Receiver<SessionSnapshot>,
    /// Bumped on every connect/disconnect to fence stale event pumps
    generation: Arc<AtomicU64>,
    active: Option<Active<T::Room>>,
}

impl<T: Transport> SessionTransport<T> {
    /// Create an idle session transport
    pub fn new(transport: T) -> Self {
        let (state_tx, state) = watch::channel(SessionSnapshot::default());

        Self {
            transport,
            state_tx: Arc::new(state_tx),
            state,
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    /// Join a session channel and attach `local_stream`
    ///
    /// An existing session is torn down first.
    pub async fn connect(
        &mut self,
        session: &SessionChannelId,
        is_initiator: bool,
        local_stream: Option<MediaStream>,
    ) {
        self.teardown().await;
        let generation = self.generation.load(Ordering::SeqCst);

        self.state_tx
            .send_replace(SessionSnapshot::connecting(session.clone(), is_initiator));

        let (room, events) = match self.transport.join(session.as_str()).await {
            Ok(joined) => joined,
            Err(e) => {
                tracing::error!(session = %session, error = %e, "Failed to join session channel");
                self.state_tx.send_modify(|state| state.fail());
                return;
            }
        };
        let room = Arc::new(room);

        tracing::info!(
            session = %session,
            self_id = %room.self_id(),
            initiator = is_initiator,
            "Joined session channel"
        );

        let local_streams = Arc::new(Mutex::new(Vec::new()));
        if let Some(stream) = local_stream {
            local_streams.lock().await.push(stream.clone());
            if let Err(e) = room.add_stream(&stream, None).await {
                tracing::warn!(stream = %stream.id(), error = %e, "Failed to attach local stream");
            }
        }

        let pump = tokio::spawn(pump_events(
            Arc::clone(&room),
            events,
            Arc::clone(&local_streams),
            Arc::clone(&self.state_tx),
            Arc::clone(&self.generation),
            generation,
        ));

        self.active = Some(Active {
            room,
            local_streams,
            pump,
        });
    }

    /// Leave the session channel and return to idle. Idempotent.
    pub async fn disconnect(&mut self) {
        let was_active = self.active.is_some();
        self.teardown().await;

        let reset = self.state_tx.send_if_modified(|state| {
            if *state == SessionSnapshot::default() {
                return false;
            }
            *state = SessionSnapshot::default();
            true
        });
        if was_active || reset {
            tracing::info!("Session disconnected");
        }
    }

    /// Attach an additional outbound stream without rejoining
    pub async fn add_local_stream(&self, stream: MediaStream) {
        let Some(active) = &self.active else {
            return;
        };

        {
            let mut streams = active.local_streams.lock().await;
            if streams.iter().any(|s| s.id() == stream.id()) {
                return;
            }
            streams.push(stream.clone());
        }

        if let Err(e) = active.room.add_stream(&stream, None).await {
            tracing::warn!(stream = %stream.id(), error = %e, "Failed to attach local stream");
        }
    }

    /// Detach an outbound stream
    pub async fn remove_local_stream(&self, stream_id: &StreamId) {
        let Some(active) = &self.active else {
            return;
        };

        active
            .local_streams
            .lock()
            .await
            .retain(|s| s.id() != stream_id);

        if let Err(e) = active.room.remove_stream(stream_id).await {
            tracing::warn!(stream = %stream_id, error = %e, "Failed to detach local stream");
        }
    }

    /// Current state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Whether a session channel is joined
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    async fn teardown(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(active) = self.active.take() {
            active.pump.abort();
            active.room.leave().await;
            tracing::debug!(session = %active.room.name(), "Left session channel");
        }
    }
}

impl<T: Transport> Drop for SessionTransport<T> {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(active) = self.active.take() {
            active.pump.abort();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { active.room.leave().await });
            }
        }
    }
}

async fn pump_events<R: RoomHandle>(
    room: Arc<R>,
    mut events: RoomEvents,
    local_streams: Arc<Mutex<Vec<MediaStream>>>,
    state_tx: Arc<watch::Sender<SessionSnapshot>>,
    current: Arc<AtomicU64>,
    generation: u64,
) {
    let update = |apply: &dyn Fn(&mut SessionSnapshot) -> bool| {
        state_tx.send_if_modified(|state| {
            if current.load(Ordering::SeqCst) != generation {
                return false;
            }
            apply(state)
        })
    };

    while let Some(event) = events.recv().await {
        if current.load(Ordering::SeqCst) != generation {
            break;
        }

        match event {
            RoomEvent::PeerJoined(peer) => {
                tracing::info!(session = %room.name(), peer = %peer, "Peer connected");
                update(&|state| state.on_peer_joined(&peer));

                // Re-send outbound streams straight to the newcomer
                let streams = local_streams.lock().await.clone();
                for stream in streams {
                    if let Err(e) = room.add_stream(&stream, Some(&peer)).await {
                        tracing::debug!(peer = %peer, error = %e, "Failed to re-send local stream");
                    }
                }
            }
            RoomEvent::PeerLeft(peer) => {
                if update(&|state| state.on_peer_left(&peer)) {
                    tracing::info!(session = %room.name(), peer = %peer, "Peer disconnected");
                }
            }
            RoomEvent::PeerStream { stream, from } => {
                let stream_id = stream.id().clone();
                if update(&|state| state.on_remote_stream(stream.clone(), &from)) {
                    tracing::info!(peer = %from, stream = %stream_id, role = ?stream.role(), "Received remote stream");
                } else {
                    tracing::debug!(peer = %from, stream = %stream_id, "Duplicate remote stream");
                }
            }
            RoomEvent::StreamRemoved { stream_id, from } => {
                if update(&|state| state.on_stream_removed(&stream_id)) {
                    tracing::debug!(peer = %from, stream = %stream_id, "Remote stream removed");
                }
            }
            RoomEvent::Action { name, from, .. } => {
                tracing::debug!(action = %name, peer = %from, "Ignoring session action");
            }
        }
    }
}
