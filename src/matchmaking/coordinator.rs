//! Matchmaking coordinator
//!
//! Runs the lobby protocol on a dedicated task. Commands from the caller,
//! lobby events and timers are multiplexed in a single `select!` loop, so the
//! search cycle is only ever mutated from one place.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::unix_millis;
use crate::config::RendezvousConfig;
use crate::identity::IdentityProvider;
use crate::transport::{PeerId, RoomEvent, RoomEvents, RoomHandle, Transport};

use super::message::{SessionChannelId, MATCH_ACTION};
use super::state::{Handled, MatchOutcome, MatchState, Outgoing, SearchCycle};

/// Observable coordinator output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    /// Current state
    pub state: MatchState,
    /// Session channel, once matched
    pub room_id: Option<SessionChannelId>,
    /// Remote transport id, once matched
    pub remote_peer_id: Option<PeerId>,
    /// Whether the local side proposed the match
    pub is_initiator: bool,
}

impl MatchSnapshot {
    fn with_state(state: MatchState) -> Self {
        Self {
            state,
            room_id: None,
            remote_peer_id: None,
            is_initiator: false,
        }
    }

    fn matched(outcome: &MatchOutcome) -> Self {
        Self {
            state: MatchState::Matched,
            room_id: Some(outcome.session.clone()),
            remote_peer_id: Some(outcome.remote_peer.clone()),
            is_initiator: outcome.is_initiator,
        }
    }
}

impl Default for MatchSnapshot {
    fn default() -> Self {
        Self::with_state(MatchState::Idle)
    }
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Skip,
}

/// Handle to a running matchmaking coordinator
///
/// All operations return immediately; results arrive through
/// [`snapshot`](Self::snapshot) and [`subscribe`](Self::subscribe).
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use devgle::{Matchmaker, MemoryHub, RendezvousConfig, SessionIdentity};
///
/// # async fn example() {
/// let config = RendezvousConfig::default();
/// let hub = MemoryHub::new();
/// let transport = hub.random_client(&config);
///
/// let matchmaker = Matchmaker::spawn(transport, Arc::new(SessionIdentity::new()), config);
/// let mut updates = matchmaker.subscribe();
/// matchmaker.start_searching();
///
/// while updates.changed().await.is_ok() {
///     println!("{:?}", *updates.borrow());
/// }
/// # }
/// ```
pub struct Matchmaker {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<MatchSnapshot>,
    task: JoinHandle<()>,
}

impl Matchmaker {
    /// Spawn a coordinator on the current tokio runtime
    pub fn spawn<T: Transport>(
        transport: T,
        identity: Arc<dyn IdentityProvider>,
        config: RendezvousConfig,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(MatchSnapshot::default());

        let driver = Driver {
            transport,
            identity,
            config,
            state_tx,
            lobby: None,
            restart_at: None,
        };
        let task = tokio::spawn(driver.run(command_rx));

        Self {
            commands,
            state,
            task,
        }
    }

    /// Join the lobby and look for a peer
    pub fn start_searching(&self) {
        self.send(Command::Start);
    }

    /// Leave the lobby and return to idle. Idempotent.
    pub fn stop_searching(&self) {
        self.send(Command::Stop);
    }

    /// Abandon the current match and search again after the skip delay
    pub fn skip(&self) {
        self.send(Command::Skip);
    }

    /// Current state
    pub fn snapshot(&self) -> MatchSnapshot {
        self.state.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<MatchSnapshot> {
        self.state.clone()
    }

    /// Stop the coordinator, leaving any lobby membership
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Matchmaking task ended abnormally");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Matchmaking task is not running");
        }
    }
}

/// Live lobby membership and its search cycle
struct Lobby<R> {
    room: R,
    events: RoomEvents,
    cycle: SearchCycle,
    /// Set once matched: when to leave the lobby
    leave_at: Option<Instant>,
}

struct Driver<T: Transport> {
    transport: T,
    identity: Arc<dyn IdentityProvider>,
    config: RendezvousConfig,
    state_tx: watch::Sender<MatchSnapshot>,
    lobby: Option<Lobby<T::Room>>,
    /// Pending restart after a skip
    restart_at: Option<Instant>,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let leave_at = self.lobby.as_ref().and_then(|lobby| lobby.leave_at);
            let proposal_deadline = self
                .lobby
                .as_ref()
                .and_then(|lobby| lobby.cycle.next_deadline());
            let restart_at = self.restart_at;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start) => self.start().await,
                    Some(Command::Stop) => self.stop().await,
                    Some(Command::Skip) => self.skip().await,
                    None => break,
                },
                event = next_event(&mut self.lobby) => self.on_lobby_event(event).await,
                _ = sleep_until(leave_at) => {
                    tracing::debug!("Match grace elapsed, leaving lobby");
                    self.leave_lobby().await;
                }
                _ = sleep_until(proposal_deadline) => self.expire_proposals().await,
                _ = sleep_until(restart_at) => {
                    tracing::debug!("Skip delay elapsed, searching again");
                    self.start().await;
                }
            }
        }

        self.leave_lobby().await;
        tracing::debug!("Matchmaking task stopped");
    }

    async fn start(&mut self) {
        self.restart_at = None;

        let Some(participant) = self.identity.participant_id() else {
            tracing::warn!("No local identity available, not searching");
            return;
        };

        // Never hold two lobby memberships
        self.leave_lobby().await;
        publish(&self.state_tx, MatchSnapshot::with_state(MatchState::Searching));

        match self.transport.join(&self.config.lobby_room).await {
            Ok((room, events)) => {
                tracing::info!(
                    participant = %participant.short(),
                    self_id = %room.self_id(),
                    lobby = %self.config.lobby_room,
                    "Joined lobby, searching"
                );
                let cycle = SearchCycle::new(room.self_id().clone(), self.config.proposal_timeout);
                self.lobby = Some(Lobby {
                    room,
                    events,
                    cycle,
                    leave_at: None,
                });
            }
            Err(e) => {
                tracing::error!(
                    lobby = %self.config.lobby_room,
                    error = %e,
                    "Failed to join lobby"
                );
                publish(&self.state_tx, MatchSnapshot::with_state(MatchState::Error));
            }
        }
    }

    async fn stop(&mut self) {
        self.restart_at = None;
        self.leave_lobby().await;
        if publish(&self.state_tx, MatchSnapshot::default()) {
            tracing::info!("Stopped searching");
        }
    }

    async fn skip(&mut self) {
        tracing::info!(delay_ms = self.config.skip_delay.as_millis() as u64, "Skipping");
        self.leave_lobby().await;
        publish(&self.state_tx, MatchSnapshot::default());
        self.restart_at = Some(Instant::now() + self.config.skip_delay);
    }

    async fn leave_lobby(&mut self) {
        if let Some(lobby) = self.lobby.take() {
            lobby.room.leave().await;
            tracing::debug!(
                ignored = lobby.cycle.ignored_count(),
                "Left lobby"
            );
        }
    }

    async fn on_lobby_event(&mut self, event: Option<RoomEvent>) {
        let Some(event) = event else {
            return self.on_lobby_closed().await;
        };
        let Some(lobby) = self.lobby.as_mut() else {
            return;
        };

        match event {
            RoomEvent::PeerJoined(peer) => {
                tracing::debug!(peer = %peer, "Peer joined lobby");
                if let Some(proposal) = lobby.cycle.on_peer_joined(&peer, Instant::now(), unix_millis()) {
                    tracing::info!(
                        peer = %peer,
                        session = %proposal.message.session(),
                        "Initiator, proposing match"
                    );
                    send_match(&lobby.room, proposal).await;
                } else if !lobby.cycle.is_matched() && !lobby.cycle.is_initiator_for(&peer) {
                    tracing::debug!(peer = %peer, "Waiting for peer to propose");
                }
            }
            RoomEvent::PeerLeft(peer) => {
                tracing::debug!(peer = %peer, "Peer left lobby");
                lobby.cycle.on_peer_left(&peer);
            }
            RoomEvent::Action { name, payload, from } => {
                if !MATCH_ACTION.matches(&name) {
                    tracing::debug!(action = %name, peer = %from, "Ignoring unknown lobby action");
                    return;
                }
                let message = match MATCH_ACTION.decode(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!(peer = %from, error = %e, "Dropping malformed match message");
                        return;
                    }
                };
                let kind = message.kind();

                match lobby.cycle.on_message(&from, message) {
                    Handled::Ignored(reason) => {
                        tracing::debug!(peer = %from, kind, reason, "Ignoring match message");
                    }
                    Handled::Matched { reply } => {
                        if let Some(reply) = reply {
                            send_match(&lobby.room, reply).await;
                        }
                        lobby.leave_at = Some(Instant::now() + self.config.match_grace);

                        if let Some(outcome) = lobby.cycle.outcome() {
                            tracing::info!(
                                peer = %outcome.remote_peer,
                                session = %outcome.session,
                                initiator = outcome.is_initiator,
                                "Matched"
                            );
                            publish(&self.state_tx, MatchSnapshot::matched(outcome));
                        }
                    }
                }
            }
            RoomEvent::PeerStream { .. } | RoomEvent::StreamRemoved { .. } => {}
        }
    }

    async fn on_lobby_closed(&mut self) {
        let Some(lobby) = self.lobby.take() else {
            return;
        };
        lobby.room.leave().await;

        if lobby.cycle.is_matched() {
            return;
        }
        tracing::error!("Lobby membership closed by transport");
        publish(&self.state_tx, MatchSnapshot::with_state(MatchState::Error));
    }

    async fn expire_proposals(&mut self) {
        let Some(lobby) = self.lobby.as_mut() else {
            return;
        };
        for retry in lobby.cycle.expire_proposals(Instant::now(), unix_millis()) {
            tracing::info!(
                peer = %retry.to,
                session = %retry.message.session(),
                "Proposal unanswered, proposing again"
            );
            send_match(&lobby.room, retry).await;
        }
    }
}

async fn send_match<R: RoomHandle>(room: &R, outgoing: Outgoing) {
    if let Err(e) = MATCH_ACTION
        .send(room, &outgoing.message, Some(&outgoing.to))
        .await
    {
        if e.is_benign() {
            tracing::debug!(peer = %outgoing.to, error = %e, "Match message not delivered");
        } else {
            tracing::warn!(peer = %outgoing.to, error = %e, "Failed to send match message");
        }
    }
}

/// Replace the snapshot, notifying watchers only on change
fn publish(state_tx: &watch::Sender<MatchSnapshot>, snapshot: MatchSnapshot) -> bool {
    state_tx.send_if_modified(|current| {
        if *current == snapshot {
            return false;
        }
        *current = snapshot;
        true
    })
}

async fn next_event<R>(lobby: &mut Option<Lobby<R>>) -> Option<RoomEvent> {
    match lobby {
        Some(lobby) => lobby.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ParticipantId, SessionIdentity};
    use crate::transport::MemoryHub;
    use std::time::Duration;

    struct NoIdentity;

    impl IdentityProvider for NoIdentity {
        fn participant_id(&self) -> Option<ParticipantId> {
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_idle() {
        let config = RendezvousConfig::default();
        let hub = MemoryHub::new();
        let matchmaker = Matchmaker::spawn(hub.client(&config, "aaa"), Arc::new(SessionIdentity::new()), config);

        assert_eq!(matchmaker.snapshot(), MatchSnapshot::default());
        matchmaker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_noop() {
        let config = RendezvousConfig::default();
        let hub = MemoryHub::new();
        let matchmaker = Matchmaker::spawn(hub.client(&config, "aaa"), Arc::new(SessionIdentity::new()), config);
        let updates = matchmaker.subscribe();

        matchmaker.stop_searching();
        matchmaker.stop_searching();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!updates.has_changed().unwrap());
        assert_eq!(matchmaker.snapshot().state, MatchState::Idle);
        matchmaker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_identity_stays_idle() {
        let config = RendezvousConfig::default();
        let hub = MemoryHub::new();
        let matchmaker = Matchmaker::spawn(hub.client(&config, "aaa"), Arc::new(NoIdentity), config.clone());

        matchmaker.start_searching();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(matchmaker.snapshot().state, MatchState::Idle);
        assert!(hub.room_stats(&config.app_id, &config.lobby_room).await.is_none());
        matchmaker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_lobby() {
        let config = RendezvousConfig::default();
        let hub = MemoryHub::new();
        let matchmaker = Matchmaker::spawn(hub.client(&config, "aaa"), Arc::new(SessionIdentity::new()), config.clone());

        matchmaker.start_searching();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(matchmaker.snapshot().state, MatchState::Searching);
        assert!(hub.room_stats(&config.app_id, &config.lobby_room).await.is_some());

        matchmaker.shutdown().await;
        assert!(hub.room_stats(&config.app_id, &config.lobby_room).await.is_none());
    }
}
