//! Online presence counter
//!
//! Every running client keeps a membership in the presence channel, so the
//! number of online users is the number of remote members plus one.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RendezvousConfig;
use crate::transport::{PeerId, RoomEvent, RoomEvents, RoomHandle, Transport};

/// Approximate count of online users
pub struct PresenceCounter<T: Transport> {
    room: Option<Arc<T::Room>>,
    count: watch::Receiver<usize>,
    pump: Option<JoinHandle<()>>,
}

impl<T: Transport> PresenceCounter<T> {
    /// Join the presence channel
    ///
    /// Never fails; if the channel cannot be joined the count stays at 1.
    pub async fn start(transport: &T, config: &RendezvousConfig) -> Self {
        let (count_tx, count) = watch::channel(1);

        match transport.join(&config.presence_room).await {
            Ok((room, events)) => {
                tracing::info!(room = %config.presence_room, self_id = %room.self_id(), "Joined presence channel");
                let pump = tokio::spawn(track_presence(events, count_tx));
                Self {
                    room: Some(Arc::new(room)),
                    count,
                    pump: Some(pump),
                }
            }
            Err(e) => {
                tracing::error!(room = %config.presence_room, error = %e, "Failed to join presence channel");
                Self {
                    room: None,
                    count,
                    pump: None,
                }
            }
        }
    }

    /// Online users, including this one
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Watch the count
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.clone()
    }

    /// Release the presence membership. Idempotent.
    pub async fn leave(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(room) = self.room.take() {
            room.leave().await;
            tracing::debug!(room = %room.name(), "Left presence channel");
        }
    }
}

impl<T: Transport> Drop for PresenceCounter<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(room) = self.room.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { room.leave().await });
            }
        }
    }
}

async fn track_presence(mut events: RoomEvents, count_tx: watch::Sender<usize>) {
    let mut online: HashSet<PeerId> = HashSet::new();

    while let Some(event) = events.recv().await {
        let changed = match event {
            RoomEvent::PeerJoined(peer) => online.insert(peer),
            RoomEvent::PeerLeft(peer) => online.remove(&peer),
            _ => false,
        };

        if changed {
            let count = online.len() + 1;
            count_tx.send_replace(count);
            tracing::debug!(online = count, "Presence changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryHub;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_remote_members() {
        let config = RendezvousConfig::default();
        let hub = MemoryHub::new();

        let a = hub.client(&config, "aaa");
        let counter = PresenceCounter::start(&a, &config).await;
        assert_eq!(counter.count(), 1);

        let b = hub.client(&config, "bbb");
        let c = hub.client(&config, "ccc");
        let mut counter_b = PresenceCounter::start(&b, &config).await;
        let _counter_c = PresenceCounter::start(&c, &config).await;
        settle().await;
        assert_eq!(counter.count(), 3);
        assert_eq!(counter_b.count(), 3);

        counter_b.leave().await;
        counter_b.leave().await;
        settle().await;
        assert_eq!(counter.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_failure_counts_self() {
        let config = RendezvousConfig::default();
        let hub = MemoryHub::new();
        hub.set_available(false);

        let a = hub.client(&config, "aaa");
        let mut counter = PresenceCounter::start(&a, &config).await;
        assert_eq!(counter.count(), 1);
        counter.leave().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_membership() {
        let config = RendezvousConfig::default();
        let hub = MemoryHub::new();

        let a = hub.client(&config, "aaa");
        let counter = PresenceCounter::start(&a, &config).await;
        drop(counter);
        settle().await;

        assert!(hub.room_stats(&config.app_id, &config.presence_room).await.is_none());
    }
}
