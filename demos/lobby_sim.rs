//! Lobby simulation over the in-memory hub
//!
//! Run with: cargo run --example lobby_sim [PEERS]
//!
//! Examples:
//!   cargo run --example lobby_sim          # 6 peers
//!   cargo run --example lobby_sim 7        # odd count, one peer keeps searching
//!
//! Spawns one matchmaker per simulated client, lets them all search at once
//! and prints the resulting pairs. Every pair then joins its session channel
//! and exchanges a camera stream and one chat line.

use std::sync::Arc;
use std::time::Duration;

use devgle::transport::MemoryTransport;
use devgle::{
    ChatChannel, MatchState, Matchmaker, MediaStream, MemoryHub, PresenceCounter,
    RendezvousConfig, SessionIdentity, SessionTransport,
};

const DEFAULT_PEERS: usize = 6;

struct Client {
    transport: MemoryTransport,
    identity: Arc<SessionIdentity>,
    matchmaker: Matchmaker,
}

fn print_usage() {
    println!("Usage: lobby_sim [PEERS]");
    println!();
    println!("Arguments:");
    println!("  PEERS   Number of simulated clients (default: {})", DEFAULT_PEERS);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let peers = match args.get(1) {
        Some(count) => count.parse::<usize>()?,
        None => DEFAULT_PEERS,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devgle=info".parse()?)
                .add_directive("lobby_sim=info".parse()?),
        )
        .init();

    let config = RendezvousConfig::default();
    config.validate()?;
    let hub = MemoryHub::new();

    let mut clients = Vec::with_capacity(peers);
    let mut presence = Vec::with_capacity(peers);
    for _ in 0..peers {
        let transport = hub.random_client(&config);
        let identity = Arc::new(SessionIdentity::new());
        presence.push(PresenceCounter::start(&transport, &config).await);
        let matchmaker = Matchmaker::spawn(transport.clone(), identity.clone(), config.clone());
        clients.push(Client {
            transport,
            identity,
            matchmaker,
        });
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Some(counter) = presence.first() {
        tracing::info!(online = counter.count(), "Presence settled");
    }

    for client in &clients {
        client.matchmaker.start_searching();
    }
    tokio::time::sleep(config.match_grace + Duration::from_millis(100)).await;

    let mut sessions = Vec::new();
    for client in &clients {
        let snapshot = client.matchmaker.snapshot();
        let participant = client.identity.get();

        let (MatchState::Matched, Some(room_id)) = (snapshot.state, snapshot.room_id.clone()) else {
            tracing::info!(participant = %participant.short(), state = ?snapshot.state, "Unmatched");
            continue;
        };

        println!(
            "{} matched {} on {} (initiator: {})",
            participant.short(),
            snapshot.remote_peer_id.map(|p| p.to_string()).unwrap_or_default(),
            room_id,
            snapshot.is_initiator
        );

        let mut session = SessionTransport::new(client.transport.clone());
        session
            .connect(&room_id, snapshot.is_initiator, Some(MediaStream::camera()))
            .await;
        let chat = ChatChannel::open(&client.transport, &config, &room_id, participant.clone()).await;
        sessions.push((participant.clone(), session, chat));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    for (participant, _, chat) in &sessions {
        chat.send(&format!("hello from {}", participant.short())).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    for (participant, session, chat) in &sessions {
        let state = session.snapshot();
        tracing::info!(
            participant = %participant.short(),
            state = ?state.connection_state,
            remote_streams = state.remote_streams.len(),
            chat_messages = chat.messages().len(),
            "Session"
        );
    }

    for (_, mut session, mut chat) in sessions {
        chat.close().await;
        session.disconnect().await;
    }
    for client in clients {
        client.matchmaker.shutdown().await;
    }
    for mut counter in presence {
        counter.leave().await;
    }

    Ok(())
}
