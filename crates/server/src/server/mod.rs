//! Game server implementation.

use crate::collaborators::Collaborators;
use crate::config::Config;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use protocol::packets::ServerMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub mod client;
pub mod game;

pub use game::{GameState, PendingBroadcasts, run_game_loop, unix_millis};

/// World state update broadcast (sent every tick).
///
/// The snapshot is identical for every client, so it is encoded once.
#[derive(Debug, Clone)]
pub struct WorldUpdateBroadcast {
    pub tick: u64,
    pub is_delta: bool,
    /// Encoded `ServerMessage::WorldSnapshot`.
    pub payload: Bytes,
}

/// A message for one client, or for everyone when `client_id` is `None`.
#[derive(Debug, Clone)]
pub struct TargetedMessage {
    pub client_id: Option<u32>,
    pub message: ServerMessage,
}

impl TargetedMessage {
    #[inline]
    pub fn is_for(&self, client_id: u32) -> bool {
        self.client_id.is_none_or(|id| id == client_id)
    }
}

/// Connection tracking state (shared across connection handlers).
#[derive(Debug, Default)]
struct ConnectionState {
    total_connections: AtomicUsize,
}

impl ConnectionState {
    /// Try to add a connection, returns true if allowed.
    fn try_add_connection(&self, max_total: usize) -> bool {
        self.total_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_total).then_some(n + 1)
            })
            .is_ok()
    }

    fn remove_connection(&self) {
        let _ = self
            .total_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Run the game server with the default collaborators.
pub async fn run(config: Config) -> anyhow::Result<()> {
    run_with(config, Collaborators::default()).await
}

/// Run the game server.
pub async fn run_with(config: Config, collaborators: Collaborators) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}", addr);

    let capacity = config.server.broadcast_capacity.max(1);
    let (world_tx, _world_rx) = broadcast::channel::<WorldUpdateBroadcast>(capacity);
    let (targeted_tx, _targeted_rx) = broadcast::channel::<TargetedMessage>(capacity * 8);

    // Shared game state
    let game_state = Arc::new(RwLock::new(GameState::new(
        &config,
        collaborators,
        world_tx.clone(),
        targeted_tx.clone(),
    )));

    // Start the game loop
    let game_loop_state = Arc::clone(&game_state);
    let tick_interval = config.tick_interval_ms();
    tokio::spawn(async move {
        run_game_loop(game_loop_state, tick_interval).await;
    });

    let conn_state = Arc::new(ConnectionState::default());
    let max_connections = config.server.max_connections;

    loop {
        let (stream, addr) = listener.accept().await?;

        if !conn_state.try_add_connection(max_connections) {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        }

        let game_state = Arc::clone(&game_state);
        let conn_state = Arc::clone(&conn_state);
        let world_rx = world_tx.subscribe();
        let targeted_rx = targeted_tx.subscribe();

        tokio::spawn(async move {
            let result = handle_connection(stream, addr, game_state, world_rx, targeted_rx).await;
            conn_state.remove_connection();
            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    game_state: Arc<RwLock<GameState>>,
    mut world_rx: broadcast::Receiver<WorldUpdateBroadcast>,
    mut targeted_rx: broadcast::Receiver<TargetedMessage>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New connection from {}", addr);

    let (mut write, mut read) = ws_stream.split();

    let client_id = {
        let mut state = game_state.write().await;
        state.add_client(addr)
    };

    let result: anyhow::Result<()> = async {
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let replies = {
                                let mut state = game_state.write().await;
                                state.handle_packet(client_id, &data, unix_millis())
                            };
                            match replies {
                                Ok(replies) => {
                                    for reply in replies {
                                        write.send(Message::Binary(reply.encode().finish())).await?;
                                    }
                                }
                                Err(e) => warn!("Packet error from {}: {}", addr, e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            error!("WebSocket error from {}: {}", addr, e);
                            break;
                        }
                        _ => {}
                    }
                }

                world_msg = world_rx.recv() => {
                    match world_msg {
                        Ok(update) => {
                            write.send(Message::Binary(update.payload)).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("Client {} skipped {} world updates", client_id, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                targeted = targeted_rx.recv() => {
                    match targeted {
                        Ok(message) if message.is_for(client_id) => {
                            write.send(Message::Binary(message.message.encode().finish())).await?;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Client {} missed {} targeted messages", client_id, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    {
        let mut state = game_state.write().await;
        state.remove_client(client_id, unix_millis());
    }
    info!("Client {} ({}) disconnected", client_id, addr);
    result
}
