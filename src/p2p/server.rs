use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use super::message::P2PMessage;
use crate::blockchain::Transaction;
use crate::node::Node;

/// Errors raised by the peer transport
#[derive(Debug, Error)]
pub enum P2PError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// A connected peer, reachable through its writer task
#[derive(Debug)]
struct PeerConnection {
    address: String,
    outbound: mpsc::UnboundedSender<P2PMessage>,
}

/// Replicates the local ledger with peers over WebSocket
///
/// Every connection, inbound or outbound, is treated the same: the local
/// chain is sent as soon as it opens, and every CHAIN message received on
/// it is offered to the node.
#[derive(Debug)]
pub struct P2PServer {
    node: Arc<Node>,
    peers: DashMap<Uuid, PeerConnection>,
}

impl P2PServer {
    pub fn new(node: Arc<Node>) -> Self {
        P2PServer {
            node,
            peers: DashMap::new(),
        }
    }

    /// Accepts peer connections on `addr` until the listener fails
    pub async fn listen(self: Arc<Self>, addr: String) -> Result<(), P2PError> {
        let listener = TcpListener::bind(&addr).await?;
        info!("Listening for peer-to-peer connections on: {}", addr);

        loop {
            let (stream, remote) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(socket) => server.connect_socket(socket, remote.to_string()).await,
                    Err(err) => warn!("WebSocket handshake with {} failed: {}", remote, err),
                }
            });
        }
    }

    /// Dials every peer URL in the background
    pub fn connect_to_peers(self: &Arc<Self>, peers: &[String]) {
        for peer in peers {
            let server = self.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                if let Err(err) = server.connect_to_peer(&peer).await {
                    warn!("Failed to connect to peer {}: {}", peer, err);
                }
            });
        }
    }

    /// Dials a single peer and serves the connection until it closes
    pub async fn connect_to_peer(self: Arc<Self>, url: &str) -> Result<(), P2PError> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        self.connect_socket(socket, url.to_string()).await;
        Ok(())
    }

    async fn connect_socket<S>(self: Arc<Self>, socket: WebSocketStream<S>, address: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = socket.split();
        let (peer_id, mut outbound) = self.register_peer(address.clone());

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("Failed to encode peer message: {}", err);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_text(peer_id, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("Connection to {} failed: {}", address, err);
                    break;
                }
            }
        }

        self.remove_peer(peer_id);
        writer.abort();
    }

    /// Adds a peer and queues the local chain for it
    ///
    /// Returns the peer id and the stream of messages to deliver to it.
    fn register_peer(&self, address: String) -> (Uuid, mpsc::UnboundedReceiver<P2PMessage>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let _ = outbound.send(P2PMessage::Chain {
            chain: self.node.chain(),
        });
        info!("Socket connected: {}", address);
        self.peers.insert(id, PeerConnection { address, outbound });

        (id, receiver)
    }

    fn remove_peer(&self, id: Uuid) {
        if let Some((_, peer)) = self.peers.remove(&id) {
            info!("Socket disconnected: {}", peer.address);
        }
    }

    async fn handle_text(&self, peer: Uuid, text: &str) {
        match P2PMessage::from_json(text) {
            Ok(message) => self.handle_message(peer, message).await,
            Err(err) => warn!("Ignoring malformed peer message: {}", err),
        }
    }

    async fn handle_message(&self, peer: Uuid, message: P2PMessage) {
        match message {
            P2PMessage::Chain { chain } => {
                // validating and saving a replacement chain are blocking work
                let node = self.node.clone();
                match tokio::task::spawn_blocking(move || node.receive_chain(chain)).await {
                    Ok(outcome) => debug!("Chain from peer {}: {:?}", peer, outcome),
                    Err(err) => error!("Chain from peer {} could not be applied: {}", peer, err),
                }
            }
            P2PMessage::Transaction { transaction } => {
                debug!(
                    "Transaction from peer {}: {:?} -> {}",
                    peer, transaction.from_address, transaction.to_address
                );
            }
        }
    }

    /// Queues `message` for every connected peer
    pub fn broadcast(&self, message: P2PMessage) {
        let mut closed = Vec::new();
        for peer in self.peers.iter() {
            if peer.outbound.send(message.clone()).is_err() {
                closed.push(*peer.key());
            }
        }
        for id in closed {
            self.remove_peer(id);
        }
    }

    /// Sends the local chain to every peer
    pub fn broadcast_chain(&self) {
        self.broadcast(P2PMessage::Chain {
            chain: self.node.chain(),
        });
    }

    pub fn broadcast_transaction(&self, transaction: Transaction) {
        self.broadcast(P2PMessage::Transaction { transaction });
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.peers.iter().map(|peer| peer.address.clone()).collect();
        addresses.sort();
        addresses
    }
}
