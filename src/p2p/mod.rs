// Peer-to-peer replication
//
// Peers exchange JSON envelopes over WebSocket and converge on the longest
// structurally valid chain.

pub mod message;
pub mod server;
pub mod sync;

pub use server::P2PServer;
