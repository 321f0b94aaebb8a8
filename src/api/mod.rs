// API module
//
// HTTP shell of the node: ledger queries, submission, mining and peer
// management

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
