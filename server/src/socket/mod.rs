mod connection;
pub mod frames;

pub use connection::ws_handler;

use tokio::sync::mpsc;

/// Messages queued for a connection's writer task. Each connection owns
/// one unbounded channel; peer writes never block the room's critical
/// section, and a failed send just means the peer is already gone.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// A serialized JSON frame.
    Frame(String),
    /// Transport-level keepalive ping.
    Ping,
    /// Ask the writer to close the stream.
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outgoing>;
