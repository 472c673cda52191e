//! Peer-to-peer gossip and catch-up over short-lived TCP connections.

pub mod message;
pub mod node;
pub mod peers;

pub use message::{Envelope, Message};
pub use node::Node;
pub use peers::PeerDirectory;
