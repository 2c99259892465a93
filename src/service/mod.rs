// LAN discovery over UDP broadcast
//
// Responder runs next to the update server; the client side finds servers
// and receives their current snapshot without waiting for a poll.

pub mod discovery_client;
pub mod protocol;
pub mod responder;

pub use discovery_client::{DiscoveryClient, DiscoveryPeer};
pub use protocol::DiscoveryPacket;
pub use responder::{detect_local_ip, DiscoveryResponder};
