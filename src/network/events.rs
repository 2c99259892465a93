// Client-side events delivered to UI/CLI subscribers

use crate::messages::Announcement;
use crate::service::DiscoveryPeer;
use crate::store::VersionInfo;

/// Capacity of the broadcast channel; slow subscribers see `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The current announcement changed (`None` after a retraction).
    AnnouncementChanged(Option<Announcement>),
    /// The server's version list changed; newest first.
    VersionsChanged(Vec<VersionInfo>),
    /// A discovery reply arrived.
    PeerDiscovered(DiscoveryPeer),
    /// A scheduled poll failed; it is retried on the next tick.
    PollFailed(String),
}
