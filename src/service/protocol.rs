// UDP discovery wire format
//
// One JSON object per datagram, discriminated by "type":
//   {"type": "discovery"}
//   {"type": "announcement_request"}
//   {"type": "version_request"}
//   {"type": "response", "ip": "...", "announcement": {...}|null, "version_info": {...}|null}

use serde::{Deserialize, Serialize};

use crate::config::constants::MAX_DATAGRAM_BYTES;
use crate::messages::Announcement;
use crate::store::VersionInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryPacket {
    Discovery,
    AnnouncementRequest,
    VersionRequest,
    Response {
        ip: String,
        #[serde(default)]
        announcement: Option<Announcement>,
        #[serde(default)]
        version_info: Option<VersionInfo>,
    },
}

impl DiscoveryPacket {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Encode a reply that fits in one datagram.
    ///
    /// Oversized responses shed the announcement body first, then the whole
    /// announcement, then the version info. Clients get the full records by
    /// polling.
    pub fn encode_for_datagram(mut self) -> serde_json::Result<Vec<u8>> {
        loop {
            let bytes = self.encode()?;
            if bytes.len() <= MAX_DATAGRAM_BYTES {
                return Ok(bytes);
            }
            tracing::warn!(size = bytes.len(), limit = MAX_DATAGRAM_BYTES, "Discovery reply too large, trimming");
            if !self.shrink() {
                return Ok(bytes);
            }
        }
    }

    fn shrink(&mut self) -> bool {
        let DiscoveryPacket::Response {
            announcement,
            version_info,
            ..
        } = self
        else {
            return false;
        };
        if let Some(ann) = announcement.as_mut() {
            if !ann.content.is_empty() {
                ann.content.clear();
                return true;
            }
        }
        if announcement.take().is_some() {
            return true;
        }
        version_info.take().is_some()
    }

    /// Parse a datagram. Oversized or malformed input yields `None`.
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        if datagram.len() > MAX_DATAGRAM_BYTES {
            return None;
        }
        serde_json::from_slice(datagram).ok()
    }

    pub fn is_request(&self) -> bool {
        !matches!(self, DiscoveryPacket::Response { .. })
    }
}
