// Discovery responder (server side)
//
// Answers discovery packets on the UDP port with a snapshot of the store.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::protocol::DiscoveryPacket;
use crate::config::constants::MAX_DATAGRAM_BYTES;
use crate::errors::ServerError;
use crate::store::MessageStore;

pub struct DiscoveryResponder {
    socket: UdpSocket,
    store: Arc<MessageStore>,
    local_ip: IpAddr,
}

impl DiscoveryResponder {
    pub async fn bind(addr: SocketAddr, store: Arc<MessageStore>) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailure {
                kind: "UDP",
                addr,
                source,
            })?;
        if let Err(e) = socket.set_broadcast(true) {
            tracing::warn!("Failed to set SO_BROADCAST: {e}");
        }

        let local_ip = detect_local_ip();
        tracing::info!(%addr, %local_ip, "Discovery responder listening");
        Ok(Self {
            socket,
            store,
            local_ip,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The reply for one incoming packet, if any.
    pub fn reply_for(&self, packet: &DiscoveryPacket) -> Option<DiscoveryPacket> {
        let ip = self.local_ip.to_string();
        match packet {
            DiscoveryPacket::Discovery => Some(DiscoveryPacket::Response {
                ip,
                announcement: self.store.latest_announcement(),
                version_info: self.store.latest_version(),
            }),
            DiscoveryPacket::AnnouncementRequest => Some(DiscoveryPacket::Response {
                ip,
                announcement: self.store.latest_announcement(),
                version_info: None,
            }),
            DiscoveryPacket::VersionRequest => Some(DiscoveryPacket::Response {
                ip,
                announcement: None,
                version_info: self.store.latest_version(),
            }),
            // Our own broadcasts and other servers' replies.
            DiscoveryPacket::Response { .. } => None,
        }
    }

    /// Receive loop; returns when `cancel` fires or the socket fails.
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((n, src)) => self.handle_datagram(&buf[..n], src).await,
                        Err(e) => {
                            tracing::error!("UDP recv error: {e}");
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!("Discovery responder stopped");
    }

    async fn handle_datagram(&self, datagram: &[u8], src: SocketAddr) {
        let Some(packet) = DiscoveryPacket::decode(datagram) else {
            tracing::debug!(%src, len = datagram.len(), "Ignoring malformed discovery datagram");
            return;
        };
        let Some(reply) = self.reply_for(&packet) else {
            return;
        };
        let bytes = match reply.encode_for_datagram() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to encode discovery reply: {e}");
                return;
            }
        };
        match self.socket.send_to(&bytes, src).await {
            Ok(_) => tracing::debug!(%src, ?packet, "Answered discovery packet"),
            Err(e) => tracing::warn!(%src, "Failed to send discovery reply: {e}"),
        }
    }
}

/// Primary LAN address: the source address the OS picks for an outbound
/// route. Nothing is sent. Falls back to loopback.
pub fn detect_local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn responder(dir: &TempDir) -> DiscoveryResponder {
        let store = Arc::new(MessageStore::open(dir.path()).unwrap());
        DiscoveryResponder::bind("127.0.0.1:0".parse().unwrap(), store)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_discovery_reply_carries_both_fields() {
        let dir = TempDir::new().unwrap();
        let responder = responder(&dir).await;
        let file = dir.path().join("app.bin");
        std::fs::write(&file, b"bin").unwrap();
        responder.store.append_announcement("Hi", "there", "1.0").unwrap();
        responder.store.publish_version("1.0", &file, "").unwrap();

        match responder.reply_for(&DiscoveryPacket::Discovery) {
            Some(DiscoveryPacket::Response {
                announcement,
                version_info,
                ..
            }) => {
                assert_eq!(announcement.unwrap().title, "Hi");
                assert_eq!(version_info.unwrap().version, "1.0");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_targeted_requests_carry_one_field() {
        let dir = TempDir::new().unwrap();
        let responder = responder(&dir).await;
        responder.store.append_announcement("Hi", "", "1.0").unwrap();

        match responder.reply_for(&DiscoveryPacket::VersionRequest) {
            Some(DiscoveryPacket::Response {
                announcement,
                version_info,
                ..
            }) => {
                assert!(announcement.is_none());
                assert!(version_info.is_none());
            }
            other => panic!("unexpected reply {:?}", other),
        }
        match responder.reply_for(&DiscoveryPacket::AnnouncementRequest) {
            Some(DiscoveryPacket::Response { announcement, .. }) => {
                assert!(announcement.is_some())
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_responses_are_not_answered() {
        let dir = TempDir::new().unwrap();
        let responder = responder(&dir).await;
        let packet = DiscoveryPacket::Response {
            ip: "10.0.0.9".to_string(),
            announcement: None,
            version_info: None,
        };
        assert!(responder.reply_for(&packet).is_none());
    }

    #[test]
    fn test_detect_local_ip_never_unspecified() {
        assert!(!detect_local_ip().is_unspecified());
    }
}
