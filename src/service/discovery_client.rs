// Discovery client
//
// Broadcasts discovery/query packets and collects responses from update
// servers on the LAN. Best effort only: no correlation ids, no retries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::DiscoveryPacket;
use crate::config::constants::MAX_DATAGRAM_BYTES;
use crate::config::ClientConfig;
use crate::messages::Announcement;
use crate::network::ClientEvent;
use crate::store::VersionInfo;

/// An update server that answered us, with the snapshot it sent last.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryPeer {
    /// LAN address the server reported for itself
    pub ip: String,
    /// Address the reply actually came from
    pub addr: SocketAddr,
    pub announcement: Option<Announcement>,
    pub version_info: Option<VersionInfo>,
    pub last_seen: DateTime<Utc>,
}

struct Inner {
    socket: UdpSocket,
    target: SocketAddr,
    peers: DashMap<SocketAddr, DiscoveryPeer>,
    events: broadcast::Sender<ClientEvent>,
}

pub struct DiscoveryClient {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryClient {
    /// Bind an ephemeral broadcast-capable socket. Replies are published on `events`.
    pub async fn bind(config: &ClientConfig, events: broadcast::Sender<ClientEvent>) -> Result<Self> {
        let target = config.discovery_addr()?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("Failed to bind discovery client socket")?;
        socket
            .set_broadcast(true)
            .context("Failed to enable broadcast on discovery socket")?;

        tracing::debug!(broadcast = %target, local = ?socket.local_addr().ok(), "Discovery client ready");

        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                target,
                peers: DashMap::new(),
                events,
            }),
            cancel: CancellationToken::new(),
            listener: Mutex::new(None),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.inner.target
    }

    /// Start collecting replies in the background. Idempotent.
    pub fn start(&self) {
        let mut listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if listener.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        *listener = Some(tokio::spawn(receive_loop(inner, cancel)));
    }

    /// Stop the background receiver. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Discovery receiver ended abnormally: {e}");
            }
        }
    }

    pub async fn broadcast_discovery(&self) -> Result<()> {
        self.send(&DiscoveryPacket::Discovery).await
    }

    pub async fn request_announcement(&self) -> Result<()> {
        self.send(&DiscoveryPacket::AnnouncementRequest).await
    }

    pub async fn request_version(&self) -> Result<()> {
        self.send(&DiscoveryPacket::VersionRequest).await
    }

    async fn send(&self, packet: &DiscoveryPacket) -> Result<()> {
        let bytes = packet.encode()?;
        self.inner
            .socket
            .send_to(&bytes, self.inner.target)
            .await
            .with_context(|| format!("Failed to send discovery packet to {}", self.inner.target))?;
        tracing::debug!(to = %self.inner.target, ?packet, "Sent discovery packet");
        Ok(())
    }

    /// Broadcast once and collect whatever answers within `wait`.
    pub async fn discover(&self, wait: Duration) -> Result<Vec<DiscoveryPeer>> {
        self.start();
        self.broadcast_discovery().await?;
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(wait) => {}
        }
        Ok(self.peers())
    }

    /// Every peer heard from so far, most recently seen first.
    pub fn peers(&self) -> Vec<DiscoveryPeer> {
        let mut peers: Vec<DiscoveryPeer> = self
            .inner
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        peers
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = inner.socket.recv_from(&mut buf) => {
                match res {
                    Ok((n, src)) => inner.handle_datagram(&buf[..n], src),
                    Err(e) => {
                        tracing::error!("UDP recv error: {e}");
                        break;
                    }
                }
            }
        }
    }
}

impl Inner {
    fn handle_datagram(&self, datagram: &[u8], src: SocketAddr) {
        let Some(packet) = DiscoveryPacket::decode(datagram) else {
            tracing::debug!(%src, "Ignoring malformed discovery reply");
            return;
        };
        let DiscoveryPacket::Response {
            ip,
            announcement,
            version_info,
        } = packet
        else {
            return;
        };

        let peer = DiscoveryPeer {
            ip,
            addr: src,
            announcement,
            version_info,
            last_seen: Utc::now(),
        };
        tracing::info!(%src, ip = %peer.ip, "Discovered update server");
        self.peers.insert(src, peer.clone());
        // No receivers is fine.
        let _ = self.events.send(ClientEvent::PeerDiscovered(peer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config(port: u16) -> ClientConfig {
        ClientConfig {
            discovery_target: "127.0.0.1".to_string(),
            udp_port: port,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_replies_become_peers_and_events() {
        let fake_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = fake_server.local_addr().unwrap().port();
        let (tx, mut rx) = broadcast::channel(8);
        let client = DiscoveryClient::bind(&loopback_config(port), tx).await.unwrap();
        client.start();
        client.broadcast_discovery().await.unwrap();

        let mut buf = [0u8; 512];
        let (n, from) = fake_server.recv_from(&mut buf).await.unwrap();
        assert_eq!(DiscoveryPacket::decode(&buf[..n]), Some(DiscoveryPacket::Discovery));

        fake_server.send_to(b"garbage", from).await.unwrap();
        let reply = DiscoveryPacket::Response {
            ip: "192.168.1.50".to_string(),
            announcement: None,
            version_info: None,
        };
        fake_server.send_to(&reply.encode().unwrap(), from).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ClientEvent::PeerDiscovered(peer) => assert_eq!(peer.ip, "192.168.1.50"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(client.peers().len(), 1);
        client.stop().await;
        client.stop().await;
    }
}
