// Integration tests for UDP discovery (loopback only)

use anyhow::Result;
use herald::config::{ClientConfig, ServerConfig};
use herald::network::ClientEvent;
use herald::server::UpdateServer;
use herald::service::{DiscoveryClient, DiscoveryPacket};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;

async fn start_server(dir: &TempDir) -> Result<(UpdateServer, u16)> {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        udp_port: 0,
        storage_dir: dir.path().join("updates"),
        discovery_enabled: true,
    };
    let server = UpdateServer::new(config)?;
    let addrs = server.start().await?;
    let udp = addrs.udp.expect("discovery enabled").port();
    Ok((server, udp))
}

fn client_config(udp_port: u16) -> ClientConfig {
    ClientConfig {
        discovery_target: "127.0.0.1".to_string(),
        udp_port,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_discovery_returns_snapshot() -> Result<()> {
    let dir = TempDir::new()?;
    let (server, udp_port) = start_server(&dir).await?;
    let artifact = dir.path().join("app.bin");
    std::fs::write(&artifact, b"bin")?;
    let ann = server.publish_announcement("Hello LAN", "", "1.0")?;
    server.publish_version("1.0", &artifact, "")?;

    let (tx, mut rx) = tokio::sync::broadcast::channel(8);
    let client = DiscoveryClient::bind(&client_config(udp_port), tx).await?;
    let peers = client.discover(Duration::from_millis(500)).await?;

    assert_eq!(peers.len(), 1);
    let peer = &peers[0];
    assert_eq!(peer.announcement.as_ref().map(|a| a.id), Some(ann.id()));
    assert_eq!(peer.version_info.as_ref().map(|v| v.version.as_str()), Some("1.0"));
    assert!(!peer.ip.is_empty());
    assert!(matches!(rx.try_recv(), Ok(ClientEvent::PeerDiscovered(_))));

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_large_announcement_still_discoverable() -> Result<()> {
    let dir = TempDir::new()?;
    let (server, udp_port) = start_server(&dir).await?;
    let ann = server.publish_announcement("Release notes", &"n".repeat(9000), "1.0")?;

    let (tx, _rx) = tokio::sync::broadcast::channel(8);
    let client = DiscoveryClient::bind(&client_config(udp_port), tx).await?;
    let peers = client.discover(Duration::from_millis(800)).await?;

    assert_eq!(peers.len(), 1);
    let announcement = peers[0].announcement.as_ref().expect("announcement kept");
    assert_eq!(announcement.id, ann.id());
    assert_eq!(announcement.title, "Release notes");
    assert!(announcement.content.is_empty());

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_targeted_requests() -> Result<()> {
    let dir = TempDir::new()?;
    let (server, udp_port) = start_server(&dir).await?;
    server.publish_announcement("Only this", "", "1.0")?;

    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let target = ("127.0.0.1", udp_port);
    let mut buf = vec![0u8; 8192];

    socket
        .send_to(&DiscoveryPacket::AnnouncementRequest.encode()?, target)
        .await?;
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    match DiscoveryPacket::decode(&buf[..n]) {
        Some(DiscoveryPacket::Response {
            announcement,
            version_info,
            ..
        }) => {
            assert_eq!(announcement.unwrap().title, "Only this");
            assert!(version_info.is_none());
        }
        other => panic!("unexpected reply {:?}", other),
    }

    socket
        .send_to(&DiscoveryPacket::VersionRequest.encode()?, target)
        .await?;
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    match DiscoveryPacket::decode(&buf[..n]) {
        Some(DiscoveryPacket::Response { announcement, .. }) => assert!(announcement.is_none()),
        other => panic!("unexpected reply {:?}", other),
    }

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_malformed_datagram_is_ignored() -> Result<()> {
    let dir = TempDir::new()?;
    let (server, udp_port) = start_server(&dir).await?;

    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(b"{\"type\": \"nonsense\"", ("127.0.0.1", udp_port)).await?;
    socket
        .send_to(&DiscoveryPacket::Discovery.encode()?, ("127.0.0.1", udp_port))
        .await?;

    // Only the valid packet is answered, and the responder is still alive.
    let mut buf = vec![0u8; 8192];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    assert!(matches!(
        DiscoveryPacket::decode(&buf[..n]),
        Some(DiscoveryPacket::Response { .. })
    ));

    server.stop().await;
    Ok(())
}
