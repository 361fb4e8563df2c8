//! UDP responder that tells displays where to bootstrap from.

use std::net::SocketAddr;

use serde_json::json;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pihome_config::DiscoveryConfig;

use crate::error::DaemonError;

const MAX_DATAGRAM: usize = 4096;

/// Path appended to the public base URL in the reply.
const BOOTSTRAP_PATH: &str = "/api/displays/bootstrap/";

pub struct DiscoveryResponder {
    socket: UdpSocket,
    probe: Vec<u8>,
    reply: Vec<u8>,
}

impl DiscoveryResponder {
    pub async fn bind(config: &DiscoveryConfig) -> Result<Self, DaemonError> {
        let addr = format!("{}:{}", config.bind, config.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|e| DaemonError::DiscoveryBind {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        // Displays probe with a broadcast datagram.
        socket.set_broadcast(true)?;

        let reply = json!({ "bootstrap": bootstrap_url(&config.public_base_url) });
        Ok(Self {
            socket,
            probe: config.probe.trim().as_bytes().to_vec(),
            reply: reply.to_string().into_bytes(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DaemonError> {
        Ok(self.socket.local_addr()?)
    }

    /// The reply for `payload`, if it is a probe.
    pub fn reply_for(&self, payload: &[u8]) -> Option<&[u8]> {
        (payload.trim_ascii() == self.probe.as_slice()).then_some(self.reply.as_slice())
    }

    /// Answer probes until cancelled. Receive and send errors are logged
    /// and the loop keeps going.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        info!(addr = ?self.socket.local_addr().ok(), "Discovery responder listening");
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Discovery receive failed: {}", e);
                        continue;
                    }
                },
            };

            let Some(reply) = self.reply_for(&buf[..len]) else {
                debug!(%peer, len, "Ignoring non-probe datagram");
                continue;
            };
            match self.socket.send_to(reply, peer).await {
                Ok(_) => debug!(%peer, "Answered discovery probe"),
                Err(e) => warn!(%peer, "Discovery reply failed: {}", e),
            }
        }
        info!("Discovery responder stopped");
        Ok(())
    }
}

pub fn bootstrap_url(public_base_url: &str) -> String {
    format!("{}{}", public_base_url.trim_end_matches('/'), BOOTSTRAP_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_config() -> DiscoveryConfig {
        DiscoveryConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
            public_base_url: "http://pihome.lan:8000/".to_string(),
            ..DiscoveryConfig::default()
        }
    }

    #[test]
    fn test_bootstrap_url() {
        assert_eq!(
            bootstrap_url("http://localhost:8000"),
            "http://localhost:8000/api/displays/bootstrap/"
        );
        assert_eq!(
            bootstrap_url("http://pihome.lan/"),
            "http://pihome.lan/api/displays/bootstrap/"
        );
    }

    #[tokio::test]
    async fn test_reply_for_probe_only() {
        let responder = DiscoveryResponder::bind(&local_config()).await.unwrap();
        assert!(responder.reply_for(b"EINK_DISCOVER").is_some());
        assert!(responder.reply_for(b"  EINK_DISCOVER\n").is_some());
        assert!(responder.reply_for(b"EINK_DISCOVER_PLEASE").is_none());
        assert!(responder.reply_for(b"").is_none());
    }

    #[tokio::test]
    async fn test_answers_probe_over_udp() {
        let responder = DiscoveryResponder::bind(&local_config()).await.unwrap();
        let addr = responder.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(responder.run(cancel.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hello", addr).await.unwrap();
        client.send_to(b"EINK_DISCOVER\n", addr).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(
            reply,
            json!({"bootstrap": "http://pihome.lan:8000/api/displays/bootstrap/"})
        );

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = DiscoveryConfig {
            port: taken.local_addr().unwrap().port(),
            ..local_config()
        };
        let result = DiscoveryResponder::bind(&config).await;
        assert!(matches!(result, Err(DaemonError::DiscoveryBind { .. })));
    }
}
