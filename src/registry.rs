use crate::net::request::{self, RequestErrorHandler};
use crate::net::NetError;
use crate::protocol::Command;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A registry member, unique by host+port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        PeerAddr {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Shared set of subscribed peers. One coarse lock guards every operation;
/// broadcast snapshots the membership under the lock and does all network IO
/// only after releasing it.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<Mutex<HashSet<PeerAddr>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set semantics absorb duplicate subscribes.
    pub async fn subscribe(&self, peer: PeerAddr) {
        if self.peers.lock().await.insert(peer.clone()) {
            log::info!(" subscribed {peer}");
        } else {
            log::debug!(" {peer} already subscribed");
        }
    }

    /// No-op when the peer is not registered.
    pub async fn cancel(&self, peer: &PeerAddr) {
        if self.peers.lock().await.remove(peer) {
            log::info!(" cancelled {peer}");
        }
    }

    pub async fn contains(&self, peer: &PeerAddr) -> bool {
        self.peers.lock().await.contains(peer)
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.peers.lock().await.clear();
    }

    /// Current membership, sorted for stable display.
    pub async fn snapshot(&self) -> Vec<PeerAddr> {
        let mut members: Vec<PeerAddr> = self.peers.lock().await.iter().cloned().collect();
        members.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        members
    }

    /// Issues one outbound one-shot request per current member. A peer whose
    /// request fails is removed from the registry by the per-request cleanup
    /// handler - membership self-heals under stale or unreachable peers, and
    /// delivery to the remaining members is unaffected.
    pub async fn broadcast(&self, command: &Command) {
        let members = self.snapshot().await;
        let line = command.to_line();
        log::info!(" broadcasting to {} peer(s): {line}", members.len());
        for peer in members {
            let handler = Arc::new(CleanupErrorHandler {
                peer: peer.clone(),
                registry: self.clone(),
            });
            request::send_line(peer.host.clone(), peer.port, line.clone(), handler);
        }
    }
}

/// Beyond the default logging, drops the failing peer from the registry.
struct CleanupErrorHandler {
    peer: PeerAddr,
    registry: PeerRegistry,
}

#[async_trait]
impl RequestErrorHandler for CleanupErrorHandler {
    async fn on_error(&self, err: NetError) {
        log::warn!(" removing unreachable peer {}: {err}", self.peer);
        self.registry.cancel(&self.peer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::agent::{AgentFactory, ConnectionAgent, SessionContext};
    use crate::net::exchange::LineSender;
    use crate::net::listener::ListenerService;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let registry = PeerRegistry::new();
        registry.subscribe(PeerAddr::new("a", 1)).await;
        registry.subscribe(PeerAddr::new("a", 1)).await;
        registry.subscribe(PeerAddr::new("b", 2)).await;
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_cancel_absent_peer_is_noop() {
        let registry = PeerRegistry::new();
        registry.subscribe(PeerAddr::new("a", 1)).await;
        registry.cancel(&PeerAddr::new("ghost", 9)).await;
        assert_eq!(registry.len().await, 1);
        registry.cancel(&PeerAddr::new("a", 1)).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_interleaved_subscribe_cancel_keeps_set_semantics() {
        let registry = PeerRegistry::new();
        for _ in 0..3 {
            registry.subscribe(PeerAddr::new("a", 1)).await;
        }
        registry.cancel(&PeerAddr::new("a", 1)).await;
        assert!(!registry.contains(&PeerAddr::new("a", 1)).await);
    }

    struct Collector {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl ConnectionAgent for Collector {
        async fn act(
            &mut self,
            _ctx: &mut SessionContext,
            line: Option<&str>,
            _out: &mut LineSender,
        ) -> Result<bool, NetError> {
            if let Some(line) = line {
                let _ = self.tx.send(line.to_string());
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_broadcast_removes_only_the_unreachable_peer() {
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let factory: Arc<dyn AgentFactory> = Arc::new(move |_ctx: &SessionContext| {
            Box::new(Collector {
                tx: line_tx.clone(),
            }) as Box<dyn ConnectionAgent>
        });
        let mut live = ListenerService::new();
        let live_addr = live.listen(factory, 0).await.unwrap();

        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = probe.local_addr().unwrap().port();
        drop(probe);

        let live_peer = PeerAddr::new("127.0.0.1", live_addr.port());
        let dead_peer = PeerAddr::new("127.0.0.1", dead_port);
        let registry = PeerRegistry::new();
        registry.subscribe(live_peer.clone()).await;
        registry.subscribe(dead_peer.clone()).await;

        registry
            .broadcast(&Command::Sync { epoch_ms: 42 })
            .await;

        // The live peer still gets its line.
        let line = tokio::time::timeout(Duration::from_secs(2), line_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "SYNC 42");

        // The dead peer is removed; the live one stays registered.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(registry.contains(&live_peer).await);
        assert!(!registry.contains(&dead_peer).await);
        live.close().unwrap();
    }
}
