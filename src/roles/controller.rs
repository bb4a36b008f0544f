use crate::net::agent::{AgentFactory, ConnectionAgent, SessionContext};
use crate::net::exchange::LineSender;
use crate::net::listener::ListenerService;
use crate::net::NetError;
use crate::protocol::{self, Command};
use crate::registry::{PeerAddr, PeerRegistry};
use async_trait::async_trait;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;

/// The command-and-control role: a registrar listener that agents subscribe
/// to, plus broadcast fan-out of attack and clock-sync instructions.
pub struct Controller {
    listener: ListenerService,
    registry: PeerRegistry,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            listener: ListenerService::new(),
            registry: PeerRegistry::new(),
        }
    }

    /// Starts the registrar listener.
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr, NetError> {
        let registry = self.registry.clone();
        let factory: Arc<dyn AgentFactory> = Arc::new(move |_ctx: &SessionContext| {
            Box::new(RegistrarAgent {
                registry: registry.clone(),
            }) as Box<dyn ConnectionAgent>
        });
        self.listener.listen(factory, port).await
    }

    /// Stops the registrar and forgets the membership.
    pub async fn stop(&mut self) -> Result<(), NetError> {
        self.listener.close()?;
        self.registry.clear().await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.listener.is_closed()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn peers(&self) -> Vec<PeerAddr> {
        self.registry.snapshot().await
    }

    /// Broadcasts an ATTACK instruction to every subscribed agent. Start time
    /// is RFC 3339, duration is seconds as on the wire.
    pub async fn issue_attack(
        &self,
        host: &str,
        port: u16,
        start: &str,
        duration_secs: i64,
    ) -> Result<(), NetError> {
        let start_ms = protocol::parse_start_time(start).map_err(NetError::ProtocolSyntax)?;
        if duration_secs < 0 {
            return Err(NetError::ProtocolSyntax(format!(
                "negative duration '{duration_secs}'"
            )));
        }
        self.registry
            .broadcast(&Command::Attack {
                host: host.to_string(),
                port,
                start_ms,
                duration_ms: duration_secs * 1000,
            })
            .await;
        Ok(())
    }

    /// Broadcasts the controller's current wall clock so every agent adopts
    /// it as a one-shot offset.
    pub async fn sync_clocks(&self) {
        self.registry
            .broadcast(&Command::Sync {
                epoch_ms: Utc::now().timestamp_millis(),
            })
            .await;
    }

    #[cfg(test)]
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }
}

/// Dispatches SUBSCRIBE/CANCEL lines into the registry. Malformed or
/// out-of-place commands are logged and the connection stays open; the loop
/// only ends when the peer goes away.
struct RegistrarAgent {
    registry: PeerRegistry,
}

#[async_trait]
impl ConnectionAgent for RegistrarAgent {
    async fn act(
        &mut self,
        ctx: &mut SessionContext,
        line: Option<&str>,
        _out: &mut LineSender,
    ) -> Result<bool, NetError> {
        let Some(line) = line else {
            return Ok(true);
        };
        match Command::parse(line) {
            Ok(Command::Subscribe { host, port }) => {
                self.registry.subscribe(PeerAddr::new(host, port)).await;
            }
            Ok(Command::Cancel { host, port }) => {
                self.registry.cancel(&PeerAddr::new(host, port)).await;
            }
            Ok(other) => {
                log::warn!(
                    " [{}] command not valid on the registrar channel: {}",
                    ctx.peer_addr,
                    other.to_line()
                );
            }
            Err(e) => {
                log::warn!(" [{}] {e}", ctx.peer_addr);
            }
        }
        Ok(true)
    }
}
