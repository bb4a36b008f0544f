use crate::net::exchange::LineSender;
use crate::net::NetError;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Per-connection session state. Owned by the connection's task, destroyed
/// when the connection closes, never shared across connections. Besides the
/// endpoint facts it carries a string-keyed map of opaque values for protocol
/// sub-state that must survive multiple exchanges on the same connection
/// (e.g. the flood sequence counter).
pub struct SessionContext {
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    slots: HashMap<String, Box<dyn Any + Send>>,
}

impl SessionContext {
    pub fn new(local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        SessionContext {
            local_addr,
            peer_addr,
            slots: HashMap::new(),
        }
    }

    pub fn insert<T: Any + Send>(&mut self, key: &str, value: T) {
        self.slots.insert(key.to_string(), Box::new(value));
    }

    pub fn get<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.slots.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: Any + Send>(&mut self, key: &str) -> Option<&mut T> {
        self.slots.get_mut(key).and_then(|v| v.downcast_mut())
    }
}

/// The unit of protocol behavior shared by both sides of a connection.
///
/// Called first with `line = None` when the connection opens, which is the
/// conventional point for an initiator to emit its request line or for a
/// handler to seed state. After that, called once per received line. Return
/// `Ok(false)` to close the connection deliberately; the loop also ends on
/// peer EOF regardless of the agent's wishes.
#[async_trait]
pub trait ConnectionAgent: Send {
    async fn act(
        &mut self,
        ctx: &mut SessionContext,
        line: Option<&str>,
        out: &mut LineSender,
    ) -> Result<bool, NetError>;
}

/// Builds a fresh agent for each accepted connection. The factory sees the
/// session context so it can construct context-aware agents.
pub trait AgentFactory: Send + Sync {
    fn create_agent(&self, ctx: &SessionContext) -> Box<dyn ConnectionAgent>;
}

impl<F> AgentFactory for F
where
    F: Fn(&SessionContext) -> Box<dyn ConnectionAgent> + Send + Sync,
{
    fn create_agent(&self, ctx: &SessionContext) -> Box<dyn ConnectionAgent> {
        self(ctx)
    }
}
