use crate::net::agent::{ConnectionAgent, SessionContext};
use crate::net::error::classify_connect;
use crate::net::exchange::{run_exchange, LineSender};
use crate::net::NetError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpStream;

/// Receives every failure of a fire-and-forget request. There is no other
/// way for the initiating caller to observe the outcome; results must be
/// encoded as side effects performed by the agent.
#[async_trait]
pub trait RequestErrorHandler: Send + Sync {
    async fn on_error(&self, err: NetError);
}

/// Default handler: log and carry on, calling out unreachable peers
/// separately from the rest.
pub struct LogErrorHandler;

#[async_trait]
impl RequestErrorHandler for LogErrorHandler {
    async fn on_error(&self, err: NetError) {
        match err {
            NetError::Unreachable(_) => log::error!(" {err}"),
            err => log::error!(" request failed: {err}"),
        }
    }
}

/// Opens an outbound connection in a background task and runs the exchange
/// loop with the given agent as initiator (its first `act` call carries no
/// line). Non-blocking; every connect or IO failure is routed to the handler
/// instead of the caller.
pub fn send(
    host: impl Into<String>,
    port: u16,
    agent: Box<dyn ConnectionAgent>,
    handler: Arc<dyn RequestErrorHandler>,
) {
    let host = host.into();
    tokio::spawn(async move {
        if let Err(e) = run_request(&host, port, agent).await {
            handler.on_error(e).await;
        }
    });
}

/// Convenience for the common case of sending a single line and closing.
pub fn send_line(
    host: impl Into<String>,
    port: u16,
    line: String,
    handler: Arc<dyn RequestErrorHandler>,
) {
    send(host, port, Box::new(OneShotAgent::new(line)), handler);
}

async fn run_request(
    host: &str,
    port: u16,
    agent: Box<dyn ConnectionAgent>,
) -> Result<(), NetError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(classify_connect)?;
    let local_addr = stream.local_addr()?;
    let peer_addr = stream.peer_addr()?;
    log::debug!(" request opened to {peer_addr}");

    let (read_half, write_half) = tokio::io::split(stream);
    let mut ctx = SessionContext::new(local_addr, peer_addr);
    let mut sender = LineSender::new(write_half);
    run_exchange(agent, &mut ctx, BufReader::new(read_half), &mut sender).await?;
    log::debug!(" request closed to {peer_addr}");
    Ok(())
}

/// Sends exactly one line on open, then closes without waiting for a reply.
pub struct OneShotAgent {
    line: String,
}

impl OneShotAgent {
    pub fn new(line: String) -> Self {
        OneShotAgent { line }
    }
}

#[async_trait]
impl ConnectionAgent for OneShotAgent {
    async fn act(
        &mut self,
        ctx: &mut SessionContext,
        line: Option<&str>,
        out: &mut LineSender,
    ) -> Result<bool, NetError> {
        if line.is_none() {
            log::info!(" to {}: {}", ctx.peer_addr, self.line);
            out.send_line(&self.line).await?;
        }
        Ok(false)
    }
}
