use crate::net::agent::{AgentFactory, SessionContext};
use crate::net::exchange::{run_exchange, LineSender};
use crate::net::NetError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Line-oriented TCP listener. One task owns the accept loop; every accepted
/// connection gets its own task that runs the agent exchange loop. There is
/// no connection limit - each misbehaving connection fails alone and never
/// reaches the accept loop or its siblings.
#[derive(Default)]
pub struct ListenerService {
    shutdown: Option<watch::Sender<bool>>,
    local_addr: Option<SocketAddr>,
}

impl ListenerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the port and starts accepting. Returns the bound address, which
    /// is the only way to learn the port when 0 was requested.
    pub async fn listen(
        &mut self,
        factory: Arc<dyn AgentFactory>,
        port: u16,
    ) -> Result<SocketAddr, NetError> {
        if !self.is_closed() {
            return Err(NetError::AlreadyListening);
        }
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| NetError::Bind { port, source })?;
        let local_addr = listener.local_addr()?;
        log::info!(" listening on {local_addr}");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        tokio::spawn(accept_loop(listener, factory, shutdown_rx));
        Ok(local_addr)
    }

    /// Stops accepting new connections. In-flight connections are not
    /// interrupted; they drain on their own socket closure. Calling this on a
    /// listener that never opened, or a second time, is a programmer error.
    pub fn close(&mut self) -> Result<(), NetError> {
        match self.shutdown.take() {
            Some(shutdown_tx) => {
                let _ = shutdown_tx.send(true);
                self.local_addr = None;
                log::info!(" listener closed");
                Ok(())
            }
            None => Err(NetError::AlreadyClosed),
        }
    }

    /// True if the listener never opened or was explicitly closed.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

async fn accept_loop(
    listener: TcpListener,
    factory: Arc<dyn AgentFactory>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    log::debug!(" accept loop stopped");
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        log::error!(" accept error: {e}");
                        continue;
                    }
                };
                log::info!(" new connection from {peer_addr}");
                let factory = factory.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, factory).await {
                        log::error!(" [{peer_addr}] connection error: {e}");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    factory: Arc<dyn AgentFactory>,
) -> Result<(), NetError> {
    let local_addr = stream.local_addr()?;
    let peer_addr = stream.peer_addr()?;
    let (read_half, write_half) = tokio::io::split(stream);

    let mut ctx = SessionContext::new(local_addr, peer_addr);
    let agent = factory.create_agent(&ctx);
    let mut sender = LineSender::new(write_half);
    run_exchange(agent, &mut ctx, BufReader::new(read_half), &mut sender).await?;
    log::debug!(" [{peer_addr}] connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::agent::ConnectionAgent;
    use async_trait::async_trait;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    struct Upper;

    #[async_trait]
    impl ConnectionAgent for Upper {
        async fn act(
            &mut self,
            _ctx: &mut SessionContext,
            line: Option<&str>,
            out: &mut LineSender,
        ) -> Result<bool, NetError> {
            if let Some(line) = line {
                out.send_line(&line.to_uppercase()).await?;
            }
            Ok(true)
        }
    }

    fn upper_factory() -> Arc<dyn AgentFactory> {
        Arc::new(|_ctx: &SessionContext| Box::new(Upper) as Box<dyn ConnectionAgent>)
    }

    #[tokio::test]
    async fn test_listener_serves_connections() {
        let mut service = ListenerService::new();
        let addr = service.listen(upper_factory(), 0).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .unwrap();
        stream.write_all(b"hello\n").await.unwrap();
        let (read_half, _write_half) = stream.split();
        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "HELLO");

        service.close().unwrap();
    }

    #[tokio::test]
    async fn test_listen_twice_fails() {
        let mut service = ListenerService::new();
        service.listen(upper_factory(), 0).await.unwrap();
        let err = service.listen(upper_factory(), 0).await.unwrap_err();
        assert!(matches!(err, NetError::AlreadyListening));
        service.close().unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_bind_error() {
        let mut first = ListenerService::new();
        let addr = first.listen(upper_factory(), 0).await.unwrap();

        let mut second = ListenerService::new();
        let err = second.listen(upper_factory(), addr.port()).await.unwrap_err();
        assert!(matches!(err, NetError::Bind { .. }));
        first.close().unwrap();
    }

    #[tokio::test]
    async fn test_double_close_fails() {
        let mut service = ListenerService::new();
        assert!(service.is_closed());
        service.listen(upper_factory(), 0).await.unwrap();
        assert!(!service.is_closed());
        service.close().unwrap();
        assert!(service.is_closed());
        assert!(matches!(service.close(), Err(NetError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_close_does_not_touch_inflight_connections() {
        let mut service = ListenerService::new();
        let addr = service.listen(upper_factory(), 0).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .unwrap();
        service.close().unwrap();

        // The established connection still answers after close.
        stream.write_all(b"still here\n").await.unwrap();
        let (read_half, _write_half) = stream.split();
        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "STILL HERE");

        // New connections are no longer served lines.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        match TcpStream::connect(("127.0.0.1", addr.port())).await {
            Err(_) => {}
            Ok(mut late) => {
                // Accept loop is gone; the connection must yield EOF, not an echo.
                late.write_all(b"anyone\n").await.unwrap();
                let (late_read, _w) = late.split();
                let mut late_lines = BufReader::new(late_read).lines();
                let next = tokio::time::timeout(
                    std::time::Duration::from_millis(500),
                    late_lines.next_line(),
                )
                .await;
                assert!(!matches!(next, Ok(Ok(Some(_)))));
            }
        }
    }
}
