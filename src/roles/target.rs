use crate::net::agent::{AgentFactory, ConnectionAgent, SessionContext};
use crate::net::exchange::LineSender;
use crate::net::listener::ListenerService;
use crate::net::NetError;
use crate::protocol;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Explicit traffic-log sink for the target, owned by the role and handed to
/// its agents at construction. Records go to the process log and, when a
/// file is attached, to one line per record there. Write failures are logged
/// and swallowed - recording is fire-and-forget.
#[derive(Clone, Default)]
pub struct EchoLog {
    file: Option<Arc<Mutex<tokio::fs::File>>>,
}

impl EchoLog {
    pub fn console_only() -> Self {
        Self::default()
    }

    pub async fn with_file(path: &Path) -> Result<Self, NetError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(EchoLog {
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    pub async fn record(&self, line: &str) {
        log::info!(" [target] {line}");
        if let Some(file) = &self.file {
            let mut file = file.lock().await;
            if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                log::error!(" cannot write traffic log: {e}");
            } else if let Err(e) = file.flush().await {
                log::error!(" cannot flush traffic log: {e}");
            }
        }
    }
}

/// The victim role: echoes every non-terminal line it receives back to the
/// sender after recording it; an ETX line closes the connection silently.
pub struct Target {
    listener: ListenerService,
    log_path: Option<PathBuf>,
}

impl Target {
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Target {
            listener: ListenerService::new(),
            log_path,
        }
    }

    pub async fn start(&mut self, port: u16) -> Result<SocketAddr, NetError> {
        let echo_log = match &self.log_path {
            Some(path) => EchoLog::with_file(path).await?,
            None => EchoLog::console_only(),
        };
        let factory: Arc<dyn AgentFactory> = Arc::new(move |_ctx: &SessionContext| {
            Box::new(EchoAgent {
                echo_log: echo_log.clone(),
            }) as Box<dyn ConnectionAgent>
        });
        self.listener.listen(factory, port).await
    }

    pub fn stop(&mut self) -> Result<(), NetError> {
        self.listener.close()
    }

    pub fn is_running(&self) -> bool {
        !self.listener.is_closed()
    }
}

struct EchoAgent {
    echo_log: EchoLog,
}

#[async_trait]
impl ConnectionAgent for EchoAgent {
    async fn act(
        &mut self,
        _ctx: &mut SessionContext,
        line: Option<&str>,
        out: &mut LineSender,
    ) -> Result<bool, NetError> {
        match line {
            None => Ok(true),
            Some(protocol::ETX) => Ok(false),
            Some(line) => {
                self.echo_log.record(line).await;
                out.send_line(line).await?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_target_echoes_and_logs() {
        let log_file = tempfile::NamedTempFile::new().unwrap();
        let mut target = Target::new(Some(log_file.path().to_path_buf()));
        let addr = target.start(0).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .unwrap();
        stream
            .write_all(b"ATTACK 01 = 127.0.0.1:5000\n")
            .await
            .unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "ATTACK 01 = 127.0.0.1:5000"
        );

        // ETX: the target closes without echoing it.
        write_half
            .write_all(format!("{}\n", protocol::ETX).as_bytes())
            .await
            .unwrap();
        assert_eq!(lines.next_line().await.unwrap(), None);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let recorded = std::fs::read_to_string(log_file.path()).unwrap();
        assert!(recorded.contains("ATTACK 01 = 127.0.0.1:5000"));
        assert!(!recorded.contains(protocol::ETX));
        target.stop().unwrap();
    }

    #[tokio::test]
    async fn test_target_without_file_still_echoes() {
        let mut target = Target::new(None);
        let addr = target.start(0).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .unwrap();
        stream.write_all(b"hello target\n").await.unwrap();
        let (read_half, _write_half) = stream.split();
        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "hello target");
        target.stop().unwrap();
    }
}
