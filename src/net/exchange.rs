use crate::net::agent::{ConnectionAgent, SessionContext};
use crate::net::NetError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

/// Newline-delimited text sink over the write half of a connection. Each
/// `send_line` appends `\n` and flushes, so every call puts exactly one wire
/// message on the socket.
pub struct LineSender {
    writer: BufWriter<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl LineSender {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        LineSender {
            writer: BufWriter::new(Box::new(writer)),
        }
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), NetError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// The exchange loop both the listener and the outbound request service run.
///
/// The agent is invoked once with no line (connection just opened), then once
/// per received line until it returns `Ok(false)` or the peer closes the
/// stream. Agent errors propagate to the caller, which owns the connection's
/// teardown and logging.
pub async fn run_exchange<R>(
    mut agent: Box<dyn ConnectionAgent>,
    ctx: &mut SessionContext,
    reader: R,
    sender: &mut LineSender,
) -> Result<(), NetError>
where
    R: AsyncBufRead + Unpin,
{
    if !agent.act(ctx, None, sender).await? {
        return Ok(());
    }
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        log::debug!(" [{}] received: {}", ctx.peer_addr, line);
        if !agent.act(ctx, Some(&line), sender).await? {
            break;
        }
    }
    Ok(())
}
