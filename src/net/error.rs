use std::io;

/// Error taxonomy for the connection engine. End-of-stream and the ETX
/// termination line are normal exchange endings, not errors, so neither
/// appears here.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("cannot bind port {port}: {source} (is the port already in use?)")]
    Bind { port: u16, source: io::Error },
    #[error("listener already active")]
    AlreadyListening,
    #[error("listener already closed")]
    AlreadyClosed,
    #[error("peer unreachable: {0}")]
    Unreachable(io::Error),
    #[error("connect failed: {0}")]
    Connect(io::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol syntax error: {0}")]
    ProtocolSyntax(String),
}

/// Sorts a connect-phase failure into the taxonomy. Unreachable peers get
/// their own variant so the default request error handler can report them
/// distinctly from transient IO trouble.
pub fn classify_connect(err: io::Error) -> NetError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable => NetError::Unreachable(err),
        _ => NetError::Connect(err),
    }
}
