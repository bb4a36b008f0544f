use crate::net::NetError;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Single-character stream-termination control line. A flood ends its stream
/// with this; the target closes without echoing it.
pub const ETX: &str = "\u{3}";

/// The closed set of control-channel commands. One command per wire line,
/// space-separated arguments, verb matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add the declared (host, port) to the controller's registry.
    Subscribe { host: String, port: u16 },
    /// Remove the declared (host, port) from the registry.
    Cancel { host: String, port: u16 },
    /// Schedule a flood: absolute start instant and duration, both held as
    /// epoch milliseconds internally (the wire carries RFC 3339 + seconds).
    Attack {
        host: String,
        port: u16,
        start_ms: i64,
        duration_ms: i64,
    },
    /// Adopt the sender's clock via a one-shot offset estimate.
    Sync { epoch_ms: i64 },
}

type ParseArgs = fn(&[&str]) -> Result<Command, String>;

/// Verb lookup table: name, arity, argument parser. Dispatch never leaves
/// this table, so an unknown verb or a bad argument is a reported syntax
/// error rather than an unchecked invocation.
const VERBS: &[(&str, usize, ParseArgs)] = &[
    ("SUBSCRIBE", 2, parse_subscribe),
    ("CANCEL", 2, parse_cancel),
    ("ATTACK", 4, parse_attack),
    ("SYNC", 1, parse_sync),
];

impl Command {
    pub fn parse(line: &str) -> Result<Command, NetError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let verb = tokens
            .first()
            .ok_or_else(|| NetError::ProtocolSyntax("empty command line".to_string()))?;
        let upper = verb.to_ascii_uppercase();
        for (name, arity, parse_args) in VERBS {
            if *name == upper {
                let args = &tokens[1..];
                if args.len() != *arity {
                    return Err(NetError::ProtocolSyntax(format!(
                        "{name} expects {arity} argument(s), got {}",
                        args.len()
                    )));
                }
                return parse_args(args).map_err(NetError::ProtocolSyntax);
            }
        }
        Err(NetError::ProtocolSyntax(format!(
            "unrecognized command '{verb}'"
        )))
    }

    /// The wire form of the command, without the trailing newline.
    pub fn to_line(&self) -> String {
        match self {
            Command::Subscribe { host, port } => format!("SUBSCRIBE {host} {port}"),
            Command::Cancel { host, port } => format!("CANCEL {host} {port}"),
            Command::Attack {
                host,
                port,
                start_ms,
                duration_ms,
            } => format!(
                "ATTACK {host} {port} {} {}",
                format_start_time(*start_ms),
                duration_ms / 1000
            ),
            Command::Sync { epoch_ms } => format!("SYNC {epoch_ms}"),
        }
    }
}

fn parse_host_port(args: &[&str]) -> Result<(String, u16), String> {
    let port = args[1]
        .parse::<u16>()
        .map_err(|_| format!("invalid port '{}'", args[1]))?;
    Ok((args[0].to_string(), port))
}

fn parse_subscribe(args: &[&str]) -> Result<Command, String> {
    let (host, port) = parse_host_port(args)?;
    Ok(Command::Subscribe { host, port })
}

fn parse_cancel(args: &[&str]) -> Result<Command, String> {
    let (host, port) = parse_host_port(args)?;
    Ok(Command::Cancel { host, port })
}

fn parse_attack(args: &[&str]) -> Result<Command, String> {
    let (host, port) = parse_host_port(args)?;
    let start_ms = parse_start_time(args[2])?;
    let duration_secs = args[3]
        .parse::<i64>()
        .map_err(|_| format!("invalid duration '{}'", args[3]))?;
    if duration_secs < 0 {
        return Err(format!("negative duration '{duration_secs}'"));
    }
    Ok(Command::Attack {
        host,
        port,
        start_ms,
        // Seconds on the wire, milliseconds internally.
        duration_ms: duration_secs * 1000,
    })
}

fn parse_sync(args: &[&str]) -> Result<Command, String> {
    let epoch_ms = args[0]
        .parse::<i64>()
        .map_err(|_| format!("invalid epoch millis '{}'", args[0]))?;
    Ok(Command::Sync { epoch_ms })
}

/// Parses the attack start instant: RFC 3339 (`2024-01-01T00:00:00Z` or with
/// a numeric offset), or the same shape without a zone, read as UTC.
pub fn parse_start_time(text: &str) -> Result<i64, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc().timestamp_millis())
        .map_err(|_| format!("invalid start time '{text}'"))
}

pub fn format_start_time(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => epoch_ms.to_string(),
    }
}

/// One flood payload line: sequence counter plus the sender's observed local
/// endpoint, e.g. `ATTACK 03 = 127.0.0.1:52114`.
pub fn payload_line(sequence: u64, host: &str, port: u16) -> String {
    format!("ATTACK {sequence:02} = {host}:{port}")
}
