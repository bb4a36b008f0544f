use chrono::Utc;
use env_logger::{Builder, Env};
use std::io::Write;

/// Initialise the logger with UTC ISO8601 timestamps
pub fn init_logger(debug: bool) {
    let filter_level = if debug { "debug" } else { "info" };

    Builder::from_env(Env::default().default_filter_or(filter_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
