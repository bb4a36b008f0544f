pub mod cli;
pub mod clock;
pub mod config;
pub mod console;
pub mod logger;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod roles;
pub mod schedule;
