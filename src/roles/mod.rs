pub mod attacker;
pub mod controller;
pub mod target;

pub use attacker::Attacker;
pub use controller::Controller;
pub use target::Target;

use crate::config::LabConfig;
use crate::console::{self, Console, ConsoleCommand, ConsoleFlow};
use crate::registry::PeerAddr;
use async_trait::async_trait;
use std::path::PathBuf;

// Operator console surfaces for the three roles. The command tables are the
// closed, per-role sets; everything else the operator types is a reported
// error plus the help table.

const CONTROLLER_COMMANDS: &[ConsoleCommand] = &[
    ConsoleCommand {
        name: "START",
        args: "port",
        help: "Start the registrar and listen for agent subscriptions at 'port'.",
    },
    ConsoleCommand {
        name: "STOP",
        args: "",
        help: "Stop the registrar and forget all subscribed agents.",
    },
    ConsoleCommand {
        name: "ATTACK",
        args: "host port start duration",
        help: "Broadcast an attack instruction: target 'host' and 'port', \
               'start' in ISO 8601, 'duration' in seconds.",
    },
    ConsoleCommand {
        name: "LIST",
        args: "",
        help: "Print all subscribed agents.",
    },
    ConsoleCommand {
        name: "SYNC",
        args: "",
        help: "Broadcast a clock synchronization instruction to all agents.",
    },
];

#[async_trait]
impl Console for Controller {
    fn commands(&self) -> &'static [ConsoleCommand] {
        CONTROLLER_COMMANDS
    }

    async fn dispatch(&mut self, verb: &str, args: &[&str]) -> Result<ConsoleFlow, String> {
        match verb {
            "START" => {
                let args = console::expect_args(verb, args, 1)?;
                let port = console::parse_port(args[0])?;
                let addr = self.start(port).await.map_err(|e| e.to_string())?;
                println!("Registrar listening on {addr}");
            }
            "STOP" => {
                self.stop().await.map_err(|e| e.to_string())?;
                println!("Registrar stopped");
            }
            "ATTACK" => {
                let args = console::expect_args(verb, args, 4)?;
                let port = console::parse_port(args[1])?;
                let duration = console::parse_seconds(args[3])?;
                self.issue_attack(args[0], port, args[2], duration)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            "LIST" => {
                for peer in self.peers().await {
                    println!("Agent {peer}");
                }
            }
            "SYNC" => {
                self.sync_clocks().await;
            }
            _ => return Err(format!("Unrecognized command '{verb}'")),
        }
        Ok(ConsoleFlow::Continue)
    }
}

const ATTACKER_COMMANDS: &[ConsoleCommand] = &[
    ConsoleCommand {
        name: "START",
        args: "port",
        help: "Listen for controller instructions at 'port', start the \
               scheduler and subscribe with the controller.",
    },
    ConsoleCommand {
        name: "STOP",
        args: "",
        help: "Stop listening, cancel the scheduler and unsubscribe.",
    },
    ConsoleCommand {
        name: "ATTACK",
        args: "host port start duration",
        help: "Schedule a flood locally: target 'host' and 'port', 'start' \
               in ISO 8601, 'duration' in seconds.",
    },
    ConsoleCommand {
        name: "LIST",
        args: "",
        help: "Print all pending flood orders.",
    },
    ConsoleCommand {
        name: "DELAY",
        args: "",
        help: "Print the clock offset to the controller in milliseconds.",
    },
];

#[async_trait]
impl Console for Attacker {
    fn commands(&self) -> &'static [ConsoleCommand] {
        ATTACKER_COMMANDS
    }

    async fn dispatch(&mut self, verb: &str, args: &[&str]) -> Result<ConsoleFlow, String> {
        match verb {
            "START" => {
                let args = console::expect_args(verb, args, 1)?;
                let port = console::parse_port(args[0])?;
                let addr = self.start(port).await.map_err(|e| e.to_string())?;
                println!("Agent listening on {addr}");
            }
            "STOP" => {
                self.stop().await.map_err(|e| e.to_string())?;
                println!("Agent stopped");
            }
            "ATTACK" => {
                let args = console::expect_args(verb, args, 4)?;
                let port = console::parse_port(args[1])?;
                let duration = console::parse_seconds(args[3])?;
                self.schedule_attack(args[0], port, args[2], duration)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            "LIST" => {
                for order in self.pending().await {
                    println!(
                        "Flood {}:{} at {} for {}ms",
                        order.host,
                        order.port,
                        crate::protocol::format_start_time(order.start_ms),
                        order.duration_ms
                    );
                }
            }
            "DELAY" => {
                println!("Time delay {}ms", self.time_delay_ms());
            }
            _ => return Err(format!("Unrecognized command '{verb}'")),
        }
        Ok(ConsoleFlow::Continue)
    }
}

const TARGET_COMMANDS: &[ConsoleCommand] = &[
    ConsoleCommand {
        name: "START",
        args: "port",
        help: "Start echoing and logging incoming requests at 'port'.",
    },
    ConsoleCommand {
        name: "STOP",
        args: "",
        help: "Stop the target server.",
    },
];

#[async_trait]
impl Console for Target {
    fn commands(&self) -> &'static [ConsoleCommand] {
        TARGET_COMMANDS
    }

    async fn dispatch(&mut self, verb: &str, args: &[&str]) -> Result<ConsoleFlow, String> {
        match verb {
            "START" => {
                let args = console::expect_args(verb, args, 1)?;
                let port = console::parse_port(args[0])?;
                let addr = self.start(port).await.map_err(|e| e.to_string())?;
                println!("Target listening on {addr}");
            }
            "STOP" => {
                self.stop().map_err(|e| e.to_string())?;
                println!("Target stopped");
            }
            _ => return Err(format!("Unrecognized command '{verb}'")),
        }
        Ok(ConsoleFlow::Continue)
    }
}

pub async fn controller_command(_config: &LabConfig) -> Result<(), String> {
    let mut controller = Controller::new();
    console::run(&mut controller).await;
    if controller.is_running() {
        controller.stop().await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub async fn agent_command(controller_addr: &str, config: &LabConfig) -> Result<(), String> {
    let controller = parse_controller_addr(controller_addr, config.controller_port)?;
    log::info!(" controller is {controller}");
    let mut attacker = Attacker::new(controller, config);
    console::run(&mut attacker).await;
    if attacker.is_running() {
        attacker.stop().await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub async fn target_command(log_file: Option<PathBuf>) -> Result<(), String> {
    let mut target = Target::new(log_file);
    console::run(&mut target).await;
    if target.is_running() {
        target.stop().map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// `host` or `host:port`; a bare host gets the configured default port.
fn parse_controller_addr(text: &str, default_port: u16) -> Result<PeerAddr, String> {
    match text.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(format!("invalid controller address '{text}'"));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid controller port '{port}'"))?;
            Ok(PeerAddr::new(host, port))
        }
        None => Ok(PeerAddr::new(text, default_port)),
    }
}
