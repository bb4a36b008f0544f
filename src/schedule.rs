use crate::clock::AdjustedClock;
use crate::net::agent::{ConnectionAgent, SessionContext};
use crate::net::exchange::LineSender;
use crate::net::request::{self, LogErrorHandler};
use crate::net::NetError;
use crate::protocol;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// One scheduled flood: absolute start instant (in the controller's clock
/// space) and duration, both in milliseconds. One-shot - removed from the
/// pending set the instant the tick converts it into a live request.
#[derive(Debug, Clone)]
pub struct AttackOrder {
    pub host: String,
    pub port: u16,
    pub start_ms: i64,
    pub duration_ms: i64,
}

impl AttackOrder {
    pub fn window_end_ms(&self) -> i64 {
        self.start_ms + self.duration_ms
    }
}

/// Shared pending-action list plus the periodic tick that drains it.
///
/// One coarse lock guards add/list/scan; the tick collects due orders under
/// the lock and launches their outbound requests only after releasing it.
/// Cancellation is a watch signal observed both by the tick task and by
/// every in-flight flood agent.
#[derive(Clone)]
pub struct AttackSchedule {
    pending: Arc<Mutex<Vec<AttackOrder>>>,
    clock: Arc<AdjustedClock>,
    cancel: Arc<watch::Sender<bool>>,
    tick_ms: u64,
    payload_ms: u64,
}

impl AttackSchedule {
    pub fn new(clock: Arc<AdjustedClock>, tick_ms: u64, payload_ms: u64) -> Self {
        let (cancel, _) = watch::channel(false);
        AttackSchedule {
            pending: Arc::new(Mutex::new(Vec::new())),
            clock,
            cancel: Arc::new(cancel),
            tick_ms,
            payload_ms,
        }
    }

    pub async fn add(&self, order: AttackOrder) {
        log::info!(
            " scheduled flood of {}:{} at {} for {}ms",
            order.host,
            order.port,
            protocol::format_start_time(order.start_ms),
            order.duration_ms
        );
        self.pending.lock().await.push(order);
    }

    pub async fn list(&self) -> Vec<AttackOrder> {
        self.pending.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.pending.lock().await.clear();
    }

    /// Starts (or restarts) the periodic tick. A previous `cancel` is
    /// rescinded so a stopped schedule can serve again.
    pub fn start(&self) {
        self.cancel.send_replace(false);
        tokio::spawn(tick_loop(
            self.pending.clone(),
            self.clock.clone(),
            self.cancel.subscribe(),
            self.tick_ms,
            self.payload_ms,
        ));
    }

    /// Stops future ticks and signals in-flight floods to wind down on their
    /// next iteration. Already-launched requests are not torn down abruptly.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }
}

async fn tick_loop(
    pending: Arc<Mutex<Vec<AttackOrder>>>,
    clock: Arc<AdjustedClock>,
    mut cancel: watch::Receiver<bool>,
    tick_ms: u64,
    payload_ms: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    log::debug!(" scheduler tick stopped");
                    break;
                }
            }
            _ = interval.tick() => {
                // Drain due orders under the lock, launch after release.
                let due: Vec<AttackOrder> = {
                    let mut guard = pending.lock().await;
                    let now = clock.now_ms();
                    let mut due = Vec::new();
                    guard.retain(|order| {
                        if order.duration_ms < 0 {
                            log::warn!(
                                " dropping malformed order for {}:{} (negative duration)",
                                order.host, order.port
                            );
                            false
                        } else if order.start_ms <= now {
                            due.push(order.clone());
                            false
                        } else {
                            true
                        }
                    });
                    due
                };
                for order in due {
                    log::info!(" launching flood against {}:{}", order.host, order.port);
                    let agent = FloodAgent::new(
                        order.clone(),
                        clock.clone(),
                        cancel.clone(),
                        payload_ms,
                    );
                    request::send(
                        order.host.clone(),
                        order.port,
                        Box::new(agent),
                        Arc::new(LogErrorHandler),
                    );
                }
            }
        }
    }
}

/// The launched request's behavior: stream numbered payload lines at roughly
/// one per payload interval until the window closes or the schedule is
/// cancelled, then send the single ETX line and close.
///
/// Pacing is echo-driven - the target echoes every payload, each echo
/// triggers the next `act` call, and every call after the first sleeps one
/// interval before deciding whether to continue.
pub struct FloodAgent {
    order: AttackOrder,
    clock: Arc<AdjustedClock>,
    cancel: watch::Receiver<bool>,
    payload_ms: u64,
}

impl FloodAgent {
    pub fn new(
        order: AttackOrder,
        clock: Arc<AdjustedClock>,
        cancel: watch::Receiver<bool>,
        payload_ms: u64,
    ) -> Self {
        FloodAgent {
            order,
            clock,
            cancel,
            payload_ms,
        }
    }
}

const SEQUENCE_SLOT: &str = "flood.sequence";

#[async_trait]
impl ConnectionAgent for FloodAgent {
    async fn act(
        &mut self,
        ctx: &mut SessionContext,
        line: Option<&str>,
        out: &mut LineSender,
    ) -> Result<bool, NetError> {
        let mut stop = *self.cancel.borrow();
        if !stop {
            if line.is_some() {
                tokio::time::sleep(Duration::from_millis(self.payload_ms)).await;
            }
            if self.clock.now_ms() >= self.order.window_end_ms() || *self.cancel.borrow() {
                stop = true;
            }
        }
        if stop {
            out.send_line(protocol::ETX).await?;
            return Ok(false);
        }

        let sequence = match ctx.get_mut::<u64>(SEQUENCE_SLOT) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                ctx.insert(SEQUENCE_SLOT, 1u64);
                1
            }
        };
        let payload = protocol::payload_line(
            sequence,
            &ctx.local_addr.ip().to_string(),
            ctx.local_addr.port(),
        );
        log::debug!(" [{}] {payload}", ctx.peer_addr);
        out.send_line(&payload).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn clock() -> Arc<AdjustedClock> {
        Arc::new(AdjustedClock::new())
    }

    fn order_with(clock: &AdjustedClock, start_offset_ms: i64, duration_ms: i64) -> AttackOrder {
        AttackOrder {
            host: "127.0.0.1".to_string(),
            port: 1,
            start_ms: clock.now_ms() + start_offset_ms,
            duration_ms,
        }
    }

    fn ctx() -> SessionContext {
        SessionContext::new(
            "127.0.0.1:5000".parse().unwrap(),
            "127.0.0.1:6000".parse().unwrap(),
        )
    }

    async fn next_sent(side: &mut tokio::io::DuplexStream) -> String {
        let mut line = String::new();
        BufReader::new(side).read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_flood_agent_sends_numbered_payloads() {
        let clock = clock();
        let order = order_with(&clock, -100, 60_000);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut agent = FloodAgent::new(order, clock, cancel_rx, 1);

        let (writer, mut reader) = tokio::io::duplex(1024);
        let mut sender = LineSender::new(writer);
        let mut ctx = ctx();

        assert!(agent.act(&mut ctx, None, &mut sender).await.unwrap());
        assert_eq!(next_sent(&mut reader).await, "ATTACK 01 = 127.0.0.1:5000");
        assert!(agent
            .act(&mut ctx, Some("ATTACK 01 = 127.0.0.1:5000"), &mut sender)
            .await
            .unwrap());
        assert_eq!(next_sent(&mut reader).await, "ATTACK 02 = 127.0.0.1:5000");
    }

    #[tokio::test]
    async fn test_flood_agent_terminates_after_window() {
        let clock = clock();
        // Window already closed at first act: straight to ETX.
        let order = order_with(&clock, -5000, 1000);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut agent = FloodAgent::new(order, clock, cancel_rx, 1);

        let (writer, mut reader) = tokio::io::duplex(1024);
        let mut sender = LineSender::new(writer);
        let mut ctx = ctx();

        assert!(!agent.act(&mut ctx, None, &mut sender).await.unwrap());
        assert_eq!(next_sent(&mut reader).await, protocol::ETX);
    }

    #[tokio::test]
    async fn test_flood_agent_observes_cancellation() {
        let clock = clock();
        let order = order_with(&clock, -100, 60_000);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut agent = FloodAgent::new(order, clock, cancel_rx, 1);

        let (writer, mut reader) = tokio::io::duplex(1024);
        let mut sender = LineSender::new(writer);
        let mut ctx = ctx();

        assert!(agent.act(&mut ctx, None, &mut sender).await.unwrap());
        assert_eq!(next_sent(&mut reader).await, "ATTACK 01 = 127.0.0.1:5000");

        cancel_tx.send(true).unwrap();
        assert!(!agent
            .act(&mut ctx, Some("echo"), &mut sender)
            .await
            .unwrap());
        assert_eq!(next_sent(&mut reader).await, protocol::ETX);
    }

    #[tokio::test]
    async fn test_schedule_add_and_list() {
        let schedule = AttackSchedule::new(clock(), 1000, 1000);
        schedule
            .add(AttackOrder {
                host: "v".to_string(),
                port: 9,
                start_ms: 0,
                duration_ms: 1000,
            })
            .await;
        let pending = schedule.list().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].host, "v");
        schedule.clear().await;
        assert!(schedule.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_consumes_due_order() {
        let clock = clock();
        let schedule = AttackSchedule::new(clock.clone(), 50, 1000);
        // Due immediately; target port is closed, the launch just errors out
        // through the request error handler.
        schedule.add(order_with(&clock, -1000, 0)).await;
        // Not due for a long while; must survive the ticks.
        schedule.add(order_with(&clock, 3_600_000, 0)).await;

        schedule.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let pending = schedule.list().await;
        assert_eq!(pending.len(), 1);
        assert!(pending[0].start_ms > clock.now_ms());
        schedule.cancel();
    }

    #[tokio::test]
    async fn test_cancel_flips_the_shared_signal() {
        let schedule = AttackSchedule::new(clock(), 1000, 1000);
        let signal = schedule.cancel_signal();
        schedule.start();
        assert!(!*signal.borrow());
        schedule.cancel();
        assert!(*signal.borrow());
        schedule.start();
        assert!(!*signal.borrow());
        schedule.cancel();
    }
}
