//! Metrics Poller
//!
//! One poller is active at a time. It dials its own private SSH session (never
//! shared with the registry), fetches a snapshot immediately and then on every
//! interval tick, and pushes each result to the subscriber's sink.
//!
//! # Lifecycle
//!
//! ```text
//! idle ──start()──► connecting ──dial ok──► polling
//!  ▲                    │                      │
//!  └──── dial error ────┘                      │
//!  └──── stop() / command failure / sink gone ─┘
//! ```
//!
//! # Invariants
//! - `start` fully stops the previous poller (task joined, session ended)
//!   before the new one dials
//! - The network baseline lives inside the poll task, so every start begins
//!   with a 0/0 rate
//! - Updates are delivered under the generation lock that `stop` bumps: a tick
//!   still in flight when `stop` returns never reaches the sink

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::parser::{
    compute_rate, is_valid_service_name, parse_cpu, parse_disk, parse_memory, parse_net_dev,
    parse_system_info, NetSample,
};
use super::types::{MetricsSnapshot, MetricsUpdate, NetworkRate, PollerState, ServiceStatus};
use crate::ssh::{AuthDescriptor, Connector, RemoteSession, SshError};

const UPTIME_CMD: &str = "uptime";
const MEMORY_CMD: &str = "free -m";
const DISK_CMD: &str = "df -h /";
/// Second iteration of a two-sample `top` run, so the figure covers a real window
const CPU_CMD: &str = "top -b -n 2 -d 0.5 | grep '^%Cpu' | tail -n 1 | awk '{print $2+$4}'";
const SYSTEM_CMD: &str = "uname -r; uname -m; (. /etc/os-release 2>/dev/null && echo \"$PRETTY_NAME\") || uname -s; grep -m1 'model name' /proc/cpuinfo | cut -d: -f2";
const NETWORK_CMD: &str = "cat /proc/net/dev";

/// Everything a poller needs, resolved by the caller
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub connection_id: String,
    pub auth: AuthDescriptor,
    pub interval: Duration,
    pub services: Vec<String>,
}

struct ActivePoller {
    connection_id: String,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct MetricsManager {
    connector: Arc<dyn Connector>,
    active: tokio::sync::Mutex<Option<ActivePoller>>,
    state: Arc<RwLock<PollerState>>,
    generation: Arc<Mutex<u64>>,
}

impl MetricsManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            active: tokio::sync::Mutex::new(None),
            state: Arc::new(RwLock::new(PollerState::Idle)),
            generation: Arc::new(Mutex::new(0)),
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.read()
    }

    /// Connection the active poller targets, if any
    pub async fn target(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|p| !p.task.is_finished())
            .map(|p| p.connection_id.clone())
    }

    /// Start polling, replacing any running poller.
    ///
    /// Never fails: dial and command errors arrive on `sink` as
    /// [`MetricsUpdate::Error`].
    pub async fn start(&self, request: PollRequest, sink: mpsc::UnboundedSender<MetricsUpdate>) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(
                "[metrics] replacing poller for {} with {}",
                previous.connection_id, request.connection_id
            );
            self.shutdown(previous).await;
        }

        let generation = {
            let mut current = self.generation.lock();
            *current += 1;
            *current
        };
        *self.state.write() = PollerState::Connecting;

        let (stop_tx, stop_rx) = oneshot::channel();
        let ctx = PollContext {
            connector: Arc::clone(&self.connector),
            state: Arc::clone(&self.state),
            generation_lock: Arc::clone(&self.generation),
            generation,
            sink,
        };
        let connection_id = request.connection_id.clone();
        let task = tokio::spawn(poll_loop(ctx, request, stop_rx));

        *active = Some(ActivePoller {
            connection_id,
            stop_tx,
            task,
        });
    }

    /// Stop the active poller; returns `false` if none was running
    pub async fn stop(&self) -> bool {
        let previous = self.active.lock().await.take();
        match previous {
            Some(previous) => {
                self.shutdown(previous).await;
                true
            }
            None => false,
        }
    }

    /// Stop the poller only if it targets `connection_id`
    pub async fn stop_for(&self, connection_id: &str) -> bool {
        let mut active = self.active.lock().await;
        let matches = active
            .as_ref()
            .map(|p| p.connection_id == connection_id)
            .unwrap_or(false);
        if !matches {
            return false;
        }
        if let Some(previous) = active.take() {
            self.shutdown(previous).await;
        }
        true
    }

    async fn shutdown(&self, poller: ActivePoller) {
        // Fence off delivery first; the task may be mid-tick
        *self.generation.lock() += 1;
        let _ = poller.stop_tx.send(());
        if let Err(e) = poller.task.await {
            warn!("[metrics] poll task for {} failed: {}", poller.connection_id, e);
        }
        *self.state.write() = PollerState::Idle;
        info!("[metrics] stopped poller for {}", poller.connection_id);
    }
}

struct PollContext {
    connector: Arc<dyn Connector>,
    state: Arc<RwLock<PollerState>>,
    generation_lock: Arc<Mutex<u64>>,
    generation: u64,
    sink: mpsc::UnboundedSender<MetricsUpdate>,
}

impl PollContext {
    /// Send unless this poller has been superseded; `false` means stop polling
    fn deliver(&self, update: MetricsUpdate) -> bool {
        let current = self.generation_lock.lock();
        if *current != self.generation {
            debug!("[metrics] dropping update from stopped poller");
            return false;
        }
        self.sink.send(update).is_ok()
    }

    fn set_state(&self, state: PollerState) {
        *self.state.write() = state;
    }
}

async fn poll_loop(ctx: PollContext, request: PollRequest, mut stop_rx: oneshot::Receiver<()>) {
    let target = request.auth.target();

    let session = tokio::select! {
        _ = &mut stop_rx => {
            ctx.set_state(PollerState::Idle);
            return;
        }
        result = ctx.connector.connect(&request.auth) => match result {
            Ok(session) => session,
            Err(e) => {
                warn!("[metrics] failed to connect to {}: {}", target, e);
                ctx.deliver(MetricsUpdate::Error { message: e.to_string() });
                ctx.set_state(PollerState::Idle);
                return;
            }
        }
    };

    ctx.set_state(PollerState::Polling);
    info!(
        "[metrics] polling {} every {:?} ({} services)",
        target,
        request.interval,
        request.services.len()
    );

    let mut interval = tokio::time::interval(request.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut baseline: Option<NetSample> = None;

    loop {
        // First tick completes immediately
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = interval.tick() => {}
        }

        let result = tokio::select! {
            _ = &mut stop_rx => break,
            result = fetch_snapshot(session.as_ref(), &request.services, &mut baseline) => result,
        };

        match result {
            Ok(snapshot) => {
                if !ctx.deliver(MetricsUpdate::Success { data: snapshot }) {
                    break;
                }
            }
            Err(e) => {
                warn!("[metrics] poll of {} failed, stopping: {}", target, e);
                ctx.deliver(MetricsUpdate::Error { message: e.to_string() });
                break;
            }
        }
    }

    session.end().await;
    ctx.set_state(PollerState::Idle);
    debug!("[metrics] poll loop for {} ended", target);
}

/// Run the whole battery concurrently and assemble one snapshot
async fn fetch_snapshot(
    session: &dyn RemoteSession,
    services: &[String],
    baseline: &mut Option<NetSample>,
) -> Result<MetricsSnapshot, SshError> {
    let (uptime, memory, disk, cpu, system, network, services) = tokio::join!(
        session.exec(UPTIME_CMD),
        session.exec(MEMORY_CMD),
        session.exec(DISK_CMD),
        session.exec(CPU_CMD),
        session.exec(SYSTEM_CMD),
        session.exec(NETWORK_CMD),
        join_all(services.iter().map(|name| service_status(session, name))),
    );
    let sampled_at = Instant::now();

    let uptime = uptime?;
    let memory = memory?;
    let disk = disk?;
    let cpu = cpu?;
    let system = system?;
    let network = network?;

    let network = match parse_net_dev(&network.stdout) {
        Some((_, rx_bytes, tx_bytes)) => {
            let current = NetSample {
                rx_bytes,
                tx_bytes,
                at: sampled_at,
            };
            let rate = compute_rate(baseline.as_ref(), &current);
            *baseline = Some(current);
            rate
        }
        None => NetworkRate::default(),
    };

    Ok(MetricsSnapshot {
        uptime: uptime.stdout.trim().to_string(),
        memory: parse_memory(&memory.stdout),
        disk: parse_disk(&disk.stdout),
        cpu: parse_cpu(&cpu.stdout),
        system: parse_system_info(&system.stdout),
        network,
        services,
    })
}

/// `systemctl is-active` for one service; failures stay local to the service
async fn service_status(session: &dyn RemoteSession, name: &str) -> ServiceStatus {
    let state = if !is_valid_service_name(name) {
        debug!("[metrics] skipping invalid service name {:?}", name);
        "unknown".to_string()
    } else {
        match session.exec(&format!("systemctl is-active {}", name)).await {
            Ok(output) => non_empty(output.stdout).unwrap_or_else(|| "unknown".to_string()),
            // Inactive units exit non-zero but still print their state
            Err(SshError::CommandFailure { stdout, .. }) => {
                non_empty(stdout).unwrap_or_else(|| "failed".to_string())
            }
            Err(e) => {
                debug!("[metrics] status of {} unavailable: {}", name, e);
                "unknown".to_string()
            }
        }
    };

    ServiceStatus {
        name: name.to_string(),
        active: state == "active",
        state,
    }
}

fn non_empty(output: String) -> Option<String> {
    let trimmed = output.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::Credential;
    use crate::testing::FakeConnector;

    const DF_OUTPUT: &str = "Filesystem      Size  Used Avail Use% Mounted on\n/dev/sda1        50G   21G   27G  44% /\n";

    fn request(connection_id: &str, interval: Duration, services: &[&str]) -> PollRequest {
        PollRequest {
            connection_id: connection_id.to_string(),
            auth: AuthDescriptor {
                host: "10.0.0.5".into(),
                port: 22,
                username: "root".into(),
                credential: Credential::Password("pw".into()),
            },
            interval,
            services: services.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn scripted() -> Arc<FakeConnector> {
        let connector = FakeConnector::new();
        connector.reply(UPTIME_CMD, " 10:00:00 up 3 days,  2 users,  load average: 0.10, 0.20, 0.30\n");
        connector.reply(
            MEMORY_CMD,
            "       total  used  free\nMem:    7821  2411   312\n",
        );
        connector.reply(DISK_CMD, DF_OUTPUT);
        connector.reply(CPU_CMD, "7.5\n");
        connector.reply(
            NETWORK_CMD,
            "Inter-| Receive | Transmit\n face |bytes packets|bytes packets\n  eth0: 1000 1 0 0 0 0 0 0 500 1 0 0 0 0 0 0\n",
        );
        connector
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<MetricsUpdate>) -> MetricsUpdate {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no update delivered")
            .expect("sink closed")
    }

    async fn wait_idle(manager: &MetricsManager) {
        for _ in 0..100 {
            if manager.state() == PollerState::Idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("poller never returned to idle");
    }

    #[tokio::test]
    async fn test_first_snapshot_is_immediate() {
        let connector = scripted();
        let manager = MetricsManager::new(connector.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager
            .start(request("c1", Duration::from_secs(3600), &[]), tx)
            .await;

        match recv(&mut rx).await {
            MetricsUpdate::Success { data } => {
                assert!(data.uptime.starts_with("10:00:00 up 3 days"));
                assert_eq!(data.memory.total, 7821);
                assert_eq!(data.disk.percent, "44%");
                assert_eq!(data.cpu, 7.5);
                assert_eq!(data.network, NetworkRate::default());
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert_eq!(manager.state(), PollerState::Polling);
        assert_eq!(manager.target().await.as_deref(), Some("c1"));

        assert!(manager.stop().await);
        assert_eq!(manager.state(), PollerState::Idle);
        assert!(connector.last_session().unwrap().was_ended());
    }

    #[tokio::test]
    async fn test_disk_failure_stops_and_restart_recovers() {
        let connector = scripted();
        connector.fail(DISK_CMD, 1, "df: /: No such file or directory");
        let manager = MetricsManager::new(connector.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager
            .start(request("c1", Duration::from_millis(20), &[]), tx.clone())
            .await;

        assert!(recv(&mut rx).await.is_error());
        wait_idle(&manager).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "exactly one error update expected");

        connector.reply(DISK_CMD, DF_OUTPUT);
        manager
            .start(request("c1", Duration::from_millis(20), &[]), tx)
            .await;
        match recv(&mut rx).await {
            MetricsUpdate::Success { data } => assert_eq!(data.network, NetworkRate::default()),
            other => panic!("unexpected update: {other:?}"),
        }
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_service_failure_is_isolated() {
        let connector = scripted();
        connector.reply("systemctl is-active nginx", "active\n");
        connector.fail("systemctl is-active redis", 3, "");
        let manager = MetricsManager::new(connector.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager
            .start(
                request("c1", Duration::from_secs(3600), &["nginx", "redis", "x;reboot"]),
                tx,
            )
            .await;

        match recv(&mut rx).await {
            MetricsUpdate::Success { data } => {
                assert_eq!(data.memory.used, 2411);
                assert_eq!(data.services.len(), 3);
                assert_eq!(data.services[0].state, "active");
                assert!(data.services[0].active);
                assert_eq!(data.services[1].state, "failed");
                assert!(!data.services[1].active);
                assert_eq!(data.services[2].state, "unknown");
            }
            other => panic!("unexpected update: {other:?}"),
        }
        manager.stop().await;

        assert!(!connector
            .commands()
            .iter()
            .any(|c| c.contains("reboot")));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_once() {
        let connector = scripted();
        connector.fail_dials(Some("connection refused"));
        let manager = MetricsManager::new(connector.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager
            .start(request("c1", Duration::from_millis(20), &[]), tx)
            .await;

        match recv(&mut rx).await {
            MetricsUpdate::Error { message } => assert!(message.contains("connection refused")),
            other => panic!("unexpected update: {other:?}"),
        }
        wait_idle(&manager).await;
        assert!(connector.commands().is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_tick_suppresses_delivery() {
        let connector = scripted();
        connector.delay(UPTIME_CMD, Duration::from_millis(300));
        let manager = MetricsManager::new(connector.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager
            .start(request("c1", Duration::from_secs(3600), &[]), tx)
            .await;

        // Wait until the first battery is in flight
        for _ in 0..100 {
            if connector.commands().iter().any(|c| c == UPTIME_CMD) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(manager.stop().await);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.state(), PollerState::Idle);
    }

    #[tokio::test]
    async fn test_start_replaces_previous_poller() {
        let connector = scripted();
        let manager = MetricsManager::new(connector.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager
            .start(request("c1", Duration::from_secs(3600), &[]), tx.clone())
            .await;
        recv(&mut rx).await;
        manager
            .start(request("c2", Duration::from_secs(3600), &[]), tx)
            .await;
        recv(&mut rx).await;

        let sessions = connector.sessions();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].was_ended());
        assert!(!sessions[1].was_ended());
        assert_eq!(manager.target().await.as_deref(), Some("c2"));

        assert!(!manager.stop_for("c1").await);
        assert!(manager.stop_for("c2").await);
        assert!(sessions[1].was_ended());
    }
}
