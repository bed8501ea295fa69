//! Integration tests for the shield node
//!
//! These tests drive the radar's polling loop against scripted counter
//! sources and wire it to the real mitigation controller with mocked RCON
//! and firewall collaborators.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use shield_node::error::{Result, ShieldError};
use shield_node::firewall::IngressPolicy;
use shield_node::netdev::SampleSource;
use shield_node::radar::{AttackHandler, AttackRadar, ShutdownSignal};
use shield_node::rcon::{RconConnector, RconSession};
use shield_node::shield::Shield;

const STATUS_FIXTURE: &str = "# userid name uniqueid connected ping loss state adr\n\
#      2 \"TV bot\" BOT                       active\n\
#      3 \"player1\"  [U:1:111111]  00:20  60  0 active 169.254.249.16:18930\n\
#      4 \"player2\"  [U:1:232232]  00:21  61  0 active 169.254.249.130:18930";

const STATUS_BOTS_ONLY: &str = "# userid name uniqueid connected ping loss state adr\n\
#      2 \"TV bot\" BOT                       active";

/// Counter that grows by a fixed step on every read: a constant-rate flood.
struct RampSource {
    iface: &'static str,
    step: u64,
    reads: AtomicU64,
}

impl RampSource {
    fn new(iface: &'static str, step: u64) -> Self {
        Self {
            iface,
            step,
            reads: AtomicU64::new(0),
        }
    }
}

impl SampleSource for RampSource {
    fn sample(&self) -> Result<HashMap<String, u64>> {
        let reads = self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(HashMap::from([(self.iface.to_string(), reads * self.step)]))
    }
}

/// Counter that replays a fixed script, then repeats the final value.
struct ScriptedSource {
    iface: &'static str,
    script: Vec<u64>,
    reads: AtomicU64,
}

impl SampleSource for ScriptedSource {
    fn sample(&self) -> Result<HashMap<String, u64>> {
        let reads = self.reads.fetch_add(1, Ordering::Relaxed) as usize;
        let value = *self
            .script
            .get(reads)
            .unwrap_or_else(|| self.script.last().expect("script is non-empty"));
        Ok(HashMap::from([(self.iface.to_string(), value)]))
    }
}

struct ChannelHandler {
    fired: mpsc::UnboundedSender<u64>,
}

#[async_trait]
impl AttackHandler for ChannelHandler {
    async fn on_attack_detected(&self, _iface: &str, rx_delta: u64) {
        let _ = self.fired.send(rx_delta);
    }
}

struct MockSession {
    status: &'static str,
}

#[async_trait]
impl RconSession for MockSession {
    async fn execute(&mut self, command: &str) -> Result<String> {
        Ok(match command {
            "status" => self.status.to_string(),
            _ => String::new(),
        })
    }
}

struct MockConnector {
    status: &'static str,
}

#[async_trait]
impl RconConnector for MockConnector {
    async fn dial(&self) -> Result<Box<dyn RconSession>> {
        Ok(Box::new(MockSession {
            status: self.status,
        }))
    }
}

#[derive(Default)]
struct RecordingFirewall {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl IngressPolicy for RecordingFirewall {
    async fn restrict_ingress_to(&self, ips: &[String]) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("restrict:{}", ips.join(",")));
        Ok(())
    }

    async fn restore_default_ingress(&self) -> Result<()> {
        self.calls.lock().unwrap().push("restore".to_string());
        Ok(())
    }
}

/// Sample source that never carries the configured interface.
struct EmptySource;

impl SampleSource for EmptySource {
    fn sample(&self) -> Result<HashMap<String, u64>> {
        Ok(HashMap::new())
    }
}

/// Sample source that always fails.
struct BrokenSource;

impl SampleSource for BrokenSource {
    fn sample(&self) -> Result<HashMap<String, u64>> {
        Err(ShieldError::Sample("counters unavailable".to_string()))
    }
}

fn radar_with_handler(
    source: Arc<dyn SampleSource>,
    handler: Arc<dyn AttackHandler>,
) -> AttackRadar {
    AttackRadar::new(
        "eth0".to_string(),
        source,
        100,
        Duration::from_millis(20),
        Duration::from_millis(10),
        handler,
    )
}

#[tokio::test]
async fn test_sustained_surge_fires_detection() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let radar = Arc::new(radar_with_handler(
        Arc::new(RampSource::new("eth0", 200)),
        Arc::new(ChannelHandler { fired: tx }),
    ));

    let shutdown = ShutdownSignal::new();
    let task = {
        let radar = Arc::clone(&radar);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { radar.run(shutdown).await })
    };

    let delta = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("detection should fire within a second")
        .expect("channel open");
    assert_eq!(delta, 200);

    shutdown.request_shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_short_excursion_never_fires() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    // Delta 200 once, then delta 50, then steady: drops below the limit
    // before the sustained window elapses.
    let source = ScriptedSource {
        iface: "eth0",
        script: vec![1, 201, 251],
        reads: AtomicU64::new(0),
    };
    let radar = Arc::new(radar_with_handler(
        Arc::new(source),
        Arc::new(ChannelHandler { fired: tx }),
    ));

    let shutdown = ShutdownSignal::new();
    let task = {
        let radar = Arc::clone(&radar);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { radar.run(shutdown).await })
    };

    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "no detection should fire"
    );

    shutdown.request_shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_steady_traffic_below_limit_never_fires() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let radar = Arc::new(radar_with_handler(
        Arc::new(RampSource::new("eth0", 50)),
        Arc::new(ChannelHandler { fired: tx }),
    ));

    let shutdown = ShutdownSignal::new();
    let task = {
        let radar = Arc::clone(&radar);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { radar.run(shutdown).await })
    };

    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    shutdown.request_shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_missing_interface_and_sample_errors_are_tolerated() {
    for source in [
        Arc::new(EmptySource) as Arc<dyn SampleSource>,
        Arc::new(BrokenSource) as Arc<dyn SampleSource>,
    ] {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let radar = Arc::new(radar_with_handler(source, Arc::new(ChannelHandler { fired: tx })));

        let shutdown = ShutdownSignal::new();
        let task = {
            let radar = Arc::clone(&radar);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { radar.run(shutdown).await })
        };

        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        shutdown.request_shutdown();
        task.await.unwrap();
    }
}

/// Full pipeline: flood → radar → shield → firewall, then automatic
/// rollback once the episode expires.
#[tokio::test]
async fn test_detection_raises_and_lowers_shield() {
    let firewall = RecordingFirewall::default();
    let calls = Arc::clone(&firewall.calls);
    let shield = Shield::new(
        Duration::from_millis(50),
        Arc::new(MockConnector {
            status: STATUS_FIXTURE,
        }),
        Arc::new(firewall),
    );

    let radar = Arc::new(radar_with_handler(
        Arc::new(RampSource::new("eth0", 200)),
        Arc::new(shield.clone()),
    ));

    let shutdown = ShutdownSignal::new();
    let task = {
        let radar = Arc::clone(&radar);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { radar.run(shutdown).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    // Wait for the activation...
    loop {
        if calls.lock().unwrap().iter().any(|c| c.starts_with("restrict")) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "shield never raised");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // ...and for the rollback timer to lower it again.
    loop {
        if calls.lock().unwrap().iter().any(|c| c == "restore") {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "shield never lowered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown.request_shutdown();
    task.await.unwrap();

    assert!(!shield.is_active());
    let calls = calls.lock().unwrap();
    assert_eq!(
        calls.first().unwrap(),
        "restrict:169.254.249.16,169.254.249.130"
    );
    assert_eq!(calls.iter().filter(|c| *c == "restore").count(), 1);
}

/// A server with no human players yields nothing to protect: the episode
/// aborts and the firewall is never touched.
#[tokio::test]
async fn test_empty_roster_never_touches_firewall() {
    let firewall = RecordingFirewall::default();
    let calls = Arc::clone(&firewall.calls);
    let shield = Shield::new(
        Duration::from_millis(50),
        Arc::new(MockConnector {
            status: STATUS_BOTS_ONLY,
        }),
        Arc::new(firewall),
    );

    let radar = Arc::new(radar_with_handler(
        Arc::new(RampSource::new("eth0", 200)),
        Arc::new(shield.clone()),
    ));

    let shutdown = ShutdownSignal::new();
    let task = {
        let radar = Arc::clone(&radar);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { radar.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.request_shutdown();
    task.await.unwrap();

    assert!(!shield.is_active());
    assert!(calls.lock().unwrap().is_empty());
}
