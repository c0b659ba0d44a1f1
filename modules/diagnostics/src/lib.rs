//! Connectivity diagnostics: five independent probes per target, targets
//! diagnosed one after another.

pub mod probes;

pub use probes::{http_client, DnsProbe, HttpProbe, PingProbe, Probe, TcpConnectProbe};

use recon_core::batch::{self, panic_message, BatchOptions, BatchStream};
use recon_core::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub status: bool,
    pub message: String,
}

impl TestResult {
    fn error(cause: impl std::fmt::Display) -> Self {
        TestResult { status: false, message: format!("Error: {}", cause) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetTests {
    pub connection: TestResult,
    pub dns: TestResult,
    pub ping: TestResult,
    pub http: TestResult,
    pub https: TestResult,
}

impl TargetTests {
    /// Every probe slot carries the same failure.
    pub fn all_failed(message: &str) -> Self {
        let r = TestResult::error(message);
        TargetTests { connection: r.clone(), dns: r.clone(), ping: r.clone(), http: r.clone(), https: r }
    }

    pub fn passed(&self) -> usize {
        [&self.connection, &self.dns, &self.ping, &self.http, &self.https].iter().filter(|r| r.status).count()
    }
}

pub type DiagnosticReport = BTreeMap<String, TargetTests>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Connection,
    Dns,
    Ping,
    Http,
    Https,
}

impl ProbeKind {
    fn messages(self) -> (&'static str, &'static str) {
        match self {
            ProbeKind::Connection => ("Connected", "No connection available"),
            ProbeKind::Dns => ("DNS resolved", "DNS resolution failed"),
            ProbeKind::Ping => ("Host responds to ping", "Host not responding to ping"),
            ProbeKind::Http => ("HTTP available", "HTTP connection failed"),
            ProbeKind::Https => ("HTTPS available", "HTTPS connection failed"),
        }
    }

    fn outcome(self, res: Result<bool>) -> TestResult {
        let (ok, down) = self.messages();
        match res {
            Ok(true) => TestResult { status: true, message: ok.to_string() },
            Ok(false) => TestResult { status: false, message: down.to_string() },
            Err(e) => TestResult::error(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsOptions {
    /// Per-probe budget.
    pub timeout: Duration,
    pub ping_program: String,
    pub connect_ports: Vec<u16>,
    pub user_agent: String,
}

impl Default for DiagnosticsOptions {
    fn default() -> Self {
        DiagnosticsOptions {
            timeout: Duration::from_secs(5),
            ping_program: "ping".to_string(),
            connect_ports: vec![443, 80],
            user_agent: format!("recon/{}", recon_core::version()),
        }
    }
}

#[derive(Clone)]
pub struct ProbeSet {
    pub connection: Arc<dyn Probe>,
    pub dns: Arc<dyn Probe>,
    pub ping: Arc<dyn Probe>,
    pub http: Arc<dyn Probe>,
    pub https: Arc<dyn Probe>,
}

impl ProbeSet {
    pub fn standard(opts: &DiagnosticsOptions) -> Result<Self> {
        let client = http_client(opts.timeout, &opts.user_agent)?;
        let mut ping = PingProbe::system(opts.timeout);
        ping.template.program = opts.ping_program.clone();
        Ok(ProbeSet {
            connection: Arc::new(TcpConnectProbe { ports: opts.connect_ports.clone(), timeout: opts.timeout }),
            dns: Arc::new(DnsProbe { timeout: opts.timeout }),
            ping: Arc::new(ping),
            http: Arc::new(HttpProbe::http(client.clone())),
            https: Arc::new(HttpProbe::https(client)),
        })
    }
}

pub struct DiagnosticsRunner {
    probes: ProbeSet,
}

impl DiagnosticsRunner {
    pub fn new(opts: DiagnosticsOptions) -> Result<Self> {
        Ok(Self::with_probes(ProbeSet::standard(&opts)?))
    }

    pub fn with_probes(probes: ProbeSet) -> Self {
        DiagnosticsRunner { probes }
    }

    /// Run all five probes for one target. A failing or panicking probe only
    /// affects its own slot.
    pub async fn diagnose(&self, target: &str) -> TargetTests {
        let p = &self.probes;
        let (connection, dns, ping, http, https) = tokio::join!(
            isolated(&p.connection, target),
            isolated(&p.dns, target),
            isolated(&p.ping, target),
            isolated(&p.http, target),
            isolated(&p.https, target),
        );
        let tests = TargetTests {
            connection: ProbeKind::Connection.outcome(connection),
            dns: ProbeKind::Dns.outcome(dns),
            ping: ProbeKind::Ping.outcome(ping),
            http: ProbeKind::Http.outcome(http),
            https: ProbeKind::Https.outcome(https),
        };
        debug!(host = target, passed = tests.passed(), "diagnostics finished");
        tests
    }

    /// Diagnose targets strictly in input order, yielding each as it finishes.
    pub fn diagnose_all(self: &Arc<Self>, targets: Vec<String>) -> Result<BatchStream<TargetTests>> {
        let runner = self.clone();
        batch::run_streamed(
            targets,
            BatchOptions::sequential(),
            move |t| {
                let runner = runner.clone();
                async move { runner.diagnose(&t).await }
            },
            |t, msg| {
                warn!(host = t, error = %msg, "diagnostics aborted");
                TargetTests::all_failed(&msg)
            },
        )
    }

    pub async fn diagnose_report(self: &Arc<Self>, targets: Vec<String>) -> Result<DiagnosticReport> {
        let mut stream = self.diagnose_all(targets)?;
        let mut report = DiagnosticReport::new();
        while let Some((t, tests)) = stream.next().await {
            report.insert(t, tests);
        }
        Ok(report)
    }
}

/// Run one probe on its own task so a panic becomes that probe's error.
async fn isolated(probe: &Arc<dyn Probe>, target: &str) -> Result<bool> {
    let probe = probe.clone();
    let target = target.to_string();
    match tokio::spawn(async move { probe.check(&target).await }).await {
        Ok(res) => res,
        Err(e) => Err(Error::Probe(panic_message(e))),
    }
}

/// Fixed answer, for wiring tests and dry runs.
#[derive(Debug, Clone)]
pub struct StaticProbe(pub std::result::Result<bool, String>);

#[async_trait::async_trait]
impl Probe for StaticProbe {
    async fn check(&self, _target: &str) -> Result<bool> {
        self.0.clone().map_err(Error::Probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn set(connection: Arc<dyn Probe>, dns: Arc<dyn Probe>) -> ProbeSet {
        ProbeSet {
            connection,
            dns,
            ping: Arc::new(StaticProbe(Ok(true))),
            http: Arc::new(StaticProbe(Ok(false))),
            https: Arc::new(StaticProbe(Ok(true))),
        }
    }

    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl Probe for Recording {
        async fn check(&self, target: &str) -> Result<bool> {
            if target == "slow.example" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.0.lock().unwrap().push(target.to_string());
            Ok(true)
        }
    }

    struct Crashing;

    #[async_trait]
    impl Probe for Crashing {
        async fn check(&self, _target: &str) -> Result<bool> {
            panic!("dns resolver crashed");
        }
    }

    #[tokio::test]
    async fn panicking_probe_only_fails_its_own_slot() {
        let ok: Arc<StaticProbe> = Arc::new(StaticProbe(Ok(true)));
        let runner = Arc::new(DiagnosticsRunner::with_probes(ProbeSet {
            connection: ok.clone(),
            dns: Arc::new(Crashing),
            ping: ok.clone(),
            http: ok.clone(),
            https: ok,
        }));
        let report = runner.diagnose_report(vec!["example.com".into()]).await.unwrap();
        let t = &report["example.com"];
        assert!(!t.dns.status);
        assert_eq!(t.dns.message, "Error: Unexpected error: dns resolver crashed");
        assert_eq!(t.connection.message, "Connected");
        assert_eq!(t.ping.message, "Host responds to ping");
        assert_eq!(t.http.message, "HTTP available");
        assert_eq!(t.https.message, "HTTPS available");
        assert_eq!(t.passed(), 4);
    }

    #[tokio::test]
    async fn targets_are_diagnosed_in_input_order() {
        let rec = Arc::new(Recording(Mutex::new(Vec::new())));
        let runner = Arc::new(DiagnosticsRunner::with_probes(set(rec.clone(), Arc::new(Crashing))));
        let targets = vec!["slow.example".to_string(), "mid.example".to_string(), "fast.example".to_string()];
        let mut stream = runner.diagnose_all(targets).unwrap();
        let mut seen = Vec::new();
        while let Some((t, tests)) = stream.next().await {
            assert!(tests.connection.status);
            assert!(tests.dns.message.starts_with("Error: Unexpected error"));
            seen.push(t);
        }
        assert_eq!(seen, vec!["slow.example", "mid.example", "fast.example"]);
        assert_eq!(*rec.0.lock().unwrap(), vec!["slow.example", "mid.example", "fast.example"]);
    }

    #[test]
    fn aborted_target_repeats_one_error_in_every_slot() {
        let t = TargetTests::all_failed("Unexpected error: boom");
        let all = [&t.connection, &t.dns, &t.ping, &t.http, &t.https];
        assert!(all.iter().all(|r| !r.status && r.message == "Error: Unexpected error: boom"));
        assert_eq!(t.passed(), 0);
    }

    #[tokio::test]
    async fn empty_targets_are_rejected() {
        let runner = Arc::new(DiagnosticsRunner::with_probes(set(
            Arc::new(StaticProbe(Ok(true))),
            Arc::new(StaticProbe(Ok(true))),
        )));
        assert!(matches!(runner.diagnose_report(Vec::new()).await, Err(Error::EmptyTargets)));
    }

    #[tokio::test]
    async fn report_is_keyed_by_target() {
        let runner = Arc::new(DiagnosticsRunner::with_probes(set(
            Arc::new(StaticProbe(Ok(false))),
            Arc::new(StaticProbe(Ok(true))),
        )));
        let report = runner.diagnose_report(vec!["b.example".into(), "a.example".into()]).await.unwrap();
        assert_eq!(report.keys().collect::<Vec<_>>(), vec!["a.example", "b.example"]);
        let v = serde_json::to_value(&report["a.example"]).unwrap();
        assert_eq!(v["connection"], serde_json::json!({"status": false, "message": "No connection available"}));
        assert_eq!(v["dns"]["message"], "DNS resolved");
    }

    #[test]
    fn standard_probes_build_without_network() {
        let opts = DiagnosticsOptions { ping_program: "/bin/ping".into(), ..Default::default() };
        assert!(ProbeSet::standard(&opts).is_ok());
    }
}
