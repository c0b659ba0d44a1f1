//! Template-based vulnerability scanning with nuclei, one target at a time.

use crate::{now_rfc3339, ScanProfile};
use recon_core::batch::{self, BatchOptions, BatchStream};
use recon_core::{sanitize, Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub severity: String,
}

/// One nuclei JSON line. Fields nuclei adds beyond these are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnFinding {
    #[serde(rename = "template-id")]
    pub template_id: String,
    #[serde(default)]
    pub info: FindingInfo,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub host: String,
    #[serde(rename = "matched-at", default)]
    pub matched_at: String,
    #[serde(rename = "extracted-results", default, skip_serializing_if = "Vec::is_empty")]
    pub extracted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VulnScanResult {
    pub target: String,
    pub findings: Vec<VulnFinding>,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
}

impl VulnScanResult {
    pub fn failed(target: &str, error: impl Into<String>) -> Self {
        VulnScanResult {
            target: target.to_string(),
            findings: Vec::new(),
            error: Some(error.into()),
            started_at: String::new(),
            finished_at: now_rfc3339(),
            duration_ms: 0,
        }
    }
}

/// Keep every line that parses as a finding; banners and progress noise are skipped.
pub fn parse_nuclei_output<S: AsRef<str>>(lines: &[S]) -> Vec<VulnFinding> {
    lines
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| match serde_json::from_str::<VulnFinding>(l) {
            Ok(f) => Some(f),
            Err(e) => {
                debug!(error = %e, "skipping unreadable nuclei line");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct VulnScanner {
    profile: ScanProfile,
}

impl Default for VulnScanner {
    fn default() -> Self {
        VulnScanner { profile: ScanProfile::vuln() }
    }
}

impl VulnScanner {
    pub fn new(profile: ScanProfile) -> Self {
        VulnScanner { profile }
    }

    pub fn profile(&self) -> &ScanProfile {
        &self.profile
    }

    /// Never fails: problems end up in `error`, next to any findings read before them.
    pub async fn scan(&self, target: &str) -> VulnScanResult {
        let started = Instant::now();
        let started_at = now_rfc3339();
        let (findings, error) = match sanitize(target) {
            Err(e) => (Vec::new(), Some(e.to_string())),
            Ok(clean) => match self.profile.template.run(&clean, self.profile.timeout).await {
                Err(e) => (Vec::new(), Some(e.to_string())),
                Ok(captured) => {
                    let findings = parse_nuclei_output(&captured.stdout_lines);
                    if captured.timed_out {
                        (findings, Some(Error::ScanTimeout(self.profile.timeout).to_string()))
                    } else if let Some(msg) = captured.exit_failure() {
                        (Vec::new(), Some(Error::ScanProcess(msg).to_string()))
                    } else {
                        (findings, None)
                    }
                }
            },
        };
        match &error {
            Some(e) => warn!(host = target, error = %e, findings = findings.len(), "vulnerability scan finished with error"),
            None => debug!(host = target, findings = findings.len(), "vulnerability scan finished"),
        }
        VulnScanResult {
            target: target.to_string(),
            findings,
            error,
            started_at,
            finished_at: now_rfc3339(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Scan targets one after another in input order.
    pub fn scan_all(self: &Arc<Self>, targets: Vec<String>) -> Result<BatchStream<VulnScanResult>> {
        let scanner = self.clone();
        batch::run_streamed(
            targets,
            BatchOptions::sequential(),
            move |t| {
                let scanner = scanner.clone();
                async move { scanner.scan(&t).await }
            },
            |t, msg| VulnScanResult::failed(t, msg),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::process::CommandTemplate;
    use std::time::Duration;

    const FINDING: &str = r#"{"template-id":"tech-detect","info":{"name":"Wappalyzer Technology Detection","severity":"info","author":["hakluke"]},"type":"http","host":"http://10.0.0.1","matched-at":"http://10.0.0.1/","extracted-results":["nginx"],"timestamp":"2026-01-01T00:00:00Z"}"#;

    fn sh_scanner(script: &str, timeout: Duration) -> Arc<VulnScanner> {
        Arc::new(VulnScanner::new(ScanProfile { template: CommandTemplate::new("sh", ["-c", script, "{target}"]), timeout }))
    }

    #[test]
    fn reads_findings_and_skips_noise() {
        let lines = ["[INF] Current nuclei version: v3.2.0", FINDING, "{broken", ""];
        let found = parse_nuclei_output(&lines);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].template_id, "tech-detect");
        assert_eq!(found[0].info.severity, "info");
        assert_eq!(found[0].kind, "http");
        assert_eq!(found[0].matched_at, "http://10.0.0.1/");
        assert_eq!(found[0].extracted, vec!["nginx"]);
    }

    #[test]
    fn default_profile_targets_one_host_with_jsonl() {
        let p = ScanProfile::vuln();
        assert_eq!(p.template.program, "nuclei");
        assert!(p.template.args.windows(2).any(|w| w == ["-target", "{target}"]));
        assert!(p.template.args.iter().any(|a| a == "-jsonl"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn completed_run_yields_findings() {
        let script = format!("echo '[INF] templates loaded'; echo '{}'", FINDING);
        let r = sh_scanner(&script, Duration::from_secs(10)).scan("10.0.0.1").await;
        assert_eq!(r.error, None);
        assert_eq!(r.findings.len(), 1);
        assert!(!r.finished_at.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_keeps_findings_already_printed() {
        let script = format!("echo '{}'; sleep 30", FINDING);
        let r = sh_scanner(&script, Duration::from_millis(300)).scan("10.0.0.1").await;
        assert_eq!(r.findings.len(), 1);
        assert_eq!(r.error.as_deref(), Some("scan timed out after 0.3s"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sequential_batch_isolates_bad_targets() {
        let scanner = sh_scanner(r#"echo "scanned $0" >&2"#, Duration::from_secs(10));
        let targets = vec!["b.example".to_string(), "x;$(id)/".to_string(), "a.example".to_string()];
        let out = scanner.scan_all(targets).unwrap().collect_ordered().await;
        let keys: Vec<&str> = out.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(keys, vec!["b.example", "x;$(id)/", "a.example"]);
        assert_eq!(out[0].1.error, None);
        assert!(out[1].1.error.as_deref().unwrap().starts_with("invalid target"));
        assert!(out[2].1.findings.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let scanner = Arc::new(VulnScanner::default());
        assert!(matches!(scanner.scan_all(Vec::new()), Err(Error::EmptyTargets)));
    }
}
