//! Port and vulnerability scanning through external scanners (nmap and
//! nuclei by default), with input sanitization, a hard timeout per target and
//! batch orchestration.

mod parse;
mod profile;
mod vuln;

pub use parse::{parse_nmap_output, ParsedScan, PortService};
pub use profile::{port_list, ScanMode, ScanProfile, ScanProfiles};
pub use vuln::{parse_nuclei_output, FindingInfo, VulnFinding, VulnScanResult, VulnScanner};

use recon_core::batch::{self, BatchOptions, BatchStream};
use recon_core::{sanitize, Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

/// Outcome of scanning one target. `error` may accompany a partial port list,
/// e.g. when the scan timed out after discovering some ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub target: String,
    pub open_ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<PortService>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    pub error: Option<String>,
}

impl ScanResult {
    pub fn failed(target: &str, error: impl Into<String>) -> Self {
        ScanResult { target: target.to_string(), open_ports: Vec::new(), services: Vec::new(), os: None, error: Some(error.into()) }
    }
}

/// Report-grade record of one scanner run.
#[derive(Debug, Clone, Serialize)]
pub struct NmapInvocation {
    #[serde(flatten)]
    pub result: ScanResult,
    pub mode: ScanMode,
    pub raw_output: String,
    pub started_at: String,
    /// Set once, when the run completes.
    pub finished_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PortScanRunner {
    profiles: ScanProfiles,
}

impl PortScanRunner {
    pub fn new(profiles: ScanProfiles) -> Self {
        PortScanRunner { profiles }
    }

    pub fn profiles(&self) -> &ScanProfiles {
        &self.profiles
    }

    /// Scan one target. Never fails: every problem ends up in `error`.
    pub async fn scan(&self, target: &str, mode: ScanMode) -> ScanResult {
        self.invoke(target, mode).await.result
    }

    pub async fn invoke(&self, target: &str, mode: ScanMode) -> NmapInvocation {
        let started = Instant::now();
        let started_at = now_rfc3339();
        let profile = self.profiles.get(mode);
        let mut raw_output = String::new();

        let result = match sanitize(target) {
            Err(e) => ScanResult::failed(target, e.to_string()),
            Ok(clean) => match profile.template.run(&clean, profile.timeout).await {
                Err(e) => ScanResult::failed(target, e.to_string()),
                Ok(captured) => {
                    raw_output = captured.stdout_text();
                    if captured.timed_out {
                        // keep ports reported before the kill
                        let parsed = parse_nmap_output(&captured.stdout_lines);
                        into_result(target, parsed, Some(Error::ScanTimeout(profile.timeout).to_string()))
                    } else if let Some(msg) = captured.exit_failure() {
                        ScanResult::failed(target, Error::ScanProcess(msg).to_string())
                    } else {
                        into_result(target, parse_nmap_output(&captured.stdout_lines), None)
                    }
                }
            },
        };

        match &result.error {
            Some(e) => warn!(host = target, %mode, error = %e, ports = result.open_ports.len(), "scan finished with error"),
            None => debug!(host = target, %mode, ports = result.open_ports.len(), "scan finished"),
        }
        NmapInvocation {
            result,
            mode,
            raw_output,
            started_at,
            finished_at: now_rfc3339(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Scan every target under `opts`, yielding results as they complete.
    pub fn scan_all(self: &Arc<Self>, targets: Vec<String>, mode: ScanMode, opts: BatchOptions) -> Result<BatchStream<ScanResult>> {
        let runner = self.clone();
        batch::run_streamed(
            targets,
            opts,
            move |t| {
                let runner = runner.clone();
                async move { runner.scan(&t, mode).await }
            },
            |t, msg| ScanResult::failed(t, msg),
        )
    }

    /// Scan every target and return the results in input order.
    pub async fn scan_all_collected(self: &Arc<Self>, targets: Vec<String>, mode: ScanMode, opts: BatchOptions) -> Result<Vec<(String, ScanResult)>> {
        Ok(self.scan_all(targets, mode, opts)?.collect_ordered().await)
    }

    /// Like [`scan_all`](Self::scan_all) with full invocation records.
    pub fn invoke_all(self: &Arc<Self>, targets: Vec<String>, mode: ScanMode, opts: BatchOptions) -> Result<BatchStream<NmapInvocation>> {
        let runner = self.clone();
        batch::run_streamed(
            targets,
            opts,
            move |t| {
                let runner = runner.clone();
                async move { runner.invoke(&t, mode).await }
            },
            move |t, msg| NmapInvocation {
                result: ScanResult::failed(t, msg),
                mode,
                raw_output: String::new(),
                started_at: String::new(),
                finished_at: now_rfc3339(),
                duration_ms: 0,
            },
        )
    }
}

fn into_result(target: &str, parsed: ParsedScan, error: Option<String>) -> ScanResult {
    ScanResult {
        target: target.to_string(),
        open_ports: parsed.open_ports.iter().map(|p| p.to_string()).collect(),
        services: parsed.services,
        os: parsed.os,
        error,
    }
}
