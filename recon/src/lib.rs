//! Target reconnaissance engine: classify free-form targets, check them
//! against phishing blocklists, port-scan them, run nuclei vulnerability
//! scans and connectivity diagnostics, with per-session target reuse.

pub mod config;

pub use blocklist::{BlocklistSet, PhishingCheckResult, Verdict};
pub use diagnostics::{DiagnosticReport, DiagnosticsRunner, TargetTests, TestResult};
pub use port_scan::{NmapInvocation, PortScanRunner, ScanMode, ScanResult, VulnFinding, VulnScanResult, VulnScanner};
pub use recon_core::batch::{BatchOptions, BatchStream};
pub use recon_core::cache::{MemoryTargetCache, TargetCache};
pub use recon_core::{classify, normalize, Error, Result, Target, TargetKind};

use config::{template_has_placeholder, Config};
use recon_core::cache::resolve_targets;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for every caller-facing operation. Empty target lists fall back
/// to the targets last used in the same session.
pub struct Engine {
    blocklists: BlocklistSet,
    scanner: Arc<PortScanRunner>,
    vuln: Arc<VulnScanner>,
    diagnostics: Arc<DiagnosticsRunner>,
    batch: BatchOptions,
    cache: Arc<dyn TargetCache>,
}

impl Engine {
    pub fn new(
        blocklists: BlocklistSet,
        scanner: PortScanRunner,
        diagnostics: DiagnosticsRunner,
        cache: Arc<dyn TargetCache>,
    ) -> Self {
        Engine {
            blocklists,
            scanner: Arc::new(scanner),
            vuln: Arc::new(VulnScanner::default()),
            diagnostics: Arc::new(diagnostics),
            batch: BatchOptions::default(),
            cache,
        }
    }

    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_vuln(mut self, vuln: VulnScanner) -> Self {
        self.vuln = Arc::new(vuln);
        self
    }

    pub fn batch(&self) -> BatchOptions {
        self.batch
    }

    pub fn from_config(cfg: &Config, cache: Arc<dyn TargetCache>) -> Result<Self> {
        let profiles = cfg.scan_profiles();
        for (mode, p) in [(ScanMode::Fast, &profiles.fast), (ScanMode::Deep, &profiles.deep)] {
            if !template_has_placeholder(&p.template) {
                warn!(%mode, program = %p.template.program, "scan profile has no {{target}} argument");
            }
        }
        let vuln = cfg.vuln_profile();
        if !template_has_placeholder(&vuln.template) {
            warn!(program = %vuln.template.program, "vulnerability scan profile has no {{target}} argument");
        }
        let diagnostics = DiagnosticsRunner::new(cfg.diagnostics_options())?;
        Ok(Engine::new(cfg.blocklists(None), PortScanRunner::new(profiles), diagnostics, cache)
            .with_vuln(VulnScanner::new(vuln))
            .with_batch(cfg.batch_options(None, None)))
    }

    pub fn blocklists(&self) -> &BlocklistSet {
        &self.blocklists
    }

    pub fn set_blocklists(&mut self, lists: BlocklistSet) {
        self.blocklists = lists;
    }

    async fn resolve(&self, session: &str, targets: Vec<String>) -> Result<Vec<String>> {
        let resolved = resolve_targets(self.cache.as_ref(), session, targets).await?;
        info!(session, targets = resolved.len(), "targets resolved");
        Ok(resolved)
    }

    pub async fn classify_and_check(&self, session: &str, items: Vec<String>) -> Result<PhishingCheckResult> {
        let items = self.resolve(session, items).await?;
        blocklist::check_phishing(&items, &self.blocklists).await
    }

    /// Results arrive as each scan finishes.
    pub async fn scan_targets(&self, session: &str, targets: Vec<String>, mode: ScanMode) -> Result<BatchStream<ScanResult>> {
        let targets = self.resolve(session, targets).await?;
        self.scanner.scan_all(targets, mode, self.batch)
    }

    /// Results in input order.
    pub async fn scan_targets_all(&self, session: &str, targets: Vec<String>, mode: ScanMode) -> Result<Vec<(String, ScanResult)>> {
        Ok(self.scan_targets(session, targets, mode).await?.collect_ordered().await)
    }

    pub async fn invoke_all(&self, session: &str, targets: Vec<String>, mode: ScanMode) -> Result<BatchStream<NmapInvocation>> {
        let targets = self.resolve(session, targets).await?;
        self.scanner.invoke_all(targets, mode, self.batch)
    }

    /// One nuclei run per target, in input order.
    pub async fn vuln_scan(&self, session: &str, targets: Vec<String>) -> Result<BatchStream<VulnScanResult>> {
        let targets = self.resolve(session, targets).await?;
        self.vuln.scan_all(targets)
    }

    pub async fn diagnose(&self, session: &str, targets: Vec<String>) -> Result<BatchStream<TargetTests>> {
        let targets = self.resolve(session, targets).await?;
        self.diagnostics.diagnose_all(targets)
    }

    pub async fn diagnose_report(&self, session: &str, targets: Vec<String>) -> Result<DiagnosticReport> {
        let targets = self.resolve(session, targets).await?;
        self.diagnostics.diagnose_report(targets).await
    }
}
