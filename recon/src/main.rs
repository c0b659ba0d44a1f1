use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use recon::config::{self, Config};
use recon::{
    BatchOptions, DiagnosticReport, Engine, MemoryTargetCache, NmapInvocation, ScanMode, ScanResult, Target,
    TargetCache, TargetTests, VulnScanResult,
};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn,recon=info,recon_core=info,blocklist=info,port_scan=info,diagnostics=info";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Jsonl,
}

impl OutputFormat {
    fn from_config(s: &str) -> Option<Self> {
        match s {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            "jsonl" => Some(OutputFormat::Jsonl),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    Fast,
    Deep,
}

impl From<ModeArg> for ScanMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Fast => ScanMode::Fast,
            ModeArg::Deep => ScanMode::Deep,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "recon", version, about = "Target classification, phishing checks, port and vulnerability scans, connectivity diagnostics")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./recon.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Session key; commands run without targets reuse the session's last targets
    #[arg(long, global = true, default_value = "default")]
    session: String,
    /// SQLite file that keeps session targets between runs
    #[arg(long, global = true, value_name = "FILE")]
    cache: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Classify items as domain, url, ip or unknown
    Classify {
        items: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Check items against the phishing blocklists
    Check {
        items: Vec<String>,
        /// File with newline-delimited items (comments with # and blanks ignored)
        #[arg(long, value_name = "FILE")]
        targets: Option<PathBuf>,
        /// Directory holding ALL-phishing-domains.lst and ALL-phishing-links.lst
        #[arg(long, value_name = "DIR")]
        blocklist_dir: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Port-scan targets with the external scanner
    Scan {
        targets: Vec<String>,
        /// File with newline-delimited targets (comments with # and blanks ignored)
        #[arg(long = "targets", value_name = "FILE")]
        targets_file: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ModeArg::Fast)]
        mode: ModeArg,
        /// Restrict to these ports (e.g., 22,80,443 or 1-1024,8080)
        #[arg(long)]
        ports: Option<String>,
        /// Targets scanned at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Cap on scans started per second; 0 disables pacing
        #[arg(long)]
        qps: Option<u32>,
        /// Print each result as soon as its scan finishes
        #[arg(long, default_value_t = false)]
        stream: bool,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Write one <target>.json report per target into DIR
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
        /// Also write a CSV summary to FILE
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },
    /// Run nuclei against each target, one at a time
    Vuln {
        targets: Vec<String>,
        #[arg(long = "targets", value_name = "FILE")]
        targets_file: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Write one <target>.json findings file per target into DIR
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },
    /// Run connectivity diagnostics (connection, DNS, ping, HTTP, HTTPS)
    Diagnose {
        targets: Vec<String>,
        #[arg(long = "targets", value_name = "FILE")]
        targets_file: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let cfg = config::load_config(cli.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli, cfg))
}

async fn run(cli: Cli, cfg: Config) -> Result<()> {
    let Cli { config: _, session, cache, command } = cli;
    match command {
        Commands::Version => {
            println!("recon {}", recon_core::version());
            Ok(())
        }
        Commands::Classify { items, format } => {
            print_classified(&items, format)?;
            Ok(())
        }
        Commands::Check { items, targets, blocklist_dir, format } => {
            let items = with_targets_file(items, targets.as_deref())?;
            let mut engine = build_engine(&cfg, cache.as_deref()).await?;
            engine.set_blocklists(cfg.blocklists(blocklist_dir.as_deref()));
            let result = engine.classify_and_check(&session, items).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Jsonl => {
                    for (item, verdict) in &result {
                        println!("{}", serde_json::json!({ "item": item, "verdict": verdict }));
                    }
                }
                OutputFormat::Text => {
                    for (item, verdict) in &result {
                        let mark = if verdict.is_flagged() { "PHISHING" } else { "clean" };
                        println!("{}: {}", item, mark);
                    }
                }
            }
            Ok(())
        }
        Commands::Scan { targets, targets_file, mode, ports, concurrency, qps, stream, format, out_dir, csv } => {
            let targets = with_targets_file(targets, targets_file.as_deref())?;
            let format = format
                .or_else(|| cfg.scan.as_ref().and_then(|s| s.format.as_deref()).and_then(OutputFormat::from_config))
                .unwrap_or(OutputFormat::Text);
            let mut engine_cfg = cfg.clone();
            if let Some(selection) = ports {
                let mut profiles = cfg.scan_profiles();
                profiles.fast.restrict_to(&selection)?;
                profiles.deep.restrict_to(&selection)?;
                engine_cfg = with_profiles(engine_cfg, &profiles);
            }
            let engine = build_engine(&engine_cfg, cache.as_deref()).await?.with_batch(cfg.batch_options(concurrency, qps));
            scan(&engine, &session, targets, mode.into(), stream, format, out_dir.as_deref(), csv.as_deref()).await
        }
        Commands::Vuln { targets, targets_file, format, out_dir } => {
            let targets = with_targets_file(targets, targets_file.as_deref())?;
            let engine = build_engine(&cfg, cache.as_deref()).await?;
            vuln(&engine, &session, targets, format, out_dir.as_deref()).await
        }
        Commands::Diagnose { targets, targets_file, format } => {
            let targets = with_targets_file(targets, targets_file.as_deref())?;
            let engine = build_engine(&cfg, cache.as_deref()).await?;
            let mut results = engine.diagnose(&session, targets).await?;
            let mut report = DiagnosticReport::new();
            while let Some((target, tests)) = results.next().await {
                match format {
                    OutputFormat::Text => print_tests(&target, &tests),
                    OutputFormat::Jsonl => println!("{}", serde_json::json!({ "target": target, "tests": tests })),
                    OutputFormat::Json => {}
                }
                report.insert(target, tests);
            }
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(())
        }
    }
}

async fn build_engine(cfg: &Config, cache_flag: Option<&Path>) -> Result<Engine> {
    let cache = open_cache(cfg.cache_path(cache_flag))?;
    Ok(Engine::from_config(cfg, cache)?)
}

#[cfg(feature = "sqlite-cache")]
fn open_cache(path: Option<PathBuf>) -> Result<Arc<dyn TargetCache>> {
    match path {
        Some(p) => {
            let db = target_cache_sqlite::SqliteTargetCache::open(&p).with_context(|| format!("opening cache {}", p.display()))?;
            Ok(Arc::new(db))
        }
        None => Ok(Arc::new(MemoryTargetCache::new())),
    }
}

#[cfg(not(feature = "sqlite-cache"))]
fn open_cache(path: Option<PathBuf>) -> Result<Arc<dyn TargetCache>> {
    if let Some(p) = path {
        warn!(path = %p.display(), "built without sqlite-cache; session targets are not persisted");
    }
    Ok(Arc::new(MemoryTargetCache::new()))
}

/// Carry restricted profiles through the config layer so the engine is built one way.
fn with_profiles(mut cfg: Config, profiles: &port_scan::ScanProfiles) -> Config {
    let as_cfg = |p: &port_scan::ScanProfile| config::ProfileConfig {
        program: Some(p.template.program.clone()),
        args: Some(p.template.args.clone()),
        timeout_secs: Some(p.timeout.as_secs().max(1)),
    };
    let mut scan = cfg.scan.take().unwrap_or_default();
    scan.fast = Some(as_cfg(&profiles.fast));
    scan.deep = Some(as_cfg(&profiles.deep));
    cfg.scan = Some(scan);
    cfg
}

#[allow(clippy::too_many_arguments)]
async fn scan(
    engine: &Engine,
    session: &str,
    targets: Vec<String>,
    mode: ScanMode,
    stream: bool,
    format: OutputFormat,
    out_dir: Option<&Path>,
    csv_path: Option<&Path>,
) -> Result<()> {
    let opts: BatchOptions = engine.batch();
    info!(%mode, concurrency = opts.concurrency, "starting scan");
    if let Some(dir) = out_dir {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let mut results = engine.invoke_all(session, targets, mode).await?;
    let collected: Vec<NmapInvocation> = if stream {
        let mut seen = Vec::with_capacity(results.len());
        while let Some((_, inv)) = results.next().await {
            if let Some(dir) = out_dir {
                write_report(dir, &inv)?;
            }
            print_scan_line(&inv.result, format)?;
            seen.push(inv);
        }
        seen
    } else {
        let ordered: Vec<NmapInvocation> = results.collect_ordered().await.into_iter().map(|(_, inv)| inv).collect();
        if let Some(dir) = out_dir {
            for inv in &ordered {
                write_report(dir, inv)?;
            }
        }
        let scans: Vec<&ScanResult> = ordered.iter().map(|i| &i.result).collect();
        print!("{}", render_ordered(&scans, format, |r| scan_text_line(r))?);
        ordered
    };
    if let Some(path) = csv_path {
        write_csv(path, &collected)?;
    }
    let failed = collected.iter().filter(|i| i.result.error.is_some()).count();
    if failed > 0 {
        warn!(failed, total = collected.len(), "some scans reported errors");
    }
    Ok(())
}

/// Every result in the order given: one JSON array, one JSON object per line,
/// or one text line each.
fn render_ordered<T: Serialize>(items: &[T], format: OutputFormat, text: impl Fn(&T) -> String) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => {
            out.push_str(&serde_json::to_string_pretty(items)?);
            out.push('\n');
        }
        OutputFormat::Jsonl => {
            for item in items {
                out.push_str(&serde_json::to_string(item)?);
                out.push('\n');
            }
        }
        OutputFormat::Text => {
            for item in items {
                out.push_str(&text(item));
                out.push('\n');
            }
        }
    }
    Ok(out)
}

async fn vuln(engine: &Engine, session: &str, targets: Vec<String>, format: OutputFormat, out_dir: Option<&Path>) -> Result<()> {
    if let Some(dir) = out_dir {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let mut results = engine.vuln_scan(session, targets).await?;
    let mut collected: Vec<VulnScanResult> = Vec::with_capacity(results.len());
    while let Some((target, r)) = results.next().await {
        info!(host = %target, findings = r.findings.len(), "vulnerability scan done");
        if let Some(dir) = out_dir {
            write_json(&dir.join(report_file_name(&target)), &r)?;
        }
        if format != OutputFormat::Json {
            print!("{}", render_ordered(std::slice::from_ref(&r), format, vuln_text)?);
        }
        collected.push(r);
    }
    if format == OutputFormat::Json {
        print!("{}", render_ordered(&collected, format, vuln_text)?);
    }
    let failed = collected.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        warn!(failed, total = collected.len(), "some vulnerability scans reported errors");
    }
    Ok(())
}

fn vuln_text(r: &VulnScanResult) -> String {
    let mut text = match &r.error {
        Some(e) => format!("{}: {} findings (error: {})", r.target, r.findings.len(), e),
        None => format!("{}: {} findings", r.target, r.findings.len()),
    };
    for f in &r.findings {
        text.push_str(&format!("\n  [{}] {} {}", f.info.severity, f.template_id, f.matched_at));
    }
    text
}

fn print_scan_line(r: &ScanResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", scan_text_line(r)),
        OutputFormat::Json | OutputFormat::Jsonl => println!("{}", serde_json::to_string(r)?),
    }
    Ok(())
}

fn scan_text_line(r: &ScanResult) -> String {
    let ports = if r.open_ports.is_empty() {
        "no open ports found".to_string()
    } else {
        format!("open ports [{}]", r.open_ports.join(","))
    };
    match &r.error {
        Some(e) => format!("{}: {} (error: {})", r.target, ports, e),
        None => format!("{}: {}", r.target, ports),
    }
}

fn print_tests(target: &str, t: &TargetTests) {
    println!("{}:", target);
    for (name, r) in [("connection", &t.connection), ("dns", &t.dns), ("ping", &t.ping), ("http", &t.http), ("https", &t.https)] {
        println!("  {:<10} {} {}", name, if r.status { "ok  " } else { "FAIL" }, r.message);
    }
}

fn print_classified(items: &[String], format: OutputFormat) -> Result<()> {
    if items.is_empty() {
        return Err(anyhow!("provide at least one item"));
    }
    let classified: Vec<Target> = items.iter().map(|s| Target::classify(s)).collect();
    match format {
        OutputFormat::Text => {
            for t in &classified {
                println!("{}\t{}\t{}", t.kind, t.normalized, t.raw);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&classified)?),
        OutputFormat::Jsonl => {
            for t in &classified {
                println!("{}", serde_json::to_string(t)?);
            }
        }
    }
    Ok(())
}

fn read_targets_file(path: &Path) -> Result<Vec<String>> {
    let fh = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for line in BufReader::new(fh).lines() {
        let line = line?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        out.push(t.to_string());
    }
    Ok(out)
}

fn with_targets_file(mut targets: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        targets.extend(read_targets_file(path)?);
    }
    Ok(targets)
}

/// Report file name for a target; anything outside `[A-Za-z0-9._-]` becomes `_`.
fn report_file_name(target: &str) -> String {
    let safe: String = target
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let safe = safe.trim_start_matches('.');
    if safe.is_empty() {
        "_.json".to_string()
    } else {
        format!("{}.json", safe)
    }
}

fn write_report(dir: &Path, inv: &NmapInvocation) -> Result<()> {
    write_json(&dir.join(report_file_name(&inv.result.target)), inv)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut w = BufWriter::new(File::create(path).with_context(|| format!("creating {}", path.display()))?);
    serde_json::to_writer_pretty(&mut w, value)?;
    writeln!(w)?;
    w.flush()?;
    Ok(())
}

fn write_csv(path: &Path, invocations: &[NmapInvocation]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(File::create(path)?);
    wtr.write_record(["target", "mode", "open_ports", "os", "error", "started_at", "finished_at", "duration_ms"])?;
    for inv in invocations {
        let r = &inv.result;
        wtr.write_record([
            r.target.clone(),
            inv.mode.to_string(),
            r.open_ports.join("|"),
            r.os.clone().unwrap_or_default(),
            r.error.clone().unwrap_or_default(),
            inv.started_at.clone(),
            inv.finished_at.clone(),
            inv.duration_ms.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
