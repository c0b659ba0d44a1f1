use anyhow::{Context, Result};
use blocklist::{BlocklistSet, DOMAINS_FILE, LINKS_FILE};
use diagnostics::DiagnosticsOptions;
use port_scan::{ScanProfile, ScanProfiles};
use recon_core::batch::BatchOptions;
use recon_core::process::CommandTemplate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "recon.yaml";
pub const DEFAULT_BLOCKLIST_DIR: &str = "phishing";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct BlocklistConfig {
    pub dir: Option<PathBuf>,
    pub domains_file: Option<String>,
    pub links_file: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ProfileConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

impl ProfileConfig {
    fn apply(&self, base: &mut ScanProfile) {
        if let Some(p) = &self.program {
            base.template.program = p.clone();
        }
        if let Some(a) = &self.args {
            base.template.args = a.clone();
        }
        if let Some(t) = self.timeout_secs {
            base.timeout = Duration::from_secs(t);
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScanConfig {
    pub concurrency: Option<usize>,
    pub qps: Option<u32>,
    pub format: Option<String>,
    pub fast: Option<ProfileConfig>,
    pub deep: Option<ProfileConfig>,
    /// nuclei command line for `recon vuln`.
    pub vuln: Option<ProfileConfig>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct DiagnosticsConfig {
    pub timeout_ms: Option<u64>,
    pub ping_program: Option<String>,
    pub connect_ports: Option<Vec<u16>>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct CacheConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub blocklist: Option<BlocklistConfig>,
    pub scan: Option<ScanConfig>,
    pub diagnostics: Option<DiagnosticsConfig>,
    pub cache: Option<CacheConfig>,
}

impl Config {
    pub fn blocklists(&self, dir_override: Option<&Path>) -> BlocklistSet {
        let b = self.blocklist.clone().unwrap_or_default();
        let dir = dir_override.map(Path::to_path_buf).or(b.dir).unwrap_or_else(|| PathBuf::from(DEFAULT_BLOCKLIST_DIR));
        BlocklistSet::with_files(
            dir,
            b.domains_file.as_deref().unwrap_or(DOMAINS_FILE),
            b.links_file.as_deref().unwrap_or(LINKS_FILE),
        )
    }

    pub fn scan_profiles(&self) -> ScanProfiles {
        let mut profiles = ScanProfiles::default();
        if let Some(s) = &self.scan {
            if let Some(f) = &s.fast {
                f.apply(&mut profiles.fast);
            }
            if let Some(d) = &s.deep {
                d.apply(&mut profiles.deep);
            }
        }
        profiles
    }

    pub fn vuln_profile(&self) -> ScanProfile {
        let mut profile = ScanProfile::vuln();
        if let Some(v) = self.scan.as_ref().and_then(|s| s.vuln.as_ref()) {
            v.apply(&mut profile);
        }
        profile
    }

    /// Flags win over the file, the file over defaults.
    pub fn batch_options(&self, concurrency: Option<usize>, qps: Option<u32>) -> BatchOptions {
        let s = self.scan.clone().unwrap_or_default();
        let mut opts = BatchOptions::default();
        if let Some(c) = concurrency.or(s.concurrency) {
            opts.concurrency = c.max(1);
        }
        opts.qps = qps.or(s.qps).filter(|q| *q > 0);
        opts
    }

    pub fn diagnostics_options(&self) -> DiagnosticsOptions {
        let mut opts = DiagnosticsOptions::default();
        if let Some(d) = &self.diagnostics {
            if let Some(ms) = d.timeout_ms {
                opts.timeout = Duration::from_millis(ms);
            }
            if let Some(p) = &d.ping_program {
                opts.ping_program = p.clone();
            }
            if let Some(ports) = &d.connect_ports {
                opts.connect_ports = ports.clone();
            }
        }
        opts
    }

    pub fn cache_path(&self, cli_override: Option<&Path>) -> Option<PathBuf> {
        cli_override.map(Path::to_path_buf).or_else(|| self.cache.as_ref().and_then(|c| c.path.clone()))
    }
}

/// Load `path`, or `./recon.yaml` when no path is given and the file exists.
/// A missing default file is not an error; a malformed one is.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() {
                p.to_path_buf()
            } else {
                return Ok(Config::default());
            }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&s).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse_config(s: &str) -> Result<Config> {
    Ok(serde_yaml::from_str::<Option<Config>>(s)?.unwrap_or_default())
}

/// Keep the template shape the profiles expect.
pub fn template_has_placeholder(t: &CommandTemplate) -> bool {
    t.args.iter().any(|a| a.contains(recon_core::process::TARGET_PLACEHOLDER))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
blocklist:
  dir: /srv/lists
  links_file: links.txt
scan:
  concurrency: 8
  qps: 0
  fast:
    timeout_secs: 30
  deep:
    program: /usr/local/bin/nmap
    args: ["-sV", "{target}"]
  vuln:
    timeout_secs: 120
diagnostics:
  timeout_ms: 1500
  ping_program: /bin/ping
cache:
  path: /var/tmp/recon.db
"#;

    #[test]
    fn sections_layer_over_defaults() {
        let cfg = parse_config(SAMPLE).unwrap();
        let lists = cfg.blocklists(None);
        assert_eq!(lists.domains, vec![PathBuf::from("/srv/lists").join(DOMAINS_FILE)]);
        assert_eq!(lists.links, vec![PathBuf::from("/srv/lists/links.txt")]);

        let p = cfg.scan_profiles();
        assert_eq!(p.fast.timeout, Duration::from_secs(30));
        assert_eq!(p.fast.template, ScanProfile::fast().template);
        assert_eq!(p.deep.template.program, "/usr/local/bin/nmap");
        assert!(template_has_placeholder(&p.deep.template));
        assert_eq!(p.deep.timeout, ScanProfile::deep().timeout);
        let v = cfg.vuln_profile();
        assert_eq!(v.timeout, Duration::from_secs(120));
        assert_eq!(v.template, ScanProfile::vuln().template);

        let d = cfg.diagnostics_options();
        assert_eq!(d.timeout, Duration::from_millis(1500));
        assert_eq!(d.ping_program, "/bin/ping");
        assert_eq!(cfg.cache_path(None), Some(PathBuf::from("/var/tmp/recon.db")));
    }

    #[test]
    fn flags_override_file() {
        let cfg = parse_config(SAMPLE).unwrap();
        assert_eq!(cfg.batch_options(None, None), BatchOptions { concurrency: 8, qps: None });
        assert_eq!(cfg.batch_options(Some(2), Some(10)), BatchOptions { concurrency: 2, qps: Some(10) });
        assert_eq!(cfg.blocklists(Some(Path::new("/tmp/x"))).domains, vec![PathBuf::from("/tmp/x").join(DOMAINS_FILE)]);
        assert_eq!(cfg.cache_path(Some(Path::new("c.db"))), Some(PathBuf::from("c.db")));
    }

    #[test]
    fn empty_file_means_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.batch_options(None, None), BatchOptions::default());
        assert_eq!(cfg.blocklists(None), BlocklistSet::from_dir(DEFAULT_BLOCKLIST_DIR));
        assert_eq!(cfg.scan_profiles(), ScanProfiles::default());
        assert_eq!(cfg.vuln_profile(), ScanProfile::vuln());
        assert_eq!(cfg.cache_path(None), None);
    }

    #[test]
    fn malformed_file_is_reported() {
        assert!(parse_config("scan: [1, 2").is_err());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "scan:\n  concurrency: lots\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
