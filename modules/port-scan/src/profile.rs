use anyhow::{bail, Result};
use recon_core::process::CommandTemplate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Open ports only, no service or OS detection.
    Fast,
    /// Service/version and OS detection.
    Deep,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Fast => f.write_str("fast"),
            ScanMode::Deep => f.write_str("deep"),
        }
    }
}

/// The scanner command line and how long it may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProfile {
    pub template: CommandTemplate,
    pub timeout: Duration,
}

impl ScanProfile {
    pub fn fast() -> Self {
        ScanProfile {
            template: CommandTemplate::new("nmap", ["-p-", "-n", "--open", "-T4", "-v", "-oG", "-", "{target}"]),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn deep() -> Self {
        ScanProfile {
            template: CommandTemplate::new("nmap", ["-p", "1-65535", "-sV", "-O", "-v", "-oG", "-", "{target}"]),
            timeout: Duration::from_secs(300),
        }
    }

    /// nuclei with JSON-lines findings on stdout, one target per run.
    pub fn vuln() -> Self {
        ScanProfile {
            template: CommandTemplate::new("nuclei", ["-target", "{target}", "-jsonl", "-silent", "-no-color"]),
            timeout: Duration::from_secs(900),
        }
    }

    /// Replace the profile's port selection (`-p-` or `-p <spec>`) with `ports`.
    pub fn restrict_ports(&mut self, ports: &[u16]) {
        let list = ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
        let mut args = Vec::with_capacity(self.template.args.len() + 2);
        let mut iter = self.template.args.iter();
        while let Some(a) = iter.next() {
            match a.as_str() {
                "-p-" => {}
                "-p" => {
                    iter.next();
                }
                _ => args.push(a.clone()),
            }
        }
        args.insert(0, list);
        args.insert(0, "-p".to_string());
        self.template.args = args;
    }

    /// [`restrict_ports`](Self::restrict_ports) from a textual selection.
    pub fn restrict_to(&mut self, selection: &str) -> Result<()> {
        let ports = port_list(selection)?;
        self.restrict_ports(&ports);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProfiles {
    pub fast: ScanProfile,
    pub deep: ScanProfile,
}

impl Default for ScanProfiles {
    fn default() -> Self {
        ScanProfiles { fast: ScanProfile::fast(), deep: ScanProfile::deep() }
    }
}

impl ScanProfiles {
    pub fn get(&self, mode: ScanMode) -> &ScanProfile {
        match mode {
            ScanMode::Fast => &self.fast,
            ScanMode::Deep => &self.deep,
        }
    }
}

/// Ports named by an nmap-style selection such as `22,80,8000-8100`,
/// ascending and without repeats.
pub fn port_list(selection: &str) -> Result<Vec<u16>> {
    let mut ports = BTreeSet::new();
    for item in selection.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (lo, hi) = match item.split_once('-') {
            Some((lo, hi)) => (port_number(lo)?, port_number(hi)?),
            None => {
                let p = port_number(item)?;
                (p, p)
            }
        };
        if lo > hi {
            bail!("port range {} runs backwards", item);
        }
        ports.extend(lo..=hi);
    }
    if ports.is_empty() {
        bail!("port selection {:?} names no ports", selection);
    }
    Ok(ports.into_iter().collect())
}

fn port_number(text: &str) -> Result<u16> {
    match text.trim().parse::<u16>() {
        Ok(0) | Err(_) => bail!("{:?} is not a port between 1 and 65535", text.trim()),
        Ok(p) => Ok(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_sorted_and_merged() {
        assert_eq!(port_list("443, 22,80").unwrap(), vec![22, 80, 443]);
        assert_eq!(port_list("8080,8079-8081,8080").unwrap(), vec![8079, 8080, 8081]);
        assert_eq!(port_list("65535").unwrap(), vec![65535]);
    }

    #[test]
    fn bad_selections_say_what_is_wrong() {
        let cases = [
            ("0", "not a port"),
            ("65536", "not a port"),
            ("ssh", "not a port"),
            ("100-90", "runs backwards"),
            (" ,, ", "names no ports"),
        ];
        for (input, expected) in cases {
            let err = port_list(input).unwrap_err().to_string();
            assert!(err.contains(expected), "{input:?}: {err}");
        }
    }

    #[test]
    fn restrict_to_rejects_without_touching_the_profile() {
        let mut fast = ScanProfile::fast();
        assert!(fast.restrict_to("22-").is_err());
        assert_eq!(fast, ScanProfile::fast());
        fast.restrict_to("443,22").unwrap();
        assert_eq!(&fast.template.args[..2], &["-p".to_string(), "22,443".to_string()]);
    }

    #[test]
    fn modes_differ_only_in_arguments_and_timeout() {
        let (fast, deep) = (ScanProfile::fast(), ScanProfile::deep());
        assert_eq!(fast.template.program, deep.template.program);
        assert!(fast.timeout < deep.timeout);
        assert!(!fast.template.args.iter().any(|a| a == "-sV"));
        assert!(deep.template.args.iter().any(|a| a == "-sV"));
        assert!(fast.template.args.iter().any(|a| a == "{target}"));
        assert!(deep.template.args.iter().any(|a| a == "{target}"));
    }

    #[test]
    fn restrict_ports_replaces_both_forms() {
        let mut fast = ScanProfile::fast();
        fast.restrict_ports(&[22, 443]);
        assert_eq!(&fast.template.args[..2], &["-p".to_string(), "22,443".to_string()]);
        assert!(!fast.template.args.iter().any(|a| a == "-p-"));

        let mut deep = ScanProfile::deep();
        deep.restrict_ports(&[80]);
        assert_eq!(&deep.template.args[..2], &["-p".to_string(), "80".to_string()]);
        assert!(!deep.template.args.iter().any(|a| a == "1-65535"));
    }
}
