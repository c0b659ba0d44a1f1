//! Reading nmap's verbose progress lines and its grepable (`-oG`) report.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortService {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedScan {
    /// Sorted, unique.
    pub open_ports: Vec<u16>,
    pub services: Vec<PortService>,
    pub os: Option<String>,
}

/// Parse whatever the scanner printed, complete or not.
///
/// `Discovered open port N/proto on HOST` lines arrive while the scan runs, so
/// they survive a timeout; the grepable `Ports:` field only shows up at the end
/// and carries service and version detail.
pub fn parse_nmap_output<S: AsRef<str>>(lines: &[S]) -> ParsedScan {
    let mut services: BTreeMap<(u16, String), PortService> = BTreeMap::new();
    let mut os = None;
    for line in lines {
        let line = line.as_ref().trim_end();
        if let Some((port, proto)) = parse_discovered(line) {
            services.entry((port, proto.clone())).or_insert(PortService {
                port,
                protocol: proto,
                state: "open".to_string(),
                service: None,
                version: None,
            });
            continue;
        }
        if !line.starts_with("Host:") {
            continue;
        }
        for field in line.split('\t') {
            if let Some(ports) = field.strip_prefix("Ports: ") {
                for svc in ports.split(", ").filter_map(parse_port_entry) {
                    services.insert((svc.port, svc.protocol.clone()), svc);
                }
            } else if let Some(found) = field.strip_prefix("OS: ") {
                let found = found.trim();
                if !found.is_empty() {
                    os = Some(found.to_string());
                }
            }
        }
    }
    let mut open_ports: Vec<u16> = services.keys().map(|(p, _)| *p).collect();
    open_ports.dedup();
    ParsedScan { open_ports, services: services.into_values().collect(), os }
}

fn parse_discovered(line: &str) -> Option<(u16, String)> {
    let rest = line.strip_prefix("Discovered open port ")?;
    let spec = rest.split_whitespace().next()?;
    let (port, proto) = spec.split_once('/')?;
    Some((port.parse().ok()?, proto.to_string()))
}

// port/state/protocol/owner/service/rpc_info/version/
fn parse_port_entry(entry: &str) -> Option<PortService> {
    let parts: Vec<&str> = entry.trim().split('/').collect();
    if parts.len() < 3 {
        return None;
    }
    let port: u16 = parts[0].parse().ok()?;
    let state = parts[1];
    if !state.starts_with("open") {
        return None;
    }
    let non_empty = |i: usize| parts.get(i).map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string);
    Some(PortService {
        port,
        protocol: parts[2].to_string(),
        state: state.to_string(),
        service: non_empty(4),
        version: non_empty(6),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grepable_report_with_services_and_os() {
        let out = [
            "# Nmap 7.94 scan initiated as: nmap -p 1-65535 -sV -O -oG - 10.0.0.1",
            "Host: 10.0.0.1 (gw.lan)\tStatus: Up",
            "Host: 10.0.0.1 (gw.lan)\tPorts: 22/open/tcp//ssh//OpenSSH 8.9p1 Ubuntu/, 80/open/tcp//http//nginx 1.18.0/, 8080/closed/tcp//http-proxy///\tIgnored State: closed (65532)\tOS: Linux 5.0 - 5.14\tSeq Index: 260",
            "# Nmap done at Sat Oct 17 10:00:00 2026 -- 1 IP address (1 host up) scanned in 42.10 seconds",
        ];
        let p = parse_nmap_output(&out);
        assert_eq!(p.open_ports, vec![22, 80]);
        assert_eq!(p.services[0].service.as_deref(), Some("ssh"));
        assert_eq!(p.services[0].version.as_deref(), Some("OpenSSH 8.9p1 Ubuntu"));
        assert_eq!(p.services[1].version.as_deref(), Some("nginx 1.18.0"));
        assert_eq!(p.os.as_deref(), Some("Linux 5.0 - 5.14"));
    }

    #[test]
    fn progress_lines_alone_give_ports() {
        let out = [
            "Starting Nmap 7.94",
            "Discovered open port 443/tcp on 93.184.216.34",
            "Discovered open port 80/tcp on 93.184.216.34",
            "Discovered open port 443/tcp on 93.184.216.34",
        ];
        let p = parse_nmap_output(&out);
        assert_eq!(p.open_ports, vec![80, 443]);
        assert!(p.services.iter().all(|s| s.service.is_none()));
        assert_eq!(p.os, None);
    }

    #[test]
    fn report_detail_overrides_progress_lines() {
        let out = [
            "Discovered open port 22/tcp on 10.0.0.1",
            "Host: 10.0.0.1 ()\tPorts: 22/open/tcp//ssh///",
        ];
        let p = parse_nmap_output(&out);
        assert_eq!(p.services.len(), 1);
        assert_eq!(p.services[0].service.as_deref(), Some("ssh"));
        assert_eq!(p.services[0].version, None);
    }

    #[test]
    fn same_port_on_two_protocols_is_listed_once() {
        let out = ["Host: 10.0.0.1 ()\tPorts: 53/open/tcp//domain///, 53/open|filtered/udp//domain///"];
        let p = parse_nmap_output(&out);
        assert_eq!(p.open_ports, vec![53]);
        assert_eq!(p.services.len(), 2);
    }

    #[test]
    fn garbage_is_ignored() {
        let p = parse_nmap_output(&["", "Host: x\tPorts: nonsense", "Discovered open port abc/tcp on x"]);
        assert_eq!(p, ParsedScan::default());
    }
}
