//! Gatekeeping for values that end up on an external command line.

use crate::error::{Error, Result};
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

const SHELL_META: &[char] = &[';', '&', '|', '`', '$', '(', ')'];

/// A target that passed [`sanitize`]. Only this type can be rendered into a
/// [`CommandTemplate`](crate::process::CommandTemplate).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SanitizedTarget(String);

impl SanitizedTarget {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SanitizedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hostname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-._]*[A-Za-z0-9]$").expect("hostname regex"))
}

fn is_strict_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    // Ipv4Addr parsing already rejects leading zeros and out-of-range octets.
    parts.iter().all(|p| !p.is_empty() && p.len() <= 3 && p.chars().all(|c| c.is_ascii_digit()))
        && s.parse::<Ipv4Addr>().is_ok()
}

/// Strip shell metacharacters and whitespace, then accept only a dotted-quad
/// IPv4 address or a restrictive hostname.
pub fn sanitize(raw: &str) -> Result<SanitizedTarget> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !SHELL_META.contains(c) && !c.is_whitespace())
        .collect();
    if is_strict_ipv4(&cleaned) || hostname_re().is_match(&cleaned) {
        Ok(SanitizedTarget(cleaned))
    } else {
        Err(Error::InvalidTarget(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ips_and_hostnames() {
        assert_eq!(sanitize("8.8.8.8").unwrap().as_str(), "8.8.8.8");
        assert_eq!(sanitize("example.com").unwrap().as_str(), "example.com");
        assert_eq!(sanitize("  server-01.example.org\n").unwrap().as_str(), "server-01.example.org");
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(matches!(sanitize("8.8.8.8; rm -rf /"), Err(Error::InvalidTarget(_))));
        assert!(matches!(sanitize("$(reboot)/"), Err(Error::InvalidTarget(_))));
        assert!(matches!(sanitize("-oN/tmp/x"), Err(Error::InvalidTarget(_))));
        assert!(matches!(sanitize(""), Err(Error::InvalidTarget(_))));
        assert!(matches!(sanitize(";;;"), Err(Error::InvalidTarget(_))));
    }

    #[test]
    fn output_never_contains_metacharacters() {
        let inputs = ["a;b", "host&&name", "x|y.com", "`id`.com", "$HOME.net", "(a).b", "1.2.3.4"];
        for raw in inputs {
            if let Ok(t) = sanitize(raw) {
                assert!(!t.as_str().contains(SHELL_META), "{:?} -> {:?}", raw, t);
                assert!(!t.as_str().chars().any(char::is_whitespace));
            }
        }
    }

    #[test]
    fn strict_ipv4_octets() {
        assert!(is_strict_ipv4("255.255.255.255"));
        assert!(!is_strict_ipv4("256.1.1.1"));
        assert!(!is_strict_ipv4("1.2.3"));
        // Out-of-range quads fall through to the hostname grammar.
        assert!(sanitize("999.1.1.1").is_ok());
    }
}
