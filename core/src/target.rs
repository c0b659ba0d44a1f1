//! Target classification and normalization.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Domain,
    Url,
    Ip,
    Unknown,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetKind::Domain => "domain",
            TargetKind::Url => "url",
            TargetKind::Ip => "ip",
            TargetKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A caller-supplied identifier together with its kind and canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub raw: String,
    pub kind: TargetKind,
    pub normalized: String,
}

impl Target {
    pub fn classify(raw: &str) -> Self {
        Target { raw: raw.to_string(), kind: classify(raw), normalized: normalize(raw) }
    }

    /// Host part for URL targets, `None` for every other kind.
    pub fn host(&self) -> Option<String> {
        match self.kind {
            TargetKind::Url => extract_host(&self.raw),
            _ => None,
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::classify(s)
    }
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)(https?|ftp)://").expect("url regex"))
}

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}$").expect("ipv4 regex"))
}

fn ipv6_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)(?:[a-f0-9]{1,4}:){7}[a-f0-9]{1,4}$").expect("ipv6 regex"))
}

/// Classify a raw identifier. Rules apply in priority order; the function is total.
pub fn classify(s: &str) -> TargetKind {
    if url_re().is_match(s) {
        return TargetKind::Url;
    }
    if ipv4_re().is_match(s) {
        return TargetKind::Ip;
    }
    if s.contains(':') && !s.contains('/') && ipv6_re().is_match(s) {
        return TargetKind::Ip;
    }
    if s.contains('.') && !s.contains(' ') && !s.contains('/') {
        return TargetKind::Domain;
    }
    TargetKind::Unknown
}

/// Lower-case, and for URLs drop trailing slashes. Idempotent.
pub fn normalize(s: &str) -> String {
    let lower = s.to_lowercase();
    match classify(&lower) {
        TargetKind::Url => lower.trim_end_matches('/').to_string(),
        _ => lower,
    }
}

/// Hostname of a URL, lower-cased. Returns `None` on anything unparsable.
pub fn extract_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str().filter(|h| !h.is_empty()).map(|h| h.to_lowercase())
}
