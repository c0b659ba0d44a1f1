//! Phishing blocklist matching over large newline-delimited list files.
//!
//! Lists are streamed, never loaded whole: each file is read line by line and
//! reading stops as soon as every candidate has been found.

use recon_core::{Error, Result, Target, TargetKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

pub const DOMAINS_FILE: &str = "ALL-phishing-domains.lst";
pub const LINKS_FILE: &str = "ALL-phishing-links.lst";

/// Verdict for one checked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Verdict {
    Plain(bool),
    /// URLs: direct hit on the links list, and hit of the URL's host on the domains list.
    Detailed { url: bool, domain: bool },
}

impl Verdict {
    pub fn is_flagged(&self) -> bool {
        match *self {
            Verdict::Plain(b) => b,
            Verdict::Detailed { url, domain } => url || domain,
        }
    }
}

/// Keyed by the caller's original strings, plus `"DOMAIN <url>"` for URLs whose
/// host matched the domains list.
pub type PhishingCheckResult = BTreeMap<String, Verdict>;

/// Which list files back each check category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocklistSet {
    pub domains: Vec<PathBuf>,
    pub links: Vec<PathBuf>,
}

impl BlocklistSet {
    /// The standard `ALL-phishing-*.lst` pair inside `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self::with_files(dir, DOMAINS_FILE, LINKS_FILE)
    }

    pub fn with_files(dir: impl AsRef<Path>, domains_file: &str, links_file: &str) -> Self {
        let dir = dir.as_ref();
        BlocklistSet { domains: vec![dir.join(domains_file)], links: vec![dir.join(links_file)] }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub found: HashSet<String>,
    /// Lines consumed from the reader, comments and blanks included.
    pub lines_read: u64,
}

/// Stream `reader` and move every pending item that appears as a line into
/// `found`. Blank lines and `#` comments are skipped; lines are trimmed and
/// lower-cased. Returns as soon as `pending` is empty.
///
/// `pending` entries must already be lower-case.
pub async fn match_lines<R>(reader: R, pending: &mut HashSet<String>) -> std::io::Result<MatchOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut outcome = MatchOutcome::default();
    if pending.is_empty() {
        return Ok(outcome);
    }
    let mut segments = reader.split(b'\n');
    while let Some(seg) = segments.next_segment().await? {
        outcome.lines_read += 1;
        let line = String::from_utf8_lossy(&seg);
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = line.to_lowercase();
        if pending.remove(&entry) {
            outcome.found.insert(entry);
            if pending.is_empty() {
                break;
            }
        }
    }
    Ok(outcome)
}

/// Check `candidates` against `files` in order. Every candidate gets an entry;
/// those never found are `false`.
///
/// All files must be readable, even ones that end up skipped because every
/// candidate was already found.
pub async fn check_files(candidates: &HashSet<String>, files: &[PathBuf]) -> Result<HashMap<String, bool>> {
    let mut pending: HashSet<String> = candidates.iter().map(|c| c.to_lowercase()).collect();
    let mut result: HashMap<String, bool> = pending.iter().map(|c| (c.clone(), false)).collect();
    if pending.is_empty() {
        return Ok(result);
    }
    for path in files {
        tokio::fs::metadata(path).await.map_err(|source| Error::Blocklist { path: path.clone(), source })?;
    }
    for path in files {
        if pending.is_empty() {
            break;
        }
        let file = File::open(path).await.map_err(|source| Error::Blocklist { path: path.clone(), source })?;
        let outcome = match_lines(BufReader::new(file), &mut pending)
            .await
            .map_err(|source| Error::Blocklist { path: path.clone(), source })?;
        debug!(file = %path.display(), lines = outcome.lines_read, hits = outcome.found.len(), "blocklist scanned");
        for hit in outcome.found {
            result.insert(hit, true);
        }
    }
    Ok(result)
}

/// Classify `items` and check them against `lists`.
///
/// Domains and IPs go against the domains lists, URLs against the links
/// lists, and each URL's host against the domains lists again. A list is only
/// opened when its category has something to check.
pub async fn check_phishing(items: &[String], lists: &BlocklistSet) -> Result<PhishingCheckResult> {
    let targets: Vec<(Target, Option<String>)> = items
        .iter()
        .map(|raw| {
            let t = Target::classify(raw);
            let host = t.host();
            (t, host)
        })
        .collect();

    let mut domain_candidates = HashSet::new();
    let mut link_candidates = HashSet::new();
    for (t, host) in &targets {
        match t.kind {
            TargetKind::Domain | TargetKind::Ip => {
                domain_candidates.insert(t.normalized.clone());
            }
            TargetKind::Url => {
                link_candidates.insert(t.normalized.clone());
                if let Some(h) = host {
                    domain_candidates.insert(h.clone());
                }
            }
            TargetKind::Unknown => {}
        }
    }

    let (domain_hits, link_hits) = tokio::join!(
        check_files(&domain_candidates, &lists.domains),
        check_files(&link_candidates, &lists.links),
    );
    let domain_hits = domain_hits?;
    let link_hits = link_hits?;
    let hit = |map: &HashMap<String, bool>, key: &str| map.get(key).copied().unwrap_or(false);

    let mut result = PhishingCheckResult::new();
    for (t, host) in &targets {
        let verdict = match t.kind {
            TargetKind::Domain | TargetKind::Ip => Verdict::Plain(hit(&domain_hits, &t.normalized)),
            TargetKind::Url => {
                let url = hit(&link_hits, &t.normalized);
                let domain = host.as_deref().map(|h| hit(&domain_hits, h)).unwrap_or(false);
                if domain {
                    result.insert(format!("DOMAIN {}", t.raw), Verdict::Plain(true));
                }
                Verdict::Detailed { url, domain }
            }
            TargetKind::Unknown => Verdict::Plain(false),
        };
        result.insert(t.raw.clone(), verdict);
    }
    let flagged = result.values().filter(|v| v.is_flagged()).count();
    debug!(items = items.len(), flagged, "phishing check done");
    Ok(result)
}
