use std::path::PathBuf;

/// Errors surfaced by the reconnaissance engine.
///
/// Per-target and per-probe failures are normally folded into result fields;
/// only setup failures (empty target list, unreadable blocklist) reach callers
/// as `Err`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("scan timed out after {}s", .0.as_secs_f64())]
    ScanTimeout(std::time::Duration),

    #[error("scan process failed: {0}")]
    ScanProcess(String),

    #[error("blocklist {} unreadable: {source}", path.display())]
    Blocklist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Probe(String),

    #[error("empty targets list")]
    EmptyTargets,

    #[error("target cache: {0}")]
    Cache(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
