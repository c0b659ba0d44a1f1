//! Core types shared by the reconnaissance modules: target classification,
//! input sanitization, the error taxonomy, child-process execution and batch
//! orchestration.

pub mod batch;
pub mod cache;
pub mod error;
pub mod process;
pub mod ratelimiter;
pub mod sanitize;
pub mod target;

pub use error::{Error, Result};
pub use sanitize::{sanitize, SanitizedTarget};
pub use target::{classify, extract_host, normalize, Target, TargetKind};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
