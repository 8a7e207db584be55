// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod filter;
pub mod group;
pub mod source;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{ChangeSummary, FetchState, ReportContext, SourceIdentity, WikiChanges};
pub use crate::config::{ReportConfig, WikiSection};
pub use crate::error::{ConfigError, ReportError, SourceFailure, UnreachableSourceError};
pub use crate::filter::{filter_changes, DateWindow};
pub use crate::group::WikiStats;
pub use crate::source::{ChangeRecord, RemoteChangeSource, XmlRpcSource, DEFAULT_API};
