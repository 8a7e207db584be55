// src/source/mod.rs
pub mod xmlrpc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UnreachableSourceError;

pub use xmlrpc::XmlRpcSource;

/// Default MoinMoin XML-RPC entry point, appended to the wiki base URL.
pub const DEFAULT_API: &str = "?action=xmlrpc2";

/// One edit event from a wiki's change log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRecord {
    pub author: String,
    pub page_name: String, // page path, appended to the wiki base URL
    pub last_modified: DateTime<Utc>,
}

/// Anything that can answer "which changes happened since T".
#[async_trait]
pub trait RemoteChangeSource: Send + Sync {
    /// One attempt, no retry. Any transport or protocol failure is returned as-is.
    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<ChangeRecord>, UnreachableSourceError>;

    /// Actual call target (base URL + API suffix), for diagnostics.
    fn endpoint(&self) -> &str;
}
