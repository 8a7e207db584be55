// src/error.rs
//! Error kinds shared by the sources, the aggregators and the config loader.

/// Failure while encoding or decoding an XML-RPC document.
#[derive(Debug, thiserror::Error)]
pub enum XmlRpcError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed XML-RPC response: {0}")]
    Malformed(String),
    #[error("invalid dateTime.iso8601 value `{0}`")]
    BadDateTime(String),
    #[error("remote fault {code}: {message}")]
    Fault { code: i64, message: String },
}

/// Why a remote call could not complete.
#[derive(Debug, thiserror::Error)]
pub enum SourceFailure {
    /// Connection refused, DNS failure, timeout, non-2xx status...
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered but not with a usable change list.
    #[error("protocol error: {0}")]
    Protocol(#[from] XmlRpcError),
}

/// A remote change source could not be queried. Never retried.
#[derive(Debug, thiserror::Error)]
#[error("'{url}' is unreachable: {cause}")]
pub struct UnreachableSourceError {
    pub url: String,
    #[source]
    pub cause: SourceFailure,
}

impl UnreachableSourceError {
    pub fn new(url: impl Into<String>, cause: impl Into<SourceFailure>) -> Self {
        Self {
            url: url.into(),
            cause: cause.into(),
        }
    }
}

/// Invalid or incomplete configuration, reported before any fetch.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config from {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("no section [{0}] in config")]
    MissingSection(String),
    #[error("section [{section}] has type '{found}', expected 'wiki'")]
    WrongType { section: String, found: String },
    #[error("value of '{key}' in [{section}] must be a string")]
    NotAString { section: String, key: String },
    #[error("no endpoint url configured for wiki '{wiki}' in [{section}]")]
    MissingEndpoint { section: String, wiki: String },
}

/// User-facing failure of one aggregator.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Unable to fetch wiki changes from '{url}' because of '{source}'")]
    Unreachable {
        url: String,
        #[source]
        source: UnreachableSourceError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("changes for '{0}' were already fetched")]
    AlreadyFetched(String),
}
