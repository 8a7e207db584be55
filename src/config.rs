// src/config.rs
//! Report configuration: a TOML document whose `type = "wiki"` sections each
//! list wiki instances as `"display name" = "base url"` pairs.
//!
//! ```toml
//! [general]
//! login = "alice"
//!
//! [wiki]
//! type = "wiki"
//! api = "?action=xmlrpc2"
//! "wiki test" = "http://moinmo.in/"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/wiki.toml";
pub const ENV_CONFIG_PATH: &str = "WIKI_STATS_CONFIG";

/// Section type handled by this crate.
pub const WIKI_TYPE: &str = "wiki";
/// Keys of a wiki section that are not wiki instances.
const RESERVED_KEYS: [&str; 2] = ["type", "api"];

/// Parsed config file. Sections keep their file order.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    sections: toml::Table,
}

/// One wiki source group: an optional shared API suffix and its instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiSection {
    pub name: String,
    pub api: Option<String>,
    /// `(display name, endpoint url)` in file order.
    pub wikis: Vec<(String, String)>,
}

impl ReportConfig {
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let sections: toml::Table = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        Ok(Self { sections })
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// $WIKI_STATS_CONFIG if set, otherwise `config/wiki.toml`.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        tracing::debug!(path = %path.display(), "loading report config");
        Self::load_from(&path)
    }

    /// `login` from the `[general]` section, if any.
    pub fn login(&self) -> Option<&str> {
        self.sections
            .get("general")
            .and_then(|v| v.as_table())
            .and_then(|t| t.get("login"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The named section, which must be a wiki section (or untyped).
    pub fn wiki_section(&self, name: &str) -> Result<WikiSection, ConfigError> {
        let table = self
            .sections
            .get(name)
            .and_then(|v| v.as_table())
            .ok_or_else(|| ConfigError::MissingSection(name.to_string()))?;
        WikiSection::from_table(name, table)
    }

    /// Every section declared with `type = "wiki"`, in file order.
    pub fn wiki_sections(&self) -> Result<Vec<WikiSection>, ConfigError> {
        self.sections
            .iter()
            .filter_map(|(name, v)| v.as_table().map(|t| (name, t)))
            .filter(|(_, t)| t.get("type").and_then(|v| v.as_str()) == Some(WIKI_TYPE))
            .map(|(name, t)| WikiSection::from_table(name, t))
            .collect()
    }
}

impl WikiSection {
    pub fn from_table(name: &str, table: &toml::Table) -> Result<Self, ConfigError> {
        let string_at = |key: &str, value: &toml::Value| {
            value
                .as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| ConfigError::NotAString {
                    section: name.to_string(),
                    key: key.to_string(),
                })
        };

        if let Some(v) = table.get("type") {
            let found = string_at("type", v)?;
            if found != WIKI_TYPE {
                return Err(ConfigError::WrongType {
                    section: name.to_string(),
                    found,
                });
            }
        }

        let api = match table.get("api") {
            Some(v) => Some(string_at("api", v)?).filter(|s| !s.is_empty()),
            None => None,
        };

        let mut wikis = Vec::new();
        for (wiki, value) in table {
            if RESERVED_KEYS.contains(&wiki.as_str()) {
                continue;
            }
            let url = string_at(wiki, value)?;
            if url.is_empty() {
                return Err(ConfigError::MissingEndpoint {
                    section: name.to_string(),
                    wiki: wiki.clone(),
                });
            }
            wikis.push((wiki.clone(), url));
        }

        Ok(Self {
            name: name.to_string(),
            api,
            wikis,
        })
    }
}
