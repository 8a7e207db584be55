// src/aggregator.rs
//! Per-wiki accumulation of qualifying changes.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::error::ReportError;
use crate::filter::{filter_changes, DateWindow};
use crate::source::RemoteChangeSource;

/// One-time metrics registration (so series show up in exporters).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("wiki_fetch_total", "getRecentChanges calls attempted.");
        describe_counter!(
            "wiki_fetch_errors_total",
            "getRecentChanges calls that failed (transport or protocol)."
        );
        describe_counter!(
            "wiki_changes_total",
            "Changes kept after author/date filtering."
        );
        describe_counter!(
            "wiki_changes_filtered_total",
            "Changes dropped by author/date filtering."
        );
        describe_histogram!("wiki_fetch_ms", "Fetch + decode time in milliseconds.");
        describe_gauge!(
            "wiki_report_last_run_ts",
            "Unix ts when a wiki group was last fetched."
        );
    });
}

/// Who and where a [`WikiChanges`] reports on. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceIdentity {
    pub display_name: String,
    pub endpoint_url: String,
    pub api_suffix: String,
}

/// Shared inputs of one report run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub user_login: String,
    pub window: DateWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Unfetched,
    Fetched,
}

/// Read-only view of an aggregator, handed to the report renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub name: String,
    pub change_count: u64,
    pub distinct_page_count: usize,
    pub page_urls: Vec<String>,
}

impl ChangeSummary {
    /// `"Updates on X: N changes of M pages"`, singular exactly at 1.
    pub fn header(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} change{} of {} page{}",
            self.name,
            self.change_count,
            plural(self.change_count),
            self.distinct_page_count,
            plural(self.distinct_page_count as u64)
        )
    }
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Changes by one user on one wiki instance.
///
/// `change_count` counts every qualifying edit; `page_urls` holds each edited
/// page once, in lexicographic order.
pub struct WikiChanges {
    name: String,
    identity: SourceIdentity,
    source: Arc<dyn RemoteChangeSource>,
    context: ReportContext,
    state: FetchState,
    change_count: u64,
    page_urls: BTreeSet<String>,
}

impl WikiChanges {
    pub fn new(
        name: impl Into<String>,
        identity: SourceIdentity,
        source: Arc<dyn RemoteChangeSource>,
        context: ReportContext,
    ) -> Self {
        Self {
            name: name.into(),
            identity,
            source,
            context,
            state: FetchState::Unfetched,
            change_count: 0,
            page_urls: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    /// Distinct page URLs, sorted.
    pub fn page_urls(&self) -> impl Iterator<Item = &str> {
        self.page_urls.iter().map(String::as_str)
    }

    /// Query the source once and accumulate the qualifying changes.
    ///
    /// Only valid while unfetched. On error nothing is accumulated and the
    /// aggregator stays unfetched.
    pub async fn fetch(&mut self) -> Result<(), ReportError> {
        if self.state == FetchState::Fetched {
            return Err(ReportError::AlreadyFetched(self.name.clone()));
        }
        ensure_metrics_described();
        counter!("wiki_fetch_total").increment(1);

        let t0 = std::time::Instant::now();
        let records = match self.source.fetch(self.context.window.since).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    wiki = %self.identity.display_name,
                    url = %self.identity.endpoint_url,
                    "wiki fetch failed"
                );
                counter!("wiki_fetch_errors_total").increment(1);
                return Err(ReportError::Unreachable {
                    url: self.identity.endpoint_url.clone(),
                    source: e,
                });
            }
        };
        histogram!("wiki_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let raw = records.len();
        let kept = filter_changes(records, &self.context.user_login, &self.context.window);
        for change in &kept {
            self.change_count += 1;
            let url = format!("{}{}", self.identity.endpoint_url, change.page_name);
            self.page_urls.insert(url);
        }
        self.state = FetchState::Fetched;

        counter!("wiki_changes_total").increment(kept.len() as u64);
        counter!("wiki_changes_filtered_total").increment((raw - kept.len()) as u64);
        tracing::info!(
            target: "wiki",
            wiki = %self.identity.display_name,
            raw,
            kept = kept.len(),
            pages = self.page_urls.len(),
            "wiki changes fetched"
        );
        Ok(())
    }

    /// Fold another partial result for the same wiki into this one.
    ///
    /// Counts add up, page sets are unioned. Unfetched peers contribute nothing.
    pub fn merge(&mut self, other: &WikiChanges) {
        if self.identity != other.identity {
            tracing::warn!(
                this = %self.identity.endpoint_url,
                other = %other.identity.endpoint_url,
                "merging wiki changes from different sources"
            );
        }
        self.change_count += other.change_count;
        self.page_urls.extend(other.page_urls.iter().cloned());
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            name: self.name.clone(),
            change_count: self.change_count,
            distinct_page_count: self.page_urls.len(),
            page_urls: self.page_urls.iter().cloned().collect(),
        }
    }

    pub fn header(&self) -> String {
        self.summary().header()
    }
}

impl fmt::Debug for WikiChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WikiChanges")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("source", &self.source.endpoint())
            .field("state", &self.state)
            .field("change_count", &self.change_count)
            .field("page_urls", &self.page_urls)
            .finish()
    }
}
