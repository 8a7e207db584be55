// src/group.rs
//! One report section per configured wiki group, fanning out to its instances.

use std::sync::Arc;

use futures::future::join_all;
use metrics::gauge;

use crate::aggregator::{ChangeSummary, ReportContext, SourceIdentity, WikiChanges};
use crate::config::WikiSection;
use crate::error::ReportError;
use crate::source::{RemoteChangeSource, XmlRpcSource, DEFAULT_API};

/// Default position of wiki sections among the report's sections.
pub const DEFAULT_ORDER: u32 = 700;

/// All wiki instances of one config section.
#[derive(Debug)]
pub struct WikiStats {
    name: String,
    order: u32,
    stats: Vec<WikiChanges>,
}

impl WikiStats {
    /// One XML-RPC backed aggregator per instance, all sharing `client`
    /// (see [`crate::source::xmlrpc::http_client`]).
    pub fn from_section(
        section: &WikiSection,
        context: &ReportContext,
        client: reqwest::Client,
    ) -> Self {
        Self::with_sources(section, context, |url, api| {
            Arc::new(XmlRpcSource::new(url, api, client.clone()))
        })
    }

    /// Like [`WikiStats::from_section`] with a caller-provided source per
    /// `(base url, api suffix)`.
    pub fn with_sources<F>(section: &WikiSection, context: &ReportContext, mut make_source: F) -> Self
    where
        F: FnMut(&str, Option<&str>) -> Arc<dyn RemoteChangeSource>,
    {
        let api = section.api.as_deref();
        let stats = section
            .wikis
            .iter()
            .map(|(wiki, url)| {
                let identity = SourceIdentity {
                    display_name: wiki.clone(),
                    endpoint_url: url.clone(),
                    api_suffix: api.unwrap_or(DEFAULT_API).to_string(),
                };
                WikiChanges::new(
                    format!("Updates on {wiki}"),
                    identity,
                    make_source(url, api),
                    context.clone(),
                )
            })
            .collect();
        Self {
            name: section.name.clone(),
            order: DEFAULT_ORDER,
            stats,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn stats(&self) -> &[WikiChanges] {
        &self.stats
    }

    /// For callers that fetch sequentially or merge peers.
    pub fn stats_mut(&mut self) -> &mut [WikiChanges] {
        &mut self.stats
    }

    /// Fetch every instance concurrently and wait for all of them. Results
    /// come back in configuration order; one failing wiki does not stop the
    /// others. The aggregators never leave the group: if this future is
    /// dropped early, each one is left either fetched or unfetched.
    pub async fn fetch_all(&mut self) -> Vec<Result<(), ReportError>> {
        let results = join_all(self.stats.iter_mut().map(|wc| wc.fetch())).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        gauge!("wiki_report_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            target: "wiki",
            group = %self.name,
            wikis = results.len(),
            failed,
            "wiki group fetched"
        );
        results
    }

    pub fn summaries(&self) -> Vec<ChangeSummary> {
        self.stats.iter().map(WikiChanges::summary).collect()
    }
}
