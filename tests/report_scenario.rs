// tests/report_scenario.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use wiki_stats::error::XmlRpcError;
use wiki_stats::{
    ChangeRecord, DateWindow, FetchState, RemoteChangeSource, ReportContext, ReportError,
    UnreachableSourceError, WikiSection, WikiStats, XmlRpcSource,
};

const RECENT_CHANGES: &str = include_str!("fixtures/recent_changes.xml");

struct Down(String);

#[async_trait]
impl RemoteChangeSource for Down {
    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<ChangeRecord>, UnreachableSourceError> {
        Err(UnreachableSourceError::new(
            &self.0,
            XmlRpcError::Malformed("connection reset".into()),
        ))
    }
    fn endpoint(&self) -> &str {
        &self.0
    }
}

/// Answers only after the caller has long given up.
struct Slow(String);

#[async_trait]
impl RemoteChangeSource for Slow {
    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<ChangeRecord>, UnreachableSourceError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }
    fn endpoint(&self) -> &str {
        &self.0
    }
}

fn january() -> ReportContext {
    ReportContext {
        user_login: "alice".into(),
        window: DateWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        ),
    }
}

fn section(wikis: &[(&str, &str)]) -> WikiSection {
    WikiSection {
        name: "wiki".into(),
        api: None,
        wikis: wikis
            .iter()
            .map(|(n, u)| (n.to_string(), u.to_string()))
            .collect(),
    }
}

#[tokio::test]
async fn alice_in_january() {
    let sec = section(&[("test", "http://wiki.test/")]);
    let mut group = WikiStats::with_sources(&sec, &january(), |url, api| {
        Arc::new(XmlRpcSource::from_fixture(url, api, RECENT_CHANGES))
    });

    let results = group.fetch_all().await;
    assert!(results.iter().all(Result::is_ok));

    let summary = &group.summaries()[0];
    // Page C is outside the window (ts >= until), bob's edit is not alice's.
    assert_eq!(summary.change_count, 2);
    assert_eq!(summary.page_urls, vec!["http://wiki.test/A".to_string()]);
    assert_eq!(summary.header(), "Updates on test: 2 changes of 1 page");
}

#[tokio::test]
async fn failing_wiki_does_not_stop_its_sibling() {
    let sec = section(&[("down", "http://down.test/"), ("up", "http://up.test/")]);
    let mut group = WikiStats::with_sources(&sec, &january(), |url, api| {
        let source: Arc<dyn RemoteChangeSource> = if url.contains("down") {
            Arc::new(Down(format!("{url}?action=xmlrpc2")))
        } else {
            Arc::new(XmlRpcSource::from_fixture(url, api, RECENT_CHANGES))
        };
        source
    });

    let results = group.fetch_all().await;
    assert_eq!(results.len(), 2);

    match &results[0] {
        Err(ReportError::Unreachable { url, source }) => {
            assert_eq!(url, "http://down.test/");
            assert_eq!(source.url, "http://down.test/?action=xmlrpc2");
        }
        other => panic!("expected unreachable error, got {other:?}"),
    }
    let msg = results[0].as_ref().unwrap_err().to_string();
    assert!(msg.contains("http://down.test/"), "{msg}");
    assert!(msg.contains("connection reset"), "{msg}");

    assert!(results[1].is_ok());
    let stats = group.stats();
    assert_eq!(stats[0].state(), FetchState::Unfetched);
    assert_eq!(stats[1].state(), FetchState::Fetched);
    assert_eq!(stats[1].change_count(), 2);
    assert_eq!(stats[1].page_urls().collect::<Vec<_>>(), vec!["http://up.test/A"]);
}

#[tokio::test]
async fn sequential_fetch_is_equivalent() {
    let sec = section(&[("a", "http://a.test/"), ("b", "http://b.test/")]);
    let mut group = WikiStats::with_sources(&sec, &january(), |url, api| {
        Arc::new(XmlRpcSource::from_fixture(url, api, RECENT_CHANGES))
    });
    for wc in group.stats_mut() {
        wc.fetch().await.unwrap();
    }
    let headers: Vec<_> = group.summaries().iter().map(|s| s.header()).collect();
    assert_eq!(
        headers,
        vec![
            "Updates on a: 2 changes of 1 page",
            "Updates on b: 2 changes of 1 page"
        ]
    );
}

#[tokio::test]
async fn other_users_see_nothing() {
    let ctx = ReportContext {
        user_login: "carol".into(),
        ..january()
    };
    let sec = section(&[("test", "http://wiki.test/")]);
    let mut group = WikiStats::with_sources(&sec, &ctx, |url, api| {
        Arc::new(XmlRpcSource::from_fixture(url, api, RECENT_CHANGES))
    });
    group.fetch_all().await;
    assert_eq!(group.summaries()[0].header(), "Updates on test: 0 changes of 0 pages");
}

#[tokio::test]
async fn cancelled_fetch_all_keeps_every_aggregator() {
    let sec = section(&[("a", "http://a.test/"), ("b", "http://b.test/")]);
    let mut group = WikiStats::with_sources(&sec, &january(), |url, _api| {
        Arc::new(Slow(format!("{url}?action=xmlrpc2")))
    });

    let timed_out = tokio::time::timeout(Duration::from_millis(100), group.fetch_all())
        .await
        .is_err();
    assert!(timed_out);

    assert_eq!(group.stats().len(), 2);
    assert!(group.stats().iter().all(|wc| wc.state() == FetchState::Unfetched));
    let headers: Vec<_> = group.summaries().iter().map(|s| s.header()).collect();
    assert_eq!(
        headers,
        vec![
            "Updates on a: 0 changes of 0 pages",
            "Updates on b: 0 changes of 0 pages"
        ]
    );
}
