//! wiki-stats — binary entrypoint.
//! Loads the report config, fetches every configured wiki concurrently and
//! prints one header line per wiki (plus page URLs when verbose).
//!
//! Environment (also read from `.env`):
//!   WIKI_STATS_CONFIG   config path (default `config/wiki.toml`)
//!   WIKI_STATS_USER     login to report on (default `[general] login`)
//!   WIKI_STATS_SINCE    first day, `YYYY-MM-DD` (default: a week before UNTIL)
//!   WIKI_STATS_UNTIL    exclusive last day, `YYYY-MM-DD` (default: tomorrow)
//!   WIKI_STATS_FORMAT   `text` | `json`
//!   WIKI_STATS_VERBOSE  `1` lists page URLs under each header

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wiki_stats::source::xmlrpc::http_client;
use wiki_stats::{ChangeSummary, DateWindow, ReportConfig, ReportContext, WikiStats};

/// Logs go to stderr so that stdout stays clean for the report.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wiki=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn env_date(name: &str) -> Result<Option<NaiveDate>> {
    match std::env::var(name) {
        Ok(v) => NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
            .map(Some)
            .with_context(|| format!("{name} must be YYYY-MM-DD, got '{v}'")),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str, expected: &str) -> bool {
    std::env::var(name)
        .ok()
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
}

fn print_text(summaries: &[ChangeSummary], verbose: bool) {
    for s in summaries {
        println!("* {}", s.header());
        if verbose {
            for url in &s.page_urls {
                println!("    * {url}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = ReportConfig::load_default()?;
    let user_login = match std::env::var("WIKI_STATS_USER") {
        Ok(login) => login,
        Err(_) => config
            .login()
            .map(str::to_string)
            .context("no user login: set WIKI_STATS_USER or [general] login")?,
    };

    let until = env_date("WIKI_STATS_UNTIL")?.unwrap_or(Utc::now().date_naive() + Duration::days(1));
    let since = env_date("WIKI_STATS_SINCE")?.unwrap_or(until - Duration::days(7));
    if since >= until {
        bail!("empty report window: {since} is not before {until}");
    }
    let context = ReportContext {
        user_login,
        window: DateWindow::new(since.and_time(NaiveTime::MIN).and_utc(), until),
    };

    let client = http_client().context("building http client")?;
    let mut groups: Vec<WikiStats> = config
        .wiki_sections()?
        .iter()
        .map(|section| WikiStats::from_section(section, &context, client.clone()))
        .collect();
    if groups.is_empty() {
        tracing::warn!("no wiki sections configured");
    }
    groups.sort_by_key(WikiStats::order);

    // Groups are independent: fetch them all at once.
    let tasks: Vec<_> = groups
        .into_iter()
        .map(|mut group| {
            tokio::spawn(async move {
                let results = group.fetch_all().await;
                (group, results)
            })
        })
        .collect();

    let mut summaries = Vec::new();
    let mut failures = 0usize;
    for task in tasks {
        let (group, results) = task.await.context("wiki group task panicked")?;
        for (wc, res) in group.stats().iter().zip(results) {
            match res {
                Ok(()) => summaries.push(wc.summary()),
                Err(e) => {
                    failures += 1;
                    tracing::error!(wiki = wc.name(), "{e}");
                }
            }
        }
    }

    if env_flag("WIKI_STATS_FORMAT", "json") {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print_text(&summaries, env_flag("WIKI_STATS_VERBOSE", "1"));
    }

    if failures > 0 {
        bail!("{failures} wiki source(s) could not be fetched");
    }
    Ok(())
}
