// src/filter.rs
//! Author/date filtering of raw change records.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::ChangeRecord;

/// Report window: `since` is inclusive and passed to the remote call,
/// `until` is an exclusive date bound checked locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateWindow {
    pub since: DateTime<Utc>,
    pub until: NaiveDate,
}

impl DateWindow {
    pub fn new(since: DateTime<Utc>, until: NaiveDate) -> Self {
        Self { since, until }
    }

    /// Midnight UTC at the start of `until`.
    pub fn until_instant(&self) -> DateTime<Utc> {
        self.until.and_time(NaiveTime::MIN).and_utc()
    }
}

/// Keep the records authored by `user_login` and modified before `window.until`.
///
/// The lower bound is not re-checked: the remote source was already asked for
/// changes since `window.since` and its answer is trusted as-is.
pub fn filter_changes(
    records: Vec<ChangeRecord>,
    user_login: &str,
    window: &DateWindow,
) -> Vec<ChangeRecord> {
    let until = window.until_instant();
    records
        .into_iter()
        .filter(|r| r.author == user_login && r.last_modified < until)
        .collect()
}
