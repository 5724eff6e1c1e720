//! Owner-wide reads built on `CounterLedger::read_owner`
//!
//! These are what dashboards ask for: how many runs of a flow are in each
//! state, how results split across categories, when path activity happens
//! (hour of day, day of week, over time) and how often each segment of the
//! flow was walked.
//!
//! The activity reads take an optional list of exit uuids. Passing a flow's
//! waiting exits restricts them to segments leaving a wait, which is what a
//! response chart wants.

use super::error::LedgerError;
use super::scope::{hour_period, CounterKey, CounterScope, ExitType};
use super::CounterLedger;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Run totals for one flow, by exit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunStats {
    pub active: i64,
    pub completed: i64,
    pub expired: i64,
    pub interrupted: i64,
    pub total: i64,
}

pub fn flow_run_stats(ledger: &dyn CounterLedger, flow_id: i64) -> Result<RunStats, LedgerError> {
    let mut stats = RunStats::default();

    for (key, count) in ledger.read_owner(CounterScope::FlowRunCount, flow_id)? {
        if let CounterKey::FlowRun { exit_type, .. } = key {
            match exit_type {
                None => stats.active += count,
                Some(ExitType::Completed) => stats.completed += count,
                Some(ExitType::Expired) => stats.expired += count,
                Some(ExitType::Interrupted) => stats.interrupted += count,
            }
            stats.total += count;
        }
    }

    Ok(stats)
}

/// Result key → category → run count. Categories that dropped to zero are
/// left out.
pub fn category_counts(
    ledger: &dyn CounterLedger,
    flow_id: i64,
) -> Result<BTreeMap<String, BTreeMap<String, i64>>, LedgerError> {
    let mut counts: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();

    for (key, count) in ledger.read_owner(CounterScope::FlowCategoryCount, flow_id)? {
        if count == 0 {
            continue;
        }
        if let CounterKey::FlowCategory {
            result_key,
            category,
            ..
        } = key
        {
            *counts
                .entry(result_key)
                .or_default()
                .entry(category)
                .or_insert(0) += count;
        }
    }

    Ok(counts)
}

struct PathCount {
    from_uuid: String,
    to_uuid: String,
    period: DateTime<Utc>,
    count: i64,
}

fn path_counts(
    ledger: &dyn CounterLedger,
    flow_id: i64,
    from_uuids: Option<&[&str]>,
) -> Result<Vec<PathCount>, LedgerError> {
    let mut counts = Vec::new();

    for (key, count) in ledger.read_owner(CounterScope::FlowPathCount, flow_id)? {
        if let CounterKey::FlowPath {
            from_uuid,
            to_uuid,
            period,
            ..
        } = key
        {
            if count == 0 {
                continue;
            }
            if let Some(wanted) = from_uuids {
                if !wanted.contains(&from_uuid.as_str()) {
                    continue;
                }
            }
            counts.push(PathCount {
                from_uuid,
                to_uuid,
                period,
                count,
            });
        }
    }

    Ok(counts)
}

/// Path traversals of a flow by UTC hour of day
pub fn path_activity_by_hour(
    ledger: &dyn CounterLedger,
    flow_id: i64,
    from_uuids: Option<&[&str]>,
) -> Result<[i64; 24], LedgerError> {
    let mut hours = [0i64; 24];
    for path in path_counts(ledger, flow_id, from_uuids)? {
        hours[path.period.hour() as usize] += path.count;
    }
    Ok(hours)
}

/// Path traversals of a flow by day of week, Sunday first
pub fn path_activity_by_weekday(
    ledger: &dyn CounterLedger,
    flow_id: i64,
    from_uuids: Option<&[&str]>,
) -> Result<[i64; 7], LedgerError> {
    let mut days = [0i64; 7];
    for path in path_counts(ledger, flow_id, from_uuids)? {
        days[path.period.weekday().num_days_from_sunday() as usize] += path.count;
    }
    Ok(days)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistogramBucket {
    Hour,
    Day,
    Week,
}

impl HistogramBucket {
    /// Under 3 weeks of activity by hour, under 500 days by day, else by week
    pub fn for_range(range: Duration) -> Self {
        if range < Duration::days(21) {
            HistogramBucket::Hour
        } else if range < Duration::days(500) {
            HistogramBucket::Day
        } else {
            HistogramBucket::Week
        }
    }

    /// Start of the bucket `ts` falls in. Weeks start on Monday.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = match self {
            HistogramBucket::Hour => return hour_period(ts),
            HistogramBucket::Day => ts.date_naive(),
            HistogramBucket::Week => {
                ts.date_naive() - Duration::days(i64::from(ts.weekday().num_days_from_monday()))
            }
        };
        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
    }
}

/// Path activity over time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathHistogram {
    pub bucket: HistogramBucket,
    /// Left edge of the chart window
    pub min_date: DateTime<Utc>,
    /// Bucket start → traversals, oldest first
    pub counts: Vec<(DateTime<Utc>, i64)>,
}

/// `None` when the flow has no path activity
pub fn path_histogram(
    ledger: &dyn CounterLedger,
    flow_id: i64,
    from_uuids: Option<&[&str]>,
) -> Result<Option<PathHistogram>, LedgerError> {
    let paths = path_counts(ledger, flow_id, from_uuids)?;

    let (start, end) = match (
        paths.iter().map(|p| p.period).min(),
        paths.iter().map(|p| p.period).max(),
    ) {
        (Some(start), Some(end)) => (start, end),
        _ => return Ok(None),
    };

    let bucket = HistogramBucket::for_range(end - start);
    let min_date = match bucket {
        HistogramBucket::Hour => start - Duration::hours(1),
        HistogramBucket::Day => end - Duration::days(100),
        HistogramBucket::Week => end - Duration::days(500),
    };

    let mut counts: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
    for path in &paths {
        *counts.entry(bucket.truncate(path.period)).or_insert(0) += path.count;
    }

    Ok(Some(PathHistogram {
        bucket,
        min_date,
        counts: counts.into_iter().filter(|(_, count)| *count != 0).collect(),
    }))
}

/// Times each segment (exit uuid → node uuid) of a flow was walked, over
/// all periods
pub fn segment_counts(
    ledger: &dyn CounterLedger,
    flow_id: i64,
) -> Result<BTreeMap<(String, String), i64>, LedgerError> {
    let mut segments = BTreeMap::new();
    for path in path_counts(ledger, flow_id, None)? {
        *segments.entry((path.from_uuid, path.to_uuid)).or_insert(0) += path.count;
    }
    segments.retain(|_, count| *count != 0);
    Ok(segments)
}

/// Active runs of a flow waiting at each node
pub fn node_counts(
    ledger: &dyn CounterLedger,
    flow_id: i64,
) -> Result<BTreeMap<String, i64>, LedgerError> {
    let mut nodes = BTreeMap::new();

    for (key, count) in ledger.read_owner(CounterScope::FlowNodeCount, flow_id)? {
        if let CounterKey::FlowNode { node_uuid, .. } = key {
            if count != 0 {
                nodes.insert(node_uuid, count);
            }
        }
    }

    Ok(nodes)
}
