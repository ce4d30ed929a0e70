use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{DailyTotal, Sample};

/// Longest span accepted by daily-range queries, in days between start and end
pub const MAX_DAILY_RANGE_DAYS: i64 = 90;

/// Rejected query parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Invalid date format: {0:?}. Use YYYY-MM-DD")]
    InvalidDate(String),
    #[error("end_date {end} cannot be before start_date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
    #[error("Date range cannot exceed {max_days} days")]
    RangeTooLong { max_days: i64 },
}

/// Parse a `YYYY-MM-DD` query date
pub fn parse_date(raw: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| QueryError::InvalidDate(raw.to_string()))
}

/// Inclusive calendar-date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, QueryError> {
        if end < start {
            return Err(QueryError::EndBeforeStart { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range for per-day aggregation, capped at [`MAX_DAILY_RANGE_DAYS`]
    pub fn daily(start: NaiveDate, end: NaiveDate) -> Result<Self, QueryError> {
        let range = Self::new(start, end)?;
        if (end - start).num_days() > MAX_DAILY_RANGE_DAYS {
            return Err(QueryError::RangeTooLong {
                max_days: MAX_DAILY_RANGE_DAYS,
            });
        }
        Ok(range)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

/// Keep every `len / limit`-th item from index 0 when there are more than `limit`.
///
/// A `limit` of 0 disables downsampling.
pub fn downsample<T>(items: Vec<T>, limit: usize) -> Vec<T> {
    if limit == 0 || items.len() <= limit {
        return items;
    }
    let stride = items.len() / limit;
    items.into_iter().step_by(stride).collect()
}

/// Hours represented by one sample
pub fn interval_hours(polling_interval_secs: u64) -> f64 {
    polling_interval_secs as f64 / 3600.0
}

/// Per-day energy totals over a date range, filled one sample at a time
pub struct DailyAccumulator {
    range: DateRange,
    interval_hours: f64,
    totals: BTreeMap<NaiveDate, DailyTotal>,
}

impl DailyAccumulator {
    pub fn new(range: DateRange, interval_hours: f64) -> Self {
        Self {
            range,
            interval_hours,
            totals: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, sample: &Sample) {
        let date = sample.date();
        if !self.range.contains(date) {
            return;
        }
        self.totals
            .entry(date)
            .or_insert_with(|| DailyTotal::empty(date))
            .accumulate(sample, self.interval_hours);
    }

    /// One total per calendar day in the range, empty days included
    pub fn finish(mut self) -> Vec<DailyTotal> {
        self.range
            .days()
            .map(|day| {
                self.totals
                    .remove(&day)
                    .unwrap_or_else(|| DailyTotal::empty(day))
            })
            .collect()
    }
}
