use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, ConfigError, ConfigUpdate, SharedConfig};
use crate::domain::{DailyTotal, Sample};
use crate::repo::aggregate::{downsample, interval_hours};
use crate::repo::{DailyAccumulator, DateRange, QueryError, Repositories};

/// Connection summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub connected: bool,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub config: DeviceSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub host: String,
    pub port: u16,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSeries {
    pub count: usize,
    pub data: Vec<Sample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatedSeries<T> {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub count: usize,
    pub data: Vec<T>,
}

impl<T> DatedSeries<T> {
    fn new(range: DateRange, data: Vec<T>) -> Self {
        Self {
            start_date: range.start,
            end_date: range.end,
            count: data.len(),
            data,
        }
    }
}

/// Read side of the monitor plus runtime configuration.
///
/// Range and daily queries may scan the whole log file; async callers should run
/// them on a blocking thread.
pub struct Monitor {
    cfg: SharedConfig,
    repos: Arc<Repositories>,
    config_path: Option<PathBuf>,
}

impl Monitor {
    pub fn new(cfg: SharedConfig, repos: Arc<Repositories>, config_path: Option<PathBuf>) -> Self {
        Self {
            cfg,
            repos,
            config_path,
        }
    }

    pub fn repos(&self) -> &Arc<Repositories> {
        &self.repos
    }

    pub fn shared_config(&self) -> SharedConfig {
        Arc::clone(&self.cfg)
    }

    fn interval_hours(&self) -> f64 {
        interval_hours(self.cfg.read().polling.interval_secs)
    }

    /// Newest sample, or the disconnected placeholder before the first cycle
    pub fn current(&self) -> Sample {
        self.repos.history.latest()
    }

    pub fn status(&self) -> Status {
        let latest = self.repos.history.last();
        let cfg = self.cfg.read();
        Status {
            connected: latest.as_ref().is_some_and(|s| s.connected),
            timestamp: latest.map(|s| s.timestamp),
            config: DeviceSummary {
                host: cfg.modbus.host.clone(),
                port: cfg.modbus.port,
                interval_secs: cfg.polling.interval_secs,
            },
        }
    }

    /// In-memory history, optionally restricted to the last `minutes`, then downsampled
    pub fn history(&self, limit: usize, minutes: Option<u64>) -> SampleSeries {
        self.history_at(limit, minutes, Local::now().fixed_offset())
    }

    fn history_at(
        &self,
        limit: usize,
        minutes: Option<u64>,
        now: DateTime<FixedOffset>,
    ) -> SampleSeries {
        let mut data = self.repos.history.snapshot();
        let cutoff = minutes
            .filter(|m| *m > 0)
            .and_then(|m| i64::try_from(m).ok())
            .and_then(Duration::try_minutes)
            .and_then(|span| now.checked_sub_signed(span));
        if let Some(cutoff) = cutoff {
            data.retain(|sample| sample.timestamp >= cutoff);
        }
        let data = downsample(data, limit);
        SampleSeries {
            count: data.len(),
            data,
        }
    }

    /// Samples whose date falls in `[start, end]`, from the log or the in-memory fallback
    pub fn history_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        limit: usize,
    ) -> Result<DatedSeries<Sample>, QueryError> {
        let range = DateRange::new(start, end)?;

        let mut data = Vec::new();
        self.repos.source().for_each(&self.repos.history, |sample| {
            if range.contains(sample.date()) {
                data.push(sample);
            }
        });

        Ok(DatedSeries::new(range, downsample(data, limit)))
    }

    pub fn daily(&self, date: NaiveDate) -> DailyTotal {
        let range = DateRange { start: date, end: date };
        self.aggregate(range)
            .pop()
            .unwrap_or_else(|| DailyTotal::empty(date))
    }

    /// One total per day, empty days included; at most 90 days apart
    pub fn daily_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DatedSeries<DailyTotal>, QueryError> {
        let range = DateRange::daily(start, end)?;
        Ok(DatedSeries::new(range, self.aggregate(range)))
    }

    fn aggregate(&self, range: DateRange) -> Vec<DailyTotal> {
        let mut acc = DailyAccumulator::new(range, self.interval_hours());
        self.repos
            .source()
            .for_each(&self.repos.history, |sample| acc.add(&sample));
        acc.finish()
    }

    pub fn config(&self) -> Config {
        self.cfg.read().clone()
    }

    /// Validate and merge a partial update, apply it to the stores and persist it.
    ///
    /// Failing to write the config file is logged; the in-memory update still holds.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<Config, ConfigError> {
        let (previous, updated) = {
            let mut cfg = self.cfg.write();
            let previous = cfg.clone();
            let mut updated = previous.clone();
            updated.apply(update)?;
            *cfg = updated.clone();
            (previous, updated)
        };

        if updated.polling.history_size != previous.polling.history_size {
            self.repos.history.resize(updated.polling.history_size);
        }
        if updated.log != previous.log {
            self.repos.set_log_path(updated.log.path());
        }
        if updated.modbus.host != previous.modbus.host
            || updated.modbus.port != previous.modbus.port
        {
            info!(
                host = %updated.modbus.host,
                port = updated.modbus.port,
                "device endpoint changed, takes effect on restart"
            );
        }

        if let Some(path) = &self.config_path {
            if let Err(e) = updated.save(path) {
                warn!(error = %e, "failed to persist configuration");
            }
        }
        info!("configuration updated");
        Ok(updated)
    }
}
