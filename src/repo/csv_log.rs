use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::domain::Sample;

/// Header row of the durable log, in column order
pub const LOG_COLUMNS: [&str; 10] = [
    "timestamp",
    "solar",
    "load",
    "grid_export",
    "grid_import",
    "battery_charge",
    "battery_discharge",
    "battery_net",
    "soc_inv",
    "soc_bms",
];

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("log file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Serialize)]
struct LogRecord {
    timestamp: String,
    solar: f64,
    load: f64,
    grid_export: f64,
    grid_import: f64,
    battery_charge: f64,
    battery_discharge: f64,
    battery_net: f64,
    soc_inv: u16,
    soc_bms: u16,
}

impl From<&Sample> for LogRecord {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false),
            solar: sample.solar_kw,
            load: sample.load_kw,
            grid_export: sample.grid_export_kw,
            grid_import: sample.grid_import_kw,
            battery_charge: sample.battery_charge_kw,
            battery_discharge: sample.battery_discharge_kw,
            battery_net: sample.battery_net_kw,
            soc_inv: sample.soc_inverter_pct,
            soc_bms: sample.soc_bms_pct,
        }
    }
}

/// One row as read back; SOC columns tolerate `55.0` as well as `55`
#[derive(Debug, Deserialize)]
struct LogRow {
    timestamp: String,
    solar: f64,
    load: f64,
    grid_export: f64,
    grid_import: f64,
    battery_charge: f64,
    battery_discharge: f64,
    battery_net: f64,
    soc_inv: f64,
    soc_bms: f64,
}

impl LogRow {
    fn into_sample(self) -> Option<Sample> {
        let values = [
            self.solar,
            self.load,
            self.grid_export,
            self.grid_import,
            self.battery_charge,
            self.battery_discharge,
            self.battery_net,
            self.soc_inv,
            self.soc_bms,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }

        Some(Sample {
            timestamp: parse_timestamp(&self.timestamp)?,
            solar_kw: self.solar,
            load_kw: self.load,
            grid_raw_kw: self.grid_import - self.grid_export,
            battery_charge_kw: self.battery_charge,
            battery_discharge_kw: self.battery_discharge,
            grid_import_kw: self.grid_import,
            grid_export_kw: self.grid_export,
            battery_net_kw: self.battery_net,
            soc_inverter_pct: percent(self.soc_inv),
            soc_bms_pct: percent(self.soc_bms),
            connected: true,
            degraded: false,
        })
    }
}

fn percent(value: f64) -> u16 {
    value.clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as local time
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp);
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.fixed_offset())
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive).fixed_offset()),
    )
}

/// Append-only CSV sample log
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn io_error(&self, source: std::io::Error) -> LogError {
        LogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> LogError {
        LogError::Csv {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one row, writing the header first if the file is new or empty
    pub fn append(&self, sample: &Sample) -> Result<(), LogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let needs_header = file.metadata().map_err(|e| self.io_error(e))?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer
                .write_record(LOG_COLUMNS)
                .map_err(|e| self.csv_error(e))?;
        }
        writer
            .serialize(LogRecord::from(sample))
            .map_err(|e| self.csv_error(e))?;
        writer.flush().map_err(|e| self.io_error(e))
    }

    /// Visit every well-formed row in file order; malformed rows are skipped.
    ///
    /// Returns the number of skipped rows.
    pub fn scan(&self, mut visit: impl FnMut(Sample)) -> Result<usize, LogError> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;
        let headers = reader.headers().map_err(|e| self.csv_error(e))?.clone();

        let mut skipped = 0;
        for record in reader.records() {
            match record.ok().and_then(|record| row_to_sample(&record, &headers)) {
                Some(sample) => visit(sample),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            debug!(path = %self.path.display(), skipped, "skipped malformed log rows");
        }
        Ok(skipped)
    }
}

fn row_to_sample(record: &StringRecord, headers: &StringRecord) -> Option<Sample> {
    record
        .deserialize::<LogRow>(Some(headers))
        .ok()
        .and_then(LogRow::into_sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_at(timestamp: &str, solar_kw: f64) -> Sample {
        Sample {
            timestamp: DateTime::parse_from_rfc3339(timestamp).unwrap(),
            solar_kw,
            load_kw: 0.4,
            grid_raw_kw: -0.1,
            grid_export_kw: 0.1,
            battery_charge_kw: 0.2,
            battery_net_kw: 0.2,
            soc_inverter_pct: 54,
            soc_bms_pct: 55,
            connected: true,
            ..Sample::disconnected()
        }
    }

    fn read_all(log: &CsvLog) -> Vec<Sample> {
        let mut samples = Vec::new();
        log.scan(|sample| samples.push(sample)).unwrap();
        samples
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvLog::new(dir.path().join("growatt_log.csv"));

        log.append(&sample_at("2025-11-26T10:00:00+01:00", 1.0)).unwrap();
        log.append(&sample_at("2025-11-26T10:00:05+01:00", 2.0)).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], LOG_COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "2025-11-26T10:00:00+01:00,1.0,0.4,0.1,0.0,0.2,0.0,0.2,54,55"
        );
    }

    #[test]
    fn test_header_written_into_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let log = CsvLog::new(file.path());

        log.append(&sample_at("2025-11-26T10:00:00+01:00", 1.0)).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(text.starts_with("timestamp,solar,"));
    }

    #[test]
    fn test_rows_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvLog::new(dir.path().join("log.csv"));
        let first = sample_at("2025-11-26T10:00:00+01:00", 1.0);
        let second = sample_at("2025-11-26T10:00:05+01:00", 2.0);
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let samples = read_all(&log);

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp, first.timestamp);
        assert_eq!(samples[1].solar_kw, 2.0);
        assert_eq!(samples[1].grid_raw_kw, -0.1);
        assert_eq!(samples[1].soc_bms_pct, 55);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", LOG_COLUMNS.join(",")).unwrap();
        writeln!(file, "2025-11-26T10:00:00+01:00,1.0,0.4,0,0,0,0,0,50,51").unwrap();
        writeln!(file, "2025-11-26T10:00:05+01:00,abc,0.4,0,0,0,0,0,50,51").unwrap();
        writeln!(file, "not-a-time,1.0,0.4,0,0,0,0,0,50,51").unwrap();
        writeln!(file, "2025-11-26T10:00:10+01:00,1.0").unwrap();
        writeln!(file, "2025-11-26T10:00:15.250000,3.0,0.4,0,0,0,0,0,50.0,51.0").unwrap();
        file.flush().unwrap();

        let log = CsvLog::new(file.path());
        let mut samples = Vec::new();
        let skipped = log.scan(|sample| samples.push(sample)).unwrap();

        assert_eq!(skipped, 3);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].solar_kw, 3.0);
        assert_eq!(samples[1].soc_inverter_pct, 50);
        assert_eq!(
            samples[1].date(),
            chrono::NaiveDate::from_ymd_opt(2025, 11, 26).unwrap()
        );
    }

    #[test]
    fn test_scan_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvLog::new(dir.path().join("absent.csv"));
        assert!(!log.exists());
        assert!(log.scan(|_| {}).is_err());
    }

    #[test]
    fn test_parse_timestamp_keeps_offset() {
        let parsed = parse_timestamp("2025-11-26T23:30:00-05:00").unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(
            parsed.date_naive(),
            chrono::NaiveDate::from_ymd_opt(2025, 11, 26).unwrap()
        );
        assert_eq!(parsed, parse_timestamp("2025-11-27T04:30:00Z").unwrap());
    }
}
