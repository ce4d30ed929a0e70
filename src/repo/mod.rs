pub mod aggregate;
pub mod csv_log;
pub mod history;
pub mod source;

pub use aggregate::{DailyAccumulator, DateRange, QueryError};
pub use csv_log::{CsvLog, LogError};
pub use history::HistoryStore;
pub use source::SampleSource;

use parking_lot::RwLock;
use std::path::PathBuf;

use crate::config::Config;

/// Sample storage shared by the poll loop and the query side
pub struct Repositories {
    pub history: HistoryStore,
    log: RwLock<Option<CsvLog>>,
}

impl Repositories {
    pub fn new(cfg: &Config) -> Self {
        Self {
            history: HistoryStore::new(cfg.polling.history_size),
            log: RwLock::new(cfg.log.path().map(CsvLog::new)),
        }
    }

    /// Current durable log, if logging is enabled
    pub fn log(&self) -> Option<CsvLog> {
        self.log.read().clone()
    }

    /// Point appends and queries at a different log file, or disable logging
    pub fn set_log_path(&self, path: Option<PathBuf>) {
        *self.log.write() = path.map(CsvLog::new);
    }

    /// Pick the sample source for one query
    pub fn source(&self) -> SampleSource {
        SampleSource::select(self.log().as_ref(), &self.history)
    }
}
