use tracing::warn;

use super::csv_log::CsvLog;
use super::history::HistoryStore;
use crate::domain::Sample;

/// Where a query reads its samples from, chosen once per query
pub enum SampleSource {
    Log(CsvLog),
    Memory(Vec<Sample>),
}

impl SampleSource {
    /// The durable log when one is configured and present, otherwise a history snapshot
    pub fn select(log: Option<&CsvLog>, history: &HistoryStore) -> Self {
        match log {
            Some(log) if log.exists() => Self::Log(log.clone()),
            _ => Self::Memory(history.snapshot()),
        }
    }

    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log(_))
    }

    /// Visit samples oldest first.
    ///
    /// A log that cannot be opened degrades to the in-memory history.
    pub fn for_each(self, history: &HistoryStore, mut visit: impl FnMut(Sample)) {
        match self {
            Self::Log(log) => {
                if let Err(e) = log.scan(&mut visit) {
                    warn!(error = %e, "log unreadable, answering from memory");
                    history.snapshot().into_iter().for_each(visit);
                }
            }
            Self::Memory(samples) => samples.into_iter().for_each(visit),
        }
    }
}
