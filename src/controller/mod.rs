pub mod monitor;
pub mod poller;

pub use monitor::{DatedSeries, DeviceSummary, Monitor, SampleSeries, Status};
pub use poller::InverterPoller;

use anyhow::Result;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{Config, SharedConfig};
use crate::hardware::DeviceFactory;
use crate::modbus::reader::ResilientReader;
use crate::modbus::register_map::GrowattSphRegisterMap;
use crate::repo::Repositories;

#[derive(Clone)]
pub struct AppState {
    pub cfg: SharedConfig,
    pub monitor: Arc<Monitor>,
}

impl AppState {
    /// `config_path` is where runtime configuration updates are written back to
    pub fn new(cfg: Config, config_path: Option<PathBuf>) -> Self {
        let repos = Arc::new(Repositories::new(&cfg));
        let cfg: SharedConfig = Arc::new(RwLock::new(cfg));
        let monitor = Arc::new(Monitor::new(Arc::clone(&cfg), repos, config_path));
        Self { cfg, monitor }
    }
}

/// Start the poll loop against the configured device
pub fn spawn_poller(state: &AppState) -> Result<JoinHandle<()>> {
    let (factory, policy) = {
        let cfg = state.cfg.read();
        (DeviceFactory::from_config(&cfg.modbus)?, cfg.modbus.retry_policy())
    };
    let reader = ResilientReader::new(factory.create_transport(), policy);
    let poller = InverterPoller::new(
        reader,
        Box::new(GrowattSphRegisterMap),
        Arc::clone(&state.cfg),
        Arc::clone(state.monitor.repos()),
    );
    Ok(tokio::spawn(poller.run()))
}
