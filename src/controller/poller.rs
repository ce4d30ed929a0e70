use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SharedConfig;
use crate::domain::Sample;
use crate::modbus::reader::ResilientReader;
use crate::modbus::register_map::RegisterMap;
use crate::power_flow::{balance, RawReadings};
use crate::repo::Repositories;

/// The single writer: reads the inverter, balances, stores and logs one sample per cycle
pub struct InverterPoller {
    reader: ResilientReader,
    registers: Box<dyn RegisterMap>,
    cfg: SharedConfig,
    repos: Arc<Repositories>,
}

impl InverterPoller {
    pub fn new(
        reader: ResilientReader,
        registers: Box<dyn RegisterMap>,
        cfg: SharedConfig,
        repos: Arc<Repositories>,
    ) -> Self {
        Self {
            reader,
            registers,
            cfg,
            repos,
        }
    }

    /// Poll forever, sleeping the configured interval between cycles
    pub async fn run(mut self) {
        {
            let cfg = self.cfg.read();
            info!(
                host = %cfg.modbus.host,
                port = cfg.modbus.port,
                interval_secs = cfg.polling.interval_secs,
                "starting inverter polling"
            );
        }

        loop {
            self.poll_once().await;
            let interval = self.cfg.read().polling.interval_secs.max(1);
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    /// One acquisition cycle; never fails, missing reads degrade the sample
    pub async fn poll_once(&mut self) -> Sample {
        let (unit_id, policy) = {
            let cfg = self.cfg.read();
            (cfg.modbus.unit_id, cfg.modbus.retry_policy())
        };
        self.reader.set_policy(policy);

        // stamped before the reads so retries do not skew it
        let timestamp = Local::now().fixed_offset();
        let readings = self.read_registers(unit_id).await;
        let sample = balance(&readings, timestamp);

        self.repos.history.append(sample.clone());
        persist(&self.repos, &sample).await;

        info!(
            pv_kw = sample.solar_kw,
            load_kw = sample.load_kw,
            grid_kw = sample.grid_raw_kw,
            battery_kw = sample.battery_net_kw,
            soc_pct = sample.soc_bms_pct,
            connected = sample.connected,
            degraded = sample.degraded,
            "poll cycle"
        );
        sample
    }

    async fn read_registers(&mut self, unit_id: u8) -> RawReadings {
        let map = &self.registers;
        let reader = &mut self.reader;
        RawReadings {
            pv: reader.read_u32(map.pv_power_register(), unit_id).await,
            grid: reader.read_s32(map.grid_power_register(), unit_id).await,
            load: reader.read_s32(map.load_power_register(), unit_id).await,
            soc_inverter: reader.read_u16(map.soc_inverter_register(), unit_id).await,
            soc_bms: reader.read_u16(map.soc_bms_register(), unit_id).await,
        }
    }
}

async fn persist(repos: &Repositories, sample: &Sample) {
    let Some(log) = repos.log() else {
        return;
    };
    let row = sample.clone();
    let path = log.path().to_path_buf();
    match tokio::task::spawn_blocking(move || log.append(&row)).await {
        Ok(Ok(())) => debug!(path = %path.display(), "sample logged"),
        Ok(Err(e)) => warn!(error = %e, "failed to append sample to log"),
        Err(e) => warn!(error = %e, "log append task failed"),
    }
}
