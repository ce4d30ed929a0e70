use anyhow::Result;

use crate::config::ModbusConfig;
use crate::modbus::client::RegisterTransport;

/// Where register reads are served from
///
/// Each mode only exists when its feature is compiled in, so a release build without
/// `sim` can never poll a fake inverter by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareMode {
    /// Real inverter via Modbus TCP
    #[cfg(feature = "modbus")]
    Modbus,
    /// Generated register values for development
    #[cfg(feature = "sim")]
    Simulated,
}

impl HardwareMode {
    pub fn from_config(cfg: &ModbusConfig) -> Result<Self> {
        if cfg.simulate {
            #[cfg(feature = "sim")]
            {
                return Ok(Self::Simulated);
            }
            #[cfg(not(feature = "sim"))]
            {
                anyhow::bail!("modbus.simulate is set but this build lacks the `sim` feature");
            }
        }

        #[cfg(feature = "modbus")]
        {
            return Ok(Self::Modbus);
        }
        #[cfg(not(feature = "modbus"))]
        {
            anyhow::bail!("this build lacks the `modbus` feature; enable it or set modbus.simulate");
        }
    }
}

/// Builds the register transport for the configured device
pub struct DeviceFactory {
    mode: HardwareMode,
    config: ModbusConfig,
}

impl DeviceFactory {
    pub fn new(mode: HardwareMode, config: ModbusConfig) -> Self {
        Self { mode, config }
    }

    pub fn from_config(config: &ModbusConfig) -> Result<Self> {
        Ok(Self::new(HardwareMode::from_config(config)?, config.clone()))
    }

    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    /// Disconnected transport; the reader connects on first use
    pub fn create_transport(&self) -> Box<dyn RegisterTransport> {
        match self.mode {
            #[cfg(feature = "modbus")]
            HardwareMode::Modbus => {
                tracing::info!(
                    host = %self.config.host,
                    port = self.config.port,
                    unit_id = self.config.unit_id,
                    "using Modbus TCP transport"
                );
                Box::new(crate::modbus::client::ModbusTcpTransport::new(
                    self.config.host.clone(),
                    self.config.port,
                ))
            }
            #[cfg(feature = "sim")]
            HardwareMode::Simulated => {
                tracing::warn!("using simulated inverter, no device will be polled");
                Box::new(crate::simulation::SimulatedInverter::new(
                    crate::simulation::SimulatedInverterConfig::default(),
                ))
            }
        }
    }
}
