//! # Simulated inverter
//!
//! A [`RegisterTransport`] that answers input-register reads with plausible
//! Growatt SPH values, so the monitor can run without hardware.
//!
//! PV follows a daylight bell curve between 06:00 and 18:00 local time, load is a
//! base consumption plus noise, and the battery soaks up the difference within its
//! power limit. The remainder goes to or comes from the grid.

use async_trait::async_trait;
use chrono::{Local, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tokio::time::{Duration, Instant};

use crate::modbus::client::{RegisterTransport, TransportError};
use crate::modbus::register_map::{GrowattSphRegisterMap, RegisterMap};

/// Raw power registers count tenths of a watt
const RAW_PER_WATT: f64 = 10.0;

/// How long one generated operating point stays valid
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SimulatedInverterConfig {
    pub peak_pv_w: f64,
    pub base_load_w: f64,
    pub battery_capacity_wh: f64,
    pub battery_max_power_w: f64,
    pub initial_soc_pct: f64,
}

impl Default for SimulatedInverterConfig {
    fn default() -> Self {
        Self {
            peak_pv_w: 6_000.0,
            base_load_w: 400.0,
            battery_capacity_wh: 10_000.0,
            battery_max_power_w: 3_000.0,
            initial_soc_pct: 55.0,
        }
    }
}

/// Instantaneous register values, already in raw device units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct OperatingPoint {
    pv_raw: u32,
    grid_raw: i32,
    load_raw: i32,
    soc_pct: u16,
}

pub struct SimulatedInverter {
    config: SimulatedInverterConfig,
    rng: StdRng,
    connected: bool,
    soc_pct: f64,
    point: OperatingPoint,
    refreshed_at: Option<Instant>,
    /// Fixed hour of day for reproducible runs; `None` follows the local clock
    hour_override: Option<f64>,
}

impl SimulatedInverter {
    pub fn new(config: SimulatedInverterConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic inverter pinned to one hour of the day
    pub fn seeded(config: SimulatedInverterConfig, seed: u64, hour: f64) -> Self {
        let mut sim = Self::with_rng(config, StdRng::seed_from_u64(seed));
        sim.hour_override = Some(hour);
        sim
    }

    fn with_rng(config: SimulatedInverterConfig, rng: StdRng) -> Self {
        let soc_pct = config.initial_soc_pct.clamp(0.0, 100.0);
        Self {
            config,
            rng,
            connected: false,
            soc_pct,
            point: OperatingPoint::default(),
            refreshed_at: None,
            hour_override: None,
        }
    }

    fn hour_of_day(&self) -> f64 {
        self.hour_override.unwrap_or_else(|| {
            let now = Local::now();
            f64::from(now.hour()) + f64::from(now.minute()) / 60.0
        })
    }

    fn refresh(&mut self) {
        let now = Instant::now();
        let elapsed = match self.refreshed_at {
            Some(at) if now.duration_since(at) < REFRESH_INTERVAL => return,
            Some(at) => now.duration_since(at),
            None => Duration::ZERO,
        };
        self.refreshed_at = Some(now);

        let hour = self.hour_of_day();
        let daylight = if (6.0..18.0).contains(&hour) {
            (PI * (hour - 6.0) / 12.0).sin()
        } else {
            0.0
        };
        let pv_w = self.config.peak_pv_w * daylight * self.rng.gen_range(0.85..1.0);
        let load_w = self.config.base_load_w + self.rng.gen_range(0.0..1_200.0);

        // positive = charging
        let limit = self.config.battery_max_power_w;
        let mut battery_w = (pv_w - load_w).clamp(-limit, limit);
        if (battery_w > 0.0 && self.soc_pct >= 100.0) || (battery_w < 0.0 && self.soc_pct <= 10.0) {
            battery_w = 0.0;
        }
        let hours = elapsed.as_secs_f64() / 3600.0;
        self.soc_pct = (self.soc_pct + battery_w * hours / self.config.battery_capacity_wh * 100.0)
            .clamp(0.0, 100.0);

        // positive = import
        let grid_w = load_w + battery_w - pv_w;

        self.point = OperatingPoint {
            pv_raw: (pv_w * RAW_PER_WATT).round() as u32,
            grid_raw: (grid_w * RAW_PER_WATT).round() as i32,
            load_raw: (load_w * RAW_PER_WATT).round() as i32,
            soc_pct: self.soc_pct.round() as u16,
        };
    }

    /// Register word at `address`; unmapped registers read as zero
    fn word(&self, address: u16) -> u16 {
        let map = GrowattSphRegisterMap;
        let point = self.point;
        let pv = split(point.pv_raw);
        let grid = split(point.grid_raw as u32);
        let load = split(point.load_raw as u32);

        match address {
            a if a == map.pv_power_register() => pv[0],
            a if a == map.pv_power_register() + 1 => pv[1],
            a if a == map.grid_power_register() => grid[0],
            a if a == map.grid_power_register() + 1 => grid[1],
            a if a == map.load_power_register() => load[0],
            a if a == map.load_power_register() + 1 => load[1],
            a if a == map.soc_inverter_register() || a == map.soc_bms_register() => point.soc_pct,
            _ => 0,
        }
    }
}

fn split(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

#[async_trait]
impl RegisterTransport for SimulatedInverter {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        _unit_id: u8,
    ) -> Result<Vec<u16>, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.refresh();
        Ok((0..count)
            .map(|offset| self.word(address.wrapping_add(offset)))
            .collect())
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::parser::{decode_s32, decode_u16, decode_u32};

    #[tokio::test]
    async fn test_reads_require_connection() {
        let mut sim = SimulatedInverter::seeded(SimulatedInverterConfig::default(), 7, 12.0);
        assert!(matches!(
            sim.read_input_registers(1, 2, 1).await,
            Err(TransportError::Disconnected)
        ));

        sim.connect().await.unwrap();
        assert!(sim.is_connected());
        sim.close().await;
        assert!(!sim.is_connected());
    }

    #[tokio::test]
    async fn test_midday_values_are_plausible() {
        let config = SimulatedInverterConfig::default();
        let mut sim = SimulatedInverter::seeded(config.clone(), 7, 12.0);
        sim.connect().await.unwrap();

        let pv = decode_u32(&sim.read_input_registers(1, 2, 1).await.unwrap()).unwrap();
        let load = decode_s32(&sim.read_input_registers(1037, 2, 1).await.unwrap()).unwrap();
        let grid = decode_s32(&sim.read_input_registers(1029, 2, 1).await.unwrap()).unwrap();
        let soc = decode_u16(&sim.read_input_registers(1086, 1, 1).await.unwrap()).unwrap();

        let pv_w = f64::from(pv) / RAW_PER_WATT;
        assert!(pv_w > 0.8 * config.peak_pv_w && pv_w <= config.peak_pv_w);
        assert!(load > 0);
        assert!(grid.unsigned_abs() < 100_000);
        assert!(soc <= 100);
    }

    #[tokio::test]
    async fn test_night_has_no_pv() {
        let mut sim = SimulatedInverter::seeded(SimulatedInverterConfig::default(), 3, 23.0);
        sim.connect().await.unwrap();

        let pv = sim.read_input_registers(1, 2, 1).await.unwrap();
        assert_eq!(pv, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_unmapped_registers_read_zero() {
        let mut sim = SimulatedInverter::seeded(SimulatedInverterConfig::default(), 1, 12.0);
        sim.connect().await.unwrap();

        let words = sim.read_input_registers(500, 3, 1).await.unwrap();
        assert_eq!(words, vec![0, 0, 0]);
    }
}
