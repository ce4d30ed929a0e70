use chrono::{DateTime, FixedOffset, Timelike};

use super::inputs::RawReadings;
use crate::domain::Sample;

/// Raw power registers count tenths of a watt
const RAW_PER_WATT: f64 = 10.0;
const WATTS_PER_KW: f64 = 1000.0;

/// Convert a raw power register value to kW
pub fn raw_to_kw(raw: f64) -> f64 {
    raw / RAW_PER_WATT / WATTS_PER_KW
}

/// Round to watt resolution; also normalizes `-0.0`
fn round_kw(kw: f64) -> f64 {
    (kw * 1000.0).round() / 1000.0 + 0.0
}

/// Derive battery and grid flows for one poll cycle.
///
/// When PV, grid or load is missing the battery terms are reported as zero and the
/// sample is flagged `degraded`; zero here means "unknown", not "idle". The grid split
/// only needs the grid reading and defaults to zero without it. Missing SOC reads
/// become 0 %.
pub fn balance(readings: &RawReadings, timestamp: DateTime<FixedOffset>) -> Sample {
    let solar_kw = readings.pv.map(|raw| raw_to_kw(f64::from(raw)));
    let grid_kw = readings.grid.map(|raw| raw_to_kw(f64::from(raw)));
    let load_kw = readings.load.map(|raw| raw_to_kw(f64::from(raw)));

    let battery_net_kw = match (solar_kw, load_kw, grid_kw) {
        (Some(solar), Some(load), Some(grid)) => solar - load - grid,
        _ => 0.0,
    };
    let grid_kw = grid_kw.unwrap_or(0.0);

    Sample {
        timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
        solar_kw: round_kw(solar_kw.unwrap_or(0.0)),
        load_kw: round_kw(load_kw.unwrap_or(0.0)),
        grid_raw_kw: round_kw(grid_kw),
        battery_charge_kw: round_kw(battery_net_kw.max(0.0)),
        battery_discharge_kw: round_kw((-battery_net_kw).max(0.0)),
        grid_import_kw: round_kw(grid_kw.max(0.0)),
        grid_export_kw: round_kw((-grid_kw).max(0.0)),
        battery_net_kw: round_kw(battery_net_kw),
        soc_inverter_pct: readings.soc_inverter.unwrap_or(0),
        soc_bms_pct: readings.soc_bms.unwrap_or(0),
        connected: readings.any_present(),
        degraded: !readings.balance_complete(),
    }
}
