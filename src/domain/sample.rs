use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// Energy flows at one polling instant
///
/// Power balance: `battery_net_kw = solar_kw - load_kw - grid_raw_kw`.
/// `grid_raw_kw` keeps the inverter's sign (positive = import, negative = export).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Acquisition time, whole seconds
    pub timestamp: DateTime<FixedOffset>,
    pub solar_kw: f64,
    pub load_kw: f64,
    pub grid_raw_kw: f64,
    pub battery_charge_kw: f64,
    pub battery_discharge_kw: f64,
    pub grid_import_kw: f64,
    pub grid_export_kw: f64,
    /// Positive = charging, negative = discharging
    pub battery_net_kw: f64,
    pub soc_inverter_pct: u16,
    pub soc_bms_pct: u16,
    /// At least one register read succeeded during the cycle
    pub connected: bool,
    /// PV, grid or load was unreadable, so the battery terms are zero rather than measured
    pub degraded: bool,
}

impl Sample {
    /// Placeholder returned before the first poll cycle completes
    pub fn disconnected() -> Self {
        Self {
            timestamp: DateTime::<FixedOffset>::default(),
            solar_kw: 0.0,
            load_kw: 0.0,
            grid_raw_kw: 0.0,
            battery_charge_kw: 0.0,
            battery_discharge_kw: 0.0,
            grid_import_kw: 0.0,
            grid_export_kw: 0.0,
            battery_net_kw: 0.0,
            soc_inverter_pct: 0,
            soc_bms_pct: 0,
            connected: false,
            degraded: false,
        }
    }

    /// Calendar date of the acquisition, in the offset the sample was taken in
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Energy integrals for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub solar_kwh: f64,
    pub load_kwh: f64,
    pub grid_export_kwh: f64,
    pub grid_import_kwh: f64,
    pub battery_charge_kwh: f64,
    pub battery_discharge_kwh: f64,
    pub count: usize,
}

impl DailyTotal {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            solar_kwh: 0.0,
            load_kwh: 0.0,
            grid_export_kwh: 0.0,
            grid_import_kwh: 0.0,
            battery_charge_kwh: 0.0,
            battery_discharge_kwh: 0.0,
            count: 0,
        }
    }

    /// Add one sample, treated as constant power for a whole polling interval
    pub fn accumulate(&mut self, sample: &Sample, interval_hours: f64) {
        self.solar_kwh += sample.solar_kw * interval_hours;
        self.load_kwh += sample.load_kw * interval_hours;
        self.grid_export_kwh += sample.grid_export_kw * interval_hours;
        self.grid_import_kwh += sample.grid_import_kw * interval_hours;
        self.battery_charge_kwh += sample.battery_charge_kw * interval_hours;
        self.battery_discharge_kwh += sample.battery_discharge_kw * interval_hours;
        self.count += 1;
    }
}
