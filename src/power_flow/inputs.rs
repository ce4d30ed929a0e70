use serde::{Deserialize, Serialize};

/// Decoded register values of one poll cycle; `None` means the read timed out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReadings {
    /// PV input power, tenths of a watt
    pub pv: Option<u32>,
    /// Grid power, tenths of a watt (positive = import, negative = export)
    pub grid: Option<i32>,
    /// Load power, tenths of a watt
    pub load: Option<i32>,
    pub soc_inverter: Option<u16>,
    pub soc_bms: Option<u16>,
}

impl RawReadings {
    /// PV, grid and load are all present, so the balance can be solved
    pub fn balance_complete(&self) -> bool {
        self.pv.is_some() && self.grid.is_some() && self.load.is_some()
    }

    /// At least one register answered
    pub fn any_present(&self) -> bool {
        self.pv.is_some()
            || self.grid.is_some()
            || self.load.is_some()
            || self.soc_inverter.is_some()
            || self.soc_bms.is_some()
    }
}
