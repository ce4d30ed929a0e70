//! Power flow accounting.
//!
//! Turns the raw inverter readings of one poll cycle into battery and grid flows
//! using the power balance `battery = pv - load - grid`.

pub mod balance;
pub mod inputs;

pub use balance::{balance, raw_to_kw};
pub use inputs::RawReadings;
