pub mod factory;

pub use factory::{DeviceFactory, HardwareMode};
