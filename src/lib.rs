pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod hardware;
pub mod modbus;
pub mod power_flow;
pub mod repo;
#[cfg(feature = "sim")]
pub mod simulation;
pub mod telemetry;
