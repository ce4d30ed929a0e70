pub mod reader;

/// Register transport abstraction and the Modbus TCP implementation
pub mod client {
    use async_trait::async_trait;
    use std::time::Duration;
    use thiserror::Error;

    /// Transport-level failures. The resilient reader retries all of them.
    #[derive(Debug, Error)]
    pub enum TransportError {
        #[error("transport is not connected")]
        Disconnected,
        #[error("connection failed: {0}")]
        Connect(#[source] std::io::Error),
        #[error("connection timeout after {0:?}")]
        ConnectTimeout(Duration),
        #[error("device address {0} could not be resolved")]
        Unresolved(String),
        #[error("register read failed: {0}")]
        Io(#[from] std::io::Error),
        #[error("register read timeout after {0:?}")]
        ReadTimeout(Duration),
    }

    /// Register-oriented access to a single field device
    #[async_trait]
    pub trait RegisterTransport: Send {
        fn is_connected(&self) -> bool;

        async fn connect(&mut self) -> Result<(), TransportError>;

        async fn read_input_registers(
            &mut self,
            address: u16,
            count: u16,
            unit_id: u8,
        ) -> Result<Vec<u16>, TransportError>;

        /// Drop the connection; the next read reconnects first.
        async fn close(&mut self);
    }

    #[cfg(feature = "modbus")]
    pub use tcp_transport::ModbusTcpTransport;

    #[cfg(feature = "modbus")]
    mod tcp_transport {
        use super::{RegisterTransport, TransportError};
        use async_trait::async_trait;
        use std::time::Duration;
        use tokio::time::timeout;
        use tokio_modbus::client::tcp;
        use tokio_modbus::prelude::*;
        use tracing::debug;

        const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

        pub struct ModbusTcpTransport {
            host: String,
            port: u16,
            timeout_duration: Duration,
            context: Option<tokio_modbus::client::Context>,
        }

        impl ModbusTcpTransport {
            /// Create a disconnected transport with the default per-request timeout
            pub fn new(host: impl Into<String>, port: u16) -> Self {
                Self::with_timeout(host, port, DEFAULT_TIMEOUT)
            }

            /// Create a disconnected transport with a custom per-request timeout
            pub fn with_timeout(host: impl Into<String>, port: u16, timeout_duration: Duration) -> Self {
                Self {
                    host: host.into(),
                    port,
                    timeout_duration,
                    context: None,
                }
            }

            pub fn endpoint(&self) -> String {
                format!("{}:{}", self.host, self.port)
            }
        }

        #[async_trait]
        impl RegisterTransport for ModbusTcpTransport {
            fn is_connected(&self) -> bool {
                self.context.is_some()
            }

            async fn connect(&mut self) -> Result<(), TransportError> {
                let socket_addr = tokio::net::lookup_host((self.host.as_str(), self.port))
                    .await
                    .map_err(TransportError::Connect)?
                    .next()
                    .ok_or_else(|| TransportError::Unresolved(self.endpoint()))?;

                debug!(%socket_addr, "connecting to Modbus device");

                let ctx = timeout(self.timeout_duration, tcp::connect(socket_addr))
                    .await
                    .map_err(|_| TransportError::ConnectTimeout(self.timeout_duration))?
                    .map_err(TransportError::Connect)?;

                self.context = Some(ctx);
                Ok(())
            }

            async fn read_input_registers(
                &mut self,
                address: u16,
                count: u16,
                unit_id: u8,
            ) -> Result<Vec<u16>, TransportError> {
                let ctx = self.context.as_mut().ok_or(TransportError::Disconnected)?;
                ctx.set_slave(Slave(unit_id));

                match timeout(self.timeout_duration, ctx.read_input_registers(address, count)).await {
                    Ok(Ok(words)) => Ok(words),
                    Ok(Err(e)) => Err(TransportError::Io(e)),
                    Err(_) => Err(TransportError::ReadTimeout(self.timeout_duration)),
                }
            }

            async fn close(&mut self) {
                if self.context.take().is_some() {
                    debug!(endpoint = %self.endpoint(), "closed Modbus connection");
                }
            }
        }
    }
}

/// Input register layout of the monitored inverter
pub mod register_map {
    /// Register map trait for different inverter families
    pub trait RegisterMap: Send + Sync {
        /// PV input power, u32 over two registers
        fn pv_power_register(&self) -> u16;

        /// Grid power, s32 over two registers
        fn grid_power_register(&self) -> u16;

        /// Load power, s32 over two registers
        fn load_power_register(&self) -> u16;

        /// Battery SOC as reported by the inverter, u16
        fn soc_inverter_register(&self) -> u16;

        /// Battery SOC as reported by the BMS, u16
        fn soc_bms_register(&self) -> u16;
    }

    /// Growatt SPH hybrid inverter register map
    pub struct GrowattSphRegisterMap;

    impl RegisterMap for GrowattSphRegisterMap {
        fn pv_power_register(&self) -> u16 { 1 }
        fn grid_power_register(&self) -> u16 { 1029 }
        fn load_power_register(&self) -> u16 { 1037 }
        fn soc_inverter_register(&self) -> u16 { 1014 }
        fn soc_bms_register(&self) -> u16 { 1086 }
    }
}

/// Modbus data parsing utilities
pub mod parser {
    use thiserror::Error;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
    pub enum CodecError {
        #[error("invalid register block length: expected {expected}, got {actual}")]
        InvalidLength { expected: usize, actual: usize },
    }

    fn invalid_length(expected: usize, registers: &[u16]) -> CodecError {
        CodecError::InvalidLength {
            expected,
            actual: registers.len(),
        }
    }

    /// Decode u16 from exactly one register
    pub fn decode_u16(registers: &[u16]) -> Result<u16, CodecError> {
        match registers {
            [value] => Ok(*value),
            _ => Err(invalid_length(1, registers)),
        }
    }

    /// Decode u32 from exactly two registers, high word first.
    ///
    /// Word order was checked against live Growatt output; re-validate on a device
    /// before changing it.
    pub fn decode_u32(registers: &[u16]) -> Result<u32, CodecError> {
        match registers {
            [hi, lo] => Ok((u32::from(*hi) << 16) | u32::from(*lo)),
            _ => Err(invalid_length(2, registers)),
        }
    }

    /// Decode two's-complement i32 from exactly two registers, high word first
    pub fn decode_s32(registers: &[u16]) -> Result<i32, CodecError> {
        decode_u32(registers).map(|raw| raw as i32)
    }

}
