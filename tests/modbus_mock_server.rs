//! End-to-end reads through the real `tokio-modbus` client against an in-process
//! Modbus TCP server that serves input registers.
#![cfg(feature = "modbus")]

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

use growatt_monitor::config::Config;
use growatt_monitor::controller::InverterPoller;
use growatt_monitor::modbus::client::ModbusTcpTransport;
use growatt_monitor::modbus::reader::{ResilientReader, RetryPolicy};
use growatt_monitor::modbus::register_map::GrowattSphRegisterMap;
use growatt_monitor::repo::Repositories;

const READ_INPUT_REGISTERS: u8 = 0x04;
const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Input-register-only Modbus TCP server
struct MockModbusServer {
    input_registers: RwLock<HashMap<u16, u16>>,
    /// Connections to hang up on right after accepting
    drop_connections: AtomicUsize,
    accepted: AtomicUsize,
}

impl MockModbusServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            input_registers: RwLock::new(HashMap::new()),
            drop_connections: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
        })
    }

    fn set_input_registers(&self, start_address: u16, values: &[u16]) {
        let mut registers = self.input_registers.write();
        for (i, &value) in values.iter().enumerate() {
            registers.insert(start_address + i as u16, value);
        }
    }

    /// Load a Growatt SPH operating point: PV 300 W, grid -50 W, load 200 W
    fn load_growatt_snapshot(&self) {
        let grid = (-500i32) as u32;
        self.set_input_registers(1, &[0, 3000]);
        self.set_input_registers(1029, &[(grid >> 16) as u16, grid as u16]);
        self.set_input_registers(1037, &[0, 2000]);
        self.set_input_registers(1014, &[54]);
        self.set_input_registers(1086, &[55]);
    }

    async fn start(self: &Arc<Self>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                server.accepted.fetch_add(1, Ordering::SeqCst);
                let pending = server.drop_connections.load(Ordering::SeqCst);
                if pending > 0 {
                    server.drop_connections.store(pending - 1, Ordering::SeqCst);
                    drop(stream);
                    continue;
                }
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    let _ = server.handle_connection(stream).await;
                });
            }
        });
        addr
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        loop {
            let mut header = [0u8; 7];
            stream.read_exact(&mut header).await?;
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let mut pdu = vec![0u8; length.saturating_sub(1)];
            stream.read_exact(&mut pdu).await?;

            let response_pdu = self.process_pdu(&pdu);
            let mut response = Vec::with_capacity(7 + response_pdu.len());
            // echo transaction and protocol id
            response.extend_from_slice(&header[0..4]);
            response.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
            response.push(header[6]);
            response.extend_from_slice(&response_pdu);
            stream.write_all(&response).await?;
        }
    }

    fn process_pdu(&self, pdu: &[u8]) -> Vec<u8> {
        match pdu {
            [READ_INPUT_REGISTERS, a0, a1, q0, q1] => {
                let start_address = u16::from_be_bytes([*a0, *a1]);
                let quantity = u16::from_be_bytes([*q0, *q1]);
                if quantity == 0 || quantity > 125 {
                    return vec![READ_INPUT_REGISTERS | 0x80, ILLEGAL_DATA_VALUE];
                }
                let registers = self.input_registers.read();
                let mut response = vec![READ_INPUT_REGISTERS, (quantity * 2) as u8];
                for i in 0..quantity {
                    let value = registers
                        .get(&start_address.wrapping_add(i))
                        .copied()
                        .unwrap_or(0);
                    response.extend_from_slice(&value.to_be_bytes());
                }
                response
            }
            [function, ..] => vec![function | 0x80, ILLEGAL_FUNCTION],
            [] => vec![0x80, ILLEGAL_FUNCTION],
        }
    }
}

fn reader_for(addr: SocketAddr, policy: RetryPolicy) -> ResilientReader {
    let transport = ModbusTcpTransport::with_timeout(
        addr.ip().to_string(),
        addr.port(),
        Duration::from_millis(500),
    );
    ResilientReader::new(Box::new(transport), policy)
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn test_typed_reads_over_tcp() {
    let server = MockModbusServer::new();
    server.load_growatt_snapshot();
    let addr = server.start().await;
    let mut reader = reader_for(addr, quick_policy());

    assert_eq!(reader.read_u32(1, 1).await, Some(3000));
    assert_eq!(reader.read_s32(1029, 1).await, Some(-500));
    assert_eq!(reader.read_s32(1037, 1).await, Some(2000));
    assert_eq!(reader.read_u16(1086, 1).await, Some(55));
    assert!(reader.is_connected());
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnects_after_dropped_connection() {
    let server = MockModbusServer::new();
    server.load_growatt_snapshot();
    server.drop_connections.store(1, Ordering::SeqCst);
    let addr = server.start().await;
    let mut reader = reader_for(addr, quick_policy());

    assert_eq!(reader.read_u16(1014, 1).await, Some(54));
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_device_times_out() {
    // grab a free port, then stop listening on it
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let policy = RetryPolicy {
        timeout: Duration::from_millis(300),
        retry_delay: Duration::from_millis(50),
    };
    let mut reader = reader_for(addr, policy);

    let started = Instant::now();
    let result = reader.read(1, 2, 1).await;
    let elapsed = started.elapsed();

    assert_eq!(result, None);
    assert!(elapsed >= policy.timeout);
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_poll_cycle_against_device() {
    let server = MockModbusServer::new();
    server.load_growatt_snapshot();
    let addr = server.start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut cfg = Config::default();
    cfg.modbus.host = addr.ip().to_string();
    cfg.modbus.port = addr.port();
    cfg.modbus.retry_timeout_secs = 2;
    cfg.log.file = dir.path().join("growatt_log.csv").display().to_string();
    let repos = Arc::new(Repositories::new(&cfg));
    let policy = cfg.modbus.retry_policy();

    let mut poller = InverterPoller::new(
        reader_for(addr, policy),
        Box::new(GrowattSphRegisterMap),
        Arc::new(RwLock::new(cfg)),
        Arc::clone(&repos),
    );
    let sample = poller.poll_once().await;

    assert!(sample.connected);
    assert!(!sample.degraded);
    assert_eq!(sample.solar_kw, 0.3);
    assert_eq!(sample.load_kw, 0.2);
    assert_eq!(sample.battery_net_kw, 0.15);
    assert_eq!(sample.grid_export_kw, 0.05);
    assert_eq!((sample.soc_inverter_pct, sample.soc_bms_pct), (54, 55));
    assert_eq!(repos.history.len(), 1);

    let mut logged = Vec::new();
    repos.log().unwrap().scan(|s| logged.push(s)).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].battery_net_kw, 0.15);
}
