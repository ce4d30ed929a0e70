//! Bounded-retry register reads.
//!
//! A read is driven by a small state machine:
//! `Disconnected -> Connecting -> Reading -> {Success, Retry, TimedOut}`.
//! Every transport failure lands in `Retry`; only the deadline ends the loop
//! without a value.

use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::client::RegisterTransport;
use super::parser::{self, CodecError};

/// Deadline and back-off of one register read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
enum ReadState {
    Disconnected,
    Connecting,
    Reading,
    Retry,
    Success(Vec<u16>),
    TimedOut,
}

/// Reads input registers, reconnecting and retrying until the policy deadline
pub struct ResilientReader {
    transport: Box<dyn RegisterTransport>,
    policy: RetryPolicy,
}

impl ResilientReader {
    pub fn new(transport: Box<dyn RegisterTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Read `count` input registers, or `None` once the deadline has passed.
    ///
    /// Against a transport that never answers this returns no earlier than
    /// `policy.timeout` and no later than `policy.timeout + policy.retry_delay`.
    pub async fn read(&mut self, address: u16, count: u16, unit_id: u8) -> Option<Vec<u16>> {
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let mut attempts: u32 = 0;
        let mut state = ReadState::Disconnected;

        loop {
            state = match state {
                ReadState::Disconnected if self.transport.is_connected() => ReadState::Reading,
                ReadState::Disconnected => ReadState::Connecting,
                ReadState::Connecting => {
                    let budget = deadline.saturating_duration_since(Instant::now());
                    match timeout(budget, self.transport.connect()).await {
                        Ok(Ok(())) => ReadState::Reading,
                        Ok(Err(e)) => {
                            debug!(address, error = %e, "connect attempt failed");
                            ReadState::Retry
                        }
                        Err(_) => {
                            debug!(address, "connect attempt exceeded read deadline");
                            ReadState::Retry
                        }
                    }
                }
                ReadState::Reading => {
                    attempts += 1;
                    let budget = deadline.saturating_duration_since(Instant::now());
                    let result = timeout(
                        budget,
                        self.transport.read_input_registers(address, count, unit_id),
                    )
                    .await;
                    match result {
                        Ok(Ok(words)) => ReadState::Success(words),
                        Ok(Err(e)) => {
                            debug!(address, attempt = attempts, error = %e, "register read failed");
                            self.transport.close().await;
                            ReadState::Retry
                        }
                        Err(_) => {
                            debug!(address, attempt = attempts, "register read exceeded deadline");
                            self.transport.close().await;
                            ReadState::Retry
                        }
                    }
                }
                ReadState::Retry => {
                    if started.elapsed() > self.policy.timeout {
                        ReadState::TimedOut
                    } else {
                        sleep(self.policy.retry_delay).await;
                        ReadState::Disconnected
                    }
                }
                ReadState::Success(words) => {
                    if attempts > 1 {
                        debug!(address, attempts, "register read succeeded after retry");
                    }
                    return Some(words);
                }
                ReadState::TimedOut => {
                    warn!(
                        address,
                        count,
                        attempts,
                        timeout_ms = self.policy.timeout.as_millis() as u64,
                        "register read timed out"
                    );
                    return None;
                }
            };
        }
    }

    /// Read one register as u16
    pub async fn read_u16(&mut self, address: u16, unit_id: u8) -> Option<u16> {
        let words = self.read(address, 1, unit_id).await?;
        decoded(address, parser::decode_u16(&words))
    }

    /// Read two registers as u32, high word first
    pub async fn read_u32(&mut self, address: u16, unit_id: u8) -> Option<u32> {
        let words = self.read(address, 2, unit_id).await?;
        decoded(address, parser::decode_u32(&words))
    }

    /// Read two registers as two's-complement i32, high word first
    pub async fn read_s32(&mut self, address: u16, unit_id: u8) -> Option<i32> {
        let words = self.read(address, 2, unit_id).await?;
        decoded(address, parser::decode_s32(&words))
    }
}

fn decoded<T>(address: u16, result: Result<T, CodecError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(address, error = %e, "discarding malformed register block");
            None
        }
    }
}
