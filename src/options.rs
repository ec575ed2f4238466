use std::time::Duration;

/// Tuning knobs for the engine and its connections.
///
/// Durations are carried in milliseconds; a value of `0` disables the
/// corresponding timeout. `max_rpc_retries` follows the server-side
/// convention: `-1` retries forever, `0` never retries.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of retries for a single call (or connect attempt
    /// sequence). `-1` means unbounded, `0` means fail on first error.
    pub max_rpc_retries: i32,
    /// Delay between plain retries against the same endpoint.
    pub rpc_retry_delay_ms: u64,
    /// Per-call wall-clock budget. `0` disables the deadline.
    pub rpc_timeout_ms: u64,
    /// Budget for the whole preamble/auth/context exchange.
    pub handshake_timeout_ms: u64,
    /// Budget for the TCP dial itself.
    pub connect_timeout_ms: u64,
    /// Name reported to the server in log-friendly contexts.
    pub client_name: String,
    /// Effective user sent in the connection context.
    pub user_name: String,
    /// Protocol the remote end must speak.
    pub protocol_name: String,
    /// Protocol version; the low byte rides in the connection preamble.
    pub protocol_version: u32,
    /// How many times a call may fail over before giving up.
    pub failover_max_attempts: u32,
    /// Base of the exponential backoff between failover attempts.
    pub failover_sleep_base_ms: u64,
    /// Upper bound on the failover backoff.
    pub failover_sleep_max_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_rpc_retries: 0,
            rpc_retry_delay_ms: 10_000,
            rpc_timeout_ms: 30_000,
            handshake_timeout_ms: 30_000,
            connect_timeout_ms: 30_000,
            client_name: String::from("hrpc"),
            user_name: String::new(),
            protocol_name: String::from("org.apache.hadoop.hdfs.protocol.ClientProtocol"),
            protocol_version: 9,
            failover_max_attempts: 4,
            failover_sleep_base_ms: 500,
            failover_sleep_max_ms: 15_000,
        }
    }
}

fn to_timeout(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

impl Options {
    /// Per-call deadline, `None` when disabled.
    pub fn rpc_timeout(&self) -> Option<Duration> {
        to_timeout(self.rpc_timeout_ms)
    }

    /// Handshake deadline, `None` when disabled.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        to_timeout(self.handshake_timeout_ms)
    }

    /// TCP dial deadline, `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        to_timeout(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.rpc_retry_delay_ms)
    }
}
