//! Build-time capacity constants and runtime defaults.
//!
//! The original RTOS system fixes these at compile time (spec §2's
//! "Implementation budget", §9 "Global mutable state... created at init").
//! We keep the pool/table sizes as compile-time constants (matching the
//! teacher's const-generic `Set<N, L>`) and collect the runtime-tunable
//! defaults (queue sizes, timeouts, ephemeral port range) into [`Config`],
//! the hosted-environment "module struct" spec §9 calls for instead of
//! process-wide statics.

use core::time::Duration;

/// Maximum number of live sockets the table can hold (spec §2 C1).
pub const MAX_SOCKETS: usize = 32;
/// Maximum number of live connection-table entries.
pub const MAX_CONNS: usize = 64;

/// Ephemeral port range (spec §4.4 step 3, §9 "Random-port search").
pub const EPHEMERAL_PORT_MIN: u16 = 49152;
pub const EPHEMERAL_PORT_MAX: u16 = 65535;

/// Runtime-tunable socket defaults, the hosted analogue of the RTOS's
/// compiled-in constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub rx_q_size_default: usize,
    pub tx_q_size_default: usize,
    pub accept_q_size_max_default: usize,
    pub child_q_size_max_default: usize,
    pub timeout_rx_q: Option<Duration>,
    pub timeout_conn_req: Option<Duration>,
    pub timeout_conn_accept: Option<Duration>,
    pub timeout_conn_close: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rx_q_size_default: 4096,
            tx_q_size_default: 4096,
            accept_q_size_max_default: 8,
            child_q_size_max_default: 8,
            timeout_rx_q: None,
            timeout_conn_req: Some(Duration::from_secs(75)),
            timeout_conn_accept: None,
            timeout_conn_close: Some(Duration::from_secs(10)),
        }
    }
}
