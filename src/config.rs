use std::str::FromStr;
use std::time::Duration;

use crate::error::CaptureError;

pub const ENV_INTERFACES: &str = "NETCREEP_CAPTURE_INTERFACES";
pub const ENV_MAX_QUEUE_SIZE: &str = "NETCREEP_MAX_QUEUE_SIZE";
pub const ENV_MAX_PACKET_STORE: &str = "NETCREEP_MAX_PACKET_STORE";
pub const ENV_PACKET_FILTER: &str = "NETCREEP_PACKET_FILTER";
pub const ENV_CAPTURE_TIMEOUT: &str = "NETCREEP_CAPTURE_TIMEOUT";
pub const ENV_MAX_PACKETS: &str = "NETCREEP_MAX_PACKETS";

pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1000;
pub const DEFAULT_MAX_STORED_PACKETS: usize = 50_000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_SNAPLEN: i32 = 65535;

/// Settings for one capture run
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Interfaces to sniff on; resolved from the host when empty
    pub interfaces: Vec<String>,
    pub max_queue_depth: usize,
    pub max_stored_packets: usize,
    /// BPF expression applied to every session
    pub filter: Option<String>,
    /// Wall-clock limit for each worker
    pub worker_timeout: Option<Duration>,
    /// Record limit for each worker
    pub max_packets_per_worker: Option<u64>,
    /// Upper bound on how long a blocked read or pop holds off the stop check
    pub poll_interval: Duration,
    /// How long stop waits for units before abandoning them
    pub stop_grace: Duration,
    pub snaplen: i32,
    pub promiscuous: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            max_stored_packets: DEFAULT_MAX_STORED_PACKETS,
            filter: None,
            worker_timeout: None,
            max_packets_per_worker: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_grace: DEFAULT_STOP_GRACE,
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: true,
        }
    }
}

impl CaptureConfig {
    /// Build a config from the `NETCREEP_*` environment variables
    pub fn from_env() -> Result<Self, CaptureError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset or blank keys keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CaptureError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(list) = get(ENV_INTERFACES) {
            config.interfaces = parse_interface_list(&list);
        }
        if let Some(value) = get(ENV_MAX_QUEUE_SIZE) {
            config.max_queue_depth = parse_number(ENV_MAX_QUEUE_SIZE, &value)?;
        }
        if let Some(value) = get(ENV_MAX_PACKET_STORE) {
            config.max_stored_packets = parse_number(ENV_MAX_PACKET_STORE, &value)?;
        }
        config.filter = get(ENV_PACKET_FILTER);
        if let Some(value) = get(ENV_CAPTURE_TIMEOUT) {
            let secs: u64 = parse_number(ENV_CAPTURE_TIMEOUT, &value)?;
            config.worker_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(value) = get(ENV_MAX_PACKETS) {
            config.max_packets_per_worker = Some(parse_number(ENV_MAX_PACKETS, &value)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.max_queue_depth == 0 {
            return Err(CaptureError::InvalidConfig(
                "max queue depth must be greater than zero".to_string(),
            ));
        }
        if self.max_stored_packets == 0 {
            return Err(CaptureError::InvalidConfig(
                "max stored packets must be greater than zero".to_string(),
            ));
        }
        if self.interfaces.iter().any(|name| name.trim().is_empty()) {
            return Err(CaptureError::InvalidConfig(
                "interface names must not be blank".to_string(),
            ));
        }
        if matches!(&self.filter, Some(filter) if filter.trim().is_empty()) {
            return Err(CaptureError::InvalidConfig(
                "capture filter must not be blank".to_string(),
            ));
        }
        if self.max_packets_per_worker == Some(0) {
            return Err(CaptureError::InvalidConfig(
                "per-interface packet limit must be greater than zero".to_string(),
            ));
        }
        if self.worker_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(CaptureError::InvalidConfig(
                "capture timeout must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(CaptureError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.snaplen <= 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "snaplen must be positive, got {}",
                self.snaplen
            )));
        }
        Ok(())
    }
}

/// Split a comma-separated interface list, dropping empty entries
pub fn parse_interface_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, CaptureError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| CaptureError::InvalidConfig(format!("{}={:?}: {}", key, value, e)))
}
