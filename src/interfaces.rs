//! Host network interface discovery

use pnet::datalink::{self, NetworkInterface};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Conventional interface name used when enumeration yields nothing usable
#[cfg(target_os = "windows")]
pub const FALLBACK_INTERFACE: &str = "Ethernet";
#[cfg(target_os = "macos")]
pub const FALLBACK_INTERFACE: &str = "en0";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const FALLBACK_INTERFACE: &str = "eth0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
    pub is_up: bool,
    pub is_loopback: bool,
    pub addresses: Vec<IpAddr>,
}

impl From<&NetworkInterface> for InterfaceInfo {
    fn from(iface: &NetworkInterface) -> Self {
        Self {
            name: iface.name.clone(),
            description: iface.description.clone(),
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
            addresses: iface.ips.iter().map(|network| network.ip()).collect(),
        }
    }
}

impl InterfaceInfo {
    /// Up and carrying at least one IPv4 or IPv6 address
    pub fn is_capturable(&self) -> bool {
        self.is_up && !self.addresses.is_empty()
    }
}

/// All interfaces the host reports
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    datalink::interfaces().iter().map(InterfaceInfo::from).collect()
}

/// Names of the interfaces worth capturing on, in enumeration order
pub fn select_capturable(interfaces: &[InterfaceInfo]) -> Vec<String> {
    interfaces
        .iter()
        .filter(|iface| iface.is_capturable())
        .map(|iface| iface.name.clone())
        .collect()
}

/// Interfaces to capture on when none were configured. Never empty.
pub fn resolve_interfaces() -> Vec<String> {
    resolve_from(list_interfaces())
}

fn resolve_from(interfaces: Vec<InterfaceInfo>) -> Vec<String> {
    let selected = select_capturable(&interfaces);
    if selected.is_empty() {
        warn!(
            "No capturable interfaces found among {} enumerated, falling back to {}",
            interfaces.len(),
            FALLBACK_INTERFACE
        );
        return vec![FALLBACK_INTERFACE.to_string()];
    }
    debug!("Resolved capture interfaces: {:?}", selected);
    selected
}
