//! Picks the local IPv4 address players on the same network should use.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};

static WIRELESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)wi-?fi|wlan|wireless").expect("Invalid wireless adapter pattern"));

static VIRTUAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)vmware|vbox|hyper|docker|loopback").expect("Invalid virtual adapter pattern")
});

/// An IPv4 address bound to a named network adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub name: String,
    pub addr: Ipv4Addr,
}

impl Adapter {
    pub fn new(name: impl Into<String>, addr: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }

    fn is_candidate(&self) -> bool {
        !self.addr.is_loopback() && !VIRTUAL.is_match(&self.name)
    }

    fn is_wireless(&self) -> bool {
        WIRELESS.is_match(&self.name)
    }
}

/// Adapter whose address should be shown, if any qualifies.
///
/// Wireless adapters win, then any adapter holding a private-range address.
/// Loopback and virtual adapters are never chosen.
pub fn select_adapter(adapters: &[Adapter]) -> Option<&Adapter> {
    adapters
        .iter()
        .filter(|a| a.is_candidate())
        .find(|a| a.is_wireless())
        .or_else(|| {
            adapters
                .iter()
                .filter(|a| a.is_candidate())
                .find(|a| a.addr.is_private())
        })
}

pub fn local_address(adapters: &[Adapter]) -> Ipv4Addr {
    select_adapter(adapters)
        .map(|a| a.addr)
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

/// IPv4 adapters of this host. An enumeration failure yields an empty list.
pub fn host_adapters() -> Vec<Adapter> {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|iface| match iface.ip() {
                IpAddr::V4(addr) => Some(Adapter::new(iface.name, addr)),
                IpAddr::V6(_) => None,
            })
            .collect(),
        Err(e) => {
            warn!("Could not enumerate network interfaces: {}", e);
            Vec::new()
        }
    }
}

/// [`local_address`] over the host's own adapters. With `debug` set, the
/// chosen adapter is logged at info level.
pub fn detect_local_address(debug: bool) -> Ipv4Addr {
    let adapters = host_adapters();
    debug!("Found {} IPv4 adapters", adapters.len());

    match select_adapter(&adapters) {
        Some(adapter) => {
            if debug {
                info!("Using adapter {} ({})", adapter.name, adapter.addr);
            }
            adapter.addr
        }
        None => {
            if debug {
                info!("No suitable adapter found, falling back to loopback");
            }
            Ipv4Addr::LOCALHOST
        }
    }
}
