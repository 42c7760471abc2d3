//! Discovery Service - mDNS/DNS-SD advertisement and browsing for `_syncwave._tcp`

use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, warn};

use crate::error::{NetError, NetResult};

pub const SERVICE_TYPE: &str = "_syncwave._tcp.local.";
const PROTOCOL_VERSION: &str = "3.0";

/// Best-effort local IPv4 address, resolved the same way the original server
/// did: open a UDP socket toward a public address and read back the local
/// endpoint the OS picked for that route. Falls back to loopback on any error
/// (offline machine, no route, sandboxed network namespace).
pub fn local_ipv4() -> Ipv4Addr {
    let resolve = || -> std::io::Result<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        match socket.local_addr()?.ip() {
            std::net::IpAddr::V4(v4) => Ok(v4),
            std::net::IpAddr::V6(_) => Ok(Ipv4Addr::LOCALHOST),
        }
    };
    resolve().unwrap_or(Ipv4Addr::LOCALHOST)
}

/// A server discovered via mDNS browsing.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredServer {
    pub name: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub version: String,
}

/// Owns the mDNS daemon used to advertise this process's `StreamServer`.
///
/// Dropping (or explicitly unadvertising) removes the service record so
/// clients stop seeing a server that has shut down.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Advertisement {
    pub fn start(display_name: &str, port: u16) -> NetResult<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| NetError::DiscoveryError(e.to_string()))?;

        let ip = local_ipv4();
        let host_name = format!("{display_name}.local.");

        let mut properties = std::collections::HashMap::new();
        properties.insert("version".to_string(), PROTOCOL_VERSION.to_string());
        properties.insert("name".to_string(), display_name.to_string());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            display_name,
            &host_name,
            ip,
            port,
            Some(properties),
        )
        .map_err(|e| NetError::DiscoveryError(e.to_string()))?;

        let fullname = service.get_fullname().to_string();

        daemon
            .register(service)
            .map_err(|e| NetError::DiscoveryError(e.to_string()))?;

        info!("Advertising {} on {}:{}", fullname, ip, port);

        Ok(Self { daemon, fullname })
    }

    pub fn stop(self) -> NetResult<()> {
        self.daemon
            .unregister(&self.fullname)
            .map_err(|e| NetError::DiscoveryError(e.to_string()))?;
        Ok(())
    }
}

/// Browse for SyncWave servers on the LAN for up to `timeout`.
pub fn discover_servers(timeout: Duration) -> NetResult<Vec<DiscoveredServer>> {
    let daemon = ServiceDaemon::new().map_err(|e| NetError::DiscoveryError(e.to_string()))?;
    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| NetError::DiscoveryError(e.to_string()))?;

    let mut servers = Vec::new();
    let deadline = std::time::Instant::now() + timeout;

    while let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now()) {
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let Some(address) = info.get_addresses().iter().find_map(|ip| match ip {
                    std::net::IpAddr::V4(v4) => Some(*v4),
                    std::net::IpAddr::V6(_) => None,
                }) else {
                    continue;
                };

                let props = info.get_properties();
                let name = props
                    .get_property_val_str("name")
                    .unwrap_or(info.get_fullname())
                    .to_string();
                let version = props
                    .get_property_val_str("version")
                    .unwrap_or("unknown")
                    .to_string();

                debug!("Discovered server: {} at {}:{}", name, address, info.get_port());

                servers.push(DiscoveredServer {
                    name,
                    address,
                    port: info.get_port(),
                    version,
                });
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    if let Err(e) = daemon.shutdown() {
        warn!("mDNS daemon shutdown reported an error: {:?}", e);
    }

    Ok(servers)
}
