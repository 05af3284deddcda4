//! mDNS/DNS-SD player discovery.
//!
//! Browses for `_sonos._tcp.local.` services for a bounded window and
//! yields candidates carrying the household id and `/info` URL from the
//! TXT records. Only a single reachable player per household is needed;
//! the supervisor fetches the full topology from it over REST.

use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::time::timeout;

use crate::error::{BridgeError, BridgeResult};

/// mDNS service type for players (the trailing dot is required by mdns-sd).
const SERVICE_TYPE: &str = "_sonos._tcp.local.";

/// A player seen on the LAN, before any HTTP contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlayer {
    pub ip: String,
    pub port: u16,
    /// `hhid` TXT record.
    pub household_id: String,
    /// Full `/info` URL composed from the `info` TXT record.
    pub info_url: String,
}

/// Creates the shared mDNS daemon.
///
/// The daemon spawns a background thread; create it once and reuse it
/// across scans.
pub fn create_daemon() -> BridgeResult<ServiceDaemon> {
    ServiceDaemon::new().map_err(|e| BridgeError::InternalFailure(format!("mDNS daemon: {}", e)))
}

/// Scans for players for the given window and returns every candidate that
/// carried the required TXT records.
pub async fn scan_for_players(
    daemon: &ServiceDaemon,
    window: Duration,
) -> BridgeResult<Vec<DiscoveredPlayer>> {
    log::debug!("[mDNS] start scan, window {}s", window.as_secs());

    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| BridgeError::InternalFailure(format!("mDNS browse: {}", e)))?;

    let mut players: Vec<DiscoveredPlayer> = Vec::new();
    let start = Instant::now();

    while start.elapsed() < window {
        let remaining = window.saturating_sub(start.elapsed());

        match timeout(remaining, receiver.recv_async()).await {
            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                if let Some(player) = parse_service(&info) {
                    log::debug!(
                        "[mDNS] resolved: ip={}, port={}, hhid={}",
                        player.ip,
                        player.port,
                        player.household_id
                    );
                    if !players.contains(&player) {
                        players.push(player);
                    }
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                log::debug!("[mDNS] receiver closed: {}", e);
                break;
            }
            // Window elapsed; normal termination.
            Err(_) => break,
        }
    }

    if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
        log::warn!("[mDNS] failed to stop browse: {}", e);
    }

    log::debug!("[mDNS] done scan, {} candidate(s)", players.len());
    Ok(players)
}

/// Extracts a candidate from a resolved service.
///
/// Requires the `hhid` and `info` TXT keys and at least one resolved
/// address; anything else is not a player we can use.
fn parse_service(info: &ServiceInfo) -> Option<DiscoveredPlayer> {
    let ip = info.get_addresses().iter().next()?.to_string();
    let port = info.get_port();

    let household_id = info.get_property_val_str("hhid")?.to_string();
    let info_path = info.get_property_val_str("info")?;

    Some(DiscoveredPlayer {
        info_url: format!("https://{}:{}{}", ip, port, info_path),
        ip,
        port,
        household_id,
    })
}
