//! WiFi network scanning module.
//!
//! Supplies the target network for a trial. Networks are discovered through
//! NetworkManager and ranked by signal strength so the most reachable access
//! points are listed first.
//!
//! # Scanning Process
//!
//! 1. Triggers a rescan on the interface using `nmcli device wifi rescan`
//! 2. Waits briefly for the scan to complete
//! 3. Retrieves the list of discovered networks using `nmcli device wifi list`
//! 4. Drops hidden and duplicate SSIDs
//! 5. Sorts networks by signal strength (strongest first)

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

use crate::nmcli;

/// How long to give the adapter between triggering a rescan and listing results.
const RESCAN_SETTLE: Duration = Duration::from_millis(500);

/// Represents a discovered WiFi network from a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// The SSID (network name). Used verbatim as the failure history key.
    pub ssid: String,

    /// Signal strength as a percentage (0-100).
    pub signal: u8,

    /// Security type of the network (e.g., "WPA2", "WPA1 WPA2", "").
    /// Empty string indicates an open network with no encryption.
    pub security: String,
}

/// Scans for WiFi networks visible to the specified interface.
///
/// The rescan may fail if the interface is busy or already scanning; cached
/// results from the last successful scan are returned in that case.
///
/// # Arguments
/// * `interface` - The WiFi interface to scan with
///
/// # Returns
/// Networks ranked by signal strength, strongest first.
///
/// # Command Executed
/// ```bash
/// nmcli device wifi rescan ifname <interface>
/// nmcli -t -f SSID,SIGNAL,SECURITY device wifi list ifname <interface>
/// ```
pub async fn scan_networks(interface: &str) -> Result<Vec<Network>> {
    if let Err(e) = nmcli::run(&["device", "wifi", "rescan", "ifname", interface]).await {
        debug!(interface, error = %e, "rescan request rejected, using cached results");
    }

    tokio::time::sleep(RESCAN_SETTLE).await;

    let stdout = nmcli::run(&[
        "-t",
        "-f",
        "SSID,SIGNAL,SECURITY",
        "device",
        "wifi",
        "list",
        "ifname",
        interface,
    ])
    .await?;

    Ok(parse_scan_output(&stdout))
}

/// Parse terse `SSID:SIGNAL:SECURITY` lines into a ranked, de-duplicated list.
pub fn parse_scan_output(stdout: &str) -> Vec<Network> {
    let mut networks = Vec::new();
    let mut seen_ssids = HashSet::new();

    for line in stdout.lines() {
        let parts = nmcli::split_terse(line);
        if parts.len() < 3 {
            continue;
        }

        let ssid = parts[0].clone();
        if ssid.is_empty() || !seen_ssids.insert(ssid.clone()) {
            continue;
        }

        networks.push(Network {
            ssid,
            signal: parts[1].parse().unwrap_or(0),
            security: parts[2..].join(":"),
        });
    }

    // Stable sort: equal signals keep nmcli's ordering.
    networks.sort_by(|a, b| b.signal.cmp(&a.signal));
    networks
}

/// Displays scanned networks with the number of credentials already known to
/// fail for each one.
///
/// # Output Format
/// ```text
/// SSID                             SIGNAL      SECURITY
/// ----------------------------------------------------------------------
/// MyHomeNetwork                      95% ████ WPA2      3 already tried
/// OpenCafe                           45% ██░░
/// ```
pub fn display_networks(networks: &[Network], tried: &HashMap<String, usize>) {
    if networks.is_empty() {
        println!("No networks found.");
        return;
    }

    println!("{:<32} {:>6}      {}", "SSID", "SIGNAL", "SECURITY");
    println!("{}", "-".repeat(70));

    for network in networks {
        let history = match tried.get(&network.ssid) {
            Some(&count) if count > 0 => format!("  {} already tried", count),
            _ => String::new(),
        };

        println!(
            "{:<32} {:>3}% {} {:<9}{}",
            truncate_ssid(&network.ssid, 32),
            network.signal,
            signal_to_bar(network.signal),
            network.security,
            history
        );
    }
}

/// Truncates an SSID to at most `max_len` characters, appending "...".
fn truncate_ssid(ssid: &str, max_len: usize) -> String {
    if ssid.chars().count() > max_len {
        let kept: String = ssid.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    } else {
        ssid.to_string()
    }
}

/// Converts a numeric signal strength to a 4-segment bar.
fn signal_to_bar(signal: u8) -> &'static str {
    match signal {
        80..=100 => "████",
        60..=79 => "███░",
        40..=59 => "██░░",
        20..=39 => "█░░░",
        _ => "░░░░",
    }
}
