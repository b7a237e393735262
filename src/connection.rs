//! NetworkManager backend for connection attempts.
//!
//! [`NmcliBackend`] drives one wireless interface through `nmcli` and
//! provides both platform capabilities the strategies need:
//!
//! - [`NetworkRequester`]: `nmcli --wait <secs> device wifi connect ...`
//!   blocks until NetworkManager reports the activation result, which is
//!   turned into an available/unavailable signal.
//! - [`ConnectionPoller`]: a detached connect request plus a later
//!   `nmcli -t device show` and `nmcli -t connection show` to see which
//!   SSID the interface is connected to.
//!
//! Abandoning a request in either mode kills the `nmcli` client and then
//! disconnects the interface, since NetworkManager keeps activating a
//! connection after the client that asked for it has gone away.
//!
//! # Requirements
//!
//! - NetworkManager must be installed and running
//! - The `nmcli` command must be available in PATH
//! - User must have permission to manage network connections

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::WifiAutoConnectError;
use crate::nmcli::{self, NMCLI};
use crate::strategy::{ConnectionPoller, NetworkRequester, NetworkSignal};

/// Oldest NetworkManager release whose `--wait` we rely on for blocking activation.
const CALLBACK_MIN_VERSION: (u32, u32) = (1, 2);

/// Seconds `nmcli` may wait for a teardown disconnect to finish.
const DISCONNECT_WAIT_SECS: &str = "1";

/// Connection status of a WiFi interface as reported by NetworkManager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// The name of the network interface (e.g., "wlan1").
    pub interface: String,

    /// Raw state string from nmcli (e.g., "100 (connected)").
    pub state: String,

    /// Active connection profile name. Profiles created by
    /// `nmcli device wifi connect` are named after the SSID.
    pub connection: Option<String>,

    /// IPv4 address with CIDR notation, e.g. "192.168.4.2/24".
    pub ip_address: Option<String>,

    pub gateway: Option<String>,
}

impl ConnectionStatus {
    /// NetworkManager device state 100 is "activated".
    pub fn is_connected(&self) -> bool {
        self.state.split_whitespace().next() == Some("100")
    }
}

/// Parse `nmcli -t device show <iface>` output.
pub fn parse_device_show(interface: &str, stdout: &str) -> ConnectionStatus {
    let mut status = ConnectionStatus {
        interface: interface.to_string(),
        state: "unknown".to_string(),
        connection: None,
        ip_address: None,
        gateway: None,
    };

    for line in stdout.lines() {
        // Values may contain colons; keys never do.
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let present = !value.is_empty() && value != "--";

        match key {
            "GENERAL.STATE" => status.state = value.to_string(),
            "GENERAL.CONNECTION" if present => status.connection = Some(value.to_string()),
            "IP4.ADDRESS[1]" if present => status.ip_address = Some(value.to_string()),
            "IP4.GATEWAY" if present => status.gateway = Some(value.to_string()),
            _ => {}
        }
    }

    status
}

/// Parse the SSID out of `nmcli -t -f 802-11-wireless.ssid connection show id <profile>`.
///
/// The profile name seen in `GENERAL.CONNECTION` is whatever the user or
/// NetworkManager called it ("HomeNet 1", "Office"); only this field holds
/// the network name itself.
pub fn parse_profile_ssid(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (key == "802-11-wireless.ssid" && !value.is_empty() && value != "--").then(|| value.to_string())
    })
}

/// Parse the `major.minor` pair out of `nmcli --version`.
pub fn parse_version(stdout: &str) -> Result<(u32, u32)> {
    let invalid = || WifiAutoConnectError::NmcliParse(format!("unrecognised version output: {}", stdout.trim()));

    let version = stdout.split_whitespace().last().ok_or_else(invalid)?;
    let mut parts = version.split('.').map(|part| {
        part.chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse::<u32>()
    });

    match (parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor))) => Ok((major, minor)),
        _ => Err(invalid().into()),
    }
}

/// Whether the installed NetworkManager supports blocking activation requests.
pub async fn supports_callbacks() -> bool {
    let version = match nmcli::run(&["--version"]).await.and_then(|out| parse_version(&out)) {
        Ok(version) => version,
        Err(e) => {
            warn!(error = %e, "could not determine NetworkManager version, falling back to polling");
            return false;
        }
    };

    debug!(major = version.0, minor = version.1, "detected NetworkManager");
    version >= CALLBACK_MIN_VERSION
}

/// Whole seconds for `nmcli --wait`, rounded up and never zero (zero means "don't wait").
fn wait_seconds(deadline: Duration) -> u64 {
    deadline.as_millis().div_ceil(1000).max(1) as u64
}

fn connect_command(interface: &str, network: &str, credential: &str, wait: Option<u64>) -> Command {
    let mut command = Command::new(NMCLI);
    // Global options must precede the object.
    if let Some(secs) = wait {
        command.arg("--wait").arg(secs.to_string());
    }
    command.args([
        "device",
        "wifi",
        "connect",
        network,
        "password",
        credential,
        "ifname",
        interface,
    ]);
    command
}

/// Disconnect `interface`, waiting at most [`DISCONNECT_WAIT_SECS`].
///
/// # Command Executed
///
/// ```bash
/// nmcli --wait 1 device disconnect <interface>
/// ```
async fn disconnect_briefly(interface: &str) -> Result<()> {
    nmcli::run(&["--wait", DISCONNECT_WAIT_SECS, "device", "disconnect", interface]).await?;
    Ok(())
}

/// Fire-and-forget [`disconnect_briefly`] on the current runtime.
fn spawn_teardown(interface: String) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        if let Err(e) = disconnect_briefly(&interface).await {
            debug!(interface = %interface, error = %e, "teardown disconnect failed");
        }
    });
}

/// `nmcli` driven implementation of both connection capabilities for one
/// wireless interface.
pub struct NmcliBackend {
    interface: String,
    // Detached connect request issued by the poll capability.
    detached: Mutex<Option<Child>>,
}

impl NmcliBackend {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            detached: Mutex::new(None),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Get the current state of the interface.
    ///
    /// # Command Executed
    ///
    /// ```bash
    /// nmcli -t device show <interface>
    /// ```
    pub async fn status(&self) -> Result<ConnectionStatus> {
        let stdout = nmcli::run(&["-t", "device", "show", &self.interface]).await?;
        Ok(parse_device_show(&self.interface, &stdout))
    }

    /// SSID stored in the connection profile named `profile`.
    ///
    /// # Command Executed
    ///
    /// ```bash
    /// nmcli -t -f 802-11-wireless.ssid connection show id <profile>
    /// ```
    async fn profile_ssid(&self, profile: &str) -> Result<Option<String>> {
        let stdout = nmcli::run(&["-t", "-f", "802-11-wireless.ssid", "connection", "show", "id", profile]).await?;
        Ok(parse_profile_ssid(&stdout))
    }

    /// Kill a detached connect request that is still running.
    ///
    /// Returns whether there was one.
    fn abort_pending(&self) -> bool {
        match self.detached.lock().take() {
            Some(mut child) => {
                let _ = child.start_kill();
                true
            }
            None => false,
        }
    }
}

impl NetworkRequester for NmcliBackend {
    fn request_network(
        &self,
        network: &str,
        credential: &str,
        deadline: Duration,
        signals: mpsc::Sender<NetworkSignal>,
    ) {
        let mut command = connect_command(&self.interface, network, credential, Some(wait_seconds(deadline)));
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let network = network.to_string();
        let interface = self.interface.clone();

        tokio::spawn(async move {
            let child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    let _ = signals
                        .send(NetworkSignal::Unavailable(format!("failed to execute nmcli: {}", e)))
                        .await;
                    return;
                }
            };

            let signal = tokio::select! {
                output = child.wait_with_output() => match output {
                    Ok(output) if output.status.success() => NetworkSignal::Available,
                    Ok(output) => NetworkSignal::Unavailable(nmcli::error_message(&output.stdout, &output.stderr)),
                    Err(e) => NetworkSignal::Unavailable(e.to_string()),
                },
                // Dropping the wait future drops the child, which kills it.
                _ = signals.closed() => {
                    debug!(network = %network, "activation request abandoned, stopping nmcli");
                    if let Err(e) = disconnect_briefly(&interface).await {
                        debug!(interface = %interface, error = %e, "teardown disconnect failed");
                    }
                    return;
                }
            };

            let _ = signals.send(signal).await;
        });
    }
}

#[async_trait]
impl ConnectionPoller for NmcliBackend {
    async fn begin_connect(&self, network: &str, credential: &str) -> Result<()> {
        self.abort_pending();

        if let Err(e) = disconnect_briefly(&self.interface).await {
            debug!(interface = %self.interface, error = %e, "disconnect before connect failed");
        }

        let child = connect_command(&self.interface, network, credential, None)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to execute nmcli connect")?;
        *self.detached.lock() = Some(child);

        Ok(())
    }

    async fn active_network(&self) -> Result<Option<String>> {
        let status = self.status().await?;
        if !status.is_connected() {
            return Ok(None);
        }
        match status.connection {
            Some(profile) => self.profile_ssid(&profile).await,
            None => Ok(None),
        }
    }

    fn abandon(&self) {
        if self.abort_pending() {
            debug!(interface = %self.interface, "connect request abandoned, disconnecting");
            spawn_teardown(self.interface.clone());
        }
    }
}

/// Print connection details after a successful trial.
///
/// ```text
/// Interface: wlan1
/// State:     100 (connected)
/// Connected: HomeNet
/// IP:        192.168.4.2/24
/// Gateway:   192.168.4.1
/// ```
pub fn display_status(status: &ConnectionStatus) {
    println!("Interface: {}", status.interface);
    println!("State:     {}", status.state);
    println!("Connected: {}", status.connection.as_deref().unwrap_or("(none)"));

    if let Some(ref ip) = status.ip_address {
        println!("IP:        {}", ip);
    }
    if let Some(ref gw) = status.gateway {
        println!("Gateway:   {}", gw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_SHOW: &str = "GENERAL.DEVICE:wlan1\n\
                               GENERAL.TYPE:wifi\n\
                               GENERAL.STATE:100 (connected)\n\
                               GENERAL.CONNECTION:HomeNet\n\
                               IP4.ADDRESS[1]:192.168.4.2/24\n\
                               IP4.GATEWAY:192.168.4.1\n\
                               IP6.ADDRESS[1]:fe80::1/64\n";

    #[test]
    fn parses_connected_device() {
        let status = parse_device_show("wlan1", DEVICE_SHOW);
        assert!(status.is_connected());
        assert_eq!(status.connection.as_deref(), Some("HomeNet"));
        assert_eq!(status.ip_address.as_deref(), Some("192.168.4.2/24"));
        assert_eq!(status.gateway.as_deref(), Some("192.168.4.1"));
    }

    #[test]
    fn parses_disconnected_device() {
        let status = parse_device_show(
            "wlan1",
            "GENERAL.STATE:30 (disconnected)\nGENERAL.CONNECTION:--\nIP4.GATEWAY:\n",
        );
        assert!(!status.is_connected());
        assert_eq!(status.connection, None);
        assert_eq!(status.gateway, None);
    }

    #[test]
    fn activating_state_is_not_connected() {
        let status = parse_device_show("wlan1", "GENERAL.STATE:70 (connecting (getting IP configuration))\nGENERAL.CONNECTION:HomeNet\n");
        assert!(!status.is_connected());
    }

    #[test]
    fn profile_ssid_is_read_from_the_wireless_setting() {
        // The profile was renamed; the SSID is what the poll must compare.
        let status = parse_device_show(
            "wlan1",
            "GENERAL.STATE:100 (connected)\nGENERAL.CONNECTION:HomeNet 1\n",
        );
        assert_eq!(status.connection.as_deref(), Some("HomeNet 1"));
        assert_eq!(
            parse_profile_ssid("802-11-wireless.ssid:HomeNet\n").as_deref(),
            Some("HomeNet")
        );
    }

    #[test]
    fn profile_ssid_keeps_colons_and_rejects_blanks() {
        assert_eq!(parse_profile_ssid("802-11-wireless.ssid:Cafe:Guest\n").as_deref(), Some("Cafe:Guest"));
        assert_eq!(parse_profile_ssid("802-11-wireless.ssid:--\n"), None);
        assert_eq!(parse_profile_ssid(""), None);
    }

    #[tokio::test]
    async fn abandon_without_pending_request_does_nothing() {
        let backend = NmcliBackend::new("wlan-test0");
        assert!(!backend.abort_pending());
        backend.abandon();
    }

    #[test]
    fn parses_versions() {
        assert_eq!(parse_version("nmcli tool, version 1.42.4\n").unwrap(), (1, 42));
        assert_eq!(parse_version("nmcli tool, version 1.46.0-2.fc40").unwrap(), (1, 46));
        assert!(parse_version("").is_err());
        assert!(parse_version("nmcli tool, version unknown").is_err());
    }

    #[test]
    fn wait_rounds_up_to_whole_seconds() {
        assert_eq!(wait_seconds(Duration::from_millis(3000)), 3);
        assert_eq!(wait_seconds(Duration::from_millis(2500)), 3);
        assert_eq!(wait_seconds(Duration::from_millis(10)), 1);
        assert_eq!(wait_seconds(Duration::ZERO), 1);
    }
}
