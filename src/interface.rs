use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::error::WifiAutoConnectError;
use crate::nmcli;

/// A WiFi adapter known to NetworkManager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiInterface {
    /// The name of the network interface (e.g., "wlan0", "wlx00c0ca123456").
    pub name: String,

    /// Device state as reported by nmcli (e.g., "connected", "disconnected").
    pub state: String,

    /// Whether the adapter sits on the USB bus.
    pub is_usb: bool,
}

/// List all WiFi interfaces on the system
///
/// # Returns
/// - `Ok(Vec<WifiInterface>)` in the order nmcli reports them
/// - `Err(WifiAutoConnectError::NmcliExecution)` if nmcli fails
///
/// # Command Executed
/// ```bash
/// nmcli -t -f DEVICE,TYPE,STATE device
/// ```
pub async fn list_wifi_interfaces() -> Result<Vec<WifiInterface>> {
    let stdout = nmcli::run(&["-t", "-f", "DEVICE,TYPE,STATE", "device"]).await?;
    Ok(parse_device_list(&stdout, is_usb_interface))
}

/// Parse `nmcli -t -f DEVICE,TYPE,STATE device`, keeping wifi devices only.
fn parse_device_list(stdout: &str, is_usb: impl Fn(&str) -> bool) -> Vec<WifiInterface> {
    stdout
        .lines()
        .filter_map(|line| {
            let parts = nmcli::split_terse(line);
            if parts.len() < 3 || parts[1] != "wifi" {
                return None;
            }
            Some(WifiInterface {
                is_usb: is_usb(&parts[0]),
                name: parts[0].clone(),
                state: parts[2].clone(),
            })
        })
        .collect()
}

/// Check if a network interface is USB-based by examining sysfs
fn is_usb_interface(interface_name: &str) -> bool {
    let device_path = format!("/sys/class/net/{}/device", interface_name);
    let path = Path::new(&device_path);

    if !path.exists() {
        return false;
    }

    if let Ok(resolved) = fs::read_link(path) {
        if let Some(resolved_str) = resolved.to_str() {
            return resolved_str.contains("usb");
        }
    }

    let uevent_path = format!("{}/uevent", device_path);
    fs::read_to_string(&uevent_path)
        .map(|content| content.contains("usb"))
        .unwrap_or(false)
}

/// Resolve the interface to run trials on.
///
/// An explicit name must exist. Otherwise a USB adapter is preferred (a
/// secondary dongle keeps the built-in connection untouched), falling back to
/// the first wireless device.
///
/// # Arguments
/// * `interface` - Interface requested on the command line or in the config
///
/// # Returns
/// - `Ok(WifiInterface)` for the interface to use
/// - `Err(WifiAutoConnectError::InterfaceNotFound)` if the requested name does not exist
/// - `Err(WifiAutoConnectError::NoWifiInterfaceFound)` if there is no adapter at all
pub async fn resolve_interface(interface: Option<&str>) -> Result<WifiInterface> {
    let interfaces = list_wifi_interfaces().await?;
    pick_interface(interfaces, interface)
}

fn pick_interface(interfaces: Vec<WifiInterface>, requested: Option<&str>) -> Result<WifiInterface> {
    if let Some(name) = requested {
        return interfaces
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| WifiAutoConnectError::InterfaceNotFound(name.to_string()).into());
    }

    let usb = interfaces.iter().position(|i| i.is_usb);
    let mut interfaces = interfaces;
    match usb {
        Some(index) => Ok(interfaces.swap_remove(index)),
        None => interfaces
            .into_iter()
            .next()
            .ok_or_else(|| WifiAutoConnectError::NoWifiInterfaceFound.into()),
    }
}
