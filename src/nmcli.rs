//! Thin async wrapper around the `nmcli` binary.
//!
//! One-shot NetworkManager queries go through [`run`], which executes
//! `nmcli` with the given arguments and returns its stdout, or a
//! [`WifiAutoConnectError::NmcliExecution`] carrying stderr (falling back to
//! stdout when stderr is empty, as `nmcli` sometimes reports errors there).

use anyhow::{Context, Result};
use tokio::process::Command;

use crate::error::WifiAutoConnectError;

pub const NMCLI: &str = "nmcli";

pub async fn run(args: &[&str]) -> Result<String> {
    let output = Command::new(NMCLI)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to execute nmcli {}", args.first().unwrap_or(&"")))?;

    if !output.status.success() {
        return Err(WifiAutoConnectError::NmcliExecution(error_message(
            &output.stdout,
            &output.stderr,
        ))
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pick the most useful error text from an nmcli invocation.
pub fn error_message(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    if stderr.trim().is_empty() {
        String::from_utf8_lossy(stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    }
}

/// Split one line of `nmcli -t` output on unescaped colons.
///
/// Terse mode escapes literal colons in values as `\:` and backslashes as
/// `\\`; both are unescaped in the returned fields.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
}
