//! Candidate credential loading.
//!
//! A credential file is plain text with one candidate per line. Lines are
//! trimmed and blank lines dropped; order and duplicates are kept because the
//! position in the file is what progress messages refer to.

use anyhow::{Context, Result};
use std::path::Path;

use crate::error::WifiAutoConnectError;

/// Splits credential file contents into candidates.
///
/// # Arguments
/// * `text` - Raw file contents, one candidate per line
///
/// # Returns
/// Trimmed, non-empty lines in file order, duplicates included.
pub fn parse_credentials(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Loads candidate credentials from a text file.
///
/// # Arguments
/// * `path` - Path to the credential file
///
/// # Returns
/// - `Ok(Vec<String>)` with the candidates in file order (possibly empty)
/// - `Err(WifiAutoConnectError::CredentialFile)` if the file cannot be read
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use wifi_autoconnect::credentials::load_credentials;
///
/// let candidates = load_credentials(Path::new("passwords.txt")).expect("Failed to read file");
/// println!("{} candidates", candidates.len());
/// ```
pub fn load_credentials(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| WifiAutoConnectError::CredentialFile(path.display().to_string()))?;

    Ok(parse_credentials(&text))
}
