use thiserror::Error;

#[derive(Error, Debug)]
pub enum WifiAutoConnectError {
    #[error("No WiFi interface found")]
    NoWifiInterfaceFound,

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Failed to execute nmcli: {0}")]
    NmcliExecution(String),

    #[error("Failed to parse nmcli output: {0}")]
    NmcliParse(String),

    #[error("Failed to read credential file '{0}'")]
    CredentialFile(String),

    #[error("Failed to persist failure history: {0}")]
    HistoryWrite(String),
}
