use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wifi_autoconnect::{
    config::{self, Config},
    connection, coordinator, credentials, interface, scan, strategy,
    ChannelSink, FailureHistory, FileHistoryStore, NmcliBackend, StrategyKind, TrialSettings,
    TrialState,
};

#[derive(Parser)]
#[command(name = "wifi-autoconnect")]
#[command(about = "Try a list of candidate passwords against a WiFi network")]
#[command(version)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available WiFi interfaces
    ListInterfaces,

    /// Scan for WiFi networks
    Scan {
        /// Interface to use (defaults to config, then auto-detection)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Try each password from a file against a network until one connects
    Trial {
        /// SSID of the network to try
        ssid: String,

        /// Text file with one candidate password per line
        #[arg(short, long)]
        file: PathBuf,

        /// Interface to use (defaults to config, then auto-detection)
        #[arg(short, long)]
        interface: Option<String>,

        /// Connection strategy (defaults to config, then auto)
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyKind>,

        /// Per-attempt timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Inspect or reset the record of failed passwords
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Show the active configuration
    ShowConfig,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List networks with recorded failures
    List,

    /// Show failed passwords recorded for a network
    Show {
        ssid: String,

        /// Print passwords instead of masking them
        #[arg(long)]
        reveal: bool,
    },

    /// Forget all failed passwords for a network
    Clear { ssid: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = Config::load()?;

    match cli.command {
        Commands::ListInterfaces => cmd_list_interfaces().await,
        Commands::Scan { interface } => cmd_scan(&cfg, interface.as_deref()).await,
        Commands::Trial {
            ssid,
            file,
            interface,
            strategy,
            timeout_ms,
        } => cmd_trial(&cfg, &ssid, &file, interface.as_deref(), strategy, timeout_ms).await,
        Commands::History { action } => cmd_history(&cfg, action),
        Commands::ShowConfig => cmd_show_config(&cfg),
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "wifi_autoconnect=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn history_store(cfg: &Config) -> Result<FileHistoryStore> {
    Ok(FileHistoryStore::new(cfg.history_path()?))
}

async fn cmd_list_interfaces() -> Result<()> {
    let interfaces = interface::list_wifi_interfaces().await?;

    if interfaces.is_empty() {
        println!("No WiFi interfaces found.");
        return Ok(());
    }

    println!("{:<16} {:<12} {}", "INTERFACE", "STATE", "TYPE");
    println!("{}", "-".repeat(40));

    for iface in interfaces {
        let iface_type = if iface.is_usb { "USB" } else { "Built-in" };
        println!("{:<16} {:<12} {}", iface.name, iface.state, iface_type);
    }

    Ok(())
}

async fn cmd_scan(cfg: &Config, interface: Option<&str>) -> Result<()> {
    let iface = interface::resolve_interface(interface.or(cfg.default_interface.as_deref())).await?;
    println!("Scanning on interface: {}", iface.name);
    println!();

    let networks = scan::scan_networks(&iface.name).await?;
    let tried: HashMap<String, usize> = history_store(cfg)?.summary().into_iter().collect();
    scan::display_networks(&networks, &tried);

    Ok(())
}

async fn cmd_trial(
    cfg: &Config,
    ssid: &str,
    file: &Path,
    interface: Option<&str>,
    strategy_kind: Option<StrategyKind>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let candidates = credentials::load_credentials(file)?;
    println!("Loaded {} passwords from {}", candidates.len(), file.display());

    let iface = interface::resolve_interface(interface.or(cfg.default_interface.as_deref())).await?;
    let backend = Arc::new(NmcliBackend::new(iface.name.clone()));

    let kind = strategy_kind.unwrap_or(cfg.strategy);
    let supports_callbacks = kind == StrategyKind::Auto && connection::supports_callbacks().await;
    let strategy = strategy::build_strategy(kind, supports_callbacks, Arc::clone(&backend));

    let settings = TrialSettings {
        attempt_timeout: timeout_ms.map(Duration::from_millis).unwrap_or_else(|| cfg.attempt_timeout()),
        settle_delay: cfg.settle_delay(),
    };

    println!(
        "Trying '{}' on interface {} ({} strategy, {} ms per attempt)",
        ssid,
        backend.interface(),
        strategy.name(),
        settings.attempt_timeout.as_millis()
    );

    let (sink, mut events) = ChannelSink::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", event);
        }
    });

    let handle = coordinator::spawn(strategy, Arc::new(history_store(cfg)?), Arc::new(sink), settings);

    let final_state = match handle.start_trial(ssid, candidates).await? {
        Some(epoch) => tokio::select! {
            state = handle.wait_finished(epoch) => state,
            _ = tokio::signal::ctrl_c() => {
                handle.stop();
                TrialState::Idle
            }
        },
        None => TrialState::Idle,
    };

    handle.shutdown().await;
    let _ = printer.await;

    match final_state {
        TrialState::Connected { .. } => {
            println!();
            let status = backend.status().await?;
            connection::display_status(&status);
            Ok(())
        }
        TrialState::Exhausted => bail!("Could not connect to '{}'", ssid),
        _ => bail!("Trial for '{}' did not complete", ssid),
    }
}

fn cmd_history(cfg: &Config, action: HistoryAction) -> Result<()> {
    let store = history_store(cfg)?;

    match action {
        HistoryAction::List => {
            let summary = store.summary();
            if summary.is_empty() {
                println!("No failed passwords recorded.");
                return Ok(());
            }

            println!("{:<32} {}", "SSID", "FAILED");
            println!("{}", "-".repeat(40));
            for (ssid, count) in summary {
                println!("{:<32} {}", ssid, count);
            }
        }
        HistoryAction::Show { ssid, reveal } => {
            let mut failed: Vec<String> = store.get(&ssid).into_iter().collect();
            failed.sort();

            println!("{} failed passwords recorded for '{}'", failed.len(), ssid);
            for password in failed {
                if reveal {
                    println!("  {}", password);
                } else {
                    println!("  {}", "*".repeat(password.chars().count().min(12)));
                }
            }
        }
        HistoryAction::Clear { ssid } => {
            store.clear(&ssid)?;
            println!("Cleared failure history for '{}' in {}", ssid, store.path().display());
        }
    }

    Ok(())
}

fn cmd_show_config(cfg: &Config) -> Result<()> {
    let path = config::config_path()?;
    println!("Config file:  {}", path.display());
    println!("History file: {}", cfg.history_path()?.display());
    println!();

    println!("default_interface  = {}", cfg.default_interface.as_deref().unwrap_or("(auto)"));
    println!("strategy           = {}", cfg.strategy);
    println!("attempt_timeout_ms = {}", cfg.attempt_timeout_ms);
    println!("settle_delay_ms    = {}", cfg.settle_delay_ms);

    Ok(())
}
