use std::process;

use clap::{Arg, Command};
use log::{debug, error, info};
use tokio::signal;

use nfr_fw::{Config, Forwarder};

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = Command::new("nfrd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("NFR Daemon - Named-data Forwarder")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/nfr/nfrd.conf"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").cloned().unwrap_or_default();

    info!("Starting NFR Daemon");
    info!("Config file: {}", config_path);

    let config = if std::path::Path::new(&config_path).exists() {
        match Config::from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                process::exit(1);
            }
        }
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    if let Ok(dump) = serde_json::to_string(&config) {
        debug!("Effective configuration: {}", dump);
    }

    let mut forwarder = match Forwarder::new(config) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };
    forwarder.start();

    info!("NFR Daemon started successfully");

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for ctrl+c: {}", e);
    }

    info!("Shutting down NFR Daemon");
    forwarder.stop().await;
}
