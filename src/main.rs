//! Loads the driver config, transfers every configured zone once, and maps
//! the worst outcome across zones to a process exit status (spec.md §4.2
//! "exit codes (driver level)").
//!
//! Usage:
//!
//!   XFRD_CONFIG=/etc/xfrd/xfrd.yaml xfrd

use std::process::exit;
use std::sync::Arc;

use tokio::sync::RwLock;

use xfrd::config::Config;
use xfrd::driver::{Driver, Outcome};
use xfrd::key::KeyStore;
use xfrd::radtree::RadixTree;

#[tokio::main]
async fn main() {
    let config_path = Config::config_file_path();
    let bytes = match std::fs::read(&config_path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("failed to read config file at {}: {}", config_path, e);
            exit(2);
        }
    };
    let config = match Config::try_from(&bytes[..]) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to parse config file at {}: {}", config_path, e);
            exit(2);
        }
    };

    xfrd::logger::Logger::new()
        .with_level(config.log.level)
        .with_stderr(true)
        .init()
        .expect("failed to initialize logger");

    let keys = match KeyStore::load_dir(config.tsig_path()) {
        Ok(keys) => keys,
        Err(e) => {
            log::error!(target: "main", "failed to load TSIG keys from {:?}: {}", config.tsig_path(), e);
            exit(2);
        }
    };

    let tree = match RadixTree::create() {
        Ok(tree) => Arc::new(RwLock::new(tree)),
        Err(e) => {
            log::error!(target: "main", "failed to create zone index: {}", e);
            exit(2);
        }
    };

    let driver = Driver::new(config, keys);
    let outcome = driver.run_all(&tree).await;

    match outcome {
        Outcome::UpToDate => exit(0),
        Outcome::Success => exit(0),
        Outcome::Fail => exit(1),
    }
}
