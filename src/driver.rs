//! Per-zone orchestration (SPEC_FULL.md §4.2's retry-across-masters loop):
//! try each configured master in order until one yields `SUCCESS` or
//! `UP_TO_DATE`; insert the transferred RRsets into the trie; write the
//! zone-file snapshot; surface one exit code and log line per attempt
//! (spec.md §7 propagation policy).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::axfr::{self, SerialStatus, DEFAULT_TIMEOUT};
use crate::config::{Config, ZoneConfig};
use crate::error::Result;
use crate::key::KeyStore;
use crate::name::OwnerName;
use crate::radtree::RadixTree;
use crate::rrset::{OwnedRr, RrSet};
use crate::wire::ResourceRecord;
use crate::zonefile::{write_zone_file, ZoneFileHeader};

/// Outcome of one zone's transfer attempt, mapped by the caller to a process
/// exit status (spec.md §4.2 "exit codes (driver level)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    UpToDate,
    Success,
    Fail,
}

/// Tracks the last serial transferred per zone, so a second `run_zone` call
/// (e.g. a future periodic re-check) can tell `check_serial` this isn't the
/// first transfer.
pub struct Driver {
    config: Config,
    keys: KeyStore,
    last_serial: RwLock<HashMap<String, u32>>,
}

impl Driver {
    pub fn new(config: Config, keys: KeyStore) -> Driver {
        Driver {
            config,
            keys,
            last_serial: RwLock::new(HashMap::new()),
        }
    }

    /// Runs every configured zone in turn, logging one outcome per zone.
    /// Returns the worst outcome seen, for the caller's process exit code.
    pub async fn run_all(&self, tree: &Arc<RwLock<RadixTree>>) -> Outcome {
        let mut worst = Outcome::UpToDate;
        for zone in &self.config.zones {
            let outcome = self.run_zone(zone, tree).await;
            if outcome == Outcome::Fail {
                worst = Outcome::Fail;
            } else if outcome == Outcome::Success && worst != Outcome::Fail {
                worst = Outcome::Success;
            }
        }
        worst
    }

    /// Tries each of `zone`'s masters in configured order until one succeeds
    /// or the list is exhausted.
    pub async fn run_zone(&self, zone: &ZoneConfig, tree: &Arc<RwLock<RadixTree>>) -> Outcome {
        let owner = match OwnerName::from_text(&zone.name) {
            Ok(name) => name,
            Err(e) => {
                log::error!(target: "driver", "zone {}: invalid name: {}", zone.name, e);
                return Outcome::Fail;
            }
        };

        if zone.masters.is_empty() {
            log::error!(target: "driver", "zone {}: no masters configured", zone.name);
            return Outcome::Fail;
        }

        for master in &zone.masters {
            let key = match &master.tsig_key {
                Some(name) => match self.keys.get(name) {
                    Some(key) => Some(key),
                    None => {
                        log::error!(target: "driver", "zone {}: unknown TSIG key {}", zone.name, name);
                        continue;
                    }
                },
                None => None,
            };

            match self.attempt(&zone.name, &owner, master.address, key, tree).await {
                Outcome::UpToDate => {
                    log::info!(target: "driver", "zone {} up to date via {}", zone.name, master.address);
                    return Outcome::UpToDate;
                }
                Outcome::Success => {
                    log::info!(target: "driver", "zone {} transferred from {}", zone.name, master.address);
                    return Outcome::Success;
                }
                Outcome::Fail => continue,
            }
        }

        log::error!(target: "driver", "zone {}: all masters failed", zone.name);
        Outcome::Fail
    }

    async fn attempt(
        &self,
        zone_name: &str,
        owner: &OwnerName,
        master: std::net::SocketAddr,
        key: Option<&crate::key::TsigKey>,
        tree: &Arc<RwLock<RadixTree>>,
    ) -> Outcome {
        let last_serial = self.last_serial.read().await.get(zone_name).copied();

        match axfr::check_serial(owner, master, last_serial, key, DEFAULT_TIMEOUT).await {
            Ok(SerialStatus::UpToDate) => return Outcome::UpToDate,
            Ok(SerialStatus::Newer(_)) => {}
            Err(e) => {
                log::warn!(target: "driver", "zone {}: SOA check against {} failed: {}", zone_name, master, e);
                return Outcome::Fail;
            }
        }

        let mut received: Vec<(OwnerName, OwnedRr)> = Vec::new();
        let serial = axfr::axfr(owner, master, key, DEFAULT_TIMEOUT, |rr: ResourceRecord| {
            received.push((rr.name.clone(), OwnedRr::from(&rr)));
            Ok(())
        })
        .await;

        let serial = match serial {
            Ok(serial) => serial,
            Err(e) => {
                log::warn!(target: "driver", "zone {}: AXFR from {} failed: {}", zone_name, master, e);
                return Outcome::Fail;
            }
        };

        if let Err(e) = self.install(owner, &received, tree).await {
            log::error!(target: "driver", "zone {}: failed to install transferred zone: {}", zone_name, e);
            return Outcome::Fail;
        }

        self.last_serial.write().await.insert(zone_name.to_string(), serial);

        if let Err(e) = self.emit_zone_file(zone_name, owner, master, key.is_some(), last_serial, &received) {
            log::error!(target: "driver", "zone {}: failed to write zone file: {}", zone_name, e);
        }

        Outcome::Success
    }

    /// Groups RRs by owner name (first-seen order preserved) and replaces
    /// each owner's RRset in the trie (single-writer section, SPEC_FULL.md
    /// §5).
    async fn install(&self, zone: &OwnerName, received: &[(OwnerName, OwnedRr)], tree: &Arc<RwLock<RadixTree>>) -> Result<()> {
        let mut by_owner: Vec<(OwnerName, RrSet)> = Vec::new();
        for (owner, rr) in received {
            match by_owner.iter_mut().find(|(o, _)| o == owner) {
                Some((_, set)) => set.records.push(rr.clone()),
                None => by_owner.push((owner.clone(), RrSet { records: vec![rr.clone()] })),
            }
        }

        let mut guard = tree.write().await;
        for (owner, set) in &by_owner {
            let key = owner.as_wire();
            if guard.search(key).is_some() {
                guard.delete(key)?;
            }
            guard.insert(key, set.encode())?;
        }
        drop(guard);

        log::debug!(target: "driver", "zone {}: installed {} owner names", zone, by_owner.len());
        Ok(())
    }

    fn emit_zone_file(
        &self,
        zone_name: &str,
        owner: &OwnerName,
        master: std::net::SocketAddr,
        used_tsig: bool,
        previous_serial: Option<u32>,
        received: &[(OwnerName, OwnedRr)],
    ) -> Result<()> {
        let path = self.config.zone_output_path(zone_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let header = ZoneFileHeader {
            zone: owner,
            previous_serial,
            source_server: master,
            timestamp_unix: now_unix(),
            tsig_verified: used_tsig.then_some(true),
        };

        let mut file = std::fs::File::create(&path)?;
        write_zone_file(&mut file, &header, received)?;
        Ok(())
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
