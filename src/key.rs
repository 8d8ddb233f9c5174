//! TSIG key model and the key-file format spec.md §6 describes: a
//! newline-delimited text file carrying the master's address, the key
//! name, an algorithm tag, and a base64 secret, removed once read.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use base64::Engine;

use crate::error::{Error, ErrorKind, Result};
use crate::name::OwnerName;
use crate::tsig::Algorithm;

#[derive(Debug, Clone)]
pub struct TsigKey {
    pub name: OwnerName,
    pub algorithm: Algorithm,
    pub secret: Vec<u8>,
    pub server_address: SocketAddr,
}

/// Process-global, immutable after startup (spec.md §5 "TSIG key table is
/// process-global and immutable after startup").
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashMap<String, TsigKey>,
}

impl KeyStore {
    pub fn new() -> KeyStore {
        KeyStore { keys: HashMap::new() }
    }

    pub fn insert(&mut self, key: TsigKey) {
        self.keys.insert(key.name.to_string(), key);
    }

    pub fn get(&self, name: &str) -> Option<&TsigKey> {
        let name = OwnerName::from_text(name).ok()?;
        self.keys.get(&name.to_string())
    }

    /// Load every `*.key` file under `dir`, consuming each (spec.md §6: "the
    /// file is removed after successful read").
    pub fn load_dir(dir: &Path) -> Result<KeyStore> {
        let mut store = KeyStore::new();
        if !dir.is_dir() {
            return Ok(store);
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("key") {
                continue;
            }
            let key = load_key_file(&entry.path())?;
            store.insert(key);
        }
        Ok(store)
    }
}

/// Parse and consume one key file: four newline-delimited fields — server
/// address, key name, algorithm tag, base64 secret.
pub fn load_key_file(path: &Path) -> Result<TsigKey> {
    if !path.is_file() {
        return Err(Error::new(ErrorKind::Config, format!("TSIG key file {path:?} not found")));
    }

    let text = std::fs::read_to_string(path)?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let address = lines
        .next()
        .ok_or_else(|| malformed(path))?
        .trim()
        .parse::<SocketAddr>()
        .map_err(|e| Error::new(ErrorKind::Config, format!("{path:?}: bad address: {e}")))?;
    let name = OwnerName::from_text(lines.next().ok_or_else(|| malformed(path))?.trim())?;
    let algorithm = Algorithm::from_tag(lines.next().ok_or_else(|| malformed(path))?.trim())?;
    let secret = base64::engine::general_purpose::STANDARD
        .decode(lines.next().ok_or_else(|| malformed(path))?.trim())?;

    let key = TsigKey {
        name,
        algorithm,
        secret,
        server_address: address,
    };

    std::fs::remove_file(path)?;

    Ok(key)
}

fn malformed(path: &Path) -> Error {
    Error::new(ErrorKind::Config, format!("{path:?}: expected 4 lines (address, key name, algorithm, secret)"))
}

/// Generate a fresh key and write it out in the same four-line format, for
/// provisioning a new master/key pair. Refuses to overwrite an existing file.
pub fn generate_key_file(path: &Path, address: SocketAddr, name: &str, algorithm: Algorithm) -> Result<TsigKey> {
    if path.is_file() {
        return Err(Error::new(ErrorKind::Config, format!("TSIG key file {path:?} already exists")));
    }

    let rng = ring::rand::SystemRandom::new();
    use ring::rand::SecureRandom;
    let mut secret = vec![0u8; 32];
    rng.fill(&mut secret)
        .map_err(|_| Error::new(ErrorKind::Config, "failed to generate random TSIG secret"))?;

    let owner = OwnerName::from_text(name)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&secret);
    let contents = format!("{address}\n{owner}\n{}\n{encoded}\n", algorithm.tag());
    std::fs::write(path, contents)?;

    Ok(TsigKey {
        name: owner,
        algorithm,
        secret,
        server_address: address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_generated_key_file() {
        let dir = std::env::temp_dir().join(format!("xfrd-test-key-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("master.key");

        let addr: SocketAddr = "192.0.2.1:53".parse().unwrap();
        generate_key_file(&path, addr, "transfer-key.", Algorithm::Sha256).unwrap();
        assert!(path.is_file());

        let loaded = load_key_file(&path).unwrap();
        assert_eq!(loaded.name.to_string(), "transfer-key.");
        assert_eq!(loaded.algorithm, Algorithm::Sha256);
        assert_eq!(loaded.server_address, addr);
        assert!(!path.is_file(), "key file must be removed after a successful read");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("xfrd-test-key-missing.key");
        std::fs::remove_file(&path).ok();
        assert!(load_key_file(&path).is_err());
    }
}
