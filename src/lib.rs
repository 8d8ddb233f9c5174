//! AXFR client, TSIG engine and persistent radix-trie zone index.

pub mod axfr;
pub mod config;
pub mod driver;
pub mod error;
pub mod key;
pub mod logger;
pub mod name;
pub mod radtree;
pub mod rrset;
pub mod tsig;
pub mod wire;
pub mod zonefile;
