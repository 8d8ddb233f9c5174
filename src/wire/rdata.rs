//! SOA RDATA (RFC 1035 §3.3.13) — the only RDATA type the core inspects.

use crate::error::{Error, ErrorKind, Result};
use crate::name::OwnerName;

/// The seven SOA fields. Only `serial` (rdata slot 2) is read by §4.2; the
/// rest are carried through opaquely for the zone-file writer.
#[derive(Debug, Clone)]
pub struct Soa {
    pub mname: OwnerName,
    pub rname: OwnerName,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Soa {
    /// Parse SOA rdata. `msg`/`rdata_offset` are needed because owner names
    /// inside rdata may use message-relative compression pointers.
    pub fn parse(msg: &[u8], rdata_offset: usize) -> Result<Soa> {
        let (mname, pos) = OwnerName::from_message(msg, rdata_offset)?;
        let (rname, pos) = OwnerName::from_message(msg, pos)?;
        let tail = msg
            .get(pos..pos + 20)
            .ok_or_else(|| Error::new(ErrorKind::Protocol, "truncated SOA rdata"))?;

        let word = |i: usize| u32::from_be_bytes([tail[i], tail[i + 1], tail[i + 2], tail[i + 3]]);

        Ok(Soa {
            mname,
            rname,
            serial: word(0),
            refresh: word(4),
            retry: word(8),
            expire: word(12),
            minimum: word(16),
        })
    }

    /// Extract just the serial (spec.md §4.2 `check_serial`), without
    /// allocating the other fields.
    pub fn serial_only(msg: &[u8], rdata_offset: usize) -> Result<u32> {
        let (_, pos) = OwnerName::from_message(msg, rdata_offset)?;
        let (_, pos) = OwnerName::from_message(msg, pos)?;
        let bytes = msg
            .get(pos..pos + 4)
            .ok_or_else(|| Error::new(ErrorKind::Protocol, "truncated SOA rdata"))?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
