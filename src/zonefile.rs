//! Text zone-file output (spec.md §6): a comment header naming the tool
//! version, zone, previous serial, source server, timestamp and TSIG
//! status, followed by one line per RR, `$ORIGIN`-grouped.

use std::io::Write;

use crate::error::Result;
use crate::name::OwnerName;
use crate::rrset::OwnedRr;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct ZoneFileHeader<'a> {
    pub zone: &'a OwnerName,
    pub previous_serial: Option<u32>,
    pub source_server: std::net::SocketAddr,
    pub timestamp_unix: u64,
    pub tsig_verified: Option<bool>,
}

fn rtype_name(rtype: u16) -> String {
    match rtype {
        1 => "A".into(),
        2 => "NS".into(),
        5 => "CNAME".into(),
        6 => "SOA".into(),
        15 => "MX".into(),
        16 => "TXT".into(),
        28 => "AAAA".into(),
        252 => "AXFR".into(),
        other => format!("TYPE{other}"),
    }
}

/// Writes the comment header plus one `$ORIGIN owner ttl class type rdata`
/// record per RR, grouping consecutive records under the same `$ORIGIN`
/// when the owner repeats.
pub fn write_zone_file<W: Write>(out: &mut W, header: &ZoneFileHeader, records: &[(OwnerName, OwnedRr)]) -> Result<()> {
    writeln!(out, "; xfrd {}", TOOL_VERSION)?;
    writeln!(out, "; zone: {}", header.zone)?;
    match header.previous_serial {
        Some(serial) => writeln!(out, "; previous serial: {serial}")?,
        None => writeln!(out, "; previous serial: first transfer")?,
    }
    writeln!(out, "; source: {}", header.source_server)?;
    writeln!(out, "; transferred at: {}", header.timestamp_unix)?;
    match header.tsig_verified {
        Some(true) => writeln!(out, "; tsig: verified")?,
        Some(false) => writeln!(out, "; tsig: failed")?,
        None => writeln!(out, "; tsig: not used")?,
    }
    writeln!(out)?;

    let mut current_origin: Option<OwnerName> = None;
    for (owner, rr) in records {
        if current_origin.as_ref() != Some(owner) {
            writeln!(out, "$ORIGIN {owner}")?;
            current_origin = Some(owner.clone());
        }
        writeln!(
            out,
            "{owner} {} {} {} {}",
            rr.ttl,
            class_name(rr.rclass),
            rtype_name(rr.rtype),
            hex(&rr.rdata),
        )?;
    }
    Ok(())
}

fn class_name(rclass: u16) -> &'static str {
    match rclass {
        1 => "IN",
        255 => "ANY",
        _ => "CLASS?",
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
