//! The owned payload the AXFR consumer inserts into the radix trie: every
//! RR seen for one owner name, encoded to/from the trie's opaque `elem`
//! bytes (SPEC_FULL.md §4.3 — "an owned RRset... the only user payload the
//! AXFR consumer ever inserts"). The owner name itself is the trie key, so
//! it is not repeated inside the encoded element.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorKind, Result};
use crate::wire::ResourceRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRr {
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Bytes,
}

impl From<&ResourceRecord> for OwnedRr {
    fn from(rr: &ResourceRecord) -> Self {
        OwnedRr { rtype: rr.rtype, rclass: rr.rclass, ttl: rr.ttl, rdata: rr.rdata.clone() }
    }
}

/// Every RR on file for one owner name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RrSet {
    pub records: Vec<OwnedRr>,
}

impl RrSet {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.records.len() as u16);
        for rr in &self.records {
            buf.put_u16(rr.rtype);
            buf.put_u16(rr.rclass);
            buf.put_u32(rr.ttl);
            buf.put_u16(rr.rdata.len() as u16);
            buf.extend_from_slice(&rr.rdata);
        }
        buf.to_vec()
    }

    pub fn decode(mut bytes: &[u8]) -> Result<RrSet> {
        if bytes.len() < 2 {
            return Err(Error::new(ErrorKind::Trie, "truncated rrset element"));
        }
        let count = bytes.get_u16();
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if bytes.len() < 10 {
                return Err(Error::new(ErrorKind::Trie, "truncated rrset element"));
            }
            let rtype = bytes.get_u16();
            let rclass = bytes.get_u16();
            let ttl = bytes.get_u32();
            let rdlen = bytes.get_u16() as usize;
            if bytes.len() < rdlen {
                return Err(Error::new(ErrorKind::Trie, "truncated rrset element"));
            }
            let rdata = Bytes::copy_from_slice(&bytes[..rdlen]);
            bytes.advance(rdlen);
            records.push(OwnedRr { rtype, rclass, ttl, rdata });
        }
        Ok(RrSet { records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let set = RrSet {
            records: vec![
                OwnedRr { rtype: 1, rclass: 1, ttl: 3600, rdata: Bytes::from_static(&[192, 0, 2, 1]) },
                OwnedRr { rtype: 2, rclass: 1, ttl: 7200, rdata: Bytes::from_static(b"ns1.example.com") },
            ],
        };
        let encoded = set.encode();
        let decoded = RrSet::decode(&encoded).unwrap();
        assert_eq!(decoded, set);
    }

    #[test]
    fn empty_rrset_round_trips() {
        let set = RrSet::default();
        assert_eq!(RrSet::decode(&set.encode()).unwrap(), set);
    }
}
