//! DNS message primitives: header, question, resource record (RFC 1035 §4).
//!
//! This module only knows enough wire format to drive an AXFR client: it
//! parses/writes headers and questions, and treats RDATA as an opaque byte
//! blob except where §4.2 names a field it must inspect (the SOA serial).

pub mod rdata;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorKind, Result};
use crate::name::OwnerName;

pub const HEADER_LEN: usize = 12;

pub const CLASS_IN: u16 = 1;
pub const CLASS_ANY: u16 = 255;

pub const TYPE_SOA: u16 = 6;
pub const TYPE_AXFR: u16 = 252;
pub const TYPE_TSIG: u16 = 250;

pub const RCODE_NOERROR: u8 = 0;

/// The 12-byte fixed header (RFC 1035 §4.1.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn parse(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_LEN {
            return Err(Error::new(ErrorKind::Protocol, "message shorter than header"));
        }
        let id = u16::from_be_bytes([buf[0], buf[1]]);
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        Ok(Header {
            id,
            qr: flags & 0x8000 != 0,
            opcode: ((flags >> 11) & 0x0f) as u8,
            aa: flags & 0x0400 != 0,
            tc: flags & 0x0200 != 0,
            rd: flags & 0x0100 != 0,
            ra: flags & 0x0080 != 0,
            rcode: (flags & 0x000f) as u8,
            qdcount: u16::from_be_bytes([buf[4], buf[5]]),
            ancount: u16::from_be_bytes([buf[6], buf[7]]),
            nscount: u16::from_be_bytes([buf[8], buf[9]]),
            arcount: u16::from_be_bytes([buf[10], buf[11]]),
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(self.id);
        let mut flags = 0u16;
        if self.qr {
            flags |= 0x8000;
        }
        flags |= ((self.opcode & 0x0f) as u16) << 11;
        if self.aa {
            flags |= 0x0400;
        }
        if self.tc {
            flags |= 0x0200;
        }
        if self.rd {
            flags |= 0x0100;
        }
        if self.ra {
            flags |= 0x0080;
        }
        flags |= self.rcode as u16 & 0x000f;
        buf.put_u16(flags);
        buf.put_u16(self.qdcount);
        buf.put_u16(self.ancount);
        buf.put_u16(self.nscount);
        buf.put_u16(self.arcount);
    }
}

#[derive(Debug, Clone)]
pub struct Question {
    pub qname: OwnerName,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    pub fn parse(msg: &[u8], pos: usize) -> Result<(Question, usize)> {
        let (qname, pos) = OwnerName::from_message(msg, pos)?;
        let tail = msg
            .get(pos..pos + 4)
            .ok_or_else(|| Error::new(ErrorKind::Protocol, "truncated question"))?;
        let qtype = u16::from_be_bytes([tail[0], tail[1]]);
        let qclass = u16::from_be_bytes([tail[2], tail[3]]);
        Ok((Question { qname, qtype, qclass }, pos + 4))
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.qname.as_wire());
        buf.put_u16(self.qtype);
        buf.put_u16(self.qclass);
    }
}

/// An owner-keyed resource record with opaque RDATA. The only RDATA this
/// crate ever decodes beyond raw bytes is SOA (see [`rdata::Soa`]).
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub name: OwnerName,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Bytes,
}

impl ResourceRecord {
    /// Parse one RR starting at `pos`, returning it and the offset just
    /// past its RDATA.
    pub fn parse(msg: &[u8], pos: usize) -> Result<(ResourceRecord, usize)> {
        let (name, pos) = OwnerName::from_message(msg, pos)?;
        let head = msg
            .get(pos..pos + 10)
            .ok_or_else(|| Error::new(ErrorKind::Protocol, "truncated RR header"))?;
        let rtype = u16::from_be_bytes([head[0], head[1]]);
        let rclass = u16::from_be_bytes([head[2], head[3]]);
        let ttl = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);
        let rdlength = u16::from_be_bytes([head[8], head[9]]) as usize;
        let rdata_start = pos + 10;
        let rdata = msg
            .get(rdata_start..rdata_start + rdlength)
            .ok_or_else(|| Error::new(ErrorKind::Protocol, "truncated RR rdata"))?;

        Ok((
            ResourceRecord {
                name,
                rtype,
                rclass,
                ttl,
                rdata: Bytes::copy_from_slice(rdata),
            },
            rdata_start + rdlength,
        ))
    }

    pub fn is_soa(&self) -> bool {
        self.rtype == TYPE_SOA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header {
            id: 0x1234,
            qr: true,
            opcode: 0,
            aa: true,
            tc: false,
            rd: false,
            ra: false,
            rcode: 0,
            qdcount: 1,
            ancount: 2,
            nscount: 0,
            arcount: 0,
        };
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        let parsed = Header::parse(&buf).unwrap();
        assert_eq!(parsed.id, 0x1234);
        assert!(parsed.qr);
        assert!(parsed.aa);
        assert_eq!(parsed.ancount, 2);
    }

    #[test]
    fn question_round_trips_through_parse() {
        let mut msg = vec![0u8; HEADER_LEN];
        msg.extend_from_slice(b"\x07example\x03com\x00");
        msg.extend_from_slice(&TYPE_SOA.to_be_bytes());
        msg.extend_from_slice(&CLASS_IN.to_be_bytes());

        let (question, end) = Question::parse(&msg, HEADER_LEN).unwrap();
        assert_eq!(question.qname.to_string(), "example.com.");
        assert_eq!(question.qtype, TYPE_SOA);
        assert_eq!(end, msg.len());
    }
}
