//! Owner names in canonical wire form (spec.md §3).
//!
//! An [`OwnerName`] stores the length-prefixed label sequence exactly as it
//! appears on the wire, terminated by the root's zero-length label, with
//! every ASCII letter folded to lowercase. Comparing two owner names is
//! comparing their wire bytes — the same rule the radix trie uses for any
//! key (§4.3), so an `OwnerName` doubles as a trie key without copying.

use std::fmt;

use bytes::Bytes;

use crate::error::{Error, ErrorKind, Result};

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_LABEL_LEN: usize = 63;

/// A DNS owner name in canonical (lowercase) wire form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerName(Bytes);

impl OwnerName {
    pub fn root() -> OwnerName {
        OwnerName(Bytes::from_static(&[0]))
    }

    /// Wire bytes, including the trailing root label.
    pub fn as_wire(&self) -> &[u8] {
        &self.0
    }

    pub fn into_wire(self) -> Bytes {
        self.0
    }

    /// Iterate the labels, root excluded, longest-first (as stored).
    pub fn labels(&self) -> LabelIter<'_> {
        LabelIter { buf: &self.0, pos: 0 }
    }

    pub fn is_root(&self) -> bool {
        self.0.as_ref() == [0u8]
    }

    /// Parse a name starting at `pos` in a full DNS message, following
    /// compression pointers (RFC 1035 §4.1.4). Returns the name and the
    /// offset just past it in the *original* stream (pointer targets don't
    /// advance the caller's cursor).
    pub fn from_message(msg: &[u8], pos: usize) -> Result<(OwnerName, usize)> {
        let mut out = Vec::with_capacity(16);
        let mut cursor = pos;
        let mut end: Option<usize> = None;
        let mut jumps = 0u32;

        loop {
            let len = *msg
                .get(cursor)
                .ok_or_else(|| Error::new(ErrorKind::Name, "owner name runs past message end"))?;

            if len == 0 {
                out.push(0);
                cursor += 1;
                if end.is_none() {
                    end = Some(cursor);
                }
                break;
            }

            if len & 0xc0 == 0xc0 {
                jumps += 1;
                if jumps > 128 {
                    return Err(Error::new(ErrorKind::Name, "too many compression pointers"));
                }
                let hi = (len & 0x3f) as usize;
                let lo = *msg
                    .get(cursor + 1)
                    .ok_or_else(|| Error::new(ErrorKind::Name, "truncated compression pointer"))?
                    as usize;
                let target = (hi << 8) | lo;
                if end.is_none() {
                    end = Some(cursor + 2);
                }
                if target >= cursor {
                    return Err(Error::new(ErrorKind::Name, "compression pointer does not point backward"));
                }
                cursor = target;
                continue;
            }

            if len & 0xc0 != 0 {
                return Err(Error::new(ErrorKind::Name, "reserved label length bits set"));
            }

            let len = len as usize;
            let start = cursor + 1;
            let label = msg
                .get(start..start + len)
                .ok_or_else(|| Error::new(ErrorKind::Name, "label runs past message end"))?;

            out.push(len as u8);
            out.extend(label.iter().map(|b| b.to_ascii_lowercase()));
            cursor = start + len;

            if out.len() > MAX_NAME_LEN {
                return Err(Error::new(ErrorKind::Name, "name exceeds 255 octets"));
            }
        }

        Ok((OwnerName(Bytes::from(out)), end.unwrap_or(cursor)))
    }

    /// Parse a dotted textual name (e.g. a config-file zone name) into wire
    /// form. No compression is ever produced; this is only used for names
    /// we originate ourselves (query questions).
    pub fn from_text(text: &str) -> Result<OwnerName> {
        let mut out = Vec::with_capacity(text.len() + 1);
        let trimmed = text.strip_suffix('.').unwrap_or(text);

        if trimmed.is_empty() {
            return Ok(OwnerName::root());
        }

        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(Error::new(ErrorKind::Name, format!("invalid label in {text:?}")));
            }
            out.push(label.len() as u8);
            out.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
        }
        out.push(0);

        if out.len() > MAX_NAME_LEN {
            return Err(Error::new(ErrorKind::Name, "name exceeds 255 octets"));
        }

        Ok(OwnerName(Bytes::from(out)))
    }

    /// Append the wire form to `buf`, uncompressed.
    pub fn write_uncompressed(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0);
    }
}

pub struct LabelIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for LabelIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let len = *self.buf.get(self.pos)? as usize;
        if len == 0 {
            return None;
        }
        let start = self.pos + 1;
        let label = &self.buf[start..start + len];
        self.pos = start + len;
        Some(label)
    }
}

impl fmt::Display for OwnerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, ".");
        }
        for label in self.labels() {
            write!(f, "{}.", String::from_utf8_lossy(label))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_text_lowercases_and_terminates() {
        let name = OwnerName::from_text("WWW.Example.COM").unwrap();
        assert_eq!(name.as_wire(), b"\x03www\x07example\x03com\x00");
        assert_eq!(name.to_string(), "www.example.com.");
    }

    #[test]
    fn root_round_trips() {
        let name = OwnerName::from_text(".").unwrap();
        assert!(name.is_root());
        assert_eq!(name.as_wire(), &[0]);
    }

    #[test]
    fn rejects_oversized_label() {
        let label = "a".repeat(64);
        assert!(OwnerName::from_text(&label).is_err());
    }

    #[test]
    fn from_message_follows_compression_pointer() {
        // "hk." at offset 12, then a pointer back to it at offset 20.
        let mut msg = vec![0u8; 12];
        msg.extend_from_slice(b"\x02hk\x00");
        msg.extend_from_slice(&[0xc0, 12]);

        let (name, next) = OwnerName::from_message(&msg, 12).unwrap();
        assert_eq!(name.to_string(), "hk.");
        assert_eq!(next, 16);

        let (name2, next2) = OwnerName::from_message(&msg, 16).unwrap();
        assert_eq!(name2.to_string(), "hk.");
        assert_eq!(next2, 18);
    }

    #[test]
    fn rejects_forward_pointer() {
        let mut msg = vec![0xc0, 5];
        msg.extend_from_slice(&[0, 0, 0, 0]);
        assert!(OwnerName::from_message(&msg, 0).is_err());
    }

    #[test]
    fn ordering_is_wire_byte_lexicographic() {
        let a = OwnerName::from_text("a.com").unwrap();
        let b = OwnerName::from_text("bb.com").unwrap();
        assert!(a.as_wire() < b.as_wire());
    }
}
