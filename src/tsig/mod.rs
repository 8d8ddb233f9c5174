//! TSIG message authentication (RFC 2845, algorithms per RFC 4635).
//!
//! Models the state machine spec.md §3/§4.1 describes explicitly: a
//! [`TsigRecord`] is bound to a key and algorithm, then driven through
//! `init_query`/`prepare`/`update`/`sign` for an outgoing query, or through
//! `find_rr`/`prepare`/`update`/`verify` for each inbound packet. The rolling
//! digest across an AXFR's many packets (§4.1 "Multi-packet AXFR rule") is
//! implemented on top of those primitives by [`TsigRecord::consume_packet`],
//! which is what `axfr` actually calls per packet.

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::{Error, ErrorKind, Result};
use crate::key::TsigKey;
use crate::name::OwnerName;
use crate::wire::{self, Header};

/// Hard cap on intermediate packets that may omit their own TSIG RR before
/// one must appear to close the rolling digest (spec.md §4.1).
pub const MAX_UNTAGGED_PACKETS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "hmac-md5.sig-alg.reg.int.",
            Algorithm::Sha1 => "hmac-sha1.",
            Algorithm::Sha256 => "hmac-sha256.",
            Algorithm::Sha384 => "hmac-sha384.",
            Algorithm::Sha512 => "hmac-sha512.",
        }
    }

    pub fn from_wire_name(name: &OwnerName) -> Result<Algorithm> {
        let text = name.to_string();
        match text.as_str() {
            "hmac-md5.sig-alg.reg.int." => Ok(Algorithm::Md5),
            "hmac-sha1." => Ok(Algorithm::Sha1),
            "hmac-sha256." => Ok(Algorithm::Sha256),
            "hmac-sha384." => Ok(Algorithm::Sha384),
            "hmac-sha512." => Ok(Algorithm::Sha512),
            other => Err(Error::new(ErrorKind::Tsig, format!("unsupported TSIG algorithm {other:?}"))),
        }
    }

    /// Tag used in the key-file format (spec.md §6); short and stable, as
    /// opposed to the dotted wire name.
    pub fn from_tag(tag: &str) -> Result<Algorithm> {
        match tag {
            "md5" => Ok(Algorithm::Md5),
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(Error::new(ErrorKind::Tsig, format!("unknown algorithm tag {other:?}"))),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }
}

enum HmacCtx {
    Md5(Hmac<Md5>),
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl HmacCtx {
    fn new(algorithm: Algorithm, secret: &[u8]) -> Result<HmacCtx> {
        let bad_key = || Error::new(ErrorKind::Tsig, "TSIG secret rejected by HMAC key schedule");
        Ok(match algorithm {
            Algorithm::Md5 => HmacCtx::Md5(Hmac::<Md5>::new_from_slice(secret).map_err(|_| bad_key())?),
            Algorithm::Sha1 => HmacCtx::Sha1(Hmac::<Sha1>::new_from_slice(secret).map_err(|_| bad_key())?),
            Algorithm::Sha256 => HmacCtx::Sha256(Hmac::<Sha256>::new_from_slice(secret).map_err(|_| bad_key())?),
            Algorithm::Sha384 => HmacCtx::Sha384(Hmac::<Sha384>::new_from_slice(secret).map_err(|_| bad_key())?),
            Algorithm::Sha512 => HmacCtx::Sha512(Hmac::<Sha512>::new_from_slice(secret).map_err(|_| bad_key())?),
        })
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            HmacCtx::Md5(m) => m.update(data),
            HmacCtx::Sha1(m) => m.update(data),
            HmacCtx::Sha256(m) => m.update(data),
            HmacCtx::Sha384(m) => m.update(data),
            HmacCtx::Sha512(m) => m.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            HmacCtx::Md5(m) => m.finalize().into_bytes().to_vec(),
            HmacCtx::Sha1(m) => m.finalize().into_bytes().to_vec(),
            HmacCtx::Sha256(m) => m.finalize().into_bytes().to_vec(),
            HmacCtx::Sha384(m) => m.finalize().into_bytes().to_vec(),
            HmacCtx::Sha512(m) => m.finalize().into_bytes().to_vec(),
        }
    }

    /// Constant-time comparison against the received MAC (RFC 2845 §4.6).
    fn verify(self, mac: &[u8]) -> bool {
        match self {
            HmacCtx::Md5(m) => m.verify_slice(mac).is_ok(),
            HmacCtx::Sha1(m) => m.verify_slice(mac).is_ok(),
            HmacCtx::Sha256(m) => m.verify_slice(mac).is_ok(),
            HmacCtx::Sha384(m) => m.verify_slice(mac).is_ok(),
            HmacCtx::Sha512(m) => m.verify_slice(mac).is_ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsigStatus {
    Ok,
    NotPresent,
    Error,
}

/// Everything `find_rr` pulls out of a packet's TSIG RR.
#[derive(Debug, Clone)]
pub struct FoundTsig {
    pub position: usize,
    pub time_signed: u64,
    pub fudge: u16,
    pub mac: Vec<u8>,
    pub original_id: u16,
    pub error: u16,
}

/// The mutable per-transfer TSIG state described in spec.md §3.
pub struct TsigRecord<'k> {
    pub key: &'k TsigKey,
    pub algorithm: Algorithm,
    pub query_id: u16,
    pub status: TsigStatus,
    pub error_code: u16,
    pub response_count: u32,
    pub updates_since_last_prepare: u32,
    pub position: usize,
    time_signed: u64,
    fudge: u16,
    other_data: Vec<u8>,
    previous_mac: Vec<u8>,
    ctx: Option<HmacCtx>,
}

impl<'k> TsigRecord<'k> {
    /// `init_record` — bind algorithm and key.
    pub fn init_record(key: &'k TsigKey) -> TsigRecord<'k> {
        TsigRecord {
            key,
            algorithm: key.algorithm,
            query_id: 0,
            status: TsigStatus::NotPresent,
            error_code: 0,
            response_count: 0,
            updates_since_last_prepare: 0,
            position: 0,
            time_signed: 0,
            fudge: 300,
            other_data: Vec::new(),
            previous_mac: Vec::new(),
            ctx: None,
        }
    }

    /// `init_query` — set status=OK, reset counters and HMAC context.
    pub fn init_query(&mut self, query_id: u16) {
        self.query_id = query_id;
        self.status = TsigStatus::Ok;
        self.error_code = 0;
        self.response_count = 0;
        self.updates_since_last_prepare = 0;
        self.position = 0;
        self.previous_mac.clear();
        self.ctx = None;
    }

    /// `prepare` — begin a new digest window. A response window is seeded
    /// with the previous signature, length-prefixed, per RFC 2845 §4.4.
    pub fn prepare(&mut self) -> Result<()> {
        let mut ctx = HmacCtx::new(self.algorithm, &self.key.secret)?;
        if self.response_count > 0 {
            ctx.update(&(self.previous_mac.len() as u16).to_be_bytes());
            ctx.update(&self.previous_mac);
        }
        self.ctx = Some(ctx);
        self.updates_since_last_prepare = 0;
        Ok(())
    }

    /// `update` — feed `buf[0..len]` into the current digest window.
    pub fn update(&mut self, buf: &[u8], len: usize) -> Result<()> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::Tsig, "update before prepare"))?;
        ctx.update(&buf[..len]);
        Ok(())
    }

    fn tsig_variables(&self, algorithm_name: &str, error: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        self.key.name.write_uncompressed(&mut out);
        out.extend_from_slice(&wire::CLASS_ANY.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // TTL, always 0
        let alg_name = OwnerName::from_text(algorithm_name).expect("static algorithm names are valid");
        alg_name.write_uncompressed(&mut out);
        out.push(((self.time_signed >> 40) & 0xff) as u8);
        out.extend_from_slice(&(self.time_signed as u32).to_be_bytes());
        out.extend_from_slice(&self.fudge.to_be_bytes());
        out.extend_from_slice(&error.to_be_bytes());
        out.extend_from_slice(&(self.other_data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.other_data);
        out
    }

    /// `sign` — finalize the window, producing a MAC for `append_rr`.
    pub fn sign(&mut self, time_signed: u64) -> Result<()> {
        self.time_signed = time_signed;
        let variables = self.tsig_variables(self.algorithm.wire_name(), 0);
        let ctx = self
            .ctx
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Tsig, "sign before prepare"))?;
        let mut ctx = ctx;
        ctx.update(&variables);
        self.previous_mac = ctx.finalize();
        self.response_count += 1;
        Ok(())
    }

    /// `append_rr` — write the TSIG RR to `packet` and bump ARCOUNT.
    pub fn append_rr(&self, packet: &mut Vec<u8>) -> Result<()> {
        self.key.name.write_uncompressed(packet);
        packet.extend_from_slice(&wire::TYPE_TSIG.to_be_bytes());
        packet.extend_from_slice(&wire::CLASS_ANY.to_be_bytes());
        packet.extend_from_slice(&0u32.to_be_bytes());

        let mut rdata = Vec::with_capacity(32 + self.previous_mac.len());
        let alg_name = OwnerName::from_text(self.algorithm.wire_name())?;
        alg_name.write_uncompressed(&mut rdata);
        rdata.push(((self.time_signed >> 40) & 0xff) as u8);
        rdata.extend_from_slice(&(self.time_signed as u32).to_be_bytes());
        rdata.extend_from_slice(&self.fudge.to_be_bytes());
        rdata.extend_from_slice(&(self.previous_mac.len() as u16).to_be_bytes());
        rdata.extend_from_slice(&self.previous_mac);
        rdata.extend_from_slice(&self.query_id.to_be_bytes());
        rdata.extend_from_slice(&0u16.to_be_bytes()); // error
        rdata.extend_from_slice(&0u16.to_be_bytes()); // other len

        packet.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        packet.extend_from_slice(&rdata);

        let arcount_pos = 10;
        let arcount = u16::from_be_bytes([packet[arcount_pos], packet[arcount_pos + 1]]);
        let bytes = (arcount + 1).to_be_bytes();
        packet[arcount_pos] = bytes[0];
        packet[arcount_pos + 1] = bytes[1];

        Ok(())
    }

    /// `find_rr` — scan the additional section for a trailing TSIG RR.
    pub fn find_rr(&mut self, packet: &[u8]) -> Result<Option<FoundTsig>> {
        let header = Header::parse(packet)?;
        if header.arcount == 0 {
            self.status = TsigStatus::NotPresent;
            self.position = 0;
            return Ok(None);
        }

        let mut pos = wire::HEADER_LEN;
        for _ in 0..header.qdcount {
            let (_, next) = wire::Question::parse(packet, pos)?;
            pos = next;
        }

        let mut record_start = pos;
        let total_rrs = header.ancount as u32 + header.nscount as u32 + header.arcount as u32;
        let mut last: Option<(usize, wire::ResourceRecord)> = None;
        for _ in 0..total_rrs {
            let start = record_start;
            let (rr, next) = wire::ResourceRecord::parse(packet, record_start)?;
            record_start = next;
            last = Some((start, rr));
        }

        match last {
            Some((start, rr)) if rr.rtype == wire::TYPE_TSIG => {
                let rdata = &rr.rdata[..];
                let (alg_name, alg_pos) = OwnerName::from_message(rdata, 0)?;
                let algorithm = Algorithm::from_wire_name(&alg_name)?;
                let tail = rdata
                    .get(alg_pos..)
                    .ok_or_else(|| Error::new(ErrorKind::Tsig, "truncated TSIG rdata"))?;
                if tail.len() < 10 {
                    return Err(Error::new(ErrorKind::Tsig, "truncated TSIG rdata"));
                }
                let time_signed = ((tail[0] as u64) << 40)
                    | ((tail[1] as u64) << 32)
                    | ((tail[2] as u64) << 24)
                    | ((tail[3] as u64) << 16)
                    | ((tail[4] as u64) << 8)
                    | (tail[5] as u64);
                let fudge = u16::from_be_bytes([tail[6], tail[7]]);
                let mac_size = u16::from_be_bytes([tail[8], tail[9]]) as usize;
                let mac = tail
                    .get(10..10 + mac_size)
                    .ok_or_else(|| Error::new(ErrorKind::Tsig, "truncated TSIG mac"))?
                    .to_vec();
                let rest = &tail[10 + mac_size..];
                if rest.len() < 6 {
                    return Err(Error::new(ErrorKind::Tsig, "truncated TSIG trailer"));
                }
                let original_id = u16::from_be_bytes([rest[0], rest[1]]);
                let error = u16::from_be_bytes([rest[2], rest[3]]);

                self.algorithm = algorithm;
                self.position = start;
                self.error_code = error;
                self.status = TsigStatus::Ok;

                Ok(Some(FoundTsig {
                    position: start,
                    time_signed,
                    fudge,
                    mac,
                    original_id,
                    error,
                }))
            }
            _ => {
                self.status = TsigStatus::NotPresent;
                self.position = 0;
                Ok(None)
            }
        }
    }

    /// `verify` — finalize the digest window and constant-time compare.
    pub fn verify(&mut self, found: &FoundTsig) -> Result<()> {
        self.time_signed = found.time_signed;
        self.fudge = found.fudge;
        let variables = self.tsig_variables(self.algorithm.wire_name(), found.error);
        let ctx = self
            .ctx
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Tsig, "verify before prepare"))?;
        let mut ctx = ctx;
        ctx.update(&variables);
        let mac = found.mac.clone();
        let matched = ctx.verify(&mac);
        self.previous_mac = mac;
        self.response_count += 1;
        self.status = if matched { TsigStatus::Ok } else { TsigStatus::Error };
        if !matched {
            return Err(Error::new(ErrorKind::Tsig, "TSIG MAC mismatch"));
        }
        Ok(())
    }

    /// Drives one packet through the multi-packet AXFR rule (spec.md §4.1):
    /// untagged packets just extend the rolling digest (bounded by
    /// [`MAX_UNTAGGED_PACKETS`]); a tagged packet closes the window and
    /// opens the next one.
    pub fn consume_packet(&mut self, packet: &[u8], is_first_response: bool) -> Result<()> {
        let found = self.find_rr(packet)?;

        match found {
            None => {
                if is_first_response {
                    return Err(Error::new(ErrorKind::Tsig, "first AXFR response must carry a TSIG"));
                }
                self.update(packet, packet.len())?;
                self.updates_since_last_prepare += 1;
                if self.updates_since_last_prepare > MAX_UNTAGGED_PACKETS {
                    return Err(Error::new(
                        ErrorKind::Tsig,
                        format!("{MAX_UNTAGGED_PACKETS} untagged responses without a TSIG"),
                    ));
                }
                Ok(())
            }
            Some(found) => {
                if self.status == TsigStatus::Error || found.error != 0 {
                    return Err(Error::new(ErrorKind::Tsig, "peer reported a TSIG error"));
                }
                // The digest covers the message as it looked before the TSIG
                // RR was appended, i.e. with ARCOUNT one lower (RFC 2845 §3.4.1).
                let mut prefix = packet[..found.position].to_vec();
                let arcount = u16::from_be_bytes([prefix[10], prefix[11]]);
                let corrected = (arcount - 1).to_be_bytes();
                prefix[10] = corrected[0];
                prefix[11] = corrected[1];
                self.update(&prefix, prefix.len())?;
                self.verify(&found)?;
                self.prepare()?;
                Ok(())
            }
        }
    }
}
