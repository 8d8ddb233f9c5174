//! AXFR client state machine (spec.md §4.2): connect, SOA-check, issue an
//! AXFR query, stream-validate the response, hand every RR to a consumer.
//!
//! Reads/writes are deadline-bound with `tokio::time::timeout` rather than
//! a signal-driven watchdog (SPEC_FULL.md §4.2/§9 REDESIGN).

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, ErrorKind, Result};
use crate::key::TsigKey;
use crate::name::OwnerName;
use crate::tsig::TsigRecord;
use crate::wire::rdata::Soa;
use crate::wire::{Header, Question, ResourceRecord, CLASS_IN, HEADER_LEN, RCODE_NOERROR, TYPE_AXFR, TYPE_SOA};

/// Default read/write deadline for one socket operation — tens of seconds,
/// per spec.md §5's "alarm timer... on the order of tens of seconds".
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub enum SerialStatus {
    UpToDate,
    Newer(u32),
}

fn random_id() -> u16 {
    use rand::RngCore;
    rand::thread_rng().next_u32() as u16
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Writes the 16-bit length prefix then the message, looping until every
/// byte is accepted (spec.md §4.2 "writes loop until the entire buffer is
/// sent").
async fn write_framed(conn: &mut TcpStream, msg: &[u8], timeout: Duration) -> Result<()> {
    let mut framed = BytesMut::with_capacity(msg.len() + 2);
    framed.put_u16(msg.len() as u16);
    framed.extend_from_slice(msg);
    tokio::time::timeout(timeout, conn.write_all(&framed)).await??;
    Ok(())
}

/// Reads one length-prefixed DNS message. EOF while reading the length
/// prefix means the peer closed between messages — treated the same as a
/// mid-message EOF here, since the caller always expects another message
/// until the stream is known to be complete.
async fn read_framed(conn: &mut TcpStream, timeout: Duration) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    read_exact_deadline(conn, &mut len_buf, timeout).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut msg = vec![0u8; len];
    read_exact_deadline(conn, &mut msg, timeout).await?;
    Ok(msg)
}

async fn read_exact_deadline(conn: &mut TcpStream, buf: &mut [u8], timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, conn.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::new(ErrorKind::Network, "connection closed by peer"))
        }
        Ok(Err(e)) => Err(e.into()),
        Err(elapsed) => Err(elapsed.into()),
    }
}

/// Builds and signs one query packet (SOA probe or AXFR request).
fn build_query(zone: &OwnerName, qtype: u16, query_id: u16, tsig: Option<&mut TsigRecord>) -> Result<Vec<u8>> {
    let header = Header {
        id: query_id,
        qr: false,
        opcode: 0,
        aa: true,
        tc: false,
        rd: false,
        ra: false,
        rcode: 0,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };
    let mut packet = BytesMut::new();
    header.write(&mut packet);
    Question { qname: zone.clone(), qtype, qclass: CLASS_IN }.write(&mut packet);
    let mut packet = packet.to_vec();

    if let Some(rec) = tsig {
        rec.init_query(query_id);
        rec.prepare()?;
        let len = packet.len();
        rec.update(&packet, len)?;
        rec.sign(now_unix())?;
        rec.append_rr(&mut packet)?;
        // open the digest window the first response's TSIG will close,
        // seeded with the query's own MAC (RFC 2845 §4.4).
        rec.prepare()?;
    }

    Ok(packet)
}

fn question_section_end(msg: &[u8], qdcount: u16) -> Result<usize> {
    let mut pos = HEADER_LEN;
    for _ in 0..qdcount {
        let (_, next) = Question::parse(msg, pos)?;
        pos = next;
    }
    Ok(pos)
}

/// Response validation checklist, spec.md §4.2 points 1–5 and 7. TSIG (6) is
/// checked separately by the caller, which owns the rolling `TsigRecord`.
fn validate_response(msg: &[u8], query_id: u16, qname: &OwnerName, qtype: u16, is_soa_probe: bool) -> Result<Header> {
    if msg.len() <= HEADER_LEN {
        return Err(Error::new(ErrorKind::Protocol, "declared length not larger than the DNS header"));
    }
    let header = Header::parse(msg)?;
    if !header.qr {
        return Err(Error::new(ErrorKind::Protocol, "QR bit not set in response"));
    }
    if header.tc {
        return Err(Error::new(ErrorKind::Protocol, "truncated response over TCP"));
    }
    if header.id != query_id {
        return Err(Error::new(ErrorKind::Protocol, "response id does not match query id"));
    }
    if header.rcode != RCODE_NOERROR {
        return Err(Error::new(ErrorKind::Protocol, format!("non-NOERROR rcode {}", header.rcode)));
    }
    if is_soa_probe {
        if header.qdcount != 1 || header.ancount < 1 {
            return Err(Error::new(ErrorKind::Protocol, "SOA probe must carry QDCOUNT=1, ANCOUNT>=1"));
        }
    } else if header.qdcount > 1 || header.ancount < 1 {
        return Err(Error::new(ErrorKind::Protocol, "AXFR response must carry QDCOUNT<=1, ANCOUNT>=1"));
    }

    if header.qdcount >= 1 {
        let (question, _) = Question::parse(msg, HEADER_LEN)?;
        if question.qname != *qname || question.qtype != qtype || question.qclass != CLASS_IN {
            return Err(Error::new(ErrorKind::Protocol, "question section does not match the request"));
        }
    }

    Ok(header)
}

/// `check_serial(state) → { UP_TO_DATE | NEWER | ERROR }`.
pub async fn check_serial(
    zone: &OwnerName,
    master: SocketAddr,
    last_serial: Option<u32>,
    key: Option<&TsigKey>,
    timeout: Duration,
) -> Result<SerialStatus> {
    if last_serial.is_none() {
        return Ok(SerialStatus::Newer(0));
    }

    let mut conn = TcpStream::connect(master).await?;
    let mut tsig = key.map(TsigRecord::init_record);
    let query_id = random_id();
    let query = build_query(zone, TYPE_SOA, query_id, tsig.as_mut())?;
    write_framed(&mut conn, &query, timeout).await?;

    let response = read_framed(&mut conn, timeout).await?;
    validate_response(&response, query_id, zone, TYPE_SOA, true)?;
    if let Some(rec) = tsig.as_mut() {
        rec.consume_packet(&response, true)?;
    }

    let rr_start = question_section_end(&response, Header::parse(&response)?.qdcount)?;
    let (rr, _) = ResourceRecord::parse(&response, rr_start)?;
    if !rr.is_soa() || rr.name != *zone || rr.rclass != CLASS_IN {
        return Err(Error::new(ErrorKind::Protocol, "SOA probe answer is not the zone's SOA"));
    }
    let (_, name_end) = OwnerName::from_message(&response, rr_start)?;
    let serial = Soa::serial_only(&response, name_end + 10)?;

    match last_serial {
        Some(s) if serial <= s => Ok(SerialStatus::UpToDate),
        _ => Ok(SerialStatus::Newer(serial)),
    }
}

/// `axfr(state, out_sink)` — drives the response loop until the terminating
/// SOA, handing every intermediate RR to `sink`. Returns the zone serial
/// carried by the stream's bracketing SOA.
pub async fn axfr<F>(zone: &OwnerName, master: SocketAddr, key: Option<&TsigKey>, timeout: Duration, mut sink: F) -> Result<u32>
where
    F: FnMut(ResourceRecord) -> Result<()>,
{
    let mut conn = TcpStream::connect(master).await?;
    let mut tsig = key.map(TsigRecord::init_record);
    let query_id = random_id();
    let query = build_query(zone, TYPE_AXFR, query_id, tsig.as_mut())?;
    write_framed(&mut conn, &query, timeout).await?;

    let mut packet_index = 0usize;
    let mut saw_first_rr = false;
    let mut serial = None;

    loop {
        let response = read_framed(&mut conn, timeout).await?;
        let is_first_packet = packet_index == 0;
        let header = validate_response(&response, query_id, zone, TYPE_AXFR, false)?;

        if let Some(rec) = tsig.as_mut() {
            rec.consume_packet(&response, is_first_packet)?;
        }

        let mut pos = question_section_end(&response, header.qdcount)?;
        for _ in 0..header.ancount {
            let rr_start = pos;
            let (rr, next) = ResourceRecord::parse(&response, pos)?;
            pos = next;

            if !saw_first_rr {
                if !rr.is_soa() || rr.name != *zone || rr.rclass != CLASS_IN {
                    return Err(Error::new(ErrorKind::Protocol, "first RR of AXFR stream is not the zone's SOA"));
                }
                let (_, name_end) = OwnerName::from_message(&response, rr_start)?;
                serial = Some(Soa::serial_only(&response, name_end + 10)?);
                saw_first_rr = true;
                sink(rr)?;
                continue;
            }

            if rr.is_soa() && rr.name == *zone && rr.rclass == CLASS_IN {
                // terminating SOA: not emitted, anything after it is discarded.
                return serial.ok_or_else(|| Error::new(ErrorKind::Protocol, "AXFR stream had no SOA"));
            }
            sink(rr)?;
        }

        packet_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    fn soa_rdata(mname: &str, rname: &str, serial: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(OwnerName::from_text(mname).unwrap().as_wire());
        out.extend_from_slice(OwnerName::from_text(rname).unwrap().as_wire());
        out.extend_from_slice(&serial.to_be_bytes());
        out.extend_from_slice(&3600u32.to_be_bytes());
        out.extend_from_slice(&600u32.to_be_bytes());
        out.extend_from_slice(&604800u32.to_be_bytes());
        out.extend_from_slice(&60u32.to_be_bytes());
        out
    }

    fn rr_bytes(owner: &OwnerName, rtype: u16, rdata: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(owner.as_wire());
        out.extend_from_slice(&rtype.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&3600u32.to_be_bytes());
        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(rdata);
        out
    }

    fn packet(id: u16, qdcount: u16, qname: Option<&OwnerName>, qtype: u16, answers: &[Vec<u8>]) -> Vec<u8> {
        let header = Header {
            id,
            qr: true,
            opcode: 0,
            aa: true,
            tc: false,
            rd: false,
            ra: false,
            rcode: 0,
            qdcount,
            ancount: answers.len() as u16,
            nscount: 0,
            arcount: 0,
        };
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        if let Some(name) = qname {
            Question { qname: name.clone(), qtype, qclass: CLASS_IN }.write(&mut buf);
        }
        let mut out = buf.to_vec();
        for rr in answers {
            out.extend_from_slice(rr);
        }
        out
    }

    use tokio::io::AsyncReadExt as _;

    #[tokio::test]
    async fn check_serial_reports_up_to_date() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let zone = OwnerName::from_text("example.com.").unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 2];
            sock.read_exact(&mut len_buf).await.unwrap();
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut query = vec![0u8; len];
            sock.read_exact(&mut query).await.unwrap();
            let qid = Header::parse(&query).unwrap().id;

            let soa = rr_bytes(&zone, TYPE_SOA, &soa_rdata("ns1.example.com.", "hostmaster.example.com.", 5));
            let resp = packet(qid, 1, Some(&zone), TYPE_SOA, &[soa]);
            let mut out = BytesMut::new();
            out.put_u16(resp.len() as u16);
            out.extend_from_slice(&resp);
            sock.write_all(&out).await.unwrap();
        });

        let status = check_serial(&zone, addr, Some(5), None, DEFAULT_TIMEOUT).await.unwrap();
        assert!(matches!(status, SerialStatus::UpToDate));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn axfr_streams_three_rrs_and_stops_on_terminating_soa() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let zone = OwnerName::from_text("example.com.").unwrap();
        let zone2 = zone.clone();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 2];
            sock.read_exact(&mut len_buf).await.unwrap();
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut query = vec![0u8; len];
            sock.read_exact(&mut query).await.unwrap();
            let qid = Header::parse(&query).unwrap().id;

            let soa = rr_bytes(&zone2, TYPE_SOA, &soa_rdata("ns1.example.com.", "hostmaster.example.com.", 7));
            let a = rr_bytes(&zone2, 1, &[192, 0, 2, 1]);
            let ns = rr_bytes(&zone2, 2, OwnerName::from_text("ns1.example.com.").unwrap().as_wire());
            let resp = packet(qid, 1, Some(&zone2), TYPE_AXFR, &[soa.clone(), a, ns, soa]);
            let mut out = BytesMut::new();
            out.put_u16(resp.len() as u16);
            out.extend_from_slice(&resp);
            sock.write_all(&out).await.unwrap();
        });

        let mut seen = Vec::new();
        let serial = axfr(&zone, addr, None, DEFAULT_TIMEOUT, |rr| {
            seen.push(rr.rtype);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(seen, vec![TYPE_SOA, 1, 2]);
        assert_eq!(serial, 7);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn axfr_fails_when_first_rr_is_not_soa() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let zone = OwnerName::from_text("example.com.").unwrap();
        let zone2 = zone.clone();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 2];
            sock.read_exact(&mut len_buf).await.unwrap();
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut query = vec![0u8; len];
            sock.read_exact(&mut query).await.unwrap();
            let qid = Header::parse(&query).unwrap().id;

            let a = rr_bytes(&zone2, 1, &[192, 0, 2, 1]);
            let soa = rr_bytes(&zone2, TYPE_SOA, &soa_rdata("ns1.example.com.", "hostmaster.example.com.", 7));
            let ns = rr_bytes(&zone2, 2, OwnerName::from_text("ns1.example.com.").unwrap().as_wire());
            let resp = packet(qid, 1, Some(&zone2), TYPE_AXFR, &[a, soa, ns]);
            let mut out = BytesMut::new();
            out.put_u16(resp.len() as u16);
            out.extend_from_slice(&resp);
            sock.write_all(&out).await.unwrap();
        });

        let result = axfr(&zone, addr, None, DEFAULT_TIMEOUT, |_| Ok(())).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn axfr_fails_fatally_on_socket_close_mid_rr() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let zone = OwnerName::from_text("example.com.").unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 2];
            sock.read_exact(&mut len_buf).await.unwrap();
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut query = vec![0u8; len];
            sock.read_exact(&mut query).await.unwrap();
            // advertise a 200-byte message, then close after only a few bytes.
            sock.write_all(&200u16.to_be_bytes()).await.unwrap();
            sock.write_all(&[0u8; 4]).await.unwrap();
        });

        let result = axfr(&zone, addr, None, DEFAULT_TIMEOUT, |_| Ok(())).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Network);
    }

}
