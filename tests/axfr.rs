//! Integration coverage for the AXFR/TSIG scenarios in spec.md §8 that need
//! a real TSIG-signed exchange rather than a single unit-test packet:
//! scenario 5 (TSIG required, first packet unsigned → FAIL) and scenario 6
//! (three packets, TSIG on packets 1 and 3 only → SUCCESS).

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use xfrd::axfr::{axfr, DEFAULT_TIMEOUT};
use xfrd::key::TsigKey;
use xfrd::name::OwnerName;
use xfrd::tsig::{Algorithm, TsigRecord};
use xfrd::wire::{Header, Question, CLASS_IN, TYPE_AXFR, TYPE_SOA};

fn key() -> TsigKey {
    TsigKey {
        name: OwnerName::from_text("transfer-key.").unwrap(),
        algorithm: Algorithm::Sha256,
        secret: b"0123456789abcdef".to_vec(),
        server_address: "127.0.0.1:53".parse().unwrap(),
    }
}

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

/// Builds one unsigned message: header + optional question + answer RRs,
/// ARCOUNT left at 0 (room for a TSIG RR to be appended by the caller).
fn message(id: u16, qname: Option<&OwnerName>, answers: &[Vec<u8>]) -> Vec<u8> {
    let header = Header {
        id,
        qr: true,
        opcode: 0,
        aa: true,
        tc: false,
        rd: false,
        ra: false,
        rcode: 0,
        qdcount: qname.is_some() as u16,
        ancount: answers.len() as u16,
        nscount: 0,
        arcount: 0,
    };
    let mut buf = BytesMut::new();
    header.write(&mut buf);
    if let Some(name) = qname {
        Question { qname: name.clone(), qtype: TYPE_AXFR, qclass: CLASS_IN }.write(&mut buf);
    }
    let mut out = buf.to_vec();
    for rr in answers {
        out.extend_from_slice(rr);
    }
    out
}

async fn write_frame(sock: &mut tokio::net::TcpStream, msg: &[u8]) {
    let mut framed = BytesMut::with_capacity(msg.len() + 2);
    framed.put_u16(msg.len() as u16);
    framed.extend_from_slice(msg);
    sock.write_all(&framed).await.unwrap();
}

async fn read_frame(sock: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 2];
    sock.read_exact(&mut len_buf).await.unwrap();
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    sock.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn scenario_5_missing_tsig_on_first_packet_fails_authentication() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let zone = OwnerName::from_text("example.com.").unwrap();
    let zone2 = zone.clone();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let query = read_frame(&mut sock).await;
        let qid = Header::parse(&query).unwrap().id;

        let soa = rr_bytes(&zone2, TYPE_SOA, &soa_rdata("ns1.example.com.", "hostmaster.example.com.", 7));
        let response = message(qid, Some(&zone2), &[soa]);
        write_frame(&mut sock, &response).await;
    });

    let key = key();
    let mut seen = Vec::new();
    let result = axfr(&zone, addr, Some(&key), DEFAULT_TIMEOUT, |rr| {
        seen.push(rr.rtype);
        Ok(())
    })
    .await;

    assert!(result.is_err(), "expected authentication failure, got {result:?}");
    assert!(seen.is_empty(), "no RR should have been emitted before the auth failure");
}

#[tokio::test]
async fn scenario_6_three_packets_tsig_on_first_and_last_succeeds() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let zone = OwnerName::from_text("example.com.").unwrap();
    let zone2 = zone.clone();
    let key = key();
    let server_key = key.clone();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let query = read_frame(&mut sock).await;
        let qid = Header::parse(&query).unwrap().id;

        let mut signer = TsigRecord::init_record(&server_key);
        signer.init_query(qid);
        signer.prepare().unwrap();
        signer.consume_packet(&query, true).unwrap();

        // Packet 1 (tagged): the leading SOA.
        let soa = rr_bytes(&zone2, TYPE_SOA, &soa_rdata("ns1.example.com.", "hostmaster.example.com.", 7));
        let mut response1 = message(qid, Some(&zone2), &[soa]);
        let len1 = response1.len();
        signer.update(&response1, len1).unwrap();
        signer.sign(1_700_000_100).unwrap();
        signer.append_rr(&mut response1).unwrap();
        write_frame(&mut sock, &response1).await;
        signer.prepare().unwrap();

        // Packet 2 (untagged): A and NS.
        let a = rr_bytes(&zone2, 1, &[192, 0, 2, 1]);
        let ns = rr_bytes(&zone2, 2, OwnerName::from_text("ns1.example.com.").unwrap().as_wire());
        let response2 = message(qid, None, &[a, ns]);
        let len2 = response2.len();
        signer.update(&response2, len2).unwrap();
        write_frame(&mut sock, &response2).await;

        // Packet 3 (tagged): the terminating SOA.
        let soa2 = rr_bytes(&zone2, TYPE_SOA, &soa_rdata("ns1.example.com.", "hostmaster.example.com.", 7));
        let mut response3 = message(qid, None, &[soa2]);
        let len3 = response3.len();
        signer.update(&response3, len3).unwrap();
        signer.sign(1_700_000_200).unwrap();
        signer.append_rr(&mut response3).unwrap();
        write_frame(&mut sock, &response3).await;
    });

    let mut seen = Vec::new();
    let serial = axfr(&zone, addr, Some(&key), DEFAULT_TIMEOUT, |rr| {
        seen.push(rr.rtype);
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(seen, vec![TYPE_SOA, 1, 2]);
    assert_eq!(serial, 7);
    server.await.unwrap();
}
