//! End-to-end data-path scenarios: validate, forward, deliver.

#![expect(missing_docs, reason = "testing")]

mod common;

use assert_matches::assert_matches;
use octs::Bytes;
use srcr::check::{CheckError, HeaderCheck};
use srcr::forward::{Forwarded, Forwarder, Ingress};
use srcr::table::ArpTable;
use srcr::wire::{self, decode_frame};

use common::{A, B, C, ET, FakeArp, FakeLinks, mac};

fn full_arp() -> FakeArp {
    FakeArp::with(&[(A, mac(1)), (B, mac(2)), (C, mac(3))])
}

#[test]
fn clean_three_hop_forward() {
    let mut origin = Forwarder::new(A, mac(1), ET);
    let mut relay = Forwarder::new(B, mac(2), ET);
    let mut check = HeaderCheck::default();
    let mut links = FakeLinks::new();
    let mut arp = full_arp();

    links.set_link_pair(A, B, srcr::metric::Metric(300));

    let frame = origin.encap(b"user payload", &[A, B, C], 0, &arp).unwrap();
    let frame = check.check(frame).expect("origin emits a valid frame");

    let out = relay.push(&frame, Ingress::Wire, &mut links, &mut arp);
    let Some(Forwarded::Wire(next)) = out else {
        panic!("B forwards toward C");
    };

    // the relayed frame revalidates cleanly at the next hop
    let mut check_c = HeaderCheck::default();
    let next = check_c.check(next).expect("B refreshed the checksum");

    let decoded = decode_frame(&next).unwrap();
    assert_eq!(2, decoded.header.next);
    assert_eq!(mac(3), decoded.ether.dst);
    assert_eq!(mac(2), decoded.ether.src);
    // link record 0 now carries B's own view of the A <-> B link
    assert_eq!(srcr::metric::Metric(300), decoded.header.link(0).fwd);
    assert_eq!(srcr::metric::Metric(300), decoded.header.link(0).rev);
    assert_eq!(b"user payload".as_slice(), &decoded.payload[..]);
}

#[test]
fn terminal_delivery_annotates_the_gateway() {
    let mut origin = Forwarder::new(A, mac(1), ET);
    let mut sink = Forwarder::new(B, mac(2), ET);
    let mut links = FakeLinks::new();
    let mut arp = full_arp();

    let frame = origin.encap(b"hello", &[A, B], 0, &arp).unwrap();
    let out = sink.push(&frame, Ingress::Wire, &mut links, &mut arp);

    assert_matches!(
        out,
        Some(Forwarded::Upward { payload, gateway })
            if &payload[..] == b"hello" && gateway == A
    );
    // the sink snooped A's MAC off the frame
    assert_eq!(mac(1), arp.lookup(A));
}

#[test]
fn version_mismatch_is_counted_and_attributed() {
    let mut origin = Forwarder::new(A, mac(1), ET);
    let mut check = HeaderCheck::default();
    let arp = full_arp();

    let frame = origin.encap(b"x", &[A, B], 0, &arp).unwrap();
    let mut raw = frame.to_vec();
    raw[14] = wire::SR_VERSION ^ 1;

    let rej = check.check(Bytes::from(raw)).unwrap_err();
    assert_matches!(rej.error, CheckError::BadVersion { version } if version == wire::SR_VERSION ^ 1);
    assert_eq!(1, check.drops());

    let dump = check.bad_nodes();
    assert!(dump.contains("02:00:00:00:00:01"));
    assert!(dump.contains(&format!("version {}", wire::SR_VERSION ^ 1)));
}

#[test]
fn corrupt_checksum_drops_and_counts() {
    let mut origin = Forwarder::new(A, mac(1), ET);
    let mut check = HeaderCheck::default();
    let arp = full_arp();

    let frame = origin.encap(b"x", &[A, B], 0, &arp).unwrap();
    let mut raw = frame.to_vec();
    raw[14 + 20] ^= 0x04;

    let rej = check.check(Bytes::from(raw)).unwrap_err();
    assert_eq!(CheckError::BadChecksum, rej.error);
    assert_eq!(1, check.drops());

    // the rejected frame comes back untouched for the diagnostic tap
    let mut want = frame.to_vec();
    want[14 + 20] ^= 0x04;
    assert_eq!(want, rej.frame.to_vec());
}

#[test]
fn every_emitted_frame_carries_a_zero_sum_header() {
    let mut origin = Forwarder::new(A, mac(1), ET);
    let mut relay = Forwarder::new(B, mac(2), ET);
    let mut links = FakeLinks::new();
    let mut arp = full_arp();

    let frame = origin.encap(b"zeroes", &[A, B, C], 0, &arp).unwrap();
    let decoded = decode_frame(&frame).unwrap();
    let tlen = decoded.header.hlen_with_data();
    assert_eq!(0, wire::internet_checksum(&frame[14..14 + tlen]));

    let Some(Forwarded::Wire(next)) = relay.push(&frame, Ingress::Wire, &mut links, &mut arp)
    else {
        panic!("B forwards");
    };
    assert_eq!(0, wire::internet_checksum(&next[14..14 + tlen]));
}

#[test]
fn forwarder_never_reports_zero_metrics() {
    let mut origin = Forwarder::new(A, mac(1), ET);
    let mut relay = Forwarder::new(B, mac(2), ET);
    let mut links = FakeLinks::new();
    let mut arp = full_arp();

    // fresh encaps carry zeroed link records and an empty random sample
    let frame = origin.encap(b"x", &[A, B, C], 0, &arp).unwrap();
    let _ = relay.push(&frame, Ingress::Wire, &mut links, &mut arp);

    assert!(links.updates.iter().all(|(_, _, _, _, m)| m.is_known()));
    assert!(links.updates.is_empty());
}
