//! Shared test infrastructure for message shape tests.

use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::op::Message;
use hickory_proto::rr::{RData, Record, RecordType};

use lanbeacon::ServiceEntry;

// --- Entry builders ---

/// A web service entry as a responder would hold after registration.
pub fn web_entry() -> ServiceEntry {
    let mut entry = ServiceEntry::new("MyPage", "_http._tcp", "");
    entry.hostname = "host.local.".to_string();
    entry.port = 8080;
    entry.text = vec!["path=/".to_string()];
    entry.addrs_v4 = vec![Ipv4Addr::new(192, 0, 2, 7)];
    entry.addrs_v6 = vec![Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)];
    entry
}

/// A proxy-registered printer entry (caller-supplied host and address).
pub fn printer_entry() -> ServiceEntry {
    let mut entry = ServiceEntry::new("Printer", "_ipp._tcp", "");
    entry.hostname = "printer.local.".to_string();
    entry.port = 631;
    entry.text = vec![];
    entry.addrs_v4 = vec![Ipv4Addr::new(10, 0, 0, 5)];
    entry
}

// --- Wire helpers ---

/// Round-trip a message through its wire encoding, as a receiver would
/// see it.
pub fn roundtrip(msg: &Message) -> Message {
    let bytes = msg.to_vec().expect("failed to encode message");
    Message::from_vec(&bytes).expect("failed to decode encoded message")
}

/// Answer-section records of a given type.
pub fn answers_of(msg: &Message, rtype: RecordType) -> Vec<&Record> {
    msg.answers()
        .iter()
        .filter(|r| r.record_type() == rtype)
        .collect()
}

/// Additional-section records of a given type.
pub fn additionals_of(msg: &Message, rtype: RecordType) -> Vec<&Record> {
    msg.additionals()
        .iter()
        .filter(|r| r.record_type() == rtype)
        .collect()
}

/// The PTR target of a record, as a dotted string.
pub fn ptr_target(rec: &Record) -> String {
    match rec.data() {
        Some(RData::PTR(ptr)) => ptr.0.to_utf8(),
        other => panic!("expected PTR rdata, got {other:?}"),
    }
}

/// Assert every record of `rtype` in the answer section carries (or does
/// not carry) the cache-flush bit.
pub fn assert_answer_cache_flush(msg: &Message, rtype: RecordType, expected: bool) {
    let records = answers_of(msg, rtype);
    assert!(!records.is_empty(), "no {rtype:?} records in answers");
    for rec in records {
        assert_eq!(
            rec.mdns_cache_flush(),
            expected,
            "{rtype:?} cache-flush bit mismatch"
        );
    }
}
