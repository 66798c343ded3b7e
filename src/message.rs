//! DNS message composition and decoding for the responder and resolver.
//!
//! Every packet this crate emits is built here, so the RFC 6762 details
//! live in one place: the cache-flush bit is set only on the records that
//! carry it in lookup answers and TXT announcements, browsing answers are
//! composed without it, and probe queries carry the future SRV/TXT records
//! in the authority section.

use hickory_proto::op::{Header, Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::{A, AAAA, PTR, SRV, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder};

use crate::error::MdnsError;
use crate::service::{ServiceEntry, ServiceRecord};

/// Decode a received packet.
///
/// A complete message with the TC bit set decodes normally. A datagram cut
/// short of what its header counts promise is treated as success with
/// partial content: the prefix of records that decoded cleanly is kept.
/// Packets with nothing salvageable fail and are dropped by the caller.
pub(crate) fn decode(buf: &[u8]) -> Result<Message, MdnsError> {
    match Message::from_vec(buf) {
        Ok(msg) => Ok(msg),
        Err(e) => salvage_truncated(buf).ok_or(MdnsError::Proto(e)),
    }
}

/// Re-read a short datagram section by section, keeping every query and
/// record before the cut. Returns None if not even the header and one
/// item survived.
fn salvage_truncated(buf: &[u8]) -> Option<Message> {
    let mut decoder = BinDecoder::new(buf);
    let header = Header::read(&mut decoder).ok()?;

    let mut queries = Vec::new();
    let mut answers = Vec::new();
    let mut authorities = Vec::new();
    let mut additionals = Vec::new();
    let _ = read_section(&mut decoder, header.query_count(), &mut queries)
        && read_section(&mut decoder, header.answer_count(), &mut answers)
        && read_section(&mut decoder, header.name_server_count(), &mut authorities)
        && read_section(&mut decoder, header.additional_count(), &mut additionals);

    if queries.is_empty() && answers.is_empty() && authorities.is_empty() && additionals.is_empty()
    {
        return None;
    }

    let mut msg = Message::new();
    msg.set_id(header.id());
    msg.set_message_type(header.message_type());
    msg.set_op_code(header.op_code());
    msg.set_authoritative(header.authoritative());
    msg.set_truncated(header.truncated());
    msg.set_recursion_desired(header.recursion_desired());
    for query in queries {
        msg.add_query(query);
    }
    for rec in answers {
        msg.add_answer(rec);
    }
    for rec in authorities {
        msg.add_name_server(rec);
    }
    for rec in additionals {
        msg.add_additional(rec);
    }
    Some(msg)
}

/// Read up to `count` items, stopping at the first one the buffer cannot
/// satisfy. Returns whether the whole section was read.
fn read_section<'r, T: BinDecodable<'r>>(
    decoder: &mut BinDecoder<'r>,
    count: u16,
    out: &mut Vec<T>,
) -> bool {
    for _ in 0..count {
        match T::read(decoder) {
            Ok(item) => out.push(item),
            Err(_) => return false,
        }
    }
    true
}

/// Whether the question requests a unicast response (QCLASS top bit).
pub(crate) fn wants_unicast(question: &Query) -> bool {
    question.mdns_unicast_response()
}

fn name(s: &str) -> Result<Name, MdnsError> {
    Ok(Name::from_utf8(s)?)
}

fn response_message() -> Message {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Response);
    msg.set_op_code(OpCode::Query);
    msg.set_authoritative(true);
    msg
}

fn query_message() -> Message {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(false);
    msg
}

fn record(name: Name, ttl: u32, rdata: RData, cache_flush: bool) -> Record {
    let mut record = Record::from_rdata(name, ttl, rdata);
    record.set_dns_class(DNSClass::IN);
    record.set_mdns_cache_flush(cache_flush);
    record
}

fn srv_record(entry: &ServiceEntry, ttl: u32, cache_flush: bool) -> Result<Record, MdnsError> {
    let target = name(&entry.hostname)?;
    Ok(record(
        name(entry.service_instance_name())?,
        ttl,
        RData::SRV(SRV::new(0, 0, entry.port, target)),
        cache_flush,
    ))
}

fn txt_record(entry: &ServiceEntry, ttl: u32, cache_flush: bool) -> Result<Record, MdnsError> {
    Ok(record(
        name(entry.service_instance_name())?,
        ttl,
        RData::TXT(TXT::new(entry.text.clone())),
        cache_flush,
    ))
}

fn addr_records(
    entry: &ServiceEntry,
    ttl: u32,
    cache_flush: bool,
) -> Result<Vec<Record>, MdnsError> {
    let hostname = name(&entry.hostname)?;
    let mut records = Vec::with_capacity(entry.addrs_v4.len() + entry.addrs_v6.len());
    for ip in &entry.addrs_v4 {
        records.push(record(
            hostname.clone(),
            ttl,
            RData::A(A::from(*ip)),
            cache_flush,
        ));
    }
    for ip in &entry.addrs_v6 {
        records.push(record(
            hostname.clone(),
            ttl,
            RData::AAAA(AAAA::from(*ip)),
            cache_flush,
        ));
    }
    Ok(records)
}

/// Answers for a browsing query on the service name.
///
/// The PTR goes in the answer section; SRV, TXT and address records ride
/// along as additionals. No record carries the cache-flush bit.
pub fn browse_response(entry: &ServiceEntry, ttl: u32) -> Result<Message, MdnsError> {
    let mut msg = response_message();
    msg.add_answer(record(
        name(entry.service_name())?,
        ttl,
        RData::PTR(PTR(name(entry.service_instance_name())?)),
        false,
    ));
    msg.add_additional(srv_record(entry, ttl, false)?);
    msg.add_additional(txt_record(entry, ttl, false)?);
    for addr in addr_records(entry, ttl, false)? {
        msg.add_additional(addr);
    }
    Ok(msg)
}

/// Answers for a lookup query on the service instance name or hostname.
///
/// Everything goes in the answer section. SRV, TXT and address records
/// carry the cache-flush bit; the two PTRs never do. With `ttl` 0 this is
/// the goodbye message.
pub fn lookup_response(entry: &ServiceEntry, ttl: u32) -> Result<Message, MdnsError> {
    let mut msg = response_message();
    msg.add_answer(srv_record(entry, ttl, true)?);
    msg.add_answer(txt_record(entry, ttl, true)?);
    msg.add_answer(record(
        name(entry.service_name())?,
        ttl,
        RData::PTR(PTR(name(entry.service_instance_name())?)),
        false,
    ));
    msg.add_answer(record(
        name(entry.service_type_name())?,
        ttl,
        RData::PTR(PTR(name(entry.service_name())?)),
        false,
    ));
    for addr in addr_records(entry, ttl, true)? {
        msg.add_answer(addr);
    }
    Ok(msg)
}

/// Answer for the RFC 6762 §9 service type enumeration meta-query.
pub fn service_type_response(entry: &ServiceEntry, ttl: u32) -> Result<Message, MdnsError> {
    let mut msg = response_message();
    msg.add_answer(record(
        name(entry.service_type_name())?,
        ttl,
        RData::PTR(PTR(name(entry.service_name())?)),
        false,
    ));
    Ok(msg)
}

/// Unsolicited announcement carrying only the TXT record, cache-flush set.
pub fn txt_announcement(entry: &ServiceEntry, ttl: u32) -> Result<Message, MdnsError> {
    let mut msg = response_message();
    msg.add_answer(txt_record(entry, ttl, true)?);
    Ok(msg)
}

/// Probe query: a PTR question on the service instance name with the
/// future SRV and TXT records in the authority section.
pub fn probe_query(entry: &ServiceEntry, ttl: u32) -> Result<Message, MdnsError> {
    let mut msg = query_message();
    let mut question = Query::query(name(entry.service_instance_name())?, RecordType::PTR);
    question.set_query_class(DNSClass::IN);
    msg.add_query(question);
    msg.add_name_server(srv_record(entry, ttl, false)?);
    msg.add_name_server(txt_record(entry, ttl, false)?);
    Ok(msg)
}

/// Browse query: a PTR question on the service name.
pub fn browse_query(record: &ServiceRecord) -> Result<Message, MdnsError> {
    let mut msg = query_message();
    let mut question = Query::query(name(record.service_name())?, RecordType::PTR);
    question.set_query_class(DNSClass::IN);
    msg.add_query(question);
    Ok(msg)
}

/// Targeted lookup query: SRV and TXT questions on the instance name.
pub fn lookup_query(record: &ServiceRecord) -> Result<Message, MdnsError> {
    let mut msg = query_message();
    let instance = name(record.service_instance_name())?;
    for rtype in [RecordType::SRV, RecordType::TXT] {
        let mut question = Query::query(instance.clone(), rtype);
        question.set_query_class(DNSClass::IN);
        msg.add_query(question);
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_entry() -> ServiceEntry {
        let mut entry = ServiceEntry::new("MyPage", "_http._tcp", "");
        entry.hostname = "host.local.".to_string();
        entry.port = 8080;
        entry.text = vec!["path=/".to_string()];
        entry.addrs_v4 = vec![Ipv4Addr::new(192, 0, 2, 7)];
        entry
    }

    #[test]
    fn test_browse_response_sections() {
        let msg = browse_response(&test_entry(), 3200).unwrap();
        assert_eq!(msg.answers().len(), 1);
        assert_eq!(msg.answers()[0].record_type(), RecordType::PTR);
        // SRV + TXT + one A
        assert_eq!(msg.additionals().len(), 3);
        for rec in msg.answers().iter().chain(msg.additionals()) {
            assert!(!rec.mdns_cache_flush(), "{:?} has cache flush", rec);
            assert_eq!(rec.ttl(), 3200);
        }
    }

    #[test]
    fn test_lookup_response_cache_flush_placement() {
        let msg = lookup_response(&test_entry(), 3200).unwrap();
        assert!(msg.additionals().is_empty());
        // SRV + TXT + 2 PTR + 1 A
        assert_eq!(msg.answers().len(), 5);
        for rec in msg.answers() {
            let flushed = rec.mdns_cache_flush();
            match rec.record_type() {
                RecordType::PTR => assert!(!flushed),
                _ => assert!(flushed, "{:?} missing cache flush", rec.record_type()),
            }
        }
    }

    #[test]
    fn test_goodbye_is_lookup_with_zero_ttl() {
        let entry = test_entry();
        let goodbye = lookup_response(&entry, 0).unwrap();
        let lookup = lookup_response(&entry, 3200).unwrap();
        assert_eq!(goodbye.answers().len(), lookup.answers().len());
        for (g, l) in goodbye.answers().iter().zip(lookup.answers()) {
            assert_eq!(g.ttl(), 0);
            assert_eq!(g.record_type(), l.record_type());
            assert_eq!(g.name(), l.name());
            assert_eq!(g.data(), l.data());
        }
    }

    #[test]
    fn test_txt_announcement_single_flushed_answer() {
        let msg = txt_announcement(&test_entry(), 3200).unwrap();
        assert_eq!(msg.answers().len(), 1);
        let rec = &msg.answers()[0];
        assert_eq!(rec.record_type(), RecordType::TXT);
        assert!(rec.mdns_cache_flush());
        assert!(msg.additionals().is_empty());
    }

    #[test]
    fn test_probe_query_shape() {
        let msg = probe_query(&test_entry(), 3200).unwrap();
        assert_eq!(msg.message_type(), MessageType::Query);
        assert!(!msg.recursion_desired());
        assert_eq!(msg.queries().len(), 1);
        assert_eq!(msg.queries()[0].query_type(), RecordType::PTR);
        let authority: Vec<_> = msg.name_servers().iter().map(|r| r.record_type()).collect();
        assert_eq!(authority, vec![RecordType::SRV, RecordType::TXT]);
    }

    #[test]
    fn test_responses_have_qr_and_aa() {
        let msg = service_type_response(&test_entry(), 3200).unwrap();
        assert_eq!(msg.message_type(), MessageType::Response);
        assert!(msg.authoritative());
        assert_eq!(msg.answers().len(), 1);
    }

    #[test]
    fn test_lookup_query_questions() {
        let record = ServiceRecord::new("MyPage", "_http._tcp", "");
        let msg = lookup_query(&record).unwrap();
        let types: Vec<_> = msg.queries().iter().map(|q| q.query_type()).collect();
        assert_eq!(types, vec![RecordType::SRV, RecordType::TXT]);
    }

    #[test]
    fn test_decode_accepts_tc_flag_with_complete_content() {
        let mut msg = lookup_response(&test_entry(), 3200).unwrap();
        msg.set_truncated(true);

        let decoded = decode(&msg.to_vec().unwrap()).unwrap();
        assert!(decoded.truncated());
        assert_eq!(decoded.answers().len(), msg.answers().len());
    }

    #[test]
    fn test_decode_salvages_short_datagram() {
        // Header counts promise five answers; the last record (the A) is
        // cut mid-rdata.
        let msg = lookup_response(&test_entry(), 3200).unwrap();
        let bytes = msg.to_vec().unwrap();
        let cut = &bytes[..bytes.len() - 6];

        let decoded = decode(cut).expect("short datagram should decode with partial content");
        assert_eq!(decoded.message_type(), MessageType::Response);
        assert!(!decoded.answers().is_empty());
        assert!(decoded.answers().len() < msg.answers().len());
        // The intact prefix survives.
        assert_eq!(decoded.answers()[0].record_type(), RecordType::SRV);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // Shorter than a DNS header: nothing to salvage.
        assert!(decode(&[0xff; 7]).is_err());
    }
}
