//! DNS / dnsmasq (RFC 1035) predicate adapter.
//!
//! Ported from the reference `dnsmasq_predicate_adapter.c`. That source's
//! own history carries the same direction lesson as DTLS: an earlier
//! combined builder read the QR bit out of the packet to decide
//! query-vs-response, which broke the moment a fuzzed C2S packet happened
//! to set QR=1. `message_type` is forced by the caller-supplied direction
//! here, never by the header bit.

use std::collections::VecDeque;

use super::{read_u16_be, Direction, PredicateLine};

const RCODE_NOERROR: u8 = 0;
const RCODE_NXDOMAIN: u8 = 3;

const QTYPE_A: u16 = 1;
const QTYPE_NS: u16 = 2;
const QTYPE_CNAME: u16 = 5;
const QTYPE_SOA: u16 = 6;
const QTYPE_PTR: u16 = 12;
const QTYPE_MX: u16 = 15;
const QTYPE_TXT: u16 = 16;
const QTYPE_AAAA: u16 = 28;
const QTYPE_ANY: u16 = 255;

const MAX_TRACKED_QUERIES: usize = 256;
const MAX_NAME_JUMPS: u32 = 5;

#[derive(Debug, Clone, Copy)]
struct QueryRecord {
    id: u16,
    qtype: u16,
}

/// Per-session outstanding-query ring, bounded and oldest-evicted.
#[derive(Debug, Default)]
pub struct DnsAdapter {
    history: VecDeque<QueryRecord>,
    msg_id: u64,
}

impl DnsAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_session(&mut self) {
        *self = DnsAdapter::default();
    }

    pub fn build_request_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        self.build_pred_line(bytes, Direction::C2S)
    }

    pub fn build_response_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        self.build_pred_line(bytes, Direction::S2C)
    }

    fn build_pred_line(&mut self, bytes: &[u8], direction: Direction) -> String {
        let header = match parse_header(bytes) {
            Some(h) => h,
            None => return self.error_line(bytes, direction),
        };

        let qtype = parse_first_qtype(bytes, header.qdcount).unwrap_or(0);
        let is_query = direction == Direction::C2S;
        let message_type = if is_query { "query" } else { "response" };

        let mut id_match = false;
        let mut cache_hit = false;
        let mut upstream_queried = false;

        if is_query {
            self.track_query(header.id, qtype);
            upstream_queried = true;
        } else if let Some(idx) = self.find_matching_query(header.id, qtype) {
            id_match = true;
            if header.ancount > 0 && header.rcode == RCODE_NOERROR {
                // A zero-distance match (the matched query is still the
                // most recently issued one — nothing has displaced it in
                // the ring since) counts as an immediate re-query answered
                // from cache; anything older implies at least one other
                // query was issued upstream in between.
                if idx == self.history.len() - 1 {
                    cache_hit = true;
                } else {
                    upstream_queried = true;
                }
            }
        }

        let response_valid = !is_query && matches!(header.rcode, RCODE_NOERROR | RCODE_NXDOMAIN);

        let mut line = PredicateLine::new();
        line.field("message_type", message_type)
            .field("opcode", opcode_str(header.opcode))
            .field("rcode", rcode_str(header.rcode))
            .field("qtype", qtype_str(qtype))
            .field("is_query", is_query)
            .field("is_response", !is_query)
            .field("aa", header.aa)
            .field("tc", header.tc)
            .field("rd", header.rd)
            .field("ra", header.ra)
            .field("ad", header.ad)
            .field("cd", header.cd)
            .field("qdcount", header.qdcount)
            .field("ancount", header.ancount)
            .field("nscount", header.nscount)
            .field("arcount", header.arcount)
            .field("response_valid", response_valid)
            .field("dnssec_ok", header.ad)
            .field("query_id", header.id)
            .field("id_match", id_match)
            .field("cache_hit", cache_hit)
            .field("upstream_queried", upstream_queried);
        line.finish_with_trace(self.msg_id, direction, bytes)
    }

    fn error_line(&mut self, bytes: &[u8], direction: Direction) -> String {
        let is_query = direction == Direction::C2S;
        let mut line = PredicateLine::new();
        line.field("message_type", "messageNotSet")
            .field("opcode", "OPCODE_UNKNOWN")
            .field("rcode", "RCODE_UNKNOWN")
            .field("qtype", "QTYPE_UNKNOWN")
            .field("is_query", is_query)
            .field("is_response", !is_query)
            .field("aa", false)
            .field("tc", false)
            .field("rd", false)
            .field("ra", false)
            .field("ad", false)
            .field("cd", false)
            .field("qdcount", -1)
            .field("ancount", -1)
            .field("nscount", -1)
            .field("arcount", -1)
            .field("response_valid", false)
            .field("dnssec_ok", false)
            .field("query_id", -1)
            .field("id_match", false)
            .field("cache_hit", false)
            .field("upstream_queried", false);
        line.finish_with_trace(self.msg_id, direction, bytes)
    }

    fn track_query(&mut self, id: u16, qtype: u16) {
        if self.history.len() >= MAX_TRACKED_QUERIES {
            self.history.pop_front();
        }
        self.history.push_back(QueryRecord { id, qtype });
    }

    /// First (oldest) outstanding entry matching both id and qtype, per
    /// the reference implementation's forward scan.
    fn find_matching_query(&self, id: u16, qtype: u16) -> Option<usize> {
        self.history.iter().position(|q| q.id == id && q.qtype == qtype)
    }
}

struct Header {
    id: u16,
    opcode: u8,
    rcode: u8,
    aa: bool,
    tc: bool,
    rd: bool,
    ra: bool,
    ad: bool,
    cd: bool,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
}

fn parse_header(bytes: &[u8]) -> Option<Header> {
    if bytes.len() < 12 {
        return None;
    }
    let id = read_u16_be(bytes, 0)?;
    let flags = read_u16_be(bytes, 2)?;
    Some(Header {
        id,
        opcode: ((flags >> 11) & 0x0F) as u8,
        rcode: (flags & 0x0F) as u8,
        aa: flags & 0x0400 != 0,
        tc: flags & 0x0200 != 0,
        rd: flags & 0x0100 != 0,
        ra: flags & 0x0080 != 0,
        ad: flags & 0x0020 != 0,
        cd: flags & 0x0010 != 0,
        qdcount: read_u16_be(bytes, 4)?,
        ancount: read_u16_be(bytes, 6)?,
        nscount: read_u16_be(bytes, 8)?,
        arcount: read_u16_be(bytes, 10)?,
    })
}

/// Skips the first QNAME (supporting up to `MAX_NAME_JUMPS` pointer-
/// compression jumps) and reads the QTYPE that follows it.
fn parse_first_qtype(bytes: &[u8], qdcount: u16) -> Option<u16> {
    if qdcount == 0 {
        return None;
    }
    let pos = skip_name(bytes, 12)?;
    read_u16_be(bytes, pos)
}

fn skip_name(bytes: &[u8], offset: usize) -> Option<usize> {
    let mut pos = offset;
    let mut jumps = 0u32;
    while pos < bytes.len() && jumps < MAX_NAME_JUMPS {
        let label_len = bytes[pos];
        if label_len == 0 {
            return Some(pos + 1);
        } else if label_len & 0xC0 == 0xC0 {
            return if pos + 1 < bytes.len() { Some(pos + 2) } else { None };
        } else if label_len & 0xC0 == 0 {
            pos += 1 + label_len as usize;
            jumps += 1;
        } else {
            return None;
        }
    }
    None
}

fn qtype_str(qtype: u16) -> &'static str {
    match qtype {
        QTYPE_A => "A",
        QTYPE_AAAA => "AAAA",
        QTYPE_MX => "MX",
        QTYPE_NS => "NS",
        QTYPE_CNAME => "CNAME",
        QTYPE_PTR => "PTR",
        QTYPE_SOA => "SOA",
        QTYPE_TXT => "TXT",
        QTYPE_ANY => "ANY",
        _ => "QTYPE_UNKNOWN",
    }
}

fn opcode_str(opcode: u8) -> &'static str {
    match opcode {
        0 => "QUERY",
        1 => "IQUERY",
        2 => "STATUS",
        _ => "OPCODE_UNKNOWN",
    }
}

fn rcode_str(rcode: u8) -> &'static str {
    match rcode {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        _ => "RCODE_UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(id: u16, qr: bool, rcode: u8, ancount: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf[0] = (id >> 8) as u8;
        buf[1] = id as u8;
        let mut flags = rcode as u16 & 0x0F;
        if qr {
            flags |= 0x8000;
        }
        buf[2] = (flags >> 8) as u8;
        buf[3] = flags as u8;
        buf[4] = 0;
        buf[5] = 1; // qdcount = 1
        buf[6] = (ancount >> 8) as u8;
        buf[7] = ancount as u8;
        buf
    }

    fn with_question(mut buf: Vec<u8>, qtype: u16) -> Vec<u8> {
        buf.push(3);
        buf.extend_from_slice(b"www");
        buf.push(0);
        buf.push((qtype >> 8) as u8);
        buf.push(qtype as u8);
        buf.push(0);
        buf.push(1); // qclass IN
        buf
    }

    #[test]
    fn id_match_requires_matching_qtype() {
        let mut adapter = DnsAdapter::new();
        let query = with_question(header(0x1234, false, 0, 0), QTYPE_A);
        adapter.build_request_pred_line(&query);

        let wrong_qtype_resp = with_question(header(0x1234, true, 0, 1), QTYPE_AAAA);
        let line = adapter.build_response_pred_line(&wrong_qtype_resp);
        assert!(line.contains("id_match=false"));

        let right_qtype_resp = with_question(header(0x1234, true, 0, 1), QTYPE_A);
        let line = adapter.build_response_pred_line(&right_qtype_resp);
        assert!(line.contains("id_match=true"));
    }

    #[test]
    fn direction_is_forced_even_with_qr_bit_set_on_request() {
        let mut adapter = DnsAdapter::new();
        // QR=1 on a C2S packet must not flip message_type to "response".
        let pkt = with_question(header(1, true, 0, 0), QTYPE_A);
        let line = adapter.build_request_pred_line(&pkt);
        assert!(line.contains("message_type=query"));
    }

    #[test]
    fn malformed_header_emits_sentinel_without_panicking() {
        let mut adapter = DnsAdapter::new();
        let line = adapter.build_request_pred_line(&[1, 2, 3]);
        assert!(line.contains("message_type=messageNotSet"));
    }

    #[test]
    fn immediate_requery_is_a_cache_hit() {
        let mut adapter = DnsAdapter::new();
        let query = with_question(header(7, false, 0, 0), QTYPE_A);
        adapter.build_request_pred_line(&query);
        let resp = with_question(header(7, true, 0, 1), QTYPE_A);
        let line = adapter.build_response_pred_line(&resp);
        assert!(line.contains("cache_hit=true"));
    }

    #[test]
    fn response_displaced_by_a_newer_query_is_not_a_cache_hit() {
        let mut adapter = DnsAdapter::new();
        let first = with_question(header(7, false, 0, 0), QTYPE_A);
        adapter.build_request_pred_line(&first);
        let second = with_question(header(8, false, 0, 0), QTYPE_A);
        adapter.build_request_pred_line(&second);
        let resp = with_question(header(7, true, 0, 1), QTYPE_A);
        let line = adapter.build_response_pred_line(&resp);
        assert!(line.contains("id_match=true"));
        assert!(line.contains("cache_hit=false"));
        assert!(line.contains("upstream_queried=true"));
    }
}
