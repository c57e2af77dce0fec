//! RTSP (RFC 2326) predicate adapter.
//!
//! Ported from the reference `rtsp_predicate_adapter.c`. That source
//! carries its own documented bug fix worth preserving here: session and
//! method tracking must compare against the *numeric* status code range
//! and the canonical `"mSETUP"`/`"mTEARDOWN"`/... enum spellings, not
//! against the raw method token or a status-class string — an earlier
//! revision compared `status_class` against `"SUCCESS"` (missing the
//! `sc` prefix) and `method` against `"SETUP"` (missing the `m` prefix),
//! so session tracking silently never fired.

use super::{Direction, PredicateLine};

const MAX_SETUP_URIS: usize = 32;

#[derive(Debug, Default)]
struct LastRequest {
    method: String,
    cseq: i64,
    has_session: bool,
    session_id: String,
    transport_udp: bool,
    transport_tcp: bool,
    client_ports: bool,
    malformed: bool,
    uri: String,
}

impl LastRequest {
    fn reset() -> Self {
        LastRequest {
            method: "mNotSet".to_string(),
            cseq: -1,
            ..Default::default()
        }
    }
}

/// Per-session RTSP dialog state.
#[derive(Debug)]
pub struct RtspAdapter {
    session_id: String,
    session_established: bool,
    setup_success_count: u32,
    play_success_count: u32,
    total_tracks: u32,
    setup_uris: Vec<String>,
    last_request: LastRequest,
    msg_id: u64,
}

impl Default for RtspAdapter {
    fn default() -> Self {
        RtspAdapter {
            session_id: String::new(),
            session_established: false,
            setup_success_count: 0,
            play_success_count: 0,
            total_tracks: 0,
            setup_uris: Vec::new(),
            last_request: LastRequest::reset(),
            msg_id: 0,
        }
    }
}

impl RtspAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_session(&mut self) {
        *self = RtspAdapter::default();
    }

    pub fn build_request_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        let text = String::from_utf8_lossy(bytes);
        let malformed = is_malformed_request(bytes);

        let mut method = "mNotSet".to_string();
        let mut uri = String::new();
        let mut cseq: i64 = -1;
        let mut has_session = false;
        let mut session_id = String::new();
        let mut transport_udp = false;
        let mut transport_tcp = false;
        let mut client_ports = false;

        if !malformed && !bytes.is_empty() {
            let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));
            if let Some(request_line) = lines.next() {
                method = parse_request_method(request_line);
                uri = parse_request_uri(request_line);
            }
            for line in lines {
                if line.is_empty() {
                    break;
                }
                if starts_with_ci(line, "CSeq:") {
                    cseq = parse_cseq(line);
                } else if starts_with_ci(line, "Session:") {
                    has_session = true;
                    session_id = parse_session(line);
                } else if starts_with_ci(line, "Transport:") {
                    let t = parse_transport(line);
                    transport_udp = t.udp;
                    transport_tcp = t.tcp;
                    client_ports = t.client_ports;
                }
            }
        }

        let keepalive_getparam = method == "mGET_PARAMETER" && has_session;

        let session_id_match = self.session_established && has_session && session_id == self.session_id;
        let teardown_for_existing = method == "mTEARDOWN" && has_session && self.session_established && session_id_match;
        let teardown_without_session = method == "mTEARDOWN" && !has_session;
        let uri_in_session =
            self.session_established && !uri.is_empty() && self.check_uri_in_session(&uri);

        self.last_request = LastRequest {
            method: method.clone(),
            cseq,
            has_session,
            session_id,
            transport_udp,
            transport_tcp,
            client_ports,
            malformed,
            uri,
        };

        let all_tracks_setup = self.total_tracks > 0 && self.setup_success_count >= self.total_tracks;

        let mut line = PredicateLine::new();
        line.field("rtsp_method", &method)
            .field("status_class", "scNotSet")
            .field("req_cseq", cseq)
            .field("resp_cseq", -1)
            .field("resp_status_code", 0)
            .field("req_malformed", malformed)
            .field("resp_malformed", false)
            .field("cseq_match", false)
            .field("req_has_session", has_session)
            .field("resp_has_session", false)
            .field("session_established", self.session_established)
            .field("session_id_match", session_id_match)
            .field("session_id_changed", false)
            .field("teardown_for_existing_session", teardown_for_existing)
            .field("teardown_without_session", teardown_without_session)
            .field("transport_req_udp", transport_udp)
            .field("transport_req_tcp", transport_tcp)
            .field("transport_resp_udp", false)
            .field("transport_resp_tcp", false)
            .field("transport_client_ports_present", client_ports)
            .field("transport_server_ports_present", false)
            .field("setup_success_count", self.setup_success_count)
            .field("play_success_count", self.play_success_count)
            .field("all_tracks_setup", all_tracks_setup)
            .field("keepalive_getparam", keepalive_getparam)
            .field("keepalive_failed", false)
            .field("timeout", false)
            .field("transport_resp_port_zero", false)
            .field("resp_cseq_valid", true)
            .field("req_uri_in_session", uri_in_session)
            .field("resp_empty", false);
        line.finish_with_trace(self.msg_id, Direction::C2S, bytes)
    }

    pub fn build_response_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        let text = String::from_utf8_lossy(bytes);
        let resp_empty = bytes.is_empty();
        let timeout = resp_empty;
        let resp_malformed = !resp_empty && is_malformed_response(bytes);

        let mut status_code = 0i64;
        let mut resp_cseq: i64 = -1;
        let mut resp_has_session = false;
        let mut resp_session_id = String::new();
        let mut transport_udp = false;
        let mut transport_tcp = false;
        let mut server_ports = false;
        let mut port_zero = false;
        let mut cseq_valid = true;
        let mut found_cseq = false;

        if !resp_malformed && !resp_empty {
            let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));
            if let Some(status_line) = lines.next() {
                status_code = parse_response_status(status_line);
            }
            for line in lines {
                if line.is_empty() {
                    break;
                }
                if starts_with_ci(line, "CSeq:") {
                    resp_cseq = parse_cseq(line);
                    cseq_valid = check_cseq_valid(line);
                    found_cseq = true;
                } else if starts_with_ci(line, "Session:") {
                    resp_has_session = true;
                    resp_session_id = parse_session(line);
                } else if starts_with_ci(line, "Transport:") {
                    let t = parse_transport(line);
                    transport_udp = t.udp;
                    transport_tcp = t.tcp;
                    server_ports = t.server_ports;
                    port_zero = t.port_zero;
                }
            }
            if !found_cseq {
                cseq_valid = false;
            }
        } else if resp_empty {
            cseq_valid = false;
        }

        let status_class = status_class(status_code);
        let cseq_match = self.last_request.cseq > 0 && resp_cseq > 0 && self.last_request.cseq == resp_cseq;

        let mut session_id_changed = false;
        if self.last_request.method == "mSETUP" && is_success(status_code) && resp_has_session {
            if !self.session_established {
                self.session_id = resp_session_id.clone();
                self.session_established = true;
                self.total_tracks = 1;
            } else if self.session_id != resp_session_id {
                session_id_changed = true;
            }
            self.setup_success_count += 1;
            let uri = self.last_request.uri.clone();
            self.record_setup_uri(&uri);
        }

        if self.last_request.method == "mPLAY" && is_success(status_code) {
            self.play_success_count += 1;
        }

        let session_id_match =
            self.last_request.has_session && self.session_established && self.last_request.session_id == self.session_id;

        let mut teardown_for_existing = false;
        let mut teardown_without_session = false;
        if self.last_request.method == "mTEARDOWN" {
            if self.last_request.has_session && self.session_established && session_id_match {
                teardown_for_existing = true;
            }
            if !self.last_request.has_session {
                teardown_without_session = true;
            }
            if is_success(status_code) {
                self.session_established = false;
            }
        }

        let keepalive_failed = self.last_request.method == "mGET_PARAMETER"
            && self.last_request.has_session
            && (timeout || status_code >= 400);

        let uri_in_session = self.session_established
            && !self.last_request.uri.is_empty()
            && self.check_uri_in_session(&self.last_request.uri.clone());

        let all_tracks_setup = self.total_tracks > 0 && self.setup_success_count >= self.total_tracks;

        let mut line = PredicateLine::new();
        line.field("rtsp_method", &self.last_request.method)
            .field("status_class", status_class)
            .field("req_cseq", self.last_request.cseq)
            .field("resp_cseq", resp_cseq)
            .field("resp_status_code", status_code)
            .field("req_malformed", self.last_request.malformed)
            .field("resp_malformed", resp_malformed)
            .field("cseq_match", cseq_match)
            .field("req_has_session", self.last_request.has_session)
            .field("resp_has_session", resp_has_session)
            .field("session_established", self.session_established)
            .field("session_id_match", session_id_match)
            .field("session_id_changed", session_id_changed)
            .field("teardown_for_existing_session", teardown_for_existing)
            .field("teardown_without_session", teardown_without_session)
            .field("transport_req_udp", self.last_request.transport_udp)
            .field("transport_req_tcp", self.last_request.transport_tcp)
            .field("transport_resp_udp", transport_udp)
            .field("transport_resp_tcp", transport_tcp)
            .field("transport_client_ports_present", self.last_request.client_ports)
            .field("transport_server_ports_present", server_ports)
            .field("setup_success_count", self.setup_success_count)
            .field("play_success_count", self.play_success_count)
            .field("all_tracks_setup", all_tracks_setup)
            .field("keepalive_getparam", false)
            .field("keepalive_failed", keepalive_failed)
            .field("timeout", timeout)
            .field("transport_resp_port_zero", port_zero)
            .field("resp_cseq_valid", cseq_valid)
            .field("req_uri_in_session", uri_in_session)
            .field("resp_empty", resp_empty);
        line.finish_with_trace(self.msg_id, Direction::S2C, bytes)
    }

    fn record_setup_uri(&mut self, uri: &str) {
        if uri.is_empty() || self.setup_uris.len() >= MAX_SETUP_URIS {
            return;
        }
        if !self.setup_uris.iter().any(|u| u == uri) {
            self.setup_uris.push(uri.to_string());
        }
    }

    /// A request URI belongs to the session if it exactly matches a
    /// SETUPed URI, a SETUPed URI is an extension of it (aggregate
    /// PLAY/TEARDOWN against a container URI), or it is an extension of
    /// a SETUPed URI (track-level TEARDOWN).
    fn check_uri_in_session(&self, uri: &str) -> bool {
        self.setup_uris
            .iter()
            .any(|setup| setup == uri || setup.starts_with(uri) || uri.starts_with(setup.as_str()))
    }
}

fn starts_with_ci(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn parse_request_method(line: &str) -> String {
    let token = line.split_whitespace().next().unwrap_or("");
    match token.to_ascii_uppercase().as_str() {
        "OPTIONS" => "mOPTIONS",
        "DESCRIBE" => "mDESCRIBE",
        "SETUP" => "mSETUP",
        "PLAY" => "mPLAY",
        "PAUSE" => "mPAUSE",
        "TEARDOWN" => "mTEARDOWN",
        "ANNOUNCE" => "mANNOUNCE",
        "GET_PARAMETER" => "mGET_PARAMETER",
        "SET_PARAMETER" => "mSET_PARAMETER",
        "REDIRECT" => "mREDIRECT",
        "RECORD" => "mRECORD",
        _ => "mNotSet",
    }
    .to_string()
}

fn parse_request_uri(line: &str) -> String {
    line.split_whitespace().nth(1).unwrap_or("").to_string()
}

fn parse_cseq(line: &str) -> i64 {
    line.split_once(':')
        .and_then(|(_, v)| v.trim().split_whitespace().next())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(-1)
}

/// RFC 2326 §12.17: `CSeq = "CSeq" ":" 1*DIGIT`. The value must be
/// present and made entirely of digits.
fn check_cseq_valid(line: &str) -> bool {
    match line.split_once(':') {
        Some((_, v)) => {
            let v = v.trim();
            let token = v.split_whitespace().next().unwrap_or("");
            !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

fn parse_session(line: &str) -> String {
    match line.split_once(':') {
        Some((_, v)) => v.trim().split(|c: char| c == ';' || c.is_whitespace()).next().unwrap_or("").to_string(),
        None => String::new(),
    }
}

struct Transport {
    udp: bool,
    tcp: bool,
    client_ports: bool,
    server_ports: bool,
    port_zero: bool,
}

fn parse_transport(line: &str) -> Transport {
    let value = line.split_once(':').map(|(_, v)| v).unwrap_or("");
    let tcp = value.contains("RTP/AVP/TCP") || value.contains("interleaved");
    let udp = !tcp && value.contains("RTP/AVP");

    let mut client_ports = false;
    let mut server_ports = false;
    let mut port_zero = false;

    if let Some(idx) = value.find("client_port=") {
        client_ports = true;
        if port_value(&value[idx + "client_port=".len()..]) == 0 {
            port_zero = true;
        }
    }
    if let Some(idx) = value.find("server_port=") {
        server_ports = true;
        if port_value(&value[idx + "server_port=".len()..]) == 0 {
            port_zero = true;
        }
    }
    if let Some(idx) = value.find(";port=") {
        if port_value(&value[idx + ";port=".len()..]) == 0 {
            port_zero = true;
        }
    }

    Transport {
        udp,
        tcp,
        client_ports,
        server_ports,
        port_zero,
    }
}

fn port_value(tail: &str) -> i64 {
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn parse_response_status(line: &str) -> i64 {
    line.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn status_class(code: i64) -> &'static str {
    match code {
        100..=199 => "scINFO",
        200..=299 => "scSUCCESS",
        300..=399 => "scREDIRECT",
        400..=499 => "scCLIENT_ERR",
        500..=599 => "scSERVER_ERR",
        _ => "scNotSet",
    }
}

fn is_success(code: i64) -> bool {
    (200..300).contains(&code)
}

fn is_malformed_request(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return true;
    }
    if !bytes[0].is_ascii_uppercase() {
        return true;
    }
    !contains_subslice(bytes, b"RTSP/1.0")
}

fn is_malformed_response(bytes: &[u8]) -> bool {
    bytes.len() < 12 || &bytes[..9] != b"RTSP/1.0 "
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_success_establishes_session() {
        let mut adapter = RtspAdapter::new();
        adapter.build_request_pred_line(b"SETUP rtsp://host/track1 RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        let line = adapter.build_response_pred_line(
            b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: 12345678\r\nTransport: RTP/AVP;client_port=8000-8001\r\n\r\n",
        );
        assert!(line.contains("status_class=scSUCCESS"));
        assert!(line.contains("cseq_match=true"));
        assert!(adapter.session_established);
        assert_eq!(adapter.session_id, "12345678");
    }

    #[test]
    fn teardown_without_session_is_flagged() {
        let mut adapter = RtspAdapter::new();
        let line = adapter.build_request_pred_line(b"TEARDOWN rtsp://host/track1 RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        assert!(line.contains("teardown_without_session=true"));
    }

    #[test]
    fn keepalive_failure_on_timeout() {
        let mut adapter = RtspAdapter::new();
        adapter.build_request_pred_line(
            b"SETUP rtsp://host/track1 RTSP/1.0\r\nCSeq: 1\r\n\r\n",
        );
        adapter.build_response_pred_line(
            b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: abc\r\n\r\n",
        );
        adapter.build_request_pred_line(b"GET_PARAMETER rtsp://host/track1 RTSP/1.0\r\nCSeq: 2\r\nSession: abc\r\n\r\n");
        // Empty response simulates a dropped keep-alive reply (timeout).
        let line = adapter.build_response_pred_line(b"");
        assert!(line.contains("keepalive_failed=true"));
        assert!(line.contains("timeout=true"));
    }

    #[test]
    fn malformed_request_is_detected() {
        assert!(is_malformed_request(b"garbage"));
        assert!(!is_malformed_request(b"OPTIONS * RTSP/1.0\r\n\r\n"));
    }

    #[test]
    fn cseq_validity_rejects_non_digit_value() {
        assert!(!check_cseq_valid("CSeq: abc"));
        assert!(check_cseq_valid("CSeq: 42"));
    }
}
