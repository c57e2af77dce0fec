//! SIP (RFC 3261) predicate adapter.
//!
//! Tracks a single dialog plus the most recent transaction on that dialog.
//! Grounded on spec.md §4.6's SIP dialog/transaction transition table; no
//! complete reference C source survives for this protocol in the original
//! corpus, so the per-exchange "remember the last request, interpret the
//! matching response" shape is carried over directly from
//! `rtsp_predicate_adapter`'s `LastRequest` pattern rather than ported line
//! for line.

use super::{Direction, PredicateLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    NotSet,
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Other,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::NotSet => "methodNotSet",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Other => "OTHER",
        }
    }

    fn from_token(tok: &str) -> Method {
        match tok {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "" => Method::NotSet,
            _ => Method::Other,
        }
    }
}

/// Per-dialog SIP state.
#[derive(Debug)]
pub struct SipAdapter {
    dialog_state: &'static str,
    registration_state: &'static str,
    last_method: Method,
    has_to_tag: bool,
    auth_required: bool,
    auth_provided: bool,
    invite_in_progress: bool,
    cseq_num: i64,
    msg_id: u64,
}

impl Default for SipAdapter {
    fn default() -> Self {
        SipAdapter {
            dialog_state: "dsNotSet",
            registration_state: "rsNotSet",
            last_method: Method::NotSet,
            has_to_tag: false,
            auth_required: false,
            auth_provided: false,
            invite_in_progress: false,
            cseq_num: 0,
            msg_id: 0,
        }
    }
}

impl SipAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_session(&mut self) {
        *self = SipAdapter::default();
    }

    pub fn build_request_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        let text = String::from_utf8_lossy(bytes);
        let line = text.lines().next().unwrap_or("");
        let malformed = !is_request_line(line);

        let method_tok = if malformed { "" } else { line.split_whitespace().next().unwrap_or("") };
        let method = Method::from_token(method_tok);

        if !malformed {
            self.last_method = method;
            let full = text.as_ref();
            self.cseq_num = parse_cseq(full).unwrap_or(self.cseq_num);
            if has_header_value(full, "Authorization") {
                self.auth_provided = true;
            }
            match method {
                Method::Invite => self.invite_in_progress = true,
                Method::Bye => self.dialog_state = "dsTerminated",
                Method::Cancel => self.invite_in_progress = false,
                _ => {}
            }
        }

        let mut pline = PredicateLine::new();
        pline
            .field("sip_msg_type", "sipRequest")
            .field("sip_method", method.as_str())
            .field("sip_status_code", 0)
            .field("sip_status_class", "scNotSet")
            .field("dialog_state", self.dialog_state)
            .field("transaction_state", "txCalling")
            .field("registration_state", self.registration_state)
            .field("auth_required", self.auth_required)
            .field("auth_provided", self.auth_provided)
            .field("invite_in_progress", self.invite_in_progress)
            .field("has_to_tag", self.has_to_tag)
            .field("max_forwards", parse_max_forwards(&text).unwrap_or(-1))
            .field("content_length", parse_content_length(&text).unwrap_or(0))
            .field("cseq_num", self.cseq_num)
            .field("req_malformed", malformed)
            .field("resp_malformed", false)
            .field("timeout", false);
        pline.finish_with_trace(self.msg_id, Direction::C2S, bytes)
    }

    pub fn build_response_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        let empty = bytes.is_empty();
        let text = String::from_utf8_lossy(bytes);
        let line = text.lines().next().unwrap_or("");
        let malformed = !empty && !is_status_line(line);
        let timeout = empty;

        let code = if !empty && !malformed { parse_status_code(line).unwrap_or(0) } else { 0 };
        let status_class = classify(code);

        if !empty && !malformed {
            if has_header_value(&text, "To") && text_contains_tag(&text, "To") {
                self.has_to_tag = true;
            }

            match (self.last_method, status_class) {
                (Method::Invite, "scProvisional") if self.has_to_tag => {
                    self.dialog_state = "dsEarly";
                }
                (Method::Invite, "scSuccess") => {
                    self.dialog_state = "dsConfirmed";
                    self.invite_in_progress = false;
                }
                (Method::Bye, "scSuccess") => {
                    self.dialog_state = "dsTerminated";
                }
                (Method::Register, "scSuccess") => {
                    self.registration_state = "rsRegistered";
                }
                _ => {}
            }

            if matches!(code, 401 | 407) {
                self.auth_required = true;
            }
        }

        let mut pline = PredicateLine::new();
        pline
            .field("sip_msg_type", "sipResponse")
            .field("sip_method", self.last_method.as_str())
            .field("sip_status_code", code)
            .field("sip_status_class", status_class)
            .field("dialog_state", self.dialog_state)
            .field("transaction_state", transaction_state_for(status_class))
            .field("registration_state", self.registration_state)
            .field("auth_required", self.auth_required)
            .field("auth_provided", self.auth_provided)
            .field("invite_in_progress", self.invite_in_progress)
            .field("has_to_tag", self.has_to_tag)
            .field("max_forwards", -1)
            .field("content_length", parse_content_length(&text).unwrap_or(0))
            .field("cseq_num", self.cseq_num)
            .field("req_malformed", false)
            .field("resp_malformed", malformed)
            .field("timeout", timeout);
        pline.finish_with_trace(self.msg_id, Direction::S2C, bytes)
    }
}

fn is_request_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let _uri = match parts.next() {
        Some(u) => u,
        None => return false,
    };
    let version = parts.next().unwrap_or("");
    !method.is_empty() && version.starts_with("SIP/")
}

fn is_status_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or("");
    let code = parts.next().unwrap_or("");
    version.starts_with("SIP/") && code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit())
}

fn parse_status_code(line: &str) -> Option<i64> {
    line.split_whitespace().nth(1)?.parse().ok()
}

fn classify(code: i64) -> &'static str {
    match code {
        100..=199 => "scProvisional",
        200..=299 => "scSuccess",
        300..=399 => "scRedirect",
        400..=499 => "scClientError",
        500..=599 => "scServerError",
        600..=699 => "scGlobalError",
        _ => "scNotSet",
    }
}

fn transaction_state_for(status_class: &str) -> &'static str {
    match status_class {
        "scProvisional" => "txProceeding",
        "scSuccess" | "scRedirect" | "scClientError" | "scServerError" | "scGlobalError" => "txCompleted",
        _ => "txCalling",
    }
}

fn header_line<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.lines().find(|l| {
        l.len() > name.len()
            && l[..name.len()].eq_ignore_ascii_case(name)
            && l.as_bytes()[name.len()] == b':'
    })
}

fn has_header_value(text: &str, name: &str) -> bool {
    header_line(text, name).is_some()
}

fn text_contains_tag(text: &str, name: &str) -> bool {
    header_line(text, name).map(|l| l.contains("tag=")).unwrap_or(false)
}

fn parse_cseq(text: &str) -> Option<i64> {
    let line = header_line(text, "CSeq")?;
    let rest = line.splitn(2, ':').nth(1)?.trim();
    rest.split_whitespace().next()?.parse().ok()
}

fn parse_max_forwards(text: &str) -> Option<i64> {
    let line = header_line(text, "Max-Forwards")?;
    line.splitn(2, ':').nth(1)?.trim().parse().ok()
}

fn parse_content_length(text: &str) -> Option<i64> {
    let line = header_line(text, "Content-Length")?;
    line.splitn(2, ':').nth(1)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_with_to_tag_provisional_moves_to_early_dialog() {
        let mut adapter = SipAdapter::new();
        adapter.build_request_pred_line(b"INVITE sip:bob@example.com SIP/2.0\r\nCSeq: 1 INVITE\r\n\r\n");
        let line = adapter.build_response_pred_line(
            b"SIP/2.0 180 Ringing\r\nTo: <sip:bob@example.com>;tag=abc\r\n\r\n",
        );
        assert!(line.contains("dialog_state=dsEarly"));
    }

    #[test]
    fn invite_success_confirms_dialog() {
        let mut adapter = SipAdapter::new();
        adapter.build_request_pred_line(b"INVITE sip:bob@example.com SIP/2.0\r\nCSeq: 1 INVITE\r\n\r\n");
        let line = adapter.build_response_pred_line(
            b"SIP/2.0 200 OK\r\nTo: <sip:bob@example.com>;tag=abc\r\n\r\n",
        );
        assert!(line.contains("dialog_state=dsConfirmed"));
        assert!(line.contains("invite_in_progress=false"));
    }

    #[test]
    fn bye_success_terminates_dialog() {
        let mut adapter = SipAdapter::new();
        adapter.build_request_pred_line(b"BYE sip:bob@example.com SIP/2.0\r\nCSeq: 2 BYE\r\n\r\n");
        let line = adapter.build_response_pred_line(b"SIP/2.0 200 OK\r\n\r\n");
        assert!(line.contains("dialog_state=dsTerminated"));
    }

    #[test]
    fn unauthorized_response_sets_auth_required() {
        let mut adapter = SipAdapter::new();
        adapter.build_request_pred_line(b"REGISTER sip:example.com SIP/2.0\r\nCSeq: 1 REGISTER\r\n\r\n");
        let line = adapter.build_response_pred_line(b"SIP/2.0 401 Unauthorized\r\n\r\n");
        assert!(line.contains("auth_required=true"));
    }

    #[test]
    fn register_success_marks_registered() {
        let mut adapter = SipAdapter::new();
        adapter.build_request_pred_line(
            b"REGISTER sip:example.com SIP/2.0\r\nCSeq: 1 REGISTER\r\nAuthorization: Digest\r\n\r\n",
        );
        let line = adapter.build_response_pred_line(b"SIP/2.0 200 OK\r\n\r\n");
        assert!(line.contains("registration_state=rsRegistered"));
        assert!(line.contains("auth_provided=true"));
    }

    #[test]
    fn malformed_request_line_is_flagged() {
        let mut adapter = SipAdapter::new();
        let line = adapter.build_request_pred_line(b"garbage not a sip line\r\n\r\n");
        assert!(line.contains("req_malformed=true"));
        assert!(line.contains("sip_method=methodNotSet"));
    }
}
