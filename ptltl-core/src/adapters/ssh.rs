//! SSH transport/userauth/connection predicate adapter.
//!
//! Ported from the reference `ssh_predicate_adapter.c`. That source treats
//! `buf[0]` of the already-framed payload as the SSH message type byte —
//! it does not re-parse packet length/padding/MAC framing, trusting the
//! harness to hand it the decrypted-or-plaintext payload directly. The
//! plaintext `"SSH-"` identification banner is recognized as a distinct
//! non-packet event rather than forced through the message-type switch.

use super::{read_u32_be, Direction, PredicateLine};

const MSG_DISCONNECT: u8 = 1;
const MSG_UNIMPLEMENTED: u8 = 3;
const MSG_SERVICE_REQUEST: u8 = 5;
const MSG_SERVICE_ACCEPT: u8 = 6;
const MSG_KEXINIT: u8 = 20;
const MSG_NEWKEYS: u8 = 21;
const MSG_KEXDH_INIT: u8 = 30;
const MSG_KEXDH_REPLY: u8 = 31;
const MSG_USERAUTH_REQUEST: u8 = 50;
const MSG_USERAUTH_FAILURE: u8 = 51;
const MSG_USERAUTH_SUCCESS: u8 = 52;
const MSG_USERAUTH_BANNER: u8 = 53;
const MSG_GLOBAL_REQUEST: u8 = 80;
const MSG_REQUEST_SUCCESS: u8 = 81;
const MSG_REQUEST_FAILURE: u8 = 82;
const MSG_CHANNEL_OPEN: u8 = 90;
const MSG_CHANNEL_OPEN_CONFIRMATION: u8 = 91;
const MSG_CHANNEL_OPEN_FAILURE: u8 = 92;
const MSG_CHANNEL_WINDOW_ADJUST: u8 = 93;
const MSG_CHANNEL_DATA: u8 = 94;
const MSG_CHANNEL_EOF: u8 = 96;
const MSG_CHANNEL_CLOSE: u8 = 97;
const MSG_CHANNEL_REQUEST: u8 = 98;

/// Per-session SSH key-exchange/userauth state.
#[derive(Debug, Default)]
pub struct SshAdapter {
    auth_attempts: u32,
    last_auth_method_none: bool,
    seen_client_newkeys: bool,
    seen_server_newkeys: bool,
    msg_id: u64,
}

impl SshAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_session(&mut self) {
        *self = SshAdapter::default();
    }

    pub fn build_request_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        if is_ssh_banner(bytes) {
            return self.banner_line(bytes, "requestNotSet", "responseNotSet", Direction::C2S);
        }

        let t = msg_type(bytes);
        let req_enum = request_enum_for_type(t);

        if t == MSG_NEWKEYS {
            self.seen_client_newkeys = true;
        }

        let mut is_auth_method_none = self.last_auth_method_none;
        if t == MSG_USERAUTH_REQUEST {
            self.auth_attempts += 1;
            is_auth_method_none = parse_userauth_method_is_none(bytes);
            self.last_auth_method_none = is_auth_method_none;
        }

        let chan_data_len = if t == MSG_CHANNEL_DATA { channel_data_len(bytes) } else { 0 };

        let mut line = PredicateLine::new();
        line.field("request", req_enum)
            .field("response", "responseNotSet")
            .field("encrypted", self.encrypted_now())
            .field("mac_ok", true)
            .field("hostkey_present", false)
            .field("sig_ok", false)
            .field("pkt_len", bytes.len() as i64)
            .field("pad_len", -1)
            .field("chan_data_len", chan_data_len)
            .field("auth_attempts", self.auth_attempts)
            .field("is_auth_method_none", is_auth_method_none);
        line.finish_with_trace(self.msg_id, Direction::C2S, bytes)
    }

    pub fn build_response_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        if is_ssh_banner(bytes) {
            return self.banner_line(bytes, "requestNotSet", "s2c_banner", Direction::S2C);
        }

        let t = msg_type(bytes);
        let resp_enum = response_enum_for_type(t);

        if t == MSG_NEWKEYS {
            self.seen_server_newkeys = true;
        }

        // The reference adapter does not parse the host key / signature
        // blobs inside KEXDH_REPLY; it marks both present to avoid false
        // positives until deeper parsing is implemented. Carried forward
        // unchanged.
        let (hostkey_present, sig_ok) = if t == MSG_KEXDH_REPLY { (true, true) } else { (false, false) };

        let chan_data_len = if t == MSG_CHANNEL_DATA { channel_data_len(bytes) } else { 0 };

        let mut line = PredicateLine::new();
        line.field("request", "requestNotSet")
            .field("response", resp_enum)
            .field("encrypted", self.encrypted_now())
            .field("mac_ok", true)
            .field("hostkey_present", hostkey_present)
            .field("sig_ok", sig_ok)
            .field("pkt_len", bytes.len() as i64)
            .field("pad_len", -1)
            .field("chan_data_len", chan_data_len)
            .field("auth_attempts", self.auth_attempts)
            .field("is_auth_method_none", self.last_auth_method_none);
        line.finish_with_trace(self.msg_id, Direction::S2C, bytes)
    }

    fn banner_line(&mut self, bytes: &[u8], req: &str, resp: &str, dir: Direction) -> String {
        let mut line = PredicateLine::new();
        line.field("request", req)
            .field("response", resp)
            .field("encrypted", false)
            .field("mac_ok", true)
            .field("hostkey_present", false)
            .field("sig_ok", false)
            .field("pkt_len", bytes.len() as i64)
            .field("pad_len", -1)
            .field("chan_data_len", 0)
            .field("auth_attempts", self.auth_attempts)
            .field("is_auth_method_none", self.last_auth_method_none);
        line.finish_with_trace(self.msg_id, dir, bytes)
    }

    /// Both sides must have exchanged NEWKEYS before traffic is
    /// considered encrypted — a one-sided NEWKEYS (e.g. a fuzzer
    /// skipping the server's) must not flip this early.
    fn encrypted_now(&self) -> bool {
        self.seen_client_newkeys && self.seen_server_newkeys
    }
}

fn msg_type(bytes: &[u8]) -> u8 {
    bytes.first().copied().unwrap_or(0)
}

fn is_ssh_banner(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..4] == b"SSH-"
}

fn read_ssh_string(bytes: &[u8], off: &mut usize) -> Option<()> {
    let len = read_u32_be(bytes, *off)? as usize;
    let start = *off + 4;
    if start + len > bytes.len() {
        return None;
    }
    *off = start + len;
    Some(())
}

/// RFC 4252 `USERAUTH_REQUEST`: `byte type, string user, string service,
/// string method, ...`. Returns whether the method name is literally
/// `"none"`.
fn parse_userauth_method_is_none(bytes: &[u8]) -> bool {
    if bytes.len() < 2 {
        return false;
    }
    let mut off = 1usize;
    if read_ssh_string(bytes, &mut off).is_none() {
        return false;
    }
    if read_ssh_string(bytes, &mut off).is_none() {
        return false;
    }
    let method_len = match read_u32_be(bytes, off) {
        Some(l) => l as usize,
        None => return false,
    };
    let method_start = off + 4;
    match bytes.get(method_start..method_start + method_len) {
        Some(method) => method == b"none",
        None => false,
    }
}

/// RFC 4254 `CHANNEL_DATA`: `byte type, uint32 recipient, string data`.
fn channel_data_len(bytes: &[u8]) -> i64 {
    if bytes.len() < 1 + 4 + 4 {
        return 0;
    }
    let data_len = match read_u32_be(bytes, 5) {
        Some(l) => l as usize,
        None => return 0,
    };
    if 9 + data_len > bytes.len() {
        return 0;
    }
    data_len as i64
}

fn request_enum_for_type(t: u8) -> &'static str {
    match t {
        MSG_KEXINIT => "c2s_kexinit",
        MSG_NEWKEYS => "c2s_newkeys_request",
        MSG_KEXDH_INIT => "c2s_kexdh_init",
        MSG_SERVICE_REQUEST => "c2s_service_request_userauth",
        MSG_USERAUTH_REQUEST => "c2s_userauth_request",
        MSG_CHANNEL_OPEN => "c2s_channel_open",
        MSG_CHANNEL_WINDOW_ADJUST => "c2s_channel_window_adjust",
        MSG_CHANNEL_DATA => "c2s_channel_data",
        MSG_CHANNEL_EOF => "c2s_channel_eof",
        MSG_CHANNEL_CLOSE => "c2s_channel_close",
        MSG_CHANNEL_REQUEST => "c2s_channel_request",
        MSG_GLOBAL_REQUEST => "c2s_global_request",
        MSG_DISCONNECT => "c2s_disconnect",
        MSG_UNIMPLEMENTED => "c2s_unimplemented",
        _ => "requestNotSet",
    }
}

fn response_enum_for_type(t: u8) -> &'static str {
    match t {
        MSG_KEXINIT => "s2c_kexinit",
        MSG_NEWKEYS => "s2c_newkeys_response",
        MSG_KEXDH_REPLY => "s2c_kexdh_reply",
        MSG_SERVICE_ACCEPT => "s2c_service_accept_userauth",
        MSG_USERAUTH_FAILURE => "s2c_userauth_failure",
        MSG_USERAUTH_SUCCESS => "s2c_userauth_success",
        MSG_USERAUTH_BANNER => "s2c_userauth_banner",
        MSG_CHANNEL_OPEN_CONFIRMATION => "s2c_channel_open_confirmation",
        MSG_CHANNEL_OPEN_FAILURE => "s2c_channel_open_failure",
        MSG_CHANNEL_WINDOW_ADJUST => "s2c_channel_window_adjust",
        MSG_CHANNEL_DATA => "s2c_channel_data",
        MSG_CHANNEL_EOF => "s2c_channel_eof",
        MSG_CHANNEL_CLOSE => "s2c_channel_close",
        MSG_REQUEST_SUCCESS | MSG_REQUEST_FAILURE => "s2c_global_request_response",
        MSG_DISCONNECT => "s2c_disconnect",
        MSG_UNIMPLEMENTED => "s2c_unimplemented",
        _ => "responseNotSet",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn userauth_request_none(user: &str) -> Vec<u8> {
        let mut buf = vec![MSG_USERAUTH_REQUEST];
        for s in [user, "ssh-connection", "none"] {
            buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        buf
    }

    #[test]
    fn banner_is_recognized_as_non_packet_event() {
        let mut adapter = SshAdapter::new();
        let line = adapter.build_response_pred_line(b"SSH-2.0-OpenSSH_9.0\r\n");
        assert!(line.contains("response=s2c_banner"));
        assert!(line.contains("encrypted=false"));
    }

    #[test]
    fn encryption_requires_both_sides_newkeys() {
        let mut adapter = SshAdapter::new();
        adapter.build_request_pred_line(&[MSG_NEWKEYS]);
        let line = adapter.build_request_pred_line(&[MSG_CHANNEL_DATA, 0, 0, 0, 1, 0, 0, 0, 0]);
        assert!(line.contains("encrypted=false"));
        adapter.build_response_pred_line(&[MSG_NEWKEYS]);
        let line = adapter.build_request_pred_line(&[MSG_CHANNEL_DATA, 0, 0, 0, 1, 0, 0, 0, 0]);
        assert!(line.contains("encrypted=true"));
    }

    #[test]
    fn userauth_none_method_is_flagged() {
        let mut adapter = SshAdapter::new();
        let line = adapter.build_request_pred_line(&userauth_request_none("root"));
        assert!(line.contains("request=c2s_userauth_request"));
        assert!(line.contains("is_auth_method_none=true"));
        assert!(line.contains("auth_attempts=1"));
    }

    #[test]
    fn request_builder_never_sets_response_enum() {
        let mut adapter = SshAdapter::new();
        let line = adapter.build_request_pred_line(&[MSG_KEXINIT]);
        assert!(line.contains("response=responseNotSet"));
    }

    #[test]
    fn response_builder_never_sets_request_enum() {
        let mut adapter = SshAdapter::new();
        let line = adapter.build_response_pred_line(&[MSG_KEXDH_REPLY]);
        assert!(line.contains("request=requestNotSet"));
        assert!(line.contains("hostkey_present=true"));
    }

    #[test]
    fn reset_session_clears_auth_and_kex_progress() {
        let mut adapter = SshAdapter::new();
        adapter.build_request_pred_line(&[MSG_NEWKEYS]);
        adapter.build_response_pred_line(&[MSG_NEWKEYS]);
        assert!(adapter.encrypted_now());
        adapter.reset_session();
        assert!(!adapter.encrypted_now());
    }
}
