//! FTP (RFC 959) predicate adapter.
//!
//! Grounded on spec.md §4.6's FTP design and on the reference
//! `ftp_predicate_adapter.c`'s documented fix log ("sequence number
//! increments on BOTH commands and responses", "command inference from
//! response codes if command missed"). The latter is the evidence-gating
//! rule this module is careful to preserve: a response code must never be
//! used to *fabricate* a command the adapter did not actually see, even
//! though prior revisions of the reference source tried exactly that.

use super::{Direction, PredicateLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastCommand {
    NotSet,
    User,
    Pass,
    Retr,
    Stor,
    Port,
    Pasv,
    Rnfr,
    Rnto,
    Rein,
    Other,
}

impl LastCommand {
    fn as_enum_str(self) -> &'static str {
        match self {
            LastCommand::NotSet => "cmdNotSet",
            LastCommand::User => "cmdUSER",
            LastCommand::Pass => "cmdPASS",
            LastCommand::Retr => "cmdRETR",
            LastCommand::Stor => "cmdSTOR",
            LastCommand::Port => "cmdPORT",
            LastCommand::Pasv => "cmdPASV",
            LastCommand::Rnfr => "cmdRNFR",
            LastCommand::Rnto => "cmdRNTO",
            LastCommand::Rein => "cmdREIN",
            LastCommand::Other => "cmdOTHER",
        }
    }

    fn from_verb(verb: &str) -> LastCommand {
        match verb {
            "USER" => LastCommand::User,
            "PASS" => LastCommand::Pass,
            "RETR" => LastCommand::Retr,
            "STOR" => LastCommand::Stor,
            "PORT" => LastCommand::Port,
            "PASV" => LastCommand::Pasv,
            "RNFR" => LastCommand::Rnfr,
            "RNTO" => LastCommand::Rnto,
            "REIN" => LastCommand::Rein,
            "" => LastCommand::NotSet,
            _ => LastCommand::Other,
        }
    }
}

/// Per-session FTP control-channel state.
#[derive(Debug)]
pub struct FtpAdapter {
    sequence: u64,
    user_sent: bool,
    pass_sent: bool,
    login_successful: bool,
    data_mode: &'static str,
    transfer_state: &'static str,
    rename_pending: bool,
    last_command: LastCommand,
    /// Whether `last_command` came from an actually-parsed verb rather
    /// than being left over from before a malformed line. The evaluator
    /// must not let a garbled line's response reuse a stale real command.
    last_command_evidence: bool,
    msg_id: u64,
}

impl Default for FtpAdapter {
    fn default() -> Self {
        FtpAdapter {
            sequence: 0,
            user_sent: false,
            pass_sent: false,
            login_successful: false,
            data_mode: "modeNotSet",
            transfer_state: "xferNone",
            rename_pending: false,
            last_command: LastCommand::NotSet,
            last_command_evidence: false,
            msg_id: 0,
        }
    }
}

impl FtpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_session(&mut self) {
        *self = FtpAdapter::default();
    }

    pub fn build_request_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        self.sequence += 1;

        let text = String::from_utf8_lossy(bytes);
        let line_text = text.lines().next().unwrap_or("").trim_end_matches('\r');
        let malformed = is_malformed_command(line_text);

        let verb = if malformed { "" } else { parse_verb(line_text) };
        let cmd = LastCommand::from_verb(&verb);

        if !malformed {
            self.last_command = cmd;
            self.last_command_evidence = true;
            match cmd {
                LastCommand::User => self.user_sent = true,
                LastCommand::Pass => self.pass_sent = true,
                LastCommand::Port => self.data_mode = "modePORT",
                LastCommand::Pasv => self.data_mode = "modePASV",
                LastCommand::Retr | LastCommand::Stor => self.transfer_state = "xferActive",
                LastCommand::Rnfr => self.rename_pending = true,
                _ => {}
            }
        } else {
            self.last_command = LastCommand::NotSet;
            self.last_command_evidence = false;
        }

        let mut pline = PredicateLine::new();
        pline
            .field("ftp_command", self.last_command.as_enum_str())
            .field("ftp_response_code", 0)
            .field("ftp_status_class", "scNotSet")
            .field("cmd_malformed", malformed)
            .field("resp_malformed", false)
            .field("user_sent", self.user_sent)
            .field("pass_sent", self.pass_sent)
            .field("login_successful", self.login_successful)
            .field("data_mode", self.data_mode)
            .field("transfer_state", self.transfer_state)
            .field("rename_pending", self.rename_pending)
            .field("sequence_num", self.sequence)
            .field("timeout", false);
        pline.finish_with_trace(self.msg_id, Direction::C2S, bytes)
    }

    pub fn build_response_pred_line(&mut self, bytes: &[u8]) -> String {
        self.msg_id += 1;
        self.sequence += 1;

        let empty = bytes.is_empty();
        let timeout = empty;
        let text = String::from_utf8_lossy(bytes);
        let line_text = text.lines().next().unwrap_or("").trim_end_matches('\r');
        let malformed = !empty && is_malformed_response(line_text);

        let code = if !empty && !malformed { parse_code(line_text) } else { 0 };
        let status_class = classify(code);
        let evidence = self.last_command_evidence;

        if evidence && self.last_command == LastCommand::Pass && code == 230 {
            self.login_successful = true;
        }

        if evidence && matches!(self.last_command, LastCommand::Retr | LastCommand::Stor) {
            if is_success(code) {
                self.transfer_state = "xferComplete";
            } else if matches!(status_class, "scTransientError" | "scPermanentError") {
                self.transfer_state = "xferAborted";
            }
        }

        if evidence && self.last_command == LastCommand::Rnto && is_success(code) {
            self.rename_pending = false;
        }

        if evidence && self.last_command == LastCommand::Rein && is_success(code) {
            let sequence = self.sequence;
            *self = FtpAdapter {
                sequence,
                ..FtpAdapter::default()
            };
        }

        let mut pline = PredicateLine::new();
        pline
            .field("ftp_command", self.last_command.as_enum_str())
            .field("ftp_response_code", code)
            .field("ftp_status_class", status_class)
            .field("cmd_malformed", false)
            .field("resp_malformed", malformed)
            .field("user_sent", self.user_sent)
            .field("pass_sent", self.pass_sent)
            .field("login_successful", self.login_successful)
            .field("data_mode", self.data_mode)
            .field("transfer_state", self.transfer_state)
            .field("rename_pending", self.rename_pending)
            .field("sequence_num", self.sequence)
            .field("timeout", timeout);
        pline.finish_with_trace(self.msg_id, Direction::S2C, bytes)
    }
}

fn parse_verb(line: &str) -> String {
    line.split_whitespace().next().unwrap_or("").to_ascii_uppercase()
}

/// A command line must start with an uppercase ASCII letter and consist
/// entirely of a verb (plus optional argument); anything else — binary
/// garbage, lowercase noise, an empty line — is malformed.
fn is_malformed_command(line: &str) -> bool {
    let verb = line.split_whitespace().next().unwrap_or("");
    verb.is_empty() || !verb.bytes().all(|b| b.is_ascii_alphabetic()) || verb != verb.to_ascii_uppercase()
}

fn is_malformed_response(line: &str) -> bool {
    line.len() < 4 || !line.as_bytes()[..3].iter().all(u8::is_ascii_digit)
}

fn parse_code(line: &str) -> i64 {
    line.get(..3).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0)
}

fn classify(code: i64) -> &'static str {
    match code {
        100..=199 => "scPreliminary",
        200..=299 => "scSuccess",
        300..=399 => "scIntermediate",
        400..=499 => "scTransientError",
        500..=599 => "scPermanentError",
        _ => "scNotSet",
    }
}

fn is_success(code: i64) -> bool {
    (200..300).contains(&code)
}
