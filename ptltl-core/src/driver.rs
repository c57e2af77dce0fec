//! The event-stream driver loop.
//!
//! Owns the [`Evaluator`], the session/event counters, the session's event
//! trace, and the per-protocol violation filter described in spec.md §4.7.
//! A [`Driver`] consumes one line at a time; the binary crate owns the
//! stdin/stdout plumbing and calls [`Driver::process_line`] per line.

use std::collections::{HashMap, VecDeque};
use std::io::Write;

use tracing::warn;

use crate::compiler::ast::Spec;
use crate::error::MonitorError;
use crate::evaluator::Evaluator;
use crate::state::State;
use crate::violation::{violated_properties, ViolationLog, ViolationRecord};

/// Reserved event-line keys the driver strips before building a `State`;
/// these are bridge/debug metadata, never referenced by a formula.
const RESERVED_KEYS: [&str; 3] = ["msg_id", "dir", "trace"];

/// How many recent raw-packet hex traces the violation log keeps, per
/// spec.md §5's bounded-resource requirement.
const RECENT_PACKETS_WINDOW: usize = 16;

/// Which protocol's violation filter applies to this run. Selected once at
/// startup from the CLI's optional second positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolTag {
    Ssh,
    Rtsp,
    Dtls,
    Sip,
    Dns,
    Ftp,
    /// Unrecognized or absent tag: report every failed verdict unconditionally.
    Generic,
}

impl ProtocolTag {
    pub fn parse(s: &str) -> ProtocolTag {
        match s {
            "ssh" => ProtocolTag::Ssh,
            "rtsp" => ProtocolTag::Rtsp,
            "dtls" => ProtocolTag::Dtls,
            "sip" => ProtocolTag::Sip,
            "dnsmasq" | "dns" => ProtocolTag::Dns,
            "ftp" => ProtocolTag::Ftp,
            _ => ProtocolTag::Generic,
        }
    }
}

/// `true` if `state` carries the evidence this tag's filter demands before a
/// failed verdict is worth reporting. A field the filter needs but that the
/// event never bound counts as "not satisfied", the same as an explicit
/// `false`/sentinel value would.
fn passes_filter(tag: ProtocolTag, state: &State) -> bool {
    let is = |key: &str, want: &str| state.get_label(key) == Some(want);
    match tag {
        ProtocolTag::Dns => is("response_valid", "true"),
        ProtocolTag::Ssh => is("encrypted", "true") && is("mac_ok", "true"),
        ProtocolTag::Rtsp => is("timeout", "false") && state.get_label("status_class") != Some("scNotSet"),
        ProtocolTag::Dtls => state.get_label("response") != Some("responseNotSet"),
        ProtocolTag::Sip => is("sip_msg_type", "sipResponse") && is("timeout", "false"),
        ProtocolTag::Ftp => {
            is("timeout", "false") && state.get_label("ftp_status_class") != Some("scNotSet")
        }
        ProtocolTag::Generic => true,
    }
}

struct DriverSnapshot {
    event_counter: u64,
    session_trace: Vec<String>,
    recent_packets: VecDeque<String>,
}

/// Drives a compiled spec's evaluator over a line-oriented event stream.
pub struct Driver {
    tag: ProtocolTag,
    spec: Spec,
    evaluator: Evaluator,
    session: u64,
    event_counter: u64,
    session_trace: Vec<String>,
    recent_packets: VecDeque<String>,
    violation_log: ViolationLog,
    snapshots: HashMap<u64, DriverSnapshot>,
}

impl Driver {
    pub fn new(spec: Spec, tag: ProtocolTag, violation_log: ViolationLog) -> Self {
        let evaluator = Evaluator::new(&spec);
        Driver {
            tag,
            spec,
            evaluator,
            session: 0,
            event_counter: 0,
            session_trace: Vec::new(),
            recent_packets: VecDeque::new(),
            violation_log,
            snapshots: HashMap::new(),
        }
    }

    /// Processes one line of input, writing any control reply to
    /// `control_out` (flushed immediately, matching the bridge's expectation
    /// of one reply line per marker). Returns `Err` only for fatal evaluator
    /// errors (an unknown variable); everything else is handled in place.
    pub fn process_line(
        &mut self,
        line: &str,
        control_out: &mut impl Write,
    ) -> Result<(), MonitorError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }
        if line == "__END_SESSION__" {
            self.evaluator.reset_evaluator();
            self.session_trace.clear();
            self.event_counter = 0;
            self.session += 1;
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("__SAVE_STATE__ ") {
            return self.handle_save(rest.trim(), control_out);
        }
        if let Some(rest) = line.strip_prefix("__RESTORE_STATE__ ") {
            return self.handle_restore(rest.trim(), control_out);
        }
        self.process_event_line(line, control_out)
    }

    fn handle_save(&mut self, id_str: &str, control_out: &mut impl Write) -> Result<(), MonitorError> {
        let id: u64 = match id_str.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(id_str, "malformed __SAVE_STATE__ id, ignoring");
                return Ok(());
            }
        };
        self.evaluator.save(id);
        self.snapshots.insert(
            id,
            DriverSnapshot {
                event_counter: self.event_counter,
                session_trace: self.session_trace.clone(),
                recent_packets: self.recent_packets.clone(),
            },
        );
        let _ = writeln!(control_out, "STATE_SAVED:{id}");
        let _ = control_out.flush();
        Ok(())
    }

    fn handle_restore(&mut self, id_str: &str, control_out: &mut impl Write) -> Result<(), MonitorError> {
        let id: u64 = match id_str.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(id_str, "malformed __RESTORE_STATE__ id, ignoring");
                return Ok(());
            }
        };
        match self.evaluator.restore(id) {
            Ok(()) => {
                if let Some(snap) = self.snapshots.get(&id) {
                    self.event_counter = snap.event_counter;
                    self.session_trace = snap.session_trace.clone();
                    self.recent_packets = snap.recent_packets.clone();
                }
                let _ = writeln!(control_out, "STATE_RESTORED:{id}");
            }
            Err(_) => {
                let _ = writeln!(control_out, "STATE_RESTORE_FAILED:{id}");
            }
        }
        let _ = control_out.flush();
        Ok(())
    }

    fn process_event_line(
        &mut self,
        line: &str,
        control_out: &mut impl Write,
    ) -> Result<(), MonitorError> {
        let mut state = State::new(&self.spec);
        let mut trace_hex: Option<String> = None;

        for token in line.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some(kv) => kv,
                None => {
                    warn!(line, token, "malformed event line, skipping");
                    return Ok(());
                }
            };
            if key == "trace" {
                trace_hex = Some(value.to_string());
                continue;
            }
            if RESERVED_KEYS.contains(&key) {
                continue;
            }
            state.add_label(key, value);
        }

        self.event_counter += 1;
        self.session_trace.push(line.to_string());
        if let Some(hex) = trace_hex {
            if self.recent_packets.len() >= RECENT_PACKETS_WINDOW {
                self.recent_packets.pop_front();
            }
            self.recent_packets.push_back(hex);
        }

        let verdicts = self.evaluator.evaluate_one_step(&state)?;
        let failed: Vec<usize> = verdicts
            .iter()
            .enumerate()
            .filter_map(|(idx, &ok)| if ok { None } else { Some(idx) })
            .collect();

        if failed.is_empty() {
            return Ok(());
        }
        if !passes_filter(self.tag, &state) {
            return Ok(());
        }

        let record = ViolationRecord {
            session: self.session,
            event: self.event_counter,
            violated: violated_properties(self.evaluator.formulas(), &failed),
            session_trace: self.session_trace.clone(),
            recent_packets: self.recent_packets.iter().cloned().collect(),
        };
        if let Err(e) = self.violation_log.append(&record) {
            warn!(error = %e, "failed to append violation record");
        }
        let _ = writeln!(control_out, "VIOLATION_DETECTED:{}", self.event_counter);
        let _ = control_out.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn test_driver(src: &str, tag: ProtocolTag) -> (Driver, std::path::PathBuf) {
        let (spec, _ctx) = compile(src).unwrap();
        let path = std::env::temp_dir().join(format!(
            "ptltl-driver-test-{}-{}.jsonl",
            std::process::id(),
            src.len()
        ));
        let _ = std::fs::remove_file(&path);
        let log = ViolationLog::open(&path).unwrap();
        (Driver::new(spec, tag, log), path)
    }

    #[test]
    fn unfiltered_protocol_reports_every_failed_verdict() {
        let (mut driver, path) = test_driver("bool flag;\nf: H(flag == true);\n", ProtocolTag::Generic);
        let mut out = Vec::new();
        driver.process_line("flag=true", &mut out).unwrap();
        driver.process_line("flag=false", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("VIOLATION_DETECTED:2"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn dns_filter_drops_violation_without_response_valid() {
        let (mut driver, path) = test_driver("bool flag;\nf: H(flag == true);\n", ProtocolTag::Dns);
        let mut out = Vec::new();
        driver.process_line("flag=true", &mut out).unwrap();
        driver
            .process_line("flag=false response_valid=false", &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("VIOLATION_DETECTED"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn dns_filter_reports_violation_with_response_valid() {
        let (mut driver, path) = test_driver("bool flag;\nf: H(flag == true);\n", ProtocolTag::Dns);
        let mut out = Vec::new();
        driver.process_line("flag=true", &mut out).unwrap();
        driver
            .process_line("flag=false response_valid=true", &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("VIOLATION_DETECTED:2"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn end_session_resets_evaluator_and_counters() {
        let (mut driver, path) = test_driver("bool flag;\nf: H(flag == true);\n", ProtocolTag::Generic);
        let mut out = Vec::new();
        driver.process_line("flag=false", &mut out).unwrap();
        driver.process_line("__END_SESSION__", &mut out).unwrap();
        assert_eq!(driver.event_counter, 0);
        assert_eq!(driver.session, 1);
        out.clear();
        driver.process_line("flag=true", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("VIOLATION_DETECTED"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn save_and_restore_round_trip_counters_and_verdicts() {
        let (mut driver, path) = test_driver("bool flag;\nf: H(flag == true);\n", ProtocolTag::Generic);
        let mut out = Vec::new();
        driver.process_line("flag=true", &mut out).unwrap();
        out.clear();
        driver.process_line("__SAVE_STATE__ 1", &mut out).unwrap();
        assert!(String::from_utf8(out.clone()).unwrap().contains("STATE_SAVED:1"));

        out.clear();
        driver.process_line("flag=false", &mut out).unwrap();
        assert!(String::from_utf8(out.clone()).unwrap().contains("VIOLATION_DETECTED:2"));
        assert_eq!(driver.event_counter, 2);

        out.clear();
        driver.process_line("__RESTORE_STATE__ 1", &mut out).unwrap();
        assert!(String::from_utf8(out.clone()).unwrap().contains("STATE_RESTORED:1"));
        assert_eq!(driver.event_counter, 1);

        out.clear();
        driver.process_line("flag=true", &mut out).unwrap();
        assert!(!String::from_utf8(out).unwrap().contains("VIOLATION_DETECTED"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn restore_unknown_snapshot_replies_failed() {
        let (mut driver, path) = test_driver("bool flag;\nf: H(flag == true);\n", ProtocolTag::Generic);
        let mut out = Vec::new();
        driver.process_line("__RESTORE_STATE__ 42", &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("STATE_RESTORE_FAILED:42"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_token_skips_line_without_fatal_error() {
        let (mut driver, path) = test_driver("bool flag;\nf: flag == true;\n", ProtocolTag::Generic);
        let mut out = Vec::new();
        assert!(driver.process_line("flag", &mut out).is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unknown_variable_is_fatal() {
        let (mut driver, path) = test_driver("bool flag;\nf: flag == true;\n", ProtocolTag::Generic);
        let mut out = Vec::new();
        assert!(driver.process_line("other=1", &mut out).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
