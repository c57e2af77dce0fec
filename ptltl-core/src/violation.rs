//! Append-only violation log.
//!
//! One JSON object per line (grounded on the teacher workspace's
//! `serde_json`-based event logging in `bpmn-lite-core`): session counter,
//! event counter, the violated formulas' indices and textual renderings, the
//! full session KV trace, and the recent raw-packet hex window. Kept as
//! line-delimited JSON rather than a single growing array so a crashed
//! monitor leaves a log that is still readable up to its last flushed line.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::compiler::ast::Formula;
use crate::error::MonitorError;

/// One violated top-level formula, named by index and rendered as text.
#[derive(Debug, Clone, Serialize)]
pub struct ViolatedProperty {
    pub index: usize,
    pub name: String,
    pub rendering: String,
}

/// One reported violation record.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub session: u64,
    pub event: u64,
    pub violated: Vec<ViolatedProperty>,
    /// Every event line seen so far in the current session, in order.
    pub session_trace: Vec<String>,
    /// Hex-encoded raw bytes of the most recent packets, oldest first.
    pub recent_packets: Vec<String>,
}

/// Builds a [`ViolatedProperty`] list for every `false` verdict whose index
/// is in `failed_indices`, rendering each formula's root via its `Display`
/// impl.
pub fn violated_properties(formulas: &[Formula], failed_indices: &[usize]) -> Vec<ViolatedProperty> {
    failed_indices
        .iter()
        .map(|&idx| {
            let formula = &formulas[idx];
            ViolatedProperty {
                index: idx,
                name: formula.name.clone(),
                rendering: formula.root.to_string(),
            }
        })
        .collect()
}

/// Append-only writer over a single log file, flushed after every record so
/// a killed process never loses an already-reported violation.
#[derive(Debug)]
pub struct ViolationLog {
    writer: BufWriter<File>,
}

impl ViolationLog {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(ViolationLog {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, record: &ViolationRecord) -> Result<(), MonitorError> {
        let line = serde_json::to_string(record).map_err(|e| MonitorError::MalformedEventLine {
            line_no: record.event as usize,
            reason: format!("failed to serialize violation record: {e}"),
        })?;
        writeln!(self.writer, "{line}").map_err(|e| MonitorError::MalformedEventLine {
            line_no: record.event as usize,
            reason: format!("failed to write violation log: {e}"),
        })?;
        self.writer.flush().map_err(|e| MonitorError::MalformedEventLine {
            line_no: record.event as usize,
            reason: format!("failed to flush violation log: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    #[test]
    fn violated_properties_renders_textual_formula() {
        let (spec, _ctx) = compile("bool flag;\nf: H(flag == true);\n").unwrap();
        let violated = violated_properties(&spec.formulas, &[0]);
        assert_eq!(violated.len(), 1);
        assert_eq!(violated[0].name, "f");
        assert_eq!(violated[0].rendering, "H(flag == true)");
    }

    #[test]
    fn append_writes_one_json_line_per_record() {
        let path = std::env::temp_dir().join(format!(
            "ptltl-violation-log-test-{}.jsonl",
            std::process::id()
        ));
        let mut log = ViolationLog::open(&path).unwrap();
        let record = ViolationRecord {
            session: 0,
            event: 1,
            violated: vec![],
            session_trace: vec!["a=1".into()],
            recent_packets: vec!["de ad be ef".into()],
        };
        log.append(&record).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"session\":0"));
        let _ = std::fs::remove_file(&path);
    }
}
