use thiserror::Error;

/// Errors that can arise while compiling a ptLTL specification or while
/// driving the runtime evaluator over a live event stream.
///
/// Parsing and type errors are fatal at startup; the rest are handled by the
/// driver loop on a per-line basis and never abort the process outright.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("parse error at {line}:{col}: {message}")]
    SpecParse {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("type error in formula #{formula_index}: {reason}")]
    Type {
        formula_index: usize,
        reason: String,
    },

    #[error("unknown variable `{name}` referenced by formula #{formula_index}")]
    UnknownVariable { formula_index: usize, name: String },

    #[error("malformed event line {line_no}: {reason}")]
    MalformedEventLine { line_no: usize, reason: String },

    #[error("malformed packet ({protocol}, dir={direction}): {reason}")]
    MalformedPacket {
        protocol: &'static str,
        direction: &'static str,
        reason: String,
    },

    #[error("adapter buffer overflow: needed {needed} bytes, had {available}")]
    AdapterBufferOverflow { needed: usize, available: usize },

    #[error("no snapshot saved under id {id}")]
    SnapshotMissing { id: u64 },
}

pub type Result<T> = std::result::Result<T, MonitorError>;
