//! `monitor` — runtime ptLTL checker for stateful network protocol
//! conversations.
//!
//! Usage: `monitor <spec-path> [protocol_tag]`. Reads a line-oriented event
//! stream from stdin, writes control replies to stdout, and appends
//! violation records to the file named by `MONITOR_VIOLATION_LOG` (default
//! `violations.log`). Exit codes: 0 on normal EOF, 1 on spec load/parse
//! failure, 2 on type error, 3 on a fatal evaluator error.

use std::io::{self, BufRead, Write};

use ptltl_core::compiler::compile;
use ptltl_core::driver::{Driver, ProtocolTag};
use ptltl_core::error::MonitorError;
use ptltl_core::violation::ViolationLog;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_SPEC_ERROR: i32 = 1;
const EXIT_TYPE_ERROR: i32 = 2;
const EXIT_EVALUATOR_ERROR: i32 = 3;

fn init_logging() {
    let verbose = std::env::var("MONITOR_VERBOSE").as_deref() == Ok("1");
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Manual CLI parsing, matching the teacher binary's own style for a CLI
/// this small: two positionals, no flags beyond an environment variable.
struct Args {
    spec_path: String,
    protocol_tag: String,
}

fn parse_args() -> Option<Args> {
    let mut args = std::env::args().skip(1);
    let spec_path = args.next()?;
    let protocol_tag = args.next().unwrap_or_else(|| "generic".to_string());
    Some(Args { spec_path, protocol_tag })
}

fn main() {
    init_logging();

    let args = match parse_args() {
        Some(a) => a,
        None => {
            eprintln!("usage: monitor <spec-path> [protocol_tag]");
            std::process::exit(EXIT_SPEC_ERROR);
        }
    };

    let src = match std::fs::read_to_string(&args.spec_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to read spec file {}: {e}", args.spec_path);
            std::process::exit(EXIT_SPEC_ERROR);
        }
    };

    let (spec, _ctx) = match compile(&src) {
        Ok(ok) => ok,
        Err(errors) => {
            for e in &errors {
                eprintln!("{e}");
            }
            let exit = if errors.iter().any(is_parse_error) {
                EXIT_SPEC_ERROR
            } else {
                EXIT_TYPE_ERROR
            };
            std::process::exit(exit);
        }
    };

    let log_path =
        std::env::var("MONITOR_VIOLATION_LOG").unwrap_or_else(|_| "violations.log".to_string());
    let violation_log = match ViolationLog::open(&log_path) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("failed to open violation log {log_path}: {e}");
            std::process::exit(EXIT_SPEC_ERROR);
        }
    };

    let tag = ProtocolTag::parse(&args.protocol_tag);
    let mut driver = Driver::new(spec, tag, violation_log);

    info!(spec_path = %args.spec_path, protocol_tag = %args.protocol_tag, "monitor starting");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut control_out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "stdin read error");
                break;
            }
        };
        if let Err(e) = driver.process_line(&line, &mut control_out) {
            error!(error = %e, "fatal evaluator error");
            std::process::exit(EXIT_EVALUATOR_ERROR);
        }
    }

    let _ = control_out.flush();
    std::process::exit(EXIT_OK);
}

fn is_parse_error(e: &MonitorError) -> bool {
    matches!(e, MonitorError::SpecParse { .. })
}
