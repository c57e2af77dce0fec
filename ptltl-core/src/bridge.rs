//! Synchronous subprocess bridge for embedding `monitor` as a child process
//! of a fuzzing harness.
//!
//! Ported from the reference `monitor_bridge.c`: two pipes (harness→monitor
//! stdin, monitor→harness stdout), line-buffered, with bounded waits on the
//! control-reply stream rather than a blocking read — a hung or crashed
//! monitor process must never stall the fuzzer. `std::process::Child`'s
//! piped stdio plus a background reader thread for stdout stand in for the
//! original's `select()` on the child's fd: a single-threaded poll loop
//! would have to busy-wait, so the control-reply stream is instead drained
//! by a dedicated thread into an `mpsc` channel the bounded waits `recv_timeout`
//! against.
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

/// `end_session`'s bounded wait for `VIOLATION_DETECTED`, mirroring the
/// original's 10ms `select()` timeout.
const END_SESSION_TIMEOUT: Duration = Duration::from_millis(10);

/// `save`/`restore`'s bounded wait for an acknowledgment line, mirroring the
/// original's 50ms `select()` timeout.
const ACK_TIMEOUT: Duration = Duration::from_millis(50);

/// A running `monitor` subprocess plus its piped stdio.
pub struct MonitorHandle {
    child: Child,
    stdin: std::process::ChildStdin,
    stdout_lines: Receiver<String>,
    violation_detected: bool,
}

impl MonitorHandle {
    /// Spawns `eval_path spec_path protocol_tag` with piped stdin/stdout and
    /// starts the background stdout reader.
    pub fn start(eval_path: &str, spec_path: &str, protocol_tag: &str) -> std::io::Result<Self> {
        let mut child = Command::new(eval_path)
            .arg(spec_path)
            .arg(protocol_tag)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take().expect("child stdin was piped");
        let stdout = child.stdout.take().expect("child stdout was piped");

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(MonitorHandle {
            child,
            stdin,
            stdout_lines: rx,
            violation_detected: false,
        })
    }

    /// Writes one event line, flushed immediately (the pipe is the only
    /// buffering layer; there is no user-space line buffer to flush).
    pub fn emit_line(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()
    }

    /// Sends `__END_SESSION__` and waits up to [`END_SESSION_TIMEOUT`] for a
    /// `VIOLATION_DETECTED` reply, recording it for [`Self::check_violation`].
    pub fn end_session(&mut self) -> std::io::Result<()> {
        self.emit_line("__END_SESSION__")?;
        if let Ok(line) = self.stdout_lines.recv_timeout(END_SESSION_TIMEOUT) {
            if line.contains("VIOLATION_DETECTED") {
                self.violation_detected = true;
            }
        }
        Ok(())
    }

    pub fn check_violation(&self) -> bool {
        self.violation_detected
    }

    pub fn clear_violation(&mut self) {
        self.violation_detected = false;
    }

    /// Sends `__SAVE_STATE__ <id>` and waits up to [`ACK_TIMEOUT`] for the
    /// `STATE_SAVED:<id>` acknowledgment. The wait is best-effort, matching
    /// the original: a missed ack does not roll back the save.
    pub fn save(&mut self, snapshot_id: u64) -> std::io::Result<()> {
        self.emit_line(&format!("__SAVE_STATE__ {snapshot_id}"))?;
        let _ = self.stdout_lines.recv_timeout(ACK_TIMEOUT);
        Ok(())
    }

    /// Sends `__RESTORE_STATE__ <id>` and waits up to [`ACK_TIMEOUT`] for the
    /// acknowledgment, returning whether it was `STATE_RESTORED` as opposed
    /// to `STATE_RESTORE_FAILED` or a timeout.
    pub fn restore(&mut self, snapshot_id: u64) -> std::io::Result<bool> {
        self.emit_line(&format!("__RESTORE_STATE__ {snapshot_id}"))?;
        match self.stdout_lines.recv_timeout(ACK_TIMEOUT) {
            Ok(line) => Ok(line.contains(&format!("STATE_RESTORED:{snapshot_id}"))),
            Err(_) => Ok(false),
        }
    }

    /// Closes stdin (sending EOF) and waits for the child to exit.
    pub fn stop(mut self) -> std::io::Result<std::process::ExitStatus> {
        drop(self.stdin);
        self.child.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises the bridge against a one-line shell script standing in for
    /// a real `monitor` binary, since spawning the crate's own binary from a
    /// unit test would require a built artifact.
    fn fake_monitor_script() -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("ptltl-fake-monitor-{}.sh", std::process::id()));
        std::fs::write(
            &path,
            "#!/bin/sh\nwhile IFS= read -r line; do\n  case \"$line\" in\n    __END_SESSION__) echo VIOLATION_DETECTED:1 ;;\n    __SAVE_STATE__*) echo STATE_SAVED:1 ;;\n    __RESTORE_STATE__*) echo STATE_RESTORED:1 ;;\n  esac\ndone\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    #[test]
    #[cfg(unix)]
    fn end_session_detects_violation_reply() {
        let script = fake_monitor_script();
        let mut handle = MonitorHandle::start(script.to_str().unwrap(), "spec", "generic").unwrap();
        handle.end_session().unwrap();
        assert!(handle.check_violation());
        handle.clear_violation();
        assert!(!handle.check_violation());
        let _ = handle.stop();
        let _ = std::fs::remove_file(&script);
    }

    #[test]
    #[cfg(unix)]
    fn save_and_restore_round_trip_acknowledgments() {
        let script = fake_monitor_script();
        let mut handle = MonitorHandle::start(script.to_str().unwrap(), "spec", "generic").unwrap();
        handle.save(1).unwrap();
        assert!(handle.restore(1).unwrap());
        let _ = handle.stop();
        let _ = std::fs::remove_file(&script);
    }
}
