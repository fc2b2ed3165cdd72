// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 db-tunnel Contributors

// Process table access and signal delivery
//
// Discovery works by text-matching full process-table lines, which is
// inherently fragile (a key path that is a prefix of another key path will
// false-positive). The trait keeps that backend swappable per platform
// without changing callers; the shipped backend preserves the original
// `ps aux` matching semantics.

use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// OS process identifier. Valid only while the process lives; callers
    /// re-derive it on every call rather than caching it.
    pub pid: u32,
    /// The full process-table line, command-line arguments included.
    pub line: String,
}

/// Process inspection and control seam.
///
/// Everything the tunnel operations need from the OS: enumerate processes
/// with their command lines, launch a detached process, and deliver a
/// termination signal.
pub trait ProcessHost {
    /// Snapshot of all running processes with full command lines.
    fn snapshot(&self) -> Result<Vec<ProcessEntry>>;

    /// Launch `args` as a background process and return without waiting.
    fn spawn_detached(&self, args: &[String]) -> Result<()>;

    /// Best-effort termination of `pid`. Failures (no such process,
    /// insufficient permission) are not surfaced.
    fn terminate(&self, pid: u32);
}

/// `ProcessHost` backed by `ps aux` and `SIGTERM`.
#[derive(Debug, Default)]
pub struct SystemProcessHost;

impl SystemProcessHost {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessHost for SystemProcessHost {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>> {
        let output = Command::new("ps")
            .arg("aux")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ProcessTable(format!("failed to run ps: {}", e)))?;

        let text = String::from_utf8(output.stdout)
            .map_err(|e| Error::ProcessTable(format!("undecodable ps output: {}", e)))?;

        Ok(parse_snapshot(&text))
    }

    fn spawn_detached(&self, args: &[String]) -> Result<()> {
        let (program, rest) = args.split_first().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ))
        })?;

        debug!("Spawning detached: {:?}", args);

        Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        // The child daemonizes itself (ssh -f); its exit status is
        // deliberately not collected.
        Ok(())
    }

    fn terminate(&self, pid: u32) {
        // SIGTERM, same as the `kill` command. Best-effort: the process may
        // already be gone, or owned by someone else.
        let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if rc != 0 {
            warn!("SIGTERM to pid {} failed (already exited?)", pid);
        }
    }
}

/// Parse `ps aux` output into entries. In BSD format the pid is the second
/// whitespace-separated field; lines without a numeric pid there (the
/// header) are skipped.
fn parse_snapshot(text: &str) -> Vec<ProcessEntry> {
    text.lines()
        .filter_map(|line| {
            let pid = line.split_whitespace().nth(1)?.parse::<u32>().ok()?;
            Some(ProcessEntry {
                pid,
                line: line.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS_OUTPUT: &str = "\
USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND
root           1  0.0  0.1 167744 11788 ?        Ss   Jan01   0:04 /sbin/init
alice       4242  0.0  0.0  13708  6820 ?        Ss   10:00   0:00 ssh -i /tmp/k.pem -f -N -L 3306:10.0.0.5:3306 ubuntu@1.2.3.4 -v
alice       4300  0.0  0.0   9044  5200 pts/0    Ss   10:01   0:00 -bash";

    #[test]
    fn parses_pids_and_keeps_full_lines() {
        let entries = parse_snapshot(PS_OUTPUT);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].pid, 1);
        assert_eq!(entries[1].pid, 4242);
        assert!(entries[1].line.contains("ssh -i /tmp/k.pem"));
        assert!(entries[1].line.starts_with("alice"));
    }

    #[test]
    fn skips_header_line() {
        let entries = parse_snapshot(PS_OUTPUT);
        assert!(entries.iter().all(|e| !e.line.starts_with("USER")));
    }

    #[test]
    fn empty_output_yields_no_entries() {
        assert!(parse_snapshot("").is_empty());
    }
}
