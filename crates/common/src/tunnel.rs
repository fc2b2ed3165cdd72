// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 db-tunnel Contributors

// Tunnel operations: open, discover, list, kill
//
// A tunnel is an external `ssh -f -N -L` process. Nothing here keeps a
// handle to it after spawn; discovery re-reads the process table on every
// call and matches on the resolved key-file path. The documented assumption
// is one concurrent tunnel per key file.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::process::{ProcessEntry, ProcessHost};
use crate::sink::StatusSink;

/// Parameters of one SSH local port-forward to a database.
///
/// The local bind port equals the database port, so clients connect to
/// `127.0.0.1:<db_port>` exactly as they would to the real endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Private key authenticating to the jump host.
    pub key_path: PathBuf,
    /// Database endpoint as seen from the jump host (private IP or DNS name).
    pub db_host: String,
    /// Database port, also used as the local bind port.
    pub db_port: u16,
    /// OS user on the jump host.
    pub jump_user: String,
    /// Public address of the jump host.
    pub jump_host: String,
}

impl TunnelSpec {
    /// The key path made absolute against the current directory, without
    /// touching the filesystem. Discovery matches on this exact string.
    pub fn resolved_key_path(&self) -> Result<PathBuf> {
        Ok(std::path::absolute(&self.key_path)?)
    }

    /// The full `ssh` argument list: authenticate with the key file, go to
    /// the background after auth (`-f`), run no remote command (`-N`), and
    /// forward the local database port through the jump host (`-L`).
    pub fn to_args(&self) -> Result<Vec<String>> {
        let key = self.resolved_key_path()?;
        Ok(vec![
            "ssh".to_string(),
            "-i".to_string(),
            key.display().to_string(),
            "-f".to_string(),
            "-N".to_string(),
            "-L".to_string(),
            format!("{}:{}:{}", self.db_port, self.db_host, self.db_port),
            format!("{}@{}", self.jump_user, self.jump_host),
            "-v".to_string(),
        ])
    }
}

/// Open a tunnel: validate the key file, echo the command line to the sink,
/// and spawn the ssh process detached.
///
/// Returns the constructed argument list as soon as the spawn request is
/// issued. No readiness probe is performed; use [`verify_tunnel`] for that.
///
/// [`verify_tunnel`]: crate::verify::verify_tunnel
pub fn open_tunnel(
    spec: &TunnelSpec,
    host: &dyn ProcessHost,
    sink: &dyn StatusSink,
) -> Result<Vec<String>> {
    let key = spec.resolved_key_path()?;
    if !key.exists() {
        return Err(Error::KeyFileNotFound(key));
    }

    let args = spec.to_args()?;

    sink.line("Open ssh tunnel by running the following command:");
    sink.line("");
    sink.line(&format!("  {}", args.join(" ")));

    host.spawn_detached(&args)?;
    Ok(args)
}

/// PIDs of running tunnels created from `key_path`.
///
/// A process counts as a tunnel when its process-table line contains the
/// token `ssh` and the resolved key path as a substring. No match is not an
/// error; the result is simply empty.
pub fn find_tunnel_pids(key_path: &Path, host: &dyn ProcessHost) -> Result<Vec<u32>> {
    Ok(matching_entries(key_path, host)?
        .into_iter()
        .map(|e| e.pid)
        .collect())
}

/// Report the full process-table line of every running tunnel for `key_path`
/// to the sink, or a message that none exist.
pub fn list_tunnels(key_path: &Path, host: &dyn ProcessHost, sink: &dyn StatusSink) -> Result<()> {
    let entries = matching_entries(key_path, host)?;

    if entries.is_empty() {
        sink.line("There's NO existing SSH tunnel.");
    } else {
        sink.line("List SSH tunnel ...");
        sink.line("");
        for entry in &entries {
            sink.line(&entry.line);
        }
    }

    Ok(())
}

/// Terminate every running tunnel for `key_path`, best-effort.
///
/// Each discovered PID gets one SIGTERM; neither exit nor delivery is
/// verified and nothing is retried. Returns the PIDs that were targeted.
pub fn kill_tunnels(
    key_path: &Path,
    host: &dyn ProcessHost,
    sink: &dyn StatusSink,
) -> Result<Vec<u32>> {
    let pids = find_tunnel_pids(key_path, host)?;

    if pids.is_empty() {
        sink.line("There's NO existing SSH tunnel to kill.");
    } else {
        for &pid in &pids {
            sink.line(&format!("Found pid {}, try to kill it", pid));
            host.terminate(pid);
        }
    }

    Ok(pids)
}

fn matching_entries(key_path: &Path, host: &dyn ProcessHost) -> Result<Vec<ProcessEntry>> {
    let key = std::path::absolute(key_path)?.display().to_string();
    debug!("Scanning process table for ssh processes matching {}", key);

    Ok(host
        .snapshot()?
        .into_iter()
        .filter(|e| e.line.contains("ssh") && e.line.contains(&key))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::process::ProcessEntry;
    use crate::sink::MemorySink;

    /// In-memory process host recording spawns and terminations.
    struct FakeHost {
        entries: Vec<ProcessEntry>,
        spawned: RefCell<Vec<Vec<String>>>,
        terminated: RefCell<Vec<u32>>,
    }

    impl FakeHost {
        fn with_entries(entries: Vec<(u32, &str)>) -> Self {
            Self {
                entries: entries
                    .into_iter()
                    .map(|(pid, line)| ProcessEntry {
                        pid,
                        line: line.to_string(),
                    })
                    .collect(),
                spawned: RefCell::new(Vec::new()),
                terminated: RefCell::new(Vec::new()),
            }
        }

        fn empty() -> Self {
            Self::with_entries(Vec::new())
        }
    }

    impl ProcessHost for FakeHost {
        fn snapshot(&self) -> Result<Vec<ProcessEntry>> {
            Ok(self.entries.clone())
        }

        fn spawn_detached(&self, args: &[String]) -> Result<()> {
            self.spawned.borrow_mut().push(args.to_vec());
            Ok(())
        }

        fn terminate(&self, pid: u32) {
            self.terminated.borrow_mut().push(pid);
        }
    }

    fn spec(key: &str) -> TunnelSpec {
        TunnelSpec {
            key_path: PathBuf::from(key),
            db_host: "10.0.0.5".to_string(),
            db_port: 3306,
            jump_user: "ubuntu".to_string(),
            jump_host: "1.2.3.4".to_string(),
        }
    }

    #[test]
    fn builds_exact_ssh_argument_list() {
        let args = spec("/tmp/k.pem").to_args().unwrap();
        assert_eq!(
            args,
            vec![
                "ssh",
                "-i",
                "/tmp/k.pem",
                "-f",
                "-N",
                "-L",
                "3306:10.0.0.5:3306",
                "ubuntu@1.2.3.4",
                "-v",
            ]
        );
    }

    #[test]
    fn open_fails_on_missing_key_without_spawning() {
        let host = FakeHost::empty();
        let sink = MemorySink::new();

        let err = open_tunnel(&spec("/no/such/key.pem"), &host, &sink).unwrap_err();

        assert!(matches!(err, Error::KeyFileNotFound(_)));
        assert!(host.spawned.borrow().is_empty());
    }

    #[test]
    fn open_spawns_once_and_echoes_command() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let key_str = key.path().display().to_string();
        let host = FakeHost::empty();
        let sink = MemorySink::new();

        let args = open_tunnel(&spec(&key_str), &host, &sink).unwrap();

        assert_eq!(host.spawned.borrow().len(), 1);
        assert_eq!(host.spawned.borrow()[0], args);
        let lines = sink.lines();
        assert!(lines[0].contains("Open ssh tunnel"));
        assert!(lines[2].contains(&key_str));
    }

    #[test]
    fn discovery_returns_empty_when_nothing_matches() {
        let host = FakeHost::with_entries(vec![(100, "alice 100 0.0 0.0 -bash")]);
        let pids = find_tunnel_pids(Path::new("/tmp/k.pem"), &host).unwrap();
        assert!(pids.is_empty());
    }

    #[test]
    fn discovery_finds_matching_process() {
        let host = FakeHost::with_entries(vec![(
            4242,
            "alice 4242 0.0 0.0 ssh -i /tmp/k.pem -f -N -L 3306:10.0.0.5:3306 ubuntu@1.2.3.4 -v",
        )]);
        let pids = find_tunnel_pids(Path::new("/tmp/k.pem"), &host).unwrap();
        assert_eq!(pids, vec![4242]);
    }

    #[test]
    fn discovery_ignores_processes_for_other_keys() {
        let host = FakeHost::with_entries(vec![
            (
                4242,
                "alice 4242 0.0 0.0 ssh -i /tmp/k.pem -f -N -L 3306:10.0.0.5:3306 ubuntu@1.2.3.4 -v",
            ),
            (
                4300,
                "alice 4300 0.0 0.0 ssh -i /tmp/other.pem -f -N -L 5432:10.0.0.6:5432 ec2-user@5.6.7.8 -v",
            ),
        ]);
        let pids = find_tunnel_pids(Path::new("/tmp/k.pem"), &host).unwrap();
        assert_eq!(pids, vec![4242]);
    }

    #[test]
    fn lister_reports_full_lines() {
        let line = "alice 4242 0.0 0.0 ssh -i /tmp/k.pem -f -N -L 3306:10.0.0.5:3306 ubuntu@1.2.3.4 -v";
        let host = FakeHost::with_entries(vec![(4242, line)]);
        let sink = MemorySink::new();

        list_tunnels(Path::new("/tmp/k.pem"), &host, &sink).unwrap();

        let lines = sink.lines();
        assert_eq!(lines[0], "List SSH tunnel ...");
        assert_eq!(lines[2], line);
    }

    #[test]
    fn lister_reports_no_tunnel() {
        let host = FakeHost::empty();
        let sink = MemorySink::new();

        list_tunnels(Path::new("/tmp/k.pem"), &host, &sink).unwrap();

        assert_eq!(sink.lines(), vec!["There's NO existing SSH tunnel."]);
    }

    #[test]
    fn kill_terminates_each_discovered_pid_once() {
        let host = FakeHost::with_entries(vec![
            (4242, "alice 4242 ssh -i /tmp/k.pem -f -N -L 3306:10.0.0.5:3306 u@h -v"),
            (4243, "alice 4243 ssh -i /tmp/k.pem -f -N -L 3306:10.0.0.5:3306 u@h -v"),
        ]);
        let sink = MemorySink::new();

        let pids = kill_tunnels(Path::new("/tmp/k.pem"), &host, &sink).unwrap();

        assert_eq!(pids, vec![4242, 4243]);
        assert_eq!(*host.terminated.borrow(), vec![4242, 4243]);
        assert!(sink.lines()[0].contains("Found pid 4242"));
    }

    #[test]
    fn kill_reports_nothing_to_kill() {
        let host = FakeHost::empty();
        let sink = MemorySink::new();

        let pids = kill_tunnels(Path::new("/tmp/k.pem"), &host, &sink).unwrap();

        assert!(pids.is_empty());
        assert!(host.terminated.borrow().is_empty());
        assert_eq!(sink.lines(), vec!["There's NO existing SSH tunnel to kill."]);
    }
}
