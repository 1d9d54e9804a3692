//! OS process inspection used for conflict sweeps and tree kills.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};

/// What the inspector knows about one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cmdline: Vec<String>,
}

impl ProcessInfo {
    /// Value of `--port N` or `--port=N` on the command line, if any.
    pub fn port_arg(&self) -> Option<u16> {
        let mut args = self.cmdline.iter();
        while let Some(arg) = args.next() {
            if arg == "--port" {
                return args.next().and_then(|value| value.parse().ok());
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                return value.parse().ok();
            }
        }
        None
    }

    /// Whether the process name, or any argument or its file name, equals a
    /// signature.
    pub fn matches_signature(&self, signatures: &[String]) -> bool {
        signatures.iter().filter(|s| !s.is_empty()).any(|sig| {
            self.name == *sig || self.cmdline.iter().any(|arg| arg_matches(arg, sig))
        })
    }
}

fn arg_matches(arg: &str, signature: &str) -> bool {
    arg == signature
        || Path::new(arg)
            .file_name()
            .is_some_and(|name| name.to_string_lossy() == signature)
}

/// Platform hooks for finding and killing processes.
///
/// Methods are blocking; async callers run them on the blocking pool.
pub trait ProcessInspector: Send + Sync + std::fmt::Debug {
    /// Pids listening on TCP `port`.
    fn listeners_on(&self, port: u16) -> Vec<u32>;

    /// Details for `pid`, if it exists.
    fn describe(&self, pid: u32) -> Option<ProcessInfo>;

    /// Every process whose name or command line matches a signature.
    fn find_matching(&self, signatures: &[String]) -> Vec<ProcessInfo>;

    /// Whether `pid` exists and is not a zombie.
    fn is_alive(&self, pid: u32) -> bool;

    /// Requests graceful termination. Returns `true` if the request was sent.
    fn terminate(&self, pid: u32) -> bool;

    /// Kills `pid` immediately. Returns `true` if the kill was sent.
    fn force_kill(&self, pid: u32) -> bool;

    /// All transitive children of `pid`, deepest first.
    fn descendants(&self, pid: u32) -> Vec<u32>;
}

/// Why a process counts as a conflict for a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Looks like a worker and targets a reserved port (or no port at all).
    Signature,
    /// Holds one of the reserved ports, whatever it is.
    PortHolder(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub pid: u32,
    pub reason: ConflictReason,
}

/// Finds processes that must go before a worker can own `ports`.
///
/// A signature match counts when its `--port` is one of `ports` or cannot be
/// determined. A port holder always counts, even when its signature check is
/// inconclusive. With no signatures only port holders are reported. Pids in
/// `exclude` are never reported.
pub fn find_conflicts(
    inspector: &dyn ProcessInspector,
    signatures: &[String],
    ports: &[u16],
    exclude: &[u32],
) -> Vec<Conflict> {
    let mut seen: HashSet<u32> = exclude.iter().copied().collect();
    let mut conflicts = Vec::new();

    let matching = if signatures.iter().any(|s| !s.is_empty()) {
        inspector.find_matching(signatures)
    } else {
        Vec::new()
    };
    for info in matching {
        let targets_reserved = match info.port_arg() {
            Some(port) => ports.contains(&port),
            None => true,
        };
        if targets_reserved && seen.insert(info.pid) {
            conflicts.push(Conflict {
                pid: info.pid,
                reason: ConflictReason::Signature,
            });
        }
    }

    for &port in ports {
        for pid in inspector.listeners_on(port) {
            if seen.insert(pid) {
                conflicts.push(Conflict {
                    pid,
                    reason: ConflictReason::PortHolder(port),
                });
            }
        }
    }

    conflicts
}

/// Last-resort kill through the OS tooling, bypassing `sysinfo`.
pub(crate) fn os_force_kill(pid: u32) -> bool {
    let status = if cfg!(windows) {
        Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .status()
    } else {
        Command::new("kill").args(["-9", &pid.to_string()]).status()
    };
    matches!(status, Ok(s) if s.success())
}

/// [`ProcessInspector`] backed by `sysinfo`, with `lsof`/`ss` (Unix) or
/// `netstat` (Windows) for port ownership.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInspector;

impl SystemInspector {
    pub fn new() -> Self {
        Self
    }

    fn snapshot() -> System {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys
    }

    fn info(pid: Pid, process: &sysinfo::Process) -> ProcessInfo {
        ProcessInfo {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
            cmdline: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
        }
    }

    #[cfg(not(windows))]
    fn port_pids(port: u16) -> Vec<u32> {
        let lsof = Command::new("lsof")
            .args(["-nP", "-t", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
            .output();
        if let Ok(output) = lsof {
            if output.status.success() || !output.stdout.is_empty() {
                return parse_pid_lines(&String::from_utf8_lossy(&output.stdout));
            }
        }

        // lsof is missing on slim images; `ss` prints `pid=1234` fragments.
        let ss = Command::new("ss")
            .args(["-Hltnp", &format!("sport = :{port}")])
            .output();
        match ss {
            Ok(output) => parse_ss_pids(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                tracing::debug!(port, error = %e, "no port inspection tool available");
                Vec::new()
            }
        }
    }

    #[cfg(windows)]
    fn port_pids(port: u16) -> Vec<u32> {
        let Ok(output) = Command::new("netstat").args(["-ano", "-p", "TCP"]).output() else {
            return Vec::new();
        };
        parse_netstat_pids(&String::from_utf8_lossy(&output.stdout), port)
    }
}

impl ProcessInspector for SystemInspector {
    fn listeners_on(&self, port: u16) -> Vec<u32> {
        Self::port_pids(port)
    }

    fn describe(&self, pid: u32) -> Option<ProcessInfo> {
        let sys = Self::snapshot();
        let pid = Pid::from_u32(pid);
        sys.process(pid).map(|p| Self::info(pid, p))
    }

    fn find_matching(&self, signatures: &[String]) -> Vec<ProcessInfo> {
        let sys = Self::snapshot();
        sys.processes()
            .iter()
            .filter(|(_, p)| p.thread_kind().is_none() && p.status() != ProcessStatus::Zombie)
            .map(|(pid, p)| Self::info(*pid, p))
            .filter(|info| info.matches_signature(signatures))
            .collect()
    }

    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    fn terminate(&self, pid: u32) -> bool {
        let sys = Self::snapshot();
        let Some(process) = sys.process(Pid::from_u32(pid)) else {
            return false;
        };
        // Windows has no SIGTERM; fall back to a hard kill there.
        process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill())
    }

    fn force_kill(&self, pid: u32) -> bool {
        let sys = Self::snapshot();
        sys.process(Pid::from_u32(pid))
            .is_some_and(|process| process.kill())
    }

    fn descendants(&self, pid: u32) -> Vec<u32> {
        let sys = Self::snapshot();
        let mut found = Vec::new();
        let mut frontier = vec![Pid::from_u32(pid)];
        while let Some(parent) = frontier.pop() {
            for (child_pid, process) in sys.processes() {
                if process.thread_kind().is_none()
                    && process.parent() == Some(parent)
                    && !found.contains(&child_pid.as_u32())
                {
                    found.push(child_pid.as_u32());
                    frontier.push(*child_pid);
                }
            }
        }
        found.reverse();
        found
    }
}

#[cfg_attr(windows, allow(dead_code))]
fn parse_pid_lines(text: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for line in text.lines() {
        if let Ok(pid) = line.trim().parse::<u32>() {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

#[cfg_attr(windows, allow(dead_code))]
fn parse_ss_pids(text: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for fragment in text.split("pid=").skip(1) {
        let digits: String = fragment.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(pid) = digits.parse::<u32>() {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

#[cfg_attr(not(windows), allow(dead_code))]
fn parse_netstat_pids(text: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{port}");
    let mut pids = Vec::new();
    for line in text.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        // Proto  Local  Foreign  State  PID
        if cols.len() < 5 || !cols[3].eq_ignore_ascii_case("LISTENING") {
            continue;
        }
        if !cols[1].ends_with(&suffix) {
            continue;
        }
        if let Ok(pid) = cols[4].parse::<u32>() {
            if pid != 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}
