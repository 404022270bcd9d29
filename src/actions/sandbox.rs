// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command sandboxing for safe action execution.
//!
//! Two-stage validation: a hard blocklist that can never be bypassed, then
//! an ordered risk table that decides whether a command may run unattended.
//! Execution always goes through an argv vector, never a shell string.

use glob::Pattern;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

/// Risk tier of a proposed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolRisk {
    ReadOnly,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ToolRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolRisk::ReadOnly => "READ_ONLY",
            ToolRisk::Low => "LOW",
            ToolRisk::Medium => "MEDIUM",
            ToolRisk::High => "HIGH",
            ToolRisk::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Result of a sandboxed command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Output cap per stream.
const OUTPUT_CAP: usize = 10_000;

/// Paths that `rm` may never target.
const PROTECTED_PATHS: &[&str] = &[
    "/", "/*", "/etc", "/usr", "/var", "/boot", "/bin", "/sbin", "/lib", "/lib64", "/home",
    "/root", "/proc", "/sys", "/dev",
];

/// Glob patterns for commands that are NEVER allowed.
const BLOCKLIST_PATTERNS: &[&str] = &[
    // Disk/partition destruction
    "mkfs*",
    "dd if=*",
    "fdisk*",
    "parted*",
    "> /dev/sd*",
    "> /dev/nvm*",
    // Permission nuking
    "chmod -R 777 /",
    "chmod 777 /",
    // Network/firewall destruction
    "iptables -F",
    "iptables --flush",
    "nft flush ruleset",
    "ufw disable",
    // Fork bombs
    ":(){ :|:& };:*",
    // Kernel manipulation
    "sysctl -w*",
    "modprobe -r*",
    "rmmod*",
    "insmod*",
    // Bootloader destruction
    "grub-install*",
    "update-grub*",
];

/// Ordered risk table. First match wins; commands matching nothing default
/// to [`ToolRisk::Medium`] and therefore require approval.
const RISK_PATTERNS: &[(&str, ToolRisk)] = &[
    // READ_ONLY diagnostics, auto-approved
    ("df *", ToolRisk::ReadOnly),
    ("free *", ToolRisk::ReadOnly),
    ("uptime", ToolRisk::ReadOnly),
    ("uptime *", ToolRisk::ReadOnly),
    ("ps *", ToolRisk::ReadOnly),
    ("top -b -n 1*", ToolRisk::ReadOnly),
    ("ls", ToolRisk::ReadOnly),
    ("ls *", ToolRisk::ReadOnly),
    ("stat *", ToolRisk::ReadOnly),
    ("file *", ToolRisk::ReadOnly),
    ("wc *", ToolRisk::ReadOnly),
    ("head *", ToolRisk::ReadOnly),
    ("tail *", ToolRisk::ReadOnly),
    ("du *", ToolRisk::ReadOnly),
    ("lsblk*", ToolRisk::ReadOnly),
    ("lscpu*", ToolRisk::ReadOnly),
    ("lsof *", ToolRisk::ReadOnly),
    ("mount", ToolRisk::ReadOnly),
    ("findmnt*", ToolRisk::ReadOnly),
    ("netstat *", ToolRisk::ReadOnly),
    ("ss *", ToolRisk::ReadOnly),
    ("ip *", ToolRisk::ReadOnly),
    ("ifconfig*", ToolRisk::ReadOnly),
    ("dig *", ToolRisk::ReadOnly),
    ("nslookup *", ToolRisk::ReadOnly),
    ("ping -c *", ToolRisk::ReadOnly),
    ("traceroute *", ToolRisk::ReadOnly),
    ("curl *", ToolRisk::ReadOnly),
    ("journalctl *", ToolRisk::ReadOnly),
    ("dmesg*", ToolRisk::ReadOnly),
    ("systemctl status *", ToolRisk::ReadOnly),
    ("systemctl is-active *", ToolRisk::ReadOnly),
    ("systemctl is-enabled *", ToolRisk::ReadOnly),
    ("systemctl list-units*", ToolRisk::ReadOnly),
    ("docker ps*", ToolRisk::ReadOnly),
    ("docker logs *", ToolRisk::ReadOnly),
    ("docker stats *", ToolRisk::ReadOnly),
    ("docker images*", ToolRisk::ReadOnly),
    ("docker inspect *", ToolRisk::ReadOnly),
    ("docker top *", ToolRisk::ReadOnly),
    ("docker compose ps*", ToolRisk::ReadOnly),
    ("hostname*", ToolRisk::ReadOnly),
    ("uname *", ToolRisk::ReadOnly),
    ("whoami", ToolRisk::ReadOnly),
    ("id", ToolRisk::ReadOnly),
    ("id *", ToolRisk::ReadOnly),
    ("date*", ToolRisk::ReadOnly),
    ("timedatectl*", ToolRisk::ReadOnly),
    ("cat *", ToolRisk::ReadOnly),
    ("grep *", ToolRisk::ReadOnly),
    ("awk *", ToolRisk::ReadOnly),
    ("sed -n *", ToolRisk::ReadOnly),
    ("find *", ToolRisk::ReadOnly),
    ("which *", ToolRisk::ReadOnly),
    ("env", ToolRisk::ReadOnly),
    ("printenv*", ToolRisk::ReadOnly),
    // HIGH risk, requires approval, flagged prominently
    ("kill *", ToolRisk::High),
    ("pkill *", ToolRisk::High),
    ("killall *", ToolRisk::High),
    ("find * -delete", ToolRisk::High),
    ("find * -exec rm *", ToolRisk::High),
    // CRITICAL risk, requires approval, strong warning
    ("rm -rf *", ToolRisk::Critical),
    ("rm -r *", ToolRisk::Critical),
    ("reboot", ToolRisk::Critical),
    ("shutdown *", ToolRisk::Critical),
    ("poweroff", ToolRisk::Critical),
    ("init 0", ToolRisk::Critical),
    ("init 6", ToolRisk::Critical),
];

/// Default risk for commands not matching any pattern.
const DEFAULT_RISK: ToolRisk = ToolRisk::Medium;

static BLOCKLIST: Lazy<Vec<Pattern>> = Lazy::new(|| {
    BLOCKLIST_PATTERNS
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect()
});

static RISK_TABLE: Lazy<Vec<(Pattern, ToolRisk)>> = Lazy::new(|| {
    RISK_PATTERNS
        .iter()
        .filter_map(|(p, risk)| Pattern::new(p).ok().map(|p| (p, *risk)))
        .collect()
});

fn is_blocked(cmd_str: &str) -> bool {
    // rm targeting a protected path is blocked regardless of flags
    let parts: Vec<&str> = cmd_str.split_whitespace().collect();
    if parts.len() >= 2 && parts[0] == "rm" {
        for target in parts[1..].iter().filter(|p| !p.starts_with('-')) {
            let normalized = target.trim_end_matches('/');
            let normalized = if normalized.is_empty() { "/" } else { normalized };
            if PROTECTED_PATHS.contains(&normalized) || PROTECTED_PATHS.contains(target) {
                return true;
            }
        }
    }

    BLOCKLIST.iter().any(|p| p.matches(cmd_str))
}

/// Executes commands behind a blocklist and risk classifier.
///
/// Any command not in the blocklist is allowed through, but non-READ_ONLY
/// commands still require user approval via the action engine before
/// execution.
pub struct CommandSandbox {
    /// nsenter prefix applied when running containerised with host access
    nsenter_prefix: Vec<String>,
}

impl Default for CommandSandbox {
    fn default() -> Self {
        Self::new("")
    }
}

impl CommandSandbox {
    /// `host_root` non-empty means the agent runs inside a container with
    /// host namespaces reachable through nsenter.
    pub fn new(host_root: &str) -> Self {
        let nsenter_prefix = if host_root.is_empty() {
            Vec::new()
        } else {
            ["nsenter", "--target", "1", "--mount", "--uts", "--ipc", "--net", "--pid", "--"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        };
        Self { nsenter_prefix }
    }

    /// Checks whether a command is allowed and classifies its risk.
    ///
    /// Blocked commands return `(false, Critical)`; allowed commands return
    /// the first matching risk pattern, defaulting to MEDIUM.
    pub fn validate_command(&self, cmd: &[String]) -> (bool, ToolRisk) {
        let cmd_str = cmd.join(" ");

        if is_blocked(&cmd_str) {
            warn!(command = %cmd_str, "Blocked command (blocklist)");
            return (false, ToolRisk::Critical);
        }

        for (pattern, risk) in RISK_TABLE.iter() {
            if pattern.matches(&cmd_str) {
                return (true, *risk);
            }
        }

        info!(command = %cmd_str, risk = %DEFAULT_RISK, "Command allowed with default risk");
        (true, DEFAULT_RISK)
    }

    /// Executes a validated command with a timeout.
    ///
    /// Never raises for runtime failures: blocked commands, timeouts, and
    /// spawn errors all come back as a [`CommandResult`] with
    /// `exit_code = -1` and an explanatory stderr.
    pub async fn execute(&self, cmd: &[String], timeout: Duration) -> CommandResult {
        let (allowed, _risk) = self.validate_command(cmd);
        if !allowed {
            return CommandResult {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("Command blocked: {}", cmd.join(" ")),
                duration_ms: 0,
            };
        }

        let full: Vec<&String> = self.nsenter_prefix.iter().chain(cmd.iter()).collect();
        let (program, args) = match full.split_first() {
            Some(split) => split,
            None => {
                return CommandResult {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: "Empty command".to_string(),
                    duration_ms: 0,
                }
            }
        };

        let start = Instant::now();
        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return CommandResult {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        };

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let wait = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stdout).await;
            }
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stderr).await;
            }
            let status = child.wait().await;
            (status, stdout, stderr)
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok((status, stdout, stderr)) => {
                let exit_code = match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                CommandResult {
                    exit_code,
                    stdout: cap_output(&stdout),
                    stderr: cap_output(&stderr),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(_) => {
                // kill_on_drop signals the child when `child` is dropped here
                CommandResult {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("Command timed out after {}s", timeout.as_secs()),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

fn cap_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.chars().take(OUTPUT_CAP).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_blocklist_rm_root() {
        let sandbox = CommandSandbox::default();
        let (allowed, risk) = sandbox.validate_command(&cmd(&["rm", "-rf", "/"]));
        assert!(!allowed);
        assert_eq!(risk, ToolRisk::Critical);
    }

    #[test]
    fn test_blocklist_rm_protected_paths() {
        let sandbox = CommandSandbox::default();
        for path in ["/etc", "/usr/", "/home", "/proc"] {
            let (allowed, _) = sandbox.validate_command(&cmd(&["rm", "-rf", path]));
            assert!(!allowed, "rm of {path} must be blocked");
        }
    }

    #[test]
    fn test_blocklist_glob_patterns() {
        let sandbox = CommandSandbox::default();
        for command in [
            vec!["mkfs.ext4", "/dev/sda1"],
            vec!["dd", "if=/dev/zero", "of=/dev/sda"],
            vec!["iptables", "-F"],
            vec!["grub-install", "/dev/sda"],
        ] {
            let (allowed, risk) = sandbox.validate_command(&cmd(&command));
            assert!(!allowed, "{command:?} must be blocked");
            assert_eq!(risk, ToolRisk::Critical);
        }
    }

    #[test]
    fn test_rm_of_normal_path_allowed_critical() {
        let sandbox = CommandSandbox::default();
        let (allowed, risk) = sandbox.validate_command(&cmd(&["rm", "-rf", "/tmp/scratch"]));
        assert!(allowed);
        assert_eq!(risk, ToolRisk::Critical);
    }

    #[test]
    fn test_read_only_classification() {
        let sandbox = CommandSandbox::default();
        for command in [
            vec!["df", "-h"],
            vec!["ps", "aux"],
            vec!["uptime"],
            vec!["cat", "/proc/meminfo"],
            vec!["systemctl", "status", "nginx"],
            vec!["docker", "ps"],
        ] {
            let (allowed, risk) = sandbox.validate_command(&cmd(&command));
            assert!(allowed);
            assert_eq!(risk, ToolRisk::ReadOnly, "{command:?} should be READ_ONLY");
        }
    }

    #[test]
    fn test_high_risk_classification() {
        let sandbox = CommandSandbox::default();
        let (allowed, risk) = sandbox.validate_command(&cmd(&["kill", "-9", "1234"]));
        assert!(allowed);
        assert_eq!(risk, ToolRisk::High);
    }

    #[test]
    fn test_unknown_command_defaults_to_medium() {
        let sandbox = CommandSandbox::default();
        let (allowed, risk) = sandbox.validate_command(&cmd(&["systemctl", "restart", "nginx"]));
        assert!(allowed);
        assert_eq!(risk, ToolRisk::Medium);
    }

    #[test]
    fn test_risk_ordering() {
        assert!(ToolRisk::Critical > ToolRisk::High);
        assert!(ToolRisk::High > ToolRisk::Medium);
        assert!(ToolRisk::Medium > ToolRisk::ReadOnly);
    }

    #[tokio::test]
    async fn test_execute_blocked_returns_synthetic_result() {
        let sandbox = CommandSandbox::default();
        let result = sandbox
            .execute(&cmd(&["rm", "-rf", "/"]), Duration::from_secs(5))
            .await;
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("blocked"));
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let sandbox = CommandSandbox::default();
        let result = sandbox
            .execute(&cmd(&["echo", "hello"]), Duration::from_secs(5))
            .await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit() {
        let sandbox = CommandSandbox::default();
        let result = sandbox
            .execute(&cmd(&["ls", "/definitely-not-a-real-path"]), Duration::from_secs(5))
            .await;
        assert_ne!(result.exit_code, 0);
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let sandbox = CommandSandbox::default();
        let result = sandbox
            .execute(&cmd(&["sleep", "10"]), Duration::from_millis(200))
            .await;
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
        assert!(result.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn test_execute_spawn_error() {
        let sandbox = CommandSandbox::default();
        let result = sandbox
            .execute(&cmd(&["definitely-not-a-binary-xyz"]), Duration::from_secs(5))
            .await;
        assert_eq!(result.exit_code, -1);
        assert!(!result.stderr.is_empty());
    }
}
