// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lightweight host security scan.
//!
//! Three independent checks per pass, all diff-based so only changes make
//! noise: listening-socket diff (`new_open_port`), established outbound
//! connection diff to public addresses (`suspicious_outbound`), and
//! auth-log brute-force counting (`brute_force`). Process names matching
//! known miner patterns raise `suspicious_process`.

use super::Collector;
use crate::events::{Event, EventBus, EventClassifier, EventSeverity, EventSource, EventType};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;
use tracing::debug;

/// Failed logins from one address before a brute-force event fires.
const BRUTE_FORCE_THRESHOLD: usize = 5;

/// Process names associated with cryptominers.
const SUSPICIOUS_PROCESS_NAMES: &[&str] =
    &["xmrig", "minerd", "kinsing", "kdevtmpfsi", "cryptonight"];

#[derive(Default)]
struct ScannerState {
    listening_ports: Option<HashSet<u16>>,
    outbound_peers: Option<HashSet<String>>,
    reported_processes: HashSet<String>,
    reported_brute_sources: HashSet<String>,
    auth_log_offset: u64,
}

/// Periodic security scanner.
pub struct SecurityScanner {
    bus: Arc<EventBus>,
    classifier: Arc<EventClassifier>,
    interval: Duration,
    system: Mutex<System>,
    state: Mutex<ScannerState>,
    proc_net_paths: Vec<String>,
    auth_log_path: String,
}

impl SecurityScanner {
    pub fn new(
        bus: Arc<EventBus>,
        classifier: Arc<EventClassifier>,
        auth_log_path: String,
        interval: Duration,
    ) -> Self {
        Self {
            bus,
            classifier,
            interval,
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
            )),
            state: Mutex::new(ScannerState::default()),
            proc_net_paths: vec!["/proc/net/tcp".to_string(), "/proc/net/tcp6".to_string()],
            auth_log_path,
        }
    }

    #[cfg(test)]
    fn with_proc_net_paths(mut self, paths: Vec<String>) -> Self {
        self.proc_net_paths = paths;
        self
    }

    fn publish(&self, event: Event) {
        self.bus.publish(self.classifier.classify(event));
    }

    /// Parses /proc/net/tcp-format sockets into (listening ports,
    /// established remote peers).
    async fn read_sockets(&self) -> (HashSet<u16>, HashSet<String>) {
        let mut listening = HashSet::new();
        let mut outbound = HashSet::new();

        for path in &self.proc_net_paths {
            let Ok(text) = tokio::fs::read_to_string(path).await else {
                continue;
            };
            for line in text.lines().skip(1) {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 4 {
                    continue;
                }
                let state = fields[3];
                match state {
                    // 0A = LISTEN
                    "0A" => {
                        if let Some(port) = parse_port(fields[1]) {
                            listening.insert(port);
                        }
                    }
                    // 01 = ESTABLISHED
                    "01" => {
                        if let Some((addr, port)) = parse_addr_port(fields[2]) {
                            if is_public(&addr) {
                                outbound.insert(format!("{addr}:{port}"));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        (listening, outbound)
    }

    /// Counts "Failed password ... from <ip>" lines appended since the
    /// previous pass.
    async fn scan_auth_log(&self, offset: u64) -> (HashMap<String, usize>, u64) {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let mut failures: HashMap<String, usize> = HashMap::new();
        let Ok(mut file) = tokio::fs::File::open(&self.auth_log_path).await else {
            return (failures, offset);
        };
        let Ok(meta) = file.metadata().await else {
            return (failures, offset);
        };
        let len = meta.len();
        let start = if offset > len { 0 } else { offset };

        if file.seek(std::io::SeekFrom::Start(start)).await.is_err() {
            return (failures, offset);
        }
        let mut text = String::new();
        if file.read_to_string(&mut text).await.is_err() {
            return (failures, len);
        }

        for line in text.lines() {
            if !line.contains("Failed password") {
                continue;
            }
            if let Some(rest) = line.split(" from ").nth(1) {
                if let Some(ip) = rest.split_whitespace().next() {
                    *failures.entry(ip.to_string()).or_insert(0) += 1;
                }
            }
        }

        (failures, len)
    }
}

fn parse_port(local: &str) -> Option<u16> {
    let hex = local.rsplit(':').next()?;
    u16::from_str_radix(hex, 16).ok()
}

fn parse_addr_port(remote: &str) -> Option<(Ipv4Addr, u16)> {
    let mut parts = remote.split(':');
    let addr_hex = parts.next()?;
    let port_hex = parts.next()?;
    // IPv4 entries are 8 hex chars, little-endian
    if addr_hex.len() != 8 {
        return None;
    }
    let raw = u32::from_str_radix(addr_hex, 16).ok()?;
    let addr = Ipv4Addr::from(raw.swap_bytes());
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    Some((addr, port))
}

fn is_public(addr: &Ipv4Addr) -> bool {
    !(addr.is_loopback() || addr.is_private() || addr.is_link_local() || addr.is_unspecified())
}

#[async_trait]
impl Collector for SecurityScanner {
    fn name(&self) -> &'static str {
        "security_scanner"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) {
        self.scan_once().await;
    }
}

impl SecurityScanner {
    /// One full scan pass. Also used by the scheduler's quick check.
    pub async fn scan_once(&self) {
        let (listening, outbound) = self.read_sockets().await;

        let auth_offset = { self.state.lock().await.auth_log_offset };
        let (failures, new_offset) = self.scan_auth_log(auth_offset).await;

        let suspicious: Vec<(String, u32)> = {
            let mut system = self.system.lock().await;
            system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
            system
                .processes()
                .iter()
                .filter_map(|(pid, process)| {
                    let name = process.name().to_str()?.to_lowercase();
                    SUSPICIOUS_PROCESS_NAMES
                        .iter()
                        .any(|pattern| name.contains(pattern))
                        .then_some((name, pid.as_u32()))
                })
                .collect()
        };

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.auth_log_offset = new_offset;

            // Listening-socket diff; the first pass only seeds the set
            if let Some(previous) = &state.listening_ports {
                for port in listening.difference(previous) {
                    events.push(
                        Event::new(EventSource::SecurityScanner, EventType::NewOpenPort)
                            .with_message(format!("Port {port} is now listening"))
                            .with_field("port", json!(port)),
                    );
                }
            }
            state.listening_ports = Some(listening);

            // Outbound diff to public peers
            if let Some(previous) = &state.outbound_peers {
                for peer in outbound.difference(previous) {
                    events.push(
                        Event::new(EventSource::SecurityScanner, EventType::SuspiciousOutbound)
                            .with_severity(EventSeverity::Notable)
                            .with_message(format!("New outbound connection to {peer}"))
                            .with_field("remote", json!(peer)),
                    );
                }
            }
            state.outbound_peers = Some(outbound);

            // Brute force, one event per source address
            for (ip, count) in failures {
                if count >= BRUTE_FORCE_THRESHOLD
                    && state.reported_brute_sources.insert(ip.clone())
                {
                    events.push(
                        Event::new(EventSource::SecurityScanner, EventType::BruteForce)
                            .with_severity(EventSeverity::Urgent)
                            .with_message(format!("{count} failed login attempts from {ip}"))
                            .with_field("remote_ip", json!(ip))
                            .with_field("attempts", json!(count)),
                    );
                }
            }

            // Suspicious processes, reported once per name
            for (name, pid) in suspicious {
                if state.reported_processes.insert(name.clone()) {
                    events.push(
                        Event::new(EventSource::SecurityScanner, EventType::SuspiciousProcess)
                            .with_severity(EventSeverity::Urgent)
                            .with_message(format!("Suspicious process: {name} PID {pid}"))
                            .with_field("process_name", json!(name))
                            .with_field("pid", json!(pid)),
                    );
                }
            }
        }

        debug!(events = events.len(), "Security scan pass complete");
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SubscribeFilter;
    use std::io::Write;
    use tokio::sync::Mutex as AsyncMutex;

    #[test]
    fn test_parse_port() {
        // 0.0.0.0:22 → 00000000:0016
        assert_eq!(parse_port("00000000:0016"), Some(22));
        assert_eq!(parse_port("00000000:1F90"), Some(8080));
        assert_eq!(parse_port("garbage"), None);
    }

    #[test]
    fn test_parse_addr_port_little_endian() {
        // 1.2.3.4 little-endian is 04030201
        let (addr, port) = parse_addr_port("04030201:01BB").unwrap();
        assert_eq!(addr, Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(port, 443);
    }

    #[test]
    fn test_is_public() {
        assert!(is_public(&Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!is_public(&Ipv4Addr::new(127, 0, 0, 1)));
        assert!(!is_public(&Ipv4Addr::new(10, 1, 2, 3)));
        assert!(!is_public(&Ipv4Addr::new(192, 168, 1, 1)));
    }

    struct Harness {
        scanner: SecurityScanner,
        received: Arc<AsyncMutex<Vec<Event>>>,
        tcp_path: std::path::PathBuf,
        auth_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let tcp_path = dir.path().join("tcp");
        let auth_path = dir.path().join("auth.log");
        std::fs::write(&tcp_path, "header\n").unwrap();
        std::fs::File::create(&auth_path).unwrap();

        let bus = Arc::new(EventBus::new());
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = received.clone();
        bus.subscribe("test", SubscribeFilter::all(), move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().await.push(event);
            })
        });

        let scanner = SecurityScanner::new(
            bus,
            Arc::new(EventClassifier::new()),
            auth_path.display().to_string(),
            Duration::from_secs(300),
        )
        .with_proc_net_paths(vec![tcp_path.display().to_string()]);

        Harness {
            scanner,
            received,
            tcp_path,
            auth_path,
            _dir: dir,
        }
    }

    /// /proc/net/tcp line with the given local port and state.
    fn tcp_line(port: u16, state: &str, remote: &str) -> String {
        format!(
            "   0: 00000000:{port:04X} {remote} {state} 00000000:00000000 00:00000000 00000000  0 0 0\n"
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_new_open_port_detected_on_diff() {
        let h = harness();
        std::fs::write(
            &h.tcp_path,
            format!("header\n{}", tcp_line(22, "0A", "00000000:0000")),
        )
        .unwrap();
        h.scanner.scan_once().await; // seeds the set

        std::fs::write(
            &h.tcp_path,
            format!(
                "header\n{}{}",
                tcp_line(22, "0A", "00000000:0000"),
                tcp_line(4444, "0A", "00000000:0000")
            ),
        )
        .unwrap();
        h.scanner.scan_once().await;
        settle().await;

        let events = h.received.lock().await;
        let ports: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::NewOpenPort)
            .collect();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].data_f64("port"), Some(4444.0));
        // Intrinsic severity applied by the classifier
        assert_eq!(ports[0].severity, EventSeverity::Notable);
    }

    #[tokio::test]
    async fn test_outbound_to_public_peer_detected() {
        let h = harness();
        h.scanner.scan_once().await; // seed

        // Established (01) to 8.8.8.8:443 → remote 08080808:01BB (LE)
        std::fs::write(
            &h.tcp_path,
            format!("header\n{}", tcp_line(50000, "01", "08080808:01BB")),
        )
        .unwrap();
        h.scanner.scan_once().await;
        settle().await;

        let events = h.received.lock().await;
        let outbound: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::SuspiciousOutbound)
            .collect();
        assert_eq!(outbound.len(), 1);
        assert!(outbound[0].message.contains("8.8.8.8:443"));
    }

    #[tokio::test]
    async fn test_brute_force_threshold() {
        let h = harness();
        h.scanner.scan_once().await; // records the auth log offset

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&h.auth_path)
            .unwrap();
        for _ in 0..6 {
            writeln!(
                file,
                "Jun  1 10:00:00 host sshd[123]: Failed password for root from 203.0.113.7 port 22 ssh2"
            )
            .unwrap();
        }
        drop(file);

        h.scanner.scan_once().await;
        // Repeat pass must not re-report the same source
        h.scanner.scan_once().await;
        settle().await;

        let events = h.received.lock().await;
        let brute: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::BruteForce)
            .collect();
        assert_eq!(brute.len(), 1);
        assert_eq!(brute[0].data_str("remote_ip"), Some("203.0.113.7"));
        assert_eq!(brute[0].severity, EventSeverity::Urgent);
    }

    #[tokio::test]
    async fn test_below_threshold_quiet() {
        let h = harness();
        h.scanner.scan_once().await;

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&h.auth_path)
            .unwrap();
        for _ in 0..3 {
            writeln!(
                file,
                "Jun  1 10:00:00 host sshd[123]: Failed password for root from 203.0.113.9 port 22 ssh2"
            )
            .unwrap();
        }
        drop(file);

        h.scanner.scan_once().await;
        settle().await;

        let events = h.received.lock().await;
        assert!(!events.iter().any(|e| e.event_type == EventType::BruteForce));
    }
}
