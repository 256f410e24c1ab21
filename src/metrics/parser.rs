//! Parsers for the metrics command battery
//!
//! All parsers are total: malformed or missing output yields zeros or
//! `"unknown"` rather than an error, so a single odd host never aborts a tick.

use std::time::Instant;

use super::types::{DiskUsage, MemoryUsage, NetworkRate, SystemInfo};

/// Interface name prefixes excluded from throughput sampling
const VIRTUAL_IFACE_PREFIXES: &[&str] = &["docker", "veth", "br-", "virbr", "tun", "tap"];

const UNKNOWN: &str = "unknown";

/// `free -m` → the `Mem:` row (MiB)
pub fn parse_memory(output: &str) -> MemoryUsage {
    let row = output
        .lines()
        .find(|line| line.trim_start().starts_with("Mem:"))
        .or_else(|| output.lines().nth(1));

    let Some(row) = row else {
        return MemoryUsage::default();
    };
    let parts: Vec<&str> = row.split_whitespace().collect();
    let field = |idx: usize| parts.get(idx).and_then(|v| v.parse().ok()).unwrap_or(0);

    MemoryUsage {
        total: field(1),
        used: field(2),
        free: field(3),
    }
}

/// `df -h /` → second line, sizes kept as reported
pub fn parse_disk(output: &str) -> DiskUsage {
    let Some(row) = output.lines().nth(1) else {
        return DiskUsage::default();
    };
    let parts: Vec<&str> = row.split_whitespace().collect();
    let field = |idx: usize| parts.get(idx).map(|v| v.to_string()).unwrap_or_default();

    DiskUsage {
        total: field(1),
        used: field(2),
        available: field(3),
        percent: field(4),
    }
}

/// CPU busy percentage, rounded to one decimal
pub fn parse_cpu(output: &str) -> f64 {
    output
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| (v * 10.0).round() / 10.0)
        .unwrap_or(0.0)
}

/// Four lines: kernel release, machine arch, OS pretty name, CPU model
pub fn parse_system_info(output: &str) -> SystemInfo {
    let mut lines = output.lines().map(str::trim);
    let mut next = || {
        lines
            .next()
            .filter(|l| !l.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string()
    };

    SystemInfo {
        kernel: next(),
        arch: next(),
        os: next(),
        cpu_model: next(),
    }
}

fn is_virtual_iface(name: &str) -> bool {
    name == "lo" || VIRTUAL_IFACE_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Raw byte counters of one interface at one instant
#[derive(Debug, Clone, Copy)]
pub struct NetSample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub at: Instant,
}

/// `/proc/net/dev` → counters of the first physical interface
pub fn parse_net_dev(output: &str) -> Option<(String, u64, u64)> {
    for line in output.lines() {
        let line = line.trim();
        // Skip header lines (contain |)
        if line.contains('|') || line.is_empty() {
            continue;
        }
        // Format: "iface: rx_bytes rx_packets ... tx_bytes tx_packets ..."
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        let iface = iface.trim();
        if is_virtual_iface(iface) {
            continue;
        }
        let parts: Vec<&str> = rest.split_whitespace().collect();
        if parts.len() >= 9 {
            if let (Ok(rx), Ok(tx)) = (parts[0].parse::<u64>(), parts[8].parse::<u64>()) {
                return Some((iface.to_string(), rx, tx));
            }
        }
    }
    None
}

/// Throughput in KB/s between two samples.
///
/// Without a previous sample the rate is 0/0. Counter resets (a smaller
/// current value) clamp to 0 instead of going negative.
pub fn compute_rate(prev: Option<&NetSample>, cur: &NetSample) -> NetworkRate {
    let Some(prev) = prev else {
        return NetworkRate::default();
    };
    let elapsed = cur.at.saturating_duration_since(prev.at).as_secs_f64();
    if elapsed <= 0.0 {
        return NetworkRate::default();
    }

    let rate = |now: u64, before: u64| {
        let delta = now as f64 - before as f64;
        (delta / elapsed / 1024.0).max(0.0)
    };

    NetworkRate {
        input: rate(cur.rx_bytes, prev.rx_bytes),
        output: rate(cur.tx_bytes, prev.tx_bytes),
    }
}

/// Characters allowed in a systemd unit name passed to the shell
pub fn is_valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | ':' | '-'))
}
