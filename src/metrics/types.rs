//! Metrics snapshot types

use serde::{Deserialize, Serialize};

/// Memory in MiB, as reported by `free -m`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// Root filesystem usage in `df -h` units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: String,
    pub used: String,
    pub available: String,
    pub percent: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub kernel: String,
    pub arch: String,
    pub os: String,
    pub cpu_model: String,
}

/// Throughput in KB/s
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRate {
    #[serde(rename = "in")]
    pub input: f64,
    #[serde(rename = "out")]
    pub output: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    /// `systemctl is-active` output, `failed` or `unknown`
    pub state: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime: String,
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    pub cpu: f64,
    pub system: SystemInfo,
    pub network: NetworkRate,
    pub services: Vec<ServiceStatus>,
}

/// What the subscriber receives each tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MetricsUpdate {
    Success { data: MetricsSnapshot },
    Error { message: String },
}

impl MetricsUpdate {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Connecting,
    Polling,
}
