//! Host telemetry
//!
//! Polls uptime, memory, disk, CPU, system identification, network throughput
//! and systemd service states over a private SSH session.

pub mod parser;
pub mod poller;
pub mod types;

pub use poller::{MetricsManager, PollRequest};
pub use types::{
    DiskUsage, MemoryUsage, MetricsSnapshot, MetricsUpdate, NetworkRate, PollerState,
    ServiceStatus, SystemInfo,
};
