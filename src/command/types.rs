//! Data carried by control-channel pushes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Push families a session can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    /// Periodic status counters and traffic rates.
    Status,
    /// Engine log lines.
    Log,
    /// Proxy-group topology.
    Groups,
    /// Current mode and the allowed mode list.
    ClashMode,
    /// Active and recently closed network connections.
    Connections,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Resident memory in bytes.
    pub memory: u64,
    /// Live worker count.
    pub goroutines: u32,
    /// Inbound connection count.
    pub connections_in: u32,
    /// Outbound connection count.
    pub connections_out: u32,
    /// Whether the rate/total fields below carry data.
    #[serde(default)]
    pub traffic_available: bool,
    /// Current upload rate in bytes per second.
    #[serde(default)]
    pub uplink: u64,
    /// Current download rate in bytes per second.
    #[serde(default)]
    pub downlink: u64,
    /// Bytes uploaded since the engine started.
    #[serde(default)]
    pub uplink_total: u64,
    /// Bytes downloaded since the engine started.
    #[serde(default)]
    pub downlink_total: u64,
}

/// Engine log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Unrecoverable engine failure.
    Panic,
    /// Fatal error, engine stopping.
    Fatal,
    /// Error.
    Error,
    /// Warning.
    Warn,
    /// Informational.
    Info,
    /// Debug detail.
    Debug,
    /// Trace detail.
    Trace,
}

/// One engine log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
}

impl LogLine {
    /// Build a log line.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// A member of a proxy group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupItem {
    /// Outbound tag.
    pub tag: String,
    /// Outbound type (e.g. "shadowsocks", "direct").
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix time of the last latency probe, 0 if never probed.
    #[serde(default)]
    pub url_test_time: i64,
    /// Last measured latency in milliseconds, 0 if unknown.
    #[serde(default)]
    pub url_test_delay: u32,
}

/// A proxy group and its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group tag.
    pub tag: String,
    /// Group type (e.g. "selector", "urltest").
    #[serde(rename = "type")]
    pub kind: String,
    /// Currently selected member tag.
    pub selected: String,
    /// Whether the user may pick a member.
    #[serde(default)]
    pub selectable: bool,
    /// UI expand flag. From the engine this is only a hint.
    #[serde(default)]
    pub expanded: bool,
    /// Members in engine order.
    #[serde(default)]
    pub items: Vec<GroupItem>,
}

/// One network flow tracked by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Engine-assigned connection id.
    pub id: String,
    /// Inbound tag that accepted the flow.
    #[serde(default)]
    pub inbound: String,
    /// Inbound type.
    #[serde(default)]
    pub inbound_type: String,
    /// 4 or 6.
    #[serde(default)]
    pub ip_version: u8,
    /// "tcp" or "udp".
    #[serde(default)]
    pub network: String,
    /// Source address.
    #[serde(default)]
    pub source: String,
    /// Destination address.
    #[serde(default)]
    pub destination: String,
    /// Sniffed domain, if any.
    #[serde(default)]
    pub domain: String,
    /// Sniffed protocol, if any.
    #[serde(default)]
    pub protocol: String,
    /// Authenticated inbound user, if any.
    #[serde(default)]
    pub user: String,
    /// Outbound that forwarded the flow in, for chained outbounds.
    #[serde(default)]
    pub from_outbound: String,
    /// When the flow started.
    pub created_at: DateTime<Utc>,
    /// When the flow ended. `None` while active.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Current upload rate in bytes per second.
    #[serde(default)]
    pub uplink: u64,
    /// Current download rate in bytes per second.
    #[serde(default)]
    pub downlink: u64,
    /// Bytes uploaded over the flow's lifetime.
    #[serde(default)]
    pub uplink_total: u64,
    /// Bytes downloaded over the flow's lifetime.
    #[serde(default)]
    pub downlink_total: u64,
    /// Routing rule that matched.
    #[serde(default)]
    pub rule: String,
    /// Final outbound tag.
    #[serde(default)]
    pub outbound: String,
    /// Final outbound type.
    #[serde(default)]
    pub outbound_type: String,
    /// Outbound chain, outermost first.
    #[serde(default)]
    pub chain: Vec<String>,
}

impl ConnectionRecord {
    /// True while the flow has not closed.
    pub fn is_active(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Combined current rate.
    pub fn rate(&self) -> u64 {
        self.uplink.saturating_add(self.downlink)
    }

    /// Combined lifetime total.
    pub fn total(&self) -> u64 {
        self.uplink_total.saturating_add(self.downlink_total)
    }
}
