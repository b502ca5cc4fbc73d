//! Emergency broadcast records.
//!
//! A broadcast is created by exactly one node and carries that node's identity
//! for its whole life; only the sender may cancel it. Priority is a fixed
//! function of severity and type, computed once at creation.

use crate::message::Priority;
use crate::node::{NodeId, NodeRole};
use crate::platform::Location;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BroadcastType {
    Alert,
    Warning,
    Info,
    Evacuation,
    Medical,
    Security,
}

impl BroadcastType {
    pub const ALL: [BroadcastType; 6] = [
        BroadcastType::Alert,
        BroadcastType::Warning,
        BroadcastType::Info,
        BroadcastType::Evacuation,
        BroadcastType::Medical,
        BroadcastType::Security,
    ];

    /// Added on top of the severity score.
    pub fn score(&self) -> u8 {
        match self {
            BroadcastType::Evacuation => 20,
            BroadcastType::Medical | BroadcastType::Security => 15,
            BroadcastType::Alert => 10,
            BroadcastType::Warning => 5,
            BroadcastType::Info => 0,
        }
    }
}

impl fmt::Display for BroadcastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BroadcastType::Alert => "alert",
            BroadcastType::Warning => "warning",
            BroadcastType::Info => "info",
            BroadcastType::Evacuation => "evacuation",
            BroadcastType::Medical => "medical",
            BroadcastType::Security => "security",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn score(&self) -> u8 {
        match self {
            Severity::Critical => 100,
            Severity::High => 75,
            Severity::Medium => 50,
            Severity::Low => 25,
        }
    }

    /// Priority of the mesh message that carries a broadcast of this severity.
    pub fn message_priority(&self) -> Priority {
        match self {
            Severity::Critical => Priority::Emergency,
            Severity::High => Priority::High,
            Severity::Medium => Priority::Normal,
            Severity::Low => Priority::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// 0..=100, severity dominates.
pub fn broadcast_priority(severity: Severity, kind: BroadcastType) -> u8 {
    (severity.score() as u16 + kind.score() as u16).min(100) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastStatus {
    /// Not yet sent on any path.
    Pending,
    /// At least one path accepted it.
    Partial,
    /// Acknowledgements reached the configured threshold.
    Complete,
    /// Every path refused it.
    Failed,
}

impl BroadcastStatus {
    pub fn needs_retry(&self) -> bool {
        matches!(self, BroadcastStatus::Pending | BroadcastStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastSender {
    pub id: NodeId,
    pub role: NodeRole,
    /// Set on ingest when the signature checked out.
    pub verified: bool,
    /// Ed25519 public key, if the sender signs.
    pub public_key: Option<Vec<u8>>,
}

/// Circular geofence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetArea {
    pub center: Location,
    pub radius_m: f64,
}

impl TargetArea {
    pub fn new(center: Location, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.center.distance_to(location) <= self.radius_m
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyBroadcast {
    pub id: String,
    pub kind: BroadcastType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub sender: BroadcastSender,
    /// Where the sender was when it raised the broadcast.
    pub location: Option<Location>,
    /// ms since epoch
    pub timestamp: u64,
    pub expires_at: Option<u64>,
    /// Distinct nodes that acknowledged; only tracked on the sender's copy.
    pub acknowledgements: u32,
    #[serde(default)]
    pub acknowledged_by: BTreeSet<NodeId>,
    pub status: BroadcastStatus,
    pub priority: u8,
    pub target_area: Option<TargetArea>,
    pub action_required: Option<String>,
    pub signature: Option<Vec<u8>>,
}

impl EmergencyBroadcast {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Bytes covered by the signature. Mutable delivery state (acks, status,
    /// trust flag) is excluded.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let area = self
            .target_area
            .map(|a| format!("{:.6},{:.6},{:.1}", a.center.lat, a.center.lon, a.radius_m))
            .unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.kind,
            self.severity,
            self.title,
            self.message,
            self.sender.id,
            self.timestamp,
            self.expires_at.map(|e| e.to_string()).unwrap_or_default(),
            area
        )
        .into_bytes()
    }
}

/// Optional parts of a new broadcast.
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    pub title: Option<String>,
    pub expires_in_ms: Option<u64>,
    pub target_area: Option<TargetArea>,
    pub action_required: Option<String>,
}

impl BroadcastOptions {
    pub fn expires_in(mut self, ms: u64) -> Self {
        self.expires_in_ms = Some(ms);
        self
    }

    pub fn within(mut self, area: TargetArea) -> Self {
        self.target_area = Some(area);
        self
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_is_capped() {
        assert_eq!(broadcast_priority(Severity::Critical, BroadcastType::Evacuation), 100);
        assert_eq!(broadcast_priority(Severity::High, BroadcastType::Medical), 90);
        assert_eq!(broadcast_priority(Severity::Low, BroadcastType::Info), 25);
        assert_eq!(broadcast_priority(Severity::Medium, BroadcastType::Warning), 55);
    }

    #[test]
    fn test_severity_dominates_type() {
        for kind in BroadcastType::ALL {
            assert!(
                broadcast_priority(Severity::High, BroadcastType::Info)
                    >= broadcast_priority(Severity::Medium, kind)
            );
        }
    }

    #[test]
    fn test_target_area_contains() {
        let area = TargetArea::new(Location::new(52.52, 13.405), 1_000.0);
        assert!(area.contains(&Location::new(52.521, 13.406)));
        assert!(!area.contains(&Location::new(48.8566, 2.3522)));
    }

    #[test]
    fn test_severity_maps_to_message_priority() {
        assert_eq!(Severity::Critical.message_priority(), Priority::Emergency);
        assert_eq!(Severity::Low.message_priority(), Priority::Low);
    }
}
