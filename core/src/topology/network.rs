// Network: one connected topology instance and its lifecycle data.

use super::health::Coverage;
use super::shape::TopologyShape;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkKind {
    Emergency,
    Community,
    Temporary,
    Permanent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPerformance {
    /// Aggregate link bandwidth estimate, kbps.
    pub throughput: f64,
    /// Expected end-to-end latency, ms.
    pub latency: f64,
    /// 0–100
    pub reliability: f64,
    /// 0–100, score of the current shape.
    pub efficiency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSecurity {
    pub encrypted: bool,
    pub authenticated: bool,
}

impl Default for NetworkSecurity {
    fn default() -> Self {
        Self {
            encrypted: true,
            authenticated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub kind: NetworkKind,
    pub members: BTreeSet<NodeId>,
    pub shape: TopologyShape,
    pub coverage: Option<Coverage>,
    pub performance: NetworkPerformance,
    pub security: NetworkSecurity,
    pub created_at: u64,
    pub last_optimized: u64,
}

impl Network {
    pub fn new(name: impl Into<String>, kind: NetworkKind, founder: NodeId, now: u64) -> Self {
        let shape = match kind {
            NetworkKind::Emergency => TopologyShape::Mesh,
            _ => TopologyShape::Hybrid,
        };
        Self {
            id: format!("network_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            kind,
            members: BTreeSet::from([founder]),
            shape,
            coverage: None,
            performance: NetworkPerformance::default(),
            security: NetworkSecurity::default(),
            created_at: now,
            last_optimized: now,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.kind == NetworkKind::Emergency
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }
}
