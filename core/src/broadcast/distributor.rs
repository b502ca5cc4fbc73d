// Emergency broadcast distributor: create, ingest, acknowledge, cancel, expire.
//
// The active set is a copy-on-write map: every mutation clones the current map,
// edits the clone and publishes it under the write lock, so readers always see
// a whole version.

use super::types::{
    broadcast_priority, BroadcastOptions, BroadcastSender, BroadcastStatus, BroadcastType,
    EmergencyBroadcast, Severity,
};
use crate::config::BroadcastConfig;
use crate::events::{EventBus, MeshEvent};
use crate::node::{NodeId, NodeRole};
use crate::platform::{Ed25519Identity, IdentityProvider, LocationProvider};
use crate::{MeshError, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// DELIVERY PATHS
// ============================================================================

/// Outbound paths a broadcast can take. Mesh flooding and direct transport are
/// redundant; either one succeeding is enough.
#[cfg_attr(test, mockall::automock)]
pub trait BroadcastChannel: Send + Sync {
    /// Flood over the mesh with a budget of `hops_left` transmissions. `true`
    /// if at least one neighbour took it.
    fn flood(&self, broadcast: &EmergencyBroadcast, hops_left: u32) -> bool;

    /// Push to directly connected peers. `true` if any accepted.
    fn direct(&self, broadcast: &EmergencyBroadcast, hops_left: u32) -> bool;

    /// Route word back to `sender` that `from` received the broadcast.
    fn acknowledge(&self, broadcast_id: &str, sender: &NodeId, from: &NodeId);

    /// Spread a cancellation.
    fn cancel_notice(&self, broadcast_id: &str, requester: &NodeId);
}

/// Channel that reaches nobody. Useful for a node with no radio yet.
#[derive(Debug, Default)]
pub struct DetachedChannel;

impl BroadcastChannel for DetachedChannel {
    fn flood(&self, _broadcast: &EmergencyBroadcast, _hops_left: u32) -> bool {
        false
    }

    fn direct(&self, _broadcast: &EmergencyBroadcast, _hops_left: u32) -> bool {
        false
    }

    fn acknowledge(&self, _broadcast_id: &str, _sender: &NodeId, _from: &NodeId) {}

    fn cancel_notice(&self, _broadcast_id: &str, _requester: &NodeId) {}
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Already seen; nothing changed.
    Duplicate,
    /// Valid, but our position is outside the geofence.
    OutsideArea,
}

/// What an incoming acknowledgement did to the sender's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First acknowledgement from this node; carries the new total.
    Counted(u32),
    /// This node had already acknowledged.
    Repeated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastMaintenance {
    pub expired: Vec<String>,
    pub retried: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BroadcastStatistics {
    pub total_broadcasts: usize,
    pub active_broadcasts: usize,
    /// Percent of active broadcasts delivered on at least one path.
    pub delivery_rate: f64,
    pub average_acknowledgements: f64,
    pub total_acknowledgements: u64,
    pub critical_alerts: usize,
    pub last_broadcast_time: u64,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_type: BTreeMap<BroadcastType, usize>,
    pub emergency_active: bool,
}

/// Bounded memory of broadcast ids already handled.
struct SeenBroadcasts {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenBroadcasts {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: &str) {
        if !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }
}

// ============================================================================
// DISTRIBUTOR
// ============================================================================

pub struct EmergencyBroadcastDistributor {
    config: BroadcastConfig,
    local_id: NodeId,
    local_role: NodeRole,
    identity: Option<Arc<dyn IdentityProvider>>,
    location: Arc<dyn LocationProvider>,
    channel: Arc<dyn BroadcastChannel>,
    events: EventBus,
    active: RwLock<Arc<HashMap<String, EmergencyBroadcast>>>,
    history: Mutex<VecDeque<EmergencyBroadcast>>,
    seen: Mutex<SeenBroadcasts>,
    emergency_active: AtomicBool,
}

impl EmergencyBroadcastDistributor {
    pub fn new(
        config: BroadcastConfig,
        local_id: impl Into<NodeId>,
        local_role: NodeRole,
        location: Arc<dyn LocationProvider>,
        channel: Arc<dyn BroadcastChannel>,
        events: EventBus,
    ) -> Self {
        let seen = SeenBroadcasts::new(config.seen_capacity);
        Self {
            config,
            local_id: local_id.into(),
            local_role,
            identity: None,
            location,
            channel,
            events,
            active: RwLock::new(Arc::new(HashMap::new())),
            history: Mutex::new(VecDeque::new()),
            seen: Mutex::new(seen),
            emergency_active: AtomicBool::new(false),
        }
    }

    /// Sign outgoing broadcasts with this identity.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut HashMap<String, EmergencyBroadcast>) -> R) -> R {
        let mut guard = self.active.write();
        let mut next = (**guard).clone();
        let out = f(&mut next);
        *guard = Arc::new(next);
        out
    }

    fn remember(&self, broadcast: &EmergencyBroadcast) {
        let mut history = self.history.lock();
        history.push_front(broadcast.clone());
        history.truncate(self.config.history_capacity);
    }

    // ------------------------------------------------------------------
    // Create / send
    // ------------------------------------------------------------------

    /// Raise a new broadcast from this node and push it out on every path.
    pub fn create(
        &self,
        kind: BroadcastType,
        severity: Severity,
        message: &str,
        options: BroadcastOptions,
        now: u64,
    ) -> Result<EmergencyBroadcast> {
        if message.trim().is_empty() {
            return Err(MeshError::Invalid("broadcast message is empty".into()));
        }

        let mut broadcast = EmergencyBroadcast {
            id: format!("broadcast_{}", uuid::Uuid::new_v4()),
            kind,
            severity,
            title: options.title.unwrap_or_else(|| kind.to_string()),
            message: message.to_string(),
            sender: BroadcastSender {
                id: self.local_id.clone(),
                role: self.local_role,
                verified: true,
                public_key: self.identity.as_ref().map(|i| i.public_key()),
            },
            location: self.location.current_location(),
            timestamp: now,
            expires_at: options.expires_in_ms.map(|ms| now.saturating_add(ms)),
            acknowledgements: 0,
            acknowledged_by: Default::default(),
            status: BroadcastStatus::Pending,
            priority: broadcast_priority(severity, kind),
            target_area: options.target_area,
            action_required: options.action_required,
            signature: None,
        };
        if let Some(identity) = &self.identity {
            broadcast.signature = Some(identity.sign(&broadcast.signing_bytes()));
        }

        self.seen.lock().insert(&broadcast.id);
        broadcast.status = self.deliver(&broadcast);
        self.mutate(|map| {
            map.insert(broadcast.id.clone(), broadcast.clone());
        });
        self.remember(&broadcast);

        info!(
            "Broadcast {} created ({} {}, priority {}): {:?}",
            broadcast.id, severity, kind, broadcast.priority, broadcast.status
        );
        self.events.publish(MeshEvent::BroadcastSent {
            broadcast_id: broadcast.id.clone(),
        });
        Ok(broadcast)
    }

    /// Try both paths; returns the resulting status.
    fn deliver(&self, broadcast: &EmergencyBroadcast) -> BroadcastStatus {
        let hops = self.config.mesh_ttl;
        let mesh = self.channel.flood(broadcast, hops);
        let direct = self.channel.direct(broadcast, hops);
        if self.threshold_reached(broadcast.acknowledgements) {
            BroadcastStatus::Complete
        } else if mesh || direct {
            BroadcastStatus::Partial
        } else {
            debug!("Broadcast {} reached no path", broadcast.id);
            BroadcastStatus::Failed
        }
    }

    fn threshold_reached(&self, acks: u32) -> bool {
        self.config
            .complete_ack_threshold
            .map_or(false, |threshold| acks >= threshold)
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Accept a broadcast that arrived from the network.
    ///
    /// Checks run in order: dedup, timestamp skew, expiry, signature, geofence.
    /// An accepted broadcast is acknowledged back to its sender at once; a
    /// critical one switches this node into emergency mode. Acknowledgement
    /// state carried on the wire is discarded; only the sender counts.
    pub fn ingest(&self, mut broadcast: EmergencyBroadcast, now: u64) -> Result<IngestOutcome> {
        if self.seen.lock().contains(&broadcast.id) || self.active.read().contains_key(&broadcast.id) {
            debug!("Broadcast {} already seen", broadcast.id);
            return Ok(IngestOutcome::Duplicate);
        }

        let oldest = now.saturating_sub(self.config.max_past_skew_ms);
        let newest = now.saturating_add(self.config.max_future_skew_ms);
        if broadcast.timestamp < oldest || broadcast.timestamp > newest {
            warn!(
                "Rejected broadcast {}: timestamp {} outside [{}, {}]",
                broadcast.id, broadcast.timestamp, oldest, newest
            );
            return Err(MeshError::Invalid(format!(
                "broadcast {} timestamp out of window",
                broadcast.id
            )));
        }
        if broadcast.is_expired(now) {
            debug!("Rejected broadcast {}: already expired", broadcast.id);
            return Err(MeshError::Invalid(format!("broadcast {} expired", broadcast.id)));
        }

        broadcast.sender.verified = false;
        if let (Some(signature), Some(key)) = (&broadcast.signature, &broadcast.sender.public_key) {
            let bytes = broadcast.signing_bytes();
            let ok = match &self.identity {
                Some(identity) => identity.verify(&bytes, signature, key),
                None => Ed25519Identity::verify_with(&bytes, signature, key),
            };
            if !ok {
                warn!("Rejected broadcast {}: bad signature", broadcast.id);
                return Err(MeshError::Invalid(format!(
                    "broadcast {} signature mismatch",
                    broadcast.id
                )));
            }
            broadcast.sender.verified = true;
        }

        self.seen.lock().insert(&broadcast.id);
        broadcast.acknowledgements = 0;
        broadcast.acknowledged_by.clear();

        if let Some(area) = &broadcast.target_area {
            // no fix means we cannot rule ourselves out
            if let Some(here) = self.location.current_location() {
                if !area.contains(&here) {
                    debug!("Broadcast {} targets an area we are not in", broadcast.id);
                    return Ok(IngestOutcome::OutsideArea);
                }
            }
        }

        let id = broadcast.id.clone();
        let critical = broadcast.is_critical();
        self.mutate(|map| {
            map.insert(id.clone(), broadcast.clone());
        });
        self.remember(&broadcast);
        info!("Accepted broadcast {} from {}", id, broadcast.sender.id);
        self.events.publish(MeshEvent::BroadcastReceived {
            broadcast_id: id.clone(),
        });

        self.acknowledge(&id)?;

        if critical {
            self.set_emergency_active(true);
        }
        Ok(IngestOutcome::Accepted)
    }

    // ------------------------------------------------------------------
    // Acknowledgements
    // ------------------------------------------------------------------

    /// Send our acknowledgement of someone else's broadcast back to its sender.
    pub fn acknowledge(&self, broadcast_id: &str) -> Result<()> {
        let b = self
            .get(broadcast_id)
            .ok_or_else(|| MeshError::NotFound(format!("broadcast {}", broadcast_id)))?;
        if b.sender.id != self.local_id {
            self.channel.acknowledge(broadcast_id, &b.sender.id, &self.local_id);
        }
        Ok(())
    }

    /// An acknowledgement from `from` reached the sender. Each node counts once.
    pub fn record_acknowledgement(&self, broadcast_id: &str, from: &NodeId) -> Result<AckOutcome> {
        let threshold = self.config.complete_ack_threshold;
        let local = &self.local_id;
        let outcome = self.mutate(|map| {
            let b = map
                .get_mut(broadcast_id)
                .ok_or_else(|| MeshError::NotFound(format!("broadcast {}", broadcast_id)))?;
            if b.sender.id != *local {
                return Err(MeshError::Invalid(format!(
                    "broadcast {} belongs to {}; only its sender counts acknowledgements",
                    broadcast_id, b.sender.id
                )));
            }
            if !b.acknowledged_by.insert(from.clone()) {
                return Ok(AckOutcome::Repeated);
            }
            b.acknowledgements = b.acknowledged_by.len() as u32;
            if threshold.map_or(false, |t| b.acknowledgements >= t) {
                b.status = BroadcastStatus::Complete;
            }
            Ok(AckOutcome::Counted(b.acknowledgements))
        })?;

        match outcome {
            AckOutcome::Counted(count) => {
                debug!("Broadcast {} acknowledged by {} ({} total)", broadcast_id, from, count);
                self.events.publish(MeshEvent::BroadcastAcknowledged {
                    broadcast_id: broadcast_id.to_string(),
                    node_id: from.clone(),
                });
            }
            AckOutcome::Repeated => {
                debug!("Repeated acknowledgement of {} from {}", broadcast_id, from);
            }
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Cancel one of our own broadcasts and tell the network.
    pub fn cancel(&self, broadcast_id: &str) -> Result<()> {
        let local = self.local_id.clone();
        self.cancel_as(broadcast_id, &local)?;
        self.channel.cancel_notice(broadcast_id, &local);
        Ok(())
    }

    /// A cancellation arrived from the network on behalf of `requester`.
    pub fn apply_remote_cancel(&self, broadcast_id: &str, requester: &NodeId) -> Result<()> {
        self.cancel_as(broadcast_id, requester)
    }

    fn cancel_as(&self, broadcast_id: &str, requester: &NodeId) -> Result<()> {
        let removed = self.mutate(|map| {
            let sender = map.get(broadcast_id).map(|b| b.sender.id.clone());
            match sender {
                None => Err(MeshError::NotFound(format!("broadcast {}", broadcast_id))),
                Some(sender) if sender != *requester => Err(MeshError::Unauthorized(format!(
                    "{} cannot cancel broadcast {} sent by {}",
                    requester, broadcast_id, sender
                ))),
                Some(_) => Ok(map.remove(broadcast_id)),
            }
        });
        if let Err(e) = &removed {
            warn!("Cancel of {} refused: {}", broadcast_id, e);
        }
        removed?;
        info!("Broadcast {} cancelled by {}", broadcast_id, requester);
        self.events.publish(MeshEvent::BroadcastCancelled {
            broadcast_id: broadcast_id.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Purge expired broadcasts, then resend anything still pending or failed.
    pub fn maintain(&self, now: u64) -> BroadcastMaintenance {
        let expired = self.mutate(|map| {
            let mut gone: Vec<String> = map
                .values()
                .filter(|b| b.is_expired(now))
                .map(|b| b.id.clone())
                .collect();
            gone.sort();
            for id in &gone {
                map.remove(id);
            }
            gone
        });
        for id in &expired {
            debug!("Broadcast {} expired", id);
            self.events.publish(MeshEvent::BroadcastExpired {
                broadcast_id: id.clone(),
            });
        }

        let mut pending: Vec<EmergencyBroadcast> = self
            .snapshot()
            .values()
            .filter(|b| b.status.needs_retry())
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut retried = 0;
        for broadcast in pending {
            let status = self.deliver(&broadcast);
            retried += 1;
            self.mutate(|map| {
                if let Some(b) = map.get_mut(&broadcast.id) {
                    if b.status != BroadcastStatus::Complete {
                        b.status = status;
                    }
                }
            });
        }
        if !expired.is_empty() || retried > 0 {
            debug!("Broadcast sweep: {} expired, {} retried", expired.len(), retried);
        }
        BroadcastMaintenance { expired, retried }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> Arc<HashMap<String, EmergencyBroadcast>> {
        self.active.read().clone()
    }

    pub fn get(&self, broadcast_id: &str) -> Option<EmergencyBroadcast> {
        self.active.read().get(broadcast_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Active broadcasts, highest priority first.
    pub fn active(&self) -> Vec<EmergencyBroadcast> {
        let mut list: Vec<EmergencyBroadcast> = self.snapshot().values().cloned().collect();
        list.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(a.id.cmp(&b.id))
        });
        list
    }

    pub fn by_type(&self, kind: BroadcastType) -> Vec<EmergencyBroadcast> {
        self.active().into_iter().filter(|b| b.kind == kind).collect()
    }

    pub fn by_severity(&self, severity: Severity) -> Vec<EmergencyBroadcast> {
        self.active()
            .into_iter()
            .filter(|b| b.severity == severity)
            .collect()
    }

    /// Newest first, bounded.
    pub fn history(&self) -> Vec<EmergencyBroadcast> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn is_emergency_active(&self) -> bool {
        self.emergency_active.load(Ordering::SeqCst)
    }

    /// Flip the emergency flag; emits an event only on change.
    pub fn set_emergency_active(&self, active: bool) {
        if self.emergency_active.swap(active, Ordering::SeqCst) != active {
            info!("Emergency {}", if active { "activated" } else { "cleared" });
            self.events
                .publish(MeshEvent::EmergencyStatusChanged { active });
        }
    }

    pub fn statistics(&self) -> BroadcastStatistics {
        let active = self.snapshot();
        let mut stats = BroadcastStatistics {
            total_broadcasts: self.history.lock().len(),
            active_broadcasts: active.len(),
            emergency_active: self.is_emergency_active(),
            ..Default::default()
        };
        let mut delivered = 0usize;
        for b in active.values() {
            *stats.by_severity.entry(b.severity).or_insert(0) += 1;
            *stats.by_type.entry(b.kind).or_insert(0) += 1;
            stats.total_acknowledgements += b.acknowledgements as u64;
            stats.last_broadcast_time = stats.last_broadcast_time.max(b.timestamp);
            if b.is_critical() {
                stats.critical_alerts += 1;
            }
            if matches!(b.status, BroadcastStatus::Partial | BroadcastStatus::Complete) {
                delivered += 1;
            }
        }
        if !active.is_empty() {
            stats.delivery_rate = delivered as f64 / active.len() as f64 * 100.0;
            stats.average_acknowledgements = stats.total_acknowledgements as f64 / active.len() as f64;
        }
        stats
    }

    /// Reload a persisted active set. Restored ids count as seen.
    pub fn restore(&self, broadcasts: Vec<EmergencyBroadcast>, now: u64) -> usize {
        let live: Vec<EmergencyBroadcast> = broadcasts.into_iter().filter(|b| !b.is_expired(now)).collect();
        {
            let mut seen = self.seen.lock();
            for b in &live {
                seen.insert(&b.id);
            }
        }
        let count = live.len();
        self.mutate(|map| {
            for b in live {
                map.insert(b.id.clone(), b);
            }
        });
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::TargetArea;
    use crate::platform::{Location, StaticLocation};

    fn distributor_with(channel: Arc<dyn BroadcastChannel>, config: BroadcastConfig) -> EmergencyBroadcastDistributor {
        EmergencyBroadcastDistributor::new(
            config,
            "local",
            NodeRole::Relay,
            Arc::new(StaticLocation::new(None)),
            channel,
            EventBus::new(),
        )
    }

    fn reachable() -> MockBroadcastChannel {
        let mut channel = MockBroadcastChannel::new();
        channel.expect_flood().returning(|_, _| true);
        channel.expect_direct().returning(|_, _| false);
        channel.expect_acknowledge().returning(|_, _, _| ());
        channel.expect_cancel_notice().returning(|_, _| ());
        channel
    }

    fn remote(id: &str, sender: &str, timestamp: u64) -> EmergencyBroadcast {
        EmergencyBroadcast {
            id: id.into(),
            kind: BroadcastType::Alert,
            severity: Severity::High,
            title: "alert".into(),
            message: "flood warning".into(),
            sender: BroadcastSender {
                id: sender.into(),
                role: NodeRole::Coordinator,
                verified: true,
                public_key: None,
            },
            location: None,
            timestamp,
            expires_at: None,
            acknowledgements: 0,
            acknowledged_by: Default::default(),
            status: BroadcastStatus::Partial,
            priority: 85,
            target_area: None,
            action_required: None,
            signature: None,
        }
    }

    #[test]
    fn test_create_marks_partial_when_a_path_succeeds() {
        let d = distributor_with(Arc::new(reachable()), BroadcastConfig::default());
        let b = d
            .create(BroadcastType::Evacuation, Severity::Critical, "leave now", BroadcastOptions::default(), 0)
            .unwrap();
        assert_eq!(b.status, BroadcastStatus::Partial);
        assert_eq!(b.priority, 100);
        assert_eq!(b.sender.id, "local");
        assert_eq!(d.active_count(), 1);
        assert_eq!(d.history().len(), 1);
    }

    #[test]
    fn test_create_fails_without_paths() {
        let d = distributor_with(Arc::new(DetachedChannel), BroadcastConfig::default());
        let b = d
            .create(BroadcastType::Info, Severity::Low, "test", BroadcastOptions::default(), 0)
            .unwrap();
        assert_eq!(b.status, BroadcastStatus::Failed);
        assert!(d
            .create(BroadcastType::Info, Severity::Low, "  ", BroadcastOptions::default(), 0)
            .is_err());
    }

    #[test]
    fn test_ingest_acknowledges_sender() {
        let mut channel = MockBroadcastChannel::new();
        channel
            .expect_acknowledge()
            .withf(|id, sender, from| id == "b1" && sender == "remote" && from == "local")
            .times(1)
            .returning(|_, _, _| ());
        let d = distributor_with(Arc::new(channel), BroadcastConfig::default());

        let mut incoming = remote("b1", "remote", 1_000);
        incoming.acknowledgements = 7;
        let outcome = d.ingest(incoming, 1_000).unwrap();
        assert_eq!(outcome, IngestOutcome::Accepted);
        // a receiver's copy never carries a count of its own
        assert_eq!(d.get("b1").unwrap().acknowledgements, 0);
        assert!(!d.get("b1").unwrap().sender.verified);
        assert!(matches!(
            d.record_acknowledgement("b1", &"c".to_string()),
            Err(MeshError::Invalid(_))
        ));
    }

    #[test]
    fn test_ingest_rejects_skewed_timestamps() {
        let d = distributor_with(Arc::new(reachable()), BroadcastConfig::default());
        let now = 10_000_000;
        assert!(matches!(
            d.ingest(remote("old", "r", now - 3_600_001), now),
            Err(MeshError::Invalid(_))
        ));
        assert!(matches!(
            d.ingest(remote("future", "r", now + 60_001), now),
            Err(MeshError::Invalid(_))
        ));
        assert_eq!(
            d.ingest(remote("edge", "r", now + 60_000), now).unwrap(),
            IngestOutcome::Accepted
        );
    }

    #[test]
    fn test_ingest_outside_geofence() {
        let location = Arc::new(StaticLocation::new(Some(Location::new(48.8566, 2.3522))));
        let d = EmergencyBroadcastDistributor::new(
            BroadcastConfig::default(),
            "local",
            NodeRole::Endpoint,
            location.clone(),
            Arc::new(reachable()),
            EventBus::new(),
        );
        let mut b = remote("geo", "r", 0);
        b.target_area = Some(TargetArea::new(Location::new(52.52, 13.405), 5_000.0));
        assert_eq!(d.ingest(b.clone(), 0).unwrap(), IngestOutcome::OutsideArea);
        assert_eq!(d.active_count(), 0);

        // unknown position is treated as inside
        location.set(None);
        b.id = "geo2".into();
        assert_eq!(d.ingest(b, 0).unwrap(), IngestOutcome::Accepted);
    }

    #[test]
    fn test_critical_ingest_activates_emergency() {
        let d = distributor_with(Arc::new(reachable()), BroadcastConfig::default());
        let mut rx = d.events.subscribe();
        let mut b = remote("crit", "r", 0);
        b.severity = Severity::Critical;
        d.ingest(b, 0).unwrap();
        assert!(d.is_emergency_active());

        let mut saw_change = false;
        while let Ok(event) = rx.try_recv() {
            if event == (MeshEvent::EmergencyStatusChanged { active: true }) {
                saw_change = true;
            }
        }
        assert!(saw_change);
    }

    #[test]
    fn test_signed_broadcast_verifies() {
        let identity = Arc::new(Ed25519Identity::from_seed([7u8; 32]));
        let sender = distributor_with(Arc::new(reachable()), BroadcastConfig::default())
            .with_identity(identity);
        let b = sender
            .create(BroadcastType::Medical, Severity::High, "need insulin", BroadcastOptions::default(), 0)
            .unwrap();

        let receiver = EmergencyBroadcastDistributor::new(
            BroadcastConfig::default(),
            "other",
            NodeRole::Endpoint,
            Arc::new(StaticLocation::new(None)),
            Arc::new(reachable()),
            EventBus::new(),
        );
        let mut tampered = b.clone();
        tampered.id = "tampered".into();
        tampered.message = "need nothing".into();
        assert!(matches!(receiver.ingest(tampered, 0), Err(MeshError::Invalid(_))));

        receiver.ingest(b.clone(), 0).unwrap();
        assert!(receiver.get(&b.id).unwrap().sender.verified);
    }

    #[test]
    fn test_cancel_only_by_sender() {
        let d = distributor_with(Arc::new(reachable()), BroadcastConfig::default());
        d.ingest(remote("theirs", "remote", 0), 0).unwrap();
        assert!(matches!(d.cancel("theirs"), Err(MeshError::Unauthorized(_))));
        assert!(matches!(
            d.apply_remote_cancel("theirs", &"someone".to_string()),
            Err(MeshError::Unauthorized(_))
        ));
        assert!(d.get("theirs").is_some());

        d.apply_remote_cancel("theirs", &"remote".to_string()).unwrap();
        assert!(d.get("theirs").is_none());
        assert!(matches!(d.cancel("theirs"), Err(MeshError::NotFound(_))));
    }

    #[test]
    fn test_ack_threshold_completes() {
        let config = BroadcastConfig {
            complete_ack_threshold: Some(2),
            ..BroadcastConfig::default()
        };
        let d = distributor_with(Arc::new(reachable()), config);
        let b = d
            .create(BroadcastType::Alert, Severity::Medium, "gas leak", BroadcastOptions::default(), 0)
            .unwrap();
        assert_eq!(
            d.record_acknowledgement(&b.id, &"n1".to_string()).unwrap(),
            AckOutcome::Counted(1)
        );
        assert_eq!(d.get(&b.id).unwrap().status, BroadcastStatus::Partial);
        d.record_acknowledgement(&b.id, &"n2".to_string()).unwrap();
        assert_eq!(d.get(&b.id).unwrap().status, BroadcastStatus::Complete);
    }

    #[test]
    fn test_repeated_ack_counts_once() {
        let config = BroadcastConfig {
            complete_ack_threshold: Some(2),
            ..BroadcastConfig::default()
        };
        let d = distributor_with(Arc::new(reachable()), config);
        let b = d
            .create(BroadcastType::Alert, Severity::High, "bridge out", BroadcastOptions::default(), 0)
            .unwrap();
        let n1 = "n1".to_string();
        assert_eq!(d.record_acknowledgement(&b.id, &n1).unwrap(), AckOutcome::Counted(1));
        assert_eq!(d.record_acknowledgement(&b.id, &n1).unwrap(), AckOutcome::Repeated);
        assert_eq!(d.record_acknowledgement(&b.id, &n1).unwrap(), AckOutcome::Repeated);

        let stored = d.get(&b.id).unwrap();
        assert_eq!(stored.acknowledgements, 1);
        assert_eq!(stored.status, BroadcastStatus::Partial);
        assert!(matches!(
            d.record_acknowledgement("missing", &n1),
            Err(MeshError::NotFound(_))
        ));
    }

    #[test]
    fn test_flood_uses_mesh_ttl() {
        let mut channel = MockBroadcastChannel::new();
        channel
            .expect_flood()
            .withf(|_, hops| *hops == 4)
            .times(1)
            .returning(|_, _| true);
        channel
            .expect_direct()
            .withf(|_, hops| *hops == 4)
            .times(1)
            .returning(|_, _| false);
        let config = BroadcastConfig {
            mesh_ttl: 4,
            ..BroadcastConfig::default()
        };
        let d = distributor_with(Arc::new(channel), config);
        d.create(BroadcastType::Warning, Severity::Medium, "levee", BroadcastOptions::default(), 0)
            .unwrap();
    }

    #[test]
    fn test_maintain_retries_failed() {
        let mut channel = MockBroadcastChannel::new();
        let mut seq = mockall::Sequence::new();
        channel
            .expect_flood()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| false);
        channel
            .expect_flood()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| true);
        channel.expect_direct().returning(|_, _| false);
        let d = distributor_with(Arc::new(channel), BroadcastConfig::default());

        let b = d
            .create(BroadcastType::Warning, Severity::Low, "storm", BroadcastOptions::default(), 0)
            .unwrap();
        assert_eq!(b.status, BroadcastStatus::Failed);

        let report = d.maintain(30_000);
        assert_eq!(report.retried, 1);
        assert_eq!(d.get(&b.id).unwrap().status, BroadcastStatus::Partial);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = BroadcastConfig {
            history_capacity: 3,
            ..BroadcastConfig::default()
        };
        let d = distributor_with(Arc::new(reachable()), config);
        for i in 0..5 {
            d.ingest(remote(&format!("b{}", i), "r", 0), 0).unwrap();
        }
        let history = d.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, "b4");
    }

    #[test]
    fn test_statistics() {
        let d = distributor_with(Arc::new(reachable()), BroadcastConfig::default());
        let own = d
            .create(BroadcastType::Info, Severity::High, "water at noon", BroadcastOptions::default(), 0)
            .unwrap();
        d.record_acknowledgement(&own.id, &"n1".to_string()).unwrap();
        d.record_acknowledgement(&own.id, &"n2".to_string()).unwrap();
        let mut crit = remote("b", "r", 5);
        crit.severity = Severity::Critical;
        d.ingest(crit, 5).unwrap();

        let stats = d.statistics();
        assert_eq!(stats.active_broadcasts, 2);
        assert_eq!(stats.critical_alerts, 1);
        assert_eq!(stats.total_acknowledgements, 2);
        assert_eq!(stats.last_broadcast_time, 5);
        assert_eq!(stats.by_severity.get(&Severity::High), Some(&1));
        assert!(stats.emergency_active);
        assert!((stats.delivery_rate - 100.0).abs() < f64::EPSILON);
    }
}
