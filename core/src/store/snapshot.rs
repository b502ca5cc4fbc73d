//! Route table and active-broadcast persistence.
//!
//! Keys are `route:<destination>` and `broadcast:<id>`; values are bincode.
//! A save replaces the previous snapshot entirely.

use super::backend::StorageBackend;
use crate::broadcast::EmergencyBroadcast;
use crate::routing::RouteTableEntry;
use crate::{MeshError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

const ROUTE_PREFIX: &str = "route:";
const BROADCAST_PREFIX: &str = "broadcast:";

/// What a snapshot holds once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub routes: Vec<RouteTableEntry>,
    pub broadcasts: Vec<EmergencyBroadcast>,
}

pub struct SnapshotStore {
    backend: Arc<dyn StorageBackend>,
}

fn storage_err(e: String) -> MeshError {
    MeshError::Storage(e)
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn save_routes(&self, entries: &[RouteTableEntry]) -> Result<usize> {
        self.replace(
            ROUTE_PREFIX,
            entries.iter().map(|e| (e.destination.as_str(), e)),
        )
    }

    pub fn save_broadcasts(&self, broadcasts: &[EmergencyBroadcast]) -> Result<usize> {
        self.replace(BROADCAST_PREFIX, broadcasts.iter().map(|b| (b.id.as_str(), b)))
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let routes = self.save_routes(&snapshot.routes)?;
        let broadcasts = self.save_broadcasts(&snapshot.broadcasts)?;
        self.backend.flush().map_err(storage_err)?;
        tracing::debug!("Saved snapshot: {} route entries, {} broadcasts", routes, broadcasts);
        Ok(())
    }

    pub fn load_routes(&self) -> Result<Vec<RouteTableEntry>> {
        self.load_prefix(ROUTE_PREFIX)
    }

    pub fn load_broadcasts(&self) -> Result<Vec<EmergencyBroadcast>> {
        self.load_prefix(BROADCAST_PREFIX)
    }

    pub fn load(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            routes: self.load_routes()?,
            broadcasts: self.load_broadcasts()?,
        })
    }

    pub fn route_count(&self) -> Result<usize> {
        self.backend
            .count_prefix(ROUTE_PREFIX.as_bytes())
            .map_err(storage_err)
    }

    pub fn broadcast_count(&self) -> Result<usize> {
        self.backend
            .count_prefix(BROADCAST_PREFIX.as_bytes())
            .map_err(storage_err)
    }

    fn replace<'a, T: Serialize + 'a>(
        &self,
        prefix: &str,
        items: impl Iterator<Item = (&'a str, &'a T)>,
    ) -> Result<usize> {
        let stale = self
            .backend
            .scan_prefix(prefix.as_bytes())
            .map_err(storage_err)?;
        for (key, _) in stale {
            self.backend.remove(&key).map_err(storage_err)?;
        }

        let mut written = 0;
        for (id, item) in items {
            let bytes =
                bincode::serialize(item).map_err(|e| MeshError::Serialization(e.to_string()))?;
            let key = format!("{}{}", prefix, id);
            self.backend
                .put(key.as_bytes(), &bytes)
                .map_err(storage_err)?;
            written += 1;
        }
        Ok(written)
    }

    fn load_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.backend
            .scan_prefix(prefix.as_bytes())
            .map_err(storage_err)?
            .into_iter()
            .map(|(_, bytes)| {
                bincode::deserialize(&bytes).map_err(|e| MeshError::Serialization(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Algorithm, Route};
    use crate::store::MemoryStorage;

    fn entry(dest: &str) -> RouteTableEntry {
        RouteTableEntry {
            destination: dest.into(),
            routes: vec![Route {
                destination: dest.into(),
                next_hop: "hop".into(),
                hop_count: 2,
                metric: 70.0,
                reliability: 80.0,
                bandwidth: 800.0,
                is_active: true,
                emergency_priority: false,
                last_updated: 5,
                path: Some(vec!["me".into(), "hop".into(), dest.into()]),
                algorithm: Algorithm::SourceRoute,
            }],
        }
    }

    #[test]
    fn test_routes_roundtrip_and_replace() {
        let backend = Arc::new(MemoryStorage::new());
        let store = SnapshotStore::new(backend.clone());
        store.save_routes(&[entry("a"), entry("b")]).unwrap();
        assert_eq!(store.route_count().unwrap(), 2);

        store.save_routes(&[entry("c")]).unwrap();
        let loaded = store.load_routes().unwrap();
        assert_eq!(loaded, vec![entry("c")]);
        assert!(backend.get(b"route:c").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_value_is_serialization_error() {
        let backend = Arc::new(MemoryStorage::new());
        backend.put(b"route:x", &[0xff, 0xff, 0xff]).unwrap();
        let store = SnapshotStore::new(backend);
        assert!(matches!(store.load_routes(), Err(MeshError::Serialization(_))));
    }

    #[test]
    fn test_empty_snapshot() {
        let store = SnapshotStore::new(Arc::new(MemoryStorage::new()));
        assert_eq!(store.load().unwrap(), Snapshot::default());
    }
}
