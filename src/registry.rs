//! Presence registry
//!
//! Tracks registered endpoints by id. All mutation and iteration goes through
//! one lock; broadcasters take a snapshot and send outside of it.

use crate::protocol::{HostInfo, Role};
use crate::transport::{Connection, ConnectionId};
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No endpoint registered under this id
    NotFound(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(id) => write!(f, "Endpoint not found: {}", id),
        }
    }
}

impl Error for RegistryError {}

/// One registered connection
#[derive(Debug)]
pub struct Endpoint {
    pub id: String,
    /// Role declared at registration
    pub role: Role,
    pub connection: Arc<Connection>,
    seq: u64,
}

impl Endpoint {
    /// Transport currently writable
    pub fn is_online(&self) -> bool {
        self.connection.is_open()
    }
}

#[derive(Default)]
struct RegistryInner {
    endpoints: HashMap<String, Arc<Endpoint>>,
    next_seq: u64,
}

pub struct PresenceRegistry {
    inner: RwLock<RegistryInner>,
    host_prefix: String,
}

impl PresenceRegistry {
    /// `host_prefix` marks ids listed as hosts (`"host-"`)
    pub fn new(host_prefix: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            host_prefix: host_prefix.into(),
        }
    }

    /// Roster classification by id convention
    pub fn classify(&self, id: &str) -> Role {
        if id.starts_with(&self.host_prefix) {
            Role::Host
        } else {
            Role::Controller
        }
    }

    /// Insert or overwrite. Returns the entry that was replaced, if any.
    pub fn register(&self, id: &str, role: Role, connection: Arc<Connection>) -> Option<Arc<Endpoint>> {
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let endpoint = Arc::new(Endpoint {
            id: id.to_string(),
            role,
            connection,
            seq,
        });
        let replaced = inner.endpoints.insert(id.to_string(), endpoint);
        if let Some(ref previous) = replaced {
            info!(
                "Endpoint {} re-registered (connection {} replaces {})",
                id,
                inner.endpoints[id].connection.id(),
                previous.connection.id()
            );
        }
        replaced
    }

    /// Remove by id. Removing an absent id is a no-op.
    pub fn unregister(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.inner.write().endpoints.remove(id)
    }

    /// Remove only if the entry still belongs to `connection`
    pub fn unregister_connection(&self, id: &str, connection: ConnectionId) -> Option<Arc<Endpoint>> {
        let mut inner = self.inner.write();
        match inner.endpoints.get(id) {
            Some(endpoint) if endpoint.connection.id() == connection => inner.endpoints.remove(id),
            Some(_) => {
                debug!("Endpoint {} now owned by another connection, keeping it", id);
                None
            }
            None => None,
        }
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<Endpoint>, RegistryError> {
        self.inner
            .read()
            .endpoints
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Endpoints classified as `role`, in registration order
    pub fn endpoints_by_role(&self, role: Role) -> Vec<Arc<Endpoint>> {
        let inner = self.inner.read();
        let mut endpoints: Vec<Arc<Endpoint>> = inner
            .endpoints
            .values()
            .filter(|endpoint| self.classify(&endpoint.id) == role)
            .cloned()
            .collect();
        drop(inner);
        endpoints.sort_by_key(|endpoint| endpoint.seq);
        endpoints
    }

    /// Roster of endpoints classified as `role`
    pub fn list_by_role(&self, role: Role) -> Vec<HostInfo> {
        self.endpoints_by_role(role)
            .iter()
            .map(|endpoint| HostInfo::new(endpoint.id.clone(), endpoint.is_online()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
