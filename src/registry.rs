//! User registry: who is reachable under which name.
//!
//! The registry maintains two indices over the same set of sessions:
//! - display name → session (call routing)
//! - connection id → session (message dispatch and disconnect cleanup)
//!
//! Both indices live behind one lock so paired updates are atomic: no reader
//! can observe a session present in one index and absent from the other. The
//! lock is never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::{ConnId, UserSession};

#[derive(Default)]
struct Indices {
    by_name: HashMap<String, Arc<UserSession>>,
    by_id: HashMap<ConnId, Arc<UserSession>>,
}

/// Registry of currently registered users.
pub struct Registry {
    indices: Mutex<Indices>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Registry {
            indices: Mutex::new(Indices::default()),
        }
    }

    /// Insert a session under its name, unless the name is already taken.
    ///
    /// The occupancy check and the insert happen under one lock, so this is
    /// the authoritative uniqueness decision; callers must not pre-check with
    /// [`exists`] and act on the answer.
    ///
    /// [`exists`]: Registry::exists
    pub fn register(&self, session: Arc<UserSession>) -> bool {
        let mut indices = self.lock();
        if indices.by_name.contains_key(session.name()) {
            return false;
        }
        log::info!(
            "Registered user '{}' (conn={})",
            session.name(),
            session.id()
        );
        indices
            .by_name
            .insert(session.name().to_owned(), session.clone());
        indices.by_id.insert(session.id(), session);
        true
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<UserSession>> {
        self.lock().by_name.get(name).cloned()
    }

    pub fn lookup_by_id(&self, id: ConnId) -> Option<Arc<UserSession>> {
        self.lock().by_id.get(&id).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.lock().by_name.contains_key(name)
    }

    /// Remove a session from both indices; returns it if it was registered.
    pub fn remove_by_id(&self, id: ConnId) -> Option<Arc<UserSession>> {
        let mut indices = self.lock();
        let session = indices.by_id.remove(&id)?;
        indices.by_name.remove(session.name());
        log::info!(
            "Unregistered user '{}' (conn={})",
            session.name(),
            session.id()
        );
        Some(session)
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.lock().by_name.len()
    }

    fn lock(&self) -> MutexGuard<'_, Indices> {
        self.indices.lock().expect("registry lock poisoned")
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
