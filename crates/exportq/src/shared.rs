//! Sharing one component instance across multiple pipeline signals.
//!
//! An exporter configured for traces, metrics and logs at once should hold
//! one queue (and one storage client), not three. [`SharedMap`] keys
//! component instances by their configuration and hands the same instance
//! back to every signal; status updates fan out to every observer the
//! signals registered.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

/// Lifecycle status reported by a shared component to its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    Starting,
    Running,
    RecoverableError(String),
    PermanentError(String),
    Stopping,
    Stopped,
}

/// Callback notified of status changes.
pub type StatusObserver = Arc<dyn Fn(&ComponentStatus) + Send + Sync>;

type ComponentMap<K, V> = Mutex<HashMap<K, Arc<SharedComponent<K, V>>>>;

/// Keeps one instance per key; repeated lookups return the existing
/// instance instead of creating another.
pub struct SharedMap<K, V> {
    components: Arc<ComponentMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V> SharedMap<K, V> {
    pub fn new() -> Self {
        Self {
            components: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the instance registered under `key`, creating it with
    /// `create` if absent. Creation failures are not cached.
    pub fn load_or_store<E>(
        &self,
        key: K,
        create: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<SharedComponent<K, V>>, E> {
        let mut components = self.components.lock().unwrap();
        if let Some(existing) = components.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let component = Arc::new(SharedComponent {
            key: key.clone(),
            component: create()?,
            observers: Mutex::new(Vec::new()),
            map: Arc::downgrade(&self.components),
        });
        components.insert(key, Arc::clone(&component));
        Ok(component)
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.components.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.lock().unwrap().is_empty()
    }
}

impl<K: Eq + Hash + Clone, V> Default for SharedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A component instance shared by every signal that looked up its key.
pub struct SharedComponent<K, V> {
    key: K,
    component: V,
    observers: Mutex<Vec<StatusObserver>>,
    map: Weak<ComponentMap<K, V>>,
}

impl<K: Eq + Hash, V> SharedComponent<K, V> {
    /// The wrapped component.
    pub fn component(&self) -> &V {
        &self.component
    }

    /// Registers a status observer for one of the signals sharing this
    /// instance.
    pub fn subscribe(&self, observer: StatusObserver) {
        self.observers.lock().unwrap().push(observer);
    }

    /// Reports `status` to every registered observer.
    pub fn report_status(&self, status: &ComponentStatus) {
        let observers = self.observers.lock().unwrap();
        for observer in observers.iter() {
            observer(status);
        }
    }

    /// Drops this instance from its map so the next lookup creates a
    /// fresh one. Called when the component shuts down.
    pub fn remove(&self) {
        if let Some(map) = self.map.upgrade() {
            map.lock().unwrap().remove(&self.key);
        }
    }
}
