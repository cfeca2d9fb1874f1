use parking_lot::Mutex;
use std::sync::Arc;

use crate::manifests::ManifestStore;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Everything the management lock guards
pub struct ManagedState<R> {
    pub manifests: ManifestStore,
    pub runtime: R,
    /// Terminal once set
    pub deregistered: bool,
}
