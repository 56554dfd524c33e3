use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use loreforge_common::ActorKv;

use crate::actor::HubHandle;

/// Process-wide map of user id to hub actor. Actors spawn lazily on first
/// use and are replaced if their task has exited.
pub struct HubRegistry {
    kv: Arc<dyn ActorKv>,
    hubs: Mutex<HashMap<String, HubHandle>>,
}

impl HubRegistry {
    pub fn new(kv: Arc<dyn ActorKv>) -> Self {
        Self {
            kv,
            hubs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_spawn(&self, user_id: &str) -> HubHandle {
        let mut hubs = self.hubs.lock().await;
        if let Some(handle) = hubs.get(user_id) {
            if handle.is_alive() {
                return handle.clone();
            }
        }
        let handle = HubHandle::spawn(user_id, self.kv.clone());
        hubs.insert(user_id.to_string(), handle.clone());
        handle
    }

    /// Destroy a user's hub if one is running.
    pub async fn destroy(&self, user_id: &str) {
        let handle = self.hubs.lock().await.remove(user_id);
        if let Some(handle) = handle {
            let _ = handle.destroy().await;
        }
    }
}
