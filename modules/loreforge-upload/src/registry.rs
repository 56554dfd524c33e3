use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use loreforge_common::ActorKv;

use crate::actor::UploadHandle;

/// Process-wide map of upload session id to actor. One actor per multipart
/// upload; actors for finished uploads are dropped via `remove`.
pub struct UploadRegistry {
    kv: Arc<dyn ActorKv>,
    sessions: Mutex<HashMap<String, UploadHandle>>,
}

impl UploadRegistry {
    pub fn new(kv: Arc<dyn ActorKv>) -> Self {
        Self {
            kv,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_spawn(&self, session_id: &str) -> UploadHandle {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(session_id) {
            if handle.is_alive() {
                return handle.clone();
            }
        }
        let handle = UploadHandle::spawn(session_id, self.kv.clone());
        sessions.insert(session_id.to_string(), handle.clone());
        handle
    }

    pub async fn remove(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }
}
