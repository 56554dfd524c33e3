use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use loreforge_common::{ActorKv, LoreforgeError, UploadPart, UploadSession, UploadStatus};

const SESSION_KEY: &str = "session";
const PARTS_KEY: &str = "parts";
const MAILBOX_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, LoreforgeError>>;

#[derive(Debug, Clone)]
pub struct CreateUploadSession {
    pub owner_id: String,
    pub file_key: String,
    pub upload_id: String,
    pub filename: String,
    pub file_size: i64,
    pub total_parts: i32,
}

enum UploadCommand {
    Create(CreateUploadSession, Reply<UploadSession>),
    Get(Reply<UploadSession>),
    UpdateStatus(UploadStatus, Reply<UploadSession>),
    AddPart(UploadPart, Reply<UploadSession>),
    Complete(Reply<UploadSession>),
    Delete(Reply<()>),
}

/// Cloneable handle to one upload session's actor.
#[derive(Clone)]
pub struct UploadHandle {
    session_id: String,
    tx: mpsc::Sender<UploadCommand>,
}

impl UploadHandle {
    pub fn spawn(session_id: impl Into<String>, kv: Arc<dyn ActorKv>) -> Self {
        let session_id = session_id.into();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let actor = UploadActor {
            session_id: session_id.clone(),
            kv,
            session: None,
            parts: Vec::new(),
            hydrated: false,
        };
        tokio::spawn(actor.run(rx));

        Self { session_id, tx }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn create(&self, params: CreateUploadSession) -> Result<UploadSession, LoreforgeError> {
        self.call(|reply| UploadCommand::Create(params, reply)).await
    }

    pub async fn get(&self) -> Result<UploadSession, LoreforgeError> {
        self.call(UploadCommand::Get).await
    }

    pub async fn update_status(&self, status: UploadStatus) -> Result<UploadSession, LoreforgeError> {
        self.call(|reply| UploadCommand::UpdateStatus(status, reply))
            .await
    }

    pub async fn add_part(&self, part: UploadPart) -> Result<UploadSession, LoreforgeError> {
        self.call(|reply| UploadCommand::AddPart(part, reply)).await
    }

    pub async fn complete(&self) -> Result<UploadSession, LoreforgeError> {
        self.call(UploadCommand::Complete).await
    }

    pub async fn delete(&self) -> Result<(), LoreforgeError> {
        self.call(UploadCommand::Delete).await
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> UploadCommand,
    ) -> Result<T, LoreforgeError> {
        let (reply, ack) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| LoreforgeError::Fatal(format!("upload actor {} is gone", self.session_id)))?;
        ack.await
            .map_err(|_| LoreforgeError::Fatal(format!("upload actor {} dropped reply", self.session_id)))?
    }
}

struct UploadActor {
    session_id: String,
    kv: Arc<dyn ActorKv>,
    session: Option<UploadSession>,
    parts: Vec<UploadPart>,
    hydrated: bool,
}

impl UploadActor {
    async fn run(mut self, mut rx: mpsc::Receiver<UploadCommand>) {
        while let Some(cmd) = rx.recv().await {
            if !self.hydrated {
                self.hydrate().await;
            }
            match cmd {
                UploadCommand::Create(params, reply) => {
                    let _ = reply.send(self.create(params).await);
                }
                UploadCommand::Get(reply) => {
                    let _ = reply.send(self.require_session().cloned());
                }
                UploadCommand::UpdateStatus(status, reply) => {
                    let _ = reply.send(self.update_status(status).await);
                }
                UploadCommand::AddPart(part, reply) => {
                    let _ = reply.send(self.add_part(part).await);
                }
                UploadCommand::Complete(reply) => {
                    let _ = reply.send(self.complete().await);
                }
                UploadCommand::Delete(reply) => {
                    let _ = reply.send(self.delete().await);
                    return;
                }
            }
        }
    }

    /// Load persisted state, if any. A fresh actor for an existing session id
    /// (process restart) picks up exactly where the old one stopped.
    async fn hydrate(&mut self) {
        self.hydrated = true;
        match self.kv.get(&self.session_id, SESSION_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(session) => self.session = Some(session),
                Err(e) => warn!(session = %self.session_id, error = %e, "unparseable persisted session"),
            },
            Ok(None) => {}
            Err(e) => warn!(session = %self.session_id, error = %e, "failed to hydrate session"),
        }
        match self.kv.get(&self.session_id, PARTS_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parts) => self.parts = parts,
                Err(e) => warn!(session = %self.session_id, error = %e, "unparseable persisted parts"),
            },
            Ok(None) => {}
            Err(e) => warn!(session = %self.session_id, error = %e, "failed to hydrate parts"),
        }
    }

    async fn create(&mut self, params: CreateUploadSession) -> Result<UploadSession, LoreforgeError> {
        if self.session.is_some() {
            return Err(LoreforgeError::Conflict(format!(
                "upload session {} already exists",
                self.session_id
            )));
        }
        if params.total_parts <= 0 {
            return Err(LoreforgeError::Validation(
                "total_parts must be positive".to_string(),
            ));
        }

        let now = Utc::now();
        let session = UploadSession {
            id: self.session_id.clone(),
            owner_id: params.owner_id,
            file_key: params.file_key,
            upload_id: params.upload_id,
            filename: params.filename,
            file_size: params.file_size,
            total_parts: params.total_parts,
            uploaded_parts: 0,
            status: UploadStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.session = Some(session.clone());
        self.parts.clear();
        self.persist().await?;
        info!(session = %self.session_id, total_parts = session.total_parts, "upload session created");
        Ok(session)
    }

    async fn update_status(&mut self, status: UploadStatus) -> Result<UploadSession, LoreforgeError> {
        let session = self.require_session_mut()?;
        session.status = status;
        session.updated_at = Utc::now();
        let session = session.clone();
        self.persist().await?;
        Ok(session)
    }

    /// Re-acked part numbers replace the previous ack; they never duplicate.
    async fn add_part(&mut self, part: UploadPart) -> Result<UploadSession, LoreforgeError> {
        let (total_parts, status) = {
            let session = self.require_session()?;
            (session.total_parts, session.status)
        };
        if part.part_number < 1 || part.part_number > total_parts {
            return Err(LoreforgeError::Validation(format!(
                "part_number {} out of range 1..={total_parts}",
                part.part_number
            )));
        }
        if status == UploadStatus::Completed {
            return Err(LoreforgeError::Conflict(
                "upload session is already completed".to_string(),
            ));
        }

        match self
            .parts
            .iter_mut()
            .find(|p| p.part_number == part.part_number)
        {
            Some(existing) => *existing = part,
            None => self.parts.push(part),
        }
        self.parts.sort_by_key(|p| p.part_number);

        let uploaded = self.parts.len() as i32;
        let session = self.require_session_mut()?;
        session.uploaded_parts = uploaded;
        session.status = UploadStatus::Uploading;
        session.updated_at = Utc::now();
        let session = session.clone();
        self.persist().await?;
        Ok(session)
    }

    async fn complete(&mut self) -> Result<UploadSession, LoreforgeError> {
        let session = self.require_session()?;
        if (self.parts.len() as i32) != session.total_parts {
            return Err(LoreforgeError::Precondition(format!(
                "upload has {}/{} parts",
                self.parts.len(),
                session.total_parts
            )));
        }

        let session = self.require_session_mut()?;
        session.status = UploadStatus::Completed;
        session.updated_at = Utc::now();
        let session = session.clone();
        self.persist().await?;
        info!(session = %self.session_id, "upload session completed");
        Ok(session)
    }

    async fn delete(&mut self) -> Result<(), LoreforgeError> {
        self.kv
            .delete(&self.session_id, SESSION_KEY)
            .await
            .map_err(from_kv)?;
        self.kv
            .delete(&self.session_id, PARTS_KEY)
            .await
            .map_err(from_kv)?;
        self.session = None;
        self.parts.clear();
        Ok(())
    }

    async fn persist(&self) -> Result<(), LoreforgeError> {
        let session = self.require_session()?;
        self.kv
            .put(
                &self.session_id,
                SESSION_KEY,
                serde_json::to_value(session).map_err(|e| LoreforgeError::Fatal(e.to_string()))?,
                None,
            )
            .await
            .map_err(from_kv)?;
        self.kv
            .put(
                &self.session_id,
                PARTS_KEY,
                serde_json::to_value(&self.parts)
                    .map_err(|e| LoreforgeError::Fatal(e.to_string()))?,
                None,
            )
            .await
            .map_err(from_kv)?;
        Ok(())
    }

    fn require_session(&self) -> Result<&UploadSession, LoreforgeError> {
        self.session.as_ref().ok_or_else(|| {
            LoreforgeError::NotFound(format!("upload session {}", self.session_id))
        })
    }

    fn require_session_mut(&mut self) -> Result<&mut UploadSession, LoreforgeError> {
        self.session.as_mut().ok_or_else(|| {
            LoreforgeError::NotFound(format!("upload session {}", self.session_id))
        })
    }
}

/// KV failures inside the actor surface as transient errors to the caller.
fn from_kv(e: anyhow::Error) -> LoreforgeError {
    LoreforgeError::Transient(e.to_string())
}

/// Fresh session id for a new upload.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::MemoryKv;

    fn params(total_parts: i32) -> CreateUploadSession {
        CreateUploadSession {
            owner_id: "u1".to_string(),
            file_key: "uploads/u1/tome.pdf".to_string(),
            upload_id: "mp-1".to_string(),
            filename: "tome.pdf".to_string(),
            file_size: 1024,
            total_parts,
        }
    }

    fn part(n: i32) -> UploadPart {
        UploadPart {
            part_number: n,
            etag: format!("etag-{n}"),
            size: 512,
        }
    }

    #[tokio::test]
    async fn create_add_complete_happy_path() {
        let handle = UploadHandle::spawn("s1", Arc::new(MemoryKv::new()));
        let session = handle.create(params(2)).await.unwrap();
        assert_eq!(session.status, UploadStatus::Pending);

        let session = handle.add_part(part(1)).await.unwrap();
        assert_eq!(session.uploaded_parts, 1);
        assert_eq!(session.status, UploadStatus::Uploading);

        let session = handle.add_part(part(2)).await.unwrap();
        assert_eq!(session.uploaded_parts, 2);

        let session = handle.complete().await.unwrap();
        assert_eq!(session.status, UploadStatus::Completed);
        assert_eq!(session.uploaded_parts, session.total_parts);
    }

    #[tokio::test]
    async fn complete_before_all_parts_is_a_precondition_failure() {
        let handle = UploadHandle::spawn("s1", Arc::new(MemoryKv::new()));
        handle.create(params(3)).await.unwrap();
        handle.add_part(part(1)).await.unwrap();

        let err = handle.complete().await.unwrap_err();
        assert!(matches!(err, LoreforgeError::Precondition(_)));
    }

    #[tokio::test]
    async fn reacked_part_replaces_instead_of_duplicating() {
        let handle = UploadHandle::spawn("s1", Arc::new(MemoryKv::new()));
        handle.create(params(2)).await.unwrap();
        handle.add_part(part(1)).await.unwrap();

        let replaced = UploadPart {
            part_number: 1,
            etag: "etag-1b".to_string(),
            size: 600,
        };
        let session = handle.add_part(replaced).await.unwrap();
        assert_eq!(session.uploaded_parts, 1, "re-ack must not add a part");
    }

    #[tokio::test]
    async fn out_of_range_part_is_rejected() {
        let handle = UploadHandle::spawn("s1", Arc::new(MemoryKv::new()));
        handle.create(params(2)).await.unwrap();
        assert!(matches!(
            handle.add_part(part(0)).await.unwrap_err(),
            LoreforgeError::Validation(_)
        ));
        assert!(matches!(
            handle.add_part(part(3)).await.unwrap_err(),
            LoreforgeError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn state_survives_actor_restart() {
        let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());
        let first = UploadHandle::spawn("s1", kv.clone());
        first.create(params(2)).await.unwrap();
        first.add_part(part(1)).await.unwrap();

        // A new actor for the same session id rehydrates from KV.
        let second = UploadHandle::spawn("s1", kv);
        let session = second.get().await.unwrap();
        assert_eq!(session.uploaded_parts, 1);
        let session = second.add_part(part(2)).await.unwrap();
        assert_eq!(session.uploaded_parts, 2);
        second.complete().await.unwrap();
    }

    #[tokio::test]
    async fn delete_clears_persisted_state() {
        let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());
        let handle = UploadHandle::spawn("s1", kv.clone());
        handle.create(params(1)).await.unwrap();
        handle.delete().await.unwrap();

        assert!(kv.get("s1", "session").await.unwrap().is_none());
        assert!(kv.get("s1", "parts").await.unwrap().is_none());
    }
}
