use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use loreforge_common::{epoch_ms_now, ActorKv, Notification, NotificationType};

use crate::writer::{StreamEvent, StreamWriter};

/// KV key prefix for offline-queued notifications.
pub const QUEUE_PREFIX: &str = "queued_notification:";

/// Queued notifications older than this are reaped, never replayed.
pub const QUEUE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const QUEUE_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Keep-alive cadence. Subscribers whose ping write fails are reaped.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Command-channel depth per user actor.
const MAILBOX_CAPACITY: usize = 256;

/// A queued notification is still deliverable iff it is strictly younger than
/// the TTL window: `ts = now − 7d + 1ms` delivers, `ts = now − 7d` is reaped.
fn is_expired(ts: i64, now: i64) -> bool {
    ts <= now - QUEUE_TTL_MS
}

enum HubCommand {
    Subscribe {
        writer: Arc<dyn StreamWriter>,
        done: oneshot::Sender<String>,
    },
    Unsubscribe {
        subscriber_id: String,
    },
    Publish {
        notification: Notification,
        done: oneshot::Sender<()>,
    },
    Ping {
        done: Option<oneshot::Sender<()>>,
    },
    Destroy {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable handle to one user's hub actor.
#[derive(Clone)]
pub struct HubHandle {
    user_id: String,
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Spawn the actor for `user_id`. Expired queue entries are cleaned at
    /// start, before any subscriber can connect.
    pub fn spawn(user_id: impl Into<String>, kv: Arc<dyn ActorKv>) -> Self {
        let user_id = user_id.into();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let actor = HubActor {
            user_id: user_id.clone(),
            kv,
            subscribers: HashMap::new(),
        };
        tokio::spawn(actor.run(rx));

        Self { user_id, tx }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Register a subscriber. Any existing subscriber for this user is closed
    /// first; queued notifications replay in order, then a `connected` marker,
    /// then live events. Returns the subscriber id for later unsubscribe.
    pub async fn subscribe(&self, writer: Arc<dyn StreamWriter>) -> Result<String> {
        let (done, ack) = oneshot::channel();
        self.tx
            .send(HubCommand::Subscribe { writer, done })
            .await
            .map_err(|_| anyhow::anyhow!("hub actor for {} is gone", self.user_id))?;
        Ok(ack.await?)
    }

    /// Remove a subscriber and close its writer. Idempotent.
    pub fn unsubscribe(&self, subscriber_id: String) {
        let _ = self.tx.try_send(HubCommand::Unsubscribe { subscriber_id });
    }

    /// Deliver to every live subscriber, or queue when none can receive.
    pub async fn publish(&self, notification: Notification) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.tx
            .send(HubCommand::Publish { notification, done })
            .await
            .map_err(|_| anyhow::anyhow!("hub actor for {} is gone", self.user_id))?;
        ack.await?;
        Ok(())
    }

    /// Force a keep-alive round now (the actor also pings on its own timer).
    pub async fn ping_now(&self) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.tx.send(HubCommand::Ping { done: Some(done) }).await?;
        ack.await?;
        Ok(())
    }

    /// Close every writer, clear subscriber state, and stop the actor.
    pub async fn destroy(&self) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.tx.send(HubCommand::Destroy { done }).await?;
        ack.await?;
        Ok(())
    }
}

struct HubActor {
    user_id: String,
    kv: Arc<dyn ActorKv>,
    subscribers: HashMap<String, Arc<dyn StreamWriter>>,
}

impl HubActor {
    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        self.cleanup_expired().await;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await; // the first tick fires immediately; skip it

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(HubCommand::Subscribe { writer, done }) => {
                        let id = self.subscribe(writer).await;
                        let _ = done.send(id);
                    }
                    Some(HubCommand::Unsubscribe { subscriber_id }) => {
                        if let Some(writer) = self.subscribers.remove(&subscriber_id) {
                            writer.close();
                        }
                    }
                    Some(HubCommand::Publish { notification, done }) => {
                        self.publish(notification).await;
                        let _ = done.send(());
                    }
                    Some(HubCommand::Ping { done }) => {
                        self.ping_round().await;
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                    }
                    Some(HubCommand::Destroy { done }) => {
                        self.destroy().await;
                        let _ = done.send(());
                        return;
                    }
                    None => return,
                },
                _ = ping.tick() => self.ping_round().await,
            }
        }
    }

    /// Reconnection replaces: close anything already registered, replay the
    /// queue, then mark the stream live with a `connected` event.
    async fn subscribe(&mut self, writer: Arc<dyn StreamWriter>) -> String {
        for (_, old) in self.subscribers.drain() {
            old.close();
        }

        self.cleanup_expired().await;
        let queued = self.load_queued().await;

        let subscriber_id = Uuid::new_v4().to_string();
        self.subscribers.insert(subscriber_id.clone(), writer.clone());

        for (key, notification) in queued {
            match writer.write(StreamEvent::Event(notification)).await {
                Ok(()) => {
                    // Delete only after the write lands. A crash between the
                    // two means redelivery, which clients dedup.
                    if let Err(e) = self.kv.delete(&self.user_id, &key).await {
                        warn!(user = %self.user_id, key, error = %e, "failed to delete delivered queue entry");
                    }
                }
                Err(_) => {
                    // Stream broke mid-replay: stop immediately, leave the
                    // rest queued, and never send `connected` on this stream.
                    warn!(user = %self.user_id, "subscriber broke during replay");
                    self.subscribers.remove(&subscriber_id);
                    writer.close();
                    return subscriber_id;
                }
            }
        }

        let connected = Notification::new(NotificationType::Connected, "Connected", "");
        if writer.write(StreamEvent::Event(connected)).await.is_err() {
            self.subscribers.remove(&subscriber_id);
            writer.close();
        } else {
            info!(user = %self.user_id, subscriber = %subscriber_id, "subscriber connected");
        }

        subscriber_id
    }

    async fn publish(&mut self, mut notification: Notification) {
        notification.timestamp = epoch_ms_now();

        if self.subscribers.is_empty() {
            self.queue(&notification).await;
            return;
        }

        let mut delivered = 0usize;
        let mut dead: Vec<String> = Vec::new();

        for (id, writer) in &self.subscribers {
            if !writer.is_writable() {
                dead.push(id.clone());
                continue;
            }
            match writer.write(StreamEvent::Event(notification.clone())).await {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(id.clone()),
            }
        }

        for id in &dead {
            if let Some(writer) = self.subscribers.remove(id) {
                writer.close();
            }
        }
        if !dead.is_empty() {
            info!(user = %self.user_id, reaped = dead.len(), "reaped dead subscribers");
        }

        if delivered == 0 && self.subscribers.is_empty() {
            self.queue(&notification).await;
        }
    }

    async fn ping_round(&mut self) {
        let mut dead: Vec<String> = Vec::new();
        for (id, writer) in &self.subscribers {
            if writer
                .write(StreamEvent::Comment("ping".to_string()))
                .await
                .is_err()
            {
                dead.push(id.clone());
            }
        }
        for id in &dead {
            if let Some(writer) = self.subscribers.remove(id) {
                writer.close();
            }
        }
        if !dead.is_empty() {
            info!(user = %self.user_id, reaped = dead.len(), "ping reaped dead subscribers");
        }
    }

    async fn destroy(&mut self) {
        let reset = Notification::new(
            NotificationType::DurableObjectReset,
            "Reconnect",
            "stream is resetting",
        );
        for (_, writer) in self.subscribers.drain() {
            let _ = writer.write(StreamEvent::Event(reset.clone())).await;
            writer.close();
        }
        info!(user = %self.user_id, "hub destroyed");
    }

    /// KV failures here are logged, never raised: a broken queue must not
    /// take down live delivery.
    async fn queue(&self, notification: &Notification) {
        let key = format!("{QUEUE_PREFIX}{}:{}", notification.timestamp, Uuid::new_v4());
        let value = match serde_json::to_value(notification) {
            Ok(v) => v,
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "failed to serialize notification for queue");
                return;
            }
        };
        if let Err(e) = self
            .kv
            .put(
                &self.user_id,
                &key,
                value,
                Some(chrono::Duration::milliseconds(QUEUE_TTL_MS)),
            )
            .await
        {
            warn!(user = %self.user_id, error = %e, "failed to queue notification");
        }
    }

    /// Live queue entries, oldest first.
    async fn load_queued(&self) -> Vec<(String, Notification)> {
        let entries = match self.kv.list_prefix(&self.user_id, QUEUE_PREFIX).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "failed to load queued notifications");
                return Vec::new();
            }
        };

        let now = epoch_ms_now();
        let mut queued: Vec<(String, Notification)> = entries
            .into_iter()
            .filter_map(|(key, value)| {
                match serde_json::from_value::<Notification>(value) {
                    Ok(n) => Some((key, n)),
                    Err(e) => {
                        warn!(user = %self.user_id, key, error = %e, "dropping unparseable queue entry");
                        None
                    }
                }
            })
            .filter(|(_, n)| !is_expired(n.timestamp, now))
            .collect();
        queued.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));
        queued
    }

    async fn cleanup_expired(&self) {
        let entries = match self.kv.list_prefix(&self.user_id, QUEUE_PREFIX).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "failed to list queue for cleanup");
                return;
            }
        };

        let now = epoch_ms_now();
        for (key, value) in entries {
            let ts = serde_json::from_value::<Notification>(value)
                .map(|n| n.timestamp)
                .unwrap_or(0);
            if is_expired(ts, now) {
                if let Err(e) = self.kv.delete(&self.user_id, &key).await {
                    warn!(user = %self.user_id, key, error = %e, "failed to reap expired queue entry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_boundary_is_exact() {
        let now = 1_700_000_000_000i64;
        // One millisecond inside the window still delivers.
        assert!(!is_expired(now - QUEUE_TTL_MS + 1, now));
        // Exactly at the window edge is reaped.
        assert!(is_expired(now - QUEUE_TTL_MS, now));
        assert!(is_expired(now - QUEUE_TTL_MS - 1, now));
    }
}
