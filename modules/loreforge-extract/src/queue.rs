use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

use loreforge_common::LoreforgeError;

use crate::worker::ExtractionWorker;

/// One unit of extraction work, keyed by `(campaign_id, resource_id)`.
#[derive(Debug, Clone)]
pub struct ExtractionTask {
    pub username: String,
    pub campaign_id: String,
    pub resource_id: String,
    pub resource_name: String,
    pub file_key: String,
}

impl ExtractionTask {
    fn key(&self) -> (String, String) {
        (self.campaign_id.clone(), self.resource_id.clone())
    }
}

/// Bounded extraction queue with at most one in-flight task per
/// `(campaign_id, resource_id)`. Duplicate enqueues for a key that is queued
/// or running are dropped, so many files attached in rapid succession cannot
/// overload the downstream providers.
#[derive(Clone)]
pub struct ExtractionQueue {
    tx: mpsc::Sender<ExtractionTask>,
    in_flight: Arc<Mutex<HashSet<(String, String)>>>,
}

impl ExtractionQueue {
    /// Start the queue and its worker pool.
    pub fn start(worker: Arc<ExtractionWorker>, concurrency: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<ExtractionTask>(capacity);
        let in_flight: Arc<Mutex<HashSet<(String, String)>>> =
            Arc::new(Mutex::new(HashSet::new()));

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..concurrency.max(1) {
            let rx = rx.clone();
            let worker = worker.clone();
            let in_flight = in_flight.clone();
            tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else {
                        return; // queue dropped
                    };
                    let key = task.key();
                    info!(
                        worker = worker_id,
                        campaign = %task.campaign_id,
                        resource = %task.resource_id,
                        "extraction task started"
                    );
                    worker.run_task(&task).await;
                    in_flight.lock().unwrap().remove(&key);
                }
            });
        }

        Self { tx, in_flight }
    }

    /// Enqueue a task. Returns false when a task for the same key is already
    /// queued or running (the duplicate is dropped).
    pub fn enqueue(&self, task: ExtractionTask) -> Result<bool, LoreforgeError> {
        let key = task.key();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(key.clone()) {
                return Ok(false);
            }
        }

        match self.tx.try_send(task) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.in_flight.lock().unwrap().remove(&key);
                warn!(
                    campaign = %task.campaign_id,
                    resource = %task.resource_id,
                    "extraction queue full"
                );
                Err(LoreforgeError::Transient(
                    "extraction queue is full, retry shortly".to_string(),
                ))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.in_flight.lock().unwrap().remove(&key);
                Err(LoreforgeError::Fatal("extraction queue is stopped".to_string()))
            }
        }
    }

    /// Whether a task for this key is queued or running.
    pub fn is_in_flight(&self, campaign_id: &str, resource_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap()
            .contains(&(campaign_id.to_string(), resource_id.to_string()))
    }
}
