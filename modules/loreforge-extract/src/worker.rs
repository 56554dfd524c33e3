use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use ai_client::{AiError, AiSearch, SearchRequest};
use loreforge_common::{
    epoch_ms_now, ContentType, ExtractionStatus, LoreforgeError, Notification, NotificationType,
};
use loreforge_hub::HubRegistry;
use loreforge_rebuild::ChangelogRecorder;
use loreforge_store::{CampaignStore, EntityStore, ResourceStore, ShardStore};

use crate::projector::{candidate_entity_ids, candidate_target_ids, project};
use crate::queue::ExtractionTask;
use crate::shard_factory::{build_candidates, ShardCandidate};
use crate::parse::parse_ai_response;

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Results requested per AI-search chunk.
    pub chunk_size: u32,
    pub max_chunks: usize,
    pub chunk_delay: Duration,
    /// Retries per chunk on retryable provider errors.
    pub chunk_retries: usize,
    pub timeout_backoff: Vec<Duration>,
    pub capacity_backoff: Vec<Duration>,
    /// Task-level retry delays; their count is the attempt budget.
    pub task_retry_delays: Vec<Duration>,
    /// Responses beyond this size fail the task as a memory error.
    pub max_response_bytes: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            max_chunks: 2,
            chunk_delay: Duration::from_secs(5),
            chunk_retries: 3,
            timeout_backoff: vec![
                Duration::from_secs(3),
                Duration::from_secs(6),
                Duration::from_secs(12),
            ],
            capacity_backoff: vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(40),
            ],
            task_retry_delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
            max_response_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractionOutcome {
    pub shards: usize,
    pub entities: usize,
    pub relationships: usize,
}

/// Processes one extraction task end to end: chunked AI search, permissive
/// parse, shard persistence, graph projection, changelog recording, and
/// lifecycle notifications at every step.
pub struct ExtractionWorker {
    search: Arc<dyn AiSearch>,
    campaigns: CampaignStore,
    resources: ResourceStore,
    shards: ShardStore,
    entities: EntityStore,
    recorder: ChangelogRecorder,
    hubs: Arc<HubRegistry>,
    config: ExtractionConfig,
}

impl ExtractionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: Arc<dyn AiSearch>,
        campaigns: CampaignStore,
        resources: ResourceStore,
        shards: ShardStore,
        entities: EntityStore,
        recorder: ChangelogRecorder,
        hubs: Arc<HubRegistry>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            search,
            campaigns,
            resources,
            shards,
            entities,
            recorder,
            hubs,
            config,
        }
    }

    /// Run a task with the task-level retry policy. Terminal states always
    /// land in the resource status row and a user-visible notification.
    pub async fn run_task(&self, task: &ExtractionTask) {
        if let Err(e) = self
            .resources
            .set_status(&task.resource_id, ExtractionStatus::Running)
            .await
        {
            warn!(resource = %task.resource_id, error = %e, "failed to mark extraction running");
        }

        let attempts = self.config.task_retry_delays.len().max(1);
        for attempt in 0..attempts {
            match self.process(task).await {
                Ok(outcome) => {
                    if let Err(e) = self
                        .resources
                        .set_status(&task.resource_id, ExtractionStatus::Completed)
                        .await
                    {
                        warn!(resource = %task.resource_id, error = %e, "failed to mark extraction completed");
                    }
                    info!(
                        resource = %task.resource_id,
                        shards = outcome.shards,
                        entities = outcome.entities,
                        "extraction completed"
                    );
                    return;
                }
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    warn!(
                        resource = %task.resource_id,
                        attempt = attempt + 1,
                        error = %e,
                        "extraction attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.task_retry_delays[attempt]).await;
                }
                Err(e) => {
                    self.fail_task(task, &e).await;
                    return;
                }
            }
        }
    }

    async fn fail_task(&self, task: &ExtractionTask, error: &LoreforgeError) {
        if let Err(e) = self
            .resources
            .set_status(&task.resource_id, ExtractionStatus::Failed)
            .await
        {
            warn!(resource = %task.resource_id, error = %e, "failed to mark extraction failed");
        }

        let message = match error {
            LoreforgeError::RateLimited {
                message,
                retry_after_secs: Some(secs),
            } => format!("{message} — retry in about {secs}s"),
            other => other.to_string(),
        };
        self.notify(
            &task.username,
            Notification::new(NotificationType::IndexingFailed, "Indexing failed", message)
                .with_data(serde_json::json!({
                    "resourceId": task.resource_id,
                    "errorCode": error.tag(),
                })),
        )
        .await;
    }

    /// One attempt at the full pipeline.
    pub async fn process(
        &self,
        task: &ExtractionTask,
    ) -> Result<ExtractionOutcome, LoreforgeError> {
        let campaign = self
            .campaigns
            .get(&task.campaign_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?
            .ok_or_else(|| LoreforgeError::NotFound(format!("campaign {}", task.campaign_id)))?;
        if campaign.rag_base_path.is_empty() {
            return Err(LoreforgeError::Validation(format!(
                "campaign {} has no search base path",
                campaign.id
            )));
        }
        let resource = self
            .resources
            .get(&task.resource_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?
            .ok_or_else(|| LoreforgeError::NotFound(format!("resource {}", task.resource_id)))?;

        self.notify(
            &task.username,
            Notification::new(
                NotificationType::IndexingStarted,
                "Indexing started",
                format!("Extracting structured content from {}", resource.file_name),
            )
            .with_data(serde_json::json!({ "resourceId": resource.id })),
        )
        .await;

        let query = build_query(&resource.file_name);
        let folder = format!("{}{}", campaign.rag_base_path, resource.file_key);

        let mut candidates: Vec<ShardCandidate> = Vec::new();
        let mut parse_failures: Vec<String> = Vec::new();

        for chunk in 0..self.config.max_chunks {
            if chunk > 0 {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
            let raw = self
                .search_chunk(&query, &folder, self.config.chunk_size, true)
                .await?;
            if raw.len() > self.config.max_response_bytes {
                return Err(LoreforgeError::ResourceExhausted(format!(
                    "AI search response is {} bytes; split the file and retry",
                    raw.len()
                )));
            }

            match parse_ai_response(&raw) {
                Ok(parsed) => {
                    let output = build_candidates(&parsed, &campaign.id, &resource, epoch_ms_now());
                    if !output.invalid.is_empty() {
                        self.diagnostic(&task.username, "shard candidates rejected", &output.invalid)
                            .await;
                    }
                    if !output.valid.is_empty() {
                        self.notify(
                            &task.username,
                            Notification::new(
                                NotificationType::ShardsGenerated,
                                format!("Shards Discovered (chunk {})", chunk + 1),
                                format!("{} structured items found", output.valid.len()),
                            )
                            .with_data(serde_json::json!({
                                "resourceId": resource.id,
                                "chunk": chunk + 1,
                                "count": output.valid.len(),
                            })),
                        )
                        .await;
                    }
                    candidates.extend(output.valid);
                }
                Err(e) => parse_failures.push(e.to_string()),
            }
        }

        // Both chunks empty: one ultra-minimal request, no retries. Failure
        // here just means the zero-results path below.
        if candidates.is_empty() {
            match self.search_chunk(&query, &folder, 1, false).await {
                Ok(raw) => match parse_ai_response(&raw) {
                    Ok(parsed) => {
                        let output =
                            build_candidates(&parsed, &campaign.id, &resource, epoch_ms_now());
                        candidates.extend(output.valid);
                    }
                    Err(e) => parse_failures.push(e.to_string()),
                },
                Err(e) => warn!(resource = %resource.id, error = %e, "fallback search failed"),
            }
        }

        if candidates.is_empty() {
            self.notify(
                &task.username,
                Notification::new(
                    NotificationType::ShardsGenerated,
                    "No Shards Found",
                    format!("No structured content found in {}", resource.file_name),
                )
                .with_data(serde_json::json!({ "resourceId": resource.id, "count": 0 })),
            )
            .await;
            if !parse_failures.is_empty() {
                self.diagnostic(&task.username, "parse issue", &parse_failures)
                    .await;
            }
            return Ok(ExtractionOutcome::default());
        }

        // Persist the whole batch, then project into the graph.
        let shard_rows: Vec<_> = candidates.iter().cloned().map(|c| c.into_shard()).collect();
        self.shards
            .insert_batch(&shard_rows)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;

        let mut referenced = candidate_entity_ids(&campaign.id, &candidates);
        referenced.extend(candidate_target_ids(&campaign.id, &candidates));
        let mut existing: HashSet<String> = HashSet::new();
        for id in referenced {
            if self
                .entities
                .exists(&id)
                .await
                .map_err(|e| LoreforgeError::Transient(e.to_string()))?
            {
                existing.insert(id);
            }
        }

        let projection = project(&campaign.id, &candidates, &existing, Utc::now());
        for entity in &projection.entities {
            self.entities
                .upsert(entity)
                .await
                .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        }
        for relationship in &projection.relationships {
            self.entities
                .upsert_relationship(relationship)
                .await
                .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        }
        if !projection.dropped.is_empty() {
            self.diagnostic(&task.username, "projection dropped items", &projection.dropped)
                .await;
        }

        self.recorder
            .record(&campaign.id, None, projection.payload.clone())
            .await?;

        let outcome = ExtractionOutcome {
            shards: shard_rows.len(),
            entities: projection.entities.len(),
            relationships: projection.relationships.len(),
        };
        self.notify(
            &task.username,
            Notification::new(
                NotificationType::ShardsGenerated,
                "Shards Discovered",
                format!(
                    "{} shards extracted from {}",
                    outcome.shards, resource.file_name
                ),
            )
            .with_data(serde_json::json!({
                "resourceId": resource.id,
                "count": outcome.shards,
                "entities": outcome.entities,
                "relationships": outcome.relationships,
            })),
        )
        .await;

        Ok(outcome)
    }

    /// One chunk against the AI search provider, with the per-chunk retry
    /// schedule (timeouts back off 3/6/12 s, capacity errors 10/20/40 s).
    async fn search_chunk(
        &self,
        query: &str,
        folder: &str,
        max_results: u32,
        retries_allowed: bool,
    ) -> Result<String, LoreforgeError> {
        let mut attempt = 0usize;
        loop {
            let request = SearchRequest::new(query, folder, max_results);
            match self.search.search(request).await {
                Ok(raw) => return Ok(raw),
                Err(err) => {
                    let can_retry =
                        retries_allowed && err.is_retryable() && attempt < self.config.chunk_retries;
                    if !can_retry {
                        return Err(classify(err));
                    }
                    let delay = backoff_for(&err, attempt, &self.config);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "AI search chunk failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn notify(&self, username: &str, notification: Notification) {
        let hub = self.hubs.get_or_spawn(username).await;
        if let Err(e) = hub.publish(notification).await {
            warn!(user = username, error = %e, "extraction notification failed");
        }
    }

    /// Hidden diagnostics carry engineering detail without cluttering the UI.
    async fn diagnostic(&self, username: &str, title: &str, details: &[String]) {
        self.notify(
            username,
            Notification::new(NotificationType::Error, title, details.join("; "))
                .with_data(serde_json::json!({ "details": details }))
                .hidden(),
        )
        .await;
    }
}

/// Map provider errors into the workspace taxonomy.
fn classify(err: AiError) -> LoreforgeError {
    match err {
        AiError::Timeout => LoreforgeError::Transient("AI search timed out".to_string()),
        AiError::Capacity(m) => LoreforgeError::Transient(format!("provider at capacity: {m}")),
        AiError::Network(m) => LoreforgeError::Transient(format!("network error: {m}")),
        AiError::RateLimited { retry_after_secs } => LoreforgeError::RateLimited {
            message: "AI search rate limited".to_string(),
            retry_after_secs,
        },
        AiError::Api { status, body } => {
            LoreforgeError::Validation(format!("AI search rejected the request ({status}): {body}"))
        }
        AiError::Malformed(m) => LoreforgeError::Validation(format!("malformed response: {m}")),
    }
}

/// Backoff for one chunk retry: schedule depends on the error class.
fn backoff_for(err: &AiError, attempt: usize, config: &ExtractionConfig) -> Duration {
    let schedule = if err.is_capacity() {
        &config.capacity_backoff
    } else {
        &config.timeout_backoff
    };
    schedule
        .get(attempt)
        .or_else(|| schedule.last())
        .copied()
        .unwrap_or(Duration::from_secs(3))
}

fn build_query(resource_name: &str) -> String {
    let type_list = ContentType::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Extract every structured RPG primitive from the document \"{resource_name}\". \
         Return a single JSON object whose top-level keys are exactly: {type_list}, \
         plus a \"meta\" object. Each key maps to an array (empty when nothing of \
         that type appears). Each item needs a \"name\" and may carry a \
         \"relationships\" array of {{type, target, strength}}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_the_retry_policy() {
        assert!(classify(AiError::Timeout).is_retryable());
        assert!(classify(AiError::Capacity("x".into())).is_retryable());
        assert!(classify(AiError::Network("x".into())).is_retryable());
        assert!(!classify(AiError::RateLimited {
            retry_after_secs: Some(10)
        })
        .is_retryable());
        assert!(!classify(AiError::Api {
            status: 400,
            body: String::new()
        })
        .is_retryable());
    }

    #[test]
    fn rate_limit_hint_survives_classification() {
        let e = classify(AiError::RateLimited {
            retry_after_secs: Some(30),
        });
        match e {
            LoreforgeError::RateLimited {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, Some(30)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn backoff_schedules_differ_by_error_class() {
        let config = ExtractionConfig::default();
        assert_eq!(
            backoff_for(&AiError::Timeout, 0, &config),
            Duration::from_secs(3)
        );
        assert_eq!(
            backoff_for(&AiError::Timeout, 2, &config),
            Duration::from_secs(12)
        );
        assert_eq!(
            backoff_for(&AiError::Capacity("x".into()), 0, &config),
            Duration::from_secs(10)
        );
        assert_eq!(
            backoff_for(&AiError::Capacity("x".into()), 2, &config),
            Duration::from_secs(40)
        );
        // Past the schedule end, the last slot repeats.
        assert_eq!(
            backoff_for(&AiError::Timeout, 9, &config),
            Duration::from_secs(12)
        );
    }

    #[test]
    fn query_names_the_closed_vocabulary() {
        let q = build_query("tome.pdf");
        assert!(q.contains("monster"));
        assert!(q.contains("encounter_table"));
        assert!(q.contains("custom"));
        assert!(q.contains("tome.pdf"));
    }
}
