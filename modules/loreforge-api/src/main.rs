use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ai_client::{AutoRagClient, Claude, LlmClient};
use loreforge_agents::tools::{
    CreateCampaignTool, DeleteCampaignTool, DeleteEntityTool, DeletePdfFileTool,
    DeleteRelationshipTool, ListCampaignsTool, ListEntitiesTool, ListFilesTool,
    RejectRelationshipTool, UpdatePdfMetadataTool,
};
use loreforge_agents::{AgentRegistry, AgentRouter, ToolRuntime};
use loreforge_common::{Config, Notification};
use loreforge_extract::{ExtractionConfig, ExtractionQueue, ExtractionWorker};
use loreforge_graph::{
    CommunityDetector, CommunitySummarizer, DetectionParams, GraphCaps, GraphLoader,
    ImportanceCalculator,
};
use loreforge_hub::HubRegistry;
use loreforge_rebuild::{
    ChangelogRecorder, ImpactAccumulator, OrchestratorConfig, RebuildOrchestrator,
};
use loreforge_store::{
    migrate, CampaignStore, ChangelogStore, CommunityStore, EntityStore, FileStore,
    ImportanceStore, MessageStore, PgActorKv, RebuildStore, ResourceStore, ShardStore,
    SummaryStore,
};
use loreforge_upload::UploadRegistry;

mod auth;
mod error;
mod rest;
mod sse;

const CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
const EXTRACTION_CONCURRENCY: usize = 4;
const EXTRACTION_QUEUE_CAPACITY: usize = 256;
const REBUILD_QUEUE_CAPACITY: usize = 64;

pub struct AppState {
    pub config: Config,
    pub campaigns: CampaignStore,
    pub resources: ResourceStore,
    pub files: FileStore,
    pub entities: EntityStore,
    pub changelog: ChangelogStore,
    pub rebuilds: RebuildStore,
    pub messages: MessageStore,
    pub hubs: Arc<HubRegistry>,
    pub uploads: Arc<UploadRegistry>,
    pub queue: ExtractionQueue,
    pub agent_registry: Arc<AgentRegistry>,
    pub agent_router: Option<AgentRouter>,
    tool_runtimes: Mutex<HashMap<String, Arc<ToolRuntime>>>,
}

impl AppState {
    /// Publish to a user's hub, logging failures instead of raising: the
    /// request that triggered the notification has already succeeded.
    pub async fn publish(&self, user_id: &str, notification: Notification) {
        let hub = self.hubs.get_or_spawn(user_id).await;
        if let Err(e) = hub.publish(notification).await {
            warn!(user = user_id, error = %e, "notification publish failed");
        }
    }

    /// Per-user tool runtime, cached so pending confirmations survive across
    /// requests.
    pub async fn tool_runtime_for(&self, user_id: &str) -> Arc<ToolRuntime> {
        let mut runtimes = self.tool_runtimes.lock().await;
        if let Some(runtime) = runtimes.get(user_id) {
            return runtime.clone();
        }

        let runtime = Arc::new(
            ToolRuntime::new()
                .register(Arc::new(CreateCampaignTool {
                    campaigns: self.campaigns.clone(),
                    owner_id: user_id.to_string(),
                }))
                .register(Arc::new(ListCampaignsTool {
                    campaigns: self.campaigns.clone(),
                    owner_id: user_id.to_string(),
                }))
                .register(Arc::new(DeleteCampaignTool {
                    campaigns: self.campaigns.clone(),
                    owner_id: user_id.to_string(),
                }))
                .register(Arc::new(ListFilesTool {
                    files: self.files.clone(),
                    owner_id: user_id.to_string(),
                }))
                .register(Arc::new(UpdatePdfMetadataTool {
                    files: self.files.clone(),
                }))
                .register(Arc::new(DeletePdfFileTool {
                    files: self.files.clone(),
                }))
                .register(Arc::new(ListEntitiesTool {
                    entities: self.entities.clone(),
                }))
                .register(Arc::new(DeleteEntityTool {
                    entities: self.entities.clone(),
                }))
                .register(Arc::new(DeleteRelationshipTool {
                    entities: self.entities.clone(),
                }))
                .register(Arc::new(RejectRelationshipTool {
                    entities: self.entities.clone(),
                })),
        );
        runtimes.insert(user_id.to_string(), runtime.clone());
        runtime
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("loreforge=info".parse()?))
        .init();

    let config = Config::api_from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await?;
    migrate::migrate(&pool).await?;

    // Stores
    let campaigns = CampaignStore::new(pool.clone());
    let resources = ResourceStore::new(pool.clone());
    let files = FileStore::new(pool.clone());
    let entities = EntityStore::new(pool.clone());
    let shards = ShardStore::new(pool.clone());
    let changelog = ChangelogStore::new(pool.clone());
    let rebuilds = RebuildStore::new(pool.clone());
    let messages = MessageStore::new(pool.clone());
    let communities = CommunityStore::new(pool.clone());
    let summaries = SummaryStore::new(pool.clone());
    let importance_store = ImportanceStore::new(pool.clone());
    let kv = Arc::new(PgActorKv::new(pool.clone()));

    // Actors
    let hubs = Arc::new(HubRegistry::new(kv.clone()));
    let uploads = Arc::new(UploadRegistry::new(kv.clone()));

    // Providers
    let llm: Option<Arc<dyn LlmClient>> = if config.anthropic_api_key.is_empty() {
        None
    } else {
        Some(Arc::new(Claude::new(&config.anthropic_api_key, CLAUDE_MODEL)))
    };
    let search = Arc::new(AutoRagClient::new(
        config.autorag_url.clone(),
        config.autorag_api_key.clone(),
    ));

    // Graph analytics
    let caps = GraphCaps {
        max_entities: config.graph_max_entities,
        max_relationships: config.graph_max_relationships,
    };
    let loader = GraphLoader::new(entities.clone(), caps);
    let detector = CommunityDetector::new(
        loader.clone(),
        communities.clone(),
        summaries.clone(),
        DetectionParams::default(),
    );
    let importance = ImportanceCalculator::new(
        loader,
        entities.clone(),
        communities.clone(),
        importance_store.clone(),
    );
    let summarizer = llm.clone().map(|llm| {
        Arc::new(CommunitySummarizer::new(
            llm,
            entities.clone(),
            summaries.clone(),
        ))
    });

    // Rebuild orchestration
    let accumulator = Arc::new(ImpactAccumulator::new());
    let (rebuild_tx, rebuild_rx) = mpsc::channel(REBUILD_QUEUE_CAPACITY);
    let orchestrator = Arc::new(RebuildOrchestrator::new(
        campaigns.clone(),
        changelog.clone(),
        rebuilds.clone(),
        detector,
        importance,
        summarizer,
        hubs.clone(),
        accumulator.clone(),
        OrchestratorConfig {
            impact_threshold: config.rebuild_impact_threshold,
            partial_max_entities: config.rebuild_partial_max_entities,
            summaries_enabled: config.summaries_enabled,
            ..Default::default()
        },
    ));

    // Pick up campaigns whose unapplied impact survived a restart.
    for campaign_id in changelog.campaigns_with_unapplied().await? {
        orchestrator.rehydrate_campaign(&campaign_id).await.ok();
        if accumulator.get(&campaign_id) >= config.rebuild_impact_threshold {
            let _ = rebuild_tx.try_send(loreforge_rebuild::RebuildRequest { campaign_id });
        }
    }
    tokio::spawn(orchestrator.clone().run(rebuild_rx));

    // Extraction pipeline
    let recorder = ChangelogRecorder::new(
        changelog.clone(),
        Some(importance_store),
        accumulator,
        config.rebuild_impact_threshold,
        Some(rebuild_tx),
    );
    let worker = Arc::new(ExtractionWorker::new(
        search,
        campaigns.clone(),
        resources.clone(),
        shards,
        entities.clone(),
        recorder,
        hubs.clone(),
        ExtractionConfig::default(),
    ));
    let queue = ExtractionQueue::start(worker, EXTRACTION_CONCURRENCY, EXTRACTION_QUEUE_CAPACITY);

    // Agents
    let agent_registry = Arc::new(AgentRegistry::new());
    let agent_router = llm.map(|llm| AgentRouter::new(llm, agent_registry.clone()));

    let state = Arc::new(AppState {
        config: config.clone(),
        campaigns,
        resources,
        files,
        entities,
        changelog,
        rebuilds,
        messages,
        hubs,
        uploads,
        queue,
        agent_registry,
        agent_router,
        tool_runtimes: Mutex::new(HashMap::new()),
    });

    let app = Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Auth + stream
        .route("/authenticate", post(rest::session::authenticate))
        .route("/notifications/mint-stream", post(rest::session::mint_stream))
        .route("/stream", get(sse::stream))
        // Campaigns
        .route(
            "/campaigns",
            get(rest::campaigns::list)
                .post(rest::campaigns::create)
                .delete(rest::campaigns::delete_all),
        )
        .route(
            "/campaigns/{id}",
            get(rest::campaigns::get)
                .put(rest::campaigns::update)
                .delete(rest::campaigns::delete),
        )
        .route("/campaigns/{id}/resources", get(rest::campaigns::list_resources))
        .route("/campaigns/{id}/resource", post(rest::resources::attach))
        .route(
            "/campaigns/{id}/resource/{rid}",
            axum::routing::delete(rest::resources::detach),
        )
        .route(
            "/campaigns/{id}/resource/{rid}/retry-entity-extraction",
            post(rest::resources::retry_extraction),
        )
        .route(
            "/campaigns/{id}/resource/{rid}/entity-extraction-status",
            get(rest::resources::extraction_status),
        )
        .route("/campaigns/{id}/overlay", get(rest::campaigns::overlay))
        .route("/campaigns/{id}/rebuild-status", get(rest::campaigns::rebuild_status))
        // Chat + tools
        .route("/campaigns/{id}/chat", post(rest::chat::send))
        .route("/campaigns/{id}/messages", get(rest::chat::history))
        .route("/tools/invoke", post(rest::chat::invoke_tool))
        .route("/tools/confirm", post(rest::chat::confirm_tool))
        // Uploads + file lifecycle
        .route("/uploads", post(rest::uploads::create))
        .route(
            "/uploads/{id}",
            get(rest::uploads::get).delete(rest::uploads::delete),
        )
        .route("/uploads/{id}/parts", post(rest::uploads::add_part))
        .route("/uploads/{id}/complete", post(rest::uploads::complete))
        .route("/files/{key}/status", post(rest::uploads::set_file_status))
        // Assessment
        .route("/assessment/user-state", get(rest::assessment::user_state))
        .route(
            "/assessment/recommendations",
            get(rest::assessment::recommendations),
        )
        .route("/assessment/activity", get(rest::assessment::activity))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!(addr, "loreforge api listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
