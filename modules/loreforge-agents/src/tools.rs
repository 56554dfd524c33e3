use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use loreforge_common::{LoreforgeError, RelationshipMetadata};
use loreforge_store::{CampaignStore, EntityStore, FileStore};

/// A structured tool invocation from an agent turn.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_name: String,
    pub args: Value,
    pub tool_call_id: String,
}

/// The envelope every tool execution resolves to.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_call_id: String,
}

impl ToolResult {
    fn ok(tool_call_id: &str, result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            tool_call_id: tool_call_id.to_string(),
        }
    }

    fn err(tool_call_id: &str, error: &LoreforgeError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(format!("[{}] {error}", error.tag())),
            tool_call_id: tool_call_id.to_string(),
        }
    }
}

/// What an invocation produced: a result, or a held call awaiting the user's
/// confirmation event.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    Executed(ToolResult),
    PendingConfirmation { tool_call_id: String },
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mutating tools hold in the pending table until confirmed.
    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError>;
}

/// Dispatch-table tool runtime. Mutating tools surface a pending state and
/// only run on the confirmation event; everything else executes inline.
pub struct ToolRuntime {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    pending: Mutex<HashMap<String, ToolCall>>,
}

impl ToolRuntime {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name(), tool);
        self
    }

    pub async fn invoke(&self, call: ToolCall) -> ToolInvocation {
        let Some(tool) = self.tools.get(call.tool_name.as_str()) else {
            return ToolInvocation::Executed(ToolResult::err(
                &call.tool_call_id,
                &LoreforgeError::NotFound(format!("tool {}", call.tool_name)),
            ));
        };

        if tool.requires_confirmation() {
            let id = call.tool_call_id.clone();
            self.pending.lock().await.insert(id.clone(), call);
            return ToolInvocation::PendingConfirmation { tool_call_id: id };
        }

        ToolInvocation::Executed(self.execute(call).await)
    }

    /// Resolve a pending call. Rejection resolves it as a failed result;
    /// confirming an unknown id is a not-found error.
    pub async fn confirm(&self, tool_call_id: &str, approved: bool) -> ToolResult {
        let call = self.pending.lock().await.remove(tool_call_id);
        let Some(call) = call else {
            return ToolResult::err(
                tool_call_id,
                &LoreforgeError::NotFound(format!("pending tool call {tool_call_id}")),
            );
        };

        if !approved {
            info!(tool = %call.tool_name, "tool call rejected by user");
            return ToolResult::err(
                tool_call_id,
                &LoreforgeError::Precondition("cancelled by user".to_string()),
            );
        }

        self.execute(call).await
    }

    async fn execute(&self, call: ToolCall) -> ToolResult {
        let tool = &self.tools[call.tool_name.as_str()];
        match tool.execute(&call.args).await {
            Ok(result) => ToolResult::ok(&call.tool_call_id, result),
            Err(e) => ToolResult::err(&call.tool_call_id, &e),
        }
    }
}

impl Default for ToolRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, LoreforgeError> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LoreforgeError::Validation(format!("missing required field {field}")))
}

// ---------------------------------------------------------------------------
// Concrete tools
// ---------------------------------------------------------------------------

pub struct CreateCampaignTool {
    pub campaigns: CampaignStore,
    pub owner_id: String,
}

#[async_trait]
impl Tool for CreateCampaignTool {
    fn name(&self) -> &'static str {
        "createCampaign"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError> {
        let name = require_str(args, "name")?;
        let description = args.get("description").and_then(Value::as_str).unwrap_or("");
        let campaign = self
            .campaigns
            .create(&self.owner_id, name, description)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "campaign": campaign }))
    }
}

pub struct ListCampaignsTool {
    pub campaigns: CampaignStore,
    pub owner_id: String,
}

#[async_trait]
impl Tool for ListCampaignsTool {
    fn name(&self) -> &'static str {
        "listCampaigns"
    }

    async fn execute(&self, _args: &Value) -> Result<Value, LoreforgeError> {
        let campaigns = self
            .campaigns
            .list_by_owner(&self.owner_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "campaigns": campaigns }))
    }
}

pub struct DeleteCampaignTool {
    pub campaigns: CampaignStore,
    pub owner_id: String,
}

#[async_trait]
impl Tool for DeleteCampaignTool {
    fn name(&self) -> &'static str {
        "deleteCampaign"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError> {
        let id = require_str(args, "campaignId")?;
        let owned = self
            .campaigns
            .get_owned(id, &self.owner_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        if owned.is_none() {
            return Err(LoreforgeError::NotFound(format!("campaign {id}")));
        }
        self.campaigns
            .delete(id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "deleted": id }))
    }
}

pub struct ListFilesTool {
    pub files: FileStore,
    pub owner_id: String,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "listFiles"
    }

    async fn execute(&self, _args: &Value) -> Result<Value, LoreforgeError> {
        let files = self
            .files
            .list_by_owner(&self.owner_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "files": files }))
    }
}

pub struct UpdatePdfMetadataTool {
    pub files: FileStore,
}

#[async_trait]
impl Tool for UpdatePdfMetadataTool {
    fn name(&self) -> &'static str {
        "updatePdfMetadata"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError> {
        let key = require_str(args, "fileKey")?;
        let name = require_str(args, "name")?;
        self.files
            .rename(key, name)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "fileKey": key, "name": name }))
    }
}

pub struct DeletePdfFileTool {
    pub files: FileStore,
}

#[async_trait]
impl Tool for DeletePdfFileTool {
    fn name(&self) -> &'static str {
        "deletePdfFile"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError> {
        let key = require_str(args, "fileKey")?;
        self.files
            .delete(key)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "deleted": key }))
    }
}

pub struct ListEntitiesTool {
    pub entities: EntityStore,
}

#[async_trait]
impl Tool for ListEntitiesTool {
    fn name(&self) -> &'static str {
        "listEntities"
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError> {
        let campaign_id = require_str(args, "campaignId")?;
        let entities = self
            .entities
            .list_for_campaign(campaign_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "entities": entities }))
    }
}

pub struct DeleteEntityTool {
    pub entities: EntityStore,
}

#[async_trait]
impl Tool for DeleteEntityTool {
    fn name(&self) -> &'static str {
        "deleteEntity"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError> {
        let id = require_str(args, "entityId")?;
        self.entities
            .delete(id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "deleted": id }))
    }
}

/// The only path that physically deletes a relationship; review flows set
/// soft-reject metadata instead.
pub struct DeleteRelationshipTool {
    pub entities: EntityStore,
}

#[async_trait]
impl Tool for DeleteRelationshipTool {
    fn name(&self) -> &'static str {
        "deleteRelationship"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError> {
        let id = require_str(args, "relationshipId")?;
        self.entities
            .delete_relationship(id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "deleted": id }))
    }
}

/// Soft-reject a relationship via metadata, the non-destructive review path.
pub struct RejectRelationshipTool {
    pub entities: EntityStore,
}

#[async_trait]
impl Tool for RejectRelationshipTool {
    fn name(&self) -> &'static str {
        "rejectRelationship"
    }

    async fn execute(&self, args: &Value) -> Result<Value, LoreforgeError> {
        let id = require_str(args, "relationshipId")?;
        let metadata = RelationshipMetadata {
            rejected: true,
            ..Default::default()
        };
        self.entities
            .set_relationship_metadata(id, &metadata)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        Ok(json!({ "rejected": id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        confirm: bool,
        executions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn requires_confirmation(&self) -> bool {
            self.confirm
        }

        async fn execute(&self, _args: &Value) -> Result<Value, LoreforgeError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "ran": true }))
        }
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            tool_name: "counting".to_string(),
            args: json!({}),
            tool_call_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn readonly_tools_execute_inline() {
        let executions = Arc::new(AtomicUsize::new(0));
        let runtime = ToolRuntime::new().register(Arc::new(CountingTool {
            confirm: false,
            executions: executions.clone(),
        }));

        match runtime.invoke(call("t1")).await {
            ToolInvocation::Executed(result) => {
                assert!(result.success);
                assert_eq!(result.tool_call_id, "t1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mutating_tools_wait_for_confirmation() {
        let executions = Arc::new(AtomicUsize::new(0));
        let runtime = ToolRuntime::new().register(Arc::new(CountingTool {
            confirm: true,
            executions: executions.clone(),
        }));

        match runtime.invoke(call("t1")).await {
            ToolInvocation::PendingConfirmation { tool_call_id } => {
                assert_eq!(tool_call_id, "t1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(executions.load(Ordering::SeqCst), 0, "held, not executed");

        let result = runtime.confirm("t1", true).await;
        assert!(result.success);
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        // A confirmation id resolves exactly once.
        let again = runtime.confirm("t1", true).await;
        assert!(!again.success);
    }

    #[tokio::test]
    async fn rejection_resolves_without_executing() {
        let executions = Arc::new(AtomicUsize::new(0));
        let runtime = ToolRuntime::new().register(Arc::new(CountingTool {
            confirm: true,
            executions: executions.clone(),
        }));

        runtime.invoke(call("t1")).await;
        let result = runtime.confirm("t1", false).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("cancelled"));
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_not_found_result() {
        let runtime = ToolRuntime::new();
        match runtime
            .invoke(ToolCall {
                tool_name: "ghost".to_string(),
                args: json!({}),
                tool_call_id: "t1".to_string(),
            })
            .await
        {
            ToolInvocation::Executed(result) => {
                assert!(!result.success);
                assert!(result.error.unwrap().contains("not_found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
