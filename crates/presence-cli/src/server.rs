use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use presence_core::LoopStatus;

use crate::engine::PresenceEngine;

#[derive(Clone)]
pub struct PresenceServer {
    engine: PresenceEngine,
    tool_router: ToolRouter<Self>,
}

impl PresenceServer {
    pub fn new(engine: PresenceEngine) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn parse_id(raw: &str) -> Result<Uuid, McpError> {
    Uuid::parse_str(raw.trim())
        .map_err(|e| McpError::invalid_params(format!("invalid id '{raw}': {e}"), None))
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct TurnRequest {
    /// The user the turn belongs to
    user_id: String,
    /// The persona the user is talking to
    persona_id: String,
    /// Intent analyzer output for this turn: any of openLoopIntent,
    /// contradictionIntent, relationshipSignal, classifiedEvent. Malformed
    /// fields are ignored and reported back in `dropped`.
    signals: serde_json::Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PairRequest {
    user_id: String,
    persona_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MarkSurfacedRequest {
    /// Id of the loop or thread returned by presence_surface
    id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LoopsRequest {
    user_id: String,
    /// Statuses to include (active, surfaced, resolved, dismissed, expired).
    /// Defaults to the open ones.
    status: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddThreadRequest {
    persona_id: String,
    user_id: String,
    /// What the persona has been thinking about
    topic: String,
    /// How much the persona cares, 0 to 1
    intensity: f64,
    /// Whether the thread concerns the user
    user_related: Option<bool>,
}

#[tool_router]
impl PresenceServer {
    #[tool(
        description = "Record one conversational turn. Pass the intent analyzer's structured output; the engine creates or merges open loops, dismisses contradicted ones, boosts mentioned topics, and scores the relationship event. Never fails the turn: bad fields are skipped."
    )]
    async fn presence_turn(
        &self,
        Parameters(req): Parameters<TurnRequest>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .engine
            .process_turn_json(&req.user_id, &req.persona_id, &req.signals)
            .await;
        json_result(&outcome)
    }

    #[tool(
        description = "Pick at most one item to raise proactively: an open loop or one of the persona's ongoing threads. Returns the choice with its follow-up framing, the relationship state and any shareable insights. Call presence_mark_surfaced with the chosen id once it has been used."
    )]
    async fn presence_surface(
        &self,
        Parameters(req): Parameters<PairRequest>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.engine.surface(&req.user_id, &req.persona_id).await;
        json_result(&ctx)
    }

    #[tool(description = "Mark a surfaced loop or thread as used, exactly once per surfacing.")]
    async fn presence_mark_surfaced(
        &self,
        Parameters(req): Parameters<MarkSurfacedRequest>,
    ) -> Result<CallToolResult, McpError> {
        let id = parse_id(&req.id)?;
        let marked = self.engine.mark_surfaced(id).await;
        json_result(&serde_json::json!({ "id": id, "marked": marked }))
    }

    #[tool(description = "Current relationship state between a user and a persona, or null.")]
    async fn presence_state(
        &self,
        Parameters(req): Parameters<PairRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.engine.state(&req.user_id, &req.persona_id).await;
        json_result(&state)
    }

    #[tool(description = "List a user's open loops, optionally filtered by status.")]
    async fn presence_loops(
        &self,
        Parameters(req): Parameters<LoopsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let statuses = match req.status {
            None => LoopStatus::OPEN.to_vec(),
            Some(names) => names
                .iter()
                .map(|n| {
                    LoopStatus::parse(n).ok_or_else(|| {
                        McpError::invalid_params(format!("unknown loop status '{n}'"), None)
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        let loops = self.engine.loops(&req.user_id, statuses).await;
        json_result(&loops)
    }

    #[tool(description = "Give the persona an ongoing thread it may bring up with this user later.")]
    async fn presence_add_thread(
        &self,
        Parameters(req): Parameters<AddThreadRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.topic.trim().is_empty() {
            return Err(McpError::invalid_params("topic must not be empty".to_string(), None));
        }
        let thread = self
            .engine
            .add_thread(
                &req.persona_id,
                &req.user_id,
                &req.topic,
                req.intensity,
                req.user_related.unwrap_or(false),
            )
            .await
            .map_err(|e| McpError::internal_error(format!("{e:#}"), None))?;
        json_result(&thread)
    }

    #[tool(description = "Run one maintenance sweep now: expiry, salience and relationship decay, cleanup.")]
    async fn presence_sweep(&self) -> Result<CallToolResult, McpError> {
        let report = self.engine.sweep().await;
        json_result(&report)
    }

    #[tool(description = "Row counts for every stored collection.")]
    async fn presence_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = self
            .engine
            .stats()
            .await
            .map_err(|e| McpError::internal_error(format!("{e:#}"), None))?;
        json_result(&stats)
    }
}

#[tool_handler]
impl ServerHandler for PresenceServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Presence and relationship state for a companion persona.\n\n\
                 EACH TURN:\n\
                 1. After the intent analyzer runs, call presence_turn with its structured output.\n\
                 2. Before composing a reply, call presence_surface. If it returns a choice, weave it in \
                    using the follow-up framing (reminder or followup), then call presence_mark_surfaced \
                    with its id.\n\n\
                 The engine never writes dialogue; it only decides what is worth raising."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
