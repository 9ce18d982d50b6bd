//! The narrow seam to the LLM provider. Concrete clients (and their wire
//! schemas) live outside this workspace; the runner only needs "here is the
//! conversation and the tool schemas, give me the next reply".

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use steward_protocol::Message;
use steward_protocol::ToolCallRequest;

/// A function schema advertised to the model for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// One model reply: either final text, or text plus tool calls that keep
/// the loop going.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produce the next reply. Implementations must return promptly when
    /// `cancel` fires.
    async fn complete(&self, cancel: &CancellationToken, request: ChatRequest)
    -> Result<ChatReply>;
}
