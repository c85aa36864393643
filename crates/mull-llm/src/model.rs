use async_trait::async_trait;
use mull_core::{Message, Result, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
}

impl GenerateOptions {
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }
}

/// A complete (non-streaming) response from a model.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

impl ChatResponse {
    pub fn text(&self) -> String {
        self.message.text_content()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.message.tool_calls
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.message.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// A chunk of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Content text delta.
    TextDelta(String),
    /// A tool call was decided.
    ToolCall(ToolCall),
    /// Usage stats (sent at end of stream).
    Usage(Usage),
    /// Stream is done.
    Done(StopReason),
    /// An error occurred mid-stream.
    Error(String),
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The language-model collaborator. Concrete clients live outside this
/// workspace; cancellation is by dropping the returned future.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Human-readable name, used in logs and errors.
    fn name(&self) -> &str;

    async fn generate(&self, messages: &[Message], options: &GenerateOptions)
    -> Result<ChatResponse>;

    /// Streaming variant. The default replays a `generate` response as chunks.
    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let response = self.generate(messages, options).await?;
        let mut chunks = Vec::new();
        let text = response.text();
        if !text.is_empty() {
            chunks.push(StreamChunk::TextDelta(text));
        }
        for tc in response.message.tool_calls {
            chunks.push(StreamChunk::ToolCall(tc));
        }
        chunks.push(StreamChunk::Usage(response.usage));
        chunks.push(StreamChunk::Done(response.stop_reason));

        let (tx, rx) = mpsc::channel(chunks.len());
        for chunk in chunks {
            let _ = tx.try_send(chunk);
        }
        Ok(rx)
    }
}

/// A model with a fixed set of tools attached to every call.
pub struct BoundModel {
    inner: Arc<dyn ChatModel>,
    tools: Vec<ToolDefinition>,
}

impl BoundModel {
    pub fn new(inner: Arc<dyn ChatModel>, tools: Vec<ToolDefinition>) -> Self {
        Self { inner, tools }
    }

    fn merged(&self, options: &GenerateOptions) -> GenerateOptions {
        let mut merged = options.clone();
        let mut tools = self.tools.clone();
        for t in &options.tools {
            if !tools.iter().any(|b| b.name == t.name) {
                tools.push(t.clone());
            }
        }
        merged.tools = tools;
        merged
    }
}

#[async_trait]
impl ChatModel for BoundModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChatResponse> {
        self.inner.generate(messages, &self.merged(options)).await
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        self.inner.stream(messages, &self.merged(options)).await
    }
}

/// `bind_tools` for shared models.
pub trait ChatModelExt {
    fn bind_tools(&self, tools: Vec<ToolDefinition>) -> Arc<dyn ChatModel>;
}

impl ChatModelExt for Arc<dyn ChatModel> {
    fn bind_tools(&self, tools: Vec<ToolDefinition>) -> Arc<dyn ChatModel> {
        if tools.is_empty() {
            return Arc::clone(self);
        }
        Arc::new(BoundModel::new(Arc::clone(self), tools))
    }
}
