//! Mock chat model for deterministic testing.
//!
//! Returns pre-configured responses without making any network calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::model::*;
use mull_core::{Message, MessageContent, MullError, Result, Role, ToolCall};

type Responder = dyn Fn(&[Message], &GenerateOptions) -> MockResponse + Send + Sync;

/// A mock model that returns pre-configured responses.
///
/// # Example
/// ```
/// use mull_llm::mock::MockModel;
/// let model = MockModel::new("test")
///     .with_response("Hello, world!");
/// ```
pub struct MockModel {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    responder: Option<Arc<Responder>>,
    /// Track all calls received (for assertions in tests).
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    name: String,
}

/// One call as the mock saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: GenerateOptions,
}

impl RecordedCall {
    /// Text of the last message, usually the prompt.
    pub fn last_text(&self) -> String {
        self.messages
            .last()
            .map(|m| m.text_content())
            .unwrap_or_default()
    }

    /// Text of every system message, joined.
    pub fn system_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text_content())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A pre-configured response from the mock model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    /// If set, the model will return this error instead.
    pub error: Option<String>,
    /// Sleep before answering.
    pub delay_ms: Option<u64>,
    /// Never answer.
    pub hang: bool,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![],
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
            error: None,
            delay_ms: None,
            hang: false,
        }
    }
}

impl MockResponse {
    /// Create a text response.
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// Create an error response.
    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(msg.to_string()),
            ..Default::default()
        }
    }

    /// Create a single tool call response.
    pub fn tool_call(name: &str, args: serde_json::Value) -> Self {
        Self {
            tool_calls: vec![ToolCall::new(
                format!("call_{}", uuid::Uuid::new_v4().simple()),
                name,
                args,
            )],
            ..Default::default()
        }
    }

    /// A response that never arrives.
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }
}

impl MockModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            responder: None,
            calls: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.queue_response(MockResponse::text(text));
        self
    }

    /// Queue a tool call response.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.queue_response(MockResponse::tool_call(name, args));
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.queue_response(MockResponse::error(error));
        self
    }

    /// Queue a fully custom response.
    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.queue_response(resp);
        self
    }

    /// Queue several responses at once.
    pub fn with_responses(self, responses: impl IntoIterator<Item = MockResponse>) -> Self {
        self.responses.lock().extend(responses);
        self
    }

    /// Answer from a closure once the queue is drained.
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Message], &GenerateOptions) -> MockResponse + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(f));
        self
    }

    /// Queue a response directly.
    pub fn queue_response(&self, resp: MockResponse) {
        self.responses.lock().push(resp);
    }

    /// All calls made to this model so far.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Pop the next queued response, ask the responder, or fall back to a
    /// "no response queued" message.
    fn next_response(&self, messages: &[Message], options: &GenerateOptions) -> MockResponse {
        let queued = {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        if let Some(resp) = queued {
            return resp;
        }
        match &self.responder {
            Some(f) => f(messages, options),
            None => MockResponse::text("(mock: no more queued responses)"),
        }
    }
}

#[async_trait]
impl ChatModel for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChatResponse> {
        self.calls.lock().push(RecordedCall {
            messages: messages.to_vec(),
            options: options.clone(),
        });
        let mock = self.next_response(messages, options);

        if let Some(ms) = mock.delay_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if mock.hang {
            std::future::pending::<()>().await;
        }
        if let Some(error) = mock.error {
            return Err(MullError::model(&self.name, error));
        }

        let mut msg = Message::text(Role::Assistant, "");
        msg.content = if mock.text.is_empty() {
            vec![]
        } else {
            vec![MessageContent::Text { text: mock.text }]
        };
        let stop_reason = if mock.tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        msg.tool_calls = mock.tool_calls;

        Ok(ChatResponse {
            message: msg,
            usage: mock.usage,
            stop_reason,
        })
    }
}
