//! # mull-llm
//!
//! The chat model collaborator contract consumed by planners: generation,
//! streaming, and tool binding. Also ships retry middleware and a scripted
//! mock model used throughout the workspace's tests.

pub mod mock;
pub mod model;
pub mod retry;

pub use mock::{MockModel, MockResponse};
pub use model::{
    BoundModel, ChatModel, ChatModelExt, ChatResponse, GenerateOptions, StopReason, StreamChunk,
    Usage,
};
pub use retry::RetryingModel;
