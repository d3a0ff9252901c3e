mod gateway;

pub use gateway::{LlmClient, LlmConfig, LlmError, LlmMessage, LlmResponse};
