pub mod prompts;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// One chat-style exchange with a language model. Providers return the raw
/// response text; SQL extraction and validation happen elsewhere so the same
/// provider can serve both stages of a turn.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

pub struct LlmManager {
    provider: Box<dyn ChatProvider>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Box<dyn ChatProvider> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self { provider })
    }

    /// Wraps an arbitrary provider; used by tests to script responses.
    pub fn from_provider(provider: Box<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Stage one: ask the model for a single read-only SQL statement.
    pub async fn generate_sql(
        &self,
        question: &str,
        schema_context: &str,
    ) -> Result<String, LlmError> {
        let system = prompts::sql_system_prompt(schema_context);
        self.provider.complete(&system, question).await
    }

    /// Stage two: ask the model to explain the returned rows, grounded only
    /// in what the query actually produced.
    pub async fn analyze_results(
        &self,
        question: &str,
        result_table: &str,
    ) -> Result<String, LlmError> {
        let system = prompts::analysis_system_prompt();
        let user = prompts::analysis_user_prompt(question, result_table);
        self.provider.complete(&system, &user).await
    }
}
