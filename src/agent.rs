use crate::db::executor::{QueryExecutor, QueryResult};
use crate::db::DbError;
use crate::llm::{LlmError, LlmManager};
use crate::sqlguard::{extract_sql, SqlGuardError, SqlQuery};
use crate::stats::AnomalyResult;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Stages of one conversation turn. The turn walks them strictly in order;
/// `Complete` and `Failed` are terminal, and a failure at any stage ends the
/// turn with no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStage {
    AwaitingSql,
    Extracting,
    Executing,
    Analyzing,
    Complete,
    Failed,
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnStage::AwaitingSql => "awaiting_sql",
            TurnStage::Extracting => "extracting",
            TurnStage::Executing => "executing",
            TurnStage::Analyzing => "analyzing",
            TurnStage::Complete => "complete",
            TurnStage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub enum AgentError {
    /// A language-model call failed; carries the stage it failed in.
    ExternalService { stage: TurnStage, source: LlmError },
    /// No safe query could be taken from the model response.
    Rejected(SqlGuardError),
    /// The database refused the statement. The raw SQL and the raw
    /// diagnostic are surfaced verbatim; hiding either would make a
    /// financial answer unauditable.
    Execution { sql: String, source: DbError },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::ExternalService { stage, source } => {
                write!(f, "language model call failed during {}: {}", stage, source)
            }
            AgentError::Rejected(e) => write!(f, "could not generate a safe query: {}", e),
            AgentError::Execution { sql, source } => {
                write!(f, "query execution failed: {} (sql: {})", source, sql)
            }
        }
    }
}

impl Error for AgentError {}

/// One completed question-to-answer exchange. History is owned by the
/// caller; the agent itself keeps no state between turns.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub question: String,
    pub sql: SqlQuery,
    pub result: QueryResult,
    pub analysis: String,
    pub alerts: Option<Vec<AnomalyResult>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Drives the two-stage NL2SQL exchange: question to SQL, execution, then
/// SQL results to a grounded natural-language analysis.
pub struct Agent {
    llm: Arc<LlmManager>,
    executor: Arc<QueryExecutor>,
}

impl Agent {
    pub fn new(llm: Arc<LlmManager>, executor: Arc<QueryExecutor>) -> Self {
        Self { llm, executor }
    }

    pub async fn answer_question(&self, question: &str) -> Result<ConversationTurn, AgentError> {
        let mut stage = TurnStage::AwaitingSql;
        debug!("Turn [{}]: {}", stage, question);

        let schema_context =
            self.executor
                .schema_context()
                .await
                .map_err(|e| AgentError::Execution {
                    sql: "<schema introspection>".to_string(),
                    source: e,
                })?;

        let raw_response = self
            .llm
            .generate_sql(question, &schema_context)
            .await
            .map_err(|e| AgentError::ExternalService {
                stage: TurnStage::AwaitingSql,
                source: e,
            })?;

        stage = TurnStage::Extracting;
        debug!("Turn [{}]", stage);
        let sql = extract_sql(&raw_response).map_err(AgentError::Rejected)?;
        if sql.truncated_multi {
            info!(
                "Model produced multiple statements; kept the first: {}",
                sql.statement
            );
        }

        stage = TurnStage::Executing;
        debug!("Turn [{}]: {}", stage, sql.statement);
        let result = self
            .executor
            .execute(&sql.statement)
            .await
            .map_err(|e| AgentError::Execution {
                sql: sql.statement.clone(),
                source: e,
            })?;

        stage = TurnStage::Analyzing;
        debug!("Turn [{}]: {} rows", stage, result.row_count);
        let analysis = self
            .llm
            .analyze_results(question, &result.to_markdown())
            .await
            .map_err(|e| AgentError::ExternalService {
                stage: TurnStage::Analyzing,
                source: e,
            })?;

        info!(
            "Turn complete: {} rows in {}ms",
            result.row_count, result.execution_time_ms
        );

        Ok(ConversationTurn {
            question: question.to_string(),
            sql,
            result,
            analysis,
            alerts: None,
            created_at: chrono::Utc::now(),
        })
    }
}
