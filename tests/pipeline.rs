use async_trait::async_trait;
use r2d2::Pool;
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use ops_intel::agent::{Agent, AgentError};
use ops_intel::alerts::{default_metrics, evaluate_alerts, MetricDef};
use ops_intel::config::AlertsConfig;
use ops_intel::db::db_pool::DuckDbConnectionManager;
use ops_intel::db::executor::QueryExecutor;
use ops_intel::db::loader;
use ops_intel::llm::{ChatProvider, LlmError, LlmManager};
use ops_intel::sqlguard::SqlGuardError;
use ops_intel::stats::{Direction, Severity};

const CSV_HEADER: &str = "day,entity,product,price_tier,anticipation_method,payment_method,installments,amount_transacted,quantity_transactions,quantity_of_merchants";

/// 29 near-flat days followed by a 5x spike on day 30. The jitter keeps the
/// rolling standard deviation nonzero so the spike scores instead of hitting
/// the flat-series guard.
fn spike_dataset() -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for i in 0..29 {
        let jitter = if i % 2 == 0 { 1_000 } else { -1_000 };
        csv.push_str(&format!(
            "2025-01-{:02},PJ,pix,normal,Pix,uninformed,1,{}.00,100,10\n",
            i + 1,
            1_000_000 + jitter
        ));
    }
    csv.push_str("2025-01-30,PJ,pix,normal,Pix,uninformed,1,5000000.00,100,10\n");
    csv
}

fn exactly_flat_dataset() -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for i in 0..29 {
        csv.push_str(&format!(
            "2025-01-{:02},PJ,pix,normal,Pix,uninformed,1,1000000.00,100,10\n",
            i + 1
        ));
    }
    csv.push_str("2025-01-30,PJ,pix,normal,Pix,uninformed,1,5000000.00,100,10\n");
    csv
}

fn fixture_executor(dir: &TempDir, csv: &str) -> QueryExecutor {
    let csv_path: PathBuf = dir.path().join("operations_data.csv");
    let mut file = std::fs::File::create(&csv_path).expect("create fixture csv");
    file.write_all(csv.as_bytes()).expect("write fixture csv");

    let db_path = dir.path().join("fixture.duckdb");
    let manager = DuckDbConnectionManager::new(db_path.to_string_lossy().to_string());
    // One connection is enough here; DuckDB locks the file per open handle.
    let pool = Pool::builder().max_size(1).build(manager).expect("pool");

    let rows = loader::load_csv(&pool, &csv_path, "transactions").expect("load csv");
    assert_eq!(rows, 30);

    QueryExecutor::new(pool, "transactions".to_string())
}

fn alerts_config(window: usize) -> AlertsConfig {
    AlertsConfig {
        window,
        warning_threshold: 2.0,
        critical_threshold: 3.0,
    }
}

/// Scripted language model: returns canned responses in order.
struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        self.responses
            .lock()
            .expect("scripted provider lock")
            .pop_front()
            .ok_or_else(|| LlmError::ResponseError("script exhausted".to_string()))
    }
}

fn scripted_agent(executor: QueryExecutor, responses: Vec<&str>) -> Agent {
    let llm = Arc::new(LlmManager::from_provider(Box::new(ScriptedProvider::new(
        responses,
    ))));
    Agent::new(llm, Arc::new(executor))
}

#[tokio::test]
async fn volume_spike_raises_critical_alert() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    let metrics = default_metrics(&executor).await.unwrap();
    let report = evaluate_alerts(&executor, &metrics, &alerts_config(29), None)
        .await
        .unwrap();

    assert_eq!(report.as_of.to_string(), "2025-01-30");

    let volume = report
        .alerts
        .iter()
        .find(|a| a.metric == "total_volume")
        .expect("total_volume alert");
    assert_eq!(volume.severity, Severity::Critical);
    assert_eq!(volume.direction, Direction::Spike);
    assert!(volume.z_score > 3.0);
    assert_eq!(volume.value, 5_000_000.0);

    // Transaction count never moved.
    let count = report
        .alerts
        .iter()
        .find(|a| a.metric == "transaction_count")
        .expect("transaction_count alert");
    assert_eq!(count.severity, Severity::Normal);
    assert_eq!(count.z_score, 0.0);
}

#[tokio::test]
async fn alerts_are_ordered_most_severe_first() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    let metrics = default_metrics(&executor).await.unwrap();
    let report = evaluate_alerts(&executor, &metrics, &alerts_config(29), None)
        .await
        .unwrap();

    // total_volume and volume_pix are critical, transaction_count is normal.
    let ranks: Vec<u8> = report.alerts.iter().map(|a| a.severity.rank()).collect();
    let mut sorted = ranks.clone();
    sorted.sort();
    assert_eq!(ranks, sorted);
    assert_eq!(report.alerts[0].severity, Severity::Critical);
    assert_eq!(
        report.alerts.last().unwrap().metric,
        "transaction_count"
    );

    // Alphabetical within a severity band.
    let criticals: Vec<&str> = report
        .alerts
        .iter()
        .filter(|a| a.severity == Severity::Critical)
        .map(|a| a.metric.as_str())
        .collect();
    assert_eq!(criticals, vec!["total_volume", "volume_pix"]);

    assert_eq!(report.summary.critical, 2);
    assert_eq!(report.summary.normal, 1);
}

#[tokio::test]
async fn exactly_flat_window_is_guarded_to_normal() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &exactly_flat_dataset());

    let metrics = vec![MetricDef::total_volume()];
    let report = evaluate_alerts(&executor, &metrics, &alerts_config(29), None)
        .await
        .unwrap();

    // Zero standard deviation wins over the spike: z = 0, severity normal.
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].severity, Severity::Normal);
    assert_eq!(report.alerts[0].z_score, 0.0);
}

#[tokio::test]
async fn too_short_history_skips_the_metric() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    // 30 observations cannot satisfy a 40-day prior window.
    let metrics = vec![MetricDef::total_volume()];
    let report = evaluate_alerts(&executor, &metrics, &alerts_config(40), None)
        .await
        .unwrap();
    assert!(report.alerts.is_empty());
    assert_eq!(report.summary.total, 0);
}

#[tokio::test]
async fn full_turn_generates_executes_and_analyzes() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    let agent = scripted_agent(
        executor,
        vec![
            "Here is the query:\n```sql\nSELECT ROUND(SUM(amount_transacted), 2) AS tpv FROM transactions\n```",
            "Total payment volume was R$ 33,994,000.00 across the period.",
        ],
    );

    let turn = agent.answer_question("What is the total TPV?").await.unwrap();

    assert_eq!(
        turn.sql.statement,
        "SELECT ROUND(SUM(amount_transacted), 2) AS tpv FROM transactions"
    );
    assert!(turn.sql.from_code_fence);
    assert_eq!(turn.result.columns, vec!["tpv".to_string()]);
    assert_eq!(turn.result.row_count, 1);
    assert!(turn.analysis.contains("Total payment volume"));
    assert!(turn.alerts.is_none());
}

#[tokio::test]
async fn identical_inputs_yield_identical_turns() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    let sql = "```sql\nSELECT CAST(day AS VARCHAR) AS day, SUM(amount_transacted) AS tpv FROM transactions GROUP BY day ORDER BY day\n```";
    let analysis = "Daily volume held near 1M until a 5x spike on the final day.";
    let agent = scripted_agent(executor, vec![sql, analysis, sql, analysis]);

    let first = agent.answer_question("Daily TPV?").await.unwrap();
    let second = agent.answer_question("Daily TPV?").await.unwrap();

    assert_eq!(first.sql.statement, second.sql.statement);
    assert_eq!(first.result.columns, second.result.columns);
    assert_eq!(first.result.rows, second.result.rows);
    assert_eq!(first.analysis, second.analysis);
}

#[tokio::test]
async fn destructive_response_is_rejected_before_execution() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    let agent = scripted_agent(executor, vec!["DROP TABLE transactions"]);
    let err = agent.answer_question("Delete everything").await.unwrap_err();

    match err {
        AgentError::Rejected(SqlGuardError::DisallowedStatement(kw)) => {
            assert_eq!(kw, "DROP");
        }
        other => panic!("expected rejection, got: {}", other),
    }
}

#[tokio::test]
async fn database_errors_surface_the_sql_and_raw_diagnostic() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    let agent = scripted_agent(
        executor,
        vec!["```sql\nSELECT no_such_column FROM transactions\n```"],
    );
    let err = agent.answer_question("Bad column").await.unwrap_err();

    match err {
        AgentError::Execution { sql, source } => {
            assert_eq!(sql, "SELECT no_such_column FROM transactions");
            assert!(!source.to_string().is_empty());
        }
        other => panic!("expected execution error, got: {}", other),
    }
}

#[tokio::test]
async fn executor_returns_typed_cells_and_column_names() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    let result = executor
        .execute("SELECT day, amount_transacted FROM transactions ORDER BY day LIMIT 1")
        .await
        .unwrap();

    assert_eq!(
        result.columns,
        vec!["day".to_string(), "amount_transacted".to_string()]
    );
    assert_eq!(result.row_count, 1);
    assert_eq!(
        result.rows[0][0],
        serde_json::Value::String("2025-01-01".to_string())
    );
    assert_eq!(result.rows[0][1], serde_json::json!(1_001_000.0));
}

#[tokio::test]
async fn schema_context_lists_columns_values_and_range() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    let context = executor.schema_context().await.unwrap();
    assert!(context.contains("Table: transactions"));
    assert!(context.contains("amount_transacted"));
    assert!(context.contains("product: pix"));
    assert!(context.contains("2025-01-01"));
    assert!(context.contains("2025-01-30"));
}

#[tokio::test]
async fn quick_stats_aggregate_the_dataset() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &exactly_flat_dataset());

    let stats = executor.quick_stats().await.unwrap();
    assert_eq!(stats.total_volume, 29.0 * 1_000_000.0 + 5_000_000.0);
    assert_eq!(stats.total_transactions, 3_000);
    assert_eq!(stats.first_day, "2025-01-01");
    assert_eq!(stats.last_day, "2025-01-30");
    assert_eq!(stats.latest_day_volume, 5_000_000.0);
    assert!((stats.avg_ticket - stats.total_volume / 3_000.0).abs() < 1e-9);
}

#[tokio::test]
async fn as_of_excludes_later_days_from_the_series() {
    let dir = TempDir::new().unwrap();
    let executor = fixture_executor(&dir, &spike_dataset());

    // Evaluated before the spike day, nothing is anomalous.
    let metrics = vec![MetricDef::total_volume()];
    let as_of = chrono::NaiveDate::from_ymd_opt(2025, 1, 29).unwrap();
    let report = evaluate_alerts(&executor, &metrics, &alerts_config(28), Some(as_of))
        .await
        .unwrap();

    assert_eq!(report.as_of, as_of);
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].severity, Severity::Normal);
}
