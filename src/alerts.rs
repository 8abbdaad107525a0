use crate::config::AlertsConfig;
use crate::db::executor::QueryExecutor;
use crate::db::DbError;
use crate::stats::{compute_zscore, AnomalyResult, Severity, StatsError, Thresholds};
use chrono::NaiveDate;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug)]
pub enum AlertError {
    DatabaseError(DbError),
    StatsError(StatsError),
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::DatabaseError(e) => write!(f, "alert evaluation database error: {}", e),
            AlertError::StatsError(e) => write!(f, "alert evaluation statistics error: {}", e),
        }
    }
}

impl Error for AlertError {}

impl From<DbError> for AlertError {
    fn from(err: DbError) -> Self {
        AlertError::DatabaseError(err)
    }
}

/// Describes how one monitored metric series is derived from the dataset:
/// `value_expr` is aggregated per day, optionally under `filter`.
#[derive(Debug, Clone)]
pub struct MetricDef {
    pub name: String,
    pub value_expr: String,
    pub filter: Option<String>,
}

impl MetricDef {
    pub fn total_volume() -> Self {
        Self {
            name: "total_volume".to_string(),
            value_expr: "SUM(amount_transacted)".to_string(),
            filter: None,
        }
    }

    pub fn transaction_count() -> Self {
        Self {
            name: "transaction_count".to_string(),
            value_expr: "SUM(quantity_transactions)".to_string(),
            filter: None,
        }
    }

    pub fn volume_for_product(product: &str) -> Self {
        Self {
            name: format!("volume_{}", product),
            value_expr: "SUM(amount_transacted)".to_string(),
            filter: Some(format!("product = '{}'", product.replace('\'', "''"))),
        }
    }
}

/// The standard monitored set: total volume, transaction count, and volume
/// per product category found in the dataset.
pub async fn default_metrics(executor: &QueryExecutor) -> Result<Vec<MetricDef>, AlertError> {
    let mut metrics = vec![MetricDef::total_volume(), MetricDef::transaction_count()];
    for product in executor.distinct_values("product").await? {
        metrics.push(MetricDef::volume_for_product(&product));
    }
    Ok(metrics)
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    pub normal: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertReport {
    pub as_of: NaiveDate,
    pub window: usize,
    pub alerts: Vec<AnomalyResult>,
    pub summary: AlertSummary,
}

/// Evaluates every metric at its most recent point, scoring it against the
/// preceding rolling window. Metrics with too little history are skipped with
/// a warning rather than failing the whole report. Results are ordered most
/// severe first, ties broken by metric name.
pub async fn evaluate_alerts(
    executor: &QueryExecutor,
    metrics: &[MetricDef],
    config: &AlertsConfig,
    as_of: Option<NaiveDate>,
) -> Result<AlertReport, AlertError> {
    let thresholds = Thresholds {
        warning: config.warning_threshold,
        critical: config.critical_threshold,
    };

    let as_of = match as_of {
        Some(day) => day,
        None => executor.date_range().await?.1,
    };

    let mut alerts = Vec::new();
    for metric in metrics {
        let series = executor
            .daily_series(
                &metric.name,
                &metric.value_expr,
                metric.filter.as_deref(),
                Some(as_of),
            )
            .await?;

        if series.is_empty() {
            warn!("Metric '{}' has no observations, skipping", metric.name);
            continue;
        }

        let last = series.len() - 1;
        match compute_zscore(&series, config.window, last, &thresholds) {
            Ok(result) => alerts.push(result),
            Err(e @ StatsError::InsufficientData { .. }) => {
                warn!("Metric '{}' skipped: {}", metric.name, e);
            }
            Err(e) => return Err(AlertError::StatsError(e)),
        }
    }

    sort_alerts(&mut alerts);

    let summary = summarize(&alerts);
    info!(
        "Alert evaluation as of {}: {} checks, {} critical, {} warning",
        as_of, summary.total, summary.critical, summary.warning
    );

    Ok(AlertReport {
        as_of,
        window: config.window,
        alerts,
        summary,
    })
}

/// Most severe first; deterministic within a severity via the metric name.
pub(crate) fn sort_alerts(alerts: &mut [AnomalyResult]) {
    alerts.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then_with(|| a.metric.cmp(&b.metric))
    });
}

fn summarize(alerts: &[AnomalyResult]) -> AlertSummary {
    let mut summary = AlertSummary {
        total: alerts.len(),
        critical: 0,
        warning: 0,
        normal: 0,
    };
    for alert in alerts {
        match alert.severity {
            Severity::Critical => summary.critical += 1,
            Severity::Warning => summary.warning += 1,
            Severity::Normal => summary.normal += 1,
        }
    }
    summary
}
