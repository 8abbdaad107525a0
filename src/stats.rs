use chrono::NaiveDate;
use serde::Serialize;
use std::error::Error;
use std::fmt;

/// Standard deviations below this are treated as a flat series.
const STD_EPSILON: f64 = 1e-9;

#[derive(Debug)]
pub enum StatsError {
    /// Fewer than `required` points precede the evaluated index.
    InsufficientData { required: usize, available: usize },
    /// A rolling window needs at least two observations.
    WindowTooSmall(usize),
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::InsufficientData { required, available } => write!(
                f,
                "insufficient data: need {} prior observations, have {}",
                required, available
            ),
            StatsError::WindowTooSmall(w) => {
                write!(f, "window must be at least 2, got {}", w)
            }
        }
    }
}

impl Error for StatsError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

impl Severity {
    /// Sort rank, most severe first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Normal => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Spike,
    Drop,
    None,
}

/// Symmetric |z| thresholds for severity classification.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 2.0,
            critical: 3.0,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, z_score: f64) -> Severity {
        let abs_z = z_score.abs();
        if abs_z >= self.critical {
            Severity::Critical
        } else if abs_z >= self.warning {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricPoint {
    pub day: NaiveDate,
    pub value: f64,
}

/// A time-ordered series of daily observations for one monitored metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSeries {
    pub name: String,
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    /// Builds a series, sorting points by day. Duplicate days are a caller
    /// bug; the series keeps the first value for a repeated day.
    pub fn new(name: impl Into<String>, mut points: Vec<MetricPoint>) -> Self {
        points.sort_by_key(|p| p.day);
        points.dedup_by_key(|p| p.day);
        Self {
            name: name.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyResult {
    pub metric: String,
    pub day: NaiveDate,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
    pub change_pct: f64,
    pub severity: Severity,
    pub direction: Direction,
    pub message: String,
}

/// Scores `series.points[index]` against the `window` points immediately
/// preceding it. The evaluated point is excluded from the window, so the
/// score never includes itself (and never looks ahead).
///
/// Uses the sample standard deviation (ddof = 1). A flat window (std below
/// epsilon) yields z = 0 and severity `normal` rather than a division by zero.
pub fn compute_zscore(
    series: &MetricSeries,
    window: usize,
    index: usize,
    thresholds: &Thresholds,
) -> Result<AnomalyResult, StatsError> {
    if window < 2 {
        return Err(StatsError::WindowTooSmall(window));
    }
    if index >= series.points.len() {
        return Err(StatsError::InsufficientData {
            required: window,
            available: 0,
        });
    }
    if index < window {
        return Err(StatsError::InsufficientData {
            required: window,
            available: index,
        });
    }

    let prior = &series.points[index - window..index];
    let point = &series.points[index];

    let mean = prior.iter().map(|p| p.value).sum::<f64>() / window as f64;
    let variance = prior
        .iter()
        .map(|p| (p.value - mean).powi(2))
        .sum::<f64>()
        / (window - 1) as f64;
    let std_dev = variance.sqrt();

    let z_score = if std_dev <= STD_EPSILON {
        0.0
    } else {
        (point.value - mean) / std_dev
    };

    let severity = if std_dev <= STD_EPSILON {
        Severity::Normal
    } else {
        thresholds.classify(z_score)
    };

    let direction = if point.value > mean {
        Direction::Spike
    } else if point.value < mean {
        Direction::Drop
    } else {
        Direction::None
    };

    let change_pct = if mean.abs() <= STD_EPSILON {
        0.0
    } else {
        (point.value - mean) / mean * 100.0
    };

    let message = format_message(&series.name, z_score, change_pct, point.value, mean, direction);

    Ok(AnomalyResult {
        metric: series.name.clone(),
        day: point.day,
        value: point.value,
        mean,
        std_dev,
        z_score,
        change_pct,
        severity,
        direction,
        message,
    })
}

fn format_message(
    metric: &str,
    z_score: f64,
    change_pct: f64,
    current: f64,
    expected: f64,
    direction: Direction,
) -> String {
    let verb = match direction {
        Direction::Spike => "spiked",
        Direction::Drop => "dropped",
        Direction::None => "held steady at",
    };
    if direction == Direction::None {
        return format!("{} {} {:.2} (z-score 0.00)", metric, verb, current);
    }
    format!(
        "{} {} {:.1}% (z-score {:.2}); current {:.2}, expected {:.2}",
        metric,
        verb,
        change_pct.abs(),
        z_score,
        current,
        expected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_from(values: &[f64]) -> MetricSeries {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricPoint {
                day: start + chrono::Days::new(i as u64),
                value: *v,
            })
            .collect();
        MetricSeries::new("test_metric", points)
    }

    fn sample_std(values: &[f64]) -> (f64, f64) {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (values.len() - 1) as f64;
        (mean, var.sqrt())
    }

    #[test]
    fn flat_series_scores_zero_and_normal() {
        let series = series_from(&[1_000_000.0; 31]);
        let result = compute_zscore(&series, 30, 30, &Thresholds::default()).unwrap();
        assert_eq!(result.z_score, 0.0);
        assert_eq!(result.severity, Severity::Normal);
        assert_eq!(result.direction, Direction::None);
    }

    #[test]
    fn three_sigma_spike_is_critical() {
        let window: Vec<f64> = vec![10.0, 10.0, 14.0, 14.0, 12.0];
        let (mean, std) = sample_std(&window);
        let mut values = window.clone();
        values.push(mean + 3.0 * std);

        let series = series_from(&values);
        let result = compute_zscore(&series, 5, 5, &Thresholds::default()).unwrap();
        assert!((result.z_score - 3.0).abs() < 1e-9);
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.direction, Direction::Spike);
    }

    #[test]
    fn three_sigma_drop_is_critical() {
        let window: Vec<f64> = vec![10.0, 10.0, 14.0, 14.0, 12.0];
        let (mean, std) = sample_std(&window);
        let mut values = window.clone();
        values.push(mean - 3.0 * std);

        let series = series_from(&values);
        let result = compute_zscore(&series, 5, 5, &Thresholds::default()).unwrap();
        assert!((result.z_score + 3.0).abs() < 1e-9);
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.direction, Direction::Drop);
    }

    #[test]
    fn two_sigma_is_warning() {
        let window: Vec<f64> = vec![10.0, 10.0, 14.0, 14.0, 12.0];
        let (mean, std) = sample_std(&window);
        let mut values = window.clone();
        values.push(mean + 2.5 * std);

        let series = series_from(&values);
        let result = compute_zscore(&series, 5, 5, &Thresholds::default()).unwrap();
        assert_eq!(result.severity, Severity::Warning);
    }

    #[test]
    fn exact_window_of_prior_points_succeeds() {
        let series = series_from(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(compute_zscore(&series, 4, 4, &Thresholds::default()).is_ok());
    }

    #[test]
    fn one_short_of_window_fails() {
        let series = series_from(&[1.0, 2.0, 3.0, 4.0]);
        let err = compute_zscore(&series, 4, 3, &Thresholds::default()).unwrap_err();
        match err {
            StatsError::InsufficientData { required, available } => {
                assert_eq!(required, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn window_of_one_is_rejected() {
        let series = series_from(&[1.0, 2.0, 3.0]);
        let err = compute_zscore(&series, 1, 2, &Thresholds::default()).unwrap_err();
        assert!(matches!(err, StatsError::WindowTooSmall(1)));
    }

    #[test]
    fn window_excludes_the_evaluated_point() {
        // If the evaluated point leaked into its own window, the flat prior
        // values plus the outlier would shift the mean and shrink the score.
        let mut values = vec![100.0; 10];
        values.push(200.0);
        let series = series_from(&values);
        let result = compute_zscore(&series, 10, 10, &Thresholds::default()).unwrap();
        assert_eq!(result.mean, 100.0);
        // Flat prior window: zero std, guarded to normal.
        assert_eq!(result.z_score, 0.0);
        assert_eq!(result.severity, Severity::Normal);
        assert_eq!(result.direction, Direction::Spike);
    }

    #[test]
    fn series_points_are_ordered_by_day() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let points = vec![
            MetricPoint { day: start + chrono::Days::new(2), value: 3.0 },
            MetricPoint { day: start, value: 1.0 },
            MetricPoint { day: start + chrono::Days::new(1), value: 2.0 },
        ];
        let series = MetricSeries::new("m", points);
        let days: Vec<_> = series.points.iter().map(|p| p.day).collect();
        assert_eq!(
            days,
            vec![
                start,
                start + chrono::Days::new(1),
                start + chrono::Days::new(2)
            ]
        );
    }
}
