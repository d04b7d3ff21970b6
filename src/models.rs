use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub id: Uuid,
    pub title: String,
    pub category: Option<String>,
}

/// One day of raw view counts for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawSeriesPoint {
    pub topic_id: Uuid,
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Low" => Ok(Severity::Low),
            "Medium" => Ok(Severity::Medium),
            "High" => Ok(Severity::High),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Anomaly flag attached to a feature row. `severity` is set exactly when
/// `is_anomaly` is, which is why the fields are private.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AnomalyAnnotation {
    is_anomaly: bool,
    severity: Option<Severity>,
}

impl AnomalyAnnotation {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn flagged(severity: Severity) -> Self {
        Self {
            is_anomaly: true,
            severity: Some(severity),
        }
    }

    pub fn from_severity(severity: Option<Severity>) -> Self {
        severity.map_or_else(Self::clear, Self::flagged)
    }

    pub fn is_anomaly(&self) -> bool {
        self.is_anomaly
    }

    pub fn severity(&self) -> Option<Severity> {
        self.severity
    }
}

/// Derived daily signals for one topic. Undefined signals are persisted as 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub topic_id: Uuid,
    pub date: NaiveDate,
    pub trend_short: f64,
    pub trend_long: f64,
    pub growth_daily: f64,
    pub growth_weekly: f64,
    pub residual: f64,
    pub anomaly: AnomalyAnnotation,
}

impl FeatureRecord {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::TrendShort => self.trend_short,
            Metric::TrendLong => self.trend_long,
            Metric::GrowthDaily => self.growth_daily,
            Metric::GrowthWeekly => self.growth_weekly,
            Metric::Residual => self.residual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TrendShort,
    TrendLong,
    #[default]
    GrowthDaily,
    GrowthWeekly,
    Residual,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::TrendShort => "trend_short",
            Metric::TrendLong => "trend_long",
            Metric::GrowthDaily => "growth_daily",
            Metric::GrowthWeekly => "growth_weekly",
            Metric::Residual => "residual",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Conclusion {
    Significant,
    NotSignificant,
}

impl Conclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            Conclusion::Significant => "Significant",
            Conclusion::NotSignificant => "Not Significant",
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Conclusion {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Significant" => Ok(Conclusion::Significant),
            "Not Significant" => Ok(Conclusion::NotSignificant),
            other => Err(format!("unknown conclusion '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentRun {
    pub run_id: Uuid,
    pub topic_id: Uuid,
    pub metric_name: String,
    pub simulated_lift: f64,
    pub effect_size: f64,
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub power: Option<f64>,
    pub conclusion: Conclusion,
    pub run_date: NaiveDate,
}

/// Latest stored metrics of one topic. Fields are empty before the first feature run.
#[derive(Debug, Clone)]
pub struct TopicSnapshot {
    pub title: String,
    pub date: Option<NaiveDate>,
    pub views: Option<i64>,
    pub trend_short: Option<f64>,
    pub growth_daily: Option<f64>,
    pub severity: Option<Severity>,
}

/// Flagged day joined with its topic title, for reporting.
#[derive(Debug, Clone)]
pub struct AnomalyEvent {
    pub topic_title: String,
    pub date: NaiveDate,
    pub severity: Severity,
    pub growth_daily: f64,
}
