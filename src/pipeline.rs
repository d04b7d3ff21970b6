use chrono::NaiveDate;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::anomaly;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::experiment;
use crate::features;
use crate::models::{AnomalyAnnotation, ExperimentRun, Metric, Topic};
use crate::store::MetricStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Features,
    Anomalies,
    Experiments,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicReport {
    pub topic: String,
    pub status: TopicStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub stage: Stage,
    pub topics: Vec<TopicReport>,
}

impl BatchReport {
    pub fn count(&self, status: TopicStatus) -> usize {
        self.topics.iter().filter(|t| t.status == status).count()
    }
}

/// Recomputes and upserts every feature row for one topic. Returns the number
/// of rows written; an empty series writes nothing.
pub async fn features_for_topic<S: MetricStore>(
    store: &S,
    config: &EngineConfig,
    topic_id: Uuid,
) -> EngineResult<usize> {
    let series = store.load_series(topic_id).await?;
    if series.is_empty() {
        return Ok(0);
    }
    let records = features::build_feature_records(topic_id, &series, config)?;
    store.upsert_features(topic_id, &records).await?;
    Ok(records.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalySummary {
    pub rows: usize,
    pub flagged: usize,
}

/// Reclassifies every feature row of one topic, clearing flags that no longer hold.
pub async fn anomalies_for_topic<S: MetricStore>(
    store: &S,
    config: &EngineConfig,
    topic_id: Uuid,
) -> EngineResult<AnomalySummary> {
    let records = store.load_features(topic_id).await?;
    let classes = anomaly::classify(&records, config);
    for class in classes.iter().filter(|c| c.annotation.is_anomaly()) {
        debug!(
            %topic_id,
            date = %class.date,
            growth_z = ?class.growth_z,
            residual_z = ?class.residual_z,
            severity = ?class.annotation.severity(),
            "anomalous day"
        );
    }
    let annotations: Vec<(NaiveDate, AnomalyAnnotation)> =
        classes.iter().map(|c| (c.date, c.annotation)).collect();
    store.write_annotations(topic_id, &annotations).await?;

    let flagged = annotations.iter().filter(|(_, a)| a.is_anomaly()).count();
    Ok(AnomalySummary {
        rows: annotations.len(),
        flagged,
    })
}

/// Simulates one experiment on a topic's stored metric and appends the run.
/// `Ok(None)` when the topic has too little history.
pub async fn experiment_for_topic<S: MetricStore, R: Rng + ?Sized>(
    store: &S,
    config: &EngineConfig,
    topic_id: Uuid,
    metric: Metric,
    rng: &mut R,
) -> EngineResult<Option<ExperimentRun>> {
    let history: Vec<f64> = store
        .load_features(topic_id)
        .await?
        .iter()
        .map(|r| r.value(metric))
        .collect();

    match experiment::simulate(topic_id, metric, &history, config, experiment::today(), rng) {
        Ok(run) => {
            store.append_experiment(&run).await?;
            Ok(Some(run))
        }
        Err(EngineError::InsufficientData { needed, found }) => {
            info!(%topic_id, needed, found, "not enough history to simulate experiment");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

async fn run_topic<S: MetricStore, R: Rng + ?Sized>(
    store: &S,
    config: &EngineConfig,
    topic: &Topic,
    stage: Stage,
    metric: Metric,
    rng: &mut R,
) -> EngineResult<TopicReport> {
    let mut notes = Vec::new();
    let mut status = TopicStatus::Completed;

    if matches!(stage, Stage::Features | Stage::All) {
        let rows = features_for_topic(store, config, topic.id).await?;
        if rows == 0 {
            return Ok(TopicReport {
                topic: topic.title.clone(),
                status: TopicStatus::Skipped,
                detail: "no raw observations".to_string(),
            });
        }
        notes.push(format!("{rows} feature rows"));
    }

    if matches!(stage, Stage::Anomalies | Stage::All) {
        let summary = anomalies_for_topic(store, config, topic.id).await?;
        notes.push(format!("{} of {} days flagged", summary.flagged, summary.rows));
    }

    if matches!(stage, Stage::Experiments | Stage::All) {
        match experiment_for_topic(store, config, topic.id, metric, rng).await? {
            Some(run) => notes.push(format!(
                "experiment {} (p={:.4}, d={:.4})",
                run.conclusion, run.p_value, run.effect_size
            )),
            None => {
                if stage == Stage::Experiments {
                    status = TopicStatus::Skipped;
                }
                notes.push("experiment skipped: insufficient history".to_string());
            }
        }
    }

    Ok(TopicReport {
        topic: topic.title.clone(),
        status,
        detail: notes.join("; "),
    })
}

/// Runs `stage` for every topic. A failing topic is recorded and the batch
/// moves on; only failing to list the topics fails the whole batch.
pub async fn run_batch<S: MetricStore, R: Rng + ?Sized>(
    store: &S,
    config: &EngineConfig,
    stage: Stage,
    metric: Metric,
    rng: &mut R,
) -> EngineResult<BatchReport> {
    let topics = store.list_topics().await?;
    info!(?stage, topics = topics.len(), "starting batch");

    let mut reports = Vec::with_capacity(topics.len());
    for topic in &topics {
        let span = info_span!("topic", topic = %topic.title);
        let result = run_topic(store, config, topic, stage, metric, &mut *rng)
            .instrument(span)
            .await;
        let report = match result {
            Ok(report) => {
                info!(topic = %topic.title, detail = %report.detail, "topic processed");
                report
            }
            Err(err) => {
                warn!(topic = %topic.title, error = %err, "topic failed");
                TopicReport {
                    topic: topic.title.clone(),
                    status: TopicStatus::Failed,
                    detail: err.to_string(),
                }
            }
        };
        reports.push(report);
    }

    Ok(BatchReport {
        stage,
        topics: reports,
    })
}
