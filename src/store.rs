use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{AnomalyAnnotation, ExperimentRun, FeatureRecord, RawSeriesPoint, Topic};

/// Storage handle the pipeline stages read from and write to.
///
/// Implementations are opened by the caller at batch start and passed to every
/// stage; nothing in the engine holds a global connection.
#[allow(async_fn_in_trait)]
pub trait MetricStore {
    async fn list_topics(&self) -> EngineResult<Vec<Topic>>;

    /// Raw counts for one topic, ascending by date.
    async fn load_series(&self, topic_id: Uuid) -> EngineResult<Vec<RawSeriesPoint>>;

    /// Insert or overwrite the computed columns keyed by (topic, date).
    /// Existing anomaly annotations are left untouched.
    async fn upsert_features(&self, topic_id: Uuid, records: &[FeatureRecord]) -> EngineResult<()>;

    /// Feature rows for one topic, ascending by date.
    async fn load_features(&self, topic_id: Uuid) -> EngineResult<Vec<FeatureRecord>>;

    /// Overwrite the annotation of existing feature rows.
    async fn write_annotations(
        &self,
        topic_id: Uuid,
        annotations: &[(NaiveDate, AnomalyAnnotation)],
    ) -> EngineResult<()>;

    /// Append a new run. Existing runs are never modified.
    async fn append_experiment(&self, run: &ExperimentRun) -> EngineResult<()>;
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    use super::*;
    use crate::error::EngineError;

    #[derive(Default)]
    struct Tables {
        topics: Vec<Topic>,
        views: BTreeMap<(Uuid, NaiveDate), u64>,
        metrics: BTreeMap<(Uuid, NaiveDate), FeatureRecord>,
        experiments: Vec<ExperimentRun>,
        failing: HashSet<Uuid>,
    }

    /// In-process store used by the pipeline tests.
    #[derive(Default)]
    pub struct MemoryStore {
        tables: Mutex<Tables>,
    }

    impl MemoryStore {
        pub fn add_topic(&self, title: &str, counts: &[(NaiveDate, u64)]) -> Uuid {
            let id = Uuid::new_v4();
            let mut tables = self.tables.lock().unwrap();
            tables.topics.push(Topic {
                id,
                title: title.to_string(),
                category: Some("Tech".to_string()),
            });
            for (date, count) in counts {
                tables.views.insert((id, *date), *count);
            }
            id
        }

        /// Makes every write for `topic_id` fail.
        pub fn fail_writes_for(&self, topic_id: Uuid) {
            self.tables.lock().unwrap().failing.insert(topic_id);
        }

        pub fn features(&self, topic_id: Uuid) -> Vec<FeatureRecord> {
            let tables = self.tables.lock().unwrap();
            tables
                .metrics
                .range((topic_id, NaiveDate::MIN)..=(topic_id, NaiveDate::MAX))
                .map(|(_, record)| *record)
                .collect()
        }

        pub fn experiments(&self) -> Vec<ExperimentRun> {
            self.tables.lock().unwrap().experiments.clone()
        }

        fn check_writable(tables: &Tables, topic_id: Uuid) -> EngineResult<()> {
            if tables.failing.contains(&topic_id) {
                return Err(EngineError::Persistence(sqlx::Error::Protocol(format!(
                    "writes rejected for topic {topic_id}"
                ))));
            }
            Ok(())
        }
    }

    impl MetricStore for MemoryStore {
        async fn list_topics(&self) -> EngineResult<Vec<Topic>> {
            Ok(self.tables.lock().unwrap().topics.clone())
        }

        async fn load_series(&self, topic_id: Uuid) -> EngineResult<Vec<RawSeriesPoint>> {
            let tables = self.tables.lock().unwrap();
            Ok(tables
                .views
                .range((topic_id, NaiveDate::MIN)..=(topic_id, NaiveDate::MAX))
                .map(|(&(topic_id, date), &count)| RawSeriesPoint {
                    topic_id,
                    date,
                    count,
                })
                .collect())
        }

        async fn upsert_features(
            &self,
            topic_id: Uuid,
            records: &[FeatureRecord],
        ) -> EngineResult<()> {
            let mut tables = self.tables.lock().unwrap();
            Self::check_writable(&tables, topic_id)?;
            for record in records {
                let key = (topic_id, record.date);
                let anomaly = tables
                    .metrics
                    .get(&key)
                    .map(|existing| existing.anomaly)
                    .unwrap_or_default();
                tables.metrics.insert(key, FeatureRecord { anomaly, ..*record });
            }
            Ok(())
        }

        async fn load_features(&self, topic_id: Uuid) -> EngineResult<Vec<FeatureRecord>> {
            Ok(self.features(topic_id))
        }

        async fn write_annotations(
            &self,
            topic_id: Uuid,
            annotations: &[(NaiveDate, AnomalyAnnotation)],
        ) -> EngineResult<()> {
            let mut tables = self.tables.lock().unwrap();
            Self::check_writable(&tables, topic_id)?;
            for (date, annotation) in annotations {
                if let Some(record) = tables.metrics.get_mut(&(topic_id, *date)) {
                    record.anomaly = *annotation;
                }
            }
            Ok(())
        }

        async fn append_experiment(&self, run: &ExperimentRun) -> EngineResult<()> {
            let mut tables = self.tables.lock().unwrap();
            Self::check_writable(&tables, run.topic_id)?;
            tables.experiments.push(run.clone());
            Ok(())
        }
    }
}
