use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::export::{MetricRow, ViewRow};
use crate::models::{
    AnomalyAnnotation, AnomalyEvent, Conclusion, ExperimentRun, FeatureRecord, RawSeriesPoint,
    Severity, Topic, TopicSnapshot,
};
use crate::store::MetricStore;

/// Topics tracked by a fresh deployment.
pub const TRACKED_TOPICS: [&str; 10] = [
    "Artificial_intelligence",
    "ChatGPT",
    "Python_(programming_language)",
    "Machine_learning",
    "Microsoft_Azure",
    "Data_science",
    "Generative_artificial_intelligence",
    "Large_language_model",
    "Deep_learning",
    "Neural_network",
];

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_topic(pool: &PgPool, title: &str, category: &str) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO topic_growth.topics (id, title, category)
        VALUES ($1, $2, $3)
        ON CONFLICT (title) DO UPDATE
        SET category = COALESCE(topic_growth.topics.category, EXCLUDED.category)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(title)
    .bind(category)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    for title in TRACKED_TOPICS {
        upsert_topic(pool, title, "Tech").await?;
    }
    Ok(TRACKED_TOPICS.len())
}

/// Loads `topic,date,views` rows. Days already stored for a topic are kept.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        topic: String,
        date: NaiveDate,
        views: u64,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;
    let mut topic_ids = std::collections::HashMap::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let topic_id = match topic_ids.get(&row.topic) {
            Some(id) => *id,
            None => {
                let id = upsert_topic(pool, &row.topic, "Tech").await?;
                topic_ids.insert(row.topic.clone(), id);
                id
            }
        };
        let views = i64::try_from(row.views).context("view count out of range")?;

        let result = sqlx::query(
            r#"
            INSERT INTO topic_growth.daily_views (topic_id, date, views)
            VALUES ($1, $2, $3)
            ON CONFLICT (topic_id, date) DO NOTHING
            "#,
        )
        .bind(topic_id)
        .bind(row.date)
        .bind(views)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

fn decode_error(message: String) -> EngineError {
    EngineError::Persistence(sqlx::Error::Decode(message.into()))
}

fn parse_severity(raw: Option<String>) -> Result<Option<Severity>, String> {
    raw.map(|s| s.parse::<Severity>()).transpose()
}

fn feature_from_row(row: &PgRow) -> EngineResult<FeatureRecord> {
    let is_anomaly: bool = row.try_get("is_anomaly")?;
    let severity = parse_severity(row.try_get("severity")?).map_err(decode_error)?;
    if is_anomaly != severity.is_some() {
        return Err(decode_error(
            "anomaly flag and severity disagree".to_string(),
        ));
    }
    Ok(FeatureRecord {
        topic_id: row.try_get("topic_id")?,
        date: row.try_get("date")?,
        trend_short: row.try_get("trend_short")?,
        trend_long: row.try_get("trend_long")?,
        growth_daily: row.try_get("growth_daily")?,
        growth_weekly: row.try_get("growth_weekly")?,
        residual: row.try_get("residual")?,
        anomaly: AnomalyAnnotation::from_severity(severity),
    })
}

/// Postgres-backed store. Owns the pool for the lifetime of one batch.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

impl MetricStore for PgStore {
    async fn list_topics(&self) -> EngineResult<Vec<Topic>> {
        let rows = sqlx::query("SELECT id, title, category FROM topic_growth.topics ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> EngineResult<Topic> {
                Ok(Topic {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    category: row.try_get("category")?,
                })
            })
            .collect()
    }

    async fn load_series(&self, topic_id: Uuid) -> EngineResult<Vec<RawSeriesPoint>> {
        let rows = sqlx::query(
            "SELECT date, views FROM topic_growth.daily_views WHERE topic_id = $1 ORDER BY date",
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> EngineResult<RawSeriesPoint> {
                let views: i64 = row.try_get("views")?;
                let count = u64::try_from(views).map_err(|_| {
                    EngineError::InvalidSeries(format!("negative view count {views}"))
                })?;
                Ok(RawSeriesPoint {
                    topic_id,
                    date: row.try_get("date")?,
                    count,
                })
            })
            .collect()
    }

    async fn upsert_features(&self, topic_id: Uuid, records: &[FeatureRecord]) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO topic_growth.daily_metrics
                (topic_id, date, trend_short, trend_long, growth_daily, growth_weekly, residual)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (topic_id, date) DO UPDATE
                SET trend_short = EXCLUDED.trend_short,
                    trend_long = EXCLUDED.trend_long,
                    growth_daily = EXCLUDED.growth_daily,
                    growth_weekly = EXCLUDED.growth_weekly,
                    residual = EXCLUDED.residual
                "#,
            )
            .bind(topic_id)
            .bind(record.date)
            .bind(record.trend_short)
            .bind(record.trend_long)
            .bind(record.growth_daily)
            .bind(record.growth_weekly)
            .bind(record.residual)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_features(&self, topic_id: Uuid) -> EngineResult<Vec<FeatureRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT topic_id, date, trend_short, trend_long, growth_daily, growth_weekly,
                   residual, is_anomaly, severity
            FROM topic_growth.daily_metrics
            WHERE topic_id = $1
            ORDER BY date
            "#,
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(feature_from_row).collect()
    }

    async fn write_annotations(
        &self,
        topic_id: Uuid,
        annotations: &[(NaiveDate, AnomalyAnnotation)],
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        for (date, annotation) in annotations {
            sqlx::query(
                r#"
                UPDATE topic_growth.daily_metrics
                SET is_anomaly = $3, severity = $4
                WHERE topic_id = $1 AND date = $2
                "#,
            )
            .bind(topic_id)
            .bind(date)
            .bind(annotation.is_anomaly())
            .bind(annotation.severity().map(Severity::as_str))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_experiment(&self, run: &ExperimentRun) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO topic_growth.experiment_runs
            (run_id, topic_id, metric_name, simulated_lift, effect_size, p_value,
             ci_lower, ci_upper, power, conclusion, run_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(run.run_id)
        .bind(run.topic_id)
        .bind(&run.metric_name)
        .bind(run.simulated_lift)
        .bind(run.effect_size)
        .bind(run.p_value)
        .bind(run.ci_lower)
        .bind(run.ci_upper)
        .bind(run.power)
        .bind(run.conclusion.as_str())
        .bind(run.run_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub async fn fetch_snapshots(pool: &PgPool) -> anyhow::Result<Vec<TopicSnapshot>> {
    let rows = sqlx::query(
        r#"
        SELECT t.title, m.date, v.views, m.trend_short, m.growth_daily, m.severity
        FROM topic_growth.topics t
        LEFT JOIN LATERAL (
            SELECT date, trend_short, growth_daily, severity
            FROM topic_growth.daily_metrics
            WHERE topic_id = t.id
            ORDER BY date DESC
            LIMIT 1
        ) m ON TRUE
        LEFT JOIN topic_growth.daily_views v ON v.topic_id = t.id AND v.date = m.date
        ORDER BY t.title
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut snapshots = Vec::new();
    for row in rows {
        let severity = parse_severity(row.get("severity")).map_err(anyhow::Error::msg)?;
        snapshots.push(TopicSnapshot {
            title: row.get("title"),
            date: row.get("date"),
            views: row.get("views"),
            trend_short: row.get("trend_short"),
            growth_daily: row.get("growth_daily"),
            severity,
        });
    }
    Ok(snapshots)
}

pub async fn fetch_recent_anomalies(
    pool: &PgPool,
    since_date: NaiveDate,
) -> anyhow::Result<Vec<AnomalyEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT t.title, m.date, m.severity, m.growth_daily
        FROM topic_growth.daily_metrics m
        JOIN topic_growth.topics t ON t.id = m.topic_id
        WHERE m.is_anomaly AND m.date >= $1
        ORDER BY m.date DESC, t.title
        "#,
    )
    .bind(since_date)
    .fetch_all(pool)
    .await?;

    let mut events = Vec::new();
    for row in rows {
        let severity: String = row.get("severity");
        events.push(AnomalyEvent {
            topic_title: row.get("title"),
            date: row.get("date"),
            severity: severity.parse().map_err(anyhow::Error::msg)?,
            growth_daily: row.get("growth_daily"),
        });
    }
    Ok(events)
}

pub async fn fetch_recent_experiments(
    pool: &PgPool,
    limit: i64,
) -> anyhow::Result<Vec<(String, ExperimentRun)>> {
    let rows = sqlx::query(
        r#"
        SELECT t.title, e.run_id, e.topic_id, e.metric_name, e.simulated_lift, e.effect_size,
               e.p_value, e.ci_lower, e.ci_upper, e.power, e.conclusion, e.run_date
        FROM topic_growth.experiment_runs e
        JOIN topic_growth.topics t ON t.id = e.topic_id
        ORDER BY e.run_date DESC, t.title
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut runs = Vec::new();
    for row in rows {
        let conclusion: String = row.get("conclusion");
        runs.push((
            row.get("title"),
            ExperimentRun {
                run_id: row.get("run_id"),
                topic_id: row.get("topic_id"),
                metric_name: row.get("metric_name"),
                simulated_lift: row.get("simulated_lift"),
                effect_size: row.get("effect_size"),
                p_value: row.get("p_value"),
                ci_lower: row.get("ci_lower"),
                ci_upper: row.get("ci_upper"),
                power: row.get("power"),
                conclusion: conclusion.parse::<Conclusion>().map_err(anyhow::Error::msg)?,
                run_date: row.get("run_date"),
            },
        ));
    }
    Ok(runs)
}

pub async fn fetch_view_rows(pool: &PgPool) -> anyhow::Result<Vec<ViewRow>> {
    let rows = sqlx::query(
        r#"
        SELECT t.title, v.date, v.views
        FROM topic_growth.daily_views v
        JOIN topic_growth.topics t ON t.id = v.topic_id
        ORDER BY t.title, v.date
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ViewRow {
            topic: row.get("title"),
            date: row.get("date"),
            views: row.get("views"),
        })
        .collect())
}

pub async fn fetch_metric_rows(pool: &PgPool) -> anyhow::Result<Vec<MetricRow>> {
    let rows = sqlx::query(
        r#"
        SELECT t.title, m.date, m.trend_short, m.trend_long, m.growth_daily,
               m.growth_weekly, m.residual, m.is_anomaly, m.severity
        FROM topic_growth.daily_metrics m
        JOIN topic_growth.topics t ON t.id = m.topic_id
        ORDER BY t.title, m.date
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| MetricRow {
            topic: row.get("title"),
            date: row.get("date"),
            trend_short: row.get("trend_short"),
            trend_long: row.get("trend_long"),
            growth_daily: row.get("growth_daily"),
            growth_weekly: row.get("growth_weekly"),
            residual: row.get("residual"),
            is_anomaly: row.get("is_anomaly"),
            severity: row.get("severity"),
        })
        .collect())
}
