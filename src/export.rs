use std::io;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ViewRow {
    pub topic: String,
    pub date: NaiveDate,
    pub views: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricRow {
    pub topic: String,
    pub date: NaiveDate,
    pub trend_short: f64,
    pub trend_long: f64,
    pub growth_daily: f64,
    pub growth_weekly: f64,
    pub residual: f64,
    pub is_anomaly: bool,
    pub severity: Option<String>,
}

/// Writes rows as CSV with a header line.
pub fn write_rows<W: io::Write, T: Serialize>(writer: W, rows: &[T]) -> anyhow::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_file<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_rows(file, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_rows_serialize_with_header_and_empty_severity() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();
        let rows = vec![
            MetricRow {
                topic: "ChatGPT".to_string(),
                date,
                trend_short: 120.5,
                trend_long: 110.0,
                growth_daily: 0.25,
                growth_weekly: 0.0,
                residual: -3.5,
                is_anomaly: false,
                severity: None,
            },
            MetricRow {
                topic: "ChatGPT".to_string(),
                date: date.succ_opt().unwrap(),
                trend_short: 150.0,
                trend_long: 115.0,
                growth_daily: 1.5,
                growth_weekly: 0.4,
                residual: 60.0,
                is_anomaly: true,
                severity: Some("High".to_string()),
            },
        ];

        let mut buffer = Vec::new();
        write_rows(&mut buffer, &rows).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "topic,date,trend_short,trend_long,growth_daily,growth_weekly,residual,is_anomaly,severity"
        );
        assert_eq!(lines[1], "ChatGPT,2025-02-03,120.5,110.0,0.25,0.0,-3.5,false,");
        assert!(lines[2].ends_with("true,High"));
    }

    #[test]
    fn view_rows_serialize() {
        let rows = vec![ViewRow {
            topic: "Data_science".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            views: 4200,
        }];
        let mut buffer = Vec::new();
        write_rows(&mut buffer, &rows).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "topic,date,views\nData_science,2025-01-01,4200\n"
        );
    }
}
