use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{AnomalyEvent, ExperimentRun, TopicSnapshot};

fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

pub fn build_report(
    today: NaiveDate,
    since_days: i64,
    snapshots: &[TopicSnapshot],
    anomalies: &[AnomalyEvent],
    experiments: &[(String, ExperimentRun)],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Topic Growth Report");
    let _ = writeln!(output, "Generated on {today}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Metrics");

    if snapshots.is_empty() {
        let _ = writeln!(output, "No topics tracked yet.");
    } else {
        let _ = writeln!(output, "| Topic | Date | Views | 7d Avg | Daily Growth | Anomaly |");
        let _ = writeln!(output, "|---|---|---|---|---|---|");
        for snapshot in snapshots {
            let date = snapshot.date.map_or("-".to_string(), |d| d.to_string());
            let views = snapshot.views.map_or("-".to_string(), |v| v.to_string());
            let trend = snapshot
                .trend_short
                .map_or("-".to_string(), |t| format!("{t:.1}"));
            let growth = snapshot.growth_daily.map_or("-".to_string(), percent);
            let anomaly = snapshot
                .severity
                .map_or("No".to_string(), |s| format!("**{s}**"));
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} |",
                snapshot.title, date, views, trend, growth, anomaly
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Anomalies (Last {since_days} Days)");

    if anomalies.is_empty() {
        let _ = writeln!(output, "No anomalies detected in the last {since_days} days.");
    } else {
        for event in anomalies {
            let _ = writeln!(
                output,
                "- **{}** on {}: severity {}, daily growth {}",
                event.topic_title,
                event.date,
                event.severity,
                percent(event.growth_daily)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Experiment Simulations");

    if experiments.is_empty() {
        let _ = writeln!(output, "No experiments run yet.");
    } else {
        for (title, run) in experiments {
            let _ = writeln!(
                output,
                "- **{}** {} (+{:.0}% lift): {} (effect size {:.2}, p={:.4}, CI [{:.4}, {:.4}])",
                title,
                run.metric_name,
                run.simulated_lift * 100.0,
                run.conclusion,
                run.effect_size,
                run.p_value,
                run.ci_lower,
                run.ci_upper
            );
        }
    }

    output
}
