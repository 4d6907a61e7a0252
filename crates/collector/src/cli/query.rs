use anyhow::{Context, Result};
use checker_collector::{
    LinkId,
    aggregate::rollup,
    reader::RangeReader,
    settings::Settings,
    store::Store,
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tabled::{Table, Tabled, settings::Style};

#[derive(Debug, Tabled)]
struct StatusRow {
    #[tabled(rename = "Link")]
    link: String,
    #[tabled(rename = "Buckets")]
    buckets: usize,
    #[tabled(rename = "Uptime %")]
    uptime: String,
    #[tabled(rename = "Mean ms")]
    mean_ms: String,
    #[tabled(rename = "Stddev ms")]
    stddev_ms: String,
    #[tabled(rename = "P90 ms")]
    p90_ms: String,
    #[tabled(rename = "P95 ms")]
    p95_ms: String,
    #[tabled(rename = "P99 ms")]
    p99_ms: String,
}

fn open_reader(settings: &Settings) -> Result<RangeReader<Store>> {
    let store = Store::open_read_only(&settings.store.path)
        .with_context(|| format!("Failed to open store at {}", settings.store.path))?;
    Ok(RangeReader::new(Arc::new(store)))
}

pub fn status(settings: &Settings, link: LinkId, lookback: Duration) -> Result<()> {
    let reader = open_reader(settings)?;
    let summaries = reader.summaries(link, lookback)?;

    let Some(summary) = rollup(&summaries) else {
        println!(
            "No summaries for {link} in the last {}",
            humantime::format_duration(lookback)
        );
        return Ok(());
    };

    let ms = |secs: f64| format!("{:.3}", secs * 1000.0);
    let row = StatusRow {
        link: link.to_string(),
        buckets: summaries.len(),
        uptime: format!("{:.2}", summary.uptime),
        mean_ms: ms(summary.mean),
        stddev_ms: ms(summary.stddev),
        p90_ms: ms(summary.p90),
        p95_ms: ms(summary.p95),
        p99_ms: ms(summary.p99),
    };

    println!(
        "{}",
        Table::new([row]).with(Style::psql().remove_horizontals())
    );
    Ok(())
}

pub fn points(settings: &Settings, link: LinkId, lookback: Duration) -> Result<()> {
    let reader = open_reader(settings)?;
    let points = reader.points(link, lookback)?;
    print!("{}", collection_to_csv(&points)?);
    Ok(())
}

/// Helper function to convert a collection to CSV format
fn collection_to_csv<T: Serialize>(records: &[T]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for record in records {
        wtr.serialize(record)?;
    }
    let data = wtr.into_inner()?;
    Ok(String::from_utf8(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use checker_collector::reader::GraphPoint;
    use chrono::{TimeZone, Utc};

    #[test]
    fn graph_points_render_as_csv() {
        let points = [GraphPoint {
            at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 7).unwrap(),
            uptime: 60.0,
            mean_ms: 12.5,
            p99_ms: 30.0,
        }];

        let csv = collection_to_csv(&points).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("at,uptime,mean_ms,p99_ms"));
        assert_eq!(lines.next(), Some("2024-05-01T12:00:07Z,60.0,12.5,30.0"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.store.path = dir.path().join("absent").to_string_lossy().into_owned();
        assert!(status(&settings, LinkId::Wifi, Duration::from_secs(60)).is_err());
    }
}
