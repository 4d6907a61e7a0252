use anyhow::{Context, Result};
use checker_collector::{Admission, Collector, RawObservation, settings::Settings};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    signal,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct IngestStats {
    buffered: u64,
    late: u64,
    rejected: u64,
}

/// Collect newline-delimited JSON observations from stdin until EOF or a
/// shutdown signal, flushing closed buckets in the background.
pub async fn run(settings: &Settings) -> Result<()> {
    if let Some(metrics) = &settings.metrics {
        PrometheusBuilder::new()
            .with_http_listener(metrics.addr)
            .install()
            .context("Failed to install prometheus exporter")?;
        export_build_info();
    }

    let collector = Collector::open(settings).context("Failed to open collector")?;
    let shutdown = shutdown_listener()?;
    let flush = collector.spawn_flush(shutdown.clone());

    info!(
        store = %settings.store.path,
        bucket_width_ms = settings.buffer.bucket_width_ms,
        flush_interval_secs = settings.flush.interval_seconds,
        "checker collector started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stats = IngestStats::default();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line.context("Failed to read observations from stdin")? {
                    Some(line) => ingest_line(&collector, &line, &mut stats),
                    None => {
                        info!("observation stream closed");
                        break;
                    }
                }
            }
        }
    }

    shutdown.cancel();
    match flush.await {
        Ok(report) => info!(
            flushed = report.flushed,
            failed = report.failed,
            "flush task stopped"
        ),
        Err(err) => error!(?err, "flush task exited abnormally"),
    }

    collector.close().context("Failed to close store")?;
    info!(
        buffered = stats.buffered,
        late = stats.late,
        rejected = stats.rejected,
        "checker collector shutting down"
    );

    Ok(())
}

fn ingest_line(collector: &Collector, line: &str, stats: &mut IngestStats) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let raw: RawObservation = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(err) => {
            stats.rejected += 1;
            warn!(%err, "skipping malformed observation");
            return;
        }
    };

    match collector.ingest_raw(&raw) {
        Ok(Admission::Buffered) => stats.buffered += 1,
        Ok(Admission::Late) => stats.late += 1,
        Err(err) => {
            stats.rejected += 1;
            warn!(%err, link = %raw.link, time = %raw.time, "rejected observation");
        }
    }
}

fn shutdown_listener() -> Result<CancellationToken> {
    let cancellation_token = CancellationToken::new();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("sigterm listener failed")?;
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            tokio::select! {
                _ = sigterm.recv() => cancellation_token.cancel(),
                _ = signal::ctrl_c() => cancellation_token.cancel(),
            }
        }
    });

    Ok(cancellation_token)
}

fn export_build_info() {
    let version = option_env!("BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    let build_commit = option_env!("BUILD_COMMIT").unwrap_or("UNKNOWN");
    let build_date = option_env!("DATE").unwrap_or("UNKNOWN");
    let pkg_version = env!("CARGO_PKG_VERSION");

    metrics::gauge!(
        "checker_collector_build_info",
        "version" => version,
        "commit" => build_commit,
        "date" => build_date,
        "pkg_version" => pkg_version
    )
    .set(1);
}
