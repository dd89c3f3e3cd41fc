// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic event-sync-engine usage example.
//!
//! Demonstrates:
//! 1. Loading config with two targets and a severity routing rule
//! 2. Immediate delivery of alerts and signals
//! 3. Batched delivery of metrics (size-triggered and shutdown flush)
//! 4. A flaky target recovering through retries
//! 5. Displaying metrics (OTEL-compatible)
//! 6. Clean shutdown
//!
//! Both targets are served by a tiny in-process HTTP sink, so no external
//! services are needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use event_sync_engine::{Event, EventKind, Severity, SyncConfig, SyncOrchestrator};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures all metrics for OTEL export)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "event_sync_engine=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║         event-sync-engine: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Local HTTP sink standing in for webhook receivers
    // ─────────────────────────────────────────────────────────────────────────
    let sink = TcpListener::bind("127.0.0.1:0").await?;
    let addr = sink.local_addr()?;
    let requests = Arc::new(AtomicUsize::new(0));
    tokio::spawn(serve(sink, requests.clone()));
    println!("🛰️  HTTP sink listening on http://{addr}");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Configure and start the orchestrator
    // ─────────────────────────────────────────────────────────────────────────
    std::env::set_var("ERROR_ALERTS_WEBHOOK", format!("http://{addr}/flaky/alerts"));
    let config = SyncConfig::from_json_str(&json!({
        "batch_size_limit": 5,
        "batch_idle_timeout_secs": 2,
        "initial_retry_delay_secs": 0.2,
        "compression_threshold_bytes": 256,
        "default_target": "ops",
        "targets": [
            {"name": "ops", "url": format!("http://{addr}/ops"), "use_compression": true},
            {"name": "error_alerts", "url_env": "ERROR_ALERTS_WEBHOOK",
             "headers": {"Authorization": "Bearer demo-token"}}
        ],
        "routing_rules": [
            {"id": "critical", "severity": "critical", "target": "error_alerts"},
            {"id": "errors", "types": ["error"], "target": "error_alerts"}
        ]
    })
    .to_string())?;

    let orchestrator = SyncOrchestrator::new(config)?;
    println!("   State: {}", orchestrator.state());
    orchestrator.start().await;
    println!("   ✅ Running! State: {}", orchestrator.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Ingest a mix of events
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Ingesting events...");
    orchestrator.ingest(Event::new(
        EventKind::Signal,
        "trading",
        json!({"symbol": "BTCUSD", "side": "buy", "price": 64210.5, "model_state": {"weights": [0.1, 0.7]}}),
    ));
    orchestrator.ingest(
        Event::new(EventKind::Signal, "trading", json!({"symbol": "ETHUSD", "side": "sell"}))
            .with_severity(Severity::Critical),
    );
    orchestrator.ingest_json(
        r#"{"event_type": "error", "source": "worker", "data": {"error": "timeout talking to exchange"}, "priority": 9}"#,
    )?;
    for n in 0..7 {
        orchestrator.ingest(Event::new(EventKind::Metric, "collector", json!({"name": "latency_ms", "value": 10 + n})));
    }
    println!("   └─ 10 events ingested (7 metrics batched by source)");

    println!("\n⏳ Waiting for deliveries and retries...");
    tokio::time::sleep(Duration::from_secs(1)).await;
    let metrics = orchestrator.metrics();
    println!("   └─ processed={} pending_batch={} retry_queue={}",
        metrics.events_processed, metrics.pending_batch_events, metrics.retry_queue_depth);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Shut down (flushes the open metric batch)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    orchestrator.shutdown().await;
    println!("   ✅ State: {}", orchestrator.state());

    let metrics = orchestrator.metrics();
    println!("\n📊 Orchestrator Metrics:");
    println!("   ├─ events_processed:      {}", metrics.events_processed);
    println!("   ├─ events_failed:         {}", metrics.events_failed);
    println!("   ├─ batches_sent:          {}", metrics.batches_sent);
    println!("   ├─ retries_scheduled:     {}", metrics.retries_scheduled);
    println!("   ├─ compression_ratio_avg: {:.2}", metrics.compression_ratio_avg);
    println!("   └─ HTTP requests served:  {}", requests.load(Ordering::SeqCst));
    for dead in orchestrator.dead_letters() {
        println!("   ⚠️  dead letter → {} ({} events): {}", dead.target, dead.events.len(), dead.last_error);
    }

    println!("\n📈 Raw Metrics (OTEL export format):");
    dump_metrics(&snapshotter);

    println!("\n✨ Done!\n");
    Ok(())
}

/// Minimal HTTP responder. Paths under `/flaky` fail their first request.
async fn serve(listener: TcpListener, requests: Arc<AtomicUsize>) {
    let flaky_failed = Arc::new(AtomicUsize::new(0));
    while let Ok((mut stream, _)) = listener.accept().await {
        let requests = requests.clone();
        let flaky_failed = flaky_failed.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            let Ok(n) = stream.read(&mut buf).await else { return };
            let head = String::from_utf8_lossy(&buf[..n]);
            let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
            requests.fetch_add(1, Ordering::SeqCst);

            let status = if path.starts_with("/flaky") && flaky_failed.fetch_add(1, Ordering::SeqCst) == 0 {
                503
            } else {
                200
            };
            println!("   🛰️  {path} → {status}");
            let response = format!("HTTP/1.1 {status} Demo\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut lines: Vec<String> = Vec::new();
    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{v}"),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={count} avg={:.4}", if count > 0 { sum / count as f64 } else { 0.0 })
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }

    lines.sort();
    for line in &lines {
        println!("   └─ {line}");
    }
}
