use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use volley_core::config::{DelayPolicy, DispatcherConfig, PacingConfig};
use volley_core::events::DispatchEvent;
use volley_core::ids::SessionName;
use volley_core::transport::Transport;
use volley_engine::SessionRegistry;
use volley_telemetry::{init_telemetry, MetricsQuery, TelemetryConfig};
use volley_transport::MockTransport;

/// Demonstration harness: two sessions over a scripted transport, fast
/// pacing, every event printed as a JSON line. The HTTP/upload layer that
/// normally fronts the registry is out of scope here.
#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = init_telemetry(TelemetryConfig::default());
    info!("starting volley dispatch demo");

    let config = DispatcherConfig {
        sessions: vec!["vendas01".into(), "vendas02".into()],
        pacing: PacingConfig {
            delay: DelayPolicy::Uniform {
                min: Duration::from_millis(300),
                max: Duration::from_millis(800),
            },
            send_window: None,
            cooldown: None,
        },
        ..DispatcherConfig::default()
    };

    // Every link comes straight up; one number always bounces so the error
    // path shows on the stream.
    let transport = Arc::new(
        MockTransport::connected().fail_sends_to("556133334444", "recipient unavailable"),
    );
    let metrics = telemetry.metrics_handle();
    let registry = Arc::new(SessionRegistry::start(
        config,
        transport as Arc<dyn Transport>,
        Arc::clone(&metrics),
    ));

    let mut watchers = Vec::new();
    for session in registry.session_names() {
        let (_id, mut rx) = registry.subscribe(&session)?;
        let metrics = Arc::clone(&metrics);
        let name = session.clone();
        watchers.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                metrics.counter_inc(
                    "dispatch_events",
                    &[("session", name.as_str()), ("event", event.event_type())],
                    1,
                );
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("[{name}] {line}");
                }
                if matches!(event, DispatchEvent::Done { .. }) {
                    break;
                }
            }
        }));
    }

    for session in registry.session_names() {
        wait_connected(&registry, &session).await;
        let receipt = registry.submit_dispatch(
            &session,
            vec![
                "+55 (11) 98765-4321".to_string(),
                "556133334444".to_string(),
                "61987654321".to_string(),
            ],
            vec![
                "Oi! Tudo bem?".to_string(),
                "Olá, temos novidades para você.".to_string(),
            ],
        )?;
        info!(session = %session, total = receipt.total_count, "batch submitted");
    }

    tokio::select! {
        _ = async {
            for watcher in watchers {
                let _ = watcher.await;
            }
        } => info!("all sessions drained"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    for snapshot in metrics.query(&MetricsQuery::default()) {
        info!(
            name = %snapshot.name,
            labels = snapshot.labels.as_deref().unwrap_or("{}"),
            value = snapshot.value,
            "metric totals"
        );
    }

    registry.shutdown();
    Ok(())
}

async fn wait_connected(registry: &SessionRegistry, session: &SessionName) {
    loop {
        if let Ok(status) = registry.status(session) {
            if status.connection_state.is_connected() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
