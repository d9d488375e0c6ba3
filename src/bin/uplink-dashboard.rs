//! Headless dashboard: subscribes to the live feed, paces it through the
//! coalescer and renders every view change to the console.

use std::sync::Arc;

use anyhow::Result;

use uplink_monitor::bootstrap::{bootstrap, HttpSnapshotSource, SnapshotSource};
use uplink_monitor::clock::{Clock, SystemClock};
use uplink_monitor::coalescer::Coalescer;
use uplink_monitor::config::{self, TransportKind};
use uplink_monitor::display::ConsoleDisplay;
use uplink_monitor::telemetry;
use uplink_monitor::transport::{
    EventSink, MqttSource, Persister, PollingSource, Transport, TransportHandle,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cfg = config::load_default()?;
    let dash = &cfg.dashboard;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let coalescer = Coalescer::new(dash.coalescer_config(&cfg.store), clock.clone());
    coalescer.subscribe(Arc::new(ConsoleDisplay));
    let drain = coalescer.spawn(dash.drain_interval());

    // History bootstrap runs alongside the live subscription.
    let sources: Vec<Box<dyn SnapshotSource>> = dash
        .read_urls()
        .into_iter()
        .map(|url| Box::new(HttpSnapshotSource::new(url)) as Box<dyn SnapshotSource>)
        .collect();
    let boot = {
        let coalescer = coalescer.clone();
        let fallback = dash.fallback_location;
        tokio::spawn(async move { bootstrap(&coalescer, &sources, fallback).await })
    };

    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(coalescer.clone())];
    if dash.persist.enabled {
        let persister = Persister::new(dash.ingest_url.clone(), dash.persist_policy())
            .with_timeout(std::time::Duration::from_millis(dash.persist.timeout_ms))
            .with_limits(cfg.store.limits());
        sinks.push(Arc::new(persister));
    }

    let tcfg = dash.transport_config(&cfg.broker);
    let transport: TransportHandle = match dash.transport {
        TransportKind::Mqtt => {
            tracing::info!(
                host = %cfg.broker.host,
                port = cfg.broker.port,
                topic = %cfg.broker.topic,
                "starting mqtt subscription"
            );
            Transport::spawn(MqttSource::new(&cfg.broker), sinks, tcfg, clock)
        }
        TransportKind::Polling => {
            tracing::info!(url = %dash.remote_read_url, "starting polling subscription");
            let source = PollingSource::new(dash.remote_read_url.clone(), dash.poll_interval());
            Transport::spawn(source, sinks, tcfg, clock)
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    boot.abort();
    transport.shutdown().await;
    drain.stop().await;
    Ok(())
}
