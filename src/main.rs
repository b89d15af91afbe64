//! Movie Harvester: binary entrypoint
//! Loads config, wires the extract stage to the broker, and runs the interval
//! trigger until Ctrl-C. The operational HTTP surface starts when a listen
//! address is configured.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use movie_harvester::config::{BrokerKind, RunConfig};
use movie_harvester::extract::providers::build_clients;
use movie_harvester::extract::{Broker, ChannelBroker, Publisher, RunController};
use movie_harvester::load::MemoryLoader;
use movie_harvester::metrics::Metrics;
use movie_harvester::pipeline;
use movie_harvester::transform::MovieTransformer;

const CONSUMER_DRAIN: Duration = Duration::from_secs(10);

/// Compact logs by default; `HARVEST_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("movie_harvester=info,warn"));

    let json = std::env::var("HARVEST_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = match RunConfig::load_default() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration; refusing to start");
            return ExitCode::from(2);
        }
    };

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "harvester stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: RunConfig) -> anyhow::Result<()> {
    info!(
        sources = cfg.sources.len(),
        workers = cfg.worker_count,
        interval_secs = cfg.extract_interval_secs,
        max_messages = cfg.max_messages,
        broker = ?cfg.broker.kind,
        "configuration loaded"
    );

    let consumer_stop = CancellationToken::new();
    let mut consumer = None;

    // 1) Broker
    let broker: Arc<dyn Broker> = match cfg.broker.kind {
        BrokerKind::Channel => {
            let (broker, rx) = ChannelBroker::new(cfg.broker.channel_capacity);
            consumer = Some(tokio::spawn(pipeline::consume(
                rx,
                Arc::new(MovieTransformer),
                Arc::new(MemoryLoader::new()),
                consumer_stop.clone(),
            )));
            Arc::new(broker)
        }
        #[cfg(feature = "kafka")]
        BrokerKind::Kafka => Arc::new(
            movie_harvester::extract::kafka::KafkaBroker::new(&cfg.broker)
                .context("kafka producer")?,
        ),
        #[cfg(not(feature = "kafka"))]
        BrokerKind::Kafka => {
            anyhow::bail!("broker kind `kafka` requires building with `--features kafka`")
        }
    };

    // 2) Metrics recorder first, so descriptions and early series land in it
    let metrics = Metrics::install()?;

    // 3) Extract stage
    let publisher = Publisher::from_config(&cfg, broker);
    let clients = build_clients(&cfg).context("building source clients")?;
    let listen_addr = cfg.listen_addr.clone();
    let controller = Arc::new(RunController::new(cfg, clients, publisher)?);

    // 4) Operational HTTP
    let mut server = None;
    if let Some(addr) = listen_addr {
        let app = movie_harvester::router(Arc::clone(&controller), Some(&metrics));
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(%addr, "operational HTTP listening");
        let stop = controller.shutdown_token();
        server = Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        }));
    }

    // 5) Interval trigger until Ctrl-C or a fatal run error
    let mut interval = Arc::clone(&controller).spawn_interval();
    let finished = tokio::select! {
        res = &mut interval => Some(res),
        sig = tokio::signal::ctrl_c() => {
            if let Err(e) = sig {
                warn!(error = %e, "ctrl-c handler failed; shutting down");
            }
            None
        }
    };
    let outcome = match finished {
        Some(res) => res,
        None => {
            info!("shutdown requested; draining current run");
            controller.shutdown();
            interval.await
        }
    };

    if let Some(s) = server {
        if let Ok(Err(e)) = s.await {
            warn!(error = %e, "HTTP server error");
        }
    }

    // Dropping the last controller handle closes the channel; the consumer
    // drains what is buffered and stops on its own.
    drop(controller);
    if let Some(mut c) = consumer {
        match tokio::time::timeout(CONSUMER_DRAIN, &mut c).await {
            Ok(Ok(stats)) => info!(loaded = stats.loaded, failed = stats.failed, "consumer drained"),
            Ok(Err(e)) => warn!(error = %e, "consumer task failed"),
            Err(_) => {
                warn!("consumer did not drain in time; stopping it");
                consumer_stop.cancel();
                let _ = c.await;
            }
        }
    }

    outcome.context("interval task panicked")??;
    info!("harvester stopped");
    Ok(())
}
