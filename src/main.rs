use std::{process, sync::Arc};

use edge_coherence::{
    application::AppError,
    bus::{BusConfig, EventBus},
    cache::CacheConfig,
    config,
    infra::{
        error::InfraError,
        http::{self, EdgeState},
        telemetry,
    },
    origin::{HttpOriginGateway, OriginConfig, OriginGateway},
    region::{Region, RegionConfig},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (_cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let store = CacheConfig::from(&settings.cache).open_store().await?;
    let origin_config = OriginConfig::new(&settings.origin, &settings.region.name);
    let origin: Arc<dyn OriginGateway> = Arc::new(HttpOriginGateway::new(&origin_config)?);

    let bus = EventBus::new(&BusConfig::from(&settings.event_bus));
    info!(
        topic = bus.topic(),
        partitions = bus.partition_count(),
        brokers = ?settings.event_bus.brokers,
        "Invalidation bus ready"
    );

    let region = Region::start(
        RegionConfig::from_settings(&settings),
        store,
        origin,
        &bus,
    );

    let result = serve_http(&settings, EdgeState::new(&region, bus)).await;

    if tokio::time::timeout(settings.server.graceful_shutdown, region.shutdown())
        .await
        .is_err()
    {
        warn!(
            region = region.name(),
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "Region shutdown timed out"
        );
    }

    result
}

async fn serve_http(settings: &config::Settings, state: EdgeState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "Edge server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InfraError::from)?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
