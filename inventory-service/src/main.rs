use anyhow::Result;
use clap::Parser;
use inventory_service::{
    api,
    chaos::FaultInjector,
    config::Args,
    coordinator::ReservationCoordinator,
    db,
    ledger::PgOperationLedger,
    product_client::ProductServiceClient,
    reconciler::StuckOperationMonitor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut conn = db::connect_with_retry(
        &args.database_url,
        args.db_connect_attempts,
        Duration::from_millis(args.db_connect_backoff_ms),
    )
    .await?;
    db::run_migrations(&mut conn)?;
    drop(conn);

    let pool = db::build_pool(&args.database_url).await?;

    let ledger = Arc::new(PgOperationLedger::new(pool));
    let product_client = ProductServiceClient::new(&args.product_service_base_url, args.product_service_timeout())?;

    let chaos = args.chaos();
    if chaos.enabled {
        info!(
            latency_probability = chaos.latency_probability,
            error_probability = chaos.error_probability,
            delay_ms = args.chaos_delay_ms,
            "Chaos mode enabled"
        );
    }

    let coordinator = ReservationCoordinator::new(
        ledger.clone(),
        Arc::new(product_client),
        FaultInjector::new(chaos),
    );
    let monitor = Arc::new(StuckOperationMonitor::new(
        ledger,
        args.stuck_after(),
        args.reconcile_interval(),
    ));

    let sweeper = monitor.clone();
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let app_state = api::AppState {
        coordinator: Arc::new(coordinator),
        monitor,
    };

    let app = api::create_router(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Inventory service web server started on port {}", args.port);
    info!("Product service at {}", args.product_service_base_url);

    axum::serve(listener, app).await?;

    Ok(())
}
