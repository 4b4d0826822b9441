use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
    app::App,
    config::{Config, Environment},
    executor::Executor,
    fetch::Fetcher,
    mailer::Mailer,
    router::router,
    scheduler::Scheduler,
    store::JobStore,
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn handle_serve_command(environment: Environment, config: Config) {
    let mailer = if environment == Environment::Test {
        Mailer::mock()
    } else {
        let smtp = config
            .smtp()
            .expect("SMTP configuration was validated at startup");
        match Mailer::smtp(&smtp) {
            Ok(mailer) => mailer,
            Err(e) => {
                error!("failed to build SMTP transport: {e}");
                return;
            }
        }
    };

    let store = JobStore::new(&config.job_storage_path);
    let fetcher = Fetcher::new(config.fetch_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let executor = Arc::new(Executor::new(
        store.clone(),
        fetcher,
        mailer.clone(),
        config.sender(),
        config.script_deadline(),
        shutdown_rx,
    ));
    let scheduler = Scheduler::new(executor.clone(), config.run_pool_size(), shutdown_tx);

    // Persisted jobs come back on every boot; a record that fails to
    // schedule is logged and skipped.
    match scheduler.load_all(&store).await {
        Ok(count) => info!("restored {count} scheduled job(s) from storage"),
        Err(e) => error!("failed to load persisted jobs: {e}"),
    }

    let port = config.server_port;
    let app = App {
        config,
        environment,
        store,
        scheduler: scheduler.clone(),
        executor,
        mailer,
    };

    start_server(router(app), port).await;

    // The listener is down; drain in-flight runs before exiting.
    scheduler.stop(DRAIN_TIMEOUT).await;
}

async fn start_server(router: axum::Router, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return;
        }
    };

    info!("server starting on http://{addr}");
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {e}");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install shutdown handler: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
