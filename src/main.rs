use std::{process, sync::Arc};

use shelfcache::{
    application::{
        control::ControlChannel,
        error::AppError,
        lifecycle::prune_unrecognized,
        worker::{Worker, WorkerConfig},
    },
    cache::CacheConfig,
    config,
    domain::commands::ControlCommand,
    infra::{
        error::InfraError,
        http::{self, ProxyState},
        telemetry,
        upstream::HttpUpstream,
    },
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::ClearChapters(_) => run_clear_chapters(settings).await,
        config::Command::Prune(_) => run_prune(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let worker_config = WorkerConfig::from(&settings);
    if !worker_config.cache.is_persistent() {
        info!(
            target = "shelfcache::serve",
            "Memory store in use; cached responses end with the process"
        );
    }

    let store = worker_config.cache.open_store();
    let upstream = Arc::new(HttpUpstream::new(&settings.upstream)?);
    let worker = Worker::new(worker_config, store, upstream);

    let installed = worker.install().await?;
    let pruned = worker.activate().await?;
    info!(
        target = "shelfcache::serve",
        install = ?installed,
        pruned = pruned.len(),
        upstream = %settings.upstream.base_url,
        "Proxy activated"
    );

    let state = ProxyState {
        worker: worker.clone(),
        max_request_bytes: settings.server.max_request_bytes.get(),
    };
    let router = http::build_router(state, &settings.routing);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(target = "shelfcache::serve", addr = %settings.server.addr, "Listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    if !worker.shutdown(settings.server.graceful_shutdown).await {
        warn!(
            target = "shelfcache::serve",
            pending = worker.background().in_flight(),
            "Background work still pending at shutdown"
        );
    }
    Ok(())
}

async fn run_clear_chapters(settings: config::Settings) -> Result<(), AppError> {
    let cache = CacheConfig::from(&settings.cache);
    let chapters = cache.namespaces.chapters().clone();
    let channel = ControlChannel::new(cache.open_store(), chapters);

    channel.apply(ControlCommand::ClearChapterCache).await?;
    info!(
        target = "shelfcache::clear_chapters",
        directory = %cache.directory.display(),
        backend = %cache.backend,
        "Clear completed"
    );
    Ok(())
}

async fn run_prune(settings: config::Settings) -> Result<(), AppError> {
    let cache = CacheConfig::from(&settings.cache);
    let store = cache.open_store();

    let pruned = prune_unrecognized(store.as_ref(), &cache.namespaces).await?;
    for name in &pruned {
        println!("{name}");
    }
    info!(
        target = "shelfcache::prune",
        pruned = pruned.len(),
        "Prune completed"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "shelfcache::serve", "Shutdown signal received");
}
