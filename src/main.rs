use std::{process, str::FromStr, sync::Arc, time::Duration};

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde::Serialize;
use tiercache::{
    cache::{CacheConfig, MemoryKvStore, MemoryObjectStore, MemoryResponseStore},
    config,
    edge::{EdgeCapabilities, EdgeExecutor, ReqwestOrigin},
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, EdgeState},
        telemetry,
    },
    lifecycle::Generations,
    routing::{Classifier, EdgeStrategy},
};
use tokio::time::{Instant, sleep};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const DRAIN_POLL: Duration = Duration::from_millis(50);

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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Classify(args) => run_classify(settings, args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = CacheConfig::from(&settings.cache);
    let origin = ReqwestOrigin::new(
        settings.origin.base_url.clone(),
        settings.origin.timeout,
        settings.origin.max_request_bytes.get(),
    )?;

    let caps = EdgeCapabilities {
        responses: Arc::new(MemoryResponseStore::new(&cache)),
        kv: Arc::new(MemoryKvStore::new(&cache)),
        objects: Arc::new(MemoryObjectStore::new()),
        origin: Arc::new(origin),
    };
    let executor = Arc::new(EdgeExecutor::new(
        Arc::new(settings.edge.rules.clone()),
        cache,
        caps,
        Arc::new(Generations::new(settings.edge.generation.clone())),
    ));

    let router = http::build_router(EdgeState {
        executor: executor.clone(),
    });
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "tiercache::serve",
        addr = %settings.server.addr,
        origin = %settings.origin.base_url,
        generation = %settings.edge.generation,
        "Edge proxy listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    drain_pending_writes(&executor, settings.server.graceful_shutdown).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "tiercache::serve", "Shutdown requested");
}

async fn drain_pending_writes(executor: &EdgeExecutor, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while executor.pending_writes() > 0 {
        if Instant::now() >= deadline {
            warn!(
                target = "tiercache::serve",
                pending = executor.pending_writes(),
                "Abandoning background cache writes"
            );
            return;
        }
        sleep(DRAIN_POLL).await;
    }
}

#[derive(Debug, Serialize)]
struct ClassifyReport {
    method: String,
    path: String,
    class: &'static str,
    edge_strategy: &'static str,
    client_strategy: &'static str,
}

fn run_classify(settings: config::Settings, args: config::ClassifyArgs) -> Result<(), AppError> {
    let method = Method::from_str(&args.method.to_ascii_uppercase())
        .map_err(|err| AppError::validation(format!("invalid method `{}`: {err}", args.method)))?;
    let uri = Uri::from_str(&args.url)
        .map_err(|err| AppError::validation(format!("invalid URL `{}`: {err}", args.url)))?;
    let headers = parse_headers(&args.headers)?;

    let classifier = Classifier::new(Arc::new(settings.edge.rules.clone()));
    let class = classifier.classify(&method, &uri, &headers);
    let report = ClassifyReport {
        method: method.to_string(),
        path: uri.path().to_string(),
        class: class.as_str(),
        edge_strategy: EdgeStrategy::for_class(class).as_str(),
        client_strategy: settings.client.rules.select(uri.path()).as_str(),
    };

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| AppError::validation(format!("header `{entry}` must be `name: value`")))?;
        let name = HeaderName::from_str(name.trim())
            .map_err(|err| AppError::validation(format!("invalid header name in `{entry}`: {err}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|err| AppError::validation(format!("invalid header value in `{entry}`: {err}")))?;
        headers.append(name, value);
    }
    Ok(headers)
}
