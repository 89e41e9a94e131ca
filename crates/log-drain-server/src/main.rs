// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use log_drain::{
    config::Config,
    drain::DrainController,
    entry::LogplexParser,
    handler::IngestionHandler,
    registry::SinkRegistry,
    server::DrainServer,
    sink::http::HttpSinkFactory,
};

#[tokio::main]
pub async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // no subscriber yet, so this is the only way to surface the problem
            eprintln!("Error creating config on log drain startup: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    if let Err(e) = run(config).await {
        error!("Log drain failed: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let factory = Arc::new(HttpSinkFactory::new(config.intake.clone())?);
    let registry = Arc::new(SinkRegistry::new(factory, config.creation_failure_policy));
    let handler = Arc::new(IngestionHandler::from_config(
        &config,
        Arc::clone(&registry),
        Arc::new(LogplexParser),
    ));

    let server = DrainServer::bind(config.bind, handler, config.shutdown_grace_period).await?;
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server.serve(shutdown).await?;

    let report = DrainController::new(registry)
        .drain(config.drain_timeout)
        .await;
    match report.into_result() {
        Ok(report) => info!(
            "Drained {} sink(s), {} failed to close",
            report.closed, report.failed
        ),
        Err(e) => warn!("{e}"),
    }
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C, shutting down");
    }

    shutdown.cancel();
}
