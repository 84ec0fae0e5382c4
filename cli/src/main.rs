use crate::args::Cli;
use crate::config::FileConfig;
use crate::dispatcher::Dispatcher;
use anyhow::Result;
use clap::Parser;
use common::{ChannelRegistry, DispatchError, HttpTransport, ReqwestTransport, SEND_TIMEOUT};
use fcm::PushSender;
use firestore::DocumentSender;
use google_auth::ServiceAccountCredentials;
use log::*;
use std::process::ExitCode;
use std::sync::Arc;

mod args;
mod config;
mod dispatcher;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let file = FileConfig::load_or_default(cli.config.as_deref());
    let config = config::resolve(cli.overrides(), file);
    info!("Mode: {}, project: {}", config.mode, config.project_id);

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(SEND_TIMEOUT)?);

    let mut registry = ChannelRegistry::new();
    registry.register(Box::new(match &cli.fcm_endpoint {
        Some(endpoint) => PushSender::with_endpoint(endpoint.as_str(), transport.clone()),
        None => PushSender::new(transport.clone()),
    }));
    registry.register(Box::new(match &cli.firestore_endpoint {
        Some(endpoint) => DocumentSender::with_endpoint(endpoint.as_str(), transport.clone()),
        None => DocumentSender::new(transport.clone()),
    }));
    debug!("Registered channels: {:?}", registry.list_channels());

    let credentials = Arc::new(ServiceAccountCredentials::new(transport));
    let dispatcher = Dispatcher::new(credentials, registry);

    match dispatcher
        .run(&config, &cli.addressing(), &cli.event())
        .await
    {
        Ok(report) => Ok(ExitCode::from(report.exit_status())),
        Err(e) => {
            eprintln!("Error: {e}");
            if let DispatchError::Configuration(config_error) = &e {
                if let Some(hint) = config_error.remediation() {
                    eprintln!("\n{hint}");
                }
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
