use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::{sync::Arc, time::Duration};
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use raceline_server::{
    replay::ReplayService, storage::FileTelemetryStore, web::Web, Cli, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(args.verbose.log_level_filter())
        .init();

    log::info!("raceline-server {} starting", VERSION);

    let config = args.replay_config().into_diagnostic()?;
    let data_dir = args.data_dir();
    log::info!("Reading race telemetry from {}", data_dir.display());

    let store = Arc::new(FileTelemetryStore::new(&data_dir));
    let service = Arc::new(ReplayService::new(config, store).into_diagnostic()?);
    let web = Web::new(service, args.port);

    Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("Webserver", |a| web.run(a)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await
    .map_err(Into::into)
}
