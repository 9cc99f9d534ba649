use anyhow::Context;
use clap::Parser;
use power_ble_controller::domain::models::{EventSink, OperatingMode};
use power_ble_controller::domain::settings::{AppConfig, SettingsService};
use power_ble_controller::infrastructure::bluetooth::btleplug_backend::BtleplugCentral;
use power_ble_controller::infrastructure::bluetooth::{CommandOrchestrator, RunRequest};
use power_ble_controller::infrastructure::exchange::HttpExchange;
use power_ble_controller::infrastructure::logging::init_logger;
use power_ble_controller::presentation::console::ConsoleReporter;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "power_ble_controller")]
#[command(about = "Start a BLE power appliance through the command exchange service")]
struct Cli {
    /// Advertised Bluetooth name of the device
    device_name: String,

    /// Operating mode: restore (1) or initialize (2)
    #[arg(short, long, default_value = "restore")]
    mode: OperatingMode,

    /// Scan duration in seconds, overriding the settings file
    #[arg(long)]
    scan_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match SettingsService::new() {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Failed to locate settings: {e:#}");
            return ExitCode::from(2);
        }
    };
    let _log_guard = match init_logger(&settings.get().log_settings) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {e:#}");
            None
        }
    };
    info!("Using settings from {}", settings.path().display());

    // Leave an editable file behind on first run
    if !settings.path().exists() {
        if let Err(e) = settings.save() {
            warn!("Could not write default settings: {:#}", e);
        }
    }
    if let Some(secs) = cli.scan_secs {
        settings.get_mut().scan_window_secs = secs;
    }

    let config = match AppConfig::resolve(settings.get()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("Configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    match run(cli, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<bool> {
    let exchange = HttpExchange::new(config.api_base_url.clone(), config.request_timeout)
        .context("Failed to build HTTP client")?;
    let central = BtleplugCentral::new();

    let (events, receiver) = EventSink::channel();
    let reporter = tokio::spawn(ConsoleReporter::new().drain(receiver));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping run");
            ctrl_c.cancel();
        }
    });

    let mut orchestrator = CommandOrchestrator::new(
        Arc::new(central),
        Arc::new(exchange),
        config.connection,
        events,
    )
    .with_upload_grace(config.request_timeout);
    let request = RunRequest {
        device_name: cli.device_name,
        mode: cli.mode,
    };
    let outcome = orchestrator.run(&request, &cancel).await;
    drop(orchestrator);

    let reported = reporter.await.context("Progress display task failed")?;
    Ok(outcome.is_ok() && reported.unwrap_or(true))
}
