//! lanbeacon binary entry point.

use clap::{Parser, Subcommand};
use lanbeacon::{register, telemetry, Config, Resolver, TelemetryConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// mDNS/DNS-SD service advertisement and discovery.
#[derive(Parser, Debug)]
#[command(name = "lanbeacon")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Advertise the service described in a TOML config file.
    Serve {
        /// Path to configuration file (TOML).
        #[arg(short, long, default_value = "lanbeacon.toml")]
        config: PathBuf,
    },
    /// Browse for instances of a service type and print them.
    Browse {
        /// Service type to browse (e.g., "_http._tcp").
        service: String,

        /// DNS-SD domain.
        #[arg(short, long, default_value = "local")]
        domain: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Command::Serve { config } => serve(config).await,
        Command::Browse { service, domain } => browse(service, domain).await,
    }
}

async fn serve(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = config::Config::builder()
        .add_source(config::File::from(config_path.clone()))
        .add_source(
            config::Environment::with_prefix("LANBEACON")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %config_path.display(),
        instance = %config.service.instance,
        service = %config.service.service,
        port = config.service.port,
        "Starting lanbeacon"
    );

    let service = config.service;
    let registration = register(
        &service.instance,
        &service.service,
        &service.domain,
        service.port,
        service.text,
        service.interfaces,
        service.ttl,
    )?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    registration.shutdown().await;

    info!("lanbeacon shutdown complete");
    Ok(())
}

async fn browse(service: String, domain: String) -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init(&TelemetryConfig::default()).map_err(|e| e as Box<dyn std::error::Error>)?;

    let cancel = CancellationToken::new();
    let mut stream = Resolver::new().browse(&service, &domain, &cancel)?;

    info!(%service, %domain, "Browsing (ctrl-c to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            entry = stream.recv() => match entry {
                Some(entry) if entry.ttl == 0 => {
                    println!("- {} (withdrawn)", entry.record.instance);
                }
                Some(entry) => {
                    println!(
                        "+ {}  {}:{}  v4={:?} v6={:?}  txt={:?}",
                        entry.record.instance,
                        entry.hostname,
                        entry.port,
                        entry.addrs_v4,
                        entry.addrs_v6,
                        entry.text,
                    );
                }
                None => break,
            }
        }
    }

    Ok(())
}
